pub mod catalog;
pub mod issue;
pub mod notification;
pub mod report;
