use std::sync::Mutex;

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::app::mailer::{Mailer, OutboundEmail};

/// Mailer used when no relay queue is configured: logs the envelope only.
#[derive(Clone, Default)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, email: &OutboundEmail) -> Result<()> {
        tracing::info!(
            to = %email.to,
            subject = %email.subject,
            "mail relay not configured, notification logged only"
        );
        Ok(())
    }
}

/// Keeps every message in memory. Backs the memory store in tests.
#[derive(Default)]
pub struct Outbox {
    sent: Mutex<Vec<OutboundEmail>>,
}

impl Outbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<OutboundEmail> {
        self.sent
            .lock()
            .map(|sent| sent.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Mailer for Outbox {
    async fn send(&self, email: &OutboundEmail) -> Result<()> {
        let mut sent = self
            .sent
            .lock()
            .map_err(|_| anyhow!("outbox lock poisoned"))?;
        sent.push(email.clone());
        Ok(())
    }
}
