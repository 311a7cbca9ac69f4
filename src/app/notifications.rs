use std::sync::Arc;

use url::Url;
use uuid::Uuid;

use crate::app::directory::Directory;
use crate::app::error::ServiceResult;
use crate::app::mailer::{Mailer, OutboundEmail};
use crate::app::preferences::PreferenceService;
use crate::app::tokens::TokenService;
use crate::config::IssueSettings;
use crate::domain::catalog::{Dataset, HostUser};
use crate::domain::issue::{Issue, IssueComment};

/// Works out who hears about new issues and comments, and mails them.
#[derive(Clone)]
pub struct NotificationService {
    preferences: PreferenceService,
    tokens: TokenService,
    directory: Arc<dyn Directory>,
    mailer: Arc<dyn Mailer>,
    settings: IssueSettings,
}

impl NotificationService {
    pub fn new(
        preferences: PreferenceService,
        tokens: TokenService,
        directory: Arc<dyn Directory>,
        mailer: Arc<dyn Mailer>,
        settings: IssueSettings,
    ) -> Self {
        Self {
            preferences,
            tokens,
            directory,
            mailer,
            settings,
        }
    }

    /// Users to notify about activity on the publisher's datasets, without
    /// duplicates, in first-seen order: everyone opted in to all publishers,
    /// then everyone who listed this one, then the publisher's editors and
    /// admins whose settings ask for it.
    pub async fn resolve_recipients(&self, publisher_id: Uuid) -> ServiceResult<Vec<Uuid>> {
        let mut stored = self.preferences.users_with_all_publishers().await?;
        stored.extend(self.preferences.users_including_publisher(publisher_id).await?);

        let mut recipients: Vec<Uuid> = Vec::with_capacity(stored.len());
        for user_id in stored {
            if !recipients.contains(&user_id) {
                recipients.push(user_id);
            }
        }

        for role in &self.settings.update_dataset_roles {
            let members = self.directory.users_with_role(publisher_id, role).await?;
            for user_id in members {
                if recipients.contains(&user_id) {
                    continue;
                }
                if self.wants_notification(user_id, publisher_id).await? {
                    recipients.push(user_id);
                }
            }
        }

        Ok(recipients)
    }

    /// Evaluates the user's stored settings. A user with no record gets the
    /// default one written first, so this is not a pure read.
    pub async fn wants_notification(&self, user_id: Uuid, publisher_id: Uuid) -> ServiceResult<bool> {
        let record = self.preferences.find_or_create_default(user_id).await?;

        if record.all_publishers || record.includes(publisher_id) {
            return Ok(true);
        }
        if record.all_where_editor_admin {
            return Ok(self
                .directory
                .is_active_member(user_id, publisher_id)
                .await?);
        }
        Ok(false)
    }

    pub async fn notify_new_issue(&self, issue: &Issue, dataset: &Dataset, author: &HostUser) {
        let subject = self.subject(issue, dataset);
        let intro = format!("{} reported a new issue on {}:", author.name, dataset.display_name());
        let detail = match &issue.description {
            Some(description) if !description.trim().is_empty() => {
                format!("{}\n\n{}", issue.title, description)
            }
            _ => issue.title.clone(),
        };
        self.deliver(issue, dataset, &subject, &intro, &detail).await;
    }

    pub async fn notify_new_comment(
        &self,
        issue: &Issue,
        comment: &IssueComment,
        dataset: &Dataset,
        author: &HostUser,
    ) {
        let subject = self.subject(issue, dataset);
        let intro = format!("{} commented on issue #{}:", author.name, issue.number);
        self.deliver(issue, dataset, &subject, &intro, &comment.comment)
            .await;
    }

    /// Sends one email per recipient. Errors of any kind are logged and
    /// dropped: the issue or comment is already committed.
    async fn deliver(&self, issue: &Issue, dataset: &Dataset, subject: &str, intro: &str, detail: &str) {
        if !self.settings.send_email_notifications {
            return;
        }
        let Some(publisher_id) = dataset.owner_org else {
            tracing::debug!(dataset_id = %dataset.id, "dataset has no publisher, no notification sent");
            return;
        };

        let recipients = match self.resolve_recipients(publisher_id).await {
            Ok(recipients) => recipients,
            Err(err) => {
                tracing::warn!(error = ?err, publisher_id = %publisher_id, "failed to resolve notification recipients");
                return;
            }
        };

        for user_id in recipients {
            let user = match self.directory.find_user(user_id).await {
                Ok(Some(user)) => user,
                Ok(None) => {
                    tracing::warn!(user_id = %user_id, "notification recipient not found");
                    continue;
                }
                Err(err) => {
                    tracing::warn!(error = ?err, user_id = %user_id, "failed to load notification recipient");
                    continue;
                }
            };
            let Some(address) = user.email.clone().filter(|email| !email.is_empty()) else {
                tracing::debug!(user_id = %user_id, "notification recipient has no email address");
                continue;
            };

            let token = match self.tokens.issue(user_id).await {
                Ok(token) => token,
                Err(err) => {
                    tracing::warn!(error = ?err, user_id = %user_id, "failed to issue notification token");
                    continue;
                }
            };

            let email = OutboundEmail {
                to: address,
                to_name: user.name.clone(),
                from: self.settings.mail_from.clone(),
                subject: subject.to_string(),
                body: self.body(issue, dataset, &user, intro, detail, &token.code),
            };
            if let Err(err) = self.mailer.send(&email).await {
                tracing::warn!(error = ?err, user_id = %user_id, issue_id = %issue.id, "failed to send notification email");
            }
        }
    }

    fn subject(&self, issue: &Issue, dataset: &Dataset) -> String {
        format!(
            "[{}] {} issue #{}: {}",
            self.settings.site_title,
            dataset.display_name(),
            issue.number,
            issue.title
        )
    }

    fn body(
        &self,
        issue: &Issue,
        dataset: &Dataset,
        user: &HostUser,
        intro: &str,
        detail: &str,
        code: &str,
    ) -> String {
        let issue_link = self
            .site_link(&format!("dataset/{}/issues/{}", dataset.name, issue.number), None);
        let settings_link = self.site_link("notification-settings", Some(code));
        format!(
            "Dear {name},\n\n{intro}\n\n{detail}\n\nView the issue: {issue_link}\n\n--\n\
             You are receiving this email from {site} because of your notification settings.\n\
             Change them here (link valid for {days} days): {settings_link}\n",
            name = user.name,
            site = self.settings.site_title,
            days = self.tokens.ttl().whole_days(),
        )
    }

    fn site_link(&self, path: &str, token: Option<&str>) -> String {
        let mut base = self.settings.site_url.clone();
        if !base.ends_with('/') {
            base.push('/');
        }
        match Url::parse(&base).and_then(|base| base.join(path)) {
            Ok(mut url) => {
                if let Some(token) = token {
                    url.query_pairs_mut().append_pair("token", token);
                }
                url.to_string()
            }
            Err(_) => match token {
                Some(token) => format!("{}{}?token={}", base, path, token),
                None => format!("{}{}", base, path),
            },
        }
    }
}
