use anyhow::{anyhow, Result};
use async_trait::async_trait;
use aws_config::meta::region::RegionProviderChain;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_sqs::error::SdkError;
use aws_sdk_sqs::types::MessageAttributeValue;
use aws_sdk_sqs::Client;
use tracing::{debug, info};

use crate::app::mailer::{Mailer, OutboundEmail};
use crate::config::MailQueueConfig;

const KIND_ATTRIBUTE: &str = "kind";
const EMAIL_KIND: &str = "notification_email";

/// Mail relay queue. Each message is one JSON `OutboundEmail`; the relay
/// picks messages by the `kind` attribute.
#[derive(Clone)]
pub struct QueueClient {
    client: Client,
    queue_name: String,
    queue_url: String,
}

impl QueueClient {
    pub async fn new(config: &MailQueueConfig) -> Result<Self> {
        let client = sqs_client(config).await;
        let queue_url = resolve_queue_url(&client, &config.name).await?;
        info!(queue = %config.name, "mail relay queue ready");

        Ok(Self {
            client,
            queue_name: config.name.clone(),
            queue_url,
        })
    }

    pub fn queue_name(&self) -> &str {
        &self.queue_name
    }

    pub async fn enqueue_email(&self, email: &OutboundEmail) -> Result<()> {
        let kind = MessageAttributeValue::builder()
            .data_type("String")
            .string_value(EMAIL_KIND)
            .build()?;
        self.client
            .send_message()
            .queue_url(&self.queue_url)
            .message_body(message_body(email)?)
            .message_attributes(KIND_ATTRIBUTE, kind)
            .send()
            .await?;

        debug!(queue = %self.queue_name, to = %email.to, "notification email enqueued");
        Ok(())
    }
}

#[async_trait]
impl Mailer for QueueClient {
    async fn send(&self, email: &OutboundEmail) -> Result<()> {
        self.enqueue_email(email).await
    }
}

async fn sqs_client(config: &MailQueueConfig) -> Client {
    let region = RegionProviderChain::first_try(Region::new(config.region.clone()));
    let shared = aws_config::defaults(BehaviorVersion::latest())
        .region(region)
        .load()
        .await;

    let mut builder = aws_sdk_sqs::config::Builder::from(&shared)
        .region(shared.region().cloned())
        .endpoint_url(config.endpoint.clone());
    if let Some(provider) = shared.credentials_provider() {
        builder = builder.credentials_provider(provider);
    }
    Client::from_conf(builder.build())
}

/// Looks the queue up by name, creating it on first use.
async fn resolve_queue_url(client: &Client, name: &str) -> Result<String> {
    let url = match client.get_queue_url().queue_name(name).send().await {
        Ok(found) => found.queue_url().map(str::to_string),
        Err(SdkError::ServiceError(err)) if err.err().is_queue_does_not_exist() => {
            let created = client.create_queue().queue_name(name).send().await?;
            created.queue_url().map(str::to_string)
        }
        Err(err) => return Err(anyhow!(err)),
    };
    url.ok_or_else(|| anyhow!("queue {} has no url", name))
}

fn message_body(email: &OutboundEmail) -> Result<String> {
    Ok(serde_json::to_string(email)?)
}
