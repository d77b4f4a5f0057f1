use async_trait::async_trait;
use pricewatch::{
    Channel, Notification, Notifier,
    config::WebhookConfig,
    notify::Field,
};
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, error};

/// Display name attached to every webhook message.
pub const USERNAME: &str = "Trading Alert Bot";

const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);

/// Discord webhook request body.
#[derive(Debug, Serialize)]
pub struct WebhookPayload<'a> {
    pub username: &'a str,
    pub embeds: Vec<Embed<'a>>,
}

#[derive(Debug, Serialize)]
pub struct Embed<'a> {
    pub title: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<&'a str>,
    pub color: u32,
    pub fields: &'a [Field],
    pub timestamp: String,
    pub footer: Footer,
}

#[derive(Debug, Serialize)]
pub struct Footer {
    pub text: String,
}

impl<'a> From<&'a Notification> for WebhookPayload<'a> {
    fn from(notification: &'a Notification) -> Self {
        Self {
            username: USERNAME,
            embeds: vec![Embed {
                title: &notification.title,
                description: notification.description.as_deref(),
                color: notification.colour,
                fields: &notification.fields,
                timestamp: notification.time.to_rfc3339(),
                footer: Footer {
                    text: format!("Channel: {}", notification.channel),
                },
            }],
        }
    }
}

/// [`Notifier`] posting Discord style embeds to the webhook configured for each [`Channel`].
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    client: reqwest::Client,
    webhooks: WebhookConfig,
}

impl WebhookNotifier {
    pub fn new(client: reqwest::Client, webhooks: WebhookConfig) -> Self {
        Self { client, webhooks }
    }

    async fn post(&self, url: &str, payload: &WebhookPayload<'_>) -> Result<(), reqwest::Error> {
        self.client
            .post(url)
            .json(payload)
            .timeout(WEBHOOK_TIMEOUT)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn send(&self, notification: Notification) -> bool {
        let channel: Channel = notification.channel;
        let Some(url) = self.webhooks.url(channel) else {
            error!(%channel, "no webhook configured for channel");
            return false;
        };

        match self.post(url, &WebhookPayload::from(&notification)).await {
            Ok(()) => {
                debug!(%channel, title = %notification.title, "webhook delivered");
                true
            }
            Err(error) => {
                error!(%channel, %error, "failed to deliver webhook");
                false
            }
        }
    }
}
