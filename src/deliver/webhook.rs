use secrecy::{ExposeSecret, SecretString};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use super::{Delivery, DeliveryError, DeliverySink};

const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);

/// Posts messages to per-channel chat webhooks.
///
/// Webhook URLs embed a token, so they are held as secrets and never logged.
#[derive(Clone)]
pub struct WebhookSink {
    client: reqwest::Client,
    webhooks: Arc<HashMap<String, SecretString>>,
}

impl std::fmt::Debug for WebhookSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut channels: Vec<_> = self.webhooks.keys().collect();
        channels.sort();
        f.debug_struct("WebhookSink")
            .field("channels", &channels)
            .finish()
    }
}

impl WebhookSink {
    pub fn new(
        client: reqwest::Client,
        webhooks: impl IntoIterator<Item = (String, SecretString)>,
    ) -> Self {
        Self {
            client,
            webhooks: Arc::new(webhooks.into_iter().collect()),
        }
    }

    fn payload(delivery: &Delivery) -> serde_json::Value {
        let message = &delivery.message;
        let embeds: Vec<_> = message.embed.iter().collect();
        // Only the subscription's roles may ping; @everyone and user pings never do
        json!({
            "content": message.content,
            "embeds": embeds,
            "allowed_mentions": {
                "parse": [],
                "roles": message.role_mentions.iter().map(u64::to_string).collect::<Vec<_>>(),
            },
        })
    }
}

impl DeliverySink for WebhookSink {
    async fn deliver(&self, delivery: &Delivery) -> Result<(), DeliveryError> {
        let url = self
            .webhooks
            .get(&delivery.channel)
            .ok_or_else(|| DeliveryError::UnknownChannel(delivery.channel.clone()))?;

        let request = self
            .client
            .post(url.expose_secret())
            .json(&Self::payload(delivery))
            .send();
        let response = tokio::time::timeout(WEBHOOK_TIMEOUT, request)
            .await
            .map_err(|_| DeliveryError::Timeout)??;

        let status = response.status();
        if !status.is_success() {
            return Err(DeliveryError::HttpStatus(status.as_u16()));
        }
        tracing::debug!(channel = %delivery.channel, feed = %delivery.feed_name, "Delivered message");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deliver::{Embed, RenderedMessage};
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn delivery(channel: &str, embed: Option<Embed>) -> Delivery {
        Delivery {
            channel: channel.into(),
            feed_name: "blog".into(),
            message: RenderedMessage {
                content: "<@&42>\nNew post".into(),
                embed,
                role_mentions: vec![42],
            },
        }
    }

    fn sink(server: &MockServer) -> WebhookSink {
        WebhookSink::new(
            reqwest::Client::new(),
            [(
                "general".to_string(),
                SecretString::from(format!("{}/hooks/general", server.uri())),
            )],
        )
    }

    #[tokio::test]
    async fn test_posts_payload_with_allowed_mentions() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hooks/general"))
            .and(body_partial_json(json!({
                "content": "<@&42>\nNew post",
                "embeds": [],
                "allowed_mentions": {"parse": [], "roles": ["42"]},
            })))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        sink(&server).deliver(&delivery("general", None)).await.unwrap();
    }

    #[tokio::test]
    async fn test_embed_serialized() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({
                "embeds": [{"title": "New post", "description": "body"}],
            })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let embed = Embed {
            title: Some("New post".into()),
            url: None,
            description: "body".into(),
            timestamp: None,
        };
        sink(&server)
            .deliver(&delivery("general", Some(embed)))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_error_status_reported() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;

        let err = sink(&server)
            .deliver(&delivery("general", None))
            .await
            .unwrap_err();
        assert!(matches!(err, DeliveryError::HttpStatus(429)));
    }

    #[tokio::test]
    async fn test_unknown_channel() {
        let server = MockServer::start().await;
        let err = sink(&server)
            .deliver(&delivery("random", None))
            .await
            .unwrap_err();
        assert!(matches!(err, DeliveryError::UnknownChannel(ref c) if c == "random"));
    }

    #[test]
    fn test_debug_hides_urls() {
        let sink = WebhookSink::new(
            reqwest::Client::new(),
            [(
                "general".to_string(),
                SecretString::from("https://chat.example/api/webhooks/1/secret-token".to_string()),
            )],
        );
        let debug = format!("{sink:?}");
        assert!(debug.contains("general"));
        assert!(!debug.contains("secret-token"));
    }
}
