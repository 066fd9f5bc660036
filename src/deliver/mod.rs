//! Turning selected entries into chat messages and sending them.
//!
//! [`render`] formats an entry; a [`DeliverySink`] sends the result. The
//! poller is written against the trait and gets a [`Sink`] at startup: the
//! webhook sink in normal runs, the stdout sink under `--dry-run`.

mod render;
mod webhook;

use serde_json::json;
use std::future::Future;
use std::io::Write;
use thiserror::Error;

pub use render::{render, substitute, Embed, RenderedMessage, DEFAULT_TEMPLATE};
pub use webhook::WebhookSink;

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("Delivery request failed: {0}")]
    Network(#[from] reqwest::Error),
    #[error("Delivery rejected: status {0}")]
    HttpStatus(u16),
    #[error("Delivery timed out")]
    Timeout,
    #[error("No webhook configured for channel '{0}'")]
    UnknownChannel(String),
    #[error("Failed to write message: {0}")]
    Io(#[from] std::io::Error),
}

/// One message bound for one channel.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub channel: String,
    pub feed_name: String,
    pub message: RenderedMessage,
}

/// Destination for rendered messages.
pub trait DeliverySink: Send + Sync {
    fn deliver(
        &self,
        delivery: &Delivery,
    ) -> impl Future<Output = Result<(), DeliveryError>> + Send;
}

/// Prints each delivery as a JSON line on stdout.
#[derive(Debug, Clone, Copy, Default)]
pub struct StdoutSink;

impl StdoutSink {
    fn line(delivery: &Delivery) -> serde_json::Value {
        json!({
            "channel": delivery.channel,
            "feed": delivery.feed_name,
            "content": delivery.message.content,
            "embed": delivery.message.embed,
        })
    }
}

impl DeliverySink for StdoutSink {
    async fn deliver(&self, delivery: &Delivery) -> Result<(), DeliveryError> {
        let line = Self::line(delivery);
        let mut out = std::io::stdout().lock();
        writeln!(out, "{line}")?;
        Ok(())
    }
}

/// Sink chosen at startup (enum dispatch).
#[derive(Debug, Clone)]
pub enum Sink {
    Webhook(WebhookSink),
    Stdout(StdoutSink),
}

impl DeliverySink for Sink {
    async fn deliver(&self, delivery: &Delivery) -> Result<(), DeliveryError> {
        match self {
            Self::Webhook(sink) => sink.deliver(delivery).await,
            Self::Stdout(sink) => sink.deliver(delivery).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_stdout_line_shape() {
        let delivery = Delivery {
            channel: "general".into(),
            feed_name: "blog".into(),
            message: RenderedMessage {
                content: "hello".into(),
                embed: None,
                role_mentions: vec![],
            },
        };
        assert_eq!(
            StdoutSink::line(&delivery),
            json!({"channel": "general", "feed": "blog", "content": "hello", "embed": null})
        );
    }

    #[tokio::test]
    async fn test_stdout_sink_delivers() {
        let delivery = Delivery {
            channel: "general".into(),
            feed_name: "blog".into(),
            message: RenderedMessage {
                content: "hello".into(),
                embed: None,
                role_mentions: vec![],
            },
        };
        Sink::Stdout(StdoutSink).deliver(&delivery).await.unwrap();
    }
}
