use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use super::parser::{parse_document, FeedDocument};
use crate::events::{FetchEvents, FetchObserved};

pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(15);
const MAX_FEED_SIZE: usize = 10 * 1024 * 1024; // 10MB

/// Reasons a raw fetch produced no body. Only ever logged; callers see `None`.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Network-level error (DNS, connection, TLS, etc.)
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// Request exceeded the configured timeout
    #[error("Request timed out")]
    Timeout,
    /// Response body exceeded the 10MB size limit
    #[error("Response too large")]
    ResponseTooLarge,
}

/// Raw HTTP response: status code and the full body.
pub(crate) struct RawResponse {
    pub status: reqwest::StatusCode,
    pub body: Vec<u8>,
}

/// Fetches and parses feeds over a shared HTTP client.
///
/// Cloning is cheap; clones share the client and the event channel.
#[derive(Debug, Clone)]
pub struct Fetcher {
    client: reqwest::Client,
    timeout: Duration,
    events: FetchEvents,
}

impl Fetcher {
    pub fn new(client: reqwest::Client, timeout: Duration, events: FetchEvents) -> Self {
        Self {
            client,
            timeout,
            events,
        }
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    pub fn events(&self) -> &FetchEvents {
        &self.events
    }

    /// Fetches `url` and parses it as a feed.
    ///
    /// Returns `None` for network failures, timeouts, oversized bodies, non-2xx
    /// statuses and bozo documents. Every body that was read is published as a
    /// [`FetchObserved`] event before the verdict, whatever it is.
    pub async fn fetch(&self, url: &str) -> Option<FeedDocument> {
        let response = match self.fetch_raw(url).await {
            Ok(response) => response,
            Err(e) => {
                tracing::debug!(feed = %url, error = %e, "Feed fetch failed");
                return None;
            }
        };

        let raw: Arc<[u8]> = Arc::from(response.body);
        let document = parse_document(&raw);
        self.events
            .publish(FetchObserved::new(url, Arc::clone(&raw), document.bozo));

        if !response.status.is_success() {
            tracing::debug!(feed = %url, status = %response.status, "Feed returned non-success status");
            return None;
        }
        if document.bozo {
            tracing::debug!(feed = %url, "Feed url is invalid");
            return None;
        }
        Some(document)
    }

    /// GET with timeout and size cap, regardless of status.
    pub(crate) async fn fetch_raw(&self, url: &str) -> Result<RawResponse, FetchError> {
        let timeout = self.timeout;
        tokio::time::timeout(timeout, async {
            let response = self.client.get(url).send().await?;
            let status = response.status();
            let body = read_limited_bytes(response, MAX_FEED_SIZE).await?;
            Ok::<_, FetchError>(RawResponse { status, body })
        })
        .await
        .map_err(|_| FetchError::Timeout)?
    }
}

async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, FetchError> {
    // Fast path: check Content-Length header
    if let Some(len) = response.content_length() {
        if len as usize > limit {
            return Err(FetchError::ResponseTooLarge);
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(FetchError::Network)?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(FetchError::ResponseTooLarge);
        }
        bytes.extend_from_slice(&chunk);
    }

    Ok(bytes)
}
