//! Fetch notifications for observers outside the polling core.
//!
//! Every feed fetch whose body was read publishes a [`FetchObserved`] event on a
//! broadcast channel. Observers get the raw bytes and can rebuild the document
//! with [`FetchObserved::reparse`], so nothing they do can touch the document the
//! poller is working with, and nobody pays for a copy when nobody listens.
//!
//! The payload is versioned: check `listener_version` and ignore versions you do
//! not understand. New fields may be added without bumping it, which is why the
//! struct is `#[non_exhaustive]`.

use std::sync::Arc;
use tokio::sync::broadcast;

use crate::feed::{parse_document, FeedDocument};

/// Current payload version of [`FetchObserved`].
pub const LISTENER_VERSION: u32 = 1;

const DEFAULT_CAPACITY: usize = 64;

#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct FetchObserved {
    pub listener_version: u32,
    pub url: String,
    pub raw: Arc<[u8]>,
    pub bozo: bool,
}

impl FetchObserved {
    pub(crate) fn new(url: &str, raw: Arc<[u8]>, bozo: bool) -> Self {
        Self {
            listener_version: LISTENER_VERSION,
            url: url.to_owned(),
            raw,
            bozo,
        }
    }

    /// Parses the raw body again into a fresh document owned by the caller.
    pub fn reparse(&self) -> FeedDocument {
        parse_document(&self.raw)
    }
}

/// Publisher side of the fetch notification channel. Cheap to clone.
#[derive(Debug, Clone)]
pub struct FetchEvents {
    tx: broadcast::Sender<FetchObserved>,
}

impl Default for FetchEvents {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl FetchEvents {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Registers a new observer. Slow observers lag and lose old events rather
    /// than holding up fetches.
    pub fn subscribe(&self) -> broadcast::Receiver<FetchObserved> {
        self.tx.subscribe()
    }

    pub fn publish(&self, event: FetchObserved) {
        // No receivers is the normal case
        if let Ok(receivers) = self.tx.send(event) {
            tracing::trace!(receivers, "Published fetch event");
        }
    }
}
