//! The polling loop: fetch every subscription, deliver what is new, persist
//! the cursor.
//!
//! Feeds are processed concurrently up to `max_concurrent_fetches`. A failure in
//! one feed is logged with its channel and name and never affects the others.
//! Messages are sent before the cursor is written, so a crash in between
//! re-delivers rather than loses entries. Cancellation stops a feed between
//! (or during) deliveries, after saving the progress made so far.

use futures::{future, stream, FutureExt, StreamExt};
use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::deliver::{render, Delivery, DeliveryError, DeliverySink};
use crate::feed::{select, Cursor, Entry, Fetcher, TimeKey};
use crate::storage::{Database, DatabaseError, Subscription};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(300);
pub const DEFAULT_MAX_CONCURRENT_FETCHES: usize = 4;

#[derive(Debug, Error)]
pub enum PollError {
    #[error(transparent)]
    Delivery(#[from] DeliveryError),
    #[error(transparent)]
    Storage(#[from] DatabaseError),
    #[error("Could not fetch a valid feed from {0}")]
    Unreachable(String),
}

/// Knobs for [`Poller`], filled from the config file.
#[derive(Debug, Clone)]
pub struct PollSettings {
    pub interval: Duration,
    pub max_concurrent_fetches: usize,
    pub default_embed: bool,
    /// Per-channel embed default, overriding `default_embed`
    pub channel_embed: HashMap<String, bool>,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            max_concurrent_fetches: DEFAULT_MAX_CONCURRENT_FETCHES,
            default_embed: true,
            channel_embed: HashMap::new(),
        }
    }
}

impl PollSettings {
    /// Subscription override, else the channel default, else the global one.
    pub fn embed_for(&self, sub: &Subscription) -> bool {
        let channel_default = self
            .channel_embed
            .get(&sub.channel)
            .copied()
            .unwrap_or(self.default_embed);
        sub.embed_override.resolve(channel_default)
    }
}

/// Totals of one polling cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Subscriptions processed
    pub polled: usize,
    /// Fetched fine but had nothing new
    pub unchanged: usize,
    /// Fetch failed, a delivery/storage step failed, or processing panicked
    pub failed: usize,
    /// Messages delivered across all feeds
    pub delivered: usize,
}

enum FeedOutcome {
    Unreachable,
    Unchanged,
    Delivered(usize),
    /// Cancelled part-way; the count is what went out first
    Interrupted(usize),
}

pub struct Poller<S> {
    db: Database,
    fetcher: Fetcher,
    sink: S,
    settings: PollSettings,
}

impl<S: DeliverySink> Poller<S> {
    pub fn new(db: Database, fetcher: Fetcher, sink: S, settings: PollSettings) -> Self {
        Self {
            db,
            fetcher,
            sink,
            settings,
        }
    }

    pub fn settings(&self) -> &PollSettings {
        &self.settings
    }

    /// Polls on a fixed interval until `cancel` fires. The first cycle starts
    /// immediately. Feeds in flight when `cancel` fires stop at their next
    /// delivery, so shutdown waits at most for one fetch.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.settings.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(
            interval_secs = self.settings.interval.as_secs(),
            concurrency = self.settings.max_concurrent_fetches,
            "Polling started"
        );
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let report = self.poll_once(&cancel).await;
            tracing::info!(
                polled = report.polled,
                unchanged = report.unchanged,
                failed = report.failed,
                delivered = report.delivered,
                "Poll cycle complete"
            );
        }
        tracing::info!("Polling stopped");
    }

    /// Runs one cycle over every subscription of every channel.
    ///
    /// No new feed is started once `cancel` has fired.
    pub async fn poll_once(&self, cancel: &CancellationToken) -> CycleReport {
        let subs = match self.db.list_all_subscriptions().await {
            Ok(subs) => subs,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to list subscriptions, skipping cycle");
                return CycleReport::default();
            }
        };

        let concurrency = self.settings.max_concurrent_fetches.max(1);
        let outcomes: Vec<_> = stream::iter(subs)
            .take_while(|_| future::ready(!cancel.is_cancelled()))
            .map(|sub| async move {
                let outcome = AssertUnwindSafe(self.poll_feed(&sub, cancel))
                    .catch_unwind()
                    .await;
                (sub, outcome)
            })
            .buffer_unordered(concurrency)
            .collect()
            .await;

        let mut report = CycleReport::default();
        for (sub, outcome) in outcomes {
            report.polled += 1;
            match outcome {
                Ok(Ok(FeedOutcome::Unchanged)) => report.unchanged += 1,
                Ok(Ok(FeedOutcome::Delivered(n))) => report.delivered += n,
                Ok(Ok(FeedOutcome::Interrupted(n))) => {
                    report.delivered += n;
                    tracing::debug!(
                        channel = %sub.channel,
                        feed = %sub.feed_name,
                        delivered = n,
                        "Feed interrupted by shutdown"
                    );
                }
                Ok(Ok(FeedOutcome::Unreachable)) => report.failed += 1,
                Err(panic) => {
                    report.failed += 1;
                    tracing::error!(
                        channel = %sub.channel,
                        feed = %sub.feed_name,
                        error = %panic_message(panic.as_ref()),
                        "Feed processing panicked"
                    );
                }
                Ok(Err((delivered, e))) => {
                    report.delivered += delivered;
                    report.failed += 1;
                    tracing::warn!(
                        channel = %sub.channel,
                        feed = %sub.feed_name,
                        error = %e,
                        "Feed update failed"
                    );
                }
            }
        }
        report
    }

    /// Fetches one feed, delivers its new entries in order and persists the
    /// cursor.
    ///
    /// When a delivery fails or `cancel` fires, the cursor moves only past keys
    /// whose entries were all sent. An interrupted delivery counts as unsent.
    async fn poll_feed(
        &self,
        sub: &Subscription,
        cancel: &CancellationToken,
    ) -> Result<FeedOutcome, (usize, PollError)> {
        let Some(document) = self.fetcher.fetch(&sub.url).await else {
            tracing::debug!(channel = %sub.channel, feed = %sub.feed_name, "Feed unavailable this cycle");
            return Ok(FeedOutcome::Unreachable);
        };

        let selection = select(&document, sub.cursor, sub.match_rule.as_ref(), false);
        if selection.is_empty() {
            return Ok(FeedOutcome::Unchanged);
        }

        let embed = self.settings.embed_for(sub);
        let mut committed = sub.cursor;
        let mut last_sent: Option<TimeKey> = None;
        let mut delivered = 0;

        for entry in &selection.entries {
            let key = TimeKey::of(entry);
            if let Some(last) = last_sent.filter(|last| *last < key) {
                committed = Cursor::Seen(last);
            }

            if cancel.is_cancelled() {
                self.save_partial(sub, committed).await;
                return Ok(FeedOutcome::Interrupted(delivered));
            }

            let delivery = self.delivery(sub, entry, embed);
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    self.save_partial(sub, committed).await;
                    return Ok(FeedOutcome::Interrupted(delivered));
                }
                result = self.sink.deliver(&delivery) => result,
            };
            if let Err(e) = result {
                self.save_partial(sub, committed).await;
                return Err((delivered, PollError::from(e)));
            }
            last_sent = Some(key);
            delivered += 1;
        }

        self.db
            .advance_cursor(&sub.channel, &sub.feed_name, selection.cursor)
            .await
            .map_err(|e| (delivered, PollError::from(e)))?;
        tracing::debug!(
            channel = %sub.channel,
            feed = %sub.feed_name,
            delivered,
            cursor = %selection.cursor,
            "Feed updated"
        );
        Ok(FeedOutcome::Delivered(delivered))
    }

    async fn save_partial(&self, sub: &Subscription, committed: Cursor) {
        if let Err(e) = self
            .db
            .advance_cursor(&sub.channel, &sub.feed_name, committed)
            .await
        {
            tracing::warn!(
                channel = %sub.channel,
                feed = %sub.feed_name,
                error = %e,
                "Failed to save partial progress"
            );
        }
    }

    /// Re-posts the first entry of a feed that passes its match rule.
    ///
    /// The cursor is left untouched. Returns whether anything was posted.
    pub async fn force(&self, channel: &str, feed_name: &str) -> Result<bool, PollError> {
        let sub = self.db.get_subscription(channel, feed_name).await?;
        let document = self
            .fetcher
            .fetch(&sub.url)
            .await
            .ok_or_else(|| PollError::Unreachable(sub.url.clone()))?;

        let selection = select(&document, sub.cursor, sub.match_rule.as_ref(), true);
        let Some(entry) = selection.entries.first() else {
            return Ok(false);
        };

        let embed = self.settings.embed_for(&sub);
        self.sink.deliver(&self.delivery(&sub, entry, embed)).await?;
        tracing::info!(channel = %channel, feed = %feed_name, "Forced update posted");
        Ok(true)
    }

    fn delivery(&self, sub: &Subscription, entry: &Entry, embed: bool) -> Delivery {
        Delivery {
            channel: sub.channel.clone(),
            feed_name: sub.feed_name.clone(),
            message: render(entry, sub.template.as_deref(), embed, &sub.role_mentions),
        }
    }
}

impl<S: DeliverySink + 'static> Poller<S> {
    /// Moves the poller onto its own task.
    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(cancel).await })
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

/// Waits for a spawned poller. Cancellation is silent; a panic is logged.
pub async fn supervise(handle: JoinHandle<()>) {
    match handle.await {
        Ok(()) => {}
        Err(e) if e.is_cancelled() => {}
        Err(e) => {
            tracing::error!(task = "poller", error = %e, "Background task panicked");
        }
    }
}
