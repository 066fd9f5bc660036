//! Subscription management behind the CLI commands.
//!
//! Every operation validates its input before touching the store and reports
//! problems as an [`AdminError`] the caller can show to the user as-is.

use thiserror::Error;
use url::Url;

use crate::feed::{self, Cursor, DiscoveryError, Fetcher, MatchRule, MatchRuleError, TimeKey};
use crate::storage::{Database, DatabaseError, EmbedOverride, Subscription, MAX_ROLE_MENTIONS};

#[derive(Debug, Error)]
pub enum AdminError {
    #[error("{0} is not an http(s) URL")]
    InvalidUrl(String),
    #[error("{0} does not look like a valid feed")]
    NotAFeed(String),
    #[error("Feed names cannot be empty")]
    EmptyName,
    #[error("Templates cannot be empty")]
    EmptyTemplate,
    #[error("At most {max} roles can be mentioned, got {given}")]
    TooManyRoles { given: usize, max: usize },
    #[error(transparent)]
    MatchRule(#[from] MatchRuleError),
    #[error(transparent)]
    Discovery(#[from] DiscoveryError),
    #[error(transparent)]
    Storage(#[from] DatabaseError),
}

#[derive(Debug, Clone)]
pub struct Admin {
    db: Database,
    fetcher: Fetcher,
    backfill_on_add: bool,
}

impl Admin {
    pub fn new(db: Database, fetcher: Fetcher, backfill_on_add: bool) -> Self {
        Self {
            db,
            fetcher,
            backfill_on_add,
        }
    }

    /// Starts tracking `url` in `channel` under `name`.
    ///
    /// The URL must fetch as a valid feed. The cursor starts at the newest entry
    /// seen during that check, so only later entries get posted, unless
    /// backfill is on, in which case the first poll posts the whole backlog.
    pub async fn add_feed(
        &self,
        channel: &str,
        name: &str,
        url: &str,
    ) -> Result<Subscription, AdminError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(AdminError::EmptyName);
        }
        let url = check_http_url(url)?;

        let document = self
            .fetcher
            .fetch(&url)
            .await
            .ok_or_else(|| AdminError::NotAFeed(url.clone()))?;

        let cursor = if self.backfill_on_add {
            Cursor::NeverSeen
        } else {
            // An empty feed starts at Unknown: everything it publishes later is new
            let newest = document.entries.iter().map(TimeKey::of).max();
            Cursor::Seen(newest.unwrap_or(TimeKey::Unknown))
        };

        let sub = Subscription::new(channel, name, url).with_cursor(cursor);
        self.db.insert_subscription(&sub).await?;
        tracing::info!(channel = %channel, feed = %name, %cursor, "Feed added");
        Ok(sub)
    }

    pub async fn remove_feed(&self, channel: &str, name: &str) -> Result<(), AdminError> {
        self.db.delete_subscription(channel, name).await?;
        tracing::info!(channel = %channel, feed = %name, "Feed removed");
        Ok(())
    }

    pub async fn list_feeds(&self, channel: &str) -> Result<Vec<Subscription>, AdminError> {
        Ok(self.db.list_subscriptions(channel).await?)
    }

    pub async fn show_feed(&self, channel: &str, name: &str) -> Result<Subscription, AdminError> {
        Ok(self.db.get_subscription(channel, name).await?)
    }

    /// Only entries whose `field` contains `term` (case-insensitive) get posted.
    pub async fn set_match_req(
        &self,
        channel: &str,
        name: &str,
        field: &str,
        term: &str,
    ) -> Result<Subscription, AdminError> {
        let rule = MatchRule::parse(field, term)?;
        let sub = self
            .db
            .update_subscription(channel, name, |sub| sub.match_rule = Some(rule))
            .await?;
        Ok(sub)
    }

    pub async fn clear_match_req(
        &self,
        channel: &str,
        name: &str,
    ) -> Result<Subscription, AdminError> {
        let sub = self
            .db
            .update_subscription(channel, name, |sub| sub.match_rule = None)
            .await?;
        Ok(sub)
    }

    /// Replaces the roles mentioned with each update. An empty list clears them.
    pub async fn set_role_mentions(
        &self,
        channel: &str,
        name: &str,
        roles: &[u64],
    ) -> Result<Subscription, AdminError> {
        let mut roles = roles.to_vec();
        roles.sort_unstable();
        roles.dedup();
        if roles.len() > MAX_ROLE_MENTIONS {
            return Err(AdminError::TooManyRoles {
                given: roles.len(),
                max: MAX_ROLE_MENTIONS,
            });
        }

        let sub = self
            .db
            .update_subscription(channel, name, |sub| sub.role_mentions = roles)
            .await?;
        Ok(sub)
    }

    /// `Some(true)` / `Some(false)` force embeds on or off; `None` follows the
    /// channel setting.
    pub async fn set_embed_override(
        &self,
        channel: &str,
        name: &str,
        embed: Option<bool>,
    ) -> Result<Subscription, AdminError> {
        let embed_override = EmbedOverride::from(embed);
        let sub = self
            .db
            .update_subscription(channel, name, |sub| sub.embed_override = embed_override)
            .await?;
        Ok(sub)
    }

    pub async fn set_template(
        &self,
        channel: &str,
        name: &str,
        template: &str,
    ) -> Result<Subscription, AdminError> {
        if template.trim().is_empty() {
            return Err(AdminError::EmptyTemplate);
        }
        let template = template.to_owned();
        let sub = self
            .db
            .update_subscription(channel, name, |sub| sub.template = Some(template))
            .await?;
        Ok(sub)
    }

    /// Goes back to the default `$title\n$link` template.
    pub async fn reset_template(
        &self,
        channel: &str,
        name: &str,
    ) -> Result<Subscription, AdminError> {
        let sub = self
            .db
            .update_subscription(channel, name, |sub| sub.template = None)
            .await?;
        Ok(sub)
    }

    /// Lists feeds advertised by a web page.
    pub async fn discover(&self, page_url: &str) -> Result<Vec<String>, AdminError> {
        Ok(feed::discover(&self.fetcher, page_url).await?)
    }
}

fn check_http_url(raw: &str) -> Result<String, AdminError> {
    let raw = raw.trim();
    match Url::parse(raw) {
        Ok(url) if matches!(url.scheme(), "http" | "https") && url.has_host() => Ok(url.into()),
        _ => Err(AdminError::InvalidUrl(raw.to_owned())),
    }
}
