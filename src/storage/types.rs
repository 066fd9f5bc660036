use thiserror::Error;

use crate::feed::{Cursor, MatchRule};

// ============================================================================
// Error Types
// ============================================================================

/// Database-specific errors with user-friendly messages
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Another instance of the application has locked the database
    #[error("Another instance of feedrelay appears to be running. Please close it and try again.")]
    InstanceLocked,

    /// Migration failed
    #[error("Database migration failed: {0}")]
    Migration(String),

    /// No subscription with this name in the channel
    #[error("No feed named {feed_name} in {channel}")]
    NotFound { channel: String, feed_name: String },

    /// The channel already has a subscription with this name
    #[error("A feed named {feed_name} already exists in {channel}")]
    AlreadyExists { channel: String, feed_name: String },

    /// A stored row could not be decoded
    #[error("Corrupt subscription row: {0}")]
    Corrupt(String),

    /// Generic database error
    #[error("Database error: {0}")]
    Other(#[from] sqlx::Error),
}

impl DatabaseError {
    /// Check if a sqlx error indicates database locking
    pub(crate) fn from_sqlx(err: sqlx::Error) -> Self {
        let error_string = err.to_string().to_lowercase();

        // SQLITE_BUSY (5), SQLITE_LOCKED (6), SQLITE_CANTOPEN (14)
        if error_string.contains("database is locked")
            || error_string.contains("database table is locked")
            || error_string.contains("sqlite_busy")
            || error_string.contains("sqlite_locked")
            || error_string.contains("unable to open database file")
        {
            return DatabaseError::InstanceLocked;
        }

        DatabaseError::Other(err)
    }
}

// ============================================================================
// Subscription
// ============================================================================

/// Whether entries of a feed are posted as embeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EmbedOverride {
    #[default]
    Inherit,
    ForceOn,
    ForceOff,
}

impl EmbedOverride {
    pub fn resolve(self, default: bool) -> bool {
        match self {
            EmbedOverride::Inherit => default,
            EmbedOverride::ForceOn => true,
            EmbedOverride::ForceOff => false,
        }
    }

    pub(crate) fn to_db(self) -> Option<bool> {
        match self {
            EmbedOverride::Inherit => None,
            EmbedOverride::ForceOn => Some(true),
            EmbedOverride::ForceOff => Some(false),
        }
    }

    pub(crate) fn from_db(value: Option<bool>) -> Self {
        match value {
            None => EmbedOverride::Inherit,
            Some(true) => EmbedOverride::ForceOn,
            Some(false) => EmbedOverride::ForceOff,
        }
    }
}

impl From<Option<bool>> for EmbedOverride {
    fn from(value: Option<bool>) -> Self {
        Self::from_db(value)
    }
}

/// Maximum number of roles mentioned per feed update.
pub const MAX_ROLE_MENTIONS: usize = 4;

/// One tracked feed in one channel, keyed by `(channel, feed_name)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    pub channel: String,
    pub feed_name: String,
    pub url: String,
    pub cursor: Cursor,
    pub match_rule: Option<MatchRule>,
    /// Sorted, deduplicated role ids
    pub role_mentions: Vec<u64>,
    pub embed_override: EmbedOverride,
    pub template: Option<String>,
}

impl Subscription {
    pub fn new(
        channel: impl Into<String>,
        feed_name: impl Into<String>,
        url: impl Into<String>,
    ) -> Self {
        Self {
            channel: channel.into(),
            feed_name: feed_name.into(),
            url: url.into(),
            cursor: Cursor::NeverSeen,
            match_rule: None,
            role_mentions: Vec::new(),
            embed_override: EmbedOverride::Inherit,
            template: None,
        }
    }

    pub fn with_cursor(mut self, cursor: Cursor) -> Self {
        self.cursor = cursor;
        self
    }
}

// ============================================================================
// Helper Types
// ============================================================================

/// Row type for subscription queries
pub(crate) type SubscriptionRow = (
    String,
    String,
    String,
    Option<i64>,
    Option<String>,
    Option<String>,
    String,
    Option<bool>,
    Option<String>,
);

pub(crate) fn subscription_from_row(row: SubscriptionRow) -> Result<Subscription, DatabaseError> {
    let (
        channel,
        feed_name,
        url,
        last_cursor,
        match_field,
        match_term,
        role_mentions,
        embed_override,
        template,
    ) = row;

    let cursor = Cursor::from_db(last_cursor).ok_or_else(|| {
        DatabaseError::Corrupt(format!("{channel}/{feed_name}: bad cursor {last_cursor:?}"))
    })?;

    let match_rule = match (match_field, match_term) {
        (Some(field), Some(term)) => Some(
            MatchRule::parse(&field, term)
                .map_err(|e| DatabaseError::Corrupt(format!("{channel}/{feed_name}: {e}")))?,
        ),
        _ => None,
    };

    let role_mentions: Vec<u64> = serde_json::from_str(&role_mentions).map_err(|e| {
        DatabaseError::Corrupt(format!("{channel}/{feed_name}: bad role list: {e}"))
    })?;

    Ok(Subscription {
        channel,
        feed_name,
        url,
        cursor,
        match_rule,
        role_mentions,
        embed_override: EmbedOverride::from_db(embed_override),
        template,
    })
}
