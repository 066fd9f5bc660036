use crate::feed::Cursor;

use super::schema::Database;
use super::types::{subscription_from_row, DatabaseError, Subscription, SubscriptionRow};

const SELECT_COLUMNS: &str = "SELECT channel_id, feed_name, url, last_cursor, match_field, \
     match_term, role_mentions, embed_override, template FROM subscriptions";

impl Database {
    // ========================================================================
    // Subscription Operations
    // ========================================================================

    /// Insert a new subscription.
    ///
    /// # Errors
    ///
    /// `DatabaseError::AlreadyExists` if the channel already tracks a feed under
    /// the same name.
    pub async fn insert_subscription(&self, sub: &Subscription) -> Result<(), DatabaseError> {
        let mut roles = sub.role_mentions.clone();
        roles.sort_unstable();
        roles.dedup();
        let roles = encode_roles(&roles)?;
        let result = sqlx::query(
            r#"
            INSERT INTO subscriptions
                (channel_id, feed_name, url, last_cursor, match_field, match_term,
                 role_mentions, embed_override, template)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(channel_id, feed_name) DO NOTHING
        "#,
        )
        .bind(&sub.channel)
        .bind(&sub.feed_name)
        .bind(&sub.url)
        .bind(sub.cursor.to_db())
        .bind(sub.match_rule.as_ref().map(|r| r.field().as_str()))
        .bind(sub.match_rule.as_ref().map(|r| r.term()))
        .bind(roles)
        .bind(sub.embed_override.to_db())
        .bind(&sub.template)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::AlreadyExists {
                channel: sub.channel.clone(),
                feed_name: sub.feed_name.clone(),
            });
        }
        Ok(())
    }

    /// Delete a subscription. Returns `DatabaseError::NotFound` if absent.
    pub async fn delete_subscription(
        &self,
        channel: &str,
        feed_name: &str,
    ) -> Result<(), DatabaseError> {
        let result = sqlx::query("DELETE FROM subscriptions WHERE channel_id = ? AND feed_name = ?")
            .bind(channel)
            .bind(feed_name)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(not_found(channel, feed_name));
        }
        Ok(())
    }

    pub async fn get_subscription(
        &self,
        channel: &str,
        feed_name: &str,
    ) -> Result<Subscription, DatabaseError> {
        let row: Option<SubscriptionRow> =
            sqlx::query_as(&format!("{SELECT_COLUMNS} WHERE channel_id = ? AND feed_name = ?"))
                .bind(channel)
                .bind(feed_name)
                .fetch_optional(&self.pool)
                .await?;

        row.map(subscription_from_row)
            .unwrap_or_else(|| Err(not_found(channel, feed_name)))
    }

    /// List subscriptions of one channel, ordered by name.
    pub async fn list_subscriptions(&self, channel: &str) -> Result<Vec<Subscription>, DatabaseError> {
        let rows: Vec<SubscriptionRow> =
            sqlx::query_as(&format!("{SELECT_COLUMNS} WHERE channel_id = ? ORDER BY feed_name"))
                .bind(channel)
                .fetch_all(&self.pool)
                .await?;

        rows.into_iter().map(subscription_from_row).collect()
    }

    /// List every subscription across all channels.
    ///
    /// Rows that fail to decode are logged and skipped so one bad row cannot
    /// stall polling of the others.
    pub async fn list_all_subscriptions(&self) -> Result<Vec<Subscription>, DatabaseError> {
        let rows: Vec<SubscriptionRow> =
            sqlx::query_as(&format!("{SELECT_COLUMNS} ORDER BY channel_id, feed_name"))
                .fetch_all(&self.pool)
                .await?;

        Ok(rows
            .into_iter()
            .filter_map(|row| match subscription_from_row(row) {
                Ok(sub) => Some(sub),
                Err(e) => {
                    tracing::warn!(error = %e, "Skipping undecodable subscription");
                    None
                }
            })
            .collect())
    }

    /// Move a subscription's cursor forward.
    ///
    /// A single conditional `UPDATE`: the stored cursor only changes when `cursor`
    /// is strictly ahead of it, so concurrent or stale writers can never move it
    /// backward. Returns whether the row changed. A subscription removed
    /// mid-poll is not an error.
    pub async fn advance_cursor(
        &self,
        channel: &str,
        feed_name: &str,
        cursor: Cursor,
    ) -> Result<bool, DatabaseError> {
        let Some(value) = cursor.to_db() else {
            return Ok(false);
        };

        let result = sqlx::query(
            r#"
            UPDATE subscriptions SET last_cursor = ?
            WHERE channel_id = ? AND feed_name = ?
              AND (last_cursor IS NULL OR last_cursor < ?)
        "#,
        )
        .bind(value)
        .bind(channel)
        .bind(feed_name)
        .bind(value)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Read-modify-write of one subscription's settings inside a transaction.
    ///
    /// `apply` sees the current row and may change url, match rule, role
    /// mentions, embed override and template. Key columns and the cursor are
    /// never written here; the cursor belongs to [`Database::advance_cursor`].
    pub async fn update_subscription<F>(
        &self,
        channel: &str,
        feed_name: &str,
        apply: F,
    ) -> Result<Subscription, DatabaseError>
    where
        F: FnOnce(&mut Subscription) + Send,
    {
        let mut tx = self.pool.begin().await?;

        let row: Option<SubscriptionRow> =
            sqlx::query_as(&format!("{SELECT_COLUMNS} WHERE channel_id = ? AND feed_name = ?"))
                .bind(channel)
                .bind(feed_name)
                .fetch_optional(&mut *tx)
                .await?;
        let mut sub = match row {
            Some(row) => subscription_from_row(row)?,
            None => return Err(not_found(channel, feed_name)),
        };

        let cursor = sub.cursor;
        apply(&mut sub);
        sub.cursor = cursor;
        sub.role_mentions.sort_unstable();
        sub.role_mentions.dedup();

        sqlx::query(
            r#"
            UPDATE subscriptions SET
                url = ?, match_field = ?, match_term = ?,
                role_mentions = ?, embed_override = ?, template = ?
            WHERE channel_id = ? AND feed_name = ?
        "#,
        )
        .bind(&sub.url)
        .bind(sub.match_rule.as_ref().map(|r| r.field().as_str()))
        .bind(sub.match_rule.as_ref().map(|r| r.term()))
        .bind(encode_roles(&sub.role_mentions)?)
        .bind(sub.embed_override.to_db())
        .bind(&sub.template)
        .bind(channel)
        .bind(feed_name)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        // Keys are never rewritten
        sub.channel = channel.to_owned();
        sub.feed_name = feed_name.to_owned();
        Ok(sub)
    }
}

fn encode_roles(roles: &[u64]) -> Result<String, DatabaseError> {
    serde_json::to_string(roles).map_err(|e| DatabaseError::Corrupt(e.to_string()))
}

fn not_found(channel: &str, feed_name: &str) -> DatabaseError {
    DatabaseError::NotFound {
        channel: channel.to_owned(),
        feed_name: feed_name.to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::{EntryField, MatchRule, TimeKey};
    use crate::storage::EmbedOverride;
    use pretty_assertions::assert_eq;

    async fn test_db() -> Database {
        Database::open(":memory:").await.unwrap()
    }

    fn sub(channel: &str, name: &str) -> Subscription {
        Subscription::new(channel, name, format!("https://example.com/{name}.xml"))
    }

    #[tokio::test]
    async fn test_insert_and_get() {
        let db = test_db().await;
        let mut new = sub("general", "news");
        new.role_mentions = vec![3, 7];
        new.match_rule = Some(MatchRule::new(EntryField::Title, "rust").unwrap());
        db.insert_subscription(&new).await.unwrap();

        let stored = db.get_subscription("general", "news").await.unwrap();
        assert_eq!(stored, new);
    }

    #[tokio::test]
    async fn test_duplicate_name_in_channel_rejected() {
        let db = test_db().await;
        db.insert_subscription(&sub("general", "news")).await.unwrap();
        let err = db.insert_subscription(&sub("general", "news")).await.unwrap_err();
        assert!(matches!(err, DatabaseError::AlreadyExists { .. }));

        // Same name in another channel is fine
        db.insert_subscription(&sub("random", "news")).await.unwrap();
    }

    #[tokio::test]
    async fn test_delete_and_missing() {
        let db = test_db().await;
        db.insert_subscription(&sub("general", "news")).await.unwrap();
        db.delete_subscription("general", "news").await.unwrap();

        assert!(matches!(
            db.get_subscription("general", "news").await,
            Err(DatabaseError::NotFound { .. })
        ));
        assert!(matches!(
            db.delete_subscription("general", "news").await,
            Err(DatabaseError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_list_by_channel_and_all() {
        let db = test_db().await;
        db.insert_subscription(&sub("b", "two")).await.unwrap();
        db.insert_subscription(&sub("a", "zeta")).await.unwrap();
        db.insert_subscription(&sub("a", "alpha")).await.unwrap();

        let names: Vec<_> = db
            .list_subscriptions("a")
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.feed_name)
            .collect();
        assert_eq!(names, vec!["alpha", "zeta"]);

        let all = db.list_all_subscriptions().await.unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[2].channel, "b");
    }

    #[tokio::test]
    async fn test_advance_cursor_is_monotonic() {
        let db = test_db().await;
        db.insert_subscription(&sub("general", "news")).await.unwrap();

        let later = Cursor::Seen(TimeKey::at(2024, 1, 1, 0, 10));
        let earlier = Cursor::Seen(TimeKey::at(2024, 1, 1, 0, 5));

        assert!(db.advance_cursor("general", "news", later).await.unwrap());
        assert!(!db.advance_cursor("general", "news", earlier).await.unwrap());
        assert!(!db.advance_cursor("general", "news", later).await.unwrap());
        assert!(!db
            .advance_cursor("general", "news", Cursor::NeverSeen)
            .await
            .unwrap());

        let stored = db.get_subscription("general", "news").await.unwrap();
        assert_eq!(stored.cursor, later);
    }

    #[tokio::test]
    async fn test_advance_cursor_from_never_to_undated() {
        let db = test_db().await;
        db.insert_subscription(&sub("general", "news")).await.unwrap();

        let undated = Cursor::Seen(TimeKey::Unknown);
        assert!(db.advance_cursor("general", "news", undated).await.unwrap());
        let stored = db.get_subscription("general", "news").await.unwrap();
        assert_eq!(stored.cursor, undated);
    }

    #[tokio::test]
    async fn test_advance_cursor_of_removed_subscription() {
        let db = test_db().await;
        let moved = db
            .advance_cursor("general", "gone", Cursor::Seen(TimeKey::Unknown))
            .await
            .unwrap();
        assert!(!moved);
    }

    #[tokio::test]
    async fn test_update_subscription_keeps_cursor() {
        let db = test_db().await;
        let cursor = Cursor::Seen(TimeKey::at(2024, 5, 5, 5, 5));
        db.insert_subscription(&sub("general", "news").with_cursor(cursor))
            .await
            .unwrap();

        let updated = db
            .update_subscription("general", "news", |s| {
                s.role_mentions = vec![9, 1, 9];
                s.embed_override = EmbedOverride::ForceOn;
                s.template = Some("$title".into());
                s.cursor = Cursor::NeverSeen;
            })
            .await
            .unwrap();
        assert_eq!(updated.role_mentions, vec![1, 9]);

        let stored = db.get_subscription("general", "news").await.unwrap();
        assert_eq!(stored.role_mentions, vec![1, 9]);
        assert_eq!(stored.embed_override, EmbedOverride::ForceOn);
        assert_eq!(stored.template.as_deref(), Some("$title"));
        assert_eq!(stored.cursor, cursor);
    }

    #[tokio::test]
    async fn test_update_missing_subscription() {
        let db = test_db().await;
        let result = db.update_subscription("general", "nope", |_| {}).await;
        assert!(matches!(result, Err(DatabaseError::NotFound { .. })));
    }
}
