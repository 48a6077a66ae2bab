use super::{ConversationStore, CounterUpdate, ToggleUpdate, TransitionUpdate};
use crate::domain::{Conversation, ConversationSummary, NewConversation, OrderBy, RequestKey, SaveToggle};
use crate::error::LedgerResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

/// PostgreSQL-backed conversation store
#[derive(Clone)]
pub struct PgConversationStore {
    pool: PgPool,
}

impl PgConversationStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Distinguish "tombstoned" from "never existed" after a guarded update matched no row
    async fn classify_unmatched(&self, id: Uuid) -> LedgerResult<Option<bool>> {
        let deleted: Option<bool> =
            sqlx::query_scalar("SELECT deleted_at IS NOT NULL FROM conversations WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(deleted)
    }

    async fn apply_toggle(
        tx: &mut Transaction<'_, Postgres>,
        id: Uuid,
        actor_key: &str,
    ) -> LedgerResult<SaveToggle> {
        let removed = sqlx::query(
            r#"
            DELETE FROM conversation_saves
            WHERE conversation_id = $1 AND actor_key = $2
            "#,
        )
        .bind(id)
        .bind(actor_key)
        .execute(&mut **tx)
        .await?
        .rows_affected()
            > 0;

        if removed {
            let save_count: i64 = sqlx::query_scalar(
                r#"
                UPDATE conversations
                SET save_count = GREATEST(save_count - 1, 0)
                WHERE id = $1
                RETURNING save_count
                "#,
            )
            .bind(id)
            .fetch_one(&mut **tx)
            .await?;

            return Ok(SaveToggle {
                saved: false,
                save_count,
            });
        }

        let inserted = sqlx::query(
            r#"
            INSERT INTO conversation_saves (conversation_id, actor_key)
            VALUES ($1, $2)
            ON CONFLICT (conversation_id, actor_key) DO NOTHING
            "#,
        )
        .bind(id)
        .bind(actor_key)
        .execute(&mut **tx)
        .await?
        .rows_affected()
            > 0;

        let delta: i64 = if inserted { 1 } else { 0 };
        let save_count: i64 = sqlx::query_scalar(
            r#"
            UPDATE conversations
            SET save_count = save_count + $2
            WHERE id = $1
            RETURNING save_count
            "#,
        )
        .bind(id)
        .bind(delta)
        .fetch_one(&mut **tx)
        .await?;

        Ok(SaveToggle {
            saved: true,
            save_count,
        })
    }
}

#[async_trait]
impl ConversationStore for PgConversationStore {
    async fn insert(&self, new: NewConversation) -> LedgerResult<Conversation> {
        let conversation = sqlx::query_as::<_, Conversation>(
            r#"
            INSERT INTO conversations (id, content, owner_session, created_at)
            VALUES ($1, $2, $3, $4)
            RETURNING id, content, owner_session, view_count, save_count, created_at, deleted_at
            "#,
        )
        .bind(new.id)
        .bind(&new.content)
        .bind(&new.owner_session)
        .bind(new.created_at)
        .fetch_one(&self.pool)
        .await?;

        Ok(conversation)
    }

    async fn find(&self, id: Uuid) -> LedgerResult<Option<Conversation>> {
        let conversation = sqlx::query_as::<_, Conversation>(
            r#"
            SELECT id, content, owner_session, view_count, save_count, created_at, deleted_at
            FROM conversations
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(conversation)
    }

    async fn increment_views(&self, id: Uuid) -> LedgerResult<CounterUpdate> {
        let updated: Option<i64> = sqlx::query_scalar(
            r#"
            UPDATE conversations
            SET view_count = view_count + 1
            WHERE id = $1 AND deleted_at IS NULL
            RETURNING view_count
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(count) = updated {
            return Ok(CounterUpdate::Applied(count));
        }

        Ok(match self.classify_unmatched(id).await? {
            Some(_) => CounterUpdate::Deleted,
            None => CounterUpdate::Missing,
        })
    }

    async fn toggle_save(
        &self,
        id: Uuid,
        actor_key: &str,
        request_key: Option<&RequestKey>,
    ) -> LedgerResult<ToggleUpdate> {
        let mut tx = self.pool.begin().await?;

        // Row lock serializes toggles on the same conversation.
        let state: Option<Option<DateTime<Utc>>> = sqlx::query_scalar(
            "SELECT deleted_at FROM conversations WHERE id = $1 FOR UPDATE",
        )
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?;

        match state {
            None => {
                tx.rollback().await?;
                return Ok(ToggleUpdate::Missing);
            }
            Some(Some(_)) => {
                tx.rollback().await?;
                return Ok(ToggleUpdate::Deleted);
            }
            Some(None) => {}
        }

        if let Some(key) = request_key {
            let receipt = sqlx::query_as::<_, (Uuid, bool, i64)>(
                r#"
                SELECT conversation_id, saved, save_count
                FROM save_request_receipts
                WHERE actor_key = $1 AND request_key = $2
                "#,
            )
            .bind(actor_key)
            .bind(key.as_str())
            .fetch_optional(&mut *tx)
            .await?;

            if let Some((receipt_conversation, saved, save_count)) = receipt {
                tx.rollback().await?;
                if receipt_conversation == id {
                    return Ok(ToggleUpdate::Replayed(SaveToggle { saved, save_count }));
                }
                return Ok(ToggleUpdate::KeyConflict);
            }
        }

        let outcome = Self::apply_toggle(&mut tx, id, actor_key).await?;

        if let Some(key) = request_key {
            let recorded = sqlx::query(
                r#"
                INSERT INTO save_request_receipts
                    (actor_key, request_key, conversation_id, saved, save_count)
                VALUES ($1, $2, $3, $4, $5)
                ON CONFLICT (actor_key, request_key) DO NOTHING
                "#,
            )
            .bind(actor_key)
            .bind(key.as_str())
            .bind(id)
            .bind(outcome.saved)
            .bind(outcome.save_count)
            .execute(&mut *tx)
            .await?
            .rows_affected()
                > 0;

            // The actor raced the same key in on another conversation; keep the first.
            if !recorded {
                tx.rollback().await?;
                return Ok(ToggleUpdate::KeyConflict);
            }
        }

        tx.commit().await?;
        Ok(ToggleUpdate::Applied(outcome))
    }

    async fn is_saved(&self, id: Uuid, actor_key: &str) -> LedgerResult<bool> {
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM conversation_saves
                WHERE conversation_id = $1 AND actor_key = $2
            )
            "#,
        )
        .bind(id)
        .bind(actor_key)
        .fetch_one(&self.pool)
        .await?;

        Ok(exists)
    }

    async fn mark_deleted(&self, id: Uuid) -> LedgerResult<TransitionUpdate> {
        let result = sqlx::query(
            r#"
            UPDATE conversations
            SET deleted_at = NOW()
            WHERE id = $1 AND deleted_at IS NULL
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            return Ok(TransitionUpdate::Applied);
        }

        Ok(match self.classify_unmatched(id).await? {
            Some(_) => TransitionUpdate::AlreadyDeleted,
            None => TransitionUpdate::Missing,
        })
    }

    async fn list_top(&self, limit: i64, order: OrderBy) -> LedgerResult<Vec<ConversationSummary>> {
        let sql = match order {
            OrderBy::Views => {
                r#"
                SELECT id, view_count, save_count, created_at
                FROM conversations
                WHERE deleted_at IS NULL
                ORDER BY view_count DESC, id ASC
                LIMIT $1
                "#
            }
            OrderBy::CreatedAt => {
                r#"
                SELECT id, view_count, save_count, created_at
                FROM conversations
                WHERE deleted_at IS NULL
                ORDER BY created_at DESC, id ASC
                LIMIT $1
                "#
            }
        };

        let rows = sqlx::query_as::<_, ConversationSummary>(sql)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows)
    }

    async fn count_active(&self) -> LedgerResult<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM conversations WHERE deleted_at IS NULL")
                .fetch_one(&self.pool)
                .await?;

        Ok(count)
    }

    async fn list_saved(&self, actor_key: &str, limit: i64) -> LedgerResult<Vec<ConversationSummary>> {
        let rows = sqlx::query_as::<_, ConversationSummary>(
            r#"
            SELECT c.id, c.view_count, c.save_count, c.created_at
            FROM conversation_saves s
            JOIN conversations c ON c.id = s.conversation_id
            WHERE s.actor_key = $1 AND c.deleted_at IS NULL
            ORDER BY s.saved_at DESC, c.id ASC
            LIMIT $2
            "#,
        )
        .bind(actor_key)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    async fn purge_receipts(&self, cutoff: DateTime<Utc>) -> LedgerResult<u64> {
        let result = sqlx::query("DELETE FROM save_request_receipts WHERE recorded_at < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    async fn health_check(&self) -> LedgerResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
