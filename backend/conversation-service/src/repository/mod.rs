//! Persistence store for conversations.
//!
//! Every mutating method is a single atomic primitive at the storage layer;
//! callers never read-modify-write counters.
pub mod memory;
pub mod postgres;

pub use memory::InMemoryConversationStore;
pub use postgres::PgConversationStore;

use crate::domain::{Conversation, ConversationSummary, NewConversation, OrderBy, RequestKey, SaveToggle};
use crate::error::LedgerResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Result of a conditional counter update
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CounterUpdate {
    Applied(i64),
    Deleted,
    Missing,
}

/// Result of a keyed save toggle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToggleUpdate {
    Applied(SaveToggle),
    /// The request key was seen before; this is the recorded outcome
    Replayed(SaveToggle),
    Deleted,
    Missing,
    /// The actor already used this request key on a different conversation
    KeyConflict,
}

/// Result of the Active -> Deleted transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionUpdate {
    Applied,
    AlreadyDeleted,
    Missing,
}

#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn insert(&self, new: NewConversation) -> LedgerResult<Conversation>;

    /// Look up a record, tombstones included
    async fn find(&self, id: Uuid) -> LedgerResult<Option<Conversation>>;

    /// `view_count = view_count + 1` on an Active record
    async fn increment_views(&self, id: Uuid) -> LedgerResult<CounterUpdate>;

    /// Flip membership of `actor_key` in the save set and move `save_count`
    /// by the same delta, recording the outcome under `(actor_key, request_key)`.
    async fn toggle_save(
        &self,
        id: Uuid,
        actor_key: &str,
        request_key: Option<&RequestKey>,
    ) -> LedgerResult<ToggleUpdate>;

    async fn is_saved(&self, id: Uuid, actor_key: &str) -> LedgerResult<bool>;

    /// Conditional transition guarded by `deleted_at IS NULL`
    async fn mark_deleted(&self, id: Uuid) -> LedgerResult<TransitionUpdate>;

    /// Active records ranked by `order`, ties by ascending id
    async fn list_top(&self, limit: i64, order: OrderBy) -> LedgerResult<Vec<ConversationSummary>>;

    async fn count_active(&self) -> LedgerResult<i64>;

    /// Active records saved by `actor_key`, newest save first
    async fn list_saved(&self, actor_key: &str, limit: i64) -> LedgerResult<Vec<ConversationSummary>>;

    /// Drop save request receipts recorded before `cutoff`
    async fn purge_receipts(&self, cutoff: DateTime<Utc>) -> LedgerResult<u64>;

    async fn health_check(&self) -> LedgerResult<()> {
        Ok(())
    }
}
