use super::{ConversationStore, CounterUpdate, ToggleUpdate, TransitionUpdate};
use crate::domain::{Conversation, ConversationSummary, NewConversation, OrderBy, RequestKey, SaveToggle};
use crate::error::{LedgerError, LedgerResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::cmp::Reverse;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

struct Record {
    conversation: Conversation,
    /// actor key -> save sequence number (newest save has the highest number)
    savers: HashMap<String, u64>,
}

struct Receipt {
    conversation_id: Uuid,
    outcome: SaveToggle,
    recorded_at: DateTime<Utc>,
}

/// Process-local store for development and tests.
///
/// Each conversation lives behind its own map entry; holding the entry guard
/// is the row lock. Receipts are only locked while a conversation guard is
/// held, never the other way round.
#[derive(Default)]
pub struct InMemoryConversationStore {
    conversations: DashMap<Uuid, Record>,
    /// (actor key, request key) -> recorded outcome
    receipts: DashMap<(String, String), Receipt>,
    save_sequence: AtomicU64,
}

impl InMemoryConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn flip(&self, record: &mut Record, actor_key: &str) -> SaveToggle {
        let conversation = &mut record.conversation;
        if record.savers.remove(actor_key).is_some() {
            conversation.save_count = (conversation.save_count - 1).max(0);
            SaveToggle {
                saved: false,
                save_count: conversation.save_count,
            }
        } else {
            let seq = self.save_sequence.fetch_add(1, Ordering::SeqCst);
            record.savers.insert(actor_key.to_string(), seq);
            conversation.save_count += 1;
            SaveToggle {
                saved: true,
                save_count: conversation.save_count,
            }
        }
    }
}

#[async_trait]
impl ConversationStore for InMemoryConversationStore {
    async fn insert(&self, new: NewConversation) -> LedgerResult<Conversation> {
        match self.conversations.entry(new.id) {
            Entry::Occupied(_) => Err(LedgerError::Internal(format!(
                "duplicate conversation id {}",
                new.id
            ))),
            Entry::Vacant(slot) => {
                let conversation = Conversation {
                    id: new.id,
                    content: new.content,
                    owner_session: new.owner_session,
                    view_count: 0,
                    save_count: 0,
                    created_at: new.created_at,
                    deleted_at: None,
                };
                slot.insert(Record {
                    conversation: conversation.clone(),
                    savers: HashMap::new(),
                });
                Ok(conversation)
            }
        }
    }

    async fn find(&self, id: Uuid) -> LedgerResult<Option<Conversation>> {
        Ok(self
            .conversations
            .get(&id)
            .map(|record| record.conversation.clone()))
    }

    async fn increment_views(&self, id: Uuid) -> LedgerResult<CounterUpdate> {
        let Some(mut record) = self.conversations.get_mut(&id) else {
            return Ok(CounterUpdate::Missing);
        };
        if record.conversation.is_deleted() {
            return Ok(CounterUpdate::Deleted);
        }
        record.conversation.view_count += 1;
        Ok(CounterUpdate::Applied(record.conversation.view_count))
    }

    async fn toggle_save(
        &self,
        id: Uuid,
        actor_key: &str,
        request_key: Option<&RequestKey>,
    ) -> LedgerResult<ToggleUpdate> {
        let Some(mut record) = self.conversations.get_mut(&id) else {
            return Ok(ToggleUpdate::Missing);
        };
        if record.conversation.is_deleted() {
            return Ok(ToggleUpdate::Deleted);
        }

        let Some(key) = request_key else {
            return Ok(ToggleUpdate::Applied(self.flip(&mut record, actor_key)));
        };

        match self
            .receipts
            .entry((actor_key.to_string(), key.as_str().to_string()))
        {
            Entry::Occupied(existing) => {
                let receipt = existing.get();
                if receipt.conversation_id == id {
                    Ok(ToggleUpdate::Replayed(receipt.outcome))
                } else {
                    Ok(ToggleUpdate::KeyConflict)
                }
            }
            Entry::Vacant(slot) => {
                let outcome = self.flip(&mut record, actor_key);
                slot.insert(Receipt {
                    conversation_id: id,
                    outcome,
                    recorded_at: Utc::now(),
                });
                Ok(ToggleUpdate::Applied(outcome))
            }
        }
    }

    async fn is_saved(&self, id: Uuid, actor_key: &str) -> LedgerResult<bool> {
        Ok(self
            .conversations
            .get(&id)
            .map(|record| record.savers.contains_key(actor_key))
            .unwrap_or(false))
    }

    async fn mark_deleted(&self, id: Uuid) -> LedgerResult<TransitionUpdate> {
        let Some(mut record) = self.conversations.get_mut(&id) else {
            return Ok(TransitionUpdate::Missing);
        };
        if record.conversation.is_deleted() {
            return Ok(TransitionUpdate::AlreadyDeleted);
        }
        record.conversation.deleted_at = Some(Utc::now());
        Ok(TransitionUpdate::Applied)
    }

    async fn list_top(&self, limit: i64, order: OrderBy) -> LedgerResult<Vec<ConversationSummary>> {
        let mut rows: Vec<ConversationSummary> = self
            .conversations
            .iter()
            .filter(|record| !record.conversation.is_deleted())
            .map(|record| record.conversation.summary())
            .collect();

        match order {
            OrderBy::Views => rows.sort_by_key(|row| (Reverse(row.view_count), row.id)),
            OrderBy::CreatedAt => rows.sort_by_key(|row| (Reverse(row.created_at), row.id)),
        }
        rows.truncate(usize::try_from(limit).unwrap_or(0));

        Ok(rows)
    }

    async fn count_active(&self) -> LedgerResult<i64> {
        let count = self
            .conversations
            .iter()
            .filter(|record| !record.conversation.is_deleted())
            .count();
        Ok(count as i64)
    }

    async fn list_saved(&self, actor_key: &str, limit: i64) -> LedgerResult<Vec<ConversationSummary>> {
        let mut rows: Vec<(u64, ConversationSummary)> = self
            .conversations
            .iter()
            .filter(|record| !record.conversation.is_deleted())
            .filter_map(|record| {
                record
                    .savers
                    .get(actor_key)
                    .map(|seq| (*seq, record.conversation.summary()))
            })
            .collect();

        rows.sort_by_key(|(seq, row)| (Reverse(*seq), row.id));
        rows.truncate(usize::try_from(limit).unwrap_or(0));

        Ok(rows.into_iter().map(|(_, row)| row).collect())
    }

    async fn purge_receipts(&self, cutoff: DateTime<Utc>) -> LedgerResult<u64> {
        let before = self.receipts.len();
        self.receipts.retain(|_, receipt| receipt.recorded_at >= cutoff);
        Ok(before.saturating_sub(self.receipts.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn new_conversation() -> NewConversation {
        NewConversation {
            id: Uuid::new_v4(),
            content: json!({"items": [{"from": "human", "value": "hi"}]}),
            owner_session: None,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_increment_distinguishes_missing_and_deleted() {
        let store = InMemoryConversationStore::new();
        let conversation = store.insert(new_conversation()).await.unwrap();

        assert_eq!(
            store.increment_views(conversation.id).await.unwrap(),
            CounterUpdate::Applied(1)
        );
        assert_eq!(
            store.increment_views(Uuid::new_v4()).await.unwrap(),
            CounterUpdate::Missing
        );

        store.mark_deleted(conversation.id).await.unwrap();
        assert_eq!(
            store.increment_views(conversation.id).await.unwrap(),
            CounterUpdate::Deleted
        );
    }

    #[tokio::test]
    async fn test_receipt_replay_and_conflict() {
        let store = InMemoryConversationStore::new();
        let first = store.insert(new_conversation()).await.unwrap();
        let second = store.insert(new_conversation()).await.unwrap();
        let key = RequestKey::parse("req-1").unwrap();

        let applied = store.toggle_save(first.id, "user:a", Some(&key)).await.unwrap();
        assert_eq!(
            applied,
            ToggleUpdate::Applied(SaveToggle {
                saved: true,
                save_count: 1
            })
        );

        let replayed = store.toggle_save(first.id, "user:a", Some(&key)).await.unwrap();
        assert_eq!(
            replayed,
            ToggleUpdate::Replayed(SaveToggle {
                saved: true,
                save_count: 1
            })
        );
        assert!(store.is_saved(first.id, "user:a").await.unwrap());

        let conflict = store.toggle_save(second.id, "user:a", Some(&key)).await.unwrap();
        assert_eq!(conflict, ToggleUpdate::KeyConflict);
        assert!(!store.is_saved(second.id, "user:a").await.unwrap());
    }

    #[tokio::test]
    async fn test_request_keys_are_scoped_per_actor() {
        let store = InMemoryConversationStore::new();
        let conversation = store.insert(new_conversation()).await.unwrap();
        let key = RequestKey::parse("retry-1").unwrap();

        let alice = store
            .toggle_save(conversation.id, "user:alice", Some(&key))
            .await
            .unwrap();
        let bob = store
            .toggle_save(conversation.id, "user:bob", Some(&key))
            .await
            .unwrap();

        assert_eq!(
            alice,
            ToggleUpdate::Applied(SaveToggle {
                saved: true,
                save_count: 1
            })
        );
        assert_eq!(
            bob,
            ToggleUpdate::Applied(SaveToggle {
                saved: true,
                save_count: 2
            })
        );
    }

    #[tokio::test]
    async fn test_purge_receipts_before_cutoff() {
        let store = InMemoryConversationStore::new();
        let conversation = store.insert(new_conversation()).await.unwrap();
        let key = RequestKey::parse("req-purge").unwrap();
        store
            .toggle_save(conversation.id, "user:a", Some(&key))
            .await
            .unwrap();

        assert_eq!(
            store
                .purge_receipts(Utc::now() - chrono::Duration::hours(1))
                .await
                .unwrap(),
            0
        );
        assert_eq!(
            store
                .purge_receipts(Utc::now() + chrono::Duration::seconds(1))
                .await
                .unwrap(),
            1
        );

        // Key is free again: a new toggle applies instead of replaying.
        let update = store
            .toggle_save(conversation.id, "user:a", Some(&key))
            .await
            .unwrap();
        assert_eq!(
            update,
            ToggleUpdate::Applied(SaveToggle {
                saved: false,
                save_count: 0
            })
        );
    }

    #[tokio::test]
    async fn test_list_saved_newest_first() {
        let store = InMemoryConversationStore::new();
        let older = store.insert(new_conversation()).await.unwrap();
        let newer = store.insert(new_conversation()).await.unwrap();
        let gone = store.insert(new_conversation()).await.unwrap();

        for id in [older.id, newer.id, gone.id] {
            store.toggle_save(id, "user:a", None).await.unwrap();
        }
        store.mark_deleted(gone.id).await.unwrap();

        let saved = store.list_saved("user:a", 10).await.unwrap();
        let ids: Vec<Uuid> = saved.iter().map(|row| row.id).collect();
        assert_eq!(ids, vec![newer.id, older.id]);
        assert!(store.list_saved("user:b", 10).await.unwrap().is_empty());
    }
}
