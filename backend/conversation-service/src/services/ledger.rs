/// Conversation ledger - counting, saving and deletion contracts
use crate::domain::{
    Actor, Conversation, ConversationSummary, DeleteOutcome, HomepageData, NewConversation,
    OrderBy, RequestKey, SaveToggle,
};
use crate::error::{LedgerError, LedgerResult};
use crate::metrics;
use crate::repository::{ConversationStore, CounterUpdate, ToggleUpdate, TransitionUpdate};
use crate::services::authz::{authorize, saver_identity, AccessPolicy, Action, Decision};
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct LedgerSettings {
    pub access: AccessPolicy,
    /// Prefix for canonical share links, without trailing slash
    pub share_base_url: String,
    /// Upper bound applied to every listing size
    pub list_max_limit: i64,
    /// Number of conversations on the landing page
    pub home_top_n: i64,
    /// Reject save toggles that carry no request key
    pub require_request_key: bool,
}

impl Default for LedgerSettings {
    fn default() -> Self {
        Self {
            access: AccessPolicy::default(),
            share_base_url: "https://shareg.pt".to_string(),
            list_max_limit: 100,
            home_top_n: 10,
            require_request_key: false,
        }
    }
}

#[derive(Clone)]
pub struct ConversationLedger {
    store: Arc<dyn ConversationStore>,
    settings: LedgerSettings,
}

impl ConversationLedger {
    pub fn new(store: Arc<dyn ConversationStore>, settings: LedgerSettings) -> Self {
        Self { store, settings }
    }

    pub fn settings(&self) -> &LedgerSettings {
        &self.settings
    }

    /// Persist a new Active conversation with zero counters
    pub async fn create(
        &self,
        content: serde_json::Value,
        owner: Option<&Actor>,
    ) -> LedgerResult<Conversation> {
        let non_empty = match &content {
            serde_json::Value::Object(map) => !map.is_empty(),
            serde_json::Value::Array(items) => !items.is_empty(),
            _ => false,
        };
        if !non_empty {
            return Err(LedgerError::InvalidInput(
                "content must be a non-empty JSON object or array".to_string(),
            ));
        }

        let new = NewConversation {
            id: Uuid::new_v4(),
            content,
            owner_session: owner.and_then(Actor::session).map(str::to_string),
            created_at: Utc::now(),
        };

        let conversation = observe("create", self.store.insert(new).await)?;
        info!(
            conversation_id = %conversation.id,
            owned = conversation.owner_session.is_some(),
            "conversation created"
        );
        Ok(conversation)
    }

    /// Active conversation for public rendering
    pub async fn lookup(&self, id: Uuid) -> LedgerResult<Conversation> {
        observe("lookup", self.load_active(id).await)
    }

    /// Add one view and return the new count
    pub async fn record_view(&self, id: Uuid) -> LedgerResult<i64> {
        observe("record_view", self.apply_view(id).await)
    }

    /// Flip the actor's saved state; a replayed `request_key` returns the first outcome.
    /// Without a key every call flips again.
    pub async fn toggle_save(
        &self,
        id: Uuid,
        actor: Option<&Actor>,
        request_key: Option<&str>,
    ) -> LedgerResult<SaveToggle> {
        observe("toggle_save", self.apply_toggle(id, actor, request_key).await)
    }

    /// Whether `actor` currently saves the conversation; no identity means not saved
    pub async fn is_saved(&self, id: Uuid, actor: Option<&Actor>) -> LedgerResult<bool> {
        let result: LedgerResult<bool> = async {
            self.load_active(id).await?;
            match actor {
                Some(actor) => self.store.is_saved(id, &actor.key()).await,
                None => Ok(false),
            }
        }
        .await;
        observe("is_saved", result)
    }

    pub async fn soft_delete(
        &self,
        id: Uuid,
        requester: Option<&Actor>,
    ) -> LedgerResult<DeleteOutcome> {
        observe("soft_delete", self.apply_delete(id, requester).await)
    }

    /// Up to `n` Active conversations, ties by ascending id
    pub async fn list_top(&self, n: i64, order: OrderBy) -> LedgerResult<Vec<ConversationSummary>> {
        let limit = self.clamp_limit(n)?;
        if limit == 0 {
            return Ok(Vec::new());
        }
        observe("list_top", self.store.list_top(limit, order).await)
    }

    pub async fn count_active(&self) -> LedgerResult<i64> {
        observe("count_active", self.store.count_active().await)
    }

    /// The actor's saved Active conversations, newest save first
    pub async fn list_saved(
        &self,
        actor: Option<&Actor>,
        n: i64,
    ) -> LedgerResult<Vec<ConversationSummary>> {
        let actor = match (saver_identity(actor, &self.settings.access), actor) {
            (Decision::Allow, Some(actor)) => actor,
            (Decision::Deny(reason), _) => return Err(reason.into_error(Action::Save)),
            (Decision::Allow, None) => return Err(unauthenticated()),
        };
        let limit = self.clamp_limit(n)?;
        if limit == 0 {
            return Ok(Vec::new());
        }
        observe("list_saved", self.store.list_saved(&actor.key(), limit).await)
    }

    /// Landing page aggregate: active total plus the most viewed conversations.
    /// The two reads are independent snapshots.
    pub async fn homepage(&self) -> LedgerResult<HomepageData> {
        let total_convos = self.count_active().await?;
        let top_convos = self
            .list_top(self.settings.home_top_n, OrderBy::Views)
            .await?;
        Ok(HomepageData {
            total_convos,
            top_convos,
        })
    }

    /// Canonical share URL for an Active conversation
    pub async fn share_link(&self, id: Uuid) -> LedgerResult<String> {
        let conversation = self.lookup(id).await?;
        Ok(format!(
            "{}/{}",
            self.settings.share_base_url.trim_end_matches('/'),
            conversation.id
        ))
    }

    /// Drop save request receipts older than `retention`
    pub async fn purge_expired_receipts(&self, retention: chrono::Duration) -> LedgerResult<u64> {
        let cutoff = Utc::now() - retention;
        let purged = observe("purge_receipts", self.store.purge_receipts(cutoff).await)?;
        if purged > 0 {
            info!(purged, %cutoff, "purged expired save request receipts");
        }
        Ok(purged)
    }

    pub async fn health_check(&self) -> LedgerResult<()> {
        self.store.health_check().await
    }

    async fn load_active(&self, id: Uuid) -> LedgerResult<Conversation> {
        match self.store.find(id).await? {
            None => Err(LedgerError::NotFound(id)),
            Some(conversation) if conversation.is_deleted() => Err(LedgerError::Gone(id)),
            Some(conversation) => Ok(conversation),
        }
    }

    async fn apply_view(&self, id: Uuid) -> LedgerResult<i64> {
        let conversation = self.load_active(id).await?;
        self.check(Action::View, &conversation, None)?;

        match self.store.increment_views(id).await? {
            CounterUpdate::Applied(view_count) => {
                metrics::record_view();
                debug!(conversation_id = %id, view_count, "view recorded");
                Ok(view_count)
            }
            // Deleted between the read and the conditional update.
            CounterUpdate::Deleted => Err(LedgerError::Gone(id)),
            CounterUpdate::Missing => Err(LedgerError::NotFound(id)),
        }
    }

    async fn apply_toggle(
        &self,
        id: Uuid,
        actor: Option<&Actor>,
        request_key: Option<&str>,
    ) -> LedgerResult<SaveToggle> {
        let request_key = request_key.map(RequestKey::parse).transpose()?;
        if request_key.is_none() && self.settings.require_request_key {
            return Err(LedgerError::InvalidInput(
                "an idempotency key is required for save toggles".to_string(),
            ));
        }
        let conversation = self.load_active(id).await?;
        self.check(Action::Save, &conversation, actor)?;
        let actor = actor.ok_or_else(unauthenticated)?;

        match self
            .store
            .toggle_save(id, &actor.key(), request_key.as_ref())
            .await?
        {
            ToggleUpdate::Applied(outcome) => {
                metrics::record_save_toggle(if outcome.saved { "saved" } else { "unsaved" });
                debug!(
                    conversation_id = %id,
                    %actor,
                    saved = outcome.saved,
                    save_count = outcome.save_count,
                    "save toggled"
                );
                Ok(outcome)
            }
            ToggleUpdate::Replayed(outcome) => {
                metrics::record_save_toggle("replayed");
                debug!(conversation_id = %id, %actor, "save toggle replayed from receipt");
                Ok(outcome)
            }
            ToggleUpdate::Deleted => Err(LedgerError::Gone(id)),
            ToggleUpdate::Missing => Err(LedgerError::NotFound(id)),
            ToggleUpdate::KeyConflict => Err(LedgerError::InvalidInput(
                "idempotency key was already used for another conversation".to_string(),
            )),
        }
    }

    async fn apply_delete(&self, id: Uuid, requester: Option<&Actor>) -> LedgerResult<DeleteOutcome> {
        let conversation = self
            .store
            .find(id)
            .await?
            .ok_or(LedgerError::NotFound(id))?;

        // Ownership first: a non-owner learns nothing about lifecycle state.
        self.check(Action::Delete, &conversation, requester)?;

        if conversation.is_deleted() {
            metrics::record_delete("already_deleted");
            return Ok(DeleteOutcome::AlreadyDeleted);
        }

        let outcome = match self.store.mark_deleted(id).await? {
            TransitionUpdate::Applied => DeleteOutcome::Deleted,
            TransitionUpdate::AlreadyDeleted => DeleteOutcome::AlreadyDeleted,
            TransitionUpdate::Missing => return Err(LedgerError::NotFound(id)),
        };

        match outcome {
            DeleteOutcome::Deleted => {
                metrics::record_delete("deleted");
                info!(conversation_id = %id, "conversation soft-deleted");
            }
            DeleteOutcome::AlreadyDeleted => metrics::record_delete("already_deleted"),
        }
        Ok(outcome)
    }

    fn check(
        &self,
        action: Action,
        conversation: &Conversation,
        requester: Option<&Actor>,
    ) -> LedgerResult<()> {
        match authorize(action, conversation, requester, &self.settings.access) {
            Decision::Allow => Ok(()),
            Decision::Deny(reason) => Err(reason.into_error(action)),
        }
    }

    fn clamp_limit(&self, n: i64) -> LedgerResult<i64> {
        if n < 0 {
            return Err(LedgerError::InvalidInput(format!(
                "limit must not be negative, got {}",
                n
            )));
        }
        Ok(n.min(self.settings.list_max_limit))
    }
}

fn unauthenticated() -> LedgerError {
    LedgerError::Unauthenticated("an authenticated session is required".to_string())
}

/// Count failures by kind; storage failures are logged, caller errors are not
fn observe<T>(operation: &'static str, result: LedgerResult<T>) -> LedgerResult<T> {
    if let Err(err) = &result {
        metrics::record_error(err.kind());
        if matches!(err, LedgerError::Unavailable(_) | LedgerError::Internal(_)) {
            warn!(operation, kind = err.kind(), error = %err, "ledger operation failed");
        }
    }
    result
}
