#![allow(dead_code)]

use conversation_service::domain::{Actor, Conversation};
use conversation_service::repository::InMemoryConversationStore;
use conversation_service::{ConversationLedger, LedgerSettings};
use serde_json::json;
use std::sync::Arc;

pub fn memory_ledger() -> ConversationLedger {
    memory_ledger_with(LedgerSettings::default())
}

pub fn memory_ledger_with(settings: LedgerSettings) -> ConversationLedger {
    ConversationLedger::new(Arc::new(InMemoryConversationStore::new()), settings)
}

pub fn user(session: &str) -> Actor {
    Actor::User(session.to_string())
}

pub fn guest(client_id: &str) -> Actor {
    Actor::Guest(client_id.to_string())
}

pub fn transcript() -> serde_json::Value {
    json!({
        "title": "Rust lifetimes",
        "items": [
            {"from": "human", "value": "What does 'static mean?"},
            {"from": "gpt", "value": "It means the value can live for the whole program."}
        ]
    })
}

pub async fn share(ledger: &ConversationLedger, owner: Option<&Actor>) -> Conversation {
    ledger
        .create(transcript(), owner)
        .await
        .expect("create conversation")
}
