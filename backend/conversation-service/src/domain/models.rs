use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::LedgerError;

/// Max length of an idempotency key supplied by clients
pub const MAX_REQUEST_KEY_LEN: usize = 255;

/// Conversation entity - one shared transcript with its counters
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Conversation {
    pub id: Uuid,
    /// Transcript payload, opaque to the ledger
    pub content: serde_json::Value,
    /// Session identity of the creator; `None` for anonymous shares.
    /// Only consulted for authorization, never rendered.
    #[serde(skip_serializing, default)]
    pub owner_session: Option<String>,
    pub view_count: i64,
    pub save_count: i64,
    pub created_at: DateTime<Utc>,
    /// Tombstone marker
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Conversation {
    pub fn lifecycle(&self) -> Lifecycle {
        if self.deleted_at.is_some() {
            Lifecycle::Deleted
        } else {
            Lifecycle::Active
        }
    }

    pub fn is_deleted(&self) -> bool {
        self.lifecycle() == Lifecycle::Deleted
    }

    pub fn summary(&self) -> ConversationSummary {
        ConversationSummary {
            id: self.id,
            view_count: self.view_count,
            save_count: self.save_count,
            created_at: self.created_at,
        }
    }
}

/// `Active --soft delete--> Deleted`; Deleted is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Lifecycle {
    Active,
    Deleted,
}

/// Insert payload for a new conversation
#[derive(Debug, Clone)]
pub struct NewConversation {
    pub id: Uuid,
    pub content: serde_json::Value,
    pub owner_session: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Listing row for galleries and the homepage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct ConversationSummary {
    pub id: Uuid,
    pub view_count: i64,
    pub save_count: i64,
    pub created_at: DateTime<Utc>,
}

/// Ranking key for listings. Ties always break on ascending id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderBy {
    #[default]
    Views,
    CreatedAt,
}

impl FromStr for OrderBy {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "views" => Ok(OrderBy::Views),
            "created_at" | "createdat" | "new" => Ok(OrderBy::CreatedAt),
            other => Err(LedgerError::InvalidInput(format!(
                "unsupported order_by '{}': expected 'views' or 'created_at'",
                other
            ))),
        }
    }
}

/// Identity performing an operation.
///
/// `User` carries an authenticated session identity; `Guest` carries a
/// client-supplied identifier that is only trusted where policy allows.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Actor {
    User(String),
    Guest(String),
}

impl Actor {
    /// Storage key for the (conversation, actor) save set
    pub fn key(&self) -> String {
        match self {
            Actor::User(session) => format!("user:{}", session),
            Actor::Guest(client) => format!("guest:{}", client),
        }
    }

    /// Authenticated session identity, if any
    pub fn session(&self) -> Option<&str> {
        match self {
            Actor::User(session) => Some(session.as_str()),
            Actor::Guest(_) => None,
        }
    }
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

/// Client-supplied idempotency key for toggle requests
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestKey(String);

impl RequestKey {
    pub fn parse(raw: &str) -> Result<Self, LedgerError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(LedgerError::InvalidInput(
                "idempotency key cannot be empty".to_string(),
            ));
        }
        if trimmed.len() > MAX_REQUEST_KEY_LEN {
            return Err(LedgerError::InvalidInput(format!(
                "idempotency key too long: {} characters (max {})",
                trimmed.len(),
                MAX_REQUEST_KEY_LEN
            )));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Authoritative saved-state returned to clients after a toggle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaveToggle {
    pub saved: bool,
    pub save_count: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeleteOutcome {
    Deleted,
    AlreadyDeleted,
}

/// Landing page aggregate
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HomepageData {
    pub total_convos: i64,
    pub top_convos: Vec<ConversationSummary>,
}
