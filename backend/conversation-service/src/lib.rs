/// Conversation Service
///
/// Shared-conversation ledger: view counts, saves and soft deletion for
/// shared transcripts, served over HTTP.
///
/// # Routes
///
/// - `/api/v1/conversations/*` - create, read, view, save, delete, list
/// - `/api/v1/home` - landing page aggregate
/// - `/api/v1/me/saved` - the caller's saved conversations
pub mod config;
pub mod domain;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod repository;
pub mod services;
pub mod workers;

pub use config::Config;
pub use error::{LedgerError, LedgerResult};
pub use services::{ConversationLedger, LedgerSettings};
