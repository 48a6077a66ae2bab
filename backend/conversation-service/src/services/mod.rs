pub mod authz;
pub mod ledger;

pub use authz::{authorize, saver_identity, AccessPolicy, Action, Decision, DenyReason};
pub use ledger::{ConversationLedger, LedgerSettings};
