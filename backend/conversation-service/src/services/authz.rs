//! Authorization decisions for ledger operations (identity and ownership)
use crate::domain::{Actor, Conversation};
use crate::error::LedgerError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    View,
    Save,
    Delete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny(DenyReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    /// No usable identity for an action that needs one
    Unauthenticated,
    /// An owner is recorded and the requester is not it
    NotOwner,
}

impl DenyReason {
    pub fn into_error(self, action: Action) -> LedgerError {
        match self {
            DenyReason::Unauthenticated => LedgerError::Unauthenticated(format!(
                "{} requires an authenticated session",
                action.label()
            )),
            DenyReason::NotOwner => LedgerError::Forbidden(format!(
                "only the owner may {} this conversation",
                action.label()
            )),
        }
    }
}

impl Action {
    pub fn label(&self) -> &'static str {
        match self {
            Action::View => "view",
            Action::Save => "save",
            Action::Delete => "delete",
        }
    }
}

/// Knobs that change who may do what
#[derive(Debug, Clone, Copy)]
pub struct AccessPolicy {
    /// When false, guest actors (client id only) may save
    pub require_auth_for_saves: bool,
}

impl Default for AccessPolicy {
    fn default() -> Self {
        Self {
            require_auth_for_saves: true,
        }
    }
}

pub fn authorize(
    action: Action,
    resource: &Conversation,
    requester: Option<&Actor>,
    policy: &AccessPolicy,
) -> Decision {
    match action {
        Action::View => Decision::Allow,
        Action::Save => saver_identity(requester, policy),
        Action::Delete => match resource.owner_session.as_deref() {
            // Anonymous shares may be removed by anyone holding the link.
            None => Decision::Allow,
            Some(owner) => match requester.and_then(Actor::session) {
                Some(session) if session == owner => Decision::Allow,
                _ => Decision::Deny(DenyReason::NotOwner),
            },
        },
    }
}

/// Whether `requester` may own a save set at all
pub fn saver_identity(requester: Option<&Actor>, policy: &AccessPolicy) -> Decision {
    match requester {
        None => Decision::Deny(DenyReason::Unauthenticated),
        Some(Actor::Guest(_)) if policy.require_auth_for_saves => {
            Decision::Deny(DenyReason::Unauthenticated)
        }
        Some(_) => Decision::Allow,
    }
}
