//! Action requests and their outcomes.
//!
//! An [`Action`] is what the command front end asks for; an
//! [`ActionRequest`] is that action bound to a normalized target together
//! with its deterministic [`IdempotencyKey`]; an [`ActionResult`] is the one
//! outcome produced per request.

use crate::client::protocol::Opcode;
use crate::error::{RejectedError, RemoteFailureReason};
use crate::identifier::{normalize, Identifier};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Maximum length of a broadcast message, in characters.
pub const MAX_BROADCAST_LEN: usize = 512;

/// Namespace for deriving idempotency keys.
const IDEMPOTENCY_NAMESPACE: Uuid = Uuid::from_u128(0x6f1d3a52_9c4e_4b7a_8e21_5d0c7a9b3f10);

/// The kinds of action the bridge can perform, with their payloads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Action {
    /// Grant a role tag to the target player
    GrantRole { role: String },

    /// Take a role tag away from the target player
    RevokeRole { role: String },

    /// Disconnect the target player from the game server
    Kick {
        #[serde(default)]
        reason: Option<String>,
    },

    /// Announce a message server-wide, attributed to the target
    Broadcast { message: String },

    /// Any other control operation understood by the remote side
    Custom {
        op: String,
        #[serde(default)]
        payload: serde_json::Value,
        /// Whether repeating the operation is harmless
        #[serde(default)]
        idempotent: bool,
    },
}

impl Action {
    /// Whether the remote effect may be safely re-sent.
    pub fn is_idempotent(&self) -> bool {
        match self {
            Action::GrantRole { .. } | Action::RevokeRole { .. } => true,
            Action::Kick { .. } | Action::Broadcast { .. } => false,
            Action::Custom { idempotent, .. } => *idempotent,
        }
    }

    /// Short stable name, used for logging and policy lookups.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Action::GrantRole { .. } => "grant_role",
            Action::RevokeRole { .. } => "revoke_role",
            Action::Kick { .. } => "kick",
            Action::Broadcast { .. } => "broadcast",
            Action::Custom { .. } => "custom",
        }
    }

    /// Validates and canonicalizes the payload.
    ///
    /// Role tags follow the identifier rules and broadcast messages must be
    /// non-empty and bounded. Custom opcodes must be non-empty and may not
    /// reuse a built-in opcode: role changes have to go through the store
    /// first, and `auth` belongs to the session handshake.
    pub fn validated(self) -> Result<Action, RejectedError> {
        match self {
            Action::GrantRole { role } => Ok(Action::GrantRole { role: validate_role(&role)? }),
            Action::RevokeRole { role } => Ok(Action::RevokeRole { role: validate_role(&role)? }),
            Action::Kick { reason } => Ok(Action::Kick {
                reason: reason
                    .map(|r| sanitize_text(&r))
                    .filter(|r| !r.is_empty()),
            }),
            Action::Broadcast { message } => {
                let message = sanitize_text(&message);
                if message.is_empty() {
                    return Err(RejectedError::InvalidPayload("broadcast message is empty".into()));
                }
                let len = message.chars().count();
                if len > MAX_BROADCAST_LEN {
                    return Err(RejectedError::InvalidPayload(format!(
                        "broadcast message is {len} characters, maximum is {MAX_BROADCAST_LEN}"
                    )));
                }
                Ok(Action::Broadcast { message })
            }
            Action::Custom { op, payload, idempotent } => {
                let op = op.trim().to_lowercase();
                if op.is_empty() {
                    return Err(RejectedError::InvalidPayload("custom opcode is empty".into()));
                }
                if !matches!(Opcode::from(op.clone()), Opcode::Custom(_)) {
                    return Err(RejectedError::InvalidPayload(format!("opcode '{op}' is reserved")));
                }
                Ok(Action::Custom { op, payload, idempotent })
            }
        }
    }
}

fn validate_role(role: &str) -> Result<String, RejectedError> {
    normalize(role)
        .map(Identifier::into_string)
        .map_err(|e| RejectedError::InvalidPayload(format!("role tag: {e}")))
}

/// Strips control characters (keeping newlines and tabs) and surrounding whitespace.
fn sanitize_text(input: &str) -> String {
    input
        .chars()
        .filter(|c| !c.is_control() || *c == '\n' || *c == '\t')
        .collect::<String>()
        .trim()
        .to_string()
}

/// Deterministic key identifying "the same request".
///
/// Derived from the request content (UUID v5), never random, so a retried
/// submission collapses onto the original.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IdempotencyKey(Uuid);

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.as_hyphenated())
    }
}

/// A validated action bound to its normalized target.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionRequest {
    target: Identifier,
    action: Action,
    key: IdempotencyKey,
}

impl ActionRequest {
    /// Validates `action` and derives the idempotency key.
    pub fn new(target: Identifier, action: Action) -> Result<Self, RejectedError> {
        let action = action.validated()?;
        let key = derive_key(&target, &action);
        Ok(Self { target, action, key })
    }

    pub fn target(&self) -> &Identifier {
        &self.target
    }

    pub fn action(&self) -> &Action {
        &self.action
    }

    pub fn idempotency_key(&self) -> IdempotencyKey {
        self.key
    }
}

fn derive_key(target: &Identifier, action: &Action) -> IdempotencyKey {
    #[derive(Serialize)]
    struct Canonical<'a> {
        target: &'a Identifier,
        action: &'a Action,
    }

    let canonical = Canonical { target, action };
    let bytes = serde_json::to_vec(&canonical)
        .unwrap_or_else(|_| format!("{target}|{action:?}").into_bytes());
    IdempotencyKey(Uuid::new_v5(&IDEMPOTENCY_NAMESPACE, &bytes))
}

/// The single outcome of one action request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionResult {
    /// The action took effect; carries a human-readable detail
    Success(String),

    /// The remote side failed or refused
    RemoteFailure(RemoteFailureReason),

    /// The identity store step failed; the remote call was not attempted
    StoreFailure(String),

    /// The input was invalid; nothing was attempted
    Rejected(RejectedError),

    /// No response in time. The remote effect may or may not have happened.
    Timeout,
}

impl ActionResult {
    pub fn is_success(&self) -> bool {
        matches!(self, ActionResult::Success(_))
    }

    /// Stable label for the variant, for logs and front-end rendering.
    pub fn kind_label(&self) -> &'static str {
        match self {
            ActionResult::Success(_) => "success",
            ActionResult::RemoteFailure(_) => "remote_failure",
            ActionResult::StoreFailure(_) => "store_failure",
            ActionResult::Rejected(_) => "rejected",
            ActionResult::Timeout => "timeout",
        }
    }
}

impl fmt::Display for ActionResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionResult::Success(detail) => write!(f, "done: {detail}"),
            ActionResult::RemoteFailure(reason) => write!(f, "game server error: {reason}"),
            ActionResult::StoreFailure(reason) => write!(f, "identity store error: {reason}"),
            ActionResult::Rejected(reason) => write!(f, "rejected: {reason}"),
            ActionResult::Timeout => write!(
                f,
                "timed out waiting for the game server; the action may still have been applied"
            ),
        }
    }
}
