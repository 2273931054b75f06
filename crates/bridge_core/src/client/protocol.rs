//! Wire format of the game server's control interface.
//!
//! Frames are single-line JSON objects terminated by `\n`. Each request
//! carries a correlation id which the matching response must echo.

use crate::action::{Action, ActionRequest};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;

/// Largest response line accepted from the remote side, in bytes.
pub const MAX_FRAME_LEN: usize = 64 * 1024;

/// Operation names understood by the control interface.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Opcode {
    /// Session handshake, always the first frame on a connection
    Auth,
    SetRole,
    RemoveRole,
    Kick,
    Broadcast,
    /// Anything else, passed through verbatim
    Custom(String),
}

impl Opcode {
    pub fn as_str(&self) -> &str {
        match self {
            Opcode::Auth => "auth",
            Opcode::SetRole => "set_role",
            Opcode::RemoveRole => "remove_role",
            Opcode::Kick => "kick",
            Opcode::Broadcast => "broadcast",
            Opcode::Custom(op) => op,
        }
    }
}

impl From<String> for Opcode {
    fn from(value: String) -> Self {
        match value.as_str() {
            "auth" => Opcode::Auth,
            "set_role" => Opcode::SetRole,
            "remove_role" => Opcode::RemoveRole,
            "kick" => Opcode::Kick,
            "broadcast" => Opcode::Broadcast,
            _ => Opcode::Custom(value),
        }
    }
}

impl From<Opcode> for String {
    fn from(value: Opcode) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single request frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlRequest {
    pub op: Opcode,
    pub correlation: String,
    #[serde(default)]
    pub payload: Value,
}

impl ControlRequest {
    /// Builds the handshake frame presenting `token`.
    pub fn auth(token: &str) -> Self {
        Self {
            op: Opcode::Auth,
            correlation: "auth".to_string(),
            payload: json!({ "token": token }),
        }
    }

    /// Translates an action request into its wire form.
    ///
    /// The idempotency key doubles as the correlation id so the remote side
    /// can recognise a re-sent request.
    pub fn from_action(request: &ActionRequest) -> Self {
        let target = request.target().as_str();
        let (op, payload) = match request.action() {
            Action::GrantRole { role } => (Opcode::SetRole, json!({ "ckey": target, "role": role })),
            Action::RevokeRole { role } => (Opcode::RemoveRole, json!({ "ckey": target, "role": role })),
            Action::Kick { reason } => (Opcode::Kick, json!({ "ckey": target, "reason": reason })),
            Action::Broadcast { message } => (
                Opcode::Broadcast,
                json!({ "sender": target, "message": message }),
            ),
            Action::Custom { op, payload, .. } => (
                Opcode::from(op.clone()),
                json!({ "ckey": target, "data": payload }),
            ),
        };

        Self {
            op,
            correlation: request.idempotency_key().to_string(),
            payload,
        }
    }

    /// Serializes the frame including its trailing newline.
    pub fn to_line(&self) -> Result<String, serde_json::Error> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }
}

/// A single response frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlResponse {
    pub correlation: String,
    pub ok: bool,

    /// Human-readable description of what happened
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,

    /// Machine-readable refusal code
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,

    /// Human-readable refusal reason
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl ControlResponse {
    pub fn success(correlation: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            correlation: correlation.into(),
            ok: true,
            detail: Some(detail.into()),
            code: None,
            reason: None,
        }
    }

    pub fn refused(
        correlation: impl Into<String>,
        code: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            correlation: correlation.into(),
            ok: false,
            detail: None,
            code: Some(code.into()),
            reason: Some(reason.into()),
        }
    }

    pub fn from_line(line: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(line.trim_end())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identifier::normalize;

    #[test]
    fn test_opcode_wire_names() {
        let request = ControlRequest::auth("secret");
        let line = request.to_line().unwrap();
        assert!(line.ends_with('\n'));
        let value: Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["op"], "auth");
        assert_eq!(value["payload"]["token"], "secret");

        assert_eq!(Opcode::from("remove_role".to_string()), Opcode::RemoveRole);
        assert_eq!(Opcode::from("set_job".to_string()), Opcode::Custom("set_job".into()));
        assert_eq!(serde_json::to_string(&Opcode::SetRole).unwrap(), "\"set_role\"");
    }

    #[test]
    fn test_action_translation() {
        let request = ActionRequest::new(
            normalize("SomeCkey").unwrap(),
            Action::GrantRole { role: "Admin".into() },
        )
        .unwrap();
        let frame = ControlRequest::from_action(&request);
        assert_eq!(frame.op, Opcode::SetRole);
        assert_eq!(frame.payload, json!({ "ckey": "someckey", "role": "admin" }));
        assert_eq!(frame.correlation, request.idempotency_key().to_string());

        let broadcast = ActionRequest::new(
            normalize("herald").unwrap(),
            Action::Broadcast { message: "round ends soon".into() },
        )
        .unwrap();
        let frame = ControlRequest::from_action(&broadcast);
        assert_eq!(frame.op, Opcode::Broadcast);
        assert_eq!(frame.payload["sender"], "herald");
    }

    #[test]
    fn test_response_parsing_tolerates_missing_optionals() {
        let response = ControlResponse::from_line("{\"correlation\":\"abc\",\"ok\":true}\r\n").unwrap();
        assert!(response.ok);
        assert_eq!(response.detail, None);

        let refused = ControlResponse::from_line(
            r#"{"correlation":"abc","ok":false,"code":"no_such_player","reason":"not online"}"#,
        )
        .unwrap();
        assert_eq!(refused, ControlResponse::refused("abc", "no_such_player", "not online"));
    }
}
