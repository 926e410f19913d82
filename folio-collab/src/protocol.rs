//! JSON wire protocol for template collaboration.
//!
//! Every frame is a UTF-8 text message carrying one envelope:
//! ```text
//! {
//!   "type":      "template_edit" | "user_presence" | "cursor_move",
//!   "data":      { type-specific payload },
//!   "sender_id": "<user id>",
//!   "timestamp": "2024-05-01T12:00:00.000Z"
//! }
//! ```
//!
//! The `type`/`data` pair is modelled as the adjacently tagged [`Payload`]
//! enum, flattened into [`CollaborationMessage`] next to the sender and
//! timestamp. Unknown `type` values fail to decode.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ProtocolError;

/// Kind of change carried by a `template_edit` frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EditType {
    /// Content of an existing element changed
    ElementUpdate,
    /// A new element was inserted
    ElementAdd,
    /// An element was removed
    ElementDelete,
    /// Template-level change (layout, metadata, …)
    TemplateUpdate,
}

/// `template_edit` payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateEdit {
    pub edit_type: EditType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub element_id: Option<String>,
    /// Opaque change set, passed through to the host untouched.
    #[serde(default)]
    pub changes: Value,
}

impl TemplateEdit {
    pub fn element_update(element_id: impl Into<String>, changes: Value) -> Self {
        Self {
            edit_type: EditType::ElementUpdate,
            element_id: Some(element_id.into()),
            changes,
        }
    }

    pub fn element_add(changes: Value) -> Self {
        Self {
            edit_type: EditType::ElementAdd,
            element_id: None,
            changes,
        }
    }

    pub fn element_delete(element_id: impl Into<String>) -> Self {
        Self {
            edit_type: EditType::ElementDelete,
            element_id: Some(element_id.into()),
            changes: Value::Object(serde_json::Map::new()),
        }
    }

    pub fn template_update(changes: Value) -> Self {
        Self {
            edit_type: EditType::TemplateUpdate,
            element_id: None,
            changes,
        }
    }
}

/// Access level of a collaborator on the template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Permission {
    View,
    #[default]
    Edit,
    Admin,
}

/// Presence transition announced by a participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceAction {
    Joined,
    Left,
    /// Liveness announce; keeps the server-side presence timeout from firing.
    Active,
}

/// `user_presence` payload.
///
/// Only `action` and `user_id` are required. Display metadata is optional
/// and filled with placeholders when absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserPresence {
    pub action: PresenceAction,
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permission: Option<Permission>,
}

impl UserPresence {
    pub fn new(action: PresenceAction, user_id: impl Into<String>) -> Self {
        Self {
            action,
            user_id: user_id.into(),
            name: None,
            email: None,
            permission: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// `cursor_move` payload, in template coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CursorPosition {
    pub x: f64,
    pub y: f64,
    #[serde(
        rename = "elementId",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub element_id: Option<String>,
}

impl CursorPosition {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y, element_id: None }
    }

    pub fn over(mut self, element_id: impl Into<String>) -> Self {
        self.element_id = Some(element_id.into());
        self
    }
}

/// The `type` + `data` part of an envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum Payload {
    TemplateEdit(TemplateEdit),
    UserPresence(UserPresence),
    CursorMove(CursorPosition),
}

impl Payload {
    /// Wire name of the `type` discriminant.
    pub fn kind(&self) -> &'static str {
        match self {
            Payload::TemplateEdit(_) => "template_edit",
            Payload::UserPresence(_) => "user_presence",
            Payload::CursorMove(_) => "cursor_move",
        }
    }
}

/// A complete wire envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollaborationMessage {
    #[serde(flatten)]
    pub payload: Payload,
    pub sender_id: String,
    #[serde(with = "iso8601")]
    pub timestamp: DateTime<Utc>,
}

impl CollaborationMessage {
    /// Stamp a payload with the sender and the current time.
    pub fn new(payload: Payload, sender_id: impl Into<String>) -> Self {
        Self {
            payload,
            sender_id: sender_id.into(),
            timestamp: Utc::now(),
        }
    }

    /// Whether this frame was sent by `local_user_id`.
    pub fn is_from(&self, local_user_id: &str) -> bool {
        self.sender_id == local_user_id
    }

    /// Serialize to a JSON text frame.
    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(ProtocolError::Serialize)
    }

    /// Parse a JSON text frame.
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(ProtocolError::Deserialize)
    }
}

/// Millisecond-precision RFC 3339 timestamps with a `Z` suffix, the shape
/// browsers produce from `Date.toISOString()`.
mod iso8601 {
    use chrono::{DateTime, SecondsFormat, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(ts: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&ts.to_rfc3339_opts(SecondsFormat::Millis, true))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(d)?;
        DateTime::parse_from_rfc3339(&raw)
            .map(|ts| ts.with_timezone(&Utc))
            .map_err(serde::de::Error::custom)
    }
}
