//! Wire protocol: the `{type, payload}` envelope and its typed payloads.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::{GroupId, MessageId, RequestId, UserId};
use crate::models::{Decision, GroupRole};

/// Timestamp layout used in `*_received` notifications.
pub const NOTIFICATION_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Outer frame shape, both directions.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub payload: Value,
}

impl Envelope {
    /// Build an outbound envelope from a typed payload.
    pub fn new<T: Serialize>(kind: EventKind, payload: &T) -> Result<Self, serde_json::Error> {
        Ok(Self {
            kind: kind.as_str().to_owned(),
            payload: serde_json::to_value(payload)?,
        })
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            kind: EventKind::Error.as_str().to_owned(),
            payload: serde_json::json!({ "message": message.into() }),
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Decode the payload into the struct expected for this envelope's kind.
    pub fn decode_payload<T: for<'de> Deserialize<'de>>(&self) -> Result<T, serde_json::Error> {
        // A missing payload decodes like an empty object so defaults apply.
        if self.payload.is_null() {
            serde_json::from_value(Value::Object(serde_json::Map::new()))
        } else {
            serde_json::from_value(self.payload.clone())
        }
    }
}

/// Kinds a client may send.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Login,
    Chat,
    FriendRequest,
    FriendRequestHandle,
    GroupJoinRequest,
    GroupJoinRequestHandle,
}

impl MessageKind {
    pub const ALL: [MessageKind; 6] = [
        Self::Login,
        Self::Chat,
        Self::FriendRequest,
        Self::FriendRequestHandle,
        Self::GroupJoinRequest,
        Self::GroupJoinRequestHandle,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Login => "login",
            Self::Chat => "chat",
            Self::FriendRequest => "friend_request",
            Self::FriendRequestHandle => "friend_request_handle",
            Self::GroupJoinRequest => "group_join_request",
            Self::GroupJoinRequestHandle => "group_join_request_handle",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageKind {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| format!("unrecognized message type: {s}"))
    }
}

/// Kinds the server emits. Superset of [`MessageKind`] on the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventKind {
    LoginSuccess,
    Error,
    ChatResponse,
    Chat,
    FriendRequestResponse,
    FriendRequestReceived,
    FriendRequestHandleResponse,
    FriendRequestResult,
    GroupJoinRequestResponse,
    GroupJoinRequestReceived,
    GroupJoinRequestHandleResponse,
    GroupJoinRequestResult,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::LoginSuccess => "login_success",
            Self::Error => "error",
            Self::ChatResponse => "chat_response",
            Self::Chat => "chat",
            Self::FriendRequestResponse => "friend_request_response",
            Self::FriendRequestReceived => "friend_request_received",
            Self::FriendRequestHandleResponse => "friend_request_handle_response",
            Self::FriendRequestResult => "friend_request_result",
            Self::GroupJoinRequestResponse => "group_join_request_response",
            Self::GroupJoinRequestReceived => "group_join_request_received",
            Self::GroupJoinRequestHandleResponse => "group_join_request_handle_response",
            Self::GroupJoinRequestResult => "group_join_request_result",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Client → server payloads ──

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct LoginPayload {
    #[serde(default)]
    pub uid: String,
    #[serde(default)]
    pub token: String,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct ChatPayload {
    #[serde(default)]
    pub to: String,
    #[serde(default)]
    pub content: String,
    #[serde(rename = "type", default)]
    pub content_type: String,
    #[serde(default)]
    pub extra: String,
    #[serde(default)]
    pub is_group: bool,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct FriendRequestPayload {
    #[serde(default)]
    pub to_uid: String,
    #[serde(default)]
    pub message: String,
}

/// Shared by `friend_request_handle` and `group_join_request_handle`.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct HandleRequestPayload {
    pub request_id: RequestId,
    #[serde(default)]
    pub action: String,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct GroupJoinRequestPayload {
    #[serde(default)]
    pub group_id: Option<GroupId>,
    #[serde(default)]
    pub message: String,
}

// ── Server → client payloads ──

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct LoginSuccess {
    pub uid: UserId,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ErrorPayload {
    pub message: String,
}

/// `{success, message}` acknowledgement used by every `*_response` kind.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Ack {
    pub success: bool,
    pub message: String,
}

impl Ack {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }
}

/// Body of both `chat_response` (to the sender) and `chat` (to the recipient).
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ChatMessage {
    pub success: bool,
    pub message: String,
    pub message_id: MessageId,
    pub from: UserId,
    pub to: UserId,
    pub content: String,
    #[serde(rename = "type")]
    pub content_type: String,
    pub extra: String,
    pub timestamp: DateTime<Utc>,
    pub conversation: String,
    pub is_group: bool,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct FriendRequestReceived {
    pub request_id: RequestId,
    pub from_uid: UserId,
    pub from_name: String,
    pub from_avatar: String,
    pub message: String,
    pub created_at: String,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct FriendRequestResult {
    pub request_id: RequestId,
    pub from_uid: UserId,
    pub from_name: String,
    pub action: Decision,
    pub message: String,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct GroupJoinRequestReceived {
    pub request_id: RequestId,
    pub group_id: GroupId,
    pub group_name: String,
    pub from_uid: UserId,
    pub from_name: String,
    pub from_avatar: String,
    pub message: String,
    pub created_at: String,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct GroupJoinRequestResult {
    pub request_id: RequestId,
    pub group_id: GroupId,
    pub group_name: String,
    pub handler_uid: UserId,
    pub handler_name: String,
    pub handler_role: GroupRole,
    pub action: Decision,
    pub message: String,
}

/// Symmetric label for the exchange between two users.
pub fn conversation_id(a: &UserId, b: &UserId) -> String {
    if a <= b {
        format!("{a}_{b}")
    } else {
        format!("{b}_{a}")
    }
}

pub fn format_notification_time(at: DateTime<Utc>) -> String {
    at.format(NOTIFICATION_TIME_FORMAT).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn conversation_id_is_symmetric() {
        let pairs = [("alice", "bob"), ("u2", "u10"), ("same", "same"), ("", "x")];
        for (a, b) in pairs {
            let (a, b) = (UserId::from_raw(a), UserId::from_raw(b));
            assert_eq!(conversation_id(&a, &b), conversation_id(&b, &a));
        }
    }

    #[test]
    fn conversation_id_orders_smaller_first() {
        let id = conversation_id(&UserId::from_raw("zed"), &UserId::from_raw("amy"));
        assert_eq!(id, "amy_zed");
    }

    #[test]
    fn parse_envelope_with_payload() {
        let env: Envelope =
            serde_json::from_str(r#"{"type":"login","payload":{"uid":"u1","token":"t"}}"#).unwrap();
        assert_eq!(env.kind, "login");
        let login: LoginPayload = env.decode_payload().unwrap();
        assert_eq!(login.uid, "u1");
        assert_eq!(login.token, "t");
    }

    #[test]
    fn missing_payload_decodes_to_defaults() {
        let env: Envelope = serde_json::from_str(r#"{"type":"chat"}"#).unwrap();
        let chat: ChatPayload = env.decode_payload().unwrap();
        assert!(chat.to.is_empty());
        assert!(!chat.is_group);
    }

    #[test]
    fn envelope_without_type_is_rejected() {
        assert!(serde_json::from_str::<Envelope>(r#"{"payload":{}}"#).is_err());
    }

    #[test]
    fn handle_payload_requires_request_id() {
        let env: Envelope =
            serde_json::from_str(r#"{"type":"friend_request_handle","payload":{"action":"accept"}}"#)
                .unwrap();
        assert!(env.decode_payload::<HandleRequestPayload>().is_err());
    }

    #[test]
    fn message_kind_parses_every_client_type() {
        for kind in MessageKind::ALL {
            assert_eq!(kind.as_str().parse::<MessageKind>().unwrap(), kind);
        }
        let err = "typing".parse::<MessageKind>().unwrap_err();
        assert!(err.contains("unrecognized message type"));
    }

    #[test]
    fn client_kinds_are_server_kinds_too() {
        // Only `chat` travels both directions by name.
        assert_eq!(MessageKind::Chat.as_str(), EventKind::Chat.as_str());
    }

    #[test]
    fn error_envelope_shape() {
        let json = Envelope::error("nope").to_json().unwrap();
        let v: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(v["type"], "error");
        assert_eq!(v["payload"]["message"], "nope");
    }

    #[test]
    fn chat_message_serializes_content_type_as_type() {
        let msg = ChatMessage {
            success: true,
            message: "sent".into(),
            message_id: MessageId::from_raw("msg_1"),
            from: UserId::from_raw("a"),
            to: UserId::from_raw("b"),
            content: "hi".into(),
            content_type: "text".into(),
            extra: String::new(),
            timestamp: Utc::now(),
            conversation: "a_b".into(),
            is_group: false,
        };
        let env = Envelope::new(EventKind::ChatResponse, &msg).unwrap();
        assert_eq!(env.kind, "chat_response");
        assert_eq!(env.payload["type"], "text");
        assert_eq!(env.payload["message_id"], "msg_1");
    }

    #[test]
    fn notification_time_format() {
        let at = Utc.with_ymd_and_hms(2024, 3, 9, 7, 5, 1).unwrap();
        assert_eq!(format_notification_time(at), "2024-03-09 07:05:01");
    }

    #[test]
    fn result_action_serializes_lowercase() {
        let result = FriendRequestResult {
            request_id: RequestId(3),
            from_uid: UserId::from_raw("b"),
            from_name: "Bob".into(),
            action: Decision::Accept,
            message: "accepted".into(),
        };
        let v = serde_json::to_value(&result).unwrap();
        assert_eq!(v["action"], "accept");
        assert_eq!(v["request_id"], 3);
    }
}
