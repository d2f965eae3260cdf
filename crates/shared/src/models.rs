//! Chat wire models shared by the session core and its consumers.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Wire names of the events exchanged with the chat backend.
pub mod events {
    pub const REGISTER_SOCKET: &str = "register_socket";
    pub const SEND_MESSAGE: &str = "send_message";
    pub const MESSAGE: &str = "message";
    pub const ERROR: &str = "error";
    pub const READ_RECEIPT: &str = "read_receipt";
    pub const CHAT_DELETED: &str = "chat_deleted";
}

/// Credential handed to the session by the external auth store.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credential {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub token: String,
}

impl Credential {
    pub fn new(user_id: Option<String>, token: impl Into<String>) -> Self {
        Self {
            user_id,
            token: token.into(),
        }
    }

    /// Credential for a known user.
    pub fn for_user(user_id: impl Into<String>, token: impl Into<String>) -> Self {
        Self::new(Some(user_id.into()), token)
    }

    /// A blank token means no session should exist.
    pub fn has_token(&self) -> bool {
        !self.token.trim().is_empty()
    }

    /// The identity to register after connecting, if any.
    pub fn identity(&self) -> Option<&str> {
        self.user_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
    }
}

/// Payload of the `register_socket` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterPayload {
    pub user_id: String,
}

/// Who an outbound message is addressed to.
///
/// The backend accepts two naming conventions; both are kept as-is rather
/// than normalised.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RecipientRef {
    User {
        #[serde(rename = "toUserId")]
        to_user_id: String,
    },
    Seller {
        #[serde(rename = "toSellerId")]
        to_seller_id: String,
    },
    Peer {
        #[serde(rename = "toId")]
        to_id: String,
        #[serde(rename = "fromId", default, skip_serializing_if = "Option::is_none")]
        from_id: Option<String>,
    },
}

/// Message text under either of the two accepted field names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageBody {
    Text { text: String },
    Message { message: String },
}

impl MessageBody {
    pub fn as_str(&self) -> &str {
        match self {
            MessageBody::Text { text } => text,
            MessageBody::Message { message } => message,
        }
    }
}

/// A message the UI wants delivered.
///
/// `client_temp_id` is opaque to the session; it is forwarded verbatim so the
/// caller can match the server echo against its optimistic entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundMessage {
    #[serde(flatten)]
    pub recipient: RecipientRef,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product_id: Option<String>,
    #[serde(flatten)]
    pub body: MessageBody,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_temp_id: Option<String>,
}

impl OutboundMessage {
    pub fn new(recipient: RecipientRef, body: MessageBody) -> Self {
        Self {
            recipient,
            product_id: None,
            body,
            client_temp_id: None,
        }
    }

    /// `{toUserId, text}` convention.
    pub fn to_user(user_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self::new(
            RecipientRef::User {
                to_user_id: user_id.into(),
            },
            MessageBody::Text { text: text.into() },
        )
    }

    /// `{toSellerId, text}` convention.
    pub fn to_seller(seller_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self::new(
            RecipientRef::Seller {
                to_seller_id: seller_id.into(),
            },
            MessageBody::Text { text: text.into() },
        )
    }

    /// `{toId, fromId, message}` convention.
    pub fn to_peer(
        to_id: impl Into<String>,
        from_id: Option<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::new(
            RecipientRef::Peer {
                to_id: to_id.into(),
                from_id,
            },
            MessageBody::Message {
                message: message.into(),
            },
        )
    }

    pub fn with_product(mut self, product_id: impl Into<String>) -> Self {
        self.product_id = Some(product_id.into());
        self
    }

    pub fn with_client_temp_id(mut self, id: impl Into<String>) -> Self {
        self.client_temp_id = Some(id.into());
        self
    }
}

/// Generate a fresh correlation id for an optimistic UI entry.
pub fn new_client_temp_id() -> String {
    format!("tmp-{}", uuid::Uuid::new_v4())
}

/// An inbound chat message, kept exactly as the server sent it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InboundMessage(Value);

impl InboundMessage {
    pub fn new(raw: Value) -> Self {
        Self(raw)
    }

    pub fn raw(&self) -> &Value {
        &self.0
    }

    /// Typed view over whichever of the two known shapes the payload matches.
    pub fn shape(&self) -> Option<MessageShape> {
        MessageShape::deserialize(&self.0).ok()
    }

    /// Message text from `text` or `message`.
    pub fn text(&self) -> Option<&str> {
        self.str_field("text").or_else(|| self.str_field("message"))
    }

    pub fn client_temp_id(&self) -> Option<&str> {
        self.str_field("clientTempId")
    }

    /// Send time from `timestamp` or `createdAt`, as RFC 3339 or epoch millis.
    pub fn sent_at(&self) -> Option<DateTime<Utc>> {
        ["timestamp", "createdAt"]
            .iter()
            .filter_map(|key| self.0.get(*key))
            .find_map(parse_instant)
    }

    fn str_field(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }
}

fn parse_instant(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        Value::Number(n) => n
            .as_i64()
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
        _ => None,
    }
}

/// The two message shapes observed from the backend.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum MessageShape {
    Standard {
        #[serde(rename = "fromUserId", deserialize_with = "id_string")]
        from_user_id: String,
        #[serde(rename = "toUserId", deserialize_with = "id_string")]
        to_user_id: String,
        text: String,
        #[serde(default)]
        timestamp: Option<Value>,
    },
    Alternate {
        #[serde(rename = "fromId", deserialize_with = "id_string")]
        from_id: String,
        #[serde(rename = "toId", deserialize_with = "id_string")]
        to_id: String,
        message: String,
        #[serde(rename = "createdAt", default)]
        created_at: Option<Value>,
    },
}

impl MessageShape {
    pub fn sender(&self) -> &str {
        match self {
            MessageShape::Standard { from_user_id, .. } => from_user_id,
            MessageShape::Alternate { from_id, .. } => from_id,
        }
    }

    pub fn recipient(&self) -> &str {
        match self {
            MessageShape::Standard { to_user_id, .. } => to_user_id,
            MessageShape::Alternate { to_id, .. } => to_id,
        }
    }

    pub fn text(&self) -> &str {
        match self {
            MessageShape::Standard { text, .. } => text,
            MessageShape::Alternate { message, .. } => message,
        }
    }
}

/// Ids arrive as strings or numbers depending on the endpoint.
fn id_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number id, got {other}"
        ))),
    }
}

/// Events the session sends.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    Register(RegisterPayload),
    SendMessage(OutboundMessage),
}

impl ClientEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::Register(_) => events::REGISTER_SOCKET,
            ClientEvent::SendMessage(_) => events::SEND_MESSAGE,
        }
    }

    pub fn payload(&self) -> Result<Value, serde_json::Error> {
        match self {
            ClientEvent::Register(p) => serde_json::to_value(p),
            ClientEvent::SendMessage(m) => serde_json::to_value(m),
        }
    }
}

/// Events the backend pushes to subscribers.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    Message(InboundMessage),
    Error(Value),
    ReadReceipt(Value),
    ChatDeleted(Value),
}

impl ServerEvent {
    /// Map a wire event to a known variant; `None` for names we don't handle.
    pub fn from_wire(name: &str, data: Value) -> Option<Self> {
        let event = match name {
            events::MESSAGE => ServerEvent::Message(InboundMessage::new(data)),
            events::ERROR => ServerEvent::Error(data),
            events::READ_RECEIPT => ServerEvent::ReadReceipt(data),
            events::CHAT_DELETED => ServerEvent::ChatDeleted(data),
            _ => return None,
        };
        Some(event)
    }

    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::Message(_) => events::MESSAGE,
            ServerEvent::Error(_) => events::ERROR,
            ServerEvent::ReadReceipt(_) => events::READ_RECEIPT,
            ServerEvent::ChatDeleted(_) => events::CHAT_DELETED,
        }
    }

    pub fn as_message(&self) -> Option<&InboundMessage> {
        match self {
            ServerEvent::Message(m) => Some(m),
            _ => None,
        }
    }

    pub fn payload(&self) -> &Value {
        match self {
            ServerEvent::Message(m) => m.raw(),
            ServerEvent::Error(v) | ServerEvent::ReadReceipt(v) | ServerEvent::ChatDeleted(v) => v,
        }
    }
}
