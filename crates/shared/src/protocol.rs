//! Engine.IO v4 / Socket.IO v5 text packet codec.
//!
//! Only what a websocket-only client needs: the open handshake, ping/pong,
//! namespace connect/disconnect and JSON events. Binary attachments are
//! rejected.

use serde::Deserialize;
use serde_json::Value;

use crate::error::ProtocolError;
use crate::models::ClientEvent;

/// Path the backend mounts its Socket.IO endpoint on.
pub const HANDSHAKE_PATH: &str = "/socket.io/";
/// Engine.IO protocol revision sent in the query string.
pub const ENGINE_IO_VERSION: &str = "4";
/// The only transport we speak.
pub const TRANSPORT: &str = "websocket";

/// Defaults the server overrides in its open packet.
pub const DEFAULT_PING_INTERVAL_MS: u64 = 25_000;
pub const DEFAULT_PING_TIMEOUT_MS: u64 = 20_000;

/// Body of the Engine.IO open packet.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenPayload {
    pub sid: String,
    #[serde(default)]
    pub upgrades: Vec<String>,
    #[serde(default = "default_ping_interval")]
    pub ping_interval: u64,
    #[serde(default = "default_ping_timeout")]
    pub ping_timeout: u64,
    #[serde(default)]
    pub max_payload: Option<u64>,
}

fn default_ping_interval() -> u64 {
    DEFAULT_PING_INTERVAL_MS
}

fn default_ping_timeout() -> u64 {
    DEFAULT_PING_TIMEOUT_MS
}

/// Outer Engine.IO packet.
#[derive(Debug, Clone, PartialEq)]
pub enum EnginePacket {
    Open(OpenPayload),
    Close,
    Ping,
    Pong,
    Message(SocketPacket),
    Noop,
}

/// Socket.IO packet carried inside an Engine.IO message.
#[derive(Debug, Clone, PartialEq)]
pub enum SocketPacket {
    Connect {
        namespace: Option<String>,
        data: Option<Value>,
    },
    Disconnect {
        namespace: Option<String>,
    },
    Event {
        namespace: Option<String>,
        ack_id: Option<u64>,
        name: String,
        data: Value,
    },
    ConnectError {
        namespace: Option<String>,
        data: Value,
    },
}

impl SocketPacket {
    pub fn namespace(&self) -> Option<&str> {
        match self {
            SocketPacket::Connect { namespace, .. }
            | SocketPacket::Disconnect { namespace }
            | SocketPacket::Event { namespace, .. }
            | SocketPacket::ConnectError { namespace, .. } => namespace.as_deref(),
        }
    }

    /// Packets for the default namespace only.
    pub fn is_default_namespace(&self) -> bool {
        matches!(self.namespace(), None | Some("/"))
    }
}

impl EnginePacket {
    /// Namespace connect carrying the auth payload.
    pub fn connect(auth: Value) -> Self {
        EnginePacket::Message(SocketPacket::Connect {
            namespace: None,
            data: Some(auth),
        })
    }

    pub fn disconnect() -> Self {
        EnginePacket::Message(SocketPacket::Disconnect { namespace: None })
    }

    pub fn event(name: impl Into<String>, data: Value) -> Self {
        EnginePacket::Message(SocketPacket::Event {
            namespace: None,
            ack_id: None,
            name: name.into(),
            data,
        })
    }

    /// Frame a client event for the wire.
    pub fn from_client_event(event: &ClientEvent) -> Result<Self, ProtocolError> {
        Ok(Self::event(event.name(), event.payload()?))
    }

    pub fn encode(&self) -> Result<String, ProtocolError> {
        let frame = match self {
            EnginePacket::Open(_) => {
                // Server-only; clients never send it.
                return Err(ProtocolError::MalformedEvent(
                    "open packets are not encoded by clients".into(),
                ));
            }
            EnginePacket::Close => "1".to_string(),
            EnginePacket::Ping => "2".to_string(),
            EnginePacket::Pong => "3".to_string(),
            EnginePacket::Noop => "6".to_string(),
            EnginePacket::Message(packet) => format!("4{}", encode_socket(packet)?),
        };
        Ok(frame)
    }

    pub fn decode(frame: &str) -> Result<Self, ProtocolError> {
        let mut chars = frame.chars();
        let kind = chars.next().ok_or(ProtocolError::Empty)?;
        let rest = chars.as_str();
        match kind {
            '0' => Ok(EnginePacket::Open(serde_json::from_str(rest)?)),
            '1' => Ok(EnginePacket::Close),
            '2' => Ok(EnginePacket::Ping),
            '3' => Ok(EnginePacket::Pong),
            '4' => Ok(EnginePacket::Message(decode_socket(rest)?)),
            '6' => Ok(EnginePacket::Noop),
            other => Err(ProtocolError::UnknownEnginePacket(other)),
        }
    }
}

fn encode_socket(packet: &SocketPacket) -> Result<String, ProtocolError> {
    let (kind, namespace, ack_id, body) = match packet {
        SocketPacket::Connect { namespace, data } => (
            '0',
            namespace,
            None,
            data.as_ref().map(serde_json::to_string).transpose()?,
        ),
        SocketPacket::Disconnect { namespace } => ('1', namespace, None, None),
        SocketPacket::Event {
            namespace,
            ack_id,
            name,
            data,
        } => (
            '2',
            namespace,
            *ack_id,
            Some(serde_json::to_string(&Value::Array(vec![
                Value::String(name.clone()),
                data.clone(),
            ]))?),
        ),
        SocketPacket::ConnectError { namespace, data } => {
            ('4', namespace, None, Some(serde_json::to_string(data)?))
        }
    };

    let mut out = String::new();
    out.push(kind);
    if let Some(ns) = namespace.as_deref().filter(|ns| *ns != "/") {
        out.push_str(ns);
        out.push(',');
    }
    if let Some(id) = ack_id {
        out.push_str(&id.to_string());
    }
    if let Some(body) = body {
        out.push_str(&body);
    }
    Ok(out)
}

fn decode_socket(input: &str) -> Result<SocketPacket, ProtocolError> {
    let mut chars = input.chars();
    let kind = chars.next().ok_or(ProtocolError::Empty)?;
    if matches!(kind, '5' | '6') {
        return Err(ProtocolError::Binary);
    }
    let mut rest = chars.as_str();

    let namespace = if rest.starts_with('/') {
        let end = rest.find(',').unwrap_or(rest.len());
        let ns = rest[..end].to_string();
        rest = rest.get(end + 1..).unwrap_or("");
        Some(ns)
    } else {
        None
    };

    let digits = rest.bytes().take_while(u8::is_ascii_digit).count();
    let ack_id = if digits > 0 {
        let id = rest[..digits]
            .parse()
            .map_err(|_| ProtocolError::MalformedEvent(format!("bad ack id in {input:?}")))?;
        rest = &rest[digits..];
        Some(id)
    } else {
        None
    };

    let body = if rest.is_empty() {
        None
    } else {
        Some(serde_json::from_str::<Value>(rest)?)
    };

    match kind {
        '0' => Ok(SocketPacket::Connect {
            namespace,
            data: body,
        }),
        '1' => Ok(SocketPacket::Disconnect { namespace }),
        '2' => {
            let Some(Value::Array(mut items)) = body else {
                return Err(ProtocolError::MalformedEvent(
                    "event body is not an array".into(),
                ));
            };
            if items.is_empty() {
                return Err(ProtocolError::MalformedEvent("event has no name".into()));
            }
            let name = match items.remove(0) {
                Value::String(name) => name,
                other => {
                    return Err(ProtocolError::MalformedEvent(format!(
                        "event name is not a string: {other}"
                    )))
                }
            };
            let data = if items.is_empty() {
                Value::Null
            } else {
                items.remove(0)
            };
            Ok(SocketPacket::Event {
                namespace,
                ack_id,
                name,
                data,
            })
        }
        '4' => Ok(SocketPacket::ConnectError {
            namespace,
            data: body.unwrap_or(Value::Null),
        }),
        other => Err(ProtocolError::UnknownSocketPacket(other)),
    }
}

/// Human-readable reason out of a CONNECT_ERROR body.
pub fn connect_error_reason(data: &Value) -> String {
    data.get("message")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| data.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{OutboundMessage, RegisterPayload};
    use serde_json::json;

    #[test]
    fn decodes_open_handshake() {
        let packet = EnginePacket::decode(
            r#"0{"sid":"abc","upgrades":[],"pingInterval":300,"pingTimeout":200,"maxPayload":1000000}"#,
        )
        .unwrap();
        let EnginePacket::Open(open) = packet else {
            panic!("expected open packet, got {packet:?}");
        };
        assert_eq!(open.sid, "abc");
        assert_eq!(open.ping_interval, 300);
        assert_eq!(open.ping_timeout, 200);
    }

    #[test]
    fn open_handshake_falls_back_to_default_timers() {
        let EnginePacket::Open(open) = EnginePacket::decode(r#"0{"sid":"x"}"#).unwrap() else {
            panic!("expected open packet");
        };
        assert_eq!(open.ping_interval, DEFAULT_PING_INTERVAL_MS);
        assert_eq!(open.ping_timeout, DEFAULT_PING_TIMEOUT_MS);
    }

    #[test]
    fn encodes_connect_with_auth() {
        let frame = EnginePacket::connect(json!({"token": "t1"})).encode().unwrap();
        assert_eq!(frame, r#"40{"token":"t1"}"#);
        assert_eq!(EnginePacket::disconnect().encode().unwrap(), "41");
        assert_eq!(EnginePacket::Pong.encode().unwrap(), "3");
    }

    #[test]
    fn decodes_connect_ack_and_errors() {
        assert_eq!(
            EnginePacket::decode(r#"40{"sid":"s"}"#).unwrap(),
            EnginePacket::Message(SocketPacket::Connect {
                namespace: None,
                data: Some(json!({"sid": "s"}))
            })
        );
        let EnginePacket::Message(SocketPacket::ConnectError { data, .. }) =
            EnginePacket::decode(r#"44{"message":"invalid token"}"#).unwrap()
        else {
            panic!("expected connect error");
        };
        assert_eq!(connect_error_reason(&data), "invalid token");
    }

    #[test]
    fn decodes_events_with_namespace_and_ack() {
        let packet = EnginePacket::decode(r#"42/chat,17["message",{"text":"hi"}]"#).unwrap();
        let EnginePacket::Message(socket) = packet else {
            panic!("expected message");
        };
        assert!(!socket.is_default_namespace());
        assert_eq!(
            socket,
            SocketPacket::Event {
                namespace: Some("/chat".into()),
                ack_id: Some(17),
                name: "message".into(),
                data: json!({"text": "hi"}),
            }
        );
    }

    #[test]
    fn event_without_data_is_null() {
        let EnginePacket::Message(SocketPacket::Event { data, .. }) =
            EnginePacket::decode(r#"42["chat_deleted"]"#).unwrap()
        else {
            panic!("expected event");
        };
        assert_eq!(data, Value::Null);
    }

    #[test]
    fn client_events_frame_as_socket_events() {
        let register = ClientEvent::Register(RegisterPayload {
            user_id: "u1".into(),
        });
        assert_eq!(
            EnginePacket::from_client_event(&register)
                .unwrap()
                .encode()
                .unwrap(),
            r#"42["register_socket",{"userId":"u1"}]"#
        );

        let send = ClientEvent::SendMessage(
            OutboundMessage::to_user("s1", "hello").with_client_temp_id("tmp-1"),
        );
        let frame = EnginePacket::from_client_event(&send)
            .unwrap()
            .encode()
            .unwrap();
        let EnginePacket::Message(SocketPacket::Event { name, data, .. }) =
            EnginePacket::decode(&frame).unwrap()
        else {
            panic!("expected event");
        };
        assert_eq!(name, "send_message");
        assert_eq!(data["clientTempId"], "tmp-1");
    }

    #[test]
    fn rejects_garbage() {
        assert!(matches!(EnginePacket::decode(""), Err(ProtocolError::Empty)));
        assert!(matches!(
            EnginePacket::decode("9"),
            Err(ProtocolError::UnknownEnginePacket('9'))
        ));
        assert!(matches!(
            EnginePacket::decode(r#"451-["file",{"_placeholder":true,"num":0}]"#),
            Err(ProtocolError::Binary)
        ));
        assert!(matches!(
            EnginePacket::decode(r#"42{"not":"an array"}"#),
            Err(ProtocolError::MalformedEvent(_))
        ));
    }
}
