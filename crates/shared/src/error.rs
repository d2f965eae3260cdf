//! Shared error types for the wire codec and the transport seam.

use thiserror::Error;

/// A frame that could not be decoded as an Engine.IO / Socket.IO packet.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("empty frame")]
    Empty,
    #[error("unknown engine packet type {0:?}")]
    UnknownEnginePacket(char),
    #[error("unknown socket packet type {0:?}")]
    UnknownSocketPacket(char),
    #[error("binary socket packets are not supported")]
    Binary,
    #[error("malformed event packet: {0}")]
    MalformedEvent(String),
    #[error("invalid JSON payload: {0}")]
    Json(#[from] serde_json::Error),
}

/// Failures raised while dialing or talking to the chat backend.
///
/// These never reach application code: the connection task logs them and
/// goes through its retry loop.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connect failed: {0}")]
    Connect(String),
    #[error("socket error: {0}")]
    Socket(String),
    #[error("connection closed by peer")]
    Closed,
    #[error("handshake rejected: {0}")]
    Rejected(String),
    #[error("timed out after {0:?}")]
    Timeout(std::time::Duration),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}
