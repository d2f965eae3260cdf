//! WebSocket module for the real-time chat session.
//!
//! This module provides:
//! - A session controller that follows the auth store's credential
//! - Socket.IO over websocket with auto-reconnect and re-registration
//! - Fan-out of inbound events to any number of subscribers
//!
//! # Architecture
//!
//! ```text
//!   credential ──► ChatSession ──(factory)──► WsConnection ──► chat backend
//!                      │  ▲                        │
//!                      │  └── ConnectionEvent ─────┘
//!                      │
//!            ┌─────────┼──────────┐
//!            ▼         ▼          ▼
//!      handshake   multiplexer  dispatcher
//!    (register on   (fan-out to  (send when
//!     connect)      subscribers)  connected)
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! let session = ChatSession::from_env();
//! let sub = session.subscribe(Arc::new(|event: &ServerEvent| {
//!     if let Some(msg) = event.as_message() {
//!         println!("{:?}", msg.text());
//!     }
//! }));
//! session.init(Credential::for_user("u1", token));
//! session.send(OutboundMessage::to_seller("s9", "Is this ring still available?"));
//! // later
//! sub.dispose();
//! session.teardown();
//! ```

mod connection;
mod dispatcher;
mod factory;
mod handshake;
#[cfg(feature = "dioxus")]
mod hooks;
mod multiplexer;
mod session;

pub use connection::{
    BackoffPolicy, ConnectionEvent, ConnectionState, Connector, FrameSink, FrameStream,
    TungsteniteConnector, WsConnection, WsHandle,
};
pub use factory::build_connection;
pub use multiplexer::{EventMultiplexer, Subscriber, Subscription};
pub use session::ChatSession;

#[cfg(feature = "dioxus")]
pub use hooks::{
    use_chat_session, use_chat_subscription, use_connection_state, ChatSessionProvider,
};
