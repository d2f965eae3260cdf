//! Bijou client - real-time chat session
//!
//! Keeps one authenticated Socket.IO connection to the marketplace chat
//! backend alive across network drops and credential changes, and fans
//! inbound events out to UI subscribers.

pub mod config;
pub mod logging;
pub mod ws;

pub use bijou_shared as shared;
pub use config::{ConfigError, SessionConfig};
pub use ws::{BackoffPolicy, ChatSession, ConnectionState, Subscription};
