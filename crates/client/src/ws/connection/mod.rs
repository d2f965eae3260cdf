//! WebSocket connection with state management and auto-reconnect.
//!
//! This module provides the shared types; the connection task itself lives
//! in `connection_native`.

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bijou_shared::{ClientEvent, EnginePacket, ServerEvent, TransportError};
use futures_util::{Sink, Stream};
use parking_lot::Mutex;
use tokio::sync::mpsc::UnboundedSender;
use url::Url;

/// Connection state of the session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }
}

/// Configuration for auto-reconnect behavior
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    /// Delay before the first retry
    pub initial_delay: Duration,
    /// Upper bound for any single delay
    pub max_delay: Duration,
    /// Growth factor per attempt; values below 1.0 are treated as 1.0
    pub multiplier: f64,
    /// Maximum number of consecutive retries (None = retry forever)
    pub max_attempts: Option<u32>,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_millis(5000),
            multiplier: 2.0,
            max_attempts: None,
        }
    }
}

impl BackoffPolicy {
    /// Calculate delay for a given attempt number (0-based)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let factor = self.multiplier.max(1.0).powi(exponent);
        let millis = (self.initial_delay.as_millis() as f64 * factor)
            .min(self.max_delay.as_millis() as f64);
        Duration::from_millis(millis as u64)
    }

    /// Whether retry number `attempt` (0-based) may still run.
    pub fn allows_attempt(&self, attempt: u32) -> bool {
        self.max_attempts.map_or(true, |max| attempt < max)
    }
}

/// Sending half of a dialed transport: one text frame per item.
pub type FrameSink = Pin<Box<dyn Sink<String, Error = TransportError> + Send>>;
/// Receiving half of a dialed transport.
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<String, TransportError>> + Send>>;

/// Dials the raw text-frame transport the Socket.IO session runs over.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self, url: &Url) -> Result<(FrameSink, FrameStream), TransportError>;
}

/// Transport-level events surfaced to the controller.
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    /// Namespace connect acknowledged.
    Connected,
    /// An established transport dropped; a retry follows.
    Disconnected { reason: String },
    /// A dial or handshake failed; a retry follows unless attempts are exhausted.
    Error { reason: String },
    /// The backoff policy ran out of attempts.
    GaveUp,
    Inbound(ServerEvent),
}

type Handler = Arc<dyn Fn(ConnectionEvent) + Send + Sync>;

/// The handler slot a connection reports through; detachable in one step.
#[derive(Default)]
pub(crate) struct EventHandlers {
    slot: Mutex<Option<Handler>>,
}

impl EventHandlers {
    pub(crate) fn attach(&self, handler: Handler) {
        *self.slot.lock() = Some(handler);
    }

    pub(crate) fn detach(&self) {
        self.slot.lock().take();
    }

    pub(crate) fn emit(&self, event: ConnectionEvent) {
        // Lock only to clone; the handler may re-enter the controller.
        let handler = self.slot.lock().clone();
        if let Some(handler) = handler {
            handler(event);
        }
    }
}

/// Handle for sending events through a WebSocket connection
#[derive(Clone)]
pub struct WsHandle {
    sender: UnboundedSender<String>,
}

impl WsHandle {
    pub(crate) fn new(sender: UnboundedSender<String>) -> Self {
        Self { sender }
    }

    /// Frame and queue an event for the connection task.
    pub fn emit(&self, event: &ClientEvent) -> Result<(), String> {
        let frame = EnginePacket::from_client_event(event)
            .and_then(|packet| packet.encode())
            .map_err(|e| format!("Failed to encode {}: {}", event.name(), e))?;
        crate::log_debug!("WsHandle::emit {}", frame);
        self.sender
            .send(frame)
            .map_err(|e| format!("Failed to send: {}", e))
    }
}

mod connection_native;
pub use connection_native::{TungsteniteConnector, WsConnection};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_policy_matches_backend_client() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(500));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(1000));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(4000));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_millis(5000));
        assert!(policy.allows_attempt(u32::MAX - 1));
    }

    #[test]
    fn delays_never_decrease_and_never_exceed_cap() {
        let policy = BackoffPolicy {
            initial_delay: Duration::from_millis(300),
            max_delay: Duration::from_millis(5000),
            multiplier: 1.7,
            max_attempts: None,
        };
        let mut previous = Duration::ZERO;
        for attempt in 0..200 {
            let delay = policy.delay_for_attempt(attempt);
            assert!(delay <= policy.max_delay, "attempt {attempt}: {delay:?}");
            assert!(delay >= previous, "attempt {attempt} shrank");
            previous = delay;
        }
        assert_eq!(previous, policy.max_delay);
        assert_eq!(policy.delay_for_attempt(u32::MAX), policy.max_delay);
    }

    #[test]
    fn shrinking_multiplier_is_clamped() {
        let policy = BackoffPolicy {
            multiplier: 0.5,
            ..BackoffPolicy::default()
        };
        assert_eq!(policy.delay_for_attempt(5), policy.initial_delay);
    }

    #[test]
    fn bounded_policy_stops() {
        let policy = BackoffPolicy {
            max_attempts: Some(2),
            ..BackoffPolicy::default()
        };
        assert!(policy.allows_attempt(0));
        assert!(policy.allows_attempt(1));
        assert!(!policy.allows_attempt(2));
    }

    #[test]
    fn detached_handlers_stay_silent() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let handlers = EventHandlers::default();
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        handlers.attach(Arc::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        handlers.emit(ConnectionEvent::Connected);
        handlers.detach();
        handlers.emit(ConnectionEvent::Connected);
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }
}
