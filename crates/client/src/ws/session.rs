//! The session controller: owns the one live connection and reacts to
//! credential changes.

use std::sync::{Arc, Weak};

use bijou_shared::{Credential, OutboundMessage, ServerEvent};
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::connection::{
    ConnectionEvent, ConnectionState, Connector, TungsteniteConnector, WsConnection, WsHandle,
};
use super::multiplexer::{EventMultiplexer, Subscriber, Subscription};
use super::{dispatcher, factory, handshake};
use crate::config::SessionConfig;

/// A real-time chat session.
///
/// Cheap to clone; all clones drive the same connection. Construct one per
/// app (or per test) and hand it to whatever needs it.
#[derive(Clone)]
pub struct ChatSession {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    config: SessionConfig,
    connector: Arc<dyn Connector>,
    subscribers: EventMultiplexer,
    state: watch::Sender<ConnectionState>,
    slot: Mutex<Slot>,
}

#[derive(Default)]
struct Slot {
    active: Option<Active>,
    /// Task of the last torn-down connection, awaited by the next one.
    retiring: Option<JoinHandle<()>>,
    next_generation: u64,
}

struct Active {
    generation: u64,
    credential: Credential,
    connection: WsConnection,
    handle: WsHandle,
    /// False once a bounded backoff policy has given up.
    live: bool,
}

impl ChatSession {
    pub fn new(config: SessionConfig, connector: Arc<dyn Connector>) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            inner: Arc::new(SessionInner {
                config,
                connector,
                subscribers: EventMultiplexer::new(),
                state,
                slot: Mutex::new(Slot::default()),
            }),
        }
    }

    /// Session dialing real websockets, configured from the environment.
    pub fn from_env() -> Self {
        Self::new(SessionConfig::from_env(), Arc::new(TungsteniteConnector))
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    /// Start a session for `credential`.
    pub fn init(&self, credential: Credential) {
        self.set_credential(Some(credential));
    }

    /// Close the session, if any. Safe to call repeatedly.
    pub fn teardown(&self) {
        self.set_credential(None);
    }

    /// Apply the auth store's current credential.
    ///
    /// An equal credential with a live session is a no-op, so this can be
    /// called on every UI render. Anything else tears the old connection
    /// down before a new one is built; a missing or blank token leaves the
    /// session disconnected.
    pub fn set_credential(&self, credential: Option<Credential>) {
        let credential = credential.filter(Credential::has_token);
        let mut slot = self.inner.slot.lock();

        let Some(credential) = credential else {
            self.inner.teardown_locked(&mut slot);
            return;
        };

        if let Some(active) = slot.active.as_ref() {
            if active.live && active.credential == credential {
                crate::log_debug!(
                    "Credential unchanged; keeping session generation {}",
                    active.generation
                );
                return;
            }
        }

        self.inner.teardown_locked(&mut slot);
        self.inner.build_locked(&mut slot, credential);
    }

    /// The credential of the current session, if one exists.
    pub fn credential(&self) -> Option<Credential> {
        self.inner
            .slot
            .lock()
            .active
            .as_ref()
            .map(|a| a.credential.clone())
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    /// Follow state changes, e.g. to disable a send button while reconnecting.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    /// Receive every inbound event until the returned subscription is disposed.
    /// Works before any session exists.
    pub fn subscribe(&self, callback: Subscriber) -> Subscription {
        self.inner.subscribers.subscribe(callback)
    }

    /// Send a chat message. Returns false (and logs) when not connected;
    /// nothing is queued.
    pub fn send(&self, message: OutboundMessage) -> bool {
        let slot = self.inner.slot.lock();
        let handle = slot.active.as_ref().map(|a| &a.handle);
        dispatcher::dispatch(handle, self.state(), message)
    }
}

impl PartialEq for ChatSession {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl std::fmt::Debug for ChatSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatSession")
            .field("endpoint", &self.inner.config.endpoint)
            .field("state", &self.state())
            .field("subscribers", &self.inner.subscribers.len())
            .finish()
    }
}

impl SessionInner {
    fn publish(&self, next: ConnectionState) {
        self.state.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
    }

    fn teardown_locked(&self, slot: &mut Slot) {
        if let Some(active) = slot.active.take() {
            crate::log_info!(
                "Tearing down chat session generation {}",
                active.generation
            );
            if let Some(task) = active.connection.shutdown() {
                slot.retiring = Some(task);
            }
        }
        self.publish(ConnectionState::Disconnected);
    }

    fn build_locked(self: &Arc<Self>, slot: &mut Slot, credential: Credential) {
        let mut connection =
            match factory::build_connection(&credential, &self.config, self.connector.clone()) {
                Ok(connection) => connection,
                Err(e) => {
                    crate::log_error!("Not starting chat session: {}", e);
                    return;
                }
            };

        let generation = slot.next_generation;
        slot.next_generation += 1;

        let weak: Weak<Self> = Arc::downgrade(self);
        connection.on_event(move |event| {
            if let Some(inner) = weak.upgrade() {
                inner.on_connection_event(generation, event);
            }
        });

        let handle = connection.handle();
        if !connection.start(slot.retiring.take()) {
            return;
        }

        crate::log_info!(
            "Starting chat session generation {} to {}",
            generation,
            connection.url()
        );
        slot.active = Some(Active {
            generation,
            credential,
            connection,
            handle,
            live: true,
        });
        self.publish(ConnectionState::Connecting);
    }

    fn on_connection_event(&self, generation: u64, event: ConnectionEvent) {
        if let ConnectionEvent::Inbound(event) = event {
            self.on_inbound(generation, event);
            return;
        }

        let mut slot = self.slot.lock();
        let Some(active) = slot
            .active
            .as_mut()
            .filter(|a| a.generation == generation)
        else {
            crate::log_debug!("Dropping event from stale generation {}", generation);
            return;
        };

        match event {
            ConnectionEvent::Connected => {
                // Registration goes out before anyone sees Connected.
                handshake::register_identity(&active.handle, &active.credential);
                self.publish(ConnectionState::Connected);
            }
            ConnectionEvent::Disconnected { reason } => {
                crate::log_warn!("Chat session lost its transport: {}", reason);
                self.publish(ConnectionState::Connecting);
            }
            ConnectionEvent::Error { reason } => {
                crate::log_debug!("Chat connect attempt failed: {}", reason);
                self.publish(ConnectionState::Connecting);
            }
            ConnectionEvent::GaveUp => {
                active.live = false;
                self.publish(ConnectionState::Disconnected);
            }
            ConnectionEvent::Inbound(_) => {}
        }
    }

    fn on_inbound(&self, generation: u64, event: ServerEvent) {
        let current = self
            .slot
            .lock()
            .active
            .as_ref()
            .is_some_and(|a| a.generation == generation);
        if !current {
            crate::log_debug!("Dropping {} from stale generation {}", event.name(), generation);
            return;
        }

        if let ServerEvent::Error(payload) = &event {
            crate::log_warn!("Chat backend reported an error: {}", payload);
        }
        self.subscribers.dispatch(&event);
    }
}
