//! Scripted in-memory chat backend for session tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bijou_client::shared::TransportError;
use bijou_client::ws::{Connector, FrameSink, FrameStream};
use bijou_client::{BackoffPolicy, ChatSession, ConnectionState, SessionConfig};
use futures_channel::mpsc::{unbounded, UnboundedSender};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use url::Url;

pub const OPEN: &str =
    r#"0{"sid":"mock","upgrades":[],"pingInterval":25000,"pingTimeout":20000,"maxPayload":1000000}"#;
pub const CONNECT_ACK: &str = r#"40{"sid":"mock-socket"}"#;
pub const CONNECT_ERROR: &str = r#"44{"message":"unauthorized"}"#;

#[derive(Default)]
struct State {
    dials: AtomicUsize,
    live: AtomicUsize,
    max_live: AtomicUsize,
    refuse: AtomicBool,
    reject: AtomicBool,
    /// Client-to-server frames, tagged with the connection index.
    frames: Mutex<Vec<(usize, String)>>,
    servers: Mutex<Vec<UnboundedSender<Result<String, TransportError>>>>,
}

/// Counts a transport as live until the client drops it.
struct LiveGuard(Arc<State>);

impl LiveGuard {
    fn new(state: Arc<State>) -> Self {
        let now = state.live.fetch_add(1, Ordering::SeqCst) + 1;
        state.max_live.fetch_max(now, Ordering::SeqCst);
        Self(state)
    }
}

impl Drop for LiveGuard {
    fn drop(&mut self) {
        self.0.live.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Clone, Default)]
pub struct MockBackend {
    state: Arc<State>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connector(&self) -> Arc<dyn Connector> {
        Arc::new(self.clone())
    }

    /// Fail every dial until switched back.
    pub fn refuse(&self, refuse: bool) {
        self.state.refuse.store(refuse, Ordering::SeqCst);
    }

    /// Answer namespace connects with CONNECT_ERROR until switched back.
    pub fn reject(&self, reject: bool) {
        self.state.reject.store(reject, Ordering::SeqCst);
    }

    pub fn dials(&self) -> usize {
        self.state.dials.load(Ordering::SeqCst)
    }

    pub fn connections(&self) -> usize {
        self.state.servers.lock().len()
    }

    pub fn live(&self) -> usize {
        self.state.live.load(Ordering::SeqCst)
    }

    pub fn max_live(&self) -> usize {
        self.state.max_live.load(Ordering::SeqCst)
    }

    pub fn frames_for(&self, connection: usize) -> Vec<String> {
        self.state
            .frames
            .lock()
            .iter()
            .filter(|(index, _)| *index == connection)
            .map(|(_, frame)| frame.clone())
            .collect()
    }

    pub fn all_frames(&self) -> Vec<String> {
        self.state
            .frames
            .lock()
            .iter()
            .map(|(_, frame)| frame.clone())
            .collect()
    }

    pub fn registrations(&self, connection: usize) -> Vec<String> {
        self.frames_for(connection)
            .into_iter()
            .filter(|f| f.starts_with(r#"42["register_socket""#))
            .collect()
    }

    pub fn sends(&self, connection: usize) -> Vec<String> {
        self.frames_for(connection)
            .into_iter()
            .filter(|f| f.starts_with(r#"42["send_message""#))
            .collect()
    }

    /// Push a raw server frame down connection `index`.
    pub fn push(&self, connection: usize, frame: &str) {
        if let Some(tx) = self.state.servers.lock().get(connection) {
            let _ = tx.unbounded_send(Ok(frame.to_string()));
        }
    }

    /// Simulate the network dropping connection `index`.
    pub fn drop_connection(&self, connection: usize) {
        if let Some(tx) = self.state.servers.lock().get(connection) {
            tx.close_channel();
        }
    }
}

#[async_trait]
impl Connector for MockBackend {
    async fn connect(&self, _url: &Url) -> Result<(FrameSink, FrameStream), TransportError> {
        self.state.dials.fetch_add(1, Ordering::SeqCst);
        if self.state.refuse.load(Ordering::SeqCst) {
            return Err(TransportError::Connect("connection refused".into()));
        }

        let (to_client, from_server) = unbounded::<Result<String, TransportError>>();
        let (to_server, mut from_client) = unbounded::<String>();
        let guard = LiveGuard::new(self.state.clone());

        let _ = to_client.unbounded_send(Ok(OPEN.to_string()));
        let index = {
            let mut servers = self.state.servers.lock();
            servers.push(to_client.clone());
            servers.len() - 1
        };

        let state = self.state.clone();
        tokio::spawn(async move {
            while let Some(frame) = from_client.next().await {
                state.frames.lock().push((index, frame.clone()));
                if frame.starts_with("40") {
                    let reply = if state.reject.load(Ordering::SeqCst) {
                        CONNECT_ERROR
                    } else {
                        CONNECT_ACK
                    };
                    let _ = to_client.unbounded_send(Ok(reply.to_string()));
                }
            }
        });

        let stream = from_server.map(move |item| {
            let _live = &guard;
            item
        });
        let sink = to_server.sink_map_err(|e| TransportError::Socket(e.to_string()));
        Ok((Box::pin(sink), Box::pin(stream)))
    }
}

pub fn fast_backoff() -> BackoffPolicy {
    BackoffPolicy {
        initial_delay: Duration::from_millis(10),
        max_delay: Duration::from_millis(40),
        multiplier: 2.0,
        max_attempts: None,
    }
}

pub fn session_with(backend: &MockBackend, backoff: BackoffPolicy) -> ChatSession {
    let config = SessionConfig::new("http://chat.test").with_backoff(backoff);
    ChatSession::new(config, backend.connector())
}

pub fn session(backend: &MockBackend) -> ChatSession {
    session_with(backend, fast_backoff())
}

/// Poll `cond` until it holds, failing the test after five seconds.
pub async fn eventually(what: &str, cond: impl Fn() -> bool) {
    let waited = tokio::time::timeout(Duration::from_secs(5), async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(waited.is_ok(), "timed out waiting for {what}");
}

pub async fn wait_connected(session: &ChatSession) {
    eventually("session to connect", || {
        session.state() == ConnectionState::Connected
    })
    .await;
}

/// Let spawned tasks run for a while.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(100)).await;
}

/// Accepts every dial after `delay`, then never sends a frame.
#[derive(Clone)]
pub struct SilentBackend {
    delay: Duration,
    dialed_at: Arc<Mutex<Vec<tokio::time::Instant>>>,
    /// Keeps the server halves open so the client sees silence, not a close.
    held: Arc<Mutex<Vec<UnboundedSender<Result<String, TransportError>>>>>,
}

impl SilentBackend {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            dialed_at: Arc::default(),
            held: Arc::default(),
        }
    }

    pub fn dial_times(&self) -> Vec<tokio::time::Instant> {
        self.dialed_at.lock().clone()
    }
}

#[async_trait]
impl Connector for SilentBackend {
    async fn connect(&self, _url: &Url) -> Result<(FrameSink, FrameStream), TransportError> {
        self.dialed_at.lock().push(tokio::time::Instant::now());
        tokio::time::sleep(self.delay).await;

        let (to_client, from_server) = unbounded::<Result<String, TransportError>>();
        let (to_server, _from_client) = unbounded::<String>();
        self.held.lock().push(to_client);
        let sink = to_server.sink_map_err(|e| TransportError::Socket(e.to_string()));
        Ok((Box::pin(sink), Box::pin(from_server)))
    }
}
