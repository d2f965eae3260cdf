//! Native WebSocket implementation using tokio-tungstenite.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bijou_shared::{
    connect_error_reason, EnginePacket, ServerEvent, SocketPacket, TransportError,
    DEFAULT_PING_INTERVAL_MS, DEFAULT_PING_TIMEOUT_MS,
};
use futures_util::{future, SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{sleep, sleep_until, timeout, timeout_at, Instant};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use url::Url;

use super::{
    BackoffPolicy, ConnectionEvent, Connector, EventHandlers, FrameSink, FrameStream, WsHandle,
};

/// How long a graceful close may take before the socket is simply dropped.
const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// Upper bound on the silence allowed by a server's ping settings.
const MAX_LIVENESS: Duration = Duration::from_secs(60 * 60);

/// Dials real websockets.
#[derive(Debug, Clone, Copy, Default)]
pub struct TungsteniteConnector;

#[async_trait]
impl Connector for TungsteniteConnector {
    async fn connect(&self, url: &Url) -> Result<(FrameSink, FrameStream), TransportError> {
        let (ws_stream, _response) = connect_async(url.as_str())
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        let (write, read) = ws_stream.split();

        let sink = write
            .sink_map_err(|e| TransportError::Socket(e.to_string()))
            .with(|frame: String| future::ready(Ok::<_, TransportError>(Message::text(frame))));

        let stream = read.filter_map(|msg| {
            future::ready(match msg {
                Ok(Message::Text(text)) => Some(Ok(text.as_str().to_owned())),
                Ok(Message::Close(_)) => Some(Err(TransportError::Closed)),
                Ok(Message::Binary(_)) => {
                    crate::log_debug!("Ignoring binary websocket frame");
                    None
                }
                // Pong is handled automatically by tungstenite
                Ok(_) => None,
                Err(e) => Some(Err(TransportError::Socket(e.to_string()))),
            })
        });

        Ok((Box::pin(sink), Box::pin(stream)))
    }
}

/// A single-use connection to the chat backend.
///
/// Built inert by the connection factory; [`WsConnection::start`] spawns the
/// task that dials, handshakes and retries. Owned exclusively by the session
/// controller.
pub struct WsConnection {
    url: Url,
    auth: Value,
    backoff: BackoffPolicy,
    connect_timeout: Duration,
    connector: Arc<dyn Connector>,
    handlers: Arc<EventHandlers>,
    sender: tokio::sync::mpsc::UnboundedSender<String>,
    receiver: Option<UnboundedReceiver<String>>,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl WsConnection {
    pub(crate) fn new(
        url: Url,
        auth: Value,
        backoff: BackoffPolicy,
        connect_timeout: Duration,
        connector: Arc<dyn Connector>,
    ) -> Self {
        let (sender, receiver) = unbounded_channel();
        Self {
            url,
            auth,
            backoff,
            connect_timeout,
            connector,
            handlers: Arc::new(EventHandlers::default()),
            sender,
            receiver: Some(receiver),
            shutdown: None,
            task: None,
        }
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Get a handle for sending events
    pub fn handle(&self) -> WsHandle {
        WsHandle::new(self.sender.clone())
    }

    /// Route transport events to `handler`, replacing any previous one.
    pub fn on_event(&self, handler: impl Fn(ConnectionEvent) + Send + Sync + 'static) {
        self.handlers.attach(Arc::new(handler));
    }

    /// Spawn the connection loop. `previous` is the task of the connection
    /// this one replaces; dialing waits until it has fully closed.
    ///
    /// Returns false if the connection was already started or no tokio
    /// runtime is available.
    pub fn start(&mut self, previous: Option<JoinHandle<()>>) -> bool {
        let Some(receiver) = self.receiver.take() else {
            crate::log_warn!("WsConnection::start called twice for {}", self.url);
            return false;
        };
        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(e) => {
                crate::log_error!("Cannot start connection to {}: {}", self.url, e);
                return false;
            }
        };

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        self.shutdown = Some(shutdown_tx);

        let ctx = LoopContext {
            url: self.url.clone(),
            auth: self.auth.clone(),
            backoff: self.backoff.clone(),
            connect_timeout: self.connect_timeout,
            connector: self.connector.clone(),
            handlers: self.handlers.clone(),
        };
        self.task = Some(runtime.spawn(run_connection_loop(
            ctx,
            receiver,
            shutdown_rx,
            previous,
        )));
        true
    }

    /// Tear the connection down.
    ///
    /// Order matters: the shutdown signal cancels a pending reconnect timer,
    /// then the handlers are detached, then the task closes the socket. The
    /// returned task finishes once the socket is gone.
    pub fn shutdown(mut self) -> Option<JoinHandle<()>> {
        self.stop();
        self.task.take()
    }

    fn stop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        self.handlers.detach();
    }
}

impl Drop for WsConnection {
    fn drop(&mut self) {
        self.stop();
    }
}

struct LoopContext {
    url: Url,
    auth: Value,
    backoff: BackoffPolicy,
    connect_timeout: Duration,
    connector: Arc<dyn Connector>,
    handlers: Arc<EventHandlers>,
}

/// How one dial-to-drop cycle ended.
enum Outcome {
    /// Was connected, then the transport went away.
    Dropped(String),
    /// Never reached connected.
    Failed(TransportError),
    Shutdown,
}

async fn run_connection_loop(
    ctx: LoopContext,
    mut outbound: UnboundedReceiver<String>,
    mut shutdown: oneshot::Receiver<()>,
    previous: Option<JoinHandle<()>>,
) {
    // Never two transports at once: let the old socket finish closing first.
    if let Some(previous) = previous {
        let _ = previous.await;
    }

    let mut attempt = 0u32;
    loop {
        match run_once(&ctx, &mut outbound, &mut shutdown).await {
            Outcome::Shutdown => break,
            Outcome::Dropped(reason) => {
                crate::log_info!("WebSocket to {} closed: {}", ctx.url, reason);
                attempt = 0;
                ctx.handlers.emit(ConnectionEvent::Disconnected { reason });
            }
            Outcome::Failed(e) => {
                crate::log_warn!("WebSocket error for {}: {}", ctx.url, e);
                ctx.handlers.emit(ConnectionEvent::Error {
                    reason: e.to_string(),
                });
            }
        }

        if !ctx.backoff.allows_attempt(attempt) {
            crate::log_error!(
                "Giving up on {} after {} reconnect attempts",
                ctx.url,
                attempt
            );
            ctx.handlers.emit(ConnectionEvent::GaveUp);
            break;
        }

        let delay = ctx.backoff.delay_for_attempt(attempt);
        crate::log_info!(
            "Reconnecting to {} in {:?} (attempt {})",
            ctx.url,
            delay,
            attempt + 1
        );
        tokio::select! {
            biased;
            _ = &mut shutdown => break,
            _ = sleep(delay) => {}
        }
        attempt += 1;
    }
    crate::log_debug!("Connection loop for {} stopped", ctx.url);
}

async fn run_once(
    ctx: &LoopContext,
    outbound: &mut UnboundedReceiver<String>,
    shutdown: &mut oneshot::Receiver<()>,
) -> Outcome {
    // One budget covers dial, engine open and the namespace ack.
    let handshake_deadline = Instant::now() + ctx.connect_timeout;
    let dial = tokio::select! {
        biased;
        _ = &mut *shutdown => return Outcome::Shutdown,
        dial = timeout_at(handshake_deadline, ctx.connector.connect(&ctx.url)) => dial,
    };
    let (mut sink, mut stream) = match dial {
        Ok(Ok(halves)) => halves,
        Ok(Err(e)) => return Outcome::Failed(e),
        Err(_) => return Outcome::Failed(TransportError::Timeout(ctx.connect_timeout)),
    };

    let mut connected = false;
    let mut liveness = liveness_window(DEFAULT_PING_INTERVAL_MS, DEFAULT_PING_TIMEOUT_MS);
    let mut deadline = handshake_deadline;

    let end = |connected: bool, reason: String| {
        if connected {
            Outcome::Dropped(reason)
        } else {
            Outcome::Failed(TransportError::Rejected(reason))
        }
    };

    loop {
        tokio::select! {
            biased;

            _ = &mut *shutdown => {
                close_gracefully(&mut sink, connected).await;
                return Outcome::Shutdown;
            }

            _ = sleep_until(deadline) => {
                return if connected {
                    Outcome::Dropped(format!("no frame for {liveness:?}"))
                } else {
                    Outcome::Failed(TransportError::Timeout(ctx.connect_timeout))
                };
            }

            frame = stream.next() => {
                let text = match frame {
                    Some(Ok(text)) => text,
                    Some(Err(TransportError::Closed)) | None => {
                        return end(connected, "transport closed".into());
                    }
                    Some(Err(e)) => {
                        return if connected {
                            Outcome::Dropped(e.to_string())
                        } else {
                            Outcome::Failed(e)
                        };
                    }
                };
                if connected {
                    deadline = Instant::now() + liveness;
                }

                let packet = match EnginePacket::decode(&text) {
                    Ok(packet) => packet,
                    Err(e) => {
                        crate::log_error!("Failed to parse frame {:?}: {}", text, e);
                        continue;
                    }
                };

                match packet {
                    EnginePacket::Open(open) => {
                        liveness = liveness_window(open.ping_interval, open.ping_timeout);
                        crate::log_debug!("Engine open for {} (sid {})", ctx.url, open.sid);
                        if let Err(e) = send_packet(&mut sink, EnginePacket::connect(ctx.auth.clone())).await {
                            return Outcome::Failed(e);
                        }
                    }
                    EnginePacket::Ping => {
                        if let Err(e) = send_packet(&mut sink, EnginePacket::Pong).await {
                            return end(connected, e.to_string());
                        }
                    }
                    EnginePacket::Close => return end(connected, "server closed the engine".into()),
                    EnginePacket::Pong | EnginePacket::Noop => {}
                    EnginePacket::Message(socket) if !socket.is_default_namespace() => {
                        crate::log_debug!("Ignoring packet for namespace {:?}", socket.namespace());
                    }
                    EnginePacket::Message(SocketPacket::Connect { .. }) => {
                        // Anything queued before this point belongs to a dead transport.
                        let mut stale = 0usize;
                        while outbound.try_recv().is_ok() {
                            stale += 1;
                        }
                        if stale > 0 {
                            crate::log_warn!("Discarded {} frames queued while disconnected", stale);
                        }
                        connected = true;
                        deadline = Instant::now() + liveness;
                        crate::log_info!("WebSocket connected to {}", ctx.url);
                        ctx.handlers.emit(ConnectionEvent::Connected);
                    }
                    EnginePacket::Message(SocketPacket::ConnectError { data, .. }) => {
                        return Outcome::Failed(TransportError::Rejected(connect_error_reason(&data)));
                    }
                    EnginePacket::Message(SocketPacket::Disconnect { .. }) => {
                        return end(connected, "server disconnected the session".into());
                    }
                    EnginePacket::Message(SocketPacket::Event { name, data, .. }) => {
                        match ServerEvent::from_wire(&name, data) {
                            Some(event) => ctx.handlers.emit(ConnectionEvent::Inbound(event)),
                            None => crate::log_debug!("Ignoring unknown event {:?}", name),
                        }
                    }
                }
            }

            frame = outbound.recv(), if connected => {
                // The controller keeps a sender alive, so None only happens on teardown.
                let Some(frame) = frame else {
                    close_gracefully(&mut sink, connected).await;
                    return Outcome::Shutdown;
                };
                if let Err(e) = sink.send(frame).await {
                    return Outcome::Dropped(e.to_string());
                }
            }
        }
    }
}

/// How long a connected transport may stay silent. Server-supplied, so clamped.
fn liveness_window(ping_interval_ms: u64, ping_timeout_ms: u64) -> Duration {
    Duration::from_millis(ping_interval_ms.saturating_add(ping_timeout_ms)).min(MAX_LIVENESS)
}

async fn send_packet(sink: &mut FrameSink, packet: EnginePacket) -> Result<(), TransportError> {
    let frame = packet.encode()?;
    sink.send(frame).await
}

async fn close_gracefully(sink: &mut FrameSink, connected: bool) {
    let close = async {
        if connected {
            let _ = send_packet(sink, EnginePacket::disconnect()).await;
        }
        let _ = sink.close().await;
    };
    if timeout(CLOSE_GRACE, close).await.is_err() {
        crate::log_warn!("Graceful close timed out; dropping socket");
    }
}
