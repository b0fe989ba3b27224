//! Connection to the TradingView chart socket.
//!
//! A [`Client`] owns one WebSocket and multiplexes every chart, study, quote and replay
//! session over it. Outbound packets go through a FIFO queue that is flushed whenever
//! something is enqueued and whenever the receive loop reads from an open socket. Inbound
//! frames are routed by their first data element to the [`SessionRegistry`], anything
//! unaddressed surfaces as a connection level [`ClientEvent`].
//!
//! Two call tiers are exposed: [`Client::connect`] and [`Client::send`] never fail and
//! report problems as [`ClientEvent::Error`], while [`Client::try_connect`] returns a
//! `Result` for `?` based call sites.

use crate::{
    auth::ANONYMOUS_TOKEN,
    error::Error,
    protocol::{Frame, FrameDecoder, Message, encode_message, to_ascii_json},
    streams::timeout::TimeoutStream,
};
use futures::{
    SinkExt, StreamExt,
    stream::{SplitSink, SplitStream},
};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::{
    collections::VecDeque,
    sync::{
        Arc, Weak,
        atomic::{AtomicBool, AtomicU32, Ordering},
    },
    time::Duration,
};
use tokio::{net::TcpStream, sync::broadcast, sync::mpsc, task::JoinHandle};
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async,
    tungstenite::{
        Message as WsMessage,
        client::IntoClientRequest,
        http::{HeaderValue, header::ORIGIN},
    },
};
use health::HealthMonitor;
use tracing::{debug, error, info, warn};

pub mod config;
pub mod event;
pub mod health;
pub mod heartbeat;
pub mod reconnect;
pub mod registry;

pub use config::{ClientConfig, DataServer, ReconnectConfig};
pub use event::{ClientEvent, ConnectionState, ConnectionStatus};
pub use health::HealthReport;
pub use reconnect::{ReconnectStrategy, retry_with_backoff};
pub use registry::{SessionHandler, SessionRegistry};

const ORIGIN_HEADER: &str = "https://www.tradingview.com";

/// Consecutive non-terminal read errors tolerated before the receive loop gives up.
const READ_RETRIES: u32 = 5;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, WsMessage>;
type WsReader = TimeoutStream<SplitStream<WsStream>>;

/// Handle to a TradingView socket connection. Cheap to clone, clones share the connection.
#[derive(Debug, Clone)]
pub struct Client {
    pub(crate) inner: Arc<ClientInner>,
}

#[derive(Debug, Default)]
struct ClientTasks {
    reader: Option<JoinHandle<()>>,
    heartbeat: Option<JoinHandle<()>>,
    supervisor: Option<JoinHandle<()>>,
    failures: Option<mpsc::UnboundedSender<()>>,
}

impl ClientTasks {
    fn abort_connection(&mut self) {
        for task in [self.reader.take(), self.heartbeat.take()].into_iter().flatten() {
            task.abort();
        }
    }
}

pub(crate) struct ClientInner {
    config: ClientConfig,
    registry: SessionRegistry,
    queue: Mutex<VecDeque<String>>,
    decoder: Mutex<FrameDecoder>,
    sink: tokio::sync::Mutex<Option<WsSink>>,
    is_open: AtomicBool,
    is_logged: AtomicBool,
    /// Set once the first connection level frame after a connect has been reported.
    greeted: AtomicBool,
    /// Set by [`Client::end`], stops the supervisor from reconnecting.
    closing: AtomicBool,
    state: RwLock<ConnectionState>,
    reconnect_attempts: AtomicU32,
    health: HealthMonitor,
    events: broadcast::Sender<ClientEvent>,
    tasks: Mutex<ClientTasks>,
}

impl std::fmt::Debug for ClientInner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientInner")
            .field("server", &self.config.server)
            .field("state", &*self.state.read())
            .field("is_open", &self.is_open())
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

impl Client {
    pub fn new(config: ClientConfig) -> Self {
        let (events, _) = broadcast::channel(config.event_buffer_size.max(1));

        Self {
            inner: Arc::new(ClientInner {
                config,
                registry: SessionRegistry::default(),
                queue: Mutex::new(VecDeque::new()),
                decoder: Mutex::new(FrameDecoder::new()),
                sink: tokio::sync::Mutex::new(None),
                is_open: AtomicBool::new(false),
                is_logged: AtomicBool::new(false),
                greeted: AtomicBool::new(false),
                closing: AtomicBool::new(false),
                state: RwLock::new(ConnectionState::Disconnected),
                reconnect_attempts: AtomicU32::new(0),
                health: HealthMonitor::default(),
                events,
                tasks: Mutex::new(ClientTasks::default()),
            }),
        }
    }

    /// Open the socket and authenticate. Returns `false` on failure, the cause is
    /// reported as a [`ClientEvent::Error`].
    pub async fn connect(&self) -> bool {
        self.try_connect().await.is_ok()
    }

    pub async fn try_connect(&self) -> Result<(), Error> {
        self.inner.closing.store(false, Ordering::SeqCst);

        self.inner.ensure_supervisor();

        let result = self.inner.establish().await;
        if let Err(error) = &result {
            self.inner.emit_error(error.clone());
            self.inner.set_state(ConnectionState::Disconnected);
        }

        result
    }

    /// Enqueue `command` and flush the queue if the socket is open. Never fails.
    ///
    /// Object arguments are always JSON-stringified. Array arguments are stringified for
    /// every command except `create_series` and `modify_series`.
    pub async fn send(&self, command: &str, args: Vec<Value>) {
        self.inner.enqueue(command, args);
        self.inner.flush().await;
    }

    /// Stop background tasks, close the socket and fail in-flight correlated requests.
    /// Safe to call repeatedly.
    pub async fn end(&self) {
        self.inner.closing.store(true, Ordering::SeqCst);

        let supervisor = {
            let mut tasks = self.inner.tasks.lock();
            tasks.abort_connection();
            tasks.failures = None;
            tasks.supervisor.take()
        };
        if let Some(supervisor) = supervisor {
            supervisor.abort();
        }

        self.inner.close_sink().await;
        self.inner.mark_closed();
        self.inner.registry.notify_disconnect();
        self.inner.queue.lock().clear();
        self.inner.set_state(ConnectionState::Disconnected);
    }

    /// Receive every connection level event from this point on.
    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.inner.events.subscribe()
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.inner.registry
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    pub fn is_open(&self) -> bool {
        self.inner.is_open()
    }

    pub fn is_logged(&self) -> bool {
        self.inner.is_logged.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state.read()
    }

    /// Framed packets waiting to be written.
    pub fn queued_packets(&self) -> Vec<String> {
        self.inner.queue.lock().iter().cloned().collect()
    }

    pub fn status(&self) -> ConnectionStatus {
        let heartbeat_running = self
            .inner
            .tasks
            .lock()
            .heartbeat
            .as_ref()
            .is_some_and(|task| !task.is_finished());

        ConnectionStatus {
            is_open: self.is_open(),
            is_logged: self.is_logged(),
            state: self.state(),
            server: self.inner.config.server.to_string(),
            heartbeat_running,
            heartbeat_interval: self.inner.config.heartbeat_interval,
            active_sessions: self.inner.registry.len(),
            queued_packets: self.inner.queue.lock().len(),
            reconnect_attempts: self.inner.reconnect_attempts.load(Ordering::SeqCst),
            health: self.health(),
        }
    }

    /// Latency, error and uptime snapshot of the current connection.
    pub fn health(&self) -> HealthReport {
        self.inner.health_report()
    }

    /// `false` when the socket is down, pongs are slow or missing, or transport errors
    /// have piled up since the last reconnect.
    pub fn is_healthy(&self) -> bool {
        self.health().is_healthy
    }

    /// Decode and dispatch raw socket text as the receive loop would.
    #[cfg(test)]
    pub(crate) fn handle_incoming(&self, text: &str) {
        self.inner.handle_incoming(text);
    }
}

impl ClientInner {
    pub(crate) fn is_open(&self) -> bool {
        self.is_open.load(Ordering::SeqCst)
    }

    /// Frame `command` and append it to the send queue without flushing. Used by
    /// session handlers that reply from inside the receive loop.
    pub(crate) fn enqueue(&self, command: &str, args: Vec<Value>) {
        let message = Message::new(command, encode_args(command, args));
        self.queue.lock().push_back(encode_message(&message));
    }

    fn set_state(&self, state: ConnectionState) {
        let changed = {
            let mut current = self.state.write();
            std::mem::replace(&mut *current, state) != state
        };

        if changed {
            debug!(%state, "TradingView connection state changed");
            self.emit(ClientEvent::StateChanged(state));
        }
    }

    fn emit(&self, event: ClientEvent) {
        let _ = self.events.send(event);
    }

    pub(crate) fn health_report(&self) -> HealthReport {
        let connected = self.is_open() && *self.state.read() == ConnectionState::Connected;
        // Three missed transport pings
        let pong_timeout = self.config.transport_ping_interval.max(config::MIN_INTERVAL) * 3;
        self.health.report(connected, pong_timeout)
    }

    /// Report a socket level failure and count it against connection health.
    fn emit_transport_error(&self, error: Error) {
        self.health.record_error();
        self.emit_error(error);
    }

    pub(crate) fn emit_error(&self, error: Error) {
        if self.events.receiver_count() == 0 {
            error!(%error, "TradingView client error");
            return;
        }
        self.emit(ClientEvent::Error(error));
    }

    /// Open a fresh socket, queue the auth packet and start the per-connection tasks.
    async fn establish(self: &Arc<Self>) -> Result<(), Error> {
        self.set_state(ConnectionState::Connecting);

        let token = self.config.auth.resolve(&self.config.location).await?;
        let socket = open_socket(&self.config).await?;
        let (sink, stream) = socket.split();

        {
            let mut tasks = self.tasks.lock();
            tasks.abort_connection();
        }
        *self.sink.lock().await = Some(sink);
        self.decoder.lock().reset();
        self.greeted.store(false, Ordering::SeqCst);
        self.is_open.store(true, Ordering::SeqCst);

        let token = if token.is_empty() {
            ANONYMOUS_TOKEN.to_string()
        } else {
            token
        };
        let auth = Message::new("set_auth_token", vec![Value::String(token)]);
        self.queue.lock().push_front(encode_message(&auth));
        self.is_logged.store(true, Ordering::SeqCst);

        {
            let reader = TimeoutStream::new(stream, self.config.read_timeout);
            let client = Arc::downgrade(self);
            let mut tasks = self.tasks.lock();
            let failures = tasks.failures.clone();
            tasks.reader = Some(tokio::spawn(run_reader(client.clone(), reader)));
            tasks.heartbeat = Some(tokio::spawn(heartbeat::run_heartbeat(
                client,
                self.config.heartbeat_interval,
                self.config.transport_ping_interval,
                self.config.health_check_interval,
                failures,
            )));
        }

        info!(server = %self.config.server, "connected to TradingView");
        self.health.record_connected();
        self.set_state(ConnectionState::Connected);
        self.emit(ClientEvent::Connected);
        self.flush().await;

        Ok(())
    }

    fn ensure_supervisor(self: &Arc<Self>) {
        if !self.config.reconnect.enabled {
            return;
        }

        let mut tasks = self.tasks.lock();
        if tasks.supervisor.as_ref().is_some_and(|task| !task.is_finished()) {
            return;
        }

        let (failures_tx, failures_rx) = mpsc::unbounded_channel();
        tasks.failures = Some(failures_tx);
        tasks.supervisor = Some(tokio::spawn(run_supervisor(
            Arc::downgrade(self),
            failures_rx,
        )));
    }

    /// Write every queued packet in FIFO order. A failed write puts the packet back at the
    /// head of the queue and tears the socket down.
    pub(crate) async fn flush(&self) {
        if !self.is_open() || !self.is_logged.load(Ordering::SeqCst) {
            return;
        }

        let mut sink = self.sink.lock().await;
        let Some(writer) = sink.as_mut() else {
            return;
        };

        loop {
            let Some(packet) = self.queue.lock().pop_front() else {
                break;
            };

            if let Err(error) = writer.send(WsMessage::text(packet.clone())).await {
                self.queue.lock().push_front(packet);
                warn!(%error, "failed to flush TradingView send queue");
                self.emit_transport_error(Error::from(error));
                self.mark_closed();
                return;
            }
        }
    }

    pub(crate) async fn write(&self, message: WsMessage) -> Result<(), Error> {
        let mut sink = self.sink.lock().await;
        let writer = sink.as_mut().ok_or(Error::ConnectionClosed)?;
        writer.send(message).await.map_err(Error::from)
    }

    pub(crate) async fn close_sink(&self) {
        let sink = self.sink.lock().await.take();
        if let Some(mut sink) = sink {
            if let Err(error) = sink.close().await {
                debug!(%error, "error closing TradingView socket");
            }
        }
    }

    /// Record that the socket is gone. Emits [`ClientEvent::Disconnected`] and fails
    /// in-flight requests the first time it is called for a connection.
    pub(crate) fn mark_closed(&self) {
        self.is_logged.store(false, Ordering::SeqCst);
        if !self.is_open.swap(false, Ordering::SeqCst) {
            return;
        }

        info!(server = %self.config.server, "disconnected from TradingView");
        self.health.record_disconnected();
        if *self.state.read() == ConnectionState::Connected {
            self.set_state(ConnectionState::Disconnected);
        }
        self.emit(ClientEvent::Disconnected);
        self.registry.notify_disconnect();
    }

    pub(crate) fn handle_incoming(&self, text: &str) {
        let frames = self.decoder.lock().decode(text);
        for frame in frames {
            self.dispatch(frame);
        }
    }

    fn dispatch(&self, frame: Frame) {
        match frame {
            Frame::Ping(id) => {
                self.queue.lock().push_back(crate::protocol::encode_ping(id));
                self.emit(ClientEvent::Ping(id));
            }
            Frame::Message(message) if message.kind == "protocol_error" => {
                let reason = match message.data.as_slice() {
                    [Value::String(reason), ..] => reason.clone(),
                    data => Value::Array(data.to_vec()).to_string(),
                };
                warn!(%reason, "TradingView protocol error, closing socket");
                self.emit_error(Error::Protocol(reason));
                self.mark_closed();
            }
            Frame::Message(message) => match self.registry.dispatch(&message) {
                Some(Ok(())) => {}
                Some(Err(error)) => self.emit_error(error),
                None => self.connection_frame(Frame::Message(message)),
            },
            frame @ Frame::Other(_) => self.connection_frame(frame),
        }
    }

    fn connection_frame(&self, frame: Frame) {
        if self.greeted.swap(true, Ordering::SeqCst) {
            self.emit(ClientEvent::Data(frame));
            return;
        }

        let payload = match frame {
            Frame::Other(value) => value,
            Frame::Message(message) => serde_json::to_value(message).unwrap_or_default(),
            Frame::Ping(id) => Value::from(id),
        };
        self.emit(ClientEvent::Logged(payload));
    }

    #[cfg(test)]
    pub(crate) fn force_open(&self) {
        self.is_open.store(true, Ordering::SeqCst);
        self.is_logged.store(true, Ordering::SeqCst);
        self.set_state(ConnectionState::Connected);
    }
}

/// Stringify structured arguments the way each TradingView command expects them.
pub fn encode_args(command: &str, args: Vec<Value>) -> Vec<Value> {
    let raw_arrays = matches!(command, "create_series" | "modify_series");

    args.into_iter()
        .map(|arg| match arg {
            Value::Object(_) => Value::String(to_ascii_json(&arg)),
            Value::Array(_) if !raw_arrays => Value::String(to_ascii_json(&arg)),
            other => other,
        })
        .collect()
}

async fn open_socket(config: &ClientConfig) -> Result<WsStream, Error> {
    let _ = rustls::crypto::ring::default_provider().install_default();

    let mut request = config.url().into_client_request()?;
    request
        .headers_mut()
        .insert(ORIGIN, HeaderValue::from_static(ORIGIN_HEADER));

    debug!(url = %config.url(), "connecting to TradingView");
    match tokio::time::timeout(config.connect_timeout, connect_async(request)).await {
        Ok(Ok((socket, _response))) => Ok(socket),
        Ok(Err(error)) => Err(Error::from(error)),
        Err(_) => Err(Error::Transport(format!(
            "connect timeout after {}s",
            config.connect_timeout.as_secs()
        ))),
    }
}

/// Single reader of the socket. Non-terminal read errors are retried with backoff,
/// terminal ones end the loop and leave recovery to the heartbeat and supervisor.
async fn run_reader(client: Weak<ClientInner>, mut stream: WsReader) {
    let mut retry = ReconnectStrategy::new(
        ReconnectConfig::default()
            .with_initial_delay(Duration::from_secs(1))
            .with_jitter(false)
            .with_max_retries(READ_RETRIES),
    );

    while let Some(next) = stream.next().await {
        let Some(client) = client.upgrade() else {
            return;
        };

        match next {
            Ok(WsMessage::Text(text)) => {
                retry.reset();
                client.handle_incoming(text.as_str());
                if !client.is_open() {
                    break;
                }
                client.flush().await;
            }
            Ok(WsMessage::Pong(_)) => {
                if let Some(latency) = client.health.record_pong() {
                    debug!(latency_ms = latency.as_millis() as u64, "TradingView pong");
                }
            }
            Ok(WsMessage::Close(frame)) => {
                debug!(?frame, "TradingView closed the socket");
                break;
            }
            Ok(_) => {}
            Err(error) => {
                let error = Error::from(error);
                let terminal = error.is_terminal();
                client.emit_transport_error(error);
                if terminal {
                    break;
                }

                match retry.next_delay() {
                    Some(delay) => tokio::time::sleep(delay).await,
                    None => {
                        warn!(retries = READ_RETRIES, "giving up on TradingView socket reads");
                        break;
                    }
                }
            }
        }
    }

    if let Some(client) = client.upgrade() {
        client.mark_closed();
        client.close_sink().await;
    }
}

/// Re-run the connection sequence with backoff each time the heartbeat reports a dead
/// socket, until [`Client::end`] is called or the retries run out.
async fn run_supervisor(client: Weak<ClientInner>, mut failures: mpsc::UnboundedReceiver<()>) {
    while failures.recv().await.is_some() {
        let Some(client) = client.upgrade() else {
            return;
        };
        if client.closing.load(Ordering::SeqCst) || client.is_open() {
            continue;
        }

        client.tasks.lock().abort_connection();
        client.close_sink().await;
        client.set_state(ConnectionState::Reconnecting);

        let mut strategy = ReconnectStrategy::new(client.config.reconnect.clone());
        let result = retry_with_backoff(&mut strategy, |attempt| {
            let client = client.clone();
            async move {
                client.reconnect_attempts.store(attempt, Ordering::SeqCst);
                if client.closing.load(Ordering::SeqCst) {
                    return Ok(());
                }

                let result = client.establish().await;
                if result.is_err() {
                    client.set_state(ConnectionState::Reconnecting);
                }
                result
            }
        })
        .await;

        match result {
            Ok(()) => {
                client.reconnect_attempts.store(0, Ordering::SeqCst);
                if client.is_open() {
                    client.health.record_reconnect();
                    info!("reconnected to TradingView");
                }
            }
            Err(error) => {
                error!(%error, "TradingView reconnection failed permanently");
                client.emit_error(error);
                client.set_state(ConnectionState::Failed);
                return;
            }
        }
    }
}
