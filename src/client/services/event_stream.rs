//! Long-lived event stream with fixed-delay reconnection.
//!
//! One driver task owns the socket reader and the retry timer through a
//! [`ConnectionManager`]; the [`EventStreamConsumer`] handle only sends it
//! commands and reads what it publishes.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use futures_util::stream::BoxStream;
use futures_util::{FutureExt, SinkExt, StreamExt};
use log::{debug, info, warn};
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};

use crate::client::config::{ClientConfig, MAX_EVENT_BUFFER};
use crate::client::models::progress::reduce;
use crate::common::events::{parse_event, ProgressEvent};

/// Inbound text frames of one connection; the stream ends when the socket closes.
pub type FrameStream = BoxStream<'static, Result<String, StreamError>>;

/// Sends the closing handshake for one connection.
pub type Closer = BoxFuture<'static, ()>;

pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Upper bound on how long teardown waits for the close handshake.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StreamError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),
    #[error("WebSocket error: {0}")]
    Transport(String),
}

/// One open connection: its frames and, optionally, how to close it cleanly.
pub struct EventConnection {
    pub frames: FrameStream,
    pub closer: Option<Closer>,
}

impl EventConnection {
    pub fn new(frames: FrameStream) -> Self {
        Self { frames, closer: None }
    }

    pub fn with_closer(mut self, closer: Closer) -> Self {
        self.closer = Some(closer);
        self
    }
}

/// Where frames come from. Production uses [`WebSocketSource`].
#[async_trait]
pub trait EventSource: Send + Sync + 'static {
    async fn connect(&self) -> Result<EventConnection, StreamError>;

    fn describe(&self) -> String;
}

pub struct WebSocketSource {
    url: String,
    handshake_timeout: Duration,
}

impl WebSocketSource {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
        }
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }
}

#[async_trait]
impl EventSource for WebSocketSource {
    async fn connect(&self) -> Result<EventConnection, StreamError> {
        let (ws_stream, _) = tokio::time::timeout(self.handshake_timeout, connect_async(self.url.as_str()))
            .await
            .map_err(|_| {
                StreamError::ConnectionFailed(format!("handshake timed out after {:?}", self.handshake_timeout))
            })?
            .map_err(|e| StreamError::ConnectionFailed(e.to_string()))?;

        // the sink is only used to close; the service never expects messages from us
        let (mut ws_sender, ws_receiver) = ws_stream.split();
        let frames = ws_receiver.filter_map(|message| async move {
            match message {
                Ok(Message::Text(text)) => Some(Ok(text)),
                Ok(Message::Close(frame)) => {
                    debug!("[EVENTS] Close frame received: {:?}", frame);
                    None
                }
                // binary, ping, pong
                Ok(_) => None,
                Err(e) => Some(Err(StreamError::Transport(e.to_string()))),
            }
        });
        let closer = async move {
            // sends the Close frame and flushes it
            if let Err(e) = ws_sender.close().await {
                debug!("[EVENTS] Close frame not sent: {}", e);
            }
        };
        Ok(EventConnection::new(frames.boxed()).with_closer(closer.boxed()))
    }

    fn describe(&self) -> String {
        self.url.clone()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StreamState {
    #[default]
    Disconnected,
    Connecting,
    Open,
    /// Disposed; nothing will be scheduled again
    Closed,
}

/// Snapshot published to observers after every change.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamView {
    pub state: StreamState,
    /// Current operation projection
    pub current: Option<ProgressEvent>,
    pub last_error: Option<String>,
    pub changed_at: Option<DateTime<Utc>>,
}

/// Most recent events, oldest first.
#[derive(Debug, Clone)]
pub struct EventBuffer {
    capacity: usize,
    events: VecDeque<ProgressEvent>,
}

impl EventBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.clamp(1, MAX_EVENT_BUFFER),
            events: VecDeque::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn push(&mut self, event: ProgressEvent) {
        if self.events.len() == self.capacity {
            self.events.pop_front();
        }
        self.events.push_back(event);
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn snapshot(&self) -> Vec<ProgressEvent> {
        self.events.iter().cloned().collect()
    }
}

/// Messages from the reader and the retry timer back to the driver.
#[derive(Debug)]
pub enum Signal {
    Opened { generation: u64 },
    Frame { generation: u64, text: String },
    Closed { generation: u64, error: Option<String> },
    RetryDue { ticket: u64 },
}

/// Reader task of one connection and the switch that stops it.
struct Reader {
    shutdown: oneshot::Sender<()>,
    _task: JoinHandle<()>,
}

/// Owns the socket reader task and the single retry timer.
pub struct ConnectionManager {
    source: Arc<dyn EventSource>,
    reconnect_delay: Duration,
    signals: mpsc::UnboundedSender<Signal>,
    state: StreamState,
    generation: u64,
    reader: Option<Reader>,
    retry: Option<(u64, JoinHandle<()>)>,
    next_ticket: u64,
    disposed: bool,
}

impl ConnectionManager {
    pub fn new(
        source: Arc<dyn EventSource>,
        reconnect_delay: Duration,
        signals: mpsc::UnboundedSender<Signal>,
    ) -> Self {
        Self {
            source,
            reconnect_delay,
            signals,
            state: StreamState::Disconnected,
            generation: 0,
            reader: None,
            retry: None,
            next_ticket: 0,
            disposed: false,
        }
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    pub fn retry_pending(&self) -> bool {
        self.retry.is_some()
    }

    /// `Disconnected -> Connecting`. A pending retry is cancelled; a live
    /// or in-progress connection is left alone.
    pub fn connect(&mut self) -> bool {
        if self.disposed || matches!(self.state, StreamState::Connecting | StreamState::Open) {
            return false;
        }
        self.cancel_retry();
        self.generation += 1;
        self.state = StreamState::Connecting;
        info!("[EVENTS] Connecting to {}", self.source.describe());
        let source = self.source.clone();
        let signals = self.signals.clone();
        let generation = self.generation;
        let (shutdown, stop) = oneshot::channel();
        self.reader = Some(Reader {
            shutdown,
            _task: tokio::spawn(read_connection(source, generation, signals, stop)),
        });
        true
    }

    pub fn on_opened(&mut self, generation: u64) -> bool {
        if self.disposed || generation != self.generation {
            return false;
        }
        self.state = StreamState::Open;
        info!("[EVENTS] Connected to {}", self.source.describe());
        true
    }

    pub fn accepts_frame(&self, generation: u64) -> bool {
        !self.disposed && generation == self.generation && self.state == StreamState::Open
    }

    /// Socket gone (clean close, error or failed handshake). Returns whether
    /// a new retry was scheduled.
    pub fn on_closed(&mut self, generation: u64) -> bool {
        if self.disposed || generation != self.generation {
            return false;
        }
        self.state = StreamState::Disconnected;
        self.reader = None;
        self.schedule_retry()
    }

    /// At most one timer is ever pending.
    pub fn schedule_retry(&mut self) -> bool {
        if self.disposed || self.retry.is_some() {
            return false;
        }
        self.next_ticket += 1;
        let ticket = self.next_ticket;
        let delay = self.reconnect_delay;
        let signals = self.signals.clone();
        info!("[EVENTS] Reconnecting in {:?}", delay);
        let timer = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = signals.send(Signal::RetryDue { ticket });
        });
        self.retry = Some((ticket, timer));
        true
    }

    pub fn on_retry_due(&mut self, ticket: u64) -> bool {
        match &self.retry {
            Some((pending, _)) if *pending == ticket => {
                self.retry = None;
                self.connect()
            }
            _ => false,
        }
    }

    /// The only way to stop for good: cancels the timer and closes the socket
    /// with a Close frame.
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.disposed = true;
        self.cancel_retry();
        if let Some(reader) = self.reader.take() {
            // the reader may already be gone
            let _ = reader.shutdown.send(());
        }
        self.state = StreamState::Closed;
        info!("[EVENTS] Event stream disposed");
    }

    fn cancel_retry(&mut self) {
        if let Some((_, timer)) = self.retry.take() {
            timer.abort();
        }
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.dispose();
    }
}

async fn read_connection(
    source: Arc<dyn EventSource>,
    generation: u64,
    signals: mpsc::UnboundedSender<Signal>,
    mut stop: oneshot::Receiver<()>,
) {
    let connection = tokio::select! {
        result = source.connect() => result,
        _ = &mut stop => return,
    };
    let EventConnection { mut frames, closer } = match connection {
        Ok(connection) => connection,
        Err(e) => {
            warn!("[EVENTS] {}", e);
            let _ = signals.send(Signal::Closed {
                generation,
                error: Some(e.to_string()),
            });
            return;
        }
    };
    if signals.send(Signal::Opened { generation }).is_err() {
        return;
    }

    let error = loop {
        tokio::select! {
            frame = frames.next() => match frame {
                Some(Ok(text)) => {
                    if signals.send(Signal::Frame { generation, text }).is_err() {
                        return;
                    }
                }
                Some(Err(e)) => {
                    warn!("[EVENTS] {}", e);
                    break Some(e.to_string());
                }
                None => {
                    info!("[EVENTS] Connection closed by server");
                    break None;
                }
            },
            _ = &mut stop => {
                drop(frames);
                if let Some(closer) = closer {
                    if tokio::time::timeout(CLOSE_TIMEOUT, closer).await.is_err() {
                        debug!("[EVENTS] Close handshake timed out");
                    }
                }
                return;
            }
        }
    };
    let _ = signals.send(Signal::Closed { generation, error });
}

enum Command {
    Reconnect,
    Dispose,
}

/// Handle to the event stream. Dropping it disposes the stream.
pub struct EventStreamConsumer {
    commands: mpsc::UnboundedSender<Command>,
    view: watch::Receiver<StreamView>,
    events: broadcast::Sender<ProgressEvent>,
    buffer: Arc<Mutex<EventBuffer>>,
    driver: Option<JoinHandle<()>>,
}

impl EventStreamConsumer {
    /// Event stream of the configured backend.
    pub fn from_config(config: &ClientConfig) -> Result<Self, StreamError> {
        let url = config.events_url().map_err(StreamError::ConnectionFailed)?;
        let source = WebSocketSource::new(url).with_handshake_timeout(config.handshake_timeout);
        Ok(Self::spawn(Arc::new(source), config.reconnect_delay, config.event_buffer_size))
    }

    /// Connect to a WebSocket URL.
    pub fn connect(url: &str, reconnect_delay: Duration, buffer_size: usize) -> Self {
        Self::spawn(Arc::new(WebSocketSource::new(url)), reconnect_delay, buffer_size)
    }

    pub fn spawn(source: Arc<dyn EventSource>, reconnect_delay: Duration, buffer_size: usize) -> Self {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (signals_tx, signals_rx) = mpsc::unbounded_channel();
        let (view_tx, view_rx) = watch::channel(StreamView::default());
        let (events_tx, _) = broadcast::channel(buffer_size.clamp(16, MAX_EVENT_BUFFER));
        let buffer = Arc::new(Mutex::new(EventBuffer::new(buffer_size)));

        let manager = ConnectionManager::new(source, reconnect_delay, signals_tx);
        let driver = Driver {
            manager,
            signals: signals_rx,
            commands: commands_rx,
            view: view_tx,
            events: events_tx.clone(),
            buffer: buffer.clone(),
        };

        Self {
            commands: commands_tx,
            view: view_rx,
            events: events_tx,
            buffer,
            driver: Some(tokio::spawn(driver.run())),
        }
    }

    pub fn view(&self) -> StreamView {
        self.view.borrow().clone()
    }

    pub fn subscribe_view(&self) -> watch::Receiver<StreamView> {
        self.view.clone()
    }

    pub fn current_operation(&self) -> Option<ProgressEvent> {
        self.view.borrow().current.clone()
    }

    /// Every parsed event, in receipt order.
    pub fn subscribe_events(&self) -> broadcast::Receiver<ProgressEvent> {
        self.events.subscribe()
    }

    pub fn recent_events(&self) -> Vec<ProgressEvent> {
        match self.buffer.lock() {
            Ok(buffer) => buffer.snapshot(),
            Err(poisoned) => poisoned.into_inner().snapshot(),
        }
    }

    /// Connect now instead of waiting for the retry timer.
    pub fn reconnect(&self) {
        let _ = self.commands.send(Command::Reconnect);
    }

    pub async fn dispose(mut self) {
        let _ = self.commands.send(Command::Dispose);
        if let Some(driver) = self.driver.take() {
            let _ = driver.await;
        }
    }
}

impl Drop for EventStreamConsumer {
    fn drop(&mut self) {
        let _ = self.commands.send(Command::Dispose);
    }
}

struct Driver {
    manager: ConnectionManager,
    signals: mpsc::UnboundedReceiver<Signal>,
    commands: mpsc::UnboundedReceiver<Command>,
    view: watch::Sender<StreamView>,
    events: broadcast::Sender<ProgressEvent>,
    buffer: Arc<Mutex<EventBuffer>>,
}

impl Driver {
    async fn run(mut self) {
        self.manager.connect();
        self.publish_state(None);

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Reconnect) => {
                        if self.manager.connect() {
                            self.publish_state(None);
                        }
                    }
                    Some(Command::Dispose) | None => break,
                },
                Some(signal) = self.signals.recv() => self.handle(signal),
            }
        }

        self.manager.dispose();
        self.publish_state(None);
    }

    fn handle(&mut self, signal: Signal) {
        match signal {
            Signal::Opened { generation } => {
                if self.manager.on_opened(generation) {
                    self.publish_state(None);
                }
            }
            Signal::Frame { generation, text } => {
                if self.manager.accepts_frame(generation) {
                    self.handle_frame(&text);
                }
            }
            Signal::Closed { generation, error } => {
                if generation == self.manager.generation && !self.manager.disposed {
                    self.manager.on_closed(generation);
                    self.publish_state(error);
                }
            }
            Signal::RetryDue { ticket } => {
                if self.manager.on_retry_due(ticket) {
                    self.publish_state(None);
                }
            }
        }
    }

    fn handle_frame(&mut self, text: &str) {
        let event = match parse_event(text) {
            Ok(event) => event,
            Err(e) => {
                warn!("[EVENTS] Dropping malformed frame: {} - Raw: {}", e, text);
                return;
            }
        };
        debug!("[EVENTS] {}", event.event_type());

        match self.buffer.lock() {
            Ok(mut buffer) => buffer.push(event.clone()),
            Err(poisoned) => poisoned.into_inner().push(event.clone()),
        }
        self.view.send_modify(|view| {
            let previous = view.current.take();
            view.current = reduce(previous, &event);
        });
        // no subscribers is fine
        let _ = self.events.send(event);
    }

    fn publish_state(&self, error: Option<String>) {
        let state = self.manager.state();
        self.view.send_modify(|view| {
            view.state = state;
            if error.is_some() || state == StreamState::Open {
                view.last_error = error;
            }
            view.changed_at = Some(Utc::now());
        });
    }
}
