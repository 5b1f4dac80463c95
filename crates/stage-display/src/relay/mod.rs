/// Relay client: one push-stream connection to the bridge, kept alive.
///
/// Architecture:
///
/// ```text
///   RelayHandle (cloneable) ──RelayCommand──▶ RelayClient::run()
///                                                 ├── handshake        → connection listeners
///                                                 ├── socket messages  → debounce / listeners
///                                                 ├── reconnect timer  → open()
///                                                 └── debounce timer   → songChange listeners
/// ```
///
/// Everything runs on the single `run()` task, so timers, socket callbacks
/// and commands interleave but never overlap.  A handshake in progress is
/// just another branch, so commands are never stuck behind it.  Listeners are
/// invoked inline and must stay short.
mod backoff;
mod debounce;
mod listeners;

pub use backoff::Backoff;
pub use debounce::SongDebounce;
pub use listeners::{ConnectionSource, ConnectionStatus, Listener, ListenerList, Listeners};

use futures_util::StreamExt;
use stage_proto::config::RelayConfig;
use stage_proto::protocol::Event;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// An in-flight handshake, polled by `run()` alongside everything else.
type ConnectAttempt = Pin<Box<dyn Future<Output = anyhow::Result<WsStream>> + Send>>;

/// Upper bound on a single connection attempt.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

pub enum RelayCommand {
    /// Open (or replace) the connection, optionally switching URL.
    Connect(Option<String>),
    /// Close without reconnecting.
    Disconnect,
    SetEnabled(bool),
    ResetSongState,
    Register(Box<dyn FnOnce(&mut Listeners) + Send>),
}

/// Cloneable control surface for a running `RelayClient`.
#[derive(Clone)]
pub struct RelayHandle {
    cmd_tx: mpsc::UnboundedSender<RelayCommand>,
}

impl RelayHandle {
    fn send(&self, cmd: RelayCommand) {
        if self.cmd_tx.send(cmd).is_err() {
            debug!("Relay task gone, command dropped");
        }
    }

    pub fn connect(&self, url: Option<String>) {
        self.send(RelayCommand::Connect(url));
    }

    pub fn disconnect(&self) {
        self.send(RelayCommand::Disconnect);
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.send(RelayCommand::SetEnabled(enabled));
    }

    pub fn reset_song_state(&self) {
        self.send(RelayCommand::ResetSongState);
    }

    pub fn on_song_change<F>(&self, f: F)
    where
        F: FnMut(&String) -> anyhow::Result<()> + Send + 'static,
    {
        self.send(RelayCommand::Register(Box::new(move |l: &mut Listeners| l.song_change.push(f))));
    }

    pub fn on_progress<F>(&self, f: F)
    where
        F: FnMut(&f64) -> anyhow::Result<()> + Send + 'static,
    {
        self.send(RelayCommand::Register(Box::new(move |l: &mut Listeners| l.progress.push(f))));
    }

    pub fn on_playback_change<F>(&self, f: F)
    where
        F: FnMut(&bool) -> anyhow::Result<()> + Send + 'static,
    {
        self.send(RelayCommand::Register(Box::new(move |l: &mut Listeners| l.playback.push(f))));
    }

    pub fn on_connection_change<F>(&self, f: F)
    where
        F: FnMut(&ConnectionStatus) -> anyhow::Result<()> + Send + 'static,
    {
        self.send(RelayCommand::Register(Box::new(move |l: &mut Listeners| l.connection.push(f))));
    }
}

pub struct RelayClient {
    url: String,
    enabled: bool,
    backoff: Backoff,
    debounce: SongDebounce,
    listeners: Listeners,
    socket: Option<WsStream>,
    connecting: Option<ConnectAttempt>,
    /// True while the current socket has completed its handshake.
    connected: bool,
    reconnect_at: Option<Instant>,
}

impl RelayClient {
    pub fn new(config: &RelayConfig) -> Self {
        Self {
            url: config.url.clone(),
            enabled: true,
            backoff: Backoff::new(config.base_backoff(), config.max_backoff()),
            debounce: SongDebounce::new(config.song_debounce()),
            listeners: Listeners::default(),
            socket: None,
            connecting: None,
            connected: false,
            reconnect_at: None,
        }
    }

    pub fn listeners_mut(&mut self) -> &mut Listeners {
        &mut self.listeners
    }

    /// Move the client onto its own task.  Nothing connects until
    /// `RelayHandle::connect` is called.
    pub fn spawn(self) -> (RelayHandle, tokio::task::JoinHandle<()>) {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(self.run(cmd_rx));
        (RelayHandle { cmd_tx }, task)
    }

    async fn run(mut self, mut cmd_rx: mpsc::UnboundedReceiver<RelayCommand>) {
        loop {
            let reconnect_at = self.reconnect_at;
            let debounce_at = self.debounce.deadline();

            tokio::select! {
                cmd = cmd_rx.recv() => match cmd {
                    Some(cmd) => self.handle_command(cmd).await,
                    None => break,
                },
                result = connect_attempt(&mut self.connecting) => {
                    self.connecting = None;
                    self.on_connect(result);
                },
                msg = next_message(&mut self.socket) => match msg {
                    Some(Ok(Message::Text(text))) => self.handle_text(text.as_str()),
                    Some(Ok(Message::Close(_))) | None => self.on_close(),
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!("Relay socket error: {}", e);
                        self.on_close();
                    }
                },
                _ = sleep_until(reconnect_at) => {
                    self.reconnect_at = None;
                    self.open().await;
                },
                _ = sleep_until(debounce_at) => {
                    if let Some(name) = self.debounce.fire(Instant::now()) {
                        debug!("Song change delivered: {}", name);
                        self.listeners.song_change.emit(&name);
                    }
                },
            }
        }

        self.connecting = None;
        self.close_socket().await;
        debug!("Relay task stopped");
    }

    async fn handle_command(&mut self, cmd: RelayCommand) {
        match cmd {
            RelayCommand::Connect(url) => {
                if let Some(url) = url {
                    self.url = url;
                }
                self.reconnect_at = None;
                self.open().await;
            }
            RelayCommand::Disconnect => {
                self.reconnect_at = None;
                self.connecting = None;
                self.close_socket().await;
                info!("Relay disconnected");
            }
            RelayCommand::SetEnabled(enabled) => {
                self.enabled = enabled;
                if enabled && self.socket.is_none() && self.connecting.is_none() {
                    self.reconnect_at = None;
                    self.open().await;
                }
            }
            RelayCommand::ResetSongState => self.debounce.reset(),
            RelayCommand::Register(register) => register(&mut self.listeners),
        }
    }

    /// Tear down any existing socket or attempt and start a fresh handshake.
    /// The outcome arrives through `on_connect`.
    async fn open(&mut self) {
        self.close_socket().await;

        debug!("Relay connecting to {}", self.url);
        let url = self.url.clone();
        let attempt: ConnectAttempt = Box::pin(async move {
            let (ws, _) = tokio::time::timeout(CONNECT_TIMEOUT, connect_async(url.as_str()))
                .await
                .map_err(|_| anyhow::anyhow!("timed out after {:?}", CONNECT_TIMEOUT))??;
            Ok::<_, anyhow::Error>(ws)
        });
        // Replacing an earlier attempt drops (and so cancels) it.
        self.connecting = Some(attempt);
    }

    /// Failure schedules a reconnect instead of surfacing an error.
    fn on_connect(&mut self, result: anyhow::Result<WsStream>) {
        match result {
            Ok(ws) => {
                info!("Relay connected to {}", self.url);
                self.socket = Some(ws);
                self.connected = true;
                self.backoff.reset();
                self.notify_connection(true, ConnectionSource::Relay);
            }
            Err(e) => {
                warn!("Relay connect to {} failed: {:#}", self.url, e);
                self.schedule_reconnect();
            }
        }
    }

    /// Close the socket without any close handling: no notification and no
    /// reconnect.
    async fn close_socket(&mut self) {
        if let Some(mut ws) = self.socket.take() {
            let _ = ws.close(None).await;
        }
        self.connected = false;
    }

    /// The peer went away (or the socket errored).
    fn on_close(&mut self) {
        self.socket = None;
        if self.connected {
            self.connected = false;
            info!("Relay connection lost");
            self.notify_connection(false, ConnectionSource::Relay);
        }
        self.schedule_reconnect();
    }

    fn schedule_reconnect(&mut self) {
        if self.reconnect_at.is_some() {
            return;
        }
        let delay = self.backoff.next_delay();
        info!("Relay reconnecting in {:?}", delay);
        self.reconnect_at = Some(Instant::now() + delay);
    }

    fn handle_text(&mut self, text: &str) {
        if !self.enabled {
            return;
        }
        let event = match Event::from_json(text) {
            Ok(e) => e,
            Err(e) => {
                debug!("Dropping unparseable message {:?}: {}", text, e);
                return;
            }
        };

        match event {
            Event::SongChanged(name) => {
                if self.debounce.offer(name, Instant::now()) {
                    debug!("Song change pending");
                }
            }
            Event::ProgressUpdated(fraction) => self.listeners.progress.emit(&fraction),
            Event::PlaybackChanged(playing) => self.listeners.playback.emit(&playing),
            Event::ConnectionChanged(connected) => {
                self.notify_connection(connected, ConnectionSource::Controller)
            }
        }
    }

    fn notify_connection(&mut self, connected: bool, source: ConnectionSource) {
        self.listeners
            .connection
            .emit(&ConnectionStatus { connected, source });
    }
}

async fn connect_attempt(attempt: &mut Option<ConnectAttempt>) -> anyhow::Result<WsStream> {
    match attempt {
        Some(fut) => fut.await,
        None => std::future::pending().await,
    }
}

async fn next_message(
    socket: &mut Option<WsStream>,
) -> Option<Result<Message, tokio_tungstenite::tungstenite::Error>> {
    match socket {
        Some(ws) => ws.next().await,
        None => std::future::pending().await,
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}
