/// Push-stream gateway: WebSocket endpoint for displays plus a small status API.
///
/// Each accepted socket gets a bounded outbound queue.  The core loop owns the
/// sending half (`ClientConnection`) and pushes serialized events into it; the
/// per-socket task drains the queue onto the wire.  A full or closed queue just
/// drops the message: events are state snapshots and the next one supersedes.
use crate::core::{BridgeEvent, BridgeStatus};
use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    http::StatusCode,
    response::{Json, Response},
    routing::get,
    Router,
};
use futures_util::{SinkExt, StreamExt};
use stage_proto::protocol::Event;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tracing::{debug, error, info, warn};

/// Outbound messages buffered per client before new ones are dropped.
const CLIENT_QUEUE: usize = 32;

/// Handle to one connected display, held by the core loop.
#[derive(Debug, Clone)]
pub struct ClientConnection {
    id: usize,
    tx: mpsc::Sender<String>,
}

impl ClientConnection {
    pub fn new(id: usize, tx: mpsc::Sender<String>) -> Self {
        Self { id, tx }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn is_open(&self) -> bool {
        !self.tx.is_closed()
    }

    pub fn send(&self, text: &str) -> anyhow::Result<()> {
        self.tx
            .try_send(text.to_string())
            .map_err(|e| anyhow::anyhow!("{}", e))
    }
}

/// The broadcast set.  Membership is the only per-client state.
#[derive(Debug, Default)]
pub struct ClientSet {
    clients: Vec<ClientConnection>,
}

impl ClientSet {
    pub fn insert(&mut self, conn: ClientConnection) {
        self.clients.retain(|c| c.id != conn.id);
        self.clients.push(conn);
    }

    pub fn remove(&mut self, id: usize) -> bool {
        let before = self.clients.len();
        self.clients.retain(|c| c.id != id);
        self.clients.len() != before
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    /// Best-effort fan-out.  Returns the number of clients the message was
    /// queued for; failures are logged per client and never propagate.
    pub fn broadcast(&self, event: &Event) -> usize {
        let text = match event.to_json() {
            Ok(t) => t,
            Err(e) => {
                error!("Failed to serialize {:?}: {}", event, e);
                return 0;
            }
        };

        let mut delivered = 0;
        for client in self.clients.iter().filter(|c| c.is_open()) {
            match client.send(&text) {
                Ok(()) => delivered += 1,
                Err(e) => warn!("Client {} send failed: {}", client.id, e),
            }
        }
        delivered
    }
}

// ── HTTP / WebSocket server ───────────────────────────────────────────────────

#[derive(Clone)]
struct GatewayState {
    event_tx: mpsc::Sender<BridgeEvent>,
    next_id: Arc<AtomicUsize>,
}

pub fn router(event_tx: mpsc::Sender<BridgeEvent>) -> Router {
    let state = GatewayState {
        event_tx,
        next_id: Arc::new(AtomicUsize::new(0)),
    };

    Router::new()
        .route("/", get(handle_websocket))
        .route("/ws", get(handle_websocket))
        .route("/api/state", get(get_state))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub fn start_server(
    bind_address: String,
    port: u16,
    event_tx: mpsc::Sender<BridgeEvent>,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let addr = format!("{}:{}", bind_address, port);
        let listener = match TcpListener::bind(&addr).await {
            Ok(l) => l,
            Err(e) => {
                error!("Failed to bind push-stream server to {}: {}", addr, e);
                return;
            }
        };

        info!("Push-stream server listening on ws://{}", addr);

        let app = router(event_tx);
        let shutdown = async move { cancel.cancelled().await };
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await
        {
            error!("Push-stream server error: {}", e);
        }
    })
}

async fn handle_websocket(ws: WebSocketUpgrade, State(state): State<GatewayState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: GatewayState) {
    let id = state.next_id.fetch_add(1, Ordering::Relaxed) + 1;
    let (tx, mut rx) = mpsc::channel::<String>(CLIENT_QUEUE);

    if state
        .event_tx
        .send(BridgeEvent::ClientConnected(ClientConnection::new(id, tx)))
        .await
        .is_err()
    {
        warn!("BridgeEvent channel closed, rejecting client {}", id);
        return;
    }
    info!("Client {} connected", id);

    let (mut sink, mut stream) = socket.split();
    loop {
        tokio::select! {
            outbound = rx.recv() => {
                let Some(text) = outbound else { break };
                if let Err(e) = sink.send(Message::Text(text)).await {
                    debug!("Client {} write failed: {}", id, e);
                    break;
                }
            }
            inbound = stream.next() => {
                match inbound {
                    Some(Ok(Message::Close(_))) | None => break,
                    // Displays never send anything meaningful upstream.
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!("Client {} read failed: {}", id, e);
                        break;
                    }
                }
            }
        }
    }

    info!("Client {} disconnected", id);
    let _ = state.event_tx.send(BridgeEvent::ClientDisconnected(id)).await;
}

async fn get_state(State(state): State<GatewayState>) -> Result<Json<BridgeStatus>, StatusCode> {
    let (reply_tx, reply_rx) = oneshot::channel();
    state
        .event_tx
        .send(BridgeEvent::QueryState(reply_tx))
        .await
        .map_err(|_| StatusCode::SERVICE_UNAVAILABLE)?;
    let status = reply_rx
        .await
        .map_err(|_| StatusCode::SERVICE_UNAVAILABLE)?;
    Ok(Json(status))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(id: usize) -> (ClientConnection, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(CLIENT_QUEUE);
        (ClientConnection::new(id, tx), rx)
    }

    #[test]
    fn test_broadcast_skips_closed_client() {
        let mut set = ClientSet::default();
        let (a, mut rx_a) = client(1);
        let (b, rx_b) = client(2);
        let (c, mut rx_c) = client(3);
        set.insert(a);
        set.insert(b);
        set.insert(c);

        drop(rx_b);
        let delivered = set.broadcast(&Event::SongChanged("Intro".into()));

        assert_eq!(delivered, 2);
        let expected = r#"{"type":"songName","value":"Intro"}"#;
        assert_eq!(rx_a.try_recv().unwrap(), expected);
        assert_eq!(rx_c.try_recv().unwrap(), expected);
    }

    #[test]
    fn test_full_queue_drops_without_blocking() {
        let mut set = ClientSet::default();
        let (slow, _rx_slow) = client(1);
        let (fast, mut rx_fast) = client(2);
        set.insert(slow);
        set.insert(fast);

        for i in 0..CLIENT_QUEUE {
            set.broadcast(&Event::ProgressUpdated(i as f64 / 100.0));
            rx_fast.try_recv().unwrap();
        }
        // The slow client's queue is now full; only the fast one gets this.
        assert_eq!(set.broadcast(&Event::PlaybackChanged(false)), 1);
        assert_eq!(
            rx_fast.try_recv().unwrap(),
            r#"{"type":"playing","value":false}"#
        );
    }

    #[test]
    fn test_membership() {
        let mut set = ClientSet::default();
        let (a, _rx_a) = client(1);
        set.insert(a.clone());
        set.insert(a);
        assert_eq!(set.len(), 1);
        assert!(set.remove(1));
        assert!(!set.remove(1));
        assert_eq!(set.len(), 0);
    }
}
