/// BridgeCore: single-owner event loop for all bridge state.
///
/// The UDP listener, every push-stream socket task and the status API only
/// ever talk to the core through `BridgeEvent` messages.  `BridgeCore` owns
/// the liveness state machine, the broadcast set and the controller link
/// exclusively, so nothing here needs a lock and events leave in exactly the
/// order their packets were decoded.
use chrono::{DateTime, Utc};
use serde::Serialize;
use stage_proto::config::BridgeConfig;
use stage_proto::osc::OscMessage;
use stage_proto::protocol::{ControlEvent, Event};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::controller::Controller;
use crate::gateway::{ClientConnection, ClientSet};
use crate::liveness::{Liveness, Transition};

// ── BridgeEvent ───────────────────────────────────────────────────────────────

/// All inputs into the BridgeCore loop.
#[derive(Debug)]
pub enum BridgeEvent {
    /// One decoded controller message (bundles arrive already flattened).
    Osc(OscMessage),
    ClientConnected(ClientConnection),
    ClientDisconnected(usize),
    /// Status API request.
    QueryState(oneshot::Sender<BridgeStatus>),
    Shutdown,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeStatus {
    pub controller_connected: bool,
    pub last_heartbeat_at: Option<DateTime<Utc>>,
    pub clients: usize,
}

// ── BridgeCore ────────────────────────────────────────────────────────────────

pub struct BridgeCore {
    liveness: Liveness,
    controller: Controller,
    clients: ClientSet,
    check_interval: Duration,
    shutdown_grace: Duration,
}

impl BridgeCore {
    pub fn new(config: &BridgeConfig, controller: Controller) -> Self {
        Self {
            liveness: Liveness::new(config.heartbeat_timeout()),
            controller,
            clients: ClientSet::default(),
            check_interval: config.liveness_check_interval(),
            shutdown_grace: config.shutdown_grace(),
        }
    }

    /// Run until `Shutdown` arrives or every sender is gone, then unsubscribe
    /// and give the datagram a moment to leave before the sockets close.
    pub async fn run(mut self, mut event_rx: mpsc::Receiver<BridgeEvent>) -> anyhow::Result<()> {
        info!("BridgeCore: starting event loop");
        self.controller.subscribe();

        let mut ticker = tokio::time::interval(self.check_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                evt = event_rx.recv() => match evt {
                    None => {
                        info!("BridgeCore: event channel closed, shutting down");
                        break;
                    }
                    Some(BridgeEvent::Shutdown) => {
                        info!("BridgeCore: shutdown requested");
                        break;
                    }
                    Some(evt) => self.handle_event(evt, Instant::now()),
                },
                _ = ticker.tick() => self.check_liveness(Instant::now()),
            }
        }

        self.controller.unsubscribe();
        tokio::time::sleep(self.shutdown_grace).await;
        Ok(())
    }

    pub fn handle_event(&mut self, evt: BridgeEvent, now: Instant) {
        match evt {
            BridgeEvent::Osc(msg) => self.handle_osc(msg, now),
            BridgeEvent::ClientConnected(conn) => self.client_connected(conn),
            BridgeEvent::ClientDisconnected(id) => self.client_disconnected(id),
            BridgeEvent::QueryState(reply) => {
                let _ = reply.send(self.status());
            }
            BridgeEvent::Shutdown => {}
        }
    }

    fn handle_osc(&mut self, msg: OscMessage, now: Instant) {
        let Some(control) = ControlEvent::classify(&msg) else {
            debug!("Ignoring {} {:?}", msg.addr, msg.args);
            return;
        };

        if control == ControlEvent::Heartbeat {
            if let Some(Transition::Connected) = self.liveness.heartbeat(now) {
                info!("Controller connected");
                self.broadcast(&Event::ConnectionChanged(true));
            }
            return;
        }

        if let Some(event) = control.into_event() {
            self.broadcast(&event);
        }
    }

    /// Resubscribes only on the Connected -> Disconnected edge.  A bridge
    /// that never heard a heartbeat relies on its startup `/subscribe`; if
    /// that datagram is lost it stays Disconnected until restarted.
    pub fn check_liveness(&mut self, now: Instant) {
        if let Some(Transition::Disconnected) = self.liveness.check(now) {
            warn!("Controller heartbeat lost, resubscribing");
            self.controller.subscribe();
            self.broadcast(&Event::ConnectionChanged(false));
        }
    }

    fn client_connected(&mut self, conn: ClientConnection) {
        let snapshot = Event::ConnectionChanged(self.liveness.is_connected());
        match snapshot.to_json() {
            Ok(text) => {
                if let Err(e) = conn.send(&text) {
                    warn!("Client {} snapshot failed: {}", conn.id(), e);
                }
            }
            Err(e) => warn!("Failed to serialize snapshot: {}", e),
        }

        self.clients.insert(conn);
        debug!("{} client(s) connected", self.clients.len());

        // Replies land on our own port and fan out to everyone.
        self.controller.request_values();
    }

    fn client_disconnected(&mut self, id: usize) {
        if self.clients.remove(id) {
            debug!("{} client(s) connected", self.clients.len());
        }
    }

    fn broadcast(&self, event: &Event) {
        let delivered = self.clients.broadcast(event);
        debug!("Broadcast {:?} to {} client(s)", event, delivered);
    }

    pub fn status(&self) -> BridgeStatus {
        BridgeStatus {
            controller_connected: self.liveness.is_connected(),
            last_heartbeat_at: self.liveness.last_heartbeat_at(),
            clients: self.clients.len(),
        }
    }
}
