use crate::core::BridgeEvent;
use stage_proto::osc;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Largest datagram UDP can carry.
const MAX_DATAGRAM: usize = 65_536;

/// Receive controller datagrams and feed every decoded leaf message into the
/// core loop, in packet order.  Malformed packets are logged and dropped.
pub fn start_listener(
    socket: Arc<UdpSocket>,
    event_tx: mpsc::Sender<BridgeEvent>,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        if let Ok(addr) = socket.local_addr() {
            info!("OSC listener bound at {}", addr);
        }

        let mut buf = vec![0u8; MAX_DATAGRAM];
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                result = socket.recv_from(&mut buf) => {
                    let (n, peer) = match result {
                        Ok(r) => r,
                        Err(e) => {
                            // ICMP port-unreachable from an absent controller
                            // surfaces here on some platforms; keep listening.
                            debug!("UDP receive error: {}", e);
                            continue;
                        }
                    };

                    let packet = match osc::decode(&buf[..n]) {
                        Ok(p) => p,
                        Err(e) => {
                            warn!("Dropping malformed packet from {} ({} bytes): {}", peer, n, e);
                            continue;
                        }
                    };

                    for msg in packet.flatten() {
                        if event_tx.send(BridgeEvent::Osc(msg)).await.is_err() {
                            warn!("BridgeEvent channel closed");
                            return;
                        }
                    }
                }
            }
        }

        info!("OSC listener stopped");
    })
}
