/// Outbound side of the controller link.
///
/// Every request is a single fire-and-forget datagram.  There is no
/// acknowledgement; lost requests are covered by resubscribing whenever the
/// heartbeat goes quiet.
use stage_proto::osc::{self, OscMessage};
use stage_proto::protocol::Subscription;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tracing::{debug, warn};

/// Best-effort sink for controller requests.
pub trait ControlLink: Send {
    fn send(&self, msg: &OscMessage);
}

/// Sends through the bridge's own listening socket so the controller sees the
/// same source port it replies to.
pub struct UdpControlLink {
    socket: Arc<UdpSocket>,
    target: SocketAddr,
}

impl UdpControlLink {
    pub fn new(socket: Arc<UdpSocket>, target: SocketAddr) -> Self {
        Self { socket, target }
    }
}

impl ControlLink for UdpControlLink {
    fn send(&self, msg: &OscMessage) {
        let bytes = osc::encode(msg);
        match self.socket.try_send_to(&bytes, self.target) {
            Ok(_) => debug!("-> {} {}", self.target, msg.addr),
            Err(e) => warn!("Failed to send {} to {}: {}", msg.addr, self.target, e),
        }
    }
}

pub struct Controller {
    link: Box<dyn ControlLink>,
    subscription: Subscription,
}

impl Controller {
    pub fn new(link: Box<dyn ControlLink>, subscription: Subscription) -> Self {
        Self { link, subscription }
    }

    pub fn subscribe(&self) {
        self.link.send(&self.subscription.subscribe_message());
    }

    pub fn unsubscribe(&self) {
        self.link.send(&self.subscription.unsubscribe_message());
    }

    /// Ask for a full resend of current values.  Replies go to the bridge's
    /// listen port, so every connected display benefits.
    pub fn request_values(&self) {
        self.link.send(&self.subscription.get_values_message());
    }
}
