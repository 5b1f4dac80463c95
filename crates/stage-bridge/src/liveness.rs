/// Controller liveness tracking.
///
/// Two states, starting `Disconnected`:
///
/// ```text
///   Disconnected --heartbeat--> Connected
///   Connected --check(): now - last_heartbeat >= timeout--> Disconnected
/// ```
///
/// The core loop calls `check()` on a fixed interval; the transition back to
/// `Disconnected` is what triggers a resubscribe.
use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Connected,
    Disconnected,
}

#[derive(Debug)]
pub struct Liveness {
    connected: bool,
    last_heartbeat: Option<Instant>,
    /// Wall-clock time of the last heartbeat, for status reporting only.
    last_heartbeat_at: Option<DateTime<Utc>>,
    timeout: Duration,
}

impl Liveness {
    pub fn new(timeout: Duration) -> Self {
        Self {
            connected: false,
            last_heartbeat: None,
            last_heartbeat_at: None,
            timeout,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn last_heartbeat_at(&self) -> Option<DateTime<Utc>> {
        self.last_heartbeat_at
    }

    pub fn heartbeat(&mut self, now: Instant) -> Option<Transition> {
        self.last_heartbeat = Some(now);
        self.last_heartbeat_at = Some(Utc::now());
        if self.connected {
            None
        } else {
            self.connected = true;
            Some(Transition::Connected)
        }
    }

    pub fn check(&mut self, now: Instant) -> Option<Transition> {
        if !self.connected {
            return None;
        }
        let last = self.last_heartbeat?;
        if now.saturating_duration_since(last) >= self.timeout {
            self.connected = false;
            Some(Transition::Disconnected)
        } else {
            None
        }
    }
}
