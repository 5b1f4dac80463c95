use std::time::Duration;
use tokio::time::Instant;

/// Coalesces bursts of song-name changes into a single delivery.
///
/// Names equal to the last *delivered* one are ignored.  Any other name
/// (re)arms the window with itself as the candidate; when the window elapses
/// without a newer candidate, it becomes the delivered name.
#[derive(Debug)]
pub struct SongDebounce {
    window: Duration,
    last_delivered: Option<String>,
    pending: Option<(String, Instant)>,
}

impl SongDebounce {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_delivered: None,
            pending: None,
        }
    }

    /// Returns true if `name` became the pending candidate.
    pub fn offer(&mut self, name: String, now: Instant) -> bool {
        if self.last_delivered.as_deref() == Some(name.as_str()) {
            return false;
        }
        self.pending = Some((name, now + self.window));
        true
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.pending.as_ref().map(|(_, due)| *due)
    }

    /// Deliver the candidate if its window has elapsed.
    pub fn fire(&mut self, now: Instant) -> Option<String> {
        match self.pending.take() {
            Some((name, due)) if due <= now => {
                self.last_delivered = Some(name.clone());
                Some(name)
            }
            other => {
                self.pending = other;
                None
            }
        }
    }

    /// Forget the last delivered name so an identical one fires again.
    /// A pending candidate is left alone.
    pub fn reset(&mut self) {
        self.last_delivered = None;
    }

    pub fn last_delivered(&self) -> Option<&str> {
        self.last_delivered.as_deref()
    }
}
