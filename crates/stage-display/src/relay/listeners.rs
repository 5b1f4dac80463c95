use tracing::warn;

/// A registered callback.  Returning an error is logged and does not stop the
/// remaining listeners from running.
pub type Listener<T> = Box<dyn FnMut(&T) -> anyhow::Result<()> + Send>;

pub struct ListenerList<T> {
    name: &'static str,
    listeners: Vec<Listener<T>>,
}

impl<T> ListenerList<T> {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            listeners: Vec::new(),
        }
    }

    pub fn push<F>(&mut self, listener: F)
    where
        F: FnMut(&T) -> anyhow::Result<()> + Send + 'static,
    {
        self.listeners.push(Box::new(listener));
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    /// Invoke every listener in registration order.
    pub fn emit(&mut self, value: &T) {
        for (idx, listener) in self.listeners.iter_mut().enumerate() {
            if let Err(e) = listener(value) {
                warn!("{} listener #{} failed: {:#}", self.name, idx, e);
            }
        }
    }
}

/// Which link a connection notification is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionSource {
    /// The relay's own push-stream socket to the bridge.
    Relay,
    /// The stage controller, as reported by the bridge.
    Controller,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionStatus {
    pub connected: bool,
    pub source: ConnectionSource,
}

/// One listener list per event category.
pub struct Listeners {
    pub song_change: ListenerList<String>,
    pub progress: ListenerList<f64>,
    pub playback: ListenerList<bool>,
    pub connection: ListenerList<ConnectionStatus>,
}

impl Default for Listeners {
    fn default() -> Self {
        Self {
            song_change: ListenerList::new("songChange"),
            progress: ListenerList::new("progress"),
            playback: ListenerList::new("playback"),
            connection: ListenerList::new("connection"),
        }
    }
}
