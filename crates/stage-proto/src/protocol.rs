use serde::{Deserialize, Serialize};

use crate::osc::{OscArg, OscMessage};

/// OSC addresses spoken by the stage controller.
pub mod address {
    // bridge -> controller
    pub const SUBSCRIBE: &str = "/subscribe";
    pub const UNSUBSCRIBE: &str = "/unsubscribe";
    pub const GET_VALUES: &str = "/getValues";

    // controller -> bridge
    pub const HEARTBEAT: &str = "/heartbeat";
    pub const ACTIVE_SONG_NAME: &str = "/setlist/activeSongName";
    pub const ACTIVE_SONG_PROGRESS: &str = "/setlist/activeSongProgress";
    pub const IS_PLAYING: &str = "/global/isPlaying";
}

/// Performance state pushed from the bridge to every display.
///
/// Serialized as one JSON object per push-stream message:
/// `{"type": "songName", "value": "Intro"}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum Event {
    #[serde(rename = "songName")]
    SongChanged(String),
    #[serde(rename = "progress")]
    ProgressUpdated(f64),
    #[serde(rename = "playing")]
    PlaybackChanged(bool),
    /// Controller connectivity as seen by the bridge.
    #[serde(rename = "connected")]
    ConnectionChanged(bool),
}

impl Event {
    pub fn to_json(&self) -> anyhow::Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(text: &str) -> anyhow::Result<Self> {
        Ok(serde_json::from_str(text)?)
    }
}

/// A decoded controller message the bridge knows how to act on.
#[derive(Debug, Clone, PartialEq)]
pub enum ControlEvent {
    Heartbeat,
    Song(String),
    Progress(f64),
    Playing(bool),
}

impl ControlEvent {
    /// Map a controller message onto a `ControlEvent`.  Returns `None` for
    /// unknown addresses and for known addresses whose first argument has the
    /// wrong type.
    pub fn classify(msg: &OscMessage) -> Option<Self> {
        match msg.addr.as_str() {
            address::HEARTBEAT => Some(ControlEvent::Heartbeat),
            address::ACTIVE_SONG_NAME => msg
                .arg(0)
                .and_then(OscArg::as_str)
                .map(|name| ControlEvent::Song(name.to_string())),
            address::ACTIVE_SONG_PROGRESS => msg
                .arg(0)
                .and_then(OscArg::as_f64)
                .map(ControlEvent::Progress),
            address::IS_PLAYING => msg
                .arg(0)
                .and_then(OscArg::as_bool)
                .map(ControlEvent::Playing),
            _ => None,
        }
    }

    /// The push-stream event this message produces, if any.  Heartbeats only
    /// feed liveness tracking.
    pub fn into_event(self) -> Option<Event> {
        match self {
            ControlEvent::Heartbeat => None,
            ControlEvent::Song(name) => Some(Event::SongChanged(name)),
            ControlEvent::Progress(fraction) => Some(Event::ProgressUpdated(fraction)),
            ControlEvent::Playing(playing) => Some(Event::PlaybackChanged(playing)),
        }
    }
}

/// What the bridge announces to the controller.  Sent verbatim on every
/// (re)subscribe; the controller treats repeats as a no-op.
#[derive(Debug, Clone, PartialEq)]
pub struct Subscription {
    pub mode: String,
    pub return_port: u16,
    pub client_name: String,
    pub precision: String,
    pub features: Vec<String>,
}

impl Subscription {
    pub fn subscribe_message(&self) -> OscMessage {
        let mut args: Vec<OscArg> = vec![
            self.mode.as_str().into(),
            OscArg::Int(self.return_port as i32),
            self.client_name.as_str().into(),
            self.precision.as_str().into(),
        ];
        args.extend(self.features.iter().map(|f| OscArg::from(f.as_str())));
        OscMessage::new(address::SUBSCRIBE, args)
    }

    pub fn unsubscribe_message(&self) -> OscMessage {
        OscMessage::new(
            address::UNSUBSCRIBE,
            vec![self.mode.as_str().into(), OscArg::Int(self.return_port as i32)],
        )
    }

    /// Ask the controller to resend every current value to our listen port.
    pub fn get_values_message(&self) -> OscMessage {
        OscMessage::new(
            address::GET_VALUES,
            vec![OscArg::Int(self.return_port as i32)],
        )
    }
}
