use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::platform;
use super::protocol::{address, Subscription};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub controller: ControllerConfig,
    #[serde(default)]
    pub bridge: BridgeConfig,
    #[serde(default)]
    pub relay: RelayConfig,
    #[serde(default)]
    pub display: DisplayConfig,
}

/// Where the stage controller lives and how the bridge introduces itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerConfig {
    #[serde(default = "default_controller_host")]
    pub host: String,
    #[serde(default = "default_controller_port")]
    pub port: u16,
    #[serde(default = "default_client_name")]
    pub client_name: String,
    #[serde(default = "default_mode")]
    pub mode: String,
    #[serde(default = "default_precision")]
    pub precision: String,
    /// Feature paths announced in every subscribe request.
    #[serde(default = "default_features")]
    pub features: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_osc_port")]
    pub osc_port: u16,
    #[serde(default = "default_ws_port")]
    pub ws_port: u16,
    #[serde(default = "default_heartbeat_timeout_ms")]
    pub heartbeat_timeout_ms: u64,
    #[serde(default = "default_liveness_check_ms")]
    pub liveness_check_ms: u64,
    /// Time given to the outbound unsubscribe datagram before sockets close.
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    #[serde(default = "default_relay_url")]
    pub url: String,
    #[serde(default = "default_base_backoff_ms")]
    pub base_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    #[serde(default = "default_song_debounce_ms")]
    pub song_debounce_ms: u64,
}

/// Song data source and render target for the display.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DisplayConfig {
    /// Local JSON file holding the song records (takes priority over `songs_url`).
    #[serde(default)]
    pub songs_file: Option<PathBuf>,
    /// HTTP endpoint returning the song records as a JSON array.
    #[serde(default)]
    pub songs_url: Option<String>,
    /// File the rendered page is written to.  Stdout when unset.
    #[serde(default)]
    pub output: Option<PathBuf>,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            host: default_controller_host(),
            port: default_controller_port(),
            client_name: default_client_name(),
            mode: default_mode(),
            precision: default_precision(),
            features: default_features(),
        }
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            osc_port: default_osc_port(),
            ws_port: default_ws_port(),
            heartbeat_timeout_ms: default_heartbeat_timeout_ms(),
            liveness_check_ms: default_liveness_check_ms(),
            shutdown_grace_ms: default_shutdown_grace_ms(),
        }
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            url: default_relay_url(),
            base_backoff_ms: default_base_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            song_debounce_ms: default_song_debounce_ms(),
        }
    }
}

fn default_controller_host() -> String {
    "127.0.0.1".to_string()
}

fn default_controller_port() -> u16 {
    platform::CONTROLLER_OSC_PORT
}

fn default_client_name() -> String {
    "stage-bridge".to_string()
}

fn default_mode() -> String {
    "auto".to_string()
}

fn default_precision() -> String {
    "0.01".to_string()
}

fn default_features() -> Vec<String> {
    vec![
        address::ACTIVE_SONG_NAME.to_string(),
        address::ACTIVE_SONG_PROGRESS.to_string(),
        address::IS_PLAYING.to_string(),
    ]
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_osc_port() -> u16 {
    platform::BRIDGE_OSC_PORT
}

fn default_ws_port() -> u16 {
    platform::BRIDGE_WS_PORT
}

fn default_heartbeat_timeout_ms() -> u64 {
    6000
}

fn default_liveness_check_ms() -> u64 {
    3000
}

fn default_shutdown_grace_ms() -> u64 {
    200
}

fn default_relay_url() -> String {
    format!("ws://127.0.0.1:{}/", platform::BRIDGE_WS_PORT)
}

fn default_base_backoff_ms() -> u64 {
    1000
}

fn default_max_backoff_ms() -> u64 {
    10_000
}

fn default_song_debounce_ms() -> u64 {
    300
}

impl Config {
    /// Load from the default location, writing a default file on first run.
    pub fn load() -> anyhow::Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            let config = Self::default();
            config.save_to(&config_path)?;
            return Ok(config);
        }

        Self::load_from(&config_path)
    }

    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        platform::config_dir().join("config.toml")
    }

    /// The announcement sent to the controller, with replies routed to the
    /// bridge's OSC port.
    pub fn subscription(&self) -> Subscription {
        Subscription {
            mode: self.controller.mode.clone(),
            return_port: self.bridge.osc_port,
            client_name: self.controller.client_name.clone(),
            precision: self.controller.precision.clone(),
            features: self.controller.features.clone(),
        }
    }
}

impl ControllerConfig {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl BridgeConfig {
    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_millis(self.heartbeat_timeout_ms)
    }

    pub fn liveness_check_interval(&self) -> Duration {
        Duration::from_millis(self.liveness_check_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

impl RelayConfig {
    pub fn base_backoff(&self) -> Duration {
        Duration::from_millis(self.base_backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }

    pub fn song_debounce(&self) -> Duration {
        Duration::from_millis(self.song_debounce_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.controller.address(), "127.0.0.1:39051");
        assert_eq!(config.bridge.osc_port, 39052);
        assert_eq!(config.bridge.ws_port, 8081);
        assert_eq!(config.bridge.heartbeat_timeout(), Duration::from_secs(6));
        assert_eq!(config.bridge.liveness_check_interval(), Duration::from_secs(3));
        assert_eq!(config.relay.base_backoff(), Duration::from_millis(1000));
        assert_eq!(config.relay.max_backoff(), Duration::from_millis(10_000));
        assert_eq!(config.relay.song_debounce(), Duration::from_millis(300));
        assert!(config.display.songs_file.is_none());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let content = r#"
            [bridge]
            ws_port = 9000

            [controller]
            host = "10.0.0.5"
        "#;
        let config: Config = toml::from_str(content).unwrap();
        assert_eq!(config.bridge.ws_port, 9000);
        assert_eq!(config.bridge.osc_port, 39052);
        assert_eq!(config.controller.address(), "10.0.0.5:39051");
        assert_eq!(config.controller.features.len(), 3);
        assert_eq!(config.relay.url, "ws://127.0.0.1:8081/");
    }

    #[test]
    fn test_save_and_load_roundtrip_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = Config::default();
        config.display.songs_url = Some("http://band.local/api/songs".into());
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(
            loaded.display.songs_url.as_deref(),
            Some("http://band.local/api/songs")
        );
    }

    #[test]
    fn test_subscription_uses_bridge_port() {
        let mut config = Config::default();
        config.bridge.osc_port = 40000;
        let sub = config.subscription();
        assert_eq!(sub.return_port, 40000);
        assert_eq!(sub.client_name, "stage-bridge");
        assert_eq!(sub.features, config.controller.features);
    }
}
