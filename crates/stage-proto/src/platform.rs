use std::path::PathBuf;

/// Port the controller listens on for OSC requests.
pub const CONTROLLER_OSC_PORT: u16 = 39051;
/// Port the bridge binds for controller replies and pushes.
pub const BRIDGE_OSC_PORT: u16 = 39052;
/// Port the bridge serves push-stream clients on.
pub const BRIDGE_WS_PORT: u16 = 8081;

pub fn data_dir() -> PathBuf {
    // On macOS and Linux, use ~/.local/share/stage/ (XDG standard)
    #[cfg(unix)]
    {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join(".local")
            .join("share")
            .join("stage")
    }
    #[cfg(windows)]
    {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("stage")
    }
}

pub fn config_dir() -> PathBuf {
    #[cfg(unix)]
    {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".config")
            .join("stage")
    }
    #[cfg(windows)]
    {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("stage")
    }
}
