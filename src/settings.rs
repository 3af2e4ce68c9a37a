//! Binding-level settings.
use crate::error::BridgeResult;
use config::Config;
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    /// Log file the phidget22 driver writes to, if any.
    pub log_file: Option<String>,
    /// Length of a discovery scan, in seconds.
    #[serde(default = "default_discovery_window_secs")]
    pub discovery_window_secs: u64,
}

fn default_discovery_window_secs() -> u64 {
    5
}

impl Default for Settings {
    fn default() -> Self {
        Self { log_file: None, discovery_window_secs: default_discovery_window_secs() }
    }
}

impl Settings {
    /// Load settings from a TOML file. Missing optional keys fall back to
    /// their defaults.
    pub fn from_file(path: &str) -> BridgeResult<Self> {
        let s = Config::builder()
            .add_source(config::File::with_name(path))
            .build()?;
        Ok(s.try_deserialize()?)
    }
}
