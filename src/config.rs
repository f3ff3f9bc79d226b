//! Sink configuration.
//!
//! Bootstrap settings load from a small TOML file with per-field defaults;
//! the binary applies command-line overrides on top. Card names are given in
//! the daemon's shorthand and translated to ALSA device strings here.

use crate::error::{Result, SinkError};
use serde::Deserialize;
use std::path::Path;

/// Playback sink settings.
#[derive(Debug, Clone, Deserialize)]
pub struct SinkConfig {
    /// Card shorthand: empty or "default" for the default device, a string
    /// with ':' for a literal ALSA device name, anything else for a card
    /// behind the default plugin.
    #[serde(default = "default_card")]
    pub card: String,

    /// Keep running (and keep retrying the device) when the card cannot be
    /// opened at construction time.
    #[serde(default)]
    pub start_without_device: bool,

    /// Write worker timing records to the performance log.
    #[serde(default)]
    pub log_performance: bool,
}

fn default_card() -> String {
    "default".to_string()
}

impl Default for SinkConfig {
    fn default() -> Self {
        SinkConfig {
            card: default_card(),
            start_without_device: false,
            log_performance: false,
        }
    }
}

impl SinkConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| SinkError::Config(format!("failed to read {}: {}", path.display(), e)))?;
        toml::from_str(&text)
            .map_err(|e| SinkError::Config(format!("failed to parse {}: {}", path.display(), e)))
    }

    /// The ALSA device name for this configuration.
    pub fn device_name(&self) -> String {
        translate_cardname(&self.card)
    }
}

/// Translate a card shorthand to an ALSA device name.
pub fn translate_cardname(name: &str) -> String {
    if name.is_empty() || name == "default" {
        return "default".to_string();
    }
    // A colon means it is already a real ALSA device name.
    if name.contains(':') {
        return name.to_string();
    }
    format!("default:CARD={}", name)
}
