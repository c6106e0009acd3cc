use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub link: LinkConfig,
    pub storage: StorageConfig,
    pub cloud: CloudConfig,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LinkConfig {
    /// In-process simulated MCU.
    Mock,
    /// Real peripheral on a serial/USB device.
    Serial {
        device: String,
        #[serde(default = "default_baud")]
        baud: u32,
    },
    /// ser2net-style TCP bridge to the peripheral.
    Tcp { addr: String },
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self::Mock
    }
}

fn default_baud() -> u32 {
    115_200
}

#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StorageConfig {
    Memory,
    Sqlite { path: PathBuf },
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self::Sqlite {
            path: PathBuf::from("hansom-trips.db"),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct CloudConfig {
    pub auth_base_url: Option<String>,
    /// Raw device token exchanged for a bearer token at startup.
    pub auth_token: Option<String>,
    pub heartbeat_secs: u64,
}

impl Default for CloudConfig {
    fn default() -> Self {
        Self {
            auth_base_url: None,
            auth_token: None,
            heartbeat_secs: 30,
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&text)?)
    }
}
