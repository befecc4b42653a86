//! Configuration schema, defaults, and layered loading.
//!
//! Precedence: defaults < config file < environment (`CAMSYNC_`) < CLI

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, ensure};
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

use crate::core::cursor::{CursorMode, SyncCursor};
use crate::core::transfer::CHUNK_SIZE;
use crate::display::tm1637::{BRIGHTNESS_HIGHEST, BRIGHTNESS_TYPICAL};

pub const DEFAULT_CONFIG_PATH: &str = "/etc/camsync/config.toml";
const MAX_CHUNK_SIZE: usize = 8 * 1024 * 1024;

/// Where the camera's file share lives.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ShareSettings {
    pub address: String,
    pub port: u16,
    pub remote_dir: String,
    pub connect_timeout_secs: u64,
    /// Download chunk size in bytes
    pub chunk_size: usize,
}

impl Default for ShareSettings {
    fn default() -> Self {
        Self {
            address: "192.168.0.10".to_string(),
            port: 80,
            remote_dir: "/DCIM/100OLYMP".to_string(),
            connect_timeout_secs: 10,
            chunk_size: CHUNK_SIZE,
        }
    }
}

impl ShareSettings {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DhcpSettings {
    pub command: String,
    /// udhcpc event script
    pub script: PathBuf,
}

impl Default for DhcpSettings {
    fn default() -> Self {
        Self {
            command: "udhcpc".to_string(),
            script: PathBuf::from("./alpine/udhcpc.sh"),
        }
    }
}

/// External programs started by the supervisor.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CommandSettings {
    pub supplicant: String,
    pub passphrase: String,
    pub event_monitor: String,
}

impl Default for CommandSettings {
    fn default() -> Self {
        Self {
            supplicant: "wpa_supplicant".to_string(),
            passphrase: "wpa_passphrase".to_string(),
            event_monitor: "iw".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DisplaySettings {
    pub enabled: bool,
    /// Fail startup instead of falling back to console-only progress
    pub required: bool,
    pub clk: u32,
    pub dio: u32,
    pub brightness: u8,
}

impl Default for DisplaySettings {
    fn default() -> Self {
        Self {
            enabled: true,
            required: false,
            clk: 23,
            dio: 24,
            brightness: BRIGHTNESS_TYPICAL,
        }
    }
}

/// Fully resolved application configuration after all layers merge.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AppConfig {
    /// Wireless interface, e.g. `wlan0`
    pub interface: String,
    pub ssid: String,
    pub password: String,
    pub destination: PathBuf,
    /// Only sync files after this one (camera file name or timestamp)
    pub newer: Option<String>,
    pub newer_mode: CursorMode,
    pub simulation: bool,
    pub verbose: bool,
    pub json_logs: bool,
    pub share: ShareSettings,
    pub dhcp: DhcpSettings,
    pub commands: CommandSettings,
    pub display: DisplaySettings,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            interface: String::new(),
            ssid: String::new(),
            password: String::new(),
            destination: PathBuf::from("."),
            newer: None,
            newer_mode: CursorMode::Name,
            simulation: false,
            verbose: false,
            json_logs: false,
            share: ShareSettings::default(),
            dhcp: DhcpSettings::default(),
            commands: CommandSettings::default(),
            display: DisplaySettings::default(),
        }
    }
}

impl AppConfig {
    /// Load and validate configuration.
    ///
    /// `config_file` replaces the default path; a missing default file is not
    /// an error but a missing explicit one is.
    pub fn new<T: Serialize>(config_file: Option<&Path>, overrides: Option<&T>) -> Result<Self> {
        let path = match config_file {
            Some(path) => {
                ensure!(path.exists(), "Config file {} not found", path.display());
                path.to_path_buf()
            }
            None => PathBuf::from(DEFAULT_CONFIG_PATH),
        };

        let mut figment = Figment::new()
            .merge(Serialized::defaults(AppConfig::default()))
            .merge(Toml::file(&path))
            .merge(Env::prefixed("CAMSYNC_").split("__"));

        if let Some(overrides) = overrides {
            figment = figment.merge(Serialized::defaults(overrides));
        }

        let config: AppConfig = figment
            .extract()
            .context("Failed to load configuration")?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.simulation {
            ensure!(
                !self.interface.trim().is_empty(),
                "Invalid config: interface must be set"
            );
            ensure!(
                !self.ssid.trim().is_empty(),
                "Invalid config: ssid must be set"
            );
        }
        ensure!(
            !self.destination.as_os_str().is_empty(),
            "Invalid config: destination must be set"
        );
        ensure!(
            self.share.chunk_size > 0 && self.share.chunk_size <= MAX_CHUNK_SIZE,
            "Invalid config: share.chunk_size must be between 1 and {MAX_CHUNK_SIZE}"
        );
        ensure!(
            self.share.remote_dir.starts_with('/'),
            "Invalid config: share.remote_dir must be an absolute path"
        );
        ensure!(
            self.display.brightness <= BRIGHTNESS_HIGHEST,
            "Invalid config: display.brightness must be <= {BRIGHTNESS_HIGHEST}"
        );
        ensure!(
            self.display.clk != self.display.dio,
            "Invalid config: display.clk and display.dio must be different pins"
        );
        self.cursor()?;
        Ok(())
    }

    pub fn cursor(&self) -> Result<SyncCursor> {
        SyncCursor::parse(self.newer.as_deref(), self.newer_mode)
            .context("Invalid config: newer")
    }

    /// Copy safe to print: the wifi password is masked.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if !copy.password.is_empty() {
            copy.password = "********".to_string();
        }
        copy
    }
}

/// Nested overrides for the `[display]` table.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DisplayOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clk: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dio: Option<u32>,
}

impl DisplayOverrides {
    fn is_empty(&self) -> bool {
        self.enabled.is_none() && self.clk.is_none() && self.dio.is_none()
    }
}

/// Command line values layered on top of everything else.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ConfigOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interface: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ssid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub destination: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub newer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub newer_mode: Option<CursorMode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub simulation: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verbose: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub json_logs: Option<bool>,
    #[serde(skip_serializing_if = "DisplayOverrides::is_empty")]
    pub display: DisplayOverrides,
}
