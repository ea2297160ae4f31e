//! # Configuration
//!
//! Layered configuration for the data layer.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     DUKAN_DEVICE_ID=register-1                                         │
//! │     DUKAN_SHOP=main                                                    │
//! │     DUKAN_DB_PATH=/var/lib/dukan/dukan.db                              │
//! │     DUKAN_START_ONLINE=false                                           │
//! │     DUKAN_EVENT_CAPACITY=512                                           │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/dukan/dukan.toml (Linux)                                 │
//! │     ~/Library/Application Support/com.dukan.pos/dukan.toml (macOS)    │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! │     generated device id, shop "main", ./dukan.db                       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! [device]
//! id = "550e8400-e29b-41d4-a716-446655440000"
//! name = "Register 1"
//!
//! [shop]
//! id = "main"
//! name = "Downtown Branch"
//!
//! [storage]
//! path = "/var/lib/dukan/dukan.db"
//! max_connections = 5
//!
//! [sync]
//! start_online = true
//! replay_on_reconnect = true
//! event_capacity = 256
//! ```

use std::path::PathBuf;

use dukan_core::validation::validate_shop;
use dukan_store::{StorageConfig, DEFAULT_EVENT_CAPACITY};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{SyncError, SyncResult};

// =============================================================================
// Device Configuration
// =============================================================================

/// Configuration for this device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Unique device identifier. Generated on first run if not provided.
    pub id: String,

    /// Human-readable device name (e.g., "Register 1").
    #[serde(default = "default_device_name")]
    pub name: String,
}

fn default_device_name() -> String {
    "POS Terminal".to_string()
}

impl Default for DeviceConfig {
    fn default() -> Self {
        DeviceConfig {
            id: Uuid::new_v4().to_string(),
            name: default_device_name(),
        }
    }
}

// =============================================================================
// Shop Configuration
// =============================================================================

/// The shop (tenant partition) this device serves.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShopConfig {
    pub id: String,

    #[serde(default)]
    pub name: String,
}

impl Default for ShopConfig {
    fn default() -> Self {
        ShopConfig {
            id: "main".to_string(),
            name: "Main Shop".to_string(),
        }
    }
}

// =============================================================================
// Storage Settings
// =============================================================================

/// Durable local storage settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageSettings {
    /// SQLite database file.
    #[serde(default = "default_db_path")]
    pub path: PathBuf,

    /// Maximum pool connections.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_db_path() -> PathBuf {
    PathBuf::from("./dukan.db")
}

fn default_max_connections() -> u32 {
    5
}

impl Default for StorageSettings {
    fn default() -> Self {
        StorageSettings {
            path: default_db_path(),
            max_connections: default_max_connections(),
        }
    }
}

impl StorageSettings {
    /// Pool configuration for these settings. A `:memory:` path opens an
    /// isolated single-connection database.
    pub fn storage_config(&self) -> StorageConfig {
        let config = StorageConfig::new(self.path.clone());
        if config.is_in_memory() {
            return StorageConfig::in_memory();
        }
        config.max_connections(self.max_connections)
    }
}

// =============================================================================
// Sync Settings
// =============================================================================

/// Connectivity and replay behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSettings {
    /// Connectivity assumed at startup.
    #[serde(default = "default_true")]
    pub start_online: bool,

    /// Replay pending offline writes on the offline → online transition.
    #[serde(default = "default_true")]
    pub replay_on_reconnect: bool,

    /// Per-listener buffer of the change notifier.
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

fn default_true() -> bool {
    true
}

fn default_event_capacity() -> usize {
    DEFAULT_EVENT_CAPACITY
}

impl Default for SyncSettings {
    fn default() -> Self {
        SyncSettings {
            start_online: true,
            replay_on_reconnect: true,
            event_capacity: default_event_capacity(),
        }
    }
}

// =============================================================================
// Main Configuration
// =============================================================================

/// Complete data layer configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DukanConfig {
    #[serde(default)]
    pub device: DeviceConfig,

    #[serde(default)]
    pub shop: ShopConfig,

    #[serde(default)]
    pub storage: StorageSettings,

    #[serde(default)]
    pub sync: SyncSettings,
}

impl DukanConfig {
    /// Creates a config with defaults and a generated device ID.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (dukan.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> SyncResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading config from file");
                let contents = std::fs::read_to_string(&path)?;
                config = toml::from_str(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Loads config or returns defaults if loading fails.
    pub fn load_or_default(config_path: Option<PathBuf>) -> Self {
        Self::load(config_path).unwrap_or_else(|e| {
            warn!("Failed to load config: {}. Using defaults.", e);
            Self::default()
        })
    }

    /// Saves configuration to file.
    pub fn save(&self, config_path: Option<PathBuf>) -> SyncResult<()> {
        let path = config_path
            .or_else(Self::default_config_path)
            .ok_or_else(|| SyncError::ConfigSaveFailed("No config path available".into()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&path, contents)?;

        info!(?path, "Config saved");
        Ok(())
    }

    /// Validates the configuration.
    pub fn validate(&self) -> SyncResult<()> {
        if self.device.id.trim().is_empty() {
            return Err(SyncError::MissingDeviceId);
        }

        if self.shop.id.trim().is_empty() {
            return Err(SyncError::MissingShop);
        }
        validate_shop(&self.shop.id).map_err(|e| SyncError::InvalidConfig(e.to_string()))?;

        if self.storage.max_connections == 0 {
            return Err(SyncError::InvalidConfig(
                "max_connections must be greater than 0".into(),
            ));
        }

        if self.sync.event_capacity == 0 {
            return Err(SyncError::InvalidConfig(
                "event_capacity must be greater than 0".into(),
            ));
        }

        Ok(())
    }

    /// Applies environment variable overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(id) = std::env::var("DUKAN_DEVICE_ID") {
            debug!(device_id = %id, "Overriding device ID from environment");
            self.device.id = id;
        }

        if let Ok(shop) = std::env::var("DUKAN_SHOP") {
            debug!(shop = %shop, "Overriding shop from environment");
            self.shop.id = shop;
        }

        if let Ok(path) = std::env::var("DUKAN_DB_PATH") {
            debug!(path = %path, "Overriding database path from environment");
            self.storage.path = PathBuf::from(path);
        }

        if let Ok(online) = std::env::var("DUKAN_START_ONLINE") {
            match online.to_lowercase().as_str() {
                "1" | "true" | "yes" => self.sync.start_online = true,
                "0" | "false" | "no" => self.sync.start_online = false,
                _ => warn!(value = %online, "Unknown DUKAN_START_ONLINE value"),
            }
        }

        if let Ok(capacity) = std::env::var("DUKAN_EVENT_CAPACITY") {
            if let Ok(c) = capacity.parse::<usize>() {
                debug!(capacity = c, "Overriding event capacity from environment");
                self.sync.event_capacity = c;
            }
        }
    }

    /// Returns the default config file path.
    fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "dukan", "pos")
            .map(|dirs| dirs.config_dir().join("dukan.toml"))
    }

    // =========================================================================
    // Convenience Methods
    // =========================================================================

    pub fn device_id(&self) -> &str {
        &self.device.id
    }

    pub fn shop_id(&self) -> &str {
        &self.shop.id
    }
}
