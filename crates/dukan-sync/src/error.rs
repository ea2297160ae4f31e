//! # Sync Error Types
//!
//! Error types for the coordination layer.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Sync Error Categories                             │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │  Configuration  │  │     Remote      │  │     Local               │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  InvalidConfig  │  │  Unavailable    │  │  Storage(StoreError)    │ │
//! │  │  MissingDeviceId│  │  NotFound       │  │  Core(CoreError)        │ │
//! │  │  MissingShop    │  │  Rejected       │  │  SerializationFailed    │ │
//! │  │  ConfigLoad/Save│  │  Closed         │  │                         │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! │                                                                         │
//! │  Readers surface RemoteError on their view instead of failing.         │
//! │  Stock operations turn SyncError into outcome values.                  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use dukan_core::{CoreError, ValidationError};
use dukan_store::StoreError;
use thiserror::Error;

/// Result type alias for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

// =============================================================================
// Remote Error
// =============================================================================

/// Failures surfaced by the remote store.
///
/// Cloneable so a reader can keep the last one on its published view.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
    /// The remote store can't be reached.
    #[error("Remote store unavailable: {0}")]
    Unavailable(String),

    /// The caller may not read or write the collection.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// A point read or update referenced a missing document.
    #[error("{collection}/{id} not found in remote store")]
    NotFound { collection: String, id: String },

    /// The remote store rejected a write.
    #[error("Remote store rejected the write: {0}")]
    Rejected(String),

    /// The subscription stream ended.
    #[error("Remote subscription closed")]
    SubscriptionClosed,
}

impl RemoteError {
    pub fn not_found(collection: impl Into<String>, id: impl Into<String>) -> Self {
        RemoteError::NotFound {
            collection: collection.into(),
            id: id.into(),
        }
    }
}

// =============================================================================
// Sync Error
// =============================================================================

/// Everything the coordination layer can fail with.
#[derive(Debug, Error)]
pub enum SyncError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Missing device ID.
    #[error("Device ID not configured. Run initial setup first.")]
    MissingDeviceId,

    /// Missing shop.
    #[error("Shop not configured")]
    MissingShop,

    /// Failed to load config file.
    #[error("Failed to load config: {0}")]
    ConfigLoadFailed(String),

    /// Failed to save config file.
    #[error("Failed to save config: {0}")]
    ConfigSaveFailed(String),

    // =========================================================================
    // Component Errors
    // =========================================================================
    /// Durable local storage failed.
    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),

    /// The remote store failed.
    #[error("Remote error: {0}")]
    Remote(#[from] RemoteError),

    /// Domain rule violation.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Failed to encode or decode a payload.
    #[error("Serialization failed: {0}")]
    SerializationFailed(String),

    // =========================================================================
    // Internal Errors
    // =========================================================================
    /// Channel send/receive failed.
    #[error("Channel error: {0}")]
    ChannelError(String),

    /// The agent is shutting down.
    #[error("Sync agent is shutting down")]
    ShuttingDown,

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<ValidationError> for SyncError {
    fn from(err: ValidationError) -> Self {
        SyncError::Core(CoreError::Validation(err))
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::SerializationFailed(err.to_string())
    }
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::de::Error> for SyncError {
    fn from(err: toml::de::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::ser::Error> for SyncError {
    fn from(err: toml::ser::Error) -> Self {
        SyncError::ConfigSaveFailed(err.to_string())
    }
}

// =============================================================================
// Error Categorization (for retry logic)
// =============================================================================

impl SyncError {
    /// Returns true if the operation can be retried later.
    ///
    /// ## Retryable Errors
    /// - Remote store unreachable or stream closed
    /// - Storage pool exhausted or connection lost
    ///
    /// ## Non-Retryable Errors
    /// - Configuration errors
    /// - Rejected writes and domain rule violations
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SyncError::Remote(RemoteError::Unavailable(_))
                | SyncError::Remote(RemoteError::SubscriptionClosed)
                | SyncError::Storage(StoreError::PoolExhausted)
                | SyncError::Storage(StoreError::ConnectionFailed(_))
                | SyncError::ChannelError(_)
        )
    }

    /// Returns true if this error indicates a configuration problem.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            SyncError::InvalidConfig(_)
                | SyncError::MissingDeviceId
                | SyncError::MissingShop
                | SyncError::ConfigLoadFailed(_)
                | SyncError::ConfigSaveFailed(_)
        )
    }
}
