//! Unified error handling for FanTuner
//!
//! This crate provides the single error type used across all FanTuner
//! components, built with thiserror for proper Display and Error impls.

use std::io;
use std::path::PathBuf;

/// Result type alias using FanTunerError
pub type Result<T> = std::result::Result<T, FanTunerError>;

/// Unified error type for all FanTuner operations
#[derive(thiserror::Error, Debug)]
pub enum FanTunerError {
    // ============================================================================
    // I/O and File System Errors
    // ============================================================================
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to read file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: io::Error,
    },

    #[error("Failed to write file {path}: {source}")]
    FileWrite {
        path: PathBuf,
        source: io::Error,
    },

    #[error("Failed to parse JSON: {0}")]
    JsonParse(#[from] serde_json::Error),

    // ============================================================================
    // Hardware Adapter Errors
    // ============================================================================
    #[error("Hardware adapter initialization failed: {0}")]
    AdapterInit(String),

    #[error("Hardware I/O error: {0}")]
    AdapterIo(String),

    #[error("Fan '{fan}' does not support software control")]
    CapabilityDenied {
        fan: String,
    },

    // ============================================================================
    // Configuration Errors
    // ============================================================================
    #[error("Invalid configuration: {0}")]
    ConfigInvalid(String),

    #[error("Configuration file is corrupt: {0}")]
    ConfigCorrupt(String),

    #[error("The default profile cannot be deleted")]
    DefaultProtected,

    #[error("Not found: {0}")]
    NotFound(String),

    // ============================================================================
    // IPC Errors
    // ============================================================================
    #[error("Invalid frame: {0}")]
    FrameInvalid(String),

    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Operation timed out: {0}")]
    Timeout(String),

    // ============================================================================
    // Generic
    // ============================================================================
    #[error("{0}")]
    Generic(String),
}

impl FanTunerError {
    /// Create a generic error from a string
    pub fn generic(msg: impl Into<String>) -> Self {
        Self::Generic(msg.into())
    }

    /// Create an adapter I/O error from a string
    pub fn adapter_io(msg: impl Into<String>) -> Self {
        Self::AdapterIo(msg.into())
    }

    /// Create a config-invalid error from a string
    pub fn config_invalid(msg: impl Into<String>) -> Self {
        Self::ConfigInvalid(msg.into())
    }

    /// Create a not-found error from a string
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// True for errors that must terminate the service.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::AdapterInit(_))
    }
}

// Allow converting from String to FanTunerError
impl From<String> for FanTunerError {
    fn from(s: String) -> Self {
        Self::Generic(s)
    }
}

// Allow converting from &str to FanTunerError
impl From<&str> for FanTunerError {
    fn from(s: &str) -> Self {
        Self::Generic(s.to_string())
    }
}
