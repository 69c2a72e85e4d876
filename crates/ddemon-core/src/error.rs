//! Application error types with rich context

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Application error types organized by layer/domain
#[derive(Debug, Error)]
pub enum Error {
    // ─────────────────────────────────────────────────────────────
    // Common/Infrastructure Errors
    // ─────────────────────────────────────────────────────────────
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // ─────────────────────────────────────────────────────────────
    // Tooling Errors
    // ─────────────────────────────────────────────────────────────
    #[error("adb not found. Set ANDROID_HOME or put 'adb' in your PATH.")]
    AdbNotFound,

    #[error("Android emulator not found. Set ANDROID_HOME or put 'emulator' in your PATH.")]
    EmulatorNotFound,

    // ─────────────────────────────────────────────────────────────
    // Artifact/Manifest Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Application manifest not found: {path}")]
    NoManifest { path: PathBuf },

    #[error("Manifest has no package name: {path}")]
    NoPackageName { path: PathBuf },

    // ─────────────────────────────────────────────────────────────
    // Process Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Failed to spawn emulator process: {reason}")]
    ProcessSpawn { reason: String },

    // ─────────────────────────────────────────────────────────────
    // Bridge/Device Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Device bridge error: {message}")]
    Bridge { message: String },

    #[error("Remote shell error: {message}")]
    Shell { message: String },

    #[error("File push failed: {message}")]
    Push { message: String },

    // ─────────────────────────────────────────────────────────────
    // Configuration Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },

    // ─────────────────────────────────────────────────────────────
    // Channel/Communication Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Channel send error: {message}")]
    ChannelSend { message: String },

    #[error("Channel closed unexpectedly")]
    ChannelClosed,

    // ─────────────────────────────────────────────────────────────
    // Cancellation
    // ─────────────────────────────────────────────────────────────
    /// Session was stopped. Not a failure: work that was never attempted
    /// must not be reported as failed.
    #[error("Session was stopped")]
    Cancelled,
}

// ─────────────────────────────────────────────────────────────────
// Convenience Constructors
// ─────────────────────────────────────────────────────────────────

impl Error {
    pub fn bridge(message: impl Into<String>) -> Self {
        Self::Bridge {
            message: message.into(),
        }
    }

    pub fn shell(message: impl Into<String>) -> Self {
        Self::Shell {
            message: message.into(),
        }
    }

    pub fn push(message: impl Into<String>) -> Self {
        Self::Push {
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub fn channel_send(message: impl Into<String>) -> Self {
        Self::ChannelSend {
            message: message.into(),
        }
    }

    pub fn process_spawn(reason: impl Into<String>) -> Self {
        Self::ProcessSpawn {
            reason: reason.into(),
        }
    }

    pub fn no_manifest(path: impl Into<PathBuf>) -> Self {
        Self::NoManifest { path: path.into() }
    }

    pub fn no_package_name(path: impl Into<PathBuf>) -> Self {
        Self::NoPackageName { path: path.into() }
    }

    /// Check if this error is a cancellation marker rather than a real fault
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }

    /// Check if this is a recoverable error
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::Bridge { .. }
                | Error::Shell { .. }
                | Error::ChannelSend { .. }
                | Error::Cancelled
        )
    }

    /// Check if this error should terminate the session
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::AdbNotFound
                | Error::EmulatorNotFound
                | Error::NoManifest { .. }
                | Error::NoPackageName { .. }
                | Error::ProcessSpawn { .. }
        )
    }
}

// ─────────────────────────────────────────────────────────────────
// Error Context Extensions
// ─────────────────────────────────────────────────────────────────

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context with a closure (lazy evaluation)
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T, E: Into<Error>> ResultExt<T> for std::result::Result<T, E> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| {
            let err = e.into();
            tracing::error!("{}: {:?}", context.into(), err);
            err
        })
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| {
            let err = e.into();
            tracing::error!("{}: {:?}", f(), err);
            err
        })
    }
}
