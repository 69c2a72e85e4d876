//! # ddemon-core - Core Domain Types
//!
//! Foundation crate for Droid Demon. Provides domain types, error handling,
//! event definitions, and remote shell output classification.
//!
//! This crate has **zero internal dependencies** -- it only depends on external
//! crates (serde, thiserror, regex, tracing).
//!
//! ## Public API
//!
//! ### Domain Types (`types`)
//! - [`SessionState`] - Deployment session lifecycle phase
//! - [`LaunchTarget`] - Package/activity pair to launch
//! - [`DeviceState`] - Connection state of a device as reported by the bridge
//!
//! ### Events (`events`)
//! - [`DeviceEvent`] - Device connected/disconnected/changed notifications
//! - [`ClientEvent`] - Application client (debuggable process) notifications
//! - [`EmulatorEvent`] - Emulator process stdout/stderr/exit events
//! - [`ConsoleLine`] - User-visible session output
//!
//! ### Shell Output (`shell`)
//! - [`RemoteCommandResult`] - Classified output of a remote shell command
//!
//! ### Error Handling (`error`)
//! - [`Error`] - Custom error enum with `fatal` vs `recoverable` classification
//! - [`Result`] - Type alias for `std::result::Result<T, Error>`
//! - [`ResultExt`] - Extension trait for adding error context
//!
//! ## Prelude
//!
//! Import commonly used types with:
//! ```rust
//! use ddemon_core::prelude::*;
//! ```

pub mod error;
pub mod events;
pub mod logging;
pub mod shell;
pub mod types;

/// Prelude for common imports used throughout all Droid Demon crates
pub mod prelude {
    pub use super::error::{Error, Result, ResultExt};
    pub use tracing::{debug, error, info, trace, warn};
}

// Re-export commonly used types at crate root for convenience
pub use error::{Error, Result, ResultExt};
pub use events::{
    ClientEvent, ConsoleLine, DebuggerStatus, DeviceEvent, DeviceSnapshot, EmulatorEvent,
    OutputKind,
};
pub use shell::{
    RemoteCommandResult, ACTIVITY_MANAGER_NOT_READY, INSTALL_FAILED_ALREADY_EXISTS,
    INSTALL_NOT_READY, NO_ERROR,
};
pub use types::{DeviceState, LaunchTarget, SessionState};
