//! # ddemon-adb - Device Bridge and Process Management
//!
//! Talks to devices through the adb server, supervises the emulator child
//! process, and locates the Android SDK tooling.
//!
//! Depends on [`ddemon_core`] for domain types and error handling.
//!
//! ## Public API
//!
//! ### Bridge Traits
//! - [`Device`] - A connected device: remote shell execution and file push
//! - [`DeviceBridge`] - Bridge lifecycle plus device/client event subscriptions
//!
//! ### Adb Implementation
//! - [`AdbBridge`] / [`AdbDevice`] - adb-backed bridge with a polling device
//!   monitor and a per-device JDWP client tracker
//!
//! ### Emulator Management
//! - [`EmulatorProcess`] - Spawn and supervise the Android emulator
//!
//! ### Platform Utilities
//! - [`ToolAvailability`] - Locate `adb` and `emulator` binaries

pub mod adb;
pub mod bridge;
pub mod emulator;
pub mod jdwp;
#[cfg(any(test, feature = "test-helpers"))]
pub mod test_utils;
pub mod tools;

// Public API re-exports
pub use adb::{AdbBridge, AdbConfig, AdbDevice};
pub use bridge::{Device, DeviceBridge};
pub use emulator::EmulatorProcess;
pub use tools::ToolAvailability;
