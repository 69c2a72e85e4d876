//! # ddemon-deploy - Deployment Orchestration
//!
//! Drives a built application package through emulator launch, device wait,
//! upload, install, activity launch, and the optional debugger handshake.
//!
//! Depends on [`ddemon_core`] for domain types and [`ddemon_adb`] for the
//! bridge and process layers.
//!
//! ## Public API
//!
//! ### Session
//! - [`DeploymentSession`] - The end-to-end deploy state machine
//! - [`SessionHandle`] - Console stream, state observation, stop control
//! - [`EmulatorSpec`] - How (and whether) to launch an emulator
//!
//! ### Building Blocks
//! - [`DeployConfig`] - Attempt counts, retry wait, remote paths
//! - [`ArtifactSource`] / [`ApkArtifact`] - The built package and its manifest
//! - [`RetryPolicy`] - Bounded retry with a cancellable inter-attempt wait
//! - [`CancelToken`] - Write-once cancellation flag shared across tasks
//! - [`DebugHandshake`] - Debugger-waiting detection for the deployed package

pub mod artifact;
pub mod cancel;
pub mod config;
pub mod handshake;
pub mod retry;
pub mod session;
pub(crate) mod steps;

pub use artifact::{ApkArtifact, ArtifactSource};
pub use cancel::CancelToken;
pub use config::DeployConfig;
pub use handshake::DebugHandshake;
pub use retry::RetryPolicy;
pub use session::{DeploymentSession, EmulatorSpec, SessionHandle};
