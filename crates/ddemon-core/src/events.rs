//! Domain event definitions
//!
//! One typed event stream per concern: device lifecycle, client (debuggable
//! app process) lifecycle, and emulator process output. Sessions subscribe to
//! the streams they need and unsubscribe deterministically on termination.

use serde::{Deserialize, Serialize};

use crate::types::DeviceState;

/// Point-in-time view of a device as reported by the bridge
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct DeviceSnapshot {
    /// Device serial, e.g. `emulator-5554`
    pub serial: String,
    /// Connection state at the time of the event
    pub state: DeviceState,
}

impl DeviceSnapshot {
    pub fn new(serial: impl Into<String>, state: DeviceState) -> Self {
        Self {
            serial: serial.into(),
            state,
        }
    }

    pub fn is_online(&self) -> bool {
        self.state == DeviceState::Online
    }
}

/// Device lifecycle notifications from the bridge.
///
/// `Changed` may arrive multiple times for the same device (state or
/// capability changes); consumers must be idempotent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceEvent {
    Connected(DeviceSnapshot),
    Disconnected(DeviceSnapshot),
    Changed(DeviceSnapshot),
}

impl DeviceEvent {
    pub fn snapshot(&self) -> &DeviceSnapshot {
        match self {
            DeviceEvent::Connected(s) | DeviceEvent::Disconnected(s) | DeviceEvent::Changed(s) => s,
        }
    }
}

/// Debugger connection status of a client process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DebuggerStatus {
    /// No debugger activity
    Default,
    /// Client suspended at startup, waiting for a debugger to attach
    Waiting,
    /// A debugger is attached
    Attached,
    /// Debug handshake failed
    Error,
}

/// A running (debuggable) application process observed on a device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientEvent {
    /// Serial of the device the client runs on
    pub serial: String,
    /// Process id on the device
    pub pid: u32,
    /// Client descriptor, normally the application package name.
    /// May be absent while the process is still starting.
    pub description: Option<String>,
    /// Debugger connection status
    pub debugger: DebuggerStatus,
    /// Local port forwarded to the client's JDWP transport, if any
    pub jdwp_port: Option<u16>,
}

/// Events from the emulator child process
#[derive(Debug, Clone)]
pub enum EmulatorEvent {
    /// Raw stdout line from the emulator
    Stdout(String),

    /// Stderr output (usually errors/warnings)
    Stderr(String),

    /// Emulator process has exited
    Exited { code: Option<i32> },
}

/// Destination stream for a console line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputKind {
    Stdout,
    Stderr,
}

/// One line of user-visible session output.
///
/// Every step that fails prints a human-readable explanation plus the raw
/// remote output; the session never goes silent.
#[derive(Debug, Clone)]
pub struct ConsoleLine {
    pub kind: OutputKind,
    pub text: String,
}

impl ConsoleLine {
    pub fn stdout(text: impl Into<String>) -> Self {
        Self {
            kind: OutputKind::Stdout,
            text: text.into(),
        }
    }

    pub fn stderr(text: impl Into<String>) -> Self {
        Self {
            kind: OutputKind::Stderr,
            text: text.into(),
        }
    }
}
