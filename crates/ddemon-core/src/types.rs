//! Core domain types

use serde::{Deserialize, Serialize};
use std::fmt;

/// Connection state of a device as reported by `adb devices`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceState {
    Offline,
    Online,
    Unauthorized,
    Unknown,
}

impl DeviceState {
    /// Parse the state column of `adb devices -l` output
    pub fn parse(raw: &str) -> Self {
        match raw {
            "device" => DeviceState::Online,
            "offline" => DeviceState::Offline,
            "unauthorized" => DeviceState::Unauthorized,
            _ => DeviceState::Unknown,
        }
    }
}

/// Deployment session lifecycle phase.
///
/// Advisory: real progress is driven by event order, not by state checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Created,
    EmulatorStarting,
    WaitingForDevice,
    Deploying,
    Running,
    Terminated,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Terminated)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Created => "created",
            SessionState::EmulatorStarting => "emulator starting",
            SessionState::WaitingForDevice => "waiting for device",
            SessionState::Deploying => "deploying",
            SessionState::Running => "running",
            SessionState::Terminated => "terminated",
        };
        f.write_str(name)
    }
}

/// The application component to deploy and launch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchTarget {
    /// Application package name, from the manifest
    pub package: String,
    /// Fully qualified activity class to launch
    pub activity: String,
}

impl LaunchTarget {
    /// Build a target, expanding an activity shorthand with a leading `.`
    /// (e.g. `.MainActivity`) against the package name.
    pub fn new(package: impl Into<String>, activity: &str) -> Self {
        let package = package.into();
        let activity = if let Some(relative) = activity.strip_prefix('.') {
            format!("{}.{}", package, relative)
        } else {
            activity.to_string()
        };
        Self { package, activity }
    }

    /// `package/activity` notation used by `am start -n`
    pub fn component(&self) -> String {
        format!("{}/{}", self.package, self.activity)
    }
}
