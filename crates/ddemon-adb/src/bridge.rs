//! Device bridge trait seams
//!
//! The bridge is an owned, injected dependency: sessions receive it by
//! reference and subscribe to its event streams, so a test can drive a
//! session with a fake bridge and hand-delivered events. The bridge itself
//! is process-wide shared state; sessions must not assume exclusive
//! ownership of it and filter events by their own device/package identity.

use std::path::Path;

use tokio::sync::broadcast;

use ddemon_core::events::{ClientEvent, DeviceEvent, DeviceSnapshot};
use ddemon_core::prelude::*;
use ddemon_core::shell::RemoteCommandResult;

/// A connected device (physical or emulator).
///
/// Only transport faults surface as `Err`; everything a device reports
/// through command output — including install/launch failures — lives inside
/// a successful [`RemoteCommandResult`].
#[trait_variant::make(Device: Send)]
pub trait LocalDevice {
    /// Device serial, e.g. `emulator-5554`
    fn serial(&self) -> &str;

    /// Last known connection state
    fn is_online(&self) -> bool;

    /// Execute a single shell command on the device and classify its output
    async fn execute_shell(&self, command: &str) -> Result<RemoteCommandResult>;

    /// Push a local file to a path on the device (sync service)
    async fn push_file(&self, local: &Path, remote: &str) -> Result<()>;
}

/// Connection to the device management daemon.
///
/// Initialized once per process, independent of any single session.
/// Subscriptions end when the receiver is dropped, so a session unsubscribes
/// deterministically by ending its event loop.
#[trait_variant::make(DeviceBridge: Send)]
pub trait LocalDeviceBridge {
    /// Device handle type produced by this bridge
    type Dev: Device + Send + Sync + 'static;

    /// Initialize the bridge (e.g. `adb start-server`) and begin monitoring
    async fn start(&self) -> Result<()>;

    /// Stop monitoring. Leaves the underlying daemon running: it is shared
    /// with other tools on the machine.
    async fn terminate(&self) -> Result<()>;

    /// Subscribe to device connect/disconnect/change notifications.
    ///
    /// Only events after the subscription are delivered; devices that were
    /// already connected never produce another event. Consumers must pair
    /// this with [`known_devices`](Self::known_devices).
    fn subscribe_devices(&self) -> broadcast::Receiver<DeviceEvent>;

    /// Last known snapshot of every connected device.
    ///
    /// Read after subscribing so a device that came up before the
    /// subscription is not missed.
    fn known_devices(&self) -> Vec<DeviceSnapshot>;

    /// Subscribe to client (debuggable app process) notifications
    fn subscribe_clients(&self) -> broadcast::Receiver<ClientEvent>;

    /// Construct a handle for the device with the given serial
    fn device(&self, serial: &str) -> Self::Dev;
}
