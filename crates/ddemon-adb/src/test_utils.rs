//! Test utilities for bridge types
//!
//! Provides a scriptable [`FakeDevice`] and a hand-driven [`FakeBridge`] so
//! session logic can be exercised without adb, a device, or an emulator.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::broadcast;

use ddemon_core::events::{ClientEvent, DeviceEvent, DeviceSnapshot};
use ddemon_core::prelude::*;
use ddemon_core::shell::RemoteCommandResult;

use crate::bridge::{Device, DeviceBridge};

#[derive(Default)]
struct FakeDeviceState {
    /// One-shot responses per command prefix, consumed in order
    queued: HashMap<String, Vec<String>>,
    /// Fallback repeated response per command prefix
    always: HashMap<String, String>,
    /// Commands issued, in order
    commands: Vec<String>,
    /// Pushes issued as (local, remote)
    pushes: Vec<(PathBuf, String)>,
    /// Error message to fail pushes with, if any
    push_failure: Option<String>,
}

/// A device whose shell responses are scripted by the test.
///
/// Responses are keyed by command prefix; the longest matching prefix wins,
/// so `pm install -r` can be scripted independently of `pm install`.
/// Unscripted commands succeed with empty output.
#[derive(Clone)]
pub struct FakeDevice {
    serial: String,
    online: Arc<AtomicBool>,
    state: Arc<Mutex<FakeDeviceState>>,
}

impl FakeDevice {
    pub fn new(serial: &str) -> Self {
        Self {
            serial: serial.to_string(),
            online: Arc::new(AtomicBool::new(true)),
            state: Arc::new(Mutex::new(FakeDeviceState::default())),
        }
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    /// Queue one response for commands starting with `prefix`
    pub fn respond(&self, prefix: &str, raw_output: &str) {
        self.state
            .lock()
            .unwrap()
            .queued
            .entry(prefix.to_string())
            .or_default()
            .push(raw_output.to_string());
    }

    /// Respond with `raw_output` every time once the queue for `prefix` is empty
    pub fn respond_always(&self, prefix: &str, raw_output: &str) {
        self.state
            .lock()
            .unwrap()
            .always
            .insert(prefix.to_string(), raw_output.to_string());
    }

    /// Make every subsequent push fail with the given message
    pub fn fail_push(&self, message: &str) {
        self.state.lock().unwrap().push_failure = Some(message.to_string());
    }

    /// All shell commands issued so far, in order
    pub fn commands(&self) -> Vec<String> {
        self.state.lock().unwrap().commands.clone()
    }

    /// Number of issued commands starting with `prefix`
    pub fn command_count(&self, prefix: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .commands
            .iter()
            .filter(|cmd| cmd.starts_with(prefix))
            .count()
    }

    /// All pushes issued so far
    pub fn pushes(&self) -> Vec<(PathBuf, String)> {
        self.state.lock().unwrap().pushes.clone()
    }

    fn respond_to(&self, command: &str) -> String {
        let mut state = self.state.lock().unwrap();
        state.commands.push(command.to_string());

        // Longest matching prefix wins, checking queued responses first
        let queued_key = state
            .queued
            .iter()
            .filter(|(prefix, queue)| command.starts_with(prefix.as_str()) && !queue.is_empty())
            .map(|(prefix, _)| prefix.clone())
            .max_by_key(|prefix| prefix.len());

        if let Some(prefix) = queued_key {
            let queue = state.queued.get_mut(&prefix).expect("prefix just found");
            return queue.remove(0);
        }

        state
            .always
            .iter()
            .filter(|(prefix, _)| command.starts_with(prefix.as_str()))
            .max_by_key(|(prefix, _)| prefix.len())
            .map(|(_, raw)| raw.clone())
            .unwrap_or_default()
    }
}

impl Device for FakeDevice {
    fn serial(&self) -> &str {
        &self.serial
    }

    fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    async fn execute_shell(&self, command: &str) -> Result<RemoteCommandResult> {
        let raw = self.respond_to(command);
        Ok(RemoteCommandResult::classify(&raw))
    }

    async fn push_file(&self, local: &Path, remote: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.pushes.push((local.to_path_buf(), remote.to_string()));
        match &state.push_failure {
            Some(message) => Err(Error::push(message.clone())),
            None => Ok(()),
        }
    }
}

/// A bridge whose events are delivered by hand from the test
pub struct FakeBridge {
    device: FakeDevice,
    device_tx: broadcast::Sender<DeviceEvent>,
    client_tx: broadcast::Sender<ClientEvent>,
    known: Mutex<Vec<DeviceSnapshot>>,
}

impl FakeBridge {
    pub fn new(device: FakeDevice) -> Self {
        let (device_tx, _) = broadcast::channel(64);
        let (client_tx, _) = broadcast::channel(64);
        Self {
            device,
            device_tx,
            client_tx,
            known: Mutex::new(Vec::new()),
        }
    }

    /// Make a device part of the bridge's known snapshot, as if it had been
    /// connected before any subscriber appeared
    pub fn add_known_device(&self, snapshot: DeviceSnapshot) {
        self.known.lock().unwrap().push(snapshot);
    }

    /// Deliver a device event to all subscribers
    pub fn emit_device(&self, event: DeviceEvent) {
        let _ = self.device_tx.send(event);
    }

    /// Deliver a client event to all subscribers
    pub fn emit_client(&self, event: ClientEvent) {
        let _ = self.client_tx.send(event);
    }

    /// The single fake device this bridge hands out
    pub fn fake_device(&self) -> &FakeDevice {
        &self.device
    }
}

impl DeviceBridge for FakeBridge {
    type Dev = FakeDevice;

    async fn start(&self) -> Result<()> {
        Ok(())
    }

    async fn terminate(&self) -> Result<()> {
        Ok(())
    }

    fn subscribe_devices(&self) -> broadcast::Receiver<DeviceEvent> {
        self.device_tx.subscribe()
    }

    fn known_devices(&self) -> Vec<DeviceSnapshot> {
        self.known.lock().unwrap().clone()
    }

    fn subscribe_clients(&self) -> broadcast::Receiver<ClientEvent> {
        self.client_tx.subscribe()
    }

    fn device(&self, _serial: &str) -> FakeDevice {
        self.device.clone()
    }
}
