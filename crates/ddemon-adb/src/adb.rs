//! adb-backed device bridge
//!
//! Device notifications come from a monitor task that polls `adb devices -l`
//! and diffs successive snapshots; client notifications come from a
//! per-device JDWP tracker (see [`crate::jdwp`]). Both fan out through
//! broadcast channels so any number of sessions can subscribe.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio::process::Command;
use tokio::sync::{broadcast, watch};

use ddemon_core::events::{ClientEvent, DeviceEvent, DeviceSnapshot};
use ddemon_core::prelude::*;
use ddemon_core::shell::RemoteCommandResult;
use ddemon_core::types::DeviceState;

use crate::bridge::{Device, DeviceBridge};
use crate::jdwp;

/// Capacity of the device/client broadcast channels
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Bridge configuration
#[derive(Debug, Clone)]
pub struct AdbConfig {
    /// Path to the adb binary
    pub adb_path: PathBuf,
    /// Interval between `adb devices` polls
    pub poll_interval: Duration,
}

impl Default for AdbConfig {
    fn default() -> Self {
        Self {
            adb_path: PathBuf::from("adb"),
            poll_interval: Duration::from_secs(1),
        }
    }
}

/// Shared last-known device states, written by the monitor task
type DeviceStates = Arc<RwLock<HashMap<String, DeviceState>>>;

/// adb-backed [`DeviceBridge`] implementation
pub struct AdbBridge {
    config: AdbConfig,
    device_tx: broadcast::Sender<DeviceEvent>,
    client_tx: broadcast::Sender<ClientEvent>,
    states: DeviceStates,
    shutdown_tx: watch::Sender<bool>,
}

impl AdbBridge {
    pub fn new(config: AdbConfig) -> Self {
        let (device_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (client_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (shutdown_tx, _) = watch::channel(false);

        Self {
            config,
            device_tx,
            client_tx,
            states: Arc::new(RwLock::new(HashMap::new())),
            shutdown_tx,
        }
    }

    /// One poll cycle: list devices, diff against the last snapshot,
    /// broadcast the changes, and start client tracking for devices that
    /// came online.
    async fn poll_once(
        adb_path: &Path,
        states: &DeviceStates,
        device_tx: &broadcast::Sender<DeviceEvent>,
        client_tx: &broadcast::Sender<ClientEvent>,
        tracked: &mut HashSet<String>,
        shutdown_rx: &watch::Receiver<bool>,
    ) {
        let output = match Command::new(adb_path).args(["devices", "-l"]).output().await {
            Ok(output) => output,
            Err(e) => {
                warn!("adb devices poll failed: {}", e);
                return;
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let current = parse_devices_output(&stdout);

        let mut events = Vec::new();
        {
            let mut known = states.write().expect("device state lock poisoned");

            let mut seen = HashSet::new();
            for snapshot in &current {
                seen.insert(snapshot.serial.clone());
                match known.get(&snapshot.serial) {
                    None => {
                        known.insert(snapshot.serial.clone(), snapshot.state);
                        events.push(DeviceEvent::Connected(snapshot.clone()));
                    }
                    Some(old) if *old != snapshot.state => {
                        known.insert(snapshot.serial.clone(), snapshot.state);
                        events.push(DeviceEvent::Changed(snapshot.clone()));
                    }
                    Some(_) => {}
                }
            }

            let gone: Vec<String> = known
                .keys()
                .filter(|serial| !seen.contains(*serial))
                .cloned()
                .collect();
            for serial in gone {
                let state = known.remove(&serial).unwrap_or(DeviceState::Unknown);
                events.push(DeviceEvent::Disconnected(DeviceSnapshot::new(serial, state)));
            }
        }

        for event in events {
            if let DeviceEvent::Connected(snapshot) | DeviceEvent::Changed(snapshot) = &event {
                if snapshot.is_online() && tracked.insert(snapshot.serial.clone()) {
                    jdwp::spawn_tracker(
                        adb_path.to_path_buf(),
                        snapshot.serial.clone(),
                        client_tx.clone(),
                        shutdown_rx.clone(),
                    );
                }
            }
            debug!("device event: {:?}", event);
            // Send errors just mean nobody is subscribed right now
            let _ = device_tx.send(event);
        }
    }
}

impl DeviceBridge for AdbBridge {
    type Dev = AdbDevice;

    async fn start(&self) -> Result<()> {
        info!("Starting adb server via {}", self.config.adb_path.display());
        let status = Command::new(&self.config.adb_path)
            .arg("start-server")
            .status()
            .await
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    Error::AdbNotFound
                } else {
                    Error::bridge(format!("failed to run adb start-server: {}", e))
                }
            })?;
        if !status.success() {
            return Err(Error::bridge("adb start-server reported failure"));
        }

        let adb_path = self.config.adb_path.clone();
        let poll_interval = self.config.poll_interval;
        let states = Arc::clone(&self.states);
        let device_tx = self.device_tx.clone();
        let client_tx = self.client_tx.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            let mut tracked = HashSet::new();
            let mut ticker = tokio::time::interval(poll_interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        Self::poll_once(
                            &adb_path,
                            &states,
                            &device_tx,
                            &client_tx,
                            &mut tracked,
                            &shutdown_rx,
                        )
                        .await;
                    }
                    _ = shutdown_rx.changed() => {
                        debug!("device monitor shutting down");
                        break;
                    }
                }
            }
        });

        Ok(())
    }

    async fn terminate(&self) -> Result<()> {
        // Stops our monitor and trackers only. The adb server stays up:
        // it is shared with other tools on the machine.
        let _ = self.shutdown_tx.send(true);
        Ok(())
    }

    fn subscribe_devices(&self) -> broadcast::Receiver<DeviceEvent> {
        self.device_tx.subscribe()
    }

    fn known_devices(&self) -> Vec<DeviceSnapshot> {
        self.states
            .read()
            .expect("device state lock poisoned")
            .iter()
            .map(|(serial, state)| DeviceSnapshot::new(serial.clone(), *state))
            .collect()
    }

    fn subscribe_clients(&self) -> broadcast::Receiver<ClientEvent> {
        self.client_tx.subscribe()
    }

    fn device(&self, serial: &str) -> AdbDevice {
        AdbDevice {
            adb_path: self.config.adb_path.clone(),
            serial: serial.to_string(),
            states: Arc::clone(&self.states),
        }
    }
}

/// Handle to one device, routed through `adb -s <serial>`
#[derive(Debug, Clone)]
pub struct AdbDevice {
    adb_path: PathBuf,
    serial: String,
    states: DeviceStates,
}

impl Device for AdbDevice {
    fn serial(&self) -> &str {
        &self.serial
    }

    fn is_online(&self) -> bool {
        self.states
            .read()
            .expect("device state lock poisoned")
            .get(&self.serial)
            .map(|state| *state == DeviceState::Online)
            .unwrap_or(false)
    }

    async fn execute_shell(&self, command: &str) -> Result<RemoteCommandResult> {
        debug!("[{}] shell: {}", self.serial, command);
        let output = Command::new(&self.adb_path)
            .args(["-s", &self.serial, "shell", command])
            .output()
            .await
            .map_err(|e| Error::shell(format!("adb shell failed to run: {}", e)))?;

        // Older package/activity managers print errors on stdout, newer on
        // stderr; classify both.
        let mut raw = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.trim().is_empty() {
            if !raw.is_empty() && !raw.ends_with('\n') {
                raw.push('\n');
            }
            raw.push_str(&stderr);
        }

        Ok(RemoteCommandResult::classify(raw.trim_end_matches(['\r', '\n'])))
    }

    async fn push_file(&self, local: &Path, remote: &str) -> Result<()> {
        debug!("[{}] push {} -> {}", self.serial, local.display(), remote);
        let output = Command::new(&self.adb_path)
            .args(["-s", &self.serial, "push"])
            .arg(local)
            .arg(remote)
            .output()
            .await
            .map_err(|e| Error::push(format!("adb push failed to run: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::push(stderr.trim().to_string()));
        }

        Ok(())
    }
}

/// Parse the output of `adb devices -l`.
///
/// Output format: a header line, then one `<serial> <state> <details...>`
/// line per device. Daemon startup notices (`* daemon ...`) may be
/// interleaved and are skipped.
pub fn parse_devices_output(output: &str) -> Vec<DeviceSnapshot> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| {
            !line.is_empty() && !line.starts_with("List of devices") && !line.starts_with('*')
        })
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let serial = fields.next()?;
            let state = DeviceState::parse(fields.next()?);
            Some(DeviceSnapshot::new(serial, state))
        })
        .collect()
}
