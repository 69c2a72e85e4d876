//! The deployment session state machine
//!
//! A session optionally launches an emulator, waits for a device to come
//! online, runs the upload / install / launch sequence exactly once, and
//! keeps running until the emulator exits or the caller stops it. Progress
//! is driven by event order; the published [`SessionState`] is advisory.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, oneshot, watch};

use ddemon_adb::{Device, DeviceBridge, EmulatorProcess};
use ddemon_core::events::{ConsoleLine, DeviceEvent, DeviceSnapshot, EmulatorEvent};
use ddemon_core::prelude::*;
use ddemon_core::types::{LaunchTarget, SessionState};

use crate::artifact::ArtifactSource;
use crate::cancel::CancelToken;
use crate::config::DeployConfig;
use crate::handshake::DebugHandshake;
use crate::steps::{self, Console};

/// How to launch the emulator for this session.
///
/// Sessions without a spec deploy to an already-connected device.
#[derive(Debug, Clone)]
pub struct EmulatorSpec {
    pub emulator_path: PathBuf,
    /// Virtual device name passed as `-avd`; the emulator picks its default
    /// when absent
    pub avd: Option<String>,
}

/// One deployment of one artifact to one device.
///
/// Constructed, optionally given an emulator spec, then consumed by
/// [`run`](Self::run). The bridge is shared; the session filters the event
/// streams down to what concerns it.
pub struct DeploymentSession<B: DeviceBridge> {
    bridge: Arc<B>,
    config: DeployConfig,
    target: LaunchTarget,
    artifact_path: PathBuf,
    debug_mode: bool,
    emulator: Option<EmulatorSpec>,
}

/// Everything a deploy task needs, cloneable across task boundaries
#[derive(Clone)]
struct DeployJob {
    config: DeployConfig,
    target: LaunchTarget,
    artifact_path: PathBuf,
    debug_mode: bool,
    console: Console,
    cancel: CancelToken,
    state: Arc<watch::Sender<SessionState>>,
}

impl<B> DeploymentSession<B>
where
    B: DeviceBridge + Send + Sync + 'static,
{
    pub fn new(
        bridge: Arc<B>,
        config: DeployConfig,
        artifact: &dyn ArtifactSource,
        activity: &str,
        debug_mode: bool,
    ) -> Self {
        let target = LaunchTarget::new(artifact.package_name(), activity);
        Self {
            bridge,
            config,
            target,
            artifact_path: artifact.artifact_path().to_path_buf(),
            debug_mode,
            emulator: None,
        }
    }

    /// Launch an emulator as part of the session
    pub fn with_emulator(mut self, spec: EmulatorSpec) -> Self {
        self.emulator = Some(spec);
        self
    }

    /// Start the session and return its handle.
    ///
    /// Subscribes to the bridge streams before the emulator is spawned, and
    /// replays the bridge's known device snapshot after subscribing, so a
    /// device that came online before the session started still triggers the
    /// deploy. Fails fast if the emulator binary cannot be spawned;
    /// everything after that is reported through the handle.
    pub async fn run(self) -> Result<SessionHandle> {
        let Self {
            bridge,
            config,
            target,
            artifact_path,
            debug_mode,
            emulator,
        } = self;

        let cancel = CancelToken::new();
        let (console_tx, console_rx) = mpsc::unbounded_channel();
        let console = Console::new(console_tx);
        let (state_tx, state_rx) = watch::channel(SessionState::Created);
        let state = Arc::new(state_tx);

        let device_events = bridge.subscribe_devices();
        let debug_port = debug_mode.then(|| {
            DebugHandshake::spawn(
                bridge.subscribe_clients(),
                target.package.clone(),
                cancel.clone(),
            )
        });

        if let Some(spec) = emulator {
            set_state(&state, SessionState::EmulatorStarting);
            let (emulator_tx, emulator_rx) = mpsc::channel(64);
            let process =
                EmulatorProcess::spawn(&spec.emulator_path, spec.avd.as_deref(), emulator_tx)?;
            tokio::spawn(supervise_emulator(
                process,
                emulator_rx,
                console.clone(),
                cancel.clone(),
                Arc::clone(&state),
            ));
        }

        set_state(&state, SessionState::WaitingForDevice);

        let job = DeployJob {
            config,
            target,
            artifact_path,
            debug_mode,
            console,
            cancel: cancel.clone(),
            state,
        };
        tokio::spawn(event_loop(bridge, device_events, job));

        Ok(SessionHandle {
            console: console_rx,
            state: state_rx,
            debug_port,
            cancel,
        })
    }
}

/// Caller-side view of a running session
pub struct SessionHandle {
    console: mpsc::UnboundedReceiver<ConsoleLine>,
    state: watch::Receiver<SessionState>,
    debug_port: Option<oneshot::Receiver<u16>>,
    cancel: CancelToken,
}

impl SessionHandle {
    /// Stop the session. Idempotent; in-flight steps end at their next
    /// cancellation check and the emulator is shut down.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Current advisory state
    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// A watcher for state transitions
    pub fn state_receiver(&self) -> watch::Receiver<SessionState> {
        self.state.clone()
    }

    /// Next line of user-visible output; `None` once the session's tasks are
    /// gone and the stream is drained
    pub async fn next_line(&mut self) -> Option<ConsoleLine> {
        self.console.recv().await
    }

    /// The debugger port notification, present only for debug sessions.
    /// Resolves at most once.
    pub fn take_debug_port(&mut self) -> Option<oneshot::Receiver<u16>> {
        self.debug_port.take()
    }

    /// Wait until the session reaches its terminal state
    pub async fn wait_terminated(&mut self) {
        while !self.state.borrow_and_update().is_terminal() {
            if self.state.changed().await.is_err() {
                return;
            }
        }
    }
}

/// Advance the advisory state. `Terminated` is sticky.
fn set_state(state: &watch::Sender<SessionState>, next: SessionState) {
    state.send_if_modified(|current| {
        if current.is_terminal() || *current == next {
            return false;
        }
        debug!(from = %current, to = %next, "session state");
        *current = next;
        true
    });
}

/// Forward emulator output to the console and end the session when the
/// emulator exits. Cancellation shuts the process down, then the loop keeps
/// draining until the exit event arrives.
async fn supervise_emulator(
    mut process: EmulatorProcess,
    mut events: mpsc::Receiver<EmulatorEvent>,
    console: Console,
    cancel: CancelToken,
    state: Arc<watch::Sender<SessionState>>,
) {
    let mut kill_requested = false;
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(EmulatorEvent::Stdout(line)) => console.stdout(format!("{line}\n")),
                Some(EmulatorEvent::Stderr(line)) => console.stderr(format!("{line}\n")),
                Some(EmulatorEvent::Exited { code }) => {
                    info!(?code, "emulator exited");
                    console.stdout("Emulator terminated.\n");
                    cancel.cancel();
                    set_state(&state, SessionState::Terminated);
                    break;
                }
                None => break,
            },
            _ = cancel.cancelled(), if !kill_requested => {
                kill_requested = true;
                if let Err(err) = process.shutdown().await {
                    warn!("emulator shutdown failed: {err}");
                }
            }
        }
    }
}

/// Watch the device stream and start the deploy sequence for the first
/// online device. The guard makes the trigger at-most-once no matter how
/// many online notifications arrive.
///
/// The known snapshot is replayed before the stream is consumed: a device
/// that was already online produces no further event, only a map entry.
async fn event_loop<B>(bridge: Arc<B>, mut devices: broadcast::Receiver<DeviceEvent>, job: DeployJob)
where
    B: DeviceBridge + Send + Sync + 'static,
{
    let deployed = AtomicBool::new(false);

    for snapshot in bridge.known_devices() {
        deploy_if_online(&bridge, &snapshot, &deployed, &job);
    }

    loop {
        let event = tokio::select! {
            received = devices.recv() => match received {
                Ok(event) => event,
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!("device stream lagged, {missed} events missed");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            _ = job.cancel.cancelled() => break,
        };

        match &event {
            DeviceEvent::Connected(_) => job.console.stdout("Device connected.\n"),
            DeviceEvent::Disconnected(_) => job.console.stdout("Device disconnected.\n"),
            DeviceEvent::Changed(_) => {}
        }

        deploy_if_online(&bridge, event.snapshot(), &deployed, &job);
    }

    set_state(&job.state, SessionState::Terminated);
}

/// The at-most-once deploy trigger shared by the snapshot replay and the
/// live event stream
fn deploy_if_online<B>(
    bridge: &Arc<B>,
    snapshot: &DeviceSnapshot,
    deployed: &AtomicBool,
    job: &DeployJob,
) where
    B: DeviceBridge + Send + Sync + 'static,
{
    if snapshot.is_online() && !deployed.swap(true, Ordering::SeqCst) {
        job.console.stdout("Device is online.\n");
        set_state(&job.state, SessionState::Deploying);
        let device = bridge.device(&snapshot.serial);
        tokio::spawn(deploy_worker(device, job.clone()));
    }
}

async fn deploy_worker<D>(device: D, job: DeployJob)
where
    D: Device + Send + Sync + 'static,
{
    match run_steps(&device, &job).await {
        Ok(true) => {
            info!(target = %job.target.component(), "application running");
            set_state(&job.state, SessionState::Running);
        }
        Ok(false) => {
            // The failing step already reported the reason
            job.cancel.cancel();
            set_state(&job.state, SessionState::Terminated);
        }
        Err(Error::Cancelled) => {}
        Err(err) => {
            error!("deploy failed: {err}");
            job.console.stderr(format!("{}\n", err));
            job.cancel.cancel();
            set_state(&job.state, SessionState::Terminated);
        }
    }
}

async fn run_steps<D>(device: &D, job: &DeployJob) -> Result<bool>
where
    D: Device + Sync,
{
    let remote = job.config.remote_path(&job.target.package);
    if !steps::upload(device, &job.artifact_path, &remote, &job.console, &job.cancel).await? {
        return Ok(false);
    }
    if !steps::install(
        device,
        &remote,
        &job.config.install_policy(),
        &job.console,
        &job.cancel,
    )
    .await?
    {
        return Ok(false);
    }
    steps::launch(
        device,
        &job.target,
        job.debug_mode,
        &job.config.launch_policy(),
        &job.console,
        &job.cancel,
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use ddemon_adb::test_utils::{FakeBridge, FakeDevice};
    use ddemon_core::events::{ClientEvent, DebuggerStatus, DeviceSnapshot, OutputKind};
    use ddemon_core::types::DeviceState;

    use crate::artifact::ApkArtifact;

    const SERIAL: &str = "emulator-5554";
    const PACKAGE: &str = "com.example.app";

    fn zero_wait_config() -> DeployConfig {
        DeployConfig {
            retry_wait_secs: 0,
            ..Default::default()
        }
    }

    fn session(bridge: &Arc<FakeBridge>, debug: bool) -> DeploymentSession<FakeBridge> {
        let artifact = ApkArtifact::from_parts("/out/app.apk", PACKAGE);
        DeploymentSession::new(
            Arc::clone(bridge),
            zero_wait_config(),
            &artifact,
            ".MainActivity",
            debug,
        )
    }

    fn online() -> DeviceEvent {
        DeviceEvent::Changed(DeviceSnapshot::new(SERIAL, DeviceState::Online))
    }

    async fn wait_for(handle: &SessionHandle, want: SessionState) {
        let mut rx = handle.state_receiver();
        tokio::time::timeout(Duration::from_secs(2), async {
            while *rx.borrow_and_update() != want {
                rx.changed().await.expect("state channel closed");
            }
        })
        .await
        .unwrap_or_else(|_| panic!("session never reached state: {want}"));
    }

    fn drain(handle: &mut SessionHandle) -> Vec<ConsoleLine> {
        let mut lines = Vec::new();
        while let Ok(line) = handle.console.try_recv() {
            lines.push(line);
        }
        lines
    }

    #[tokio::test]
    async fn test_deploy_runs_once_despite_repeated_online_events() {
        let device = FakeDevice::new(SERIAL);
        device.respond_always("pm install", "Success");
        device.respond_always("am start", "Success");
        let bridge = Arc::new(FakeBridge::new(device.clone()));

        let handle = session(&bridge, false).run().await.unwrap();
        assert_eq!(handle.state(), SessionState::WaitingForDevice);

        bridge.emit_device(DeviceEvent::Connected(DeviceSnapshot::new(
            SERIAL,
            DeviceState::Online,
        )));
        for _ in 0..3 {
            bridge.emit_device(online());
        }

        wait_for(&handle, SessionState::Running).await;

        assert_eq!(device.pushes().len(), 1);
        assert_eq!(device.command_count("pm install"), 1);
        assert_eq!(device.command_count("am start"), 1);
    }

    #[tokio::test]
    async fn test_deploys_to_device_already_online_at_start() {
        let device = FakeDevice::new(SERIAL);
        device.respond_always("pm install", "Success");
        device.respond_always("am start", "Success");
        let bridge = Arc::new(FakeBridge::new(device.clone()));
        // Device came online before the session existed: no event will ever
        // be delivered for it, only the bridge's snapshot knows it
        bridge.add_known_device(DeviceSnapshot::new(SERIAL, DeviceState::Online));

        let handle = session(&bridge, false).run().await.unwrap();

        wait_for(&handle, SessionState::Running).await;
        assert_eq!(device.command_count("pm install"), 1);
        assert_eq!(device.command_count("am start"), 1);
    }

    #[tokio::test]
    async fn test_known_device_and_event_deploy_once() {
        let device = FakeDevice::new(SERIAL);
        device.respond_always("pm install", "Success");
        device.respond_always("am start", "Success");
        let bridge = Arc::new(FakeBridge::new(device.clone()));
        bridge.add_known_device(DeviceSnapshot::new(SERIAL, DeviceState::Online));

        let handle = session(&bridge, false).run().await.unwrap();
        // A live event for the same device arrives on top of the snapshot
        bridge.emit_device(online());

        wait_for(&handle, SessionState::Running).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(device.command_count("pm install"), 1);
    }

    #[tokio::test]
    async fn test_install_attempts_are_bounded() {
        let device = FakeDevice::new(SERIAL);
        device.respond_always("pm install", "Error type 1");
        let bridge = Arc::new(FakeBridge::new(device.clone()));

        let mut handle = session(&bridge, false).run().await.unwrap();
        bridge.emit_device(online());

        tokio::time::timeout(Duration::from_secs(2), handle.wait_terminated())
            .await
            .expect("session should terminate after exhausting attempts");

        assert_eq!(device.command_count("pm install"), 5);
        assert_eq!(device.command_count("am start"), 0, "launch must not run");
    }

    #[tokio::test]
    async fn test_upload_failure_terminates_without_install() {
        let device = FakeDevice::new(SERIAL);
        device.fail_push("device is not available");
        let bridge = Arc::new(FakeBridge::new(device.clone()));

        let mut handle = session(&bridge, false).run().await.unwrap();
        bridge.emit_device(online());

        tokio::time::timeout(Duration::from_secs(2), handle.wait_terminated())
            .await
            .expect("session should terminate after upload failure");

        assert_eq!(device.command_count("pm install"), 0);
        let lines = drain(&mut handle);
        assert!(lines
            .iter()
            .any(|l| l.kind == OutputKind::Stderr && l.text.starts_with("Can't upload file")));
    }

    #[tokio::test]
    async fn test_stop_before_device_deploys_nothing() {
        let device = FakeDevice::new(SERIAL);
        let bridge = Arc::new(FakeBridge::new(device.clone()));

        let mut handle = session(&bridge, false).run().await.unwrap();
        handle.stop();

        tokio::time::timeout(Duration::from_secs(2), handle.wait_terminated())
            .await
            .expect("stopped session should terminate");

        // A device coming online after stop changes nothing
        bridge.emit_device(online());
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(device.commands().is_empty());
        assert!(device.pushes().is_empty());
    }

    #[tokio::test]
    async fn test_debug_session_forwards_port_and_uses_debug_flag() {
        let device = FakeDevice::new(SERIAL);
        device.respond_always("pm install", "Success");
        device.respond_always("am start", "Success");
        let bridge = Arc::new(FakeBridge::new(device.clone()));

        let mut handle = session(&bridge, true).run().await.unwrap();
        bridge.emit_device(online());
        wait_for(&handle, SessionState::Running).await;

        bridge.emit_client(ClientEvent {
            serial: SERIAL.to_string(),
            pid: 4711,
            description: Some(PACKAGE.to_string()),
            debugger: DebuggerStatus::Waiting,
            jdwp_port: Some(8700),
        });

        let port_rx = handle.take_debug_port().expect("debug session has a port channel");
        let port = tokio::time::timeout(Duration::from_secs(2), port_rx)
            .await
            .expect("handshake should report")
            .unwrap();
        assert_eq!(port, 8700);

        let launches: Vec<_> = device
            .commands()
            .into_iter()
            .filter(|c| c.starts_with("am start"))
            .collect();
        assert_eq!(launches.len(), 1);
        assert!(launches[0].contains("-D "));
    }

    #[tokio::test]
    async fn test_end_to_end_with_transient_install_failures() {
        let device = FakeDevice::new(SERIAL);
        device.respond("pm install", "Error type 1");
        device.respond("pm install", "Error type 1");
        device.respond_always("pm install", "Success");
        device.respond_always("am start", "Starting: Intent { ... }");
        let bridge = Arc::new(FakeBridge::new(device.clone()));

        let mut handle = session(&bridge, false).run().await.unwrap();
        bridge.emit_device(online());
        wait_for(&handle, SessionState::Running).await;

        assert_eq!(device.command_count("pm install"), 3);
        assert_eq!(device.command_count("am start"), 1);

        let lines = drain(&mut handle);
        let texts: Vec<_> = lines.iter().map(|l| l.text.as_str()).collect();
        assert!(texts.iter().any(|t| t.starts_with("Device is online.")));
        assert!(texts.iter().any(|t| t.starts_with("Installing application.")));
        assert!(texts
            .iter()
            .any(|t| t.starts_with("Launching application: com.example.app/")));
    }

    #[tokio::test]
    async fn test_emulator_exit_terminates_session() {
        // `sh` with a null stdin exits immediately, standing in for the
        // emulator process
        let bridge = Arc::new(FakeBridge::new(FakeDevice::new(SERIAL)));
        let mut handle = session(&bridge, false)
            .with_emulator(EmulatorSpec {
                emulator_path: "/bin/sh".into(),
                avd: None,
            })
            .run()
            .await
            .unwrap();

        tokio::time::timeout(Duration::from_secs(2), handle.wait_terminated())
            .await
            .expect("session should terminate when the emulator exits");
    }

    #[tokio::test]
    async fn test_missing_emulator_fails_eagerly() {
        let bridge = Arc::new(FakeBridge::new(FakeDevice::new(SERIAL)));
        let result = session(&bridge, false)
            .with_emulator(EmulatorSpec {
                emulator_path: "/nonexistent/emulator".into(),
                avd: None,
            })
            .run()
            .await;

        assert!(matches!(result, Err(Error::EmulatorNotFound)));
    }
}
