//! Emulator process management

use std::path::Path;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot, Notify};

use ddemon_core::events::EmulatorEvent;
use ddemon_core::prelude::*;

/// Supervises the Android emulator child process.
///
/// The `Child` handle is moved into a dedicated `wait_for_exit` background
/// task that calls `child.wait()`, so the real exit code is captured and
/// emitted as `EmulatorEvent::Exited { code: Some(N) }` rather than always
/// `None`.
///
/// `EmulatorProcess` retains a kill channel to request a force-kill, an
/// atomic flag for synchronous `has_exited()` checks, and a [`Notify`] handle
/// so `shutdown()` can await termination without holding a lock across
/// `.await`.
pub struct EmulatorProcess {
    /// Process ID for logging
    pid: Option<u32>,
    /// One-shot sender that tells the wait task to force-kill the process.
    /// Consumed on first use (or on drop).
    kill_tx: Option<oneshot::Sender<()>>,
    /// Set to `true` by the wait task once the child has exited.
    exited: Arc<AtomicBool>,
    /// Notified by the wait task immediately after the child exits.
    exit_notify: Arc<Notify>,
}

impl EmulatorProcess {
    /// Spawn the emulator and begin supervising it.
    ///
    /// The binary's existence is checked eagerly so a misconfigured SDK path
    /// fails before anything is spawned. Events are sent to `event_tx` for
    /// processing by the session.
    pub fn spawn(
        emulator_path: &Path,
        avd: Option<&str>,
        event_tx: mpsc::Sender<EmulatorEvent>,
    ) -> Result<Self> {
        if !emulator_path.exists() && which::which(emulator_path).is_err() {
            return Err(Error::EmulatorNotFound);
        }

        let mut command = Command::new(emulator_path);
        if let Some(avd) = avd {
            command.args(["-avd", avd]);
        }

        info!(
            "Spawning emulator: {} (avd: {:?})",
            emulator_path.display(),
            avd
        );

        let mut child = command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true) // Critical: cleanup on drop
            .spawn()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    Error::EmulatorNotFound
                } else {
                    Error::process_spawn(e.to_string())
                }
            })?;

        let pid = child.id();
        info!("Emulator process started with PID: {:?}", pid);

        Ok(Self::supervise(child, pid, event_tx))
    }

    /// Wire up reader and wait tasks around an already-spawned child.
    fn supervise(
        mut child: Child,
        pid: Option<u32>,
        event_tx: mpsc::Sender<EmulatorEvent>,
    ) -> Self {
        // Spawn stdout reader task (never emits Exited — that's the wait task's job)
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(Self::stdout_reader(stdout, event_tx.clone()));
        }

        // Spawn stderr reader task
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(Self::stderr_reader(stderr, event_tx.clone()));
        }

        // Shared exit-state primitives
        let exited = Arc::new(AtomicBool::new(false));
        let exit_notify = Arc::new(Notify::new());

        // Kill channel: EmulatorProcess holds the sender, wait task holds the receiver.
        let (kill_tx, kill_rx) = oneshot::channel::<()>();

        // Spawn the dedicated wait task — takes ownership of `child`.
        tokio::spawn(Self::wait_for_exit(
            child,
            kill_rx,
            event_tx,
            Arc::clone(&exited),
            Arc::clone(&exit_notify),
        ));

        Self {
            pid,
            kill_tx: Some(kill_tx),
            exited,
            exit_notify,
        }
    }

    /// Background task: owns `child`, waits for it to exit, emits
    /// `EmulatorEvent::Exited`.
    ///
    /// Two ways the task can end:
    /// 1. The emulator exits naturally — `child.wait()` resolves.
    /// 2. `kill_rx` fires — we kill the child first, then wait for it.
    async fn wait_for_exit(
        mut child: Child,
        kill_rx: oneshot::Receiver<()>,
        event_tx: mpsc::Sender<EmulatorEvent>,
        exited: Arc<AtomicBool>,
        exit_notify: Arc<Notify>,
    ) {
        let code: Option<i32> = tokio::select! {
            // Natural exit path
            result = child.wait() => {
                match result {
                    Ok(status) => {
                        info!("Emulator exited with status: {:?}", status);
                        status.code()
                    }
                    Err(e) => {
                        error!("Error waiting for emulator: {}", e);
                        None
                    }
                }
            }
            // Force-kill path: kill_tx was sent (by shutdown or drop)
            _ = kill_rx => {
                info!("Kill signal received, force-killing emulator");
                if let Err(e) = child.kill().await {
                    error!("Failed to kill emulator: {}", e);
                }
                match child.wait().await {
                    Ok(status) => {
                        info!("Emulator killed, exit status: {:?}", status);
                        status.code()
                    }
                    Err(e) => {
                        error!("Error waiting after kill: {}", e);
                        None
                    }
                }
            }
        };

        // Mark the process as exited and wake any waiters before sending the
        // event, so `has_exited()` is true before callers observe the event.
        exited.store(true, Ordering::Release);
        exit_notify.notify_waiters();

        debug!("Sending EmulatorEvent::Exited {{ code: {:?} }}", code);
        let _ = event_tx.send(EmulatorEvent::Exited { code }).await;
    }

    /// Read lines from stdout and send them as `EmulatorEvent::Stdout`.
    async fn stdout_reader(stdout: tokio::process::ChildStdout, tx: mpsc::Sender<EmulatorEvent>) {
        let mut reader = BufReader::new(stdout).lines();

        while let Ok(Some(line)) = reader.next_line().await {
            trace!("emulator stdout: {}", line);

            if tx.send(EmulatorEvent::Stdout(line)).await.is_err() {
                debug!("stdout channel closed");
                break;
            }
        }

        // Stdout EOF just means the pipe closed; the wait task emits the
        // Exited event with the real exit code.
        debug!("emulator stdout reader finished");
    }

    /// Read lines from stderr and send them as `EmulatorEvent::Stderr`.
    async fn stderr_reader(stderr: tokio::process::ChildStderr, tx: mpsc::Sender<EmulatorEvent>) {
        let mut reader = BufReader::new(stderr).lines();

        while let Ok(Some(line)) = reader.next_line().await {
            trace!("emulator stderr: {}", line);

            if tx.send(EmulatorEvent::Stderr(line)).await.is_err() {
                debug!("stderr channel closed");
                break;
            }
        }

        debug!("emulator stderr reader finished");
    }

    /// Shut the emulator down.
    ///
    /// The emulator takes no commands on stdin, so shutdown is a kill signal
    /// to the wait task followed by a bounded wait for the exit notification.
    pub async fn shutdown(&mut self) -> Result<()> {
        use std::time::Duration;
        use tokio::time::timeout;

        // Fast path: already dead
        if self.has_exited() {
            info!("Emulator already exited, skipping shutdown");
            return Ok(());
        }

        // Race-free pattern: create the `notified()` future BEFORE sending
        // the kill signal, so we cannot miss a notification that fires
        // between the send and the await.
        let exit_notify = Arc::clone(&self.exit_notify);
        let notified = exit_notify.notified();
        self.force_kill();

        match timeout(Duration::from_secs(5), notified).await {
            Ok(()) => {
                info!("Emulator terminated");
                Ok(())
            }
            Err(_) => {
                warn!("Timeout waiting for emulator to terminate");
                Ok(())
            }
        }
    }

    /// Signal the wait task to kill the child.
    ///
    /// The wait task calls `child.kill()` and then `child.wait()`, ensuring
    /// the OS reaps the process before `EmulatorEvent::Exited` is emitted.
    fn force_kill(&mut self) {
        if let Some(tx) = self.kill_tx.take() {
            // Ignore send error — the wait task may have already exited naturally.
            let _ = tx.send(());
        }
    }

    /// Check if the process has already exited.
    ///
    /// Non-blocking, synchronous check backed by an atomic flag set by the
    /// wait task. Takes `&self` and never races with `child.wait()`.
    pub fn has_exited(&self) -> bool {
        self.exited.load(Ordering::Acquire)
    }

    /// Check if the process is still running.
    pub fn is_running(&self) -> bool {
        !self.has_exited()
    }

    /// Get the process ID
    pub fn id(&self) -> Option<u32> {
        self.pid
    }
}

impl Drop for EmulatorProcess {
    fn drop(&mut self) {
        if !self.has_exited() {
            warn!("EmulatorProcess dropped while process may still be running");
            // Send the kill signal so the wait task tears down the child
            // cleanly. If kill_tx was consumed by shutdown(), this is a no-op;
            // kill_on_drop(true) on the Child is the final safety net.
            self.force_kill();
        }
        debug!("EmulatorProcess dropped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_spawn_missing_binary() {
        let (tx, _rx) = mpsc::channel(16);
        let result = EmulatorProcess::spawn(Path::new("/nonexistent/emulator"), None, tx);

        assert!(matches!(result, Err(Error::EmulatorNotFound)));
    }

    /// Helper: supervise a short-lived real process (not an emulator).
    ///
    /// We exercise the supervision machinery with `sh -c` as a stand-in.
    fn spawn_test_process(script: &str, event_tx: mpsc::Sender<EmulatorEvent>) -> EmulatorProcess {
        let child = Command::new("sh")
            .args(["-c", script])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .expect("sh must be available in test environment");

        let pid = child.id();
        // Reuse the exact production wiring
        EmulatorProcess::supervise(child, pid, event_tx)
    }

    async fn wait_for_exit_event(rx: &mut mpsc::Receiver<EmulatorEvent>) -> Option<Option<i32>> {
        for _ in 0..50 {
            match tokio::time::timeout(std::time::Duration::from_millis(100), rx.recv()).await {
                Ok(Some(EmulatorEvent::Exited { code })) => return Some(code),
                Ok(Some(_)) => continue,
                Ok(None) => return None,
                Err(_) => continue,
            }
        }
        None
    }

    #[tokio::test]
    async fn test_exit_code_captured_on_normal_exit() {
        let (tx, mut rx) = mpsc::channel(16);
        let _process = spawn_test_process("exit 0", tx);

        let code = wait_for_exit_event(&mut rx).await;
        assert_eq!(code, Some(Some(0)));
    }

    #[tokio::test]
    async fn test_exit_code_captured_on_error_exit() {
        let (tx, mut rx) = mpsc::channel(16);
        let _process = spawn_test_process("exit 42", tx);

        let code = wait_for_exit_event(&mut rx).await;
        assert_eq!(code, Some(Some(42)));
    }

    #[tokio::test]
    async fn test_stdout_lines_forwarded() {
        let (tx, mut rx) = mpsc::channel(32);
        let _process = spawn_test_process("echo booting; echo ready", tx);

        let mut lines = Vec::new();
        loop {
            match tokio::time::timeout(std::time::Duration::from_millis(500), rx.recv()).await {
                Ok(Some(EmulatorEvent::Stdout(line))) => lines.push(line),
                Ok(Some(EmulatorEvent::Exited { .. })) => break,
                Ok(Some(_)) => continue,
                _ => break,
            }
        }

        assert_eq!(lines, vec!["booting".to_string(), "ready".to_string()]);
    }

    #[tokio::test]
    async fn test_exactly_one_exited_event() {
        let (tx, mut rx) = mpsc::channel(32);
        let _process = spawn_test_process("exit 0", tx);

        let mut exited_count = 0usize;
        let deadline = tokio::time::sleep(std::time::Duration::from_millis(500));
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                event = rx.recv() => {
                    match event {
                        Some(EmulatorEvent::Exited { .. }) => exited_count += 1,
                        Some(_) => {}
                        None => break,
                    }
                }
                _ = &mut deadline => break,
            }
        }

        assert_eq!(exited_count, 1);
    }

    #[tokio::test]
    async fn test_has_exited_becomes_true_after_exit() {
        let (tx, mut rx) = mpsc::channel(16);
        let process = spawn_test_process("exit 0", tx);

        let code = wait_for_exit_event(&mut rx).await;
        assert!(code.is_some());

        assert!(process.has_exited());
        assert!(!process.is_running());
    }

    #[tokio::test]
    async fn test_shutdown_kills_long_running_process() {
        let (tx, mut rx) = mpsc::channel(16);
        let mut process = spawn_test_process("sleep 60", tx);

        assert!(!process.has_exited());

        process.shutdown().await.expect("shutdown should not error");

        let code = wait_for_exit_event(&mut rx).await;
        assert!(code.is_some(), "Exited event should follow shutdown");
        assert!(process.has_exited());
    }
}
