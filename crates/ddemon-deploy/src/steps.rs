//! The upload / install / launch step sequence
//!
//! Each step reports everything the user needs to see through the console
//! channel and returns `Ok(true)` on success, `Ok(false)` on a failure it has
//! already reported, or `Err(Error::Cancelled)` when the session was stopped.
//! Cancelled work produces no failure output: it was never attempted.

use std::path::Path;

use tokio::sync::mpsc;

use ddemon_adb::Device;
use ddemon_core::events::ConsoleLine;
use ddemon_core::prelude::*;
use ddemon_core::shell::{RemoteCommandResult, NO_ERROR};
use ddemon_core::types::LaunchTarget;

use crate::cancel::CancelToken;
use crate::retry::RetryPolicy;

/// Write side of the session's user-visible output stream.
///
/// Send failures mean the handle dropped its receiver; output is then
/// discarded silently.
#[derive(Clone)]
pub(crate) struct Console {
    tx: mpsc::UnboundedSender<ConsoleLine>,
}

impl Console {
    pub(crate) fn new(tx: mpsc::UnboundedSender<ConsoleLine>) -> Self {
        Self { tx }
    }

    pub(crate) fn stdout(&self, text: impl Into<String>) {
        let _ = self.tx.send(ConsoleLine::stdout(text));
    }

    pub(crate) fn stderr(&self, text: impl Into<String>) {
        let _ = self.tx.send(ConsoleLine::stderr(text));
    }

    /// Echo full remote output to stdout on success, stderr on failure
    fn echo(&self, result: &RemoteCommandResult, success: bool) {
        let text = result.display_output();
        if text.is_empty() {
            return;
        }
        if success {
            self.stdout(text);
        } else {
            self.stderr(text);
        }
    }
}

/// Push the artifact to its temporary path on the device. Not retried: a
/// failed push means the device or the file is unusable.
pub(crate) async fn upload<D: Device>(
    device: &D,
    local: &Path,
    remote: &str,
    console: &Console,
    cancel: &CancelToken,
) -> Result<bool> {
    if cancel.is_cancelled() {
        return Err(Error::Cancelled);
    }

    console.stdout(format!(
        "Uploading file\n\tlocal path: {}\n\tremote path: {}\n",
        local.display(),
        remote
    ));

    match device.push_file(local, remote).await {
        Ok(()) => Ok(true),
        Err(err) => {
            warn!("push failed: {err}");
            console.stderr(format!("Can't upload file: {}.\n", err));
            Ok(false)
        }
    }
}

/// Install the uploaded package, retrying while the package manager reports
/// it is not ready. A terminal "already installed" failure is recovered by
/// exactly one reinstall, whose own result decides the outcome.
pub(crate) async fn install<D: Device>(
    device: &D,
    remote_path: &str,
    policy: &RetryPolicy,
    console: &Console,
    cancel: &CancelToken,
) -> Result<bool> {
    console.stdout("Installing application.\n");

    let command = format!("pm install \"{}\"", remote_path);
    let run = || {
        let command = command.clone();
        async move { device.execute_shell(&command).await }
    };
    let outcome = policy
        .attempt(
            cancel,
            run,
            RemoteCommandResult::is_install_busy,
            || {
                console.stdout(format!(
                    "Device is not ready. Waiting for {} sec.\n",
                    policy.wait.as_secs()
                ));
            },
        )
        .await;

    let mut result = match outcome {
        Ok(result) => result,
        Err(Error::Cancelled) => return Err(Error::Cancelled),
        Err(err) => {
            error!("install command failed: {err}");
            console.stderr("Can't install application (I/O error).\n");
            return Ok(false);
        }
    };

    if result.is_already_installed() {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        console.stdout("Application is already installed. Reinstalling.\n");
        let reinstall = format!("pm install -r \"{}\"", remote_path);
        result = match device.execute_shell(&reinstall).await {
            Ok(result) => result,
            Err(err) => {
                error!("reinstall command failed: {err}");
                console.stderr("Can't reinstall application (I/O error).\n");
                return Ok(false);
            }
        };
    }

    let success = result.succeeded();
    console.echo(&result, success);
    Ok(success)
}

/// Start the target activity, retrying while the activity manager reports it
/// is not ready. Success is decided by the error type alone.
pub(crate) async fn launch<D: Device>(
    device: &D,
    target: &LaunchTarget,
    debug: bool,
    policy: &RetryPolicy,
    console: &Console,
    cancel: &CancelToken,
) -> Result<bool> {
    let component = target.component();
    console.stdout(format!("Launching application: {}.\n", component));

    let flag = if debug { "-D " } else { "" };
    let command = format!("am start {}-n \"{}\"", flag, component);
    let run = || {
        let command = command.clone();
        async move { device.execute_shell(&command).await }
    };
    let outcome = policy
        .attempt(
            cancel,
            run,
            RemoteCommandResult::is_launch_busy,
            || {
                console.stdout(format!(
                    "Device is not ready. Waiting for {} sec.\n",
                    policy.wait.as_secs()
                ));
            },
        )
        .await;

    let result = match outcome {
        Ok(result) => result,
        Err(Error::Cancelled) => return Err(Error::Cancelled),
        Err(err) => {
            error!("launch command failed: {err}");
            console.stderr("Can't launch application (I/O error).\n");
            return Ok(false);
        }
    };

    let success = result.error_type == NO_ERROR;
    console.echo(&result, success);
    Ok(success)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::time::Duration;

    use ddemon_adb::test_utils::FakeDevice;
    use ddemon_core::events::OutputKind;

    fn console() -> (Console, mpsc::UnboundedReceiver<ConsoleLine>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Console::new(tx), rx)
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<ConsoleLine>) -> Vec<ConsoleLine> {
        let mut lines = Vec::new();
        while let Ok(line) = rx.try_recv() {
            lines.push(line);
        }
        lines
    }

    fn zero_wait(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(max_attempts, Duration::ZERO)
    }

    #[tokio::test]
    async fn test_upload_reports_paths() {
        let device = FakeDevice::new("emulator-5554");
        let (console, mut rx) = console();
        let cancel = CancelToken::new();

        let ok = upload(
            &device,
            Path::new("/out/app.apk"),
            "/data/local/tmp/com.example",
            &console,
            &cancel,
        )
        .await
        .unwrap();

        assert!(ok);
        assert_eq!(
            device.pushes(),
            vec![(
                PathBuf::from("/out/app.apk"),
                "/data/local/tmp/com.example".to_string()
            )]
        );
        let lines = drain(&mut rx);
        assert!(lines[0].text.contains("local path: /out/app.apk"));
        assert!(lines[0].text.contains("remote path: /data/local/tmp/com.example"));
    }

    #[tokio::test]
    async fn test_upload_failure_goes_to_stderr() {
        let device = FakeDevice::new("emulator-5554");
        device.fail_push("device is not available");
        let (console, mut rx) = console();
        let cancel = CancelToken::new();

        let ok = upload(&device, Path::new("/out/app.apk"), "/tmp/x", &console, &cancel)
            .await
            .unwrap();

        assert!(!ok);
        let lines = drain(&mut rx);
        let errors: Vec<_> = lines
            .iter()
            .filter(|l| l.kind == OutputKind::Stderr)
            .collect();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].text.starts_with("Can't upload file"));
    }

    #[tokio::test]
    async fn test_upload_cancelled_is_silent() {
        let device = FakeDevice::new("emulator-5554");
        let (console, mut rx) = console();
        let cancel = CancelToken::new();
        cancel.cancel();

        let result = upload(&device, Path::new("/out/app.apk"), "/tmp/x", &console, &cancel).await;

        assert!(matches!(result, Err(Error::Cancelled)));
        assert!(device.pushes().is_empty());
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_install_exhausts_attempts_then_fails() {
        let device = FakeDevice::new("emulator-5554");
        device.respond_always("pm install", "Error type 1");
        let (console, mut rx) = console();
        let cancel = CancelToken::new();

        let ok = install(&device, "/tmp/com.example", &zero_wait(5), &console, &cancel)
            .await
            .unwrap();

        assert!(!ok);
        assert_eq!(device.command_count("pm install"), 5);
        let lines = drain(&mut rx);
        let waits = lines
            .iter()
            .filter(|l| l.text.starts_with("Device is not ready"))
            .count();
        assert_eq!(waits, 4);
        // Final remote output echoed to stderr
        assert!(lines
            .iter()
            .any(|l| l.kind == OutputKind::Stderr && l.text.contains("Error type 1")));
    }

    #[tokio::test]
    async fn test_install_already_exists_triggers_one_reinstall() {
        let device = FakeDevice::new("emulator-5554");
        device.respond("pm install", "Failure [INSTALL_FAILED_ALREADY_EXISTS]");
        device.respond_always("pm install -r", "Success");
        let (console, mut rx) = console();
        let cancel = CancelToken::new();

        let ok = install(&device, "/tmp/com.example", &zero_wait(5), &console, &cancel)
            .await
            .unwrap();

        assert!(ok);
        assert_eq!(device.command_count("pm install -r"), 1);
        let lines = drain(&mut rx);
        assert!(lines
            .iter()
            .any(|l| l.text.starts_with("Application is already installed")));
    }

    #[tokio::test]
    async fn test_reinstall_result_decides_outcome() {
        let device = FakeDevice::new("emulator-5554");
        device.respond("pm install", "Failure [INSTALL_FAILED_ALREADY_EXISTS]");
        device.respond_always("pm install -r", "Failure [INSTALL_FAILED_DEXOPT]");
        let (console, _rx) = console();
        let cancel = CancelToken::new();

        let ok = install(&device, "/tmp/com.example", &zero_wait(5), &console, &cancel)
            .await
            .unwrap();

        assert!(!ok);
        assert_eq!(device.command_count("pm install -r"), 1);
    }

    #[tokio::test]
    async fn test_launch_includes_debug_flag() {
        let device = FakeDevice::new("emulator-5554");
        device.respond_always("am start", "Success");
        let (console, _rx) = console();
        let cancel = CancelToken::new();
        let target = LaunchTarget::new("com.example.app", ".MainActivity");

        let ok = launch(&device, &target, true, &zero_wait(5), &console, &cancel)
            .await
            .unwrap();

        assert!(ok);
        assert_eq!(
            device.commands(),
            vec!["am start -D -n \"com.example.app/com.example.app.MainActivity\""]
        );
    }

    #[tokio::test]
    async fn test_launch_without_debug_flag() {
        let device = FakeDevice::new("emulator-5554");
        let (console, _rx) = console();
        let cancel = CancelToken::new();
        let target = LaunchTarget::new("com.example.app", "com.example.app.MainActivity");

        let ok = launch(&device, &target, false, &zero_wait(5), &console, &cancel)
            .await
            .unwrap();

        assert!(ok);
        assert_eq!(
            device.commands(),
            vec!["am start -n \"com.example.app/com.example.app.MainActivity\""]
        );
    }

    #[tokio::test]
    async fn test_launch_retries_on_activity_manager_not_ready() {
        let device = FakeDevice::new("emulator-5554");
        device.respond("am start", "Error type 2");
        device.respond("am start", "Error type 2");
        device.respond_always("am start", "Starting: Intent { ... }");
        let (console, _rx) = console();
        let cancel = CancelToken::new();
        let target = LaunchTarget::new("com.example.app", ".Main");

        let ok = launch(&device, &target, false, &zero_wait(5), &console, &cancel)
            .await
            .unwrap();

        assert!(ok);
        assert_eq!(device.command_count("am start"), 3);
    }

    #[tokio::test]
    async fn test_install_cancelled_mid_retry_is_silent() {
        let device = FakeDevice::new("emulator-5554");
        device.respond_always("pm install", "Error type 1");
        let (console, mut rx) = console();
        let cancel = CancelToken::new();

        let policy = RetryPolicy::new(5, Duration::from_secs(60));
        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            canceller.cancel();
        });

        let result = install(&device, "/tmp/com.example", &policy, &console, &cancel).await;

        assert!(matches!(result, Err(Error::Cancelled)));
        assert_eq!(device.command_count("pm install"), 1);
        // No failure output for work never attempted
        let lines = drain(&mut rx);
        assert!(lines.iter().all(|l| l.kind == OutputKind::Stdout));
    }
}
