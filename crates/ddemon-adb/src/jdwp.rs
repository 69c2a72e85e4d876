//! JDWP client tracking
//!
//! `adb -s <serial> jdwp` streams the pid of every debuggable client process
//! as it appears. For each new pid we resolve the process description (the
//! application package name) and forward a local TCP port to the client's
//! JDWP transport, then broadcast a [`ClientEvent`] with debugger-waiting
//! status. Resolution is best-effort: a pid that disappears mid-lookup is
//! logged and skipped, never fatal.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::{broadcast, watch};

use ddemon_core::events::{ClientEvent, DebuggerStatus};
use ddemon_core::prelude::*;

/// Spawn the client tracker task for one device
pub(crate) fn spawn_tracker(
    adb_path: PathBuf,
    serial: String,
    client_tx: broadcast::Sender<ClientEvent>,
    shutdown_rx: watch::Receiver<bool>,
) {
    tokio::spawn(async move {
        if let Err(e) = track_clients(&adb_path, &serial, client_tx, shutdown_rx).await {
            warn!("[{}] client tracker stopped: {}", serial, e);
        }
    });
}

/// Follow the jdwp pid stream until the device goes away or shutdown is
/// requested.
async fn track_clients(
    adb_path: &Path,
    serial: &str,
    client_tx: broadcast::Sender<ClientEvent>,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Result<()> {
    let mut child = Command::new(adb_path)
        .args(["-s", serial, "jdwp"])
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| Error::bridge(format!("failed to start jdwp tracking: {}", e)))?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| Error::bridge("jdwp stdout was not captured"))?;
    let mut lines = BufReader::new(stdout).lines();

    let mut seen = HashSet::new();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                match line {
                    Ok(Some(line)) => {
                        let Ok(pid) = line.trim().parse::<u32>() else {
                            continue;
                        };
                        if !seen.insert(pid) {
                            continue;
                        }
                        match describe_client(adb_path, serial, pid).await {
                            Ok(event) => {
                                debug!("[{}] client event: {:?}", serial, event);
                                let _ = client_tx.send(event);
                            }
                            Err(e) => {
                                debug!("[{}] skipping client pid {}: {}", serial, pid, e);
                            }
                        }
                    }
                    Ok(None) => break,
                    Err(e) => return Err(Error::bridge(format!("jdwp stream error: {}", e))),
                }
            }
            _ = shutdown_rx.changed() => break,
        }
    }

    let _ = child.kill().await;
    Ok(())
}

/// Resolve a pid into a [`ClientEvent`]: description from the process
/// command line, port from a fresh JDWP forward.
async fn describe_client(adb_path: &Path, serial: &str, pid: u32) -> Result<ClientEvent> {
    let description = read_cmdline(adb_path, serial, pid).await?;
    let jdwp_port = forward_jdwp(adb_path, serial, pid).await.ok();

    Ok(ClientEvent {
        serial: serial.to_string(),
        pid,
        description,
        // A freshly announced jdwp client is suspended awaiting a debugger
        debugger: DebuggerStatus::Waiting,
        jdwp_port,
    })
}

/// Read `/proc/<pid>/cmdline` on the device; for app processes this is the
/// package name.
async fn read_cmdline(adb_path: &Path, serial: &str, pid: u32) -> Result<Option<String>> {
    let output = Command::new(adb_path)
        .args(["-s", serial, "shell", &format!("cat /proc/{}/cmdline", pid)])
        .output()
        .await
        .map_err(|e| Error::shell(format!("cmdline lookup failed: {}", e)))?;

    let raw = String::from_utf8_lossy(&output.stdout);
    let name = raw.trim_matches(['\0', '\r', '\n', ' ']).to_string();
    Ok(if name.is_empty() { None } else { Some(name) })
}

/// Forward a local TCP port to the client's JDWP transport.
/// `adb forward tcp:0 ...` prints the allocated port.
async fn forward_jdwp(adb_path: &Path, serial: &str, pid: u32) -> Result<u16> {
    let output = Command::new(adb_path)
        .args(["-s", serial, "forward", "tcp:0", &format!("jdwp:{}", pid)])
        .output()
        .await
        .map_err(|e| Error::bridge(format!("jdwp forward failed: {}", e)))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(Error::bridge(format!(
            "jdwp forward rejected: {}",
            stderr.trim()
        )));
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    parse_forwarded_port(&stdout)
        .ok_or_else(|| Error::bridge(format!("unexpected forward output: {:?}", stdout)))
}

/// Extract the allocated port from `adb forward tcp:0` output
fn parse_forwarded_port(output: &str) -> Option<u16> {
    output.trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_forwarded_port() {
        assert_eq!(parse_forwarded_port("8600\n"), Some(8600));
        assert_eq!(parse_forwarded_port("  41234  "), Some(41234));
        assert_eq!(parse_forwarded_port(""), None);
        assert_eq!(parse_forwarded_port("error: closed"), None);
    }
}
