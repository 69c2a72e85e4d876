//! Debugger handshake
//!
//! When the application is launched with the debug flag it suspends at
//! startup and waits for a debugger. The handshake task watches the client
//! stream for the deployed package entering that waiting state and reports
//! the forwarded JDWP port exactly once; a debugger attaching twice to the
//! same process would wedge it.

use tokio::sync::{broadcast, oneshot};

use ddemon_core::events::{ClientEvent, DebuggerStatus};
use ddemon_core::prelude::*;

use crate::cancel::CancelToken;

pub struct DebugHandshake;

impl DebugHandshake {
    /// Watch `clients` for `package` waiting on a debugger.
    ///
    /// Resolves the returned receiver with the forwarded port at most once.
    /// The task ends after reporting, on cancellation, or when the client
    /// stream closes; an unresolved receiver yields `RecvError`.
    pub fn spawn(
        mut clients: broadcast::Receiver<ClientEvent>,
        package: impl Into<String>,
        cancel: CancelToken,
    ) -> oneshot::Receiver<u16> {
        let package = package.into();
        let (port_tx, port_rx) = oneshot::channel();

        tokio::spawn(async move {
            let mut port_tx = Some(port_tx);
            loop {
                let event = tokio::select! {
                    received = clients.recv() => match received {
                        Ok(event) => event,
                        Err(broadcast::error::RecvError::Lagged(missed)) => {
                            warn!("client stream lagged, {missed} events missed");
                            continue;
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                    _ = cancel.cancelled() => break,
                };

                if !Self::matches(&event, &package) {
                    continue;
                }
                let Some(port) = event.jdwp_port else {
                    // Waiting but no forwarded port yet; a follow-up event
                    // will carry it.
                    continue;
                };

                if let Some(tx) = port_tx.take() {
                    info!(package = %package, port, "debugger handshake ready");
                    let _ = tx.send(port);
                    break;
                }
            }
        });

        port_rx
    }

    fn matches(event: &ClientEvent, package: &str) -> bool {
        event.debugger == DebuggerStatus::Waiting
            && event.description.as_deref() == Some(package)
    }
}
