//! Droid Demon - deploy and launch Android applications
//!
//! Binary entry point. Wires configuration, logging, the adb bridge and the
//! deployment session together; all logic lives in the workspace crates.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};

use ddemon_adb::{AdbBridge, AdbConfig, DeviceBridge, ToolAvailability};
use ddemon_core::events::OutputKind;
use ddemon_core::types::SessionState;
use ddemon_deploy::{ApkArtifact, DeployConfig, DeploymentSession, EmulatorSpec, SessionHandle};

#[derive(Parser, Debug)]
#[command(name = "ddemon")]
#[command(about = "Deploy and launch Android applications", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Deploy an APK to a device and launch its activity
    Run(RunArgs),
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Path to the APK to deploy
    #[arg(long, value_name = "PATH")]
    apk: PathBuf,

    /// Application package name (read from --manifest when omitted)
    #[arg(long, value_name = "NAME", conflicts_with = "manifest")]
    package: Option<String>,

    /// AndroidManifest.xml to read the package name from
    #[arg(long, value_name = "PATH", required_unless_present = "package")]
    manifest: Option<PathBuf>,

    /// Activity to launch; a leading '.' expands against the package
    #[arg(long, value_name = "NAME")]
    activity: String,

    /// Virtual device name passed to the emulator
    #[arg(long, value_name = "NAME")]
    avd: Option<String>,

    /// Launch suspended and report the JDWP debugger port
    #[arg(short = 'D', long)]
    debug: bool,

    /// adb binary to use instead of the discovered one
    #[arg(long, value_name = "PATH")]
    adb: Option<PathBuf>,

    /// Emulator binary to use instead of the discovered one
    #[arg(long, value_name = "PATH")]
    emulator: Option<PathBuf>,

    /// Deploy to an already-connected device, do not launch an emulator
    #[arg(long)]
    no_emulator: bool,

    /// Maximum `pm install` attempts
    #[arg(long, value_name = "N")]
    install_attempts: Option<u32>,

    /// Maximum `am start` attempts
    #[arg(long, value_name = "N")]
    launch_attempts: Option<u32>,

    /// Seconds waited between attempts
    #[arg(long, value_name = "SECS")]
    wait_secs: Option<u64>,

    /// Settings file instead of ~/.config/droid-demon/config.toml
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;
    ddemon_core::logging::init()?;

    let cli = Cli::parse();
    match cli.command {
        Command::Run(args) => run(args).await,
    }
}

async fn run(args: RunArgs) -> color_eyre::Result<()> {
    let mut config = match &args.config {
        Some(path) => DeployConfig::load_from(path)?,
        None => DeployConfig::load()?,
    };
    if let Some(n) = args.install_attempts {
        config.max_install_attempts = n;
    }
    if let Some(n) = args.launch_attempts {
        config.max_launch_attempts = n;
    }
    if let Some(secs) = args.wait_secs {
        config.retry_wait_secs = secs;
    }

    let artifact = if let Some(package) = &args.package {
        ApkArtifact::from_parts(&args.apk, package)
    } else if let Some(manifest) = &args.manifest {
        ApkArtifact::from_manifest(&args.apk, manifest)?
    } else {
        // clap enforces one of the two at parse time
        color_eyre::eyre::bail!("either --package or --manifest is required");
    };

    let tools = ToolAvailability::check();
    let adb_path = match &args.adb {
        Some(path) => path.clone(),
        None => tools.require_adb()?.to_path_buf(),
    };

    let bridge = Arc::new(AdbBridge::new(AdbConfig {
        adb_path,
        ..AdbConfig::default()
    }));
    bridge.start().await?;

    let mut session = DeploymentSession::new(
        Arc::clone(&bridge),
        config,
        &artifact,
        &args.activity,
        args.debug,
    );
    if !args.no_emulator {
        let emulator_path = match &args.emulator {
            Some(path) => path.clone(),
            None => tools.require_emulator()?.to_path_buf(),
        };
        session = session.with_emulator(EmulatorSpec {
            emulator_path,
            avd: args.avd.clone(),
        });
    }

    let mut handle = session.run().await?;

    if let Some(port_rx) = handle.take_debug_port() {
        tokio::spawn(async move {
            if let Ok(port) = port_rx.await {
                println!("Application is waiting for the debugger on localhost:{port}.");
            }
        });
    }

    let reached_running = pump(&mut handle).await;

    bridge.terminate().await?;

    if !reached_running {
        eprintln!(
            "Session ended before the application was running. Log: {}",
            ddemon_core::logging::current_log_file().display()
        );
        std::process::exit(1);
    }
    Ok(())
}

/// Forward console output until the session ends. Ctrl-C requests a stop;
/// the loop then drains whatever the teardown still produces.
async fn pump(handle: &mut SessionHandle) -> bool {
    let mut state_rx = handle.state_receiver();
    let mut state_open = true;
    let mut reached_running = false;
    let mut stopping = false;

    loop {
        tokio::select! {
            line = handle.next_line() => match line {
                Some(line) => {
                    match line.kind {
                        OutputKind::Stdout => print!("{}", line.text),
                        OutputKind::Stderr => eprint!("{}", line.text),
                    }
                    let _ = std::io::stdout().flush();
                }
                // All session tasks are gone and the stream is drained
                None => break,
            },
            changed = state_rx.changed(), if state_open => {
                match changed {
                    Ok(()) => {
                        if *state_rx.borrow_and_update() == SessionState::Running {
                            reached_running = true;
                        }
                    }
                    Err(_) => state_open = false,
                }
            }
            _ = tokio::signal::ctrl_c(), if !stopping => {
                stopping = true;
                eprintln!("Stopping session.");
                handle.stop();
            }
        }
    }

    reached_running
}
