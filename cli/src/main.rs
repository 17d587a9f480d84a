//! Warden CLI - runs the analysis-server supervisor against a workspace.
//!
//! ```text
//! main() -> Supervisor::start(config, strategy, root, host, resolver)
//!               |
//!               v
//!        loop { tick -> poll_events | stdin line -> command | ctrl-c }
//!               |
//!               v
//!        Supervisor::shutdown()
//! ```
//!
//! Server events are drained on a fixed cadence, the same way a host editor
//! would drain them from its UI loop.

mod host;
mod input;

use std::{
    env,
    fs::{self, OpenOptions},
    path::PathBuf,
    sync::{Arc, Mutex},
    time::Duration,
};

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader, stdin};
use tokio::sync::mpsc;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use warden_config::WardenConfig;
use warden_lsp::{
    EditorCommand, LaunchError, LaunchStrategy, RustupResolver, Selection, Supervisor,
};

use crate::host::TerminalHost;
use crate::input::{HELP, InputCommand, parse_line};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Upper bound on events applied per tick, so input stays responsive.
const EVENT_BUDGET: usize = 64;

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap_or_else(|_| EnvFilter::try_new("warn").expect("warn filter is valid"));

    let (log_file, init_warnings) = open_warden_log_file();

    if let Some((log_path, file)) = log_file {
        tracing_subscriber::registry()
            .with(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
            .with(env_filter)
            .init();

        tracing::info!(path = %log_path.display(), "Logging initialized");
        for warning in init_warnings {
            tracing::warn!("{warning}");
        }
        return;
    }

    // stdout carries server output; keep it clean rather than log there.
    tracing_subscriber::registry().with(env_filter).init();
}

fn open_warden_log_file() -> (Option<(PathBuf, fs::File)>, Vec<String>) {
    let mut warnings = Vec::new();

    for candidate in warden_log_file_candidates() {
        if let Some(parent) = candidate.parent()
            && let Err(e) = fs::create_dir_all(parent)
        {
            warnings.push(format!(
                "Failed to create log dir {}: {e}",
                parent.display()
            ));
            continue;
        }

        match OpenOptions::new()
            .create(true)
            .append(true)
            .open(&candidate)
        {
            Ok(file) => return (Some((candidate, file)), warnings),
            Err(e) => {
                warnings.push(format!(
                    "Failed to open log file {}: {e}",
                    candidate.display()
                ));
            }
        }
    }

    (None, warnings)
}

fn warden_log_file_candidates() -> Vec<PathBuf> {
    let mut candidates = Vec::new();

    // Primary: ~/.warden/logs/warden.log
    if let Some(config_path) = WardenConfig::path()
        && let Some(config_dir) = config_path.parent()
    {
        candidates.push(config_dir.join("logs").join("warden.log"));
    }

    // Fallback: ./.warden/logs/warden.log
    candidates.push(PathBuf::from(".warden").join("logs").join("warden.log"));

    candidates
}

fn workspace_root() -> Result<PathBuf> {
    let root = match env::args_os().nth(1) {
        Some(arg) => PathBuf::from(arg),
        None => env::current_dir().context("reading current directory")?,
    };
    fs::canonicalize(&root).with_context(|| format!("workspace root {}", root.display()))
}

/// Forward stdin lines to the main loop. Closing the channel means EOF.
fn spawn_stdin_reader() -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel(16);
    tokio::spawn(async move {
        let mut lines = BufReader::new(stdin()).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    if tx.send(line).await.is_err() {
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!("Failed to read stdin: {e}");
                    break;
                }
            }
        }
    });
    rx
}

enum Flow {
    Continue,
    Quit,
}

async fn run_command(
    supervisor: &mut Supervisor,
    command: InputCommand,
    host: &TerminalHost,
) -> Result<Flow> {
    match command {
        InputCommand::Deglob { path, range } => {
            let selection = Selection::for_path(&path, range)?;
            // The warning (if any) is reported by the host when the request settles.
            drop(supervisor.execute_command(EditorCommand::Deglob.id(), selection)?);
        }
        InputCommand::Restart => supervisor.restart().await?,
        InputCommand::Status => {
            eprintln!(
                "[warden] state: {:?}, ready: {}, busy: {}, spinner: {}",
                supervisor.state(),
                supervisor.is_ready(),
                supervisor.is_busy(),
                host.is_spinning(),
            );
        }
        InputCommand::Help => eprintln!("{HELP}"),
        InputCommand::Quit => return Ok(Flow::Quit),
    }
    Ok(Flow::Continue)
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    if matches!(env::args().nth(1).as_deref(), Some("-h" | "--help")) {
        eprintln!("usage: warden [WORKSPACE_ROOT]\n\n{HELP}");
        return Ok(());
    }

    let root = workspace_root()?;
    let config = match WardenConfig::load() {
        Ok(config) => config.unwrap_or_default(),
        Err(e) => {
            tracing::warn!(path = %e.path().display(), "Ignoring config file: {e}");
            eprintln!("warning: {e}; using defaults");
            WardenConfig::default()
        }
    }
    .supervisor();

    let strategy = LaunchStrategy::from_env();
    tracing::info!(root = %root.display(), strategy = strategy.label(), "Starting warden");

    let host = Arc::new(TerminalHost::default());
    let resolver = Arc::new(RustupResolver::new(config.toolchain.clone()));
    let mut supervisor = Supervisor::start(config, strategy, &root, host.clone(), resolver).await?;

    let mut input = spawn_stdin_reader();
    let mut ticks = tokio::time::interval(POLL_INTERVAL);
    ticks.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    let result: Result<()> = loop {
        tokio::select! {
            _ = ticks.tick() => {
                supervisor.poll_events(EVENT_BUDGET);
            }
            line = input.recv() => {
                let Some(line) = line else { break Ok(()) };
                let command = match parse_line(&line, &root) {
                    Ok(Some(command)) => command,
                    Ok(None) => continue,
                    Err(e) => {
                        eprintln!("error: {e:#}");
                        continue;
                    }
                };
                match run_command(&mut supervisor, command, &host).await {
                    Ok(Flow::Continue) => {}
                    Ok(Flow::Quit) => break Ok(()),
                    Err(e) if e.is::<LaunchError>() => break Err(e),
                    Err(e) => eprintln!("error: {e:#}"),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted");
                break Ok(());
            }
        }
    };

    supervisor.shutdown().await;
    result
}
