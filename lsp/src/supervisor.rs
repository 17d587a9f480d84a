//! Supervisor facade: the startup sequence and everything the host calls.
//!
//! Construction IS startup: [`Supervisor::start`] reports status, runs the
//! one-time workspace checks, builds the launch callback, wires the activity
//! aggregator and command bridge, then starts the session.
//!
//! All session state lives here and is only mutated while draining the event
//! channel or from `&mut self` methods, so nothing is shared across tasks.
//! The supervisor holds only the receiving end of a session's channel: the
//! channel closes when that session's tasks end, and a failed or replaced
//! session's receiver is dropped with whatever it still held.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::activity::{ActivityAggregator, ActivityState};
use crate::commands::{CommandBridge, UnknownCommand};
use crate::error::LaunchError;
use crate::host::EditorHost;
use crate::launcher::{ServerLauncher, ToolchainResolver};
use crate::protocol::{self, Selection};
use crate::session::RunningServer;
use crate::tasks;
use crate::types::{LaunchStrategy, LspEvent, ServerStopReason, SessionState, SupervisorConfig};

pub const STARTING_STATUS: &str = "starting up";
pub const RUNNING_STATUS: &str = "running";
pub const FAILED_STATUS: &str = "could not start server";
pub const STOPPED_STATUS: &str = "server stopped";

/// Workspace-level config file from older releases. Its presence earns a warning.
pub const DEPRECATED_CONFIG_FILE: &str = "warden.toml";

/// Channel capacity for the event channel between session tasks and the supervisor.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Check for the deprecated config file without blocking startup.
/// A missing file or any filesystem error is silently ignored.
pub(crate) fn spawn_stale_config_check(
    workspace_root: &Path,
    host: Arc<dyn EditorHost>,
) -> JoinHandle<()> {
    let path = workspace_root.join(DEPRECATED_CONFIG_FILE);
    tokio::spawn(async move {
        match tokio::fs::try_exists(&path).await {
            Ok(true) => host.show_warning(&format!(
                "Found deprecated {DEPRECATED_CONFIG_FILE} in the workspace. \
                 Move its settings to ~/.warden/config.toml and delete it."
            )),
            Ok(false) => {}
            Err(e) => {
                tracing::debug!(path = %path.display(), "Skipping deprecated config check: {e}");
            }
        }
    })
}

/// Write the default task file off the async runtime. Failures are logged only.
async fn write_default_tasks(workspace_root: &Path) {
    let root = workspace_root.to_path_buf();
    match tokio::task::spawn_blocking(move || tasks::ensure_default_tasks(&root)).await {
        Ok(Ok(_)) => {}
        Ok(Err(e)) => tracing::warn!("Failed to write default build tasks: {e}"),
        Err(e) => tracing::warn!("Default build task writer did not finish: {e}"),
    }
}

pub struct Supervisor {
    host: Arc<dyn EditorHost>,
    launcher: ServerLauncher,
    workspace_root: PathBuf,
    /// Present only while the session is running.
    server: Option<RunningServer>,
    state: SessionState,
    /// Set by [`LspEvent::Ready`]; notifications before it are ignored.
    ready: bool,
    activity: ActivityAggregator,
    commands: CommandBridge,
    /// Events of the current session; `None` when no session was started
    /// or its channel has been drained after close.
    event_rx: Option<mpsc::Receiver<LspEvent>>,
}

impl Supervisor {
    /// Run the startup sequence and start the session.
    ///
    /// A server that cannot be started is reported to the host and leaves
    /// the supervisor in [`SessionState::Failed`]. Only a fatal process
    /// error is returned.
    pub async fn start(
        config: SupervisorConfig,
        strategy: LaunchStrategy,
        workspace_root: &Path,
        host: Arc<dyn EditorHost>,
        resolver: Arc<dyn ToolchainResolver>,
    ) -> Result<Self, LaunchError> {
        host.set_status(STARTING_STATUS);

        spawn_stale_config_check(workspace_root, host.clone());
        if config.write_default_tasks {
            write_default_tasks(workspace_root).await;
        }

        let launcher = ServerLauncher::new(
            strategy,
            config.build,
            config.output,
            resolver,
            host.clone(),
            workspace_root,
        );
        let activity = ActivityAggregator::new();
        let commands = CommandBridge::new(
            host.clone(),
            Duration::from_secs(config.request_timeout_secs),
        );

        let mut supervisor = Self {
            host,
            launcher,
            workspace_root: workspace_root.to_path_buf(),
            server: None,
            state: SessionState::Starting,
            ready: false,
            activity,
            commands,
            event_rx: None,
        };
        supervisor.start_session().await?;
        Ok(supervisor)
    }

    /// Invoke the launch callback once and hand the child to a new session.
    async fn start_session(&mut self) -> Result<(), LaunchError> {
        self.event_rx = None;
        self.ready = false;
        self.state = SessionState::Starting;

        tracing::info!(
            strategy = self.launcher.strategy().label(),
            "Starting language server..."
        );
        let launched = match self.launcher.launch().await {
            Ok(launched) => launched,
            Err(e) if e.is_fatal() => {
                tracing::error!("Language server process error: {e}");
                self.state = SessionState::Failed(e.to_string());
                return Err(e);
            }
            Err(e) => {
                self.fail(&e.to_string());
                return Ok(());
            }
        };

        // Fresh channel per session. On a failed handshake the receiver is
        // dropped here, together with the dead server's stop event.
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        match RunningServer::start(launched, &self.workspace_root, event_tx).await {
            Ok(server) => {
                tracing::info!("Language server started successfully");
                self.server = Some(server);
                self.event_rx = Some(event_rx);
                self.state = SessionState::Running;
                self.host.set_status(RUNNING_STATUS);
            }
            Err(e) => self.fail(&format!("{e:#}")),
        }
        Ok(())
    }

    fn fail(&mut self, reason: &str) {
        tracing::warn!("Failed to start language server: {reason}");
        self.state = SessionState::Failed(reason.to_string());
        self.host.set_status(FAILED_STATUS);
        self.host.show_warning(&format!("{FAILED_STATUS}: {reason}"));
    }

    /// Drain pending events, up to `budget`. Non-blocking.
    pub fn poll_events(&mut self, budget: usize) -> usize {
        let mut count = 0;
        while count < budget {
            let Some(rx) = self.event_rx.as_mut() else {
                break;
            };
            match rx.try_recv() {
                Ok(event) => {
                    self.handle_event(event);
                    count += 1;
                }
                Err(mpsc::error::TryRecvError::Empty) => break,
                Err(mpsc::error::TryRecvError::Disconnected) => {
                    self.event_rx = None;
                    break;
                }
            }
        }
        count
    }

    /// Wait for the next event and apply it.
    ///
    /// Returns `None` immediately when no session is attached, and once the
    /// session's tasks have ended and all of its events were applied.
    pub async fn next_event(&mut self) -> Option<LspEvent> {
        let received = self.event_rx.as_mut()?.recv().await;
        let Some(event) = received else {
            self.event_rx = None;
            return None;
        };
        self.handle_event(event.clone());
        Some(event)
    }

    fn handle_event(&mut self, event: LspEvent) {
        match event {
            LspEvent::Ready => {
                tracing::info!("Language server ready");
                self.ready = true;
            }
            LspEvent::Notification { method } => {
                if !self.ready {
                    tracing::trace!("Ignoring notification before ready: {method}");
                    return;
                }
                match method.as_str() {
                    protocol::DIAGNOSTICS_BEGIN => {
                        self.activity.on_begin(self.host.as_ref());
                    }
                    protocol::DIAGNOSTICS_END => {
                        self.activity.on_end(self.host.as_ref());
                    }
                    _ => tracing::trace!("Ignoring notification: {method}"),
                }
            }
            LspEvent::ServerStopped { reason } => {
                // Removal IS the state transition; drop kills the child.
                self.server = None;
                self.ready = false;
                self.activity.reset(self.host.as_ref());
                match reason {
                    ServerStopReason::Exited => {
                        tracing::info!("Language server exited");
                        self.state = SessionState::Stopped;
                        self.host.set_status(STOPPED_STATUS);
                    }
                    ServerStopReason::Failed(msg) => {
                        tracing::warn!(error = %msg, "Language server failed");
                        self.host.set_status(STOPPED_STATUS);
                        self.host
                            .show_warning(&format!("{STOPPED_STATUS}: {msg}"));
                        self.state = SessionState::Failed(msg);
                    }
                }
            }
        }
    }

    /// Forward an editor command. Returns once the request is queued; the
    /// handle resolves when the response (or failure warning) is handled.
    pub fn execute_command(
        &self,
        command_id: &str,
        selection: Selection,
    ) -> Result<JoinHandle<()>, UnknownCommand> {
        let client = self.server.as_ref().map(RunningServer::client);
        self.commands.execute(command_id, selection, client)
    }

    /// Stop the current server (if any) and invoke the launch callback again.
    pub async fn restart(&mut self) -> Result<(), LaunchError> {
        if let Some(server) = self.server.take() {
            tracing::info!("Restarting language server...");
            server.shutdown().await;
        }
        self.activity.reset(self.host.as_ref());
        self.host.set_status(STARTING_STATUS);
        self.start_session().await
    }

    /// Gracefully stop the session. The child is also killed on drop.
    pub async fn shutdown(&mut self) {
        if let Some(server) = self.server.take() {
            tracing::info!("Shutting down language server...");
            server.shutdown().await;
        }
        self.event_rx = None;
        self.ready = false;
        self.activity.reset(self.host.as_ref());
        self.state = SessionState::Stopped;
        self.host.set_status(STOPPED_STATUS);
    }

    #[must_use]
    pub fn state(&self) -> &SessionState {
        &self.state
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.ready
    }

    #[must_use]
    pub fn activity(&self) -> ActivityState {
        self.activity.state()
    }

    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.activity() == ActivityState::Busy
    }

    /// Replace the session channel with one fed by the returned sender.
    #[cfg(test)]
    pub(crate) fn attach_event_source(&mut self) -> mpsc::Sender<LspEvent> {
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        self.event_rx = Some(event_rx);
        event_tx
    }
}
