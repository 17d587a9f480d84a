//! Public types shared between the supervisor, its collaborators, and the host.
//!
//! The binary constructs [`SupervisorConfig`] (usually through `warden-config`)
//! and a [`LaunchStrategy`]; everything else flows from those two values.

use std::path::PathBuf;

use serde::Deserialize;

/// Environment variable naming an explicit server binary.
pub const SERVER_PATH_ENV: &str = "SERVER_PATH";

/// Environment variable naming a source checkout to build and run.
pub const SERVER_ROOT_ENV: &str = "SERVER_ROOT";

/// How the server process is obtained. Resolved once, immutable for the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LaunchStrategy {
    /// Spawn this binary directly.
    ExplicitBinaryPath(PathBuf),
    /// Build the server in this directory, then run it from there.
    BuildAndRunAt(PathBuf),
    /// Let the toolchain resolver find (and possibly install) the server.
    ToolchainResolved,
}

impl LaunchStrategy {
    /// Resolve from the process environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Resolve from an arbitrary lookup. `SERVER_PATH` wins over `SERVER_ROOT`;
    /// empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        if let Some(path) = non_empty(SERVER_PATH_ENV) {
            return Self::ExplicitBinaryPath(PathBuf::from(path));
        }
        if let Some(root) = non_empty(SERVER_ROOT_ENV) {
            return Self::BuildAndRunAt(PathBuf::from(root));
        }
        Self::ToolchainResolved
    }

    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::ExplicitBinaryPath(_) => "explicit binary",
            Self::BuildAndRunAt(_) => "build and run",
            Self::ToolchainResolved => "toolchain",
        }
    }
}

/// Severity threshold at which the output surface is forced into view.
///
/// Ordered so that `threshold <= severity` means "reveal". `Never` sorts last
/// and therefore reveals nothing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RevealOutputChannelOn {
    Info,
    Warn,
    #[default]
    Error,
    Never,
}

impl RevealOutputChannelOn {
    /// Whether output of the given severity should force the surface visible.
    #[must_use]
    pub fn reveals(self, severity: Self) -> bool {
        self != Self::Never && self <= severity
    }
}

// Default value function for serde (bool::default() is false, so only true needs a fn)
const fn default_true() -> bool {
    true
}

/// Where server stderr goes.
#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    /// Duplicate stderr into a timestamped file in the workspace root.
    #[serde(default)]
    pub log_to_file: bool,
    /// Forward stderr to the editor's output surface.
    #[serde(default = "default_true")]
    pub show_stderr_in_output_channel: bool,
    #[serde(default)]
    pub reveal_output_channel_on: RevealOutputChannelOn,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            log_to_file: false,
            show_stderr_in_output_channel: true,
            reveal_output_channel_on: RevealOutputChannelOn::default(),
        }
    }
}

impl OutputConfig {
    /// Whether any stderr listener is active.
    #[must_use]
    pub fn captures_stderr(&self) -> bool {
        self.log_to_file || self.show_stderr_in_output_channel
    }
}

fn default_build_program() -> String {
    String::from("cargo")
}

fn default_build_args() -> Vec<String> {
    vec![String::from("build"), String::from("--release")]
}

fn default_run_args() -> Vec<String> {
    vec![
        String::from("run"),
        String::from("--release"),
        String::from("--quiet"),
    ]
}

/// Commands used by [`LaunchStrategy::BuildAndRunAt`].
#[derive(Debug, Clone, Deserialize)]
pub struct BuildConfig {
    #[serde(default = "default_build_program")]
    pub program: String,
    #[serde(default = "default_build_args")]
    pub build_args: Vec<String>,
    #[serde(default = "default_run_args")]
    pub run_args: Vec<String>,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            program: default_build_program(),
            build_args: default_build_args(),
            run_args: default_run_args(),
        }
    }
}

fn default_toolchain() -> String {
    String::from("nightly")
}

fn default_component() -> String {
    String::from("rls")
}

/// Inputs for the default toolchain resolver.
#[derive(Debug, Clone, Deserialize)]
pub struct ToolchainConfig {
    /// Toolchain channel, e.g. "nightly".
    #[serde(default = "default_toolchain")]
    pub toolchain: String,
    /// Component that provides the server binary.
    #[serde(default = "default_component")]
    pub component: String,
    /// Server binary name inside the toolchain.
    #[serde(default = "default_component")]
    pub binary: String,
}

impl Default for ToolchainConfig {
    fn default() -> Self {
        Self {
            toolchain: default_toolchain(),
            component: default_component(),
            binary: default_component(),
        }
    }
}

const fn default_request_timeout_secs() -> u64 {
    30
}

/// Everything the supervisor reads at activation. Never re-read afterwards.
#[derive(Debug, Clone, Deserialize)]
pub struct SupervisorConfig {
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub build: BuildConfig,
    #[serde(default)]
    pub toolchain: ToolchainConfig,
    /// Write `.warden/tasks.json` when the workspace has none.
    #[serde(default = "default_true")]
    pub write_default_tasks: bool,
    /// Upper bound on a single editor command request.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            output: OutputConfig::default(),
            build: BuildConfig::default(),
            toolchain: ToolchainConfig::default(),
            write_default_tasks: true,
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

/// Lifecycle state of the server session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Starting,
    Running,
    Stopped,
    Failed(String),
}

/// Why a server stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerStopReason {
    Exited,
    Failed(String),
}

/// An event emitted by session tasks, drained by the supervisor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LspEvent {
    /// The handshake completed; notifications may now be acted upon.
    Ready,
    /// A server notification arrived. Only the method matters here.
    Notification { method: String },
    /// The server's stdout closed or could not be read.
    ServerStopped { reason: ServerStopReason },
}
