//! Supervisor for a workspace analysis server.
//!
//! Locates and launches the server, routes its stderr, tracks its
//! analysis activity, and forwards editor commands to it. Everything the
//! user sees goes through an [`EditorHost`].

pub mod codec;
pub mod protocol;
pub mod tasks;
pub mod types;

mod activity;
mod commands;
mod error;
mod host;
mod launcher;
mod output;
mod session;
mod supervisor;

pub use activity::{ActivityState, DONE_MESSAGE, WORKING_MESSAGE};
pub use commands::{EditorCommand, UnknownCommand};
pub use error::{LaunchError, RequestError};
pub use host::EditorHost;
pub use launcher::{ResolveFut, RustupResolver, ServerLauncher, ToolchainResolver};
pub use output::LOG_FILE_PREFIX;
pub use protocol::{PathToUriError, Position, Range, Selection};
pub use session::RequestClient;
pub use supervisor::{
    DEPRECATED_CONFIG_FILE, FAILED_STATUS, RUNNING_STATUS, STARTING_STATUS, STOPPED_STATUS,
    Supervisor,
};
pub use types::{
    BuildConfig, LaunchStrategy, LspEvent, OutputConfig, RevealOutputChannelOn, SERVER_PATH_ENV,
    SERVER_ROOT_ENV, ServerStopReason, SessionState, SupervisorConfig, ToolchainConfig,
};
