//! Locates and spawns the server process for a [`LaunchStrategy`].
//!
//! [`ServerLauncher`] is built once and may be invoked many times (initial
//! start and every restart). Each invocation resolves exactly once, either
//! to a running child with stderr routing attached or to a [`LaunchError`].

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::process::Stdio;
use std::sync::Arc;

use tokio::process::{Child, Command};
use tokio::task::JoinHandle;

use crate::error::LaunchError;
use crate::host::EditorHost;
use crate::output::OutputRouter;
use crate::types::{BuildConfig, LaunchStrategy, OutputConfig, ToolchainConfig};

/// Toolchain resolution future type alias.
pub type ResolveFut<'a> = Pin<Box<dyn Future<Output = Result<Command, LaunchError>> + Send + 'a>>;

/// Produces the command that runs the server when no explicit path or
/// source root is given. May perform setup (e.g. installing a component)
/// before resolving.
pub trait ToolchainResolver: Send + Sync {
    fn resolve(&self) -> ResolveFut<'_>;
}

/// Resolves the server through `rustup`, installing its component on demand.
pub struct RustupResolver {
    config: ToolchainConfig,
}

impl RustupResolver {
    #[must_use]
    pub fn new(config: ToolchainConfig) -> Self {
        Self { config }
    }

    async fn run_rustup(rustup: &Path, args: &[&str]) -> Result<std::process::Output, LaunchError> {
        Command::new(rustup)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| {
                LaunchError::ToolchainResolutionFailed(format!(
                    "running rustup {}: {e}",
                    args.join(" ")
                ))
            })
    }

    async fn resolve_command(&self) -> Result<Command, LaunchError> {
        let ToolchainConfig {
            toolchain,
            component,
            binary,
        } = &self.config;

        let rustup = which::which("rustup").map_err(|e| {
            LaunchError::ToolchainResolutionFailed(format!("rustup not found in PATH: {e}"))
        })?;

        let check =
            Self::run_rustup(&rustup, &["which", "--toolchain", toolchain.as_str(), binary.as_str()]).await?;
        if check.status.success() {
            tracing::debug!(toolchain = %toolchain, binary = %binary, "Server already installed");
        } else {
            tracing::info!(
                toolchain = %toolchain,
                component = %component,
                "Installing server component"
            );
            let install = Self::run_rustup(
                &rustup,
                &[
                    "component",
                    "add",
                    component.as_str(),
                    "--toolchain",
                    toolchain.as_str(),
                ],
            )
            .await?;
            if !install.status.success() {
                return Err(LaunchError::ToolchainResolutionFailed(format!(
                    "rustup component add {component} failed: {}",
                    last_line(&install.stderr)
                )));
            }
        }

        let mut cmd = Command::new(rustup);
        cmd.args(["run", toolchain.as_str(), binary.as_str()]);
        Ok(cmd)
    }
}

impl ToolchainResolver for RustupResolver {
    fn resolve(&self) -> ResolveFut<'_> {
        Box::pin(self.resolve_command())
    }
}

/// Last non-empty line of a process's captured output.
fn last_line(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes)
        .lines()
        .rev()
        .find(|line| !line.trim().is_empty())
        .unwrap_or("no output")
        .trim()
        .to_string()
}

/// A spawned server with its stderr routing attached.
pub(crate) struct LaunchedServer {
    pub child: Child,
    pub stderr_handle: Option<JoinHandle<()>>,
}

/// The launch callback handed to the session. Holds everything needed to
/// (re)start the server; no environment is inspected after construction.
pub struct ServerLauncher {
    strategy: LaunchStrategy,
    build: BuildConfig,
    output: OutputConfig,
    resolver: Arc<dyn ToolchainResolver>,
    host: Arc<dyn EditorHost>,
    workspace_root: PathBuf,
}

impl ServerLauncher {
    pub fn new(
        strategy: LaunchStrategy,
        build: BuildConfig,
        output: OutputConfig,
        resolver: Arc<dyn ToolchainResolver>,
        host: Arc<dyn EditorHost>,
        workspace_root: &Path,
    ) -> Self {
        Self {
            strategy,
            build,
            output,
            resolver,
            host,
            workspace_root: workspace_root.to_path_buf(),
        }
    }

    #[must_use]
    pub fn strategy(&self) -> &LaunchStrategy {
        &self.strategy
    }

    pub(crate) async fn launch(&self) -> Result<LaunchedServer, LaunchError> {
        let (mut cmd, program) = match &self.strategy {
            LaunchStrategy::ExplicitBinaryPath(path) => {
                (Command::new(path), path.display().to_string())
            }
            LaunchStrategy::BuildAndRunAt(root) => {
                self.build_at(root).await?;
                let mut cmd = Command::new(&self.build.program);
                cmd.args(&self.build.run_args).current_dir(root);
                (cmd, self.build.program.clone())
            }
            LaunchStrategy::ToolchainResolved => {
                let cmd = self.resolver.resolve().await?;
                let program = cmd.as_std().get_program().to_string_lossy().into_owned();
                (cmd, program)
            }
        };

        tracing::info!(strategy = self.strategy.label(), program = %program, "Spawning server");
        self.spawn(&mut cmd, program)
    }

    fn spawn(&self, cmd: &mut Command, program: String) -> Result<LaunchedServer, LaunchError> {
        let stderr = if self.output.captures_stderr() {
            Stdio::piped()
        } else {
            Stdio::null()
        };
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(stderr)
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|e| LaunchError::from_spawn(program, e))?;

        let stderr_handle = child.stderr.take().map(|stream| {
            OutputRouter::new(&self.output, &self.workspace_root, self.host.clone()).attach(stream)
        });

        Ok(LaunchedServer {
            child,
            stderr_handle,
        })
    }

    /// Run the build step and wait for it. A failed build is reported, not fatal.
    async fn build_at(&self, root: &Path) -> Result<(), LaunchError> {
        tracing::info!(root = %root.display(), "Building server");
        let output = Command::new(&self.build.program)
            .args(&self.build.build_args)
            .current_dir(root)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => LaunchError::BinaryNotFound {
                    program: self.build.program.clone(),
                },
                _ => LaunchError::BuildFailed {
                    root: root.to_path_buf(),
                    detail: e.to_string(),
                },
            })?;

        if output.status.success() {
            return Ok(());
        }
        if self.output.show_stderr_in_output_channel {
            self.host
                .append_output(&String::from_utf8_lossy(&output.stderr));
        }
        Err(LaunchError::BuildFailed {
            root: root.to_path_buf(),
            detail: last_line(&output.stderr),
        })
    }
}


#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use super::testing::{CommandResolver, FailingResolver};
    use super::*;
    use crate::host::testing::RecordingHost;

    fn launcher(
        strategy: LaunchStrategy,
        resolver: Arc<dyn ToolchainResolver>,
        host: Arc<RecordingHost>,
        root: &Path,
    ) -> ServerLauncher {
        ServerLauncher::new(
            strategy,
            BuildConfig::default(),
            OutputConfig::default(),
            resolver,
            host,
            root,
        )
    }

    #[tokio::test]
    async fn missing_binary_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let host = Arc::new(RecordingHost::default());
        let launcher = launcher(
            LaunchStrategy::ExplicitBinaryPath(PathBuf::from("/nonexistent")),
            Arc::new(FailingResolver::default()),
            host,
            dir.path(),
        );

        let err = launcher.launch().await.err().unwrap();
        assert!(matches!(err, LaunchError::BinaryNotFound { ref program } if program == "/nonexistent"));
        assert!(!err.is_fatal());
    }

    #[tokio::test]
    async fn resolver_failure_is_reported_once() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = Arc::new(FailingResolver::default());
        let launcher = launcher(
            LaunchStrategy::ToolchainResolved,
            resolver.clone(),
            Arc::new(RecordingHost::default()),
            dir.path(),
        );

        let err = launcher.launch().await.err().unwrap();
        assert!(matches!(err, LaunchError::ToolchainResolutionFailed(_)));
        assert!(!err.is_fatal());
        assert_eq!(resolver.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn resolved_command_that_is_missing_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = Arc::new(CommandResolver::new("/nonexistent/rls"));
        let launcher = launcher(
            LaunchStrategy::ToolchainResolved,
            resolver.clone(),
            Arc::new(RecordingHost::default()),
            dir.path(),
        );

        let err = launcher.launch().await.err().unwrap();
        assert!(matches!(err, LaunchError::BinaryNotFound { .. }));
        assert_eq!(resolver.calls.load(Ordering::SeqCst), 1);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failing_build_is_reported_with_detail() {
        let dir = tempfile::tempdir().unwrap();
        let host = Arc::new(RecordingHost::default());
        let launcher = ServerLauncher::new(
            LaunchStrategy::BuildAndRunAt(dir.path().to_path_buf()),
            BuildConfig {
                program: "sh".to_string(),
                build_args: vec![
                    "-c".to_string(),
                    "echo 'error: could not compile' >&2; exit 101".to_string(),
                ],
                run_args: vec![],
            },
            OutputConfig::default(),
            Arc::new(FailingResolver::default()),
            host.clone(),
            dir.path(),
        );

        let err = launcher.launch().await.err().unwrap();
        match err {
            LaunchError::BuildFailed { detail, .. } => {
                assert_eq!(detail, "error: could not compile");
            }
            other => panic!("expected BuildFailed, got {other:?}"),
        }
        assert!(
            host.calls()
                .iter()
                .any(|call| matches!(call, crate::host::testing::HostCall::Output(text) if text.contains("could not compile")))
        );
    }

    #[tokio::test]
    async fn missing_build_tool_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let launcher = ServerLauncher::new(
            LaunchStrategy::BuildAndRunAt(dir.path().to_path_buf()),
            BuildConfig {
                program: "/nonexistent/cargo".to_string(),
                ..BuildConfig::default()
            },
            OutputConfig::default(),
            Arc::new(FailingResolver::default()),
            Arc::new(RecordingHost::default()),
            dir.path(),
        );

        let err = launcher.launch().await.err().unwrap();
        assert!(matches!(err, LaunchError::BinaryNotFound { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn spawned_server_routes_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let host = Arc::new(RecordingHost::default());
        let launcher = ServerLauncher::new(
            LaunchStrategy::BuildAndRunAt(dir.path().to_path_buf()),
            BuildConfig {
                program: "sh".to_string(),
                build_args: vec!["-c".to_string(), "true".to_string()],
                run_args: vec!["-c".to_string(), "echo booting >&2".to_string()],
            },
            OutputConfig::default(),
            Arc::new(FailingResolver::default()),
            host.clone(),
            dir.path(),
        );

        let mut launched = launcher.launch().await.unwrap();
        launched.child.wait().await.unwrap();
        launched.stderr_handle.take().unwrap().await.unwrap();

        assert!(
            host.calls()
                .contains(&crate::host::testing::HostCall::Output("booting\n".to_string()))
        );
    }

    #[test]
    fn last_line_skips_blank_trailer() {
        assert_eq!(last_line(b"warning: x\nerror: y\n\n"), "error: y");
        assert_eq!(last_line(b""), "no output");
    }
}
