//! Routes the server's stderr to a per-session log file and/or the editor's
//! output surface.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};

use crate::host::EditorHost;
use crate::types::{OutputConfig, RevealOutputChannelOn};

/// Log files are named `<prefix><unix-millis>.log` in the workspace root.
pub const LOG_FILE_PREFIX: &str = "warden-";

const READ_CHUNK_BYTES: usize = 8 * 1024;

/// Collision retries before giving up on a log file name.
const MAX_LOG_NAME_ATTEMPTS: u32 = 16;

/// Severity assigned to server stderr when deciding whether to reveal output.
const STDERR_SEVERITY: RevealOutputChannelOn = RevealOutputChannelOn::Info;

enum SinkState {
    /// Not opened yet; opens on the first chunk.
    Pending,
    Open { path: PathBuf, file: File },
    /// Open or write failed. Stays closed for the rest of the session.
    Closed,
}

/// Lazily-opened stderr log file, one per session.
pub(crate) struct LogFileSink {
    workspace_root: PathBuf,
    state: SinkState,
}

impl LogFileSink {
    pub fn new(workspace_root: &Path) -> Self {
        Self {
            workspace_root: workspace_root.to_path_buf(),
            state: SinkState::Pending,
        }
    }

    #[cfg(test)]
    pub fn path(&self) -> Option<&Path> {
        match &self.state {
            SinkState::Open { path, .. } => Some(path),
            SinkState::Pending | SinkState::Closed => None,
        }
    }

    pub async fn write(&mut self, chunk: &[u8]) {
        if matches!(self.state, SinkState::Pending) {
            self.state = match open_session_log(&self.workspace_root).await {
                Ok((path, file)) => {
                    tracing::info!(path = %path.display(), "Logging server stderr to file");
                    SinkState::Open { path, file }
                }
                Err(e) => {
                    tracing::error!(
                        root = %self.workspace_root.display(),
                        "Failed to open server log file: {e}"
                    );
                    SinkState::Closed
                }
            };
        }

        let SinkState::Open { path, file } = &mut self.state else {
            return;
        };
        let result = match file.write_all(chunk).await {
            Ok(()) => file.flush().await,
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            tracing::error!(path = %path.display(), "Failed to write server log, closing it: {e}");
            self.state = SinkState::Closed;
        }
    }
}

/// Open a fresh log file. Never truncates or appends to an existing one.
async fn open_session_log(workspace_root: &Path) -> io::Result<(PathBuf, File)> {
    let stamp = chrono::Utc::now().timestamp_millis();
    let mut last_err = None;
    for attempt in 0..MAX_LOG_NAME_ATTEMPTS {
        let name = if attempt == 0 {
            format!("{LOG_FILE_PREFIX}{stamp}.log")
        } else {
            format!("{LOG_FILE_PREFIX}{stamp}-{attempt}.log")
        };
        let path = workspace_root.join(name);
        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
        {
            Ok(file) => return Ok((path, file)),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => last_err = Some(e),
            Err(e) => return Err(e),
        }
    }
    Err(last_err.unwrap_or_else(|| io::Error::other("no free log file name")))
}

/// Forwards stderr text to the editor output surface.
pub(crate) struct OutputSink {
    host: Arc<dyn EditorHost>,
    reveal: bool,
}

impl OutputSink {
    pub fn new(host: Arc<dyn EditorHost>, reveal_on: RevealOutputChannelOn) -> Self {
        Self {
            host,
            reveal: reveal_on.reveals(STDERR_SEVERITY),
        }
    }

    pub fn write(&self, chunk: &[u8]) {
        self.host.append_output(&String::from_utf8_lossy(chunk));
        if self.reveal {
            self.host.reveal_output(true);
        }
    }
}

/// Fans stderr chunks out to the enabled listeners. The two listeners are
/// independent: a dead log file does not affect the output surface.
pub(crate) struct OutputRouter {
    log_file: Option<LogFileSink>,
    output: Option<OutputSink>,
}

impl OutputRouter {
    pub fn new(config: &OutputConfig, workspace_root: &Path, host: Arc<dyn EditorHost>) -> Self {
        Self {
            log_file: config
                .log_to_file
                .then(|| LogFileSink::new(workspace_root)),
            output: config
                .show_stderr_in_output_channel
                .then(|| OutputSink::new(host, config.reveal_output_channel_on)),
        }
    }

    pub async fn route(&mut self, chunk: &[u8]) {
        if let Some(sink) = self.log_file.as_mut() {
            sink.write(chunk).await;
        }
        if let Some(sink) = self.output.as_ref() {
            sink.write(chunk);
        }
    }

    /// Read `stream` to EOF on a background task. Chunks are routed in the
    /// order they were produced.
    pub fn attach<R>(mut self, mut stream: R) -> tokio::task::JoinHandle<()>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        tokio::spawn(async move {
            let mut buf = vec![0u8; READ_CHUNK_BYTES];
            loop {
                match stream.read(&mut buf).await {
                    Ok(0) => break,
                    Ok(n) => self.route(&buf[..n]).await,
                    Err(e) => {
                        tracing::warn!("Reading server stderr failed: {e}");
                        break;
                    }
                }
            }
            tracing::debug!("Server stderr closed");
        })
    }
}
