//! Running server session. Owns the child process and its stdio tasks.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::process::Child;
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::codec::{FrameReader, FrameWriter};
use crate::error::RequestError;
use crate::launcher::LaunchedServer;
use crate::protocol::{self, METHOD_NOT_FOUND, Notification, Request};
use crate::types::{LspEvent, ServerStopReason};

const INIT_TIMEOUT: Duration = Duration::from_secs(30);

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(2);

const WRITER_CHANNEL_CAPACITY: usize = 64;

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<serde_json::Value>>>>;

enum WriterCommand {
    Send(serde_json::Value),
    Shutdown,
}

enum IncomingFrame {
    Response {
        id: u64,
        body: serde_json::Value,
    },
    ServerRequest {
        id: serde_json::Value,
        method: String,
    },
    Notification {
        method: String,
    },
}

fn parse_incoming(frame: &serde_json::Value) -> Option<IncomingFrame> {
    let id = frame.get("id");
    let method = frame
        .get("method")
        .and_then(|m| m.as_str())
        .map(String::from);
    let is_response = frame.get("result").is_some() || frame.get("error").is_some();

    match (id, method, is_response) {
        (Some(id), None, true) => Some(IncomingFrame::Response {
            id: id.as_u64()?,
            body: frame.clone(),
        }),
        (Some(id), Some(method), _) => Some(IncomingFrame::ServerRequest {
            id: id.clone(),
            method,
        }),
        (None, Some(method), _) => Some(IncomingFrame::Notification { method }),
        _ => None,
    }
}

/// Cloneable handle for issuing requests to the running server.
#[derive(Clone)]
pub struct RequestClient {
    writer_tx: mpsc::Sender<WriterCommand>,
    pending: PendingMap,
    next_id: Arc<AtomicU64>,
}

impl RequestClient {
    fn new(writer_tx: mpsc::Sender<WriterCommand>, pending: PendingMap) -> Self {
        Self {
            writer_tx,
            pending,
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Send one request and wait for its response.
    ///
    /// The pending entry is removed on every failure path so repeated
    /// timeouts do not grow the map.
    pub async fn request(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
        timeout: Duration,
    ) -> Result<serde_json::Value, RequestError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let frame = serde_json::to_value(Request::new(id, method, params))?;

        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        if self
            .writer_tx
            .send(WriterCommand::Send(frame))
            .await
            .is_err()
        {
            self.pending.lock().await.remove(&id);
            return Err(RequestError::ChannelClosed);
        }

        let response = match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(response)) => response,
            Ok(Err(_)) => {
                self.pending.lock().await.remove(&id);
                return Err(RequestError::ChannelClosed);
            }
            Err(_) => {
                self.pending.lock().await.remove(&id);
                return Err(RequestError::Timeout(timeout));
            }
        };

        if let Some(error) = response.get("error") {
            return Err(RequestError::Rejected {
                code: error["code"].as_i64().unwrap_or_default(),
                message: error["message"]
                    .as_str()
                    .unwrap_or("unknown error")
                    .to_string(),
            });
        }
        Ok(response
            .get("result")
            .cloned()
            .unwrap_or(serde_json::Value::Null))
    }

    async fn notify(&self, method: &str, params: Option<serde_json::Value>) -> Result<()> {
        let frame = serde_json::to_value(Notification::new(method, params))
            .context("serializing notification")?;
        self.writer_tx
            .send(WriterCommand::Send(frame))
            .await
            .map_err(|_| anyhow::anyhow!("writer channel closed"))
    }
}

/// A server that completed the handshake. Holding one is proof of init.
pub(crate) struct RunningServer {
    child: Child,
    client: RequestClient,
    reader_handle: JoinHandle<()>,
    writer_handle: JoinHandle<()>,
    stderr_handle: Option<JoinHandle<()>>,
}

impl Drop for RunningServer {
    // A dropped server must not report a late ServerStopped into the next
    // session. The child itself is killed via `kill_on_drop`.
    fn drop(&mut self) {
        self.reader_handle.abort();
        self.writer_handle.abort();
        if let Some(handle) = &self.stderr_handle {
            handle.abort();
        }
    }
}

impl RunningServer {
    /// Wire the launched child's stdio and perform the `initialize` handshake.
    /// Emits [`LspEvent::Ready`] once the server answered `initialize`.
    pub async fn start(
        launched: LaunchedServer,
        workspace_root: &Path,
        event_tx: mpsc::Sender<LspEvent>,
    ) -> Result<Self> {
        let LaunchedServer {
            mut child,
            stderr_handle,
        } = launched;

        let stdout = child.stdout.take().context("no stdout from child")?;
        let stdin = child.stdin.take().context("no stdin from child")?;

        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));

        let (writer_tx, mut writer_rx) = mpsc::channel::<WriterCommand>(WRITER_CHANNEL_CAPACITY);
        let writer_handle = tokio::spawn(async move {
            let mut writer = FrameWriter::new(stdin);
            while let Some(cmd) = writer_rx.recv().await {
                match cmd {
                    WriterCommand::Send(frame) => {
                        if let Err(e) = writer.write_frame(&frame).await {
                            tracing::warn!("Server write error: {e:#}");
                            break;
                        }
                    }
                    WriterCommand::Shutdown => break,
                }
            }
        });

        let reader_pending = pending.clone();
        let reader_event_tx = event_tx.clone();
        let reader_writer_tx = writer_tx.clone();
        let reader_handle = tokio::spawn(async move {
            let mut reader = FrameReader::new(stdout);
            let reason = loop {
                match reader.read_frame().await {
                    Ok(Some(frame)) => {
                        Self::dispatch_frame(
                            &frame,
                            &reader_pending,
                            &reader_event_tx,
                            &reader_writer_tx,
                        )
                        .await;
                    }
                    Ok(None) => {
                        tracing::info!("Server closed stdout");
                        break ServerStopReason::Exited;
                    }
                    Err(e) => {
                        tracing::warn!("Server reader error: {e:#}");
                        break ServerStopReason::Failed(format!("{e:#}"));
                    }
                }
            };
            // Wake any request still waiting on this connection.
            reader_pending.lock().await.clear();
            let _ = reader_event_tx
                .send(LspEvent::ServerStopped { reason })
                .await;
        });

        let server = Self {
            child,
            client: RequestClient::new(writer_tx, pending),
            reader_handle,
            writer_handle,
            stderr_handle,
        };

        server.initialize(workspace_root, &event_tx).await?;

        Ok(server)
    }

    async fn dispatch_frame(
        frame: &serde_json::Value,
        pending: &Mutex<HashMap<u64, oneshot::Sender<serde_json::Value>>>,
        event_tx: &mpsc::Sender<LspEvent>,
        writer_tx: &mpsc::Sender<WriterCommand>,
    ) {
        let Some(incoming) = parse_incoming(frame) else {
            tracing::trace!("Ignoring malformed JSON-RPC frame");
            return;
        };

        match incoming {
            IncomingFrame::Response { id, body } => {
                if let Some(tx) = pending.lock().await.remove(&id) {
                    let _ = tx.send(body);
                }
            }
            IncomingFrame::ServerRequest { id, method } => {
                // Servers block on unanswered requests such as workspace/configuration.
                tracing::debug!("Server sent request {method}, replying method not found");
                let response = serde_json::json!({
                    "jsonrpc": "2.0",
                    "id": id,
                    "error": {
                        "code": METHOD_NOT_FOUND,
                        "message": format!("Method not found: {method}")
                    }
                });
                let _ = writer_tx.send(WriterCommand::Send(response)).await;
            }
            IncomingFrame::Notification { method } => {
                // Only activity notifications reach the supervisor; anything
                // else would fill the channel between host polls.
                if matches!(
                    method.as_str(),
                    protocol::DIAGNOSTICS_BEGIN | protocol::DIAGNOSTICS_END
                ) {
                    let _ = event_tx.send(LspEvent::Notification { method }).await;
                } else {
                    tracing::trace!("Dropping server notification: {method}");
                }
            }
        }
    }

    /// `Ready` is queued before `initialized` goes out, so every notification
    /// the server sends in response to `initialized` is ordered after it.
    async fn initialize(
        &self,
        workspace_root: &Path,
        event_tx: &mpsc::Sender<LspEvent>,
    ) -> Result<()> {
        let root_uri = protocol::path_to_file_uri(workspace_root)
            .context("converting workspace root to URI")?;
        self.client
            .request(
                "initialize",
                Some(protocol::initialize_params(root_uri.as_str())),
                INIT_TIMEOUT,
            )
            .await
            .context("initialize request failed")?;
        let _ = event_tx.send(LspEvent::Ready).await;
        self.client
            .notify("initialized", Some(serde_json::json!({})))
            .await
    }

    pub fn client(&self) -> RequestClient {
        self.client.clone()
    }

    /// Gracefully shut down the server. Consumes self.
    pub async fn shutdown(mut self) {
        if self
            .client
            .request("shutdown", None, SHUTDOWN_TIMEOUT)
            .await
            .is_ok()
        {
            let _ = self.client.notify("exit", None).await;
        }
        let _ = self.client.writer_tx.send(WriterCommand::Shutdown).await;

        if tokio::time::timeout(SHUTDOWN_TIMEOUT, self.child.wait())
            .await
            .is_err()
        {
            tracing::debug!("Server didn't exit in time, killing");
            let _ = self.child.kill().await;
        }
    }
}
