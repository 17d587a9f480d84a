//! Editor commands forwarded to the server as single requests.
//!
//! A command handler returns as soon as the request is queued. The spawned
//! continuation awaits the response and turns any failure into one warning;
//! nothing escapes the handler.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::host::EditorHost;
use crate::protocol::{self, Selection};
use crate::session::RequestClient;

#[derive(Debug, thiserror::Error)]
#[error("unknown command: {0}")]
pub struct UnknownCommand(pub String);

/// Commands the host can invoke against the current selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditorCommand {
    Deglob,
}

impl EditorCommand {
    pub const ALL: [Self; 1] = [Self::Deglob];

    /// Identifier the host binds to.
    #[must_use]
    pub fn id(self) -> &'static str {
        match self {
            Self::Deglob => "warden.deglob",
        }
    }

    #[must_use]
    pub fn title(self) -> &'static str {
        match self {
            Self::Deglob => "Deglob",
        }
    }

    fn method(self) -> &'static str {
        match self {
            Self::Deglob => protocol::DEGLOB,
        }
    }

    #[must_use]
    pub fn from_id(id: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|cmd| cmd.id() == id)
    }
}

pub(crate) struct CommandBridge {
    host: Arc<dyn EditorHost>,
    timeout: Duration,
}

impl CommandBridge {
    pub fn new(host: Arc<dyn EditorHost>, timeout: Duration) -> Self {
        Self { host, timeout }
    }

    /// Run `command_id` against `selection`. `client` is `None` while no
    /// server is running, which is reported like any other failure.
    pub fn execute(
        &self,
        command_id: &str,
        selection: Selection,
        client: Option<RequestClient>,
    ) -> Result<JoinHandle<()>, UnknownCommand> {
        let command =
            EditorCommand::from_id(command_id).ok_or_else(|| UnknownCommand(command_id.to_string()))?;
        let host = self.host.clone();
        let timeout = self.timeout;

        Ok(tokio::spawn(async move {
            let Some(client) = client else {
                host.show_warning(&format!(
                    "{} failed: server is not running",
                    command.title()
                ));
                return;
            };

            let params = match serde_json::to_value(&selection) {
                Ok(params) => params,
                Err(e) => {
                    host.show_warning(&format!("{} failed: {e}", command.title()));
                    return;
                }
            };

            match client.request(command.method(), Some(params), timeout).await {
                Ok(_) => {
                    tracing::debug!(command = command.id(), uri = %selection.uri, "Command succeeded");
                }
                Err(e) => {
                    tracing::warn!(command = command.id(), "Command request failed: {e}");
                    host.show_warning(&format!("{} failed: {e}", command.title()));
                }
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::testing::RecordingHost;
    use crate::protocol::{Position, Range};
    use crate::session::testing::{closed_client, scripted_client};

    fn selection() -> Selection {
        Selection {
            uri: "file:///src/lib.rs".to_string(),
            range: Range {
                start: Position::new(0, 4),
                end: Position::new(0, 20),
            },
        }
    }

    #[test]
    fn ids_round_trip() {
        for cmd in EditorCommand::ALL {
            assert_eq!(EditorCommand::from_id(cmd.id()), Some(cmd));
        }
        assert_eq!(EditorCommand::from_id("warden.nope"), None);
    }

    #[tokio::test]
    async fn rejected_timeout_warns_once() {
        let host = Arc::new(RecordingHost::default());
        let bridge = CommandBridge::new(host.clone(), Duration::from_secs(5));
        let client = scripted_client(|_| {
            Some(serde_json::json!({
                "jsonrpc": "2.0",
                "error": { "code": -32603, "message": "timeout" }
            }))
        });

        bridge
            .execute("warden.deglob", selection(), Some(client))
            .unwrap()
            .await
            .unwrap();

        let warnings = host.warnings();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("timeout"), "{warnings:?}");
    }

    #[tokio::test]
    async fn unanswered_request_warns_with_timeout() {
        let host = Arc::new(RecordingHost::default());
        let bridge = CommandBridge::new(host.clone(), Duration::from_millis(20));
        let client = scripted_client(|_| None);

        bridge
            .execute("warden.deglob", selection(), Some(client))
            .unwrap()
            .await
            .unwrap();

        let warnings = host.warnings();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("timeout"));
    }

    #[tokio::test]
    async fn success_shows_nothing() {
        let host = Arc::new(RecordingHost::default());
        let bridge = CommandBridge::new(host.clone(), Duration::from_secs(5));
        let client = scripted_client(|method| {
            assert_eq!(method, protocol::DEGLOB);
            Some(serde_json::json!({ "jsonrpc": "2.0", "result": null }))
        });

        bridge
            .execute("warden.deglob", selection(), Some(client))
            .unwrap()
            .await
            .unwrap();

        assert!(host.calls().is_empty());
    }

    #[tokio::test]
    async fn no_server_warns() {
        let host = Arc::new(RecordingHost::default());
        let bridge = CommandBridge::new(host.clone(), Duration::from_secs(5));

        bridge
            .execute("warden.deglob", selection(), None)
            .unwrap()
            .await
            .unwrap();

        assert_eq!(
            host.warnings(),
            vec!["Deglob failed: server is not running".to_string()]
        );
    }

    #[tokio::test]
    async fn closed_connection_warns() {
        let host = Arc::new(RecordingHost::default());
        let bridge = CommandBridge::new(host.clone(), Duration::from_secs(5));

        bridge
            .execute("warden.deglob", selection(), Some(closed_client()))
            .unwrap()
            .await
            .unwrap();

        assert_eq!(host.warnings().len(), 1);
    }

    #[tokio::test]
    async fn unknown_command_is_rejected_synchronously() {
        let host = Arc::new(RecordingHost::default());
        let bridge = CommandBridge::new(host.clone(), Duration::from_secs(5));

        let err = bridge
            .execute("warden.reformat", selection(), None)
            .unwrap_err();
        assert_eq!(err.to_string(), "unknown command: warden.reformat");
        assert!(host.calls().is_empty());
    }
}
