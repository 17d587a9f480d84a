//! Failure kinds surfaced by the launcher and the request path.

use std::path::PathBuf;
use std::time::Duration;

/// Why a launch attempt did not produce a running server.
#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    #[error("{program} not found")]
    BinaryNotFound { program: String },
    #[error("build in {} failed: {detail}", root.display())]
    BuildFailed { root: PathBuf, detail: String },
    #[error("toolchain resolution failed: {0}")]
    ToolchainResolutionFailed(String),
    #[error("server process error: {0}")]
    SpawnedButErrored(#[source] std::io::Error),
}

impl LaunchError {
    /// Only an unexpected process error is fatal; every other kind degrades
    /// to a status message and a non-running session.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::SpawnedButErrored(_))
    }

    /// Classify a spawn error for `program`.
    pub(crate) fn from_spawn(program: impl Into<String>, err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::NotFound {
            Self::BinaryNotFound {
                program: program.into(),
            }
        } else {
            Self::SpawnedButErrored(err)
        }
    }
}

/// Why a single request to the server produced no result.
#[derive(Debug, thiserror::Error)]
pub enum RequestError {
    #[error("request timeout after {}ms", .0.as_millis())]
    Timeout(Duration),
    #[error("{message} (code {code})")]
    Rejected { code: i64, message: String },
    #[error("server connection closed")]
    ChannelClosed,
    #[error("serializing request: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_process_errors_are_fatal() {
        assert!(
            !LaunchError::BinaryNotFound {
                program: "srv".into()
            }
            .is_fatal()
        );
        assert!(
            !LaunchError::BuildFailed {
                root: PathBuf::from("/src"),
                detail: "error[E0425]".into()
            }
            .is_fatal()
        );
        assert!(!LaunchError::ToolchainResolutionFailed("no rustup".into()).is_fatal());
        assert!(
            LaunchError::SpawnedButErrored(std::io::Error::other("boom")).is_fatal()
        );
    }

    #[test]
    fn spawn_not_found_degrades() {
        let err = LaunchError::from_spawn(
            "/nonexistent",
            std::io::Error::from(std::io::ErrorKind::NotFound),
        );
        assert!(matches!(err, LaunchError::BinaryNotFound { .. }));
        assert_eq!(err.to_string(), "/nonexistent not found");
    }

    #[test]
    fn spawn_permission_denied_is_fatal() {
        let err = LaunchError::from_spawn(
            "/etc/passwd",
            std::io::Error::from(std::io::ErrorKind::PermissionDenied),
        );
        assert!(err.is_fatal());
    }

    #[test]
    fn timeout_message_mentions_timeout() {
        let err = RequestError::Timeout(Duration::from_millis(250));
        assert_eq!(err.to_string(), "request timeout after 250ms");
    }
}
