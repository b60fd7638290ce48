// Connection handle used to reach a registered server

use serde_json::Value;
use tokio_util::sync::CancellationToken;

/// Failure reported by a server connection
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConnectionError {
    /// The server processed the call and reported an error.
    #[error("server error ({code}): {message}")]
    Remote {
        code: i64,
        message: String,
        data: Option<Value>,
    },

    /// The call never produced a server answer (network, connection refused, bad frame).
    #[error("transport failure: {0}")]
    Transport(String),
}

impl ConnectionError {
    pub fn remote(code: i64, message: impl Into<String>) -> Self {
        Self::Remote {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}

/// Outbound handle to a server.
///
/// Implementations must be cheap to share; the router clones the handle out of the
/// registry and calls it with no internal locks held. `cancel` fires when the client
/// gives up on the request; honouring it is best-effort.
#[async_trait::async_trait]
pub trait ServerConnection: Send + Sync {
    /// Invoke a capability with already-validated params
    async fn invoke(
        &self,
        capability: &str,
        params: Value,
        cancel: CancellationToken,
    ) -> Result<Value, ConnectionError>;

    /// Human-readable description of where the server lives (URL, "in-process", ...)
    fn describe(&self) -> String {
        "unknown".to_string()
    }
}
