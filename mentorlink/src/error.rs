//! Error types for the mentorlink connection layer.

use thiserror::Error;

/// Result type for mentorlink operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Connection layer errors.
#[derive(Debug, Error)]
pub enum Error {
    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Invalid URL.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// No credential was available when a connection was about to open.
    #[error("No credential available; re-authenticate")]
    MissingCredential,

    /// The server closed the channel with an authorization close code.
    #[error("Access revoked by server (code {code}): {reason}")]
    AccessRevoked { code: u16, reason: String },

    /// Not connected, or the channel has not been acknowledged yet.
    #[error("Not connected to server")]
    NotConnected,

    /// The inbound frame had no usable `type` field.
    #[error("Frame has no type field")]
    MissingFrameType,

    /// The inbound frame had a known type but an unexpected shape.
    #[error("Invalid `{kind}` frame: {source}")]
    InvalidFrame {
        kind: String,
        #[source]
        source: serde_json::Error,
    },

    /// An injected dispatcher rejected an event.
    #[error("Handler error: {0}")]
    Handler(String),

    /// The connection driver task has stopped.
    #[error("Connection driver stopped")]
    DriverStopped,
}

impl Error {
    /// Create a handler error from a message.
    pub fn handler(message: impl Into<String>) -> Self {
        Self::Handler(message.into())
    }

    /// Whether this error ends automatic reconnection.
    ///
    /// Fatal errors require the user to reconnect manually or re-authenticate.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::MissingCredential | Self::AccessRevoked { .. } | Self::InvalidUrl(_)
        )
    }
}
