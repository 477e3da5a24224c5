use thiserror::Error;

/// Error types for ARI transport operations
#[derive(Error, Debug)]
pub enum AriError {
    /// HTTP-level failure talking to the ARI REST endpoint
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The REST endpoint answered with a non-success status
    #[error("ARI request failed with status {status}: {body}")]
    Api { status: u16, body: String },

    /// WebSocket transport failure on the event stream
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Initial connection to the ARI event stream failed
    #[error("ARI connect failed: {0}")]
    Connect(String),

    /// An event payload could not be decoded
    #[error("Event decode error: {0}")]
    Decode(#[from] serde_json::Error),
}

impl AriError {
    pub fn connect<S: Into<String>>(msg: S) -> Self {
        Self::Connect(msg.into())
    }

    /// Whether this error is Asterisk telling us the resource is already gone.
    ///
    /// Stop/hangup commands race with the far end tearing resources down;
    /// callers use this to swallow the benign case.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::Api { status: 404, .. } => true,
            Self::Api { body, .. } => body.to_ascii_lowercase().contains("not found"),
            _ => false,
        }
    }
}

/// Result type for ARI transport operations
pub type Result<T> = std::result::Result<T, AriError>;
