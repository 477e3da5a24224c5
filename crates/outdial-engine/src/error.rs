use thiserror::Error;

/// Error types for dialer engine operations
///
/// Call-scoped failures (a single origination, a hangup that raced the far
/// end, one summary upsert) are logged where they happen and never surface
/// through this type; `DialerError` covers the failures that abort a run or
/// a control-surface request.
#[derive(Error, Debug)]
pub enum DialerError {
    /// Missing or invalid environment configuration. Fatal at startup.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// ARI transport failure
    #[error("ARI error: {0}")]
    Ari(#[from] outdial_ari::AriError),

    /// Persistence failure
    #[error("Database error: {0}")]
    Database(String),

    /// Orchestration-level failure that doesn't fit a narrower category
    #[error("Orchestration error: {0}")]
    Orchestration(String),

    /// Filesystem failure around the recording pipeline
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<anyhow::Error> for DialerError {
    fn from(err: anyhow::Error) -> Self {
        // The database layer reports through anyhow; everything else that
        // bubbles up unplanned lands here too.
        Self::Database(err.to_string())
    }
}

impl DialerError {
    pub fn configuration<S: Into<String>>(msg: S) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn orchestration<S: Into<String>>(msg: S) -> Self {
        Self::Orchestration(msg.into())
    }
}

/// Result type for dialer engine operations
pub type Result<T> = std::result::Result<T, DialerError>;
