use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProxyError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Resolving or connecting to the upstream failed.
    #[error("Connect error: {0}")]
    Connect(#[source] std::io::Error),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ProxyError {
    /// The upstream was never reached. Failures after the connect succeeded
    /// are plain `Io` errors.
    pub fn is_connect_failure(&self) -> bool {
        matches!(self, ProxyError::Connect(_) | ProxyError::Connection(_))
    }

    /// Upstream failures that happen constantly on a busy desktop and are not
    /// worth a diagnostic line.
    pub fn is_benign_connect_failure(&self) -> bool {
        match self {
            ProxyError::Connect(e) => matches!(
                e.kind(),
                std::io::ErrorKind::ConnectionRefused | std::io::ErrorKind::TimedOut
            ),
            _ => false,
        }
    }
}
