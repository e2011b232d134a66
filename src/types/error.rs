//! Error types for Wayguard

/// Main error type for tracking and duress operations
#[derive(Debug, thiserror::Error)]
pub enum WayguardError {
    #[error("Location permission denied")]
    PermissionDenied,

    #[error("Position unavailable: {0}")]
    PositionUnavailable(String),

    #[error("Connect error: {0}")]
    Connect(String),

    #[error("Transport not connected")]
    NotConnected,

    #[error("Transport closed")]
    TransportClosed,

    #[error("WebSocket error: {0}")]
    WebSocket(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Emergency report failed: {0}")]
    Emergency(String),

    #[error("Request rejected: {0}")]
    Rejected(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Credential error: {0}")]
    Credential(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl WayguardError {
    /// Whether retrying the same operation later may succeed
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::PositionUnavailable(_)
                | Self::Connect(_)
                | Self::NotConnected
                | Self::WebSocket(_)
                | Self::Http(_)
                | Self::Emergency(_)
        )
    }
}

impl From<std::io::Error> for WayguardError {
    fn from(err: std::io::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for WayguardError {
    fn from(err: serde_json::Error) -> Self {
        Self::Internal(format!("JSON error: {}", err))
    }
}

impl From<reqwest::Error> for WayguardError {
    fn from(err: reqwest::Error) -> Self {
        Self::Http(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for WayguardError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::WebSocket(err.to_string())
    }
}

/// Result type alias for Wayguard operations
pub type Result<T> = std::result::Result<T, WayguardError>;
