use thiserror::Error;

/// Unified error type for proxybench
#[derive(Error, Debug)]
pub enum BenchError {
    // Proxy errors
    #[error("Invalid proxy address: {0}")]
    InvalidProxyAddress(String),

    #[error("Proxy has no address for protocol {protocol}")]
    MissingAddress { protocol: String },

    #[error("Unsupported proxy protocol: {0}")]
    UnsupportedProtocol(String),

    // Transport errors
    #[error("Transport unavailable: {0}")]
    TransportUnavailable(String),

    #[error("Invalid transport arguments: {0}")]
    InvalidTransportArgs(String),

    #[error("TLS error: {0}")]
    Tls(#[from] rustls::Error),

    #[error("Invalid TLS server name: {0}")]
    InvalidServerName(String),

    // Fetch errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Unexpected response status {status}")]
    UnexpectedStatus { status: u16 },

    #[error("Operation timed out")]
    Timeout,

    // Configuration errors
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for proxybench operations
pub type Result<T> = std::result::Result<T, BenchError>;

impl BenchError {
    /// Whether the failure happened before any bytes reached the remote proxy
    pub fn is_setup_error(&self) -> bool {
        matches!(
            self,
            BenchError::InvalidProxyAddress(_)
                | BenchError::MissingAddress { .. }
                | BenchError::UnsupportedProtocol(_)
                | BenchError::TransportUnavailable(_)
                | BenchError::InvalidTransportArgs(_)
                | BenchError::InvalidServerName(_)
                | BenchError::InvalidConfig(_)
        )
    }
}

// Convert from URL parse errors
impl From<url::ParseError> for BenchError {
    fn from(err: url::ParseError) -> Self {
        BenchError::InvalidConfig(err.to_string())
    }
}

impl From<tokio::time::error::Elapsed> for BenchError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        BenchError::Timeout
    }
}
