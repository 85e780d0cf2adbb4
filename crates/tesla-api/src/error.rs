//! Error types for vendor API operations

/// Errors from vendor API calls.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("API returned {status}: {body}")]
    Api { status: u16, body: String },

    #[error("network error: {0}")]
    Network(String),

    #[error("vehicle discovery failed: {0}")]
    Discovery(String),

    #[error("invalid parameter: {0}")]
    InvalidParam(String),
}

/// Result alias for API operations.
pub type Result<T> = std::result::Result<T, Error>;
