//! Error types for OAuth session operations

/// Errors from OAuth session operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("auth server returned {status}: {body}")]
    AuthServer { status: u16, body: String },

    #[error("network error: {0}")]
    Network(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("interactive authorization failed: {0}")]
    Interaction(String),

    #[error("login transaction error: {0}")]
    Login(String),
}

/// Result alias for auth operations.
pub type Result<T> = std::result::Result<T, Error>;
