use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, AgentError>;

#[derive(Error, Debug)]
pub enum AgentError {
    #[error("fatal startup error: {0}")]
    Startup(String),

    #[error("vault missing: {0}")]
    VaultMissing(String),

    #[error("vault corrupt: {0}")]
    VaultCorrupt(String),

    #[error("encryption key I/O error: {0}")]
    KeyIo(#[source] std::io::Error),

    #[error("credentials not configured")]
    CredentialsNotFound,

    #[error("invalid screen identity: {0}")]
    InvalidIdentity(String),

    #[error("authentication failed: invalid screen id or passkey")]
    AuthInvalid,

    #[error("screen not known to the server")]
    ScreenUnknown,

    #[error("server returned status {status}: {body}")]
    Server { status: u16, body: String },

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] serde_json::Error),

    #[error("local media file not found: {0}")]
    LocalMissing(PathBuf),

    #[error("media download failed for ad {ad_id}: {reason}")]
    Download { ad_id: String, reason: String },

    #[error("no renderer registered for ad type '{0}'")]
    NoRenderer(String),

    #[error("no viewer executable found on PATH for '{0}' content")]
    ViewerUnavailable(String),

    #[error("renderer error: {0}")]
    Render(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl AgentError {
    /// Transport-layer failures are the only retryable kind; HTTP statuses
    /// outside the accept set are returned on the first response.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AgentError::Transport(_))
    }
}
