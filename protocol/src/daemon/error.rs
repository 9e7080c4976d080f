use thiserror::Error;

/// Failures talking to the chain daemon. The indexer never retries; a failed
/// call aborts the current sync pass.
#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("daemon returned error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("malformed daemon response: {0}")]
    MalformedResponse(String),
}

impl From<serde_json::Error> for DaemonError {
    fn from(e: serde_json::Error) -> Self {
        DaemonError::MalformedResponse(e.to_string())
    }
}
