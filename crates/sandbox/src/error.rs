//! Sandbox-crate error kinds (§7), lowest to highest.

#[derive(thiserror::Error, Debug, Clone)]
pub enum SandboxError {
    /// The remote filesystem hiccuped on a concurrent access. Retried
    /// internally (§4.B); should never escape the Controller.
    #[error("transient filesystem error: {0}")]
    TransientFs(String),

    /// The response file hasn't appeared yet. Retried until `MAX_RUNTIME`;
    /// on exhaustion becomes `ExecutionTimeout`.
    #[error("response not yet present")]
    ResponseMissing,

    /// Retry budget for a submit was exhausted.
    #[error("execution timed out after {0:?}")]
    ExecutionTimeout(std::time::Duration),

    /// The process is not running (never reattached, or was torn down).
    #[error("sandbox process unavailable: {0}")]
    ExecutionUnavailable(String),

    /// Constructing the process itself failed (fatal for the current turn).
    #[error("sandbox construction failed: {0}")]
    Construction(String),

    #[error("IO: {0}")]
    Io(String),

    #[error("JSON: {0}")]
    Json(String),
}

pub type Result<T> = std::result::Result<T, SandboxError>;

impl From<std::io::Error> for SandboxError {
    fn from(e: std::io::Error) -> Self {
        SandboxError::Io(e.to_string())
    }
}

impl From<serde_json::Error> for SandboxError {
    fn from(e: serde_json::Error) -> Self {
        SandboxError::Json(e.to_string())
    }
}
