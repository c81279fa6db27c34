use std::time::Duration;

/// Failures surfaced to callers of the bridge.
///
/// A reply that looks like JSON but fails to parse is not an error here: it
/// is downgraded to a diagnostic line by [`crate::envelope::classify_line`].
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum BridgeError {
    #[error("Worker process not running")]
    NotRunning,

    #[error("worker process already running (pid {pid:?})")]
    AlreadyRunning { pid: Option<u32> },

    #[error("Request timed out after {timeout:?} (id {id})")]
    RequestTimeout { id: String, timeout: Duration },

    #[error("Worker process exited with code {}", exit_code_text(.code))]
    WorkerExited { code: Option<i32> },

    #[error("request id already pending: {0}")]
    DuplicateRequestId(String),

    #[error("failed to spawn worker: {0}")]
    Spawn(String),

    #[error("worker io error: {0}")]
    Io(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    /// The bridge was torn down and no longer routes worker output.
    #[error("bridge has been torn down")]
    Closed,
}

impl BridgeError {
    /// Short classification string for logging.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::NotRunning => "not_running",
            Self::AlreadyRunning { .. } => "already_running",
            Self::RequestTimeout { .. } => "request_timeout",
            Self::WorkerExited { .. } => "worker_exited",
            Self::DuplicateRequestId(_) => "duplicate_request_id",
            Self::Spawn(_) => "spawn_failed",
            Self::Io(_) => "io",
            Self::Serialization(_) => "serialization",
            Self::Closed => "closed",
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::RequestTimeout { .. })
    }
}

/// Exit codes print bare; a signal death has no code and prints `null`.
fn exit_code_text(code: &Option<i32>) -> String {
    match code {
        Some(code) => code.to_string(),
        None => "null".into(),
    }
}

impl From<serde_json::Error> for BridgeError {
    fn from(e: serde_json::Error) -> Self {
        BridgeError::Serialization(e.to_string())
    }
}

impl From<std::io::Error> for BridgeError {
    fn from(e: std::io::Error) -> Self {
        BridgeError::Io(e.to_string())
    }
}
