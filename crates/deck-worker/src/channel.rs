use deck_core::BridgeError;

/// Outbound side of the worker as seen by the correlation layer.
///
/// [`crate::WorkerProcess`] is the real implementation; tests substitute an
/// in-memory channel to script replies without spawning anything.
pub trait WorkerChannel: Send + Sync {
    fn is_running(&self) -> bool;

    /// Write one line (no trailing newline) to the worker's input.
    fn send_line(&self, line: &str) -> Result<(), BridgeError>;
}
