use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::envelope::{AgentResult, Diagnostic};

/// Events broadcast to passive listeners (log panes, progress views).
///
/// Nothing here ever resolves a pending request; replies that matched a
/// request are delivered to their caller instead of being broadcast.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum BridgeEvent {
    #[serde(rename = "worker_started")]
    WorkerStarted { pid: Option<u32> },

    /// The worker answered the init handshake.
    #[serde(rename = "ready")]
    Ready { message: Value },

    /// Structured message that matched no pending request.
    #[serde(rename = "message")]
    Message { message: Value },

    #[serde(rename = "agent_result")]
    AgentResult {
        id: Option<String>,
        result: AgentResult,
    },

    #[serde(rename = "diagnostic")]
    Diagnostic(Diagnostic),

    #[serde(rename = "worker_exited")]
    WorkerExited { code: Option<i32> },
}

impl BridgeEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::WorkerStarted { .. } => "worker_started",
            Self::Ready { .. } => "ready",
            Self::Message { .. } => "message",
            Self::AgentResult { .. } => "agent_result",
            Self::Diagnostic(_) => "diagnostic",
            Self::WorkerExited { .. } => "worker_exited",
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Diagnostic(d) if d.is_error())
    }
}
