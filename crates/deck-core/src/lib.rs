//! Shared vocabulary for the agentdeck bridge: correlation ids, the
//! JSON-lines envelope protocol spoken with the worker process, bridge
//! events, and the error taxonomy.

pub mod agent;
pub mod envelope;
pub mod errors;
pub mod events;
pub mod ids;

pub use envelope::{classify_line, AgentResult, Diagnostic, DiagnosticLevel, InboundLine, OutboundEnvelope};
pub use errors::BridgeError;
pub use events::BridgeEvent;
pub use ids::RequestId;
