//! Envelope protocol spoken with the worker process.
//!
//! Outbound: one JSON object per line, `{ action, data?, id? }`.
//! Inbound: every stdout line is either a structured message (a JSON object or
//! array) or free-form diagnostic text. The JSON check is a permissive
//! trim-and-brackets heuristic, not real framing: a line only gets a parse
//! attempt when it starts with `{`/`[` and ends with the matching bracket, and
//! a failed parse degrades to a diagnostic line instead of an error.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::RequestId;

/// Substrings that mark a non-JSON line as a diagnostic error.
pub const ERROR_INDICATORS: &[&str] = &["Error", "Exception", "Traceback"];

/// Keys that make a `result` object a terminal agent result.
pub const RESULT_KEYS: &[&str] = &[
    "final_result",
    "model_actions",
    "model_thoughts",
    "errors",
    "trace_file",
    "history_file",
];

/// Request or command sent to the worker.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OutboundEnvelope {
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<RequestId>,
}

impl OutboundEnvelope {
    /// Envelope that expects a correlated reply.
    pub fn request(action: impl Into<String>, data: Option<Value>, id: RequestId) -> Self {
        Self {
            action: action.into(),
            data,
            id: Some(id),
        }
    }

    /// Fire-and-forget envelope (no id, no reply tracked).
    pub fn command(action: impl Into<String>, data: Option<Value>) -> Self {
        Self {
            action: action.into(),
            data,
            id: None,
        }
    }

    /// Serialize to a single line (no trailing newline).
    pub fn to_line(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Terminal result reported by the agent. Every field is optional because
/// the worker fills in only what the run produced.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentResult {
    #[serde(default)]
    pub final_result: Option<Value>,
    #[serde(default)]
    pub model_actions: Option<Value>,
    #[serde(default)]
    pub model_thoughts: Option<Value>,
    #[serde(default)]
    pub errors: Option<Value>,
    #[serde(default)]
    pub trace_file: Option<String>,
    #[serde(default)]
    pub history_file: Option<String>,
}

impl AgentResult {
    /// Extract a result announcement from a `result` value, if it is one.
    pub fn from_result_value(result: &Value) -> Option<Self> {
        let obj = result.as_object()?;
        if !RESULT_KEYS.iter().any(|k| obj.contains_key(*k)) {
            return None;
        }
        Some(Self {
            final_result: obj.get("final_result").cloned(),
            model_actions: obj.get("model_actions").cloned(),
            model_thoughts: obj.get("model_thoughts").cloned(),
            errors: obj.get("errors").cloned(),
            trace_file: obj.get("trace_file").and_then(Value::as_str).map(String::from),
            history_file: obj.get("history_file").and_then(Value::as_str).map(String::from),
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticLevel {
    Info,
    Error,
}

/// Free-form text from the worker (logs, progress, tracebacks).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub level: DiagnosticLevel,
    pub text: String,
    /// The line looked like JSON but failed to parse.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub malformed: bool,
}

impl Diagnostic {
    /// Classify plain text by the error-indicator substrings.
    pub fn from_text(text: impl Into<String>) -> Self {
        let text = text.into();
        let level = if ERROR_INDICATORS.iter().any(|needle| text.contains(needle)) {
            DiagnosticLevel::Error
        } else {
            DiagnosticLevel::Info
        };
        Self {
            level,
            text,
            malformed: false,
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self {
            level: DiagnosticLevel::Error,
            text: text.into(),
            malformed: false,
        }
    }

    pub fn is_error(&self) -> bool {
        self.level == DiagnosticLevel::Error
    }
}

/// One classified line of worker output.
#[derive(Clone, Debug, PartialEq)]
pub enum InboundLine {
    /// `status: "ready"` liveness announcement. Never resolves a request.
    Ready { message: Value },
    /// Terminal agent result, broadcast whether or not it carries an id.
    Result {
        id: Option<String>,
        result: AgentResult,
        message: Value,
    },
    /// Structured message carrying a non-empty id.
    Reply { id: String, message: Value },
    /// Structured message with no usable id.
    Notice { message: Value },
    Diagnostic(Diagnostic),
}

impl InboundLine {
    /// Correlation id this line may resolve, if any.
    pub fn correlation_id(&self) -> Option<&str> {
        match self {
            Self::Reply { id, .. } => Some(id),
            Self::Result { id: Some(id), .. } => Some(id),
            _ => None,
        }
    }
}

/// Trim-and-brackets check deciding whether a line gets a JSON parse attempt.
pub fn looks_like_json(line: &str) -> bool {
    let trimmed = line.trim();
    (trimmed.starts_with('{') && trimmed.ends_with('}'))
        || (trimmed.starts_with('[') && trimmed.ends_with(']'))
}

/// Classify one raw line of worker stdout.
pub fn classify_line(line: &str) -> InboundLine {
    if !looks_like_json(line) {
        return InboundLine::Diagnostic(Diagnostic::from_text(line));
    }

    let message: Value = match serde_json::from_str(line.trim()) {
        Ok(v) => v,
        Err(_) => {
            let mut diag = Diagnostic::from_text(line);
            diag.malformed = true;
            return InboundLine::Diagnostic(diag);
        }
    };

    classify_message(message)
}

/// Classify an already-parsed structured message.
pub fn classify_message(message: Value) -> InboundLine {
    let Some(obj) = message.as_object() else {
        return InboundLine::Notice { message };
    };

    if obj.get("status").and_then(Value::as_str) == Some("ready") {
        return InboundLine::Ready { message };
    }

    let id = obj.get("id").and_then(id_string);

    if let Some(result) = obj.get("result").and_then(AgentResult::from_result_value) {
        return InboundLine::Result { id, result, message };
    }

    match id {
        Some(id) => InboundLine::Reply { id, message },
        None => InboundLine::Notice { message },
    }
}

/// The `result` field of a reply, or `null` when absent.
pub fn reply_result(message: &Value) -> Value {
    message.get("result").cloned().unwrap_or(Value::Null)
}

/// Ids are strings on the wire; numeric ids are accepted and stringified.
fn id_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
