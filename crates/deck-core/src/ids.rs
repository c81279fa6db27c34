use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Correlation id linking a request envelope to its reply.
///
/// Generated ids are `req_<uuid v7>`, so they sort by creation time and never
/// collide between concurrently pending requests. Caller-supplied ids are kept
/// verbatim.
#[derive(Clone, Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(String);

impl RequestId {
    pub fn new() -> Self {
        Self(format!("req_{}", Uuid::now_v7()))
    }

    pub fn from_raw(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Use the caller's id when it is a non-empty string, otherwise generate one.
    pub fn from_value_or_new(value: Option<&serde_json::Value>) -> Self {
        match value.and_then(serde_json::Value::as_str) {
            Some(s) if !s.trim().is_empty() => Self::from_raw(s),
            _ => Self::new(),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for RequestId {
    type Err = std::convert::Infallible;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.to_owned()))
    }
}

impl AsRef<str> for RequestId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn generated_id_has_prefix() {
        let id = RequestId::new();
        assert!(id.as_str().starts_with("req_"), "got: {id}");
    }

    #[test]
    fn ids_are_unique() {
        let a = RequestId::new();
        let b = RequestId::new();
        assert_ne!(a, b);
    }

    #[test]
    fn monotonic_ordering() {
        let ids: Vec<RequestId> = (0..100).map(|_| RequestId::new()).collect();
        for w in ids.windows(2) {
            assert!(w[0] < w[1], "not monotonic: {} >= {}", w[0], w[1]);
        }
    }

    #[test]
    fn caller_id_is_kept() {
        let value = json!("1712345678901");
        let id = RequestId::from_value_or_new(Some(&value));
        assert_eq!(id.as_str(), "1712345678901");
    }

    #[test]
    fn blank_or_non_string_caller_id_is_replaced() {
        let blank = json!("  ");
        assert!(RequestId::from_value_or_new(Some(&blank)).as_str().starts_with("req_"));
        let number = json!(42);
        assert!(RequestId::from_value_or_new(Some(&number)).as_str().starts_with("req_"));
        assert!(RequestId::from_value_or_new(None).as_str().starts_with("req_"));
    }

    #[test]
    fn serializes_as_plain_string() {
        let id = RequestId::from_raw("abc");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"abc\"");
    }
}
