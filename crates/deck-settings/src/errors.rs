//! Settings error types.

use std::path::PathBuf;

use thiserror::Error;

/// Why agentdeck could not produce usable settings.
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("cannot read settings file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The file exists but is not JSON.
    #[error("settings file {} is not valid JSON: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    /// Merged values did not fit the settings schema, e.g. a string where a
    /// timeout in milliseconds was expected.
    #[error("settings do not match the agentdeck schema: {0}")]
    Schema(#[from] serde_json::Error),

    #[error("{field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl SettingsError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, SettingsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_error_names_the_file() {
        let err = SettingsError::Read {
            path: PathBuf::from("/home/me/.agentdeck/settings.json"),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        };
        assert_eq!(
            err.to_string(),
            "cannot read settings file /home/me/.agentdeck/settings.json: denied"
        );
    }

    #[test]
    fn parse_error_names_the_file() {
        let source = serde_json::from_str::<serde_json::Value>("{timeouts").unwrap_err();
        let err = SettingsError::Parse {
            path: PathBuf::from("settings.json"),
            source,
        };
        assert!(err.to_string().starts_with("settings file settings.json is not valid JSON"));
    }

    #[test]
    fn invalid_value_names_the_field() {
        let err = SettingsError::invalid("timeouts.short_request_ms", "must be greater than zero");
        assert_eq!(err.to_string(), "timeouts.short_request_ms: must be greater than zero");
    }
}
