//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`AgentdeckSettings::default()`]
//! 2. If the settings file exists, deep-merge user values over defaults
//! 3. Apply `AGENTDECK_*` environment overrides (highest priority)

use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::{Result, SettingsError};
use crate::types::{agentdeck_home, AgentdeckSettings};

/// Resolve the path to the settings file (`~/.agentdeck/settings.json`).
pub fn settings_path() -> PathBuf {
    agentdeck_home().join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<AgentdeckSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults; a file with invalid JSON is an error.
pub fn load_settings_from_path(path: &Path) -> Result<AgentdeckSettings> {
    let mut settings = merge_file(path)?;
    apply_env_overrides(&mut settings, |name| std::env::var(name).ok());
    settings.validate()?;
    Ok(settings)
}

fn merge_file(path: &Path) -> Result<AgentdeckSettings> {
    let mut merged = serde_json::to_value(AgentdeckSettings::default())?;

    if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path).map_err(|source| SettingsError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let user: Value = serde_json::from_str(&content).map_err(|source| SettingsError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        overlay(&mut merged, user);
    } else {
        debug!(?path, "settings file not found, using defaults");
    }

    Ok(serde_json::from_value(merged)?)
}

/// Lay `layer` over `base` in place. Objects merge key by key, `null` keeps
/// whatever `base` had, and any other value replaces it outright.
pub fn overlay(base: &mut Value, layer: Value) {
    match (base, layer) {
        (_, Value::Null) => {}
        (Value::Object(base_map), Value::Object(layer_map)) => {
            for (key, value) in layer_map {
                match base_map.get_mut(&key) {
                    Some(slot) => overlay(slot, value),
                    None if value.is_null() => {}
                    None => {
                        let _ = base_map.insert(key, value);
                    }
                }
            }
        }
        (base, layer) => *base = layer,
    }
}

/// Apply environment overrides read through `lookup`.
///
/// Values are range-checked; invalid ones are ignored with a warning so a bad
/// variable falls back to the file/default value instead of failing startup.
pub fn apply_env_overrides<F>(settings: &mut AgentdeckSettings, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let env = EnvReader { lookup };

    if let Some(v) = env.string("AGENTDECK_PYTHON") {
        settings.worker.program = v;
    }
    if let Some(v) = env.string("AGENTDECK_SCRIPT_DIR") {
        settings.worker.script_dir = v;
    }
    if let Some(v) = env.string("AGENTDECK_BROWSER_PATH") {
        settings.worker.browser_path = v;
    }
    if let Some(v) = env.number("AGENTDECK_DEBUGGING_PORT", 1..=65535) {
        settings.worker.debugging_port = v;
    }
    if let Some(v) = env.string("AGENTDECK_CONFIGS_DIR") {
        settings.storage.configs_dir = v;
    }
    if let Some(v) = env.number("AGENTDECK_LONG_TIMEOUT_MS", 100..=86_400_000) {
        settings.timeouts.long_request_ms = v;
    }
    if let Some(v) = env.number("AGENTDECK_SHORT_TIMEOUT_MS", 100..=3_600_000) {
        settings.timeouts.short_request_ms = v;
    }
    if let Some(v) = env.flag("AGENTDECK_FAIL_PENDING_ON_EXIT") {
        settings.bridge.fail_pending_on_exit = v;
    }
    if let Some(v) = env.string("AGENTDECK_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = env.flag("AGENTDECK_LOG_JSON") {
        settings.logging.json = v;
    }
}

const FLAG_ON: [&str; 4] = ["1", "true", "yes", "on"];
const FLAG_OFF: [&str; 4] = ["0", "false", "no", "off"];

/// Read an on/off switch such as `AGENTDECK_LOG_JSON=yes`. Case and
/// surrounding whitespace are ignored.
pub fn parse_flag(val: &str) -> Option<bool> {
    let val = val.trim();
    if FLAG_ON.iter().any(|on| on.eq_ignore_ascii_case(val)) {
        Some(true)
    } else if FLAG_OFF.iter().any(|off| off.eq_ignore_ascii_case(val)) {
        Some(false)
    } else {
        None
    }
}

/// Parse a number and accept it only inside `range`.
pub fn parse_in_range<T>(val: &str, range: RangeInclusive<T>) -> Option<T>
where
    T: FromStr + PartialOrd,
{
    val.trim().parse().ok().filter(|n| range.contains(n))
}

struct EnvReader<F> {
    lookup: F,
}

impl<F> EnvReader<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.is_empty())
    }

    fn flag(&self, name: &str) -> Option<bool> {
        let val = (self.lookup)(name)?;
        let parsed = parse_flag(&val);
        if parsed.is_none() {
            warn!(key = name, value = %val, "expected an on/off value, ignoring");
        }
        parsed
    }

    fn number<T>(&self, name: &str, range: RangeInclusive<T>) -> Option<T>
    where
        T: FromStr + PartialOrd + Clone + std::fmt::Debug,
    {
        let val = (self.lookup)(name)?;
        let parsed = parse_in_range(&val, range.clone());
        if parsed.is_none() {
            warn!(key = name, value = %val, ?range, "number missing or out of range, ignoring");
        }
        parsed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn overlay_changes_only_the_named_timeout() {
        let mut base = json!({"timeouts": {"long_request_ms": 600000, "short_request_ms": 10000}});
        overlay(&mut base, json!({"timeouts": {"short_request_ms": 2500}}));
        assert_eq!(
            base,
            json!({"timeouts": {"long_request_ms": 600000, "short_request_ms": 2500}})
        );
    }

    #[test]
    fn overlay_replaces_args_and_ignores_null() {
        let mut base = json!({"worker": {"extra_args": ["--electron"], "program": "python3"}});
        overlay(
            &mut base,
            json!({"worker": {"extra_args": [], "program": null, "script_dir": null}}),
        );
        assert_eq!(base, json!({"worker": {"extra_args": [], "program": "python3"}}));
    }

    #[test]
    fn missing_file_yields_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let settings = merge_file(&tmp.path().join("nope.json")).unwrap();
        assert_eq!(settings, AgentdeckSettings::default());
    }

    #[test]
    fn file_values_override_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"worker": {"program": "/usr/bin/python3.12", "env": {"A": "1"}}, "timeouts": {"long_request_ms": 120000}}"#,
        )
        .unwrap();
        let settings = merge_file(&path).unwrap();
        assert_eq!(settings.worker.program, "/usr/bin/python3.12");
        assert_eq!(settings.worker.env.get("A").map(String::as_str), Some("1"));
        assert_eq!(settings.worker.script, "api.py");
        assert_eq!(settings.timeouts.long_request_ms, 120_000);
        assert_eq!(settings.timeouts.short_request_ms, 10_000);
    }

    #[test]
    fn invalid_json_file_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("settings.json");
        std::fs::write(&path, "{oops").unwrap();
        let err = merge_file(&path).unwrap_err();
        assert!(matches!(err, SettingsError::Parse { path: p, .. } if p == path));
    }

    #[test]
    fn wrongly_typed_value_is_a_schema_error() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("settings.json");
        std::fs::write(&path, r#"{"timeouts": {"short_request_ms": "soon"}}"#).unwrap();
        assert!(matches!(merge_file(&path), Err(SettingsError::Schema(_))));
    }

    #[test]
    fn env_overrides_apply() {
        let mut settings = AgentdeckSettings::default();
        apply_env_overrides(
            &mut settings,
            lookup_from(&[
                ("AGENTDECK_PYTHON", "/opt/py/bin/python"),
                ("AGENTDECK_DEBUGGING_PORT", "9333"),
                ("AGENTDECK_SHORT_TIMEOUT_MS", "2500"),
                ("AGENTDECK_FAIL_PENDING_ON_EXIT", "off"),
                ("AGENTDECK_LOG_JSON", "yes"),
                ("AGENTDECK_CONFIGS_DIR", "/var/deck/configs"),
            ]),
        );
        assert_eq!(settings.worker.program, "/opt/py/bin/python");
        assert_eq!(settings.worker.debugging_port, 9333);
        assert_eq!(settings.timeouts.short_request_ms, 2500);
        assert!(!settings.bridge.fail_pending_on_exit);
        assert!(settings.logging.json);
        assert_eq!(settings.storage.configs_dir, "/var/deck/configs");
    }

    #[test]
    fn invalid_env_values_are_ignored() {
        let mut settings = AgentdeckSettings::default();
        apply_env_overrides(
            &mut settings,
            lookup_from(&[
                ("AGENTDECK_DEBUGGING_PORT", "0"),
                ("AGENTDECK_LONG_TIMEOUT_MS", "soon"),
                ("AGENTDECK_LOG_JSON", "maybe"),
                ("AGENTDECK_PYTHON", ""),
            ]),
        );
        assert_eq!(settings, AgentdeckSettings::default());
    }

    #[test]
    fn parse_helpers() {
        assert_eq!(parse_flag(" Yes "), Some(true));
        assert_eq!(parse_flag("OFF"), Some(false));
        assert_eq!(parse_flag("nah"), None);
        assert_eq!(parse_in_range::<u16>("9333", 1..=65535), Some(9333));
        assert_eq!(parse_in_range::<u16>("70000", 1..=65535), None);
        assert_eq!(parse_in_range::<u64>("50", 100..=3_600_000), None);
        assert_eq!(parse_in_range::<u64>("-1", 0..=10), None);
    }
}
