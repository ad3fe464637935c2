//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`IntercomSettings::default()`]
//! 2. If the settings file exists, deep-merge its values over the defaults
//! 3. Apply `INTERCOM_*` environment overrides (highest priority)
//! 4. Validate the result

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::{Result, SettingsError};
use crate::types::{intercom_home, IntercomSettings};

/// Default settings file (`~/.intercom/settings.json`).
pub fn settings_path() -> PathBuf {
    intercom_home().join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<IntercomSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults; invalid JSON is an error.
pub fn load_settings_from_path(path: &Path) -> Result<IntercomSettings> {
    let defaults = serde_json::to_value(IntercomSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: IntercomSettings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings);
    validate(&mut settings)?;
    Ok(settings)
}

/// Recursive deep merge of two JSON values.
///
/// - Objects are merged recursively (source overrides target per-key)
/// - Arrays and primitives are replaced entirely by source
/// - Null values in source are skipped (preserving target)
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = if let Some(target_val) = target_map.remove(&key) {
                    deep_merge(target_val, source_val)
                } else {
                    source_val
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply environment variable overrides. Invalid values are ignored with a warning.
pub fn apply_env_overrides(settings: &mut IntercomSettings) {
    if let Some(v) = read_env_string("INTERCOM_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = read_env_u64("INTERCOM_PORT", 0, 65_535) {
        settings.server.port = v as u16;
    }
    if let Some(v) = read_env_string("INTERCOM_DB_PATH") {
        settings.database.path = PathBuf::from(v);
    }
    if let Some(v) = read_env_string("INTERCOM_ENDPOINT") {
        settings.transport.endpoint_base_url = v;
    }
    if let Some(v) = read_env_u64("INTERCOM_CONNECT_TIMEOUT_MS", 100, 600_000) {
        settings.transport.connect_timeout_ms = v;
    }
    if let Some(v) = read_env_u64("INTERCOM_SEND_TIMEOUT_MS", 10, 600_000) {
        settings.transport.send_timeout_ms = v;
    }
    if let Some(v) = read_env_u64("INTERCOM_FRAME_MS", 5, 1_000) {
        settings.audio.frame_ms = v as u32;
    }
    if let Some(v) = read_env_string("INTERCOM_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = read_env_bool("INTERCOM_LOG_JSON") {
        settings.logging.json = v;
    }
}

fn validate(settings: &mut IntercomSettings) -> Result<()> {
    if settings.audio.frame_ms == 0 {
        return Err(SettingsError::InvalidValue("audio.frameMs must be positive".into()));
    }
    if settings.transport.outbound_queue == 0 {
        return Err(SettingsError::InvalidValue(
            "transport.outboundQueue must be positive".into(),
        ));
    }
    if settings.transport.reconnect_attempts > 1 {
        tracing::warn!(
            requested = settings.transport.reconnect_attempts,
            "transport.reconnectAttempts capped at 1"
        );
        settings.transport.reconnect_attempts = 1;
    }
    Ok(())
}

/// Parse a string as a boolean.
///
/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

fn read_env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn read_env_bool(name: &str) -> Option<bool> {
    let val = std::env::var(name).ok()?;
    let result = parse_bool(&val);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid boolean env var, ignoring");
    }
    result
}

fn read_env_u64(name: &str, min: u64, max: u64) -> Option<u64> {
    let val = std::env::var(name).ok()?;
    let result = parse_u64_range(&val, min, max);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid integer env var, ignoring");
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_nested_override() {
        let target = serde_json::json!({"server": {"port": 8080, "host": "localhost"}});
        let source = serde_json::json!({"server": {"port": 9090}});
        let merged = deep_merge(target, source);
        assert_eq!(merged["server"]["port"], 9090);
        assert_eq!(merged["server"]["host"], "localhost");
    }

    #[test]
    fn merge_null_preserves_target() {
        let target = serde_json::json!({"a": 1, "b": 2});
        let source = serde_json::json!({"a": null});
        let merged = deep_merge(target, source);
        assert_eq!(merged["a"], 1);
    }

    #[test]
    fn merge_array_replace() {
        let target = serde_json::json!({"items": [1, 2, 3]});
        let source = serde_json::json!({"items": [4]});
        assert_eq!(deep_merge(target, source)["items"], serde_json::json!([4]));
    }

    #[test]
    fn load_missing_file_returns_defaults() {
        let settings = load_settings_from_path(Path::new("/nonexistent/settings.json")).unwrap();
        assert_eq!(settings.audio.fetch_timeout_ms, 10_000);
    }

    #[test]
    fn load_partial_file_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"transport": {"endpointBaseUrl": "ws://pa.local/bcast", "outboundQueue": 8}}"#,
        )
        .unwrap();

        let settings = load_settings_from_path(&path).unwrap();
        assert_eq!(settings.transport.endpoint_base_url, "ws://pa.local/bcast");
        assert_eq!(settings.transport.outbound_queue, 8);
        assert_eq!(settings.transport.close_timeout_ms, 2_000);
    }

    #[test]
    fn load_invalid_json_returns_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "not valid json").unwrap();
        assert!(matches!(
            load_settings_from_path(&path),
            Err(SettingsError::Json(_))
        ));
    }

    #[test]
    fn zero_frame_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"audio": {"frameMs": 0}}"#).unwrap();
        assert!(matches!(
            load_settings_from_path(&path),
            Err(SettingsError::InvalidValue(_))
        ));
    }

    #[test]
    fn reconnect_attempts_are_capped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"transport": {"reconnectAttempts": 5}}"#).unwrap();
        let settings = load_settings_from_path(&path).unwrap();
        assert_eq!(settings.transport.reconnect_attempts, 1);
    }

    #[test]
    fn parse_helpers() {
        assert_eq!(parse_bool("YES"), Some(true));
        assert_eq!(parse_bool("off"), Some(false));
        assert_eq!(parse_bool("maybe"), None);
        assert_eq!(parse_u64_range("20", 5, 1000), Some(20));
        assert_eq!(parse_u64_range("2", 5, 1000), None);
        assert_eq!(parse_u64_range("x", 5, 1000), None);
    }
}
