//! Settings loading: defaults → file deep-merge → env overrides.

use std::path::Path;

use serde_json::Value;
use tracing::debug;

use crate::errors::SettingsError;
use crate::types::WirebusSettings;

/// Deep-merge `overlay` into `base`.
///
/// Objects merge recursively; any other value in the overlay replaces
/// the base value wholesale.
pub fn deep_merge(base: &mut Value, overlay: &Value) {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, overlay_value) in overlay_map {
                match base_map.get_mut(key) {
                    Some(base_value) => deep_merge(base_value, overlay_value),
                    None => {
                        let _ = base_map.insert(key.clone(), overlay_value.clone());
                    }
                }
            }
        }
        (base_slot, _) => *base_slot = overlay.clone(),
    }
}

/// Load settings from a JSON file, merged over compiled defaults, with
/// `WIREBUS_*` env overrides applied last.
pub fn load_settings_from_path(path: &Path) -> Result<WirebusSettings, SettingsError> {
    let mut merged = serde_json::to_value(WirebusSettings::default())
        .map_err(|e| SettingsError::Serialize(e.to_string()))?;
    if path.exists() {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| SettingsError::Read(path.display().to_string(), e.to_string()))?;
        let file_value: Value = serde_json::from_str(&raw)
            .map_err(|e| SettingsError::Parse(path.display().to_string(), e.to_string()))?;
        deep_merge(&mut merged, &file_value);
        debug!(path = %path.display(), "settings file merged");
    }
    apply_env_overrides(&mut merged);
    serde_json::from_value(merged).map_err(|e| SettingsError::Invalid(e.to_string()))
}

/// Apply `WIREBUS_*` environment variable overrides.
///
/// Recognized variables map onto specific fields rather than a generic
/// path syntax, keeping deployment surfaces explicit.
fn apply_env_overrides(merged: &mut Value) {
    let overrides: [(&str, &[&str]); 6] = [
        ("WIREBUS_BIND_ADDR", &["server", "bindAddr"]),
        ("WIREBUS_TOPIC_PREFIX", &["topics", "prefix"]),
        ("WIREBUS_TOPIC_TTL_SECS", &["topics", "storeTtlSecs"]),
        ("WIREBUS_HEARTBEAT_SECS", &["heartbeat", "intervalSecs"]),
        ("WIREBUS_TOKEN_SECRET", &["token", "secret"]),
        ("WIREBUS_DEFAULT_QUEUE", &["queue", "defaultQueue"]),
    ];
    for (var, field_path) in overrides {
        let Ok(raw) = std::env::var(var) else {
            continue;
        };
        // Numeric fields take numbers, everything else stays a string.
        let value = raw
            .parse::<u64>()
            .map_or_else(|_| Value::String(raw.clone()), Value::from);
        let mut slot = &mut *merged;
        for segment in &field_path[..field_path.len() - 1] {
            slot = &mut slot[*segment];
        }
        slot[field_path[field_path.len() - 1]] = value;
        debug!(var, "settings env override applied");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;

    #[test]
    fn deep_merge_recurses_into_objects() {
        let mut base = json!({"a": {"x": 1, "y": 2}, "b": 3});
        deep_merge(&mut base, &json!({"a": {"y": 9}}));
        assert_eq!(base, json!({"a": {"x": 1, "y": 9}, "b": 3}));
    }

    #[test]
    fn deep_merge_replaces_scalars_and_arrays() {
        let mut base = json!({"list": [1, 2], "s": "old"});
        deep_merge(&mut base, &json!({"list": [3], "s": "new"}));
        assert_eq!(base, json!({"list": [3], "s": "new"}));
    }

    #[test]
    fn deep_merge_adds_missing_keys() {
        let mut base = json!({"a": 1});
        deep_merge(&mut base, &json!({"b": 2}));
        assert_eq!(base, json!({"a": 1, "b": 2}));
    }

    #[test]
    fn missing_file_yields_defaults() {
        let settings = load_settings_from_path(Path::new("/nonexistent/wirebus.json")).unwrap();
        assert_eq!(settings, WirebusSettings::default());
    }

    #[test]
    fn file_overrides_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"topics": {{"prefix": "demo"}}}}"#).unwrap();
        let settings = load_settings_from_path(file.path()).unwrap();
        assert_eq!(settings.topics.prefix, "demo");
        assert_eq!(settings.topics.store_ttl_secs, 36_000);
    }

    #[test]
    fn malformed_file_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{ nope").unwrap();
        assert!(load_settings_from_path(file.path()).is_err());
    }
}
