use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::{Map, Value};

use super::paths::AppPaths;
use super::settings::AppSettings;
use super::validation::{validate_config, validate_settings};
use crate::core::errors::ApiError;

const REDACT_PLACEHOLDER: &str = "****";

pub const ENV_ENDPOINT: &str = "AZ_OPENAI_ENDPOINT";
pub const ENV_API_KEY: &str = "AZ_OPENAI_API_KEY";
pub const ENV_PORT: &str = "PORT";

const SENSITIVE_PATTERNS: [&str; 10] = [
    "api_key",
    "secret",
    "password",
    "_token",
    "token_",
    "credential",
    "private_key",
    "access_key",
    "access_token",
    "bearer",
];

const SENSITIVE_WHITELIST: [&str; 3] = ["max_tokens", "token_count", "tokens"];

#[derive(Clone)]
pub struct ConfigService {
    paths: Arc<AppPaths>,
}

impl ConfigService {
    pub fn new(paths: Arc<AppPaths>) -> Self {
        Self { paths }
    }

    pub fn config_path(&self) -> PathBuf {
        if let Ok(path) = env::var("RAGCHAT_CONFIG_PATH") {
            return PathBuf::from(path);
        }

        let override_path = self.paths.config_override();
        if override_path.exists() {
            return override_path;
        }

        self.paths.public_config()
    }

    pub fn secrets_path(&self) -> PathBuf {
        self.paths.secrets_path.clone()
    }

    /// Public config deep-merged with the secrets file.
    pub fn load_config(&self) -> Value {
        let public_config = load_yaml_file(&self.config_path());
        let secrets_config = load_yaml_file(&self.secrets_path());
        deep_merge(&public_config, &secrets_config)
    }

    /// Loads, applies environment credentials, validates and types the config.
    ///
    /// Called once at startup; the result is shared for the process lifetime.
    pub fn load_settings(&self) -> Result<AppSettings, ApiError> {
        let mut config = self.load_config();
        apply_env_overrides(
            &mut config,
            env::var(ENV_ENDPOINT).ok(),
            env::var(ENV_API_KEY).ok(),
        );
        let mut settings = settings_from_value(config)?;
        if let Some(port) = env::var(ENV_PORT)
            .ok()
            .and_then(|v| v.trim().parse::<u16>().ok())
        {
            settings.server.port = port;
        }
        Ok(settings)
    }

    pub fn redact_sensitive_values(&self, value: &Value) -> Value {
        redact_sensitive_values(value)
    }
}

pub fn settings_from_value(config: Value) -> Result<AppSettings, ApiError> {
    validate_config(&config)?;
    let settings: AppSettings = serde_json::from_value(config)
        .map_err(|e| ApiError::BadRequest(format!("Invalid config: {}", e)))?;
    validate_settings(&settings)?;
    Ok(settings)
}

fn load_yaml_file(path: &Path) -> Value {
    if !path.exists() {
        return Value::Object(Map::new());
    }

    match fs::read_to_string(path) {
        Ok(contents) => match serde_yaml::from_str::<Value>(&contents) {
            Ok(value @ Value::Object(_)) => value,
            Ok(_) => Value::Object(Map::new()),
            Err(err) => {
                tracing::warn!("Ignoring unparsable config {}: {}", path.display(), err);
                Value::Object(Map::new())
            }
        },
        Err(_) => Value::Object(Map::new()),
    }
}

fn apply_env_overrides(config: &mut Value, endpoint: Option<String>, api_key: Option<String>) {
    let overrides = [("endpoint", endpoint), ("api_key", api_key)];
    for (key, value) in overrides {
        let Some(value) = value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty()) else {
            continue;
        };
        ensure_object_path(config, &["llm", key], Value::String(value));
    }
}

fn ensure_object_path(config: &mut Value, path: &[&str], value: Value) {
    if path.is_empty() {
        return;
    }
    if !config.is_object() {
        *config = Value::Object(Map::new());
    }

    let mut current = config;
    for (index, key) in path.iter().enumerate() {
        if index == path.len() - 1 {
            if let Some(map) = current.as_object_mut() {
                map.insert(key.to_string(), value);
            }
            return;
        }

        if !current.get(*key).map(|v| v.is_object()).unwrap_or(false) {
            let Some(map) = current.as_object_mut() else {
                return;
            };
            map.insert((*key).to_string(), Value::Object(Map::new()));
        }

        let Some(next) = current.get_mut(*key) else {
            return;
        };
        current = next;
    }
}

fn deep_merge(base: &Value, override_value: &Value) -> Value {
    match (base, override_value) {
        (Value::Object(base_map), Value::Object(override_map)) => {
            let mut merged: Map<String, Value> = base_map.clone();
            for (key, value) in override_map {
                let merged_value = match merged.get(key) {
                    Some(existing) => deep_merge(existing, value),
                    None => value.clone(),
                };
                merged.insert(key.clone(), merged_value);
            }
            Value::Object(merged)
        }
        _ => override_value.clone(),
    }
}

fn redact_sensitive_values(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut redacted = Map::new();
            for (key, val) in map {
                if is_sensitive_key(key) && !val.is_null() {
                    redacted.insert(key.clone(), Value::String(REDACT_PLACEHOLDER.to_string()));
                } else {
                    redacted.insert(key.clone(), redact_sensitive_values(val));
                }
            }
            Value::Object(redacted)
        }
        Value::Array(items) => Value::Array(items.iter().map(redact_sensitive_values).collect()),
        _ => value.clone(),
    }
}

fn is_sensitive_key(key: &str) -> bool {
    let key_lower = key.to_lowercase();
    if SENSITIVE_WHITELIST
        .iter()
        .any(|allowed| *allowed == key_lower)
    {
        return false;
    }
    SENSITIVE_PATTERNS
        .iter()
        .any(|pattern| key_lower.contains(pattern))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn deep_merge_merges_objects_and_overrides_scalars() {
        let base = json!({
            "llm": { "temperature": 0.3, "api_version": "v1" },
            "server": { "cors_allowed_origins": ["http://a"] }
        });
        let override_value = json!({
            "llm": { "api_key": "k" },
            "server": { "cors_allowed_origins": ["http://b"] }
        });

        let merged = deep_merge(&base, &override_value);

        assert_eq!(
            merged,
            json!({
                "llm": { "temperature": 0.3, "api_version": "v1", "api_key": "k" },
                "server": { "cors_allowed_origins": ["http://b"] }
            })
        );
    }

    #[test]
    fn env_overrides_fill_llm_section() {
        let mut config = json!({ "llm": { "endpoint": "https://file" } });
        apply_env_overrides(
            &mut config,
            Some("https://env.openai.azure.com".to_string()),
            Some("  secret  ".to_string()),
        );
        assert_eq!(config["llm"]["endpoint"], "https://env.openai.azure.com");
        assert_eq!(config["llm"]["api_key"], "secret");
    }

    #[test]
    fn blank_env_values_are_ignored() {
        let mut config = json!({});
        apply_env_overrides(&mut config, Some("   ".to_string()), None);
        assert_eq!(config, json!({}));
    }

    #[test]
    fn redact_sensitive_values_replaces_secrets_only() {
        let input = json!({
            "llm": {
                "api_key": "secret",
                "max_tokens": 42,
                "endpoint": "https://x"
            },
            "items": [
                { "password": "pw" }
            ]
        });

        let redacted = redact_sensitive_values(&input);

        assert_eq!(
            redacted,
            json!({
                "llm": {
                    "api_key": "****",
                    "max_tokens": 42,
                    "endpoint": "https://x"
                },
                "items": [
                    { "password": "****" }
                ]
            })
        );
    }

    #[test]
    fn load_config_merges_secrets_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let paths = AppPaths::with_dirs(dir.path().to_path_buf(), dir.path().to_path_buf());
        fs::write(
            dir.path().join("config.yml"),
            "llm:\n  temperature: 0.5\nrag:\n  top_k: 6\n",
        )
        .expect("write config");
        fs::write(dir.path().join("secrets.yaml"), "llm:\n  api_key: from-file\n")
            .expect("write secrets");

        let service = ConfigService::new(Arc::new(paths));
        let settings = settings_from_value(service.load_config()).expect("settings");

        assert!((settings.llm.temperature - 0.5).abs() < f64::EPSILON);
        assert_eq!(settings.llm.api_key.as_deref(), Some("from-file"));
        assert_eq!(settings.rag.top_k, 6);
    }

    #[test]
    fn unparsable_yaml_falls_back_to_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("broken.yml");
        fs::write(&path, "llm: [unclosed").expect("write");
        assert_eq!(load_yaml_file(&path), json!({}));
    }
}
