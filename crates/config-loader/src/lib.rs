//! Schema-validated configuration loading.
//!
//! A configuration document is assembled in layers: defaults declared in the
//! JSON schema, then the configuration file (YAML or JSON), then environment
//! overrides for top-level string properties. The merged document is
//! validated against the schema before being deserialized into the caller's
//! type.

use jsonschema::{Draft, JSONSchema};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::env;
use std::fs;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, instrument};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file not found: {path}")]
    ConfigFileNotFound { path: String },

    #[error("Schema compilation failed: {message}")]
    SchemaCompilationFailed { message: String },

    #[error("Config validation failed: {}", summarize(.errors))]
    ValidationFailed { errors: Vec<ValidationError> },

    #[error("Config parsing failed: {message}")]
    ParsingFailed { message: String },

    #[error("IO error: {message}")]
    IoError { message: String },
}

#[derive(Debug, Clone)]
pub struct ValidationError {
    pub json_pointer: String,
    pub message: String,
    pub schema_path: String,
}

fn summarize(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| format!("{} ({})", e.message, e.json_pointer))
        .collect::<Vec<_>>()
        .join("; ")
}

pub struct ConfigManager {
    schema: Value,
    env_prefix: Option<String>,
}

impl ConfigManager {
    pub fn new(schema: Value) -> Self {
        Self {
            schema,
            env_prefix: None,
        }
    }

    /// Enables `<PREFIX>_<PROPERTY>` environment overrides for string properties.
    pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = Some(prefix.into());
        self
    }

    pub fn schema(&self) -> &Value {
        &self.schema
    }

    /// Loads, validates and deserializes the configuration.
    ///
    /// Without a path only schema defaults and environment overrides apply.
    /// An explicit path that does not exist is an error.
    #[instrument(skip(self))]
    pub fn load<T: DeserializeOwned>(&self, path: Option<&Path>) -> Result<T, ConfigError> {
        let config_value = self.load_value(path)?;
        serde_json::from_value(config_value).map_err(|e| ConfigError::ParsingFailed {
            message: e.to_string(),
        })
    }

    #[instrument(skip(self))]
    pub fn load_value(&self, path: Option<&Path>) -> Result<Value, ConfigError> {
        let mut config = self.defaults();

        if let Some(path) = path {
            let file_value = self.load_config_file(path)?;
            merge_top_level(&mut config, file_value)?;
        }

        self.apply_env_overrides(&mut config);
        self.validate_config_value(&config)?;

        debug!("Loaded config: {}", config);
        Ok(config)
    }

    /// Defaults declared by the schema's top-level properties.
    pub fn defaults(&self) -> Value {
        let mut default_config = Map::new();

        if let Some(properties) = self.schema.get("properties").and_then(|p| p.as_object()) {
            for (key, property) in properties {
                if let Some(default_value) = property.get("default") {
                    default_config.insert(key.clone(), default_value.clone());
                }
            }
        }

        Value::Object(default_config)
    }

    pub fn validate_config_value(&self, config: &Value) -> Result<(), ConfigError> {
        let schema = self.compiled_schema()?;
        let validation_result = schema.validate(config);

        if let Err(errors) = validation_result {
            let validation_errors: Vec<ValidationError> = errors
                .map(|error| ValidationError {
                    json_pointer: error.instance_path.to_string(),
                    message: error.to_string(),
                    schema_path: error.schema_path.to_string(),
                })
                .collect();

            return Err(ConfigError::ValidationFailed {
                errors: validation_errors,
            });
        }

        Ok(())
    }

    fn load_config_file(&self, config_path: &Path) -> Result<Value, ConfigError> {
        debug!("Loading config from: {:?}", config_path);

        if !config_path.exists() {
            return Err(ConfigError::ConfigFileNotFound {
                path: config_path.to_string_lossy().to_string(),
            });
        }

        let content = fs::read_to_string(config_path).map_err(|e| ConfigError::IoError {
            message: format!("Failed to read config file: {}", e),
        })?;

        if content.trim().is_empty() {
            return Ok(Value::Object(Map::new()));
        }

        // YAML is a superset of JSON, one parser covers both formats.
        serde_yaml::from_str(&content).map_err(|e| ConfigError::ParsingFailed {
            message: e.to_string(),
        })
    }

    fn apply_env_overrides(&self, config: &mut Value) {
        let Some(prefix) = &self.env_prefix else {
            return;
        };
        let Some(properties) = self.schema.get("properties").and_then(|p| p.as_object()) else {
            return;
        };
        let Some(obj) = config.as_object_mut() else {
            return;
        };

        for (key, property) in properties {
            if !accepts_string(property) {
                continue;
            }
            let env_var_name = format!("{}_{}", prefix, key.to_uppercase());
            if let Ok(value) = env::var(&env_var_name) {
                debug!("Overriding config {} from environment variable {}", key, env_var_name);
                obj.insert(key.clone(), Value::String(value));
            }
        }
    }

    fn compiled_schema(&self) -> Result<JSONSchema, ConfigError> {
        JSONSchema::options()
            .with_draft(Draft::Draft7)
            .compile(&self.schema)
            .map_err(|e| ConfigError::SchemaCompilationFailed {
                message: e.to_string(),
            })
    }
}

fn accepts_string(property: &Value) -> bool {
    match property.get("type") {
        Some(Value::String(t)) => t == "string",
        Some(Value::Array(types)) => types.iter().any(|t| t == "string"),
        _ => false,
    }
}

fn merge_top_level(base: &mut Value, overlay: Value) -> Result<(), ConfigError> {
    let Value::Object(overlay) = overlay else {
        return Err(ConfigError::ParsingFailed {
            message: "top-level configuration must be a mapping".to_string(),
        });
    };
    if let Some(base) = base.as_object_mut() {
        for (key, value) in overlay {
            base.insert(key, value);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;
    use std::fs;
    use tempfile::TempDir;

    #[derive(Deserialize, Debug, PartialEq)]
    struct RootsConfig {
        cache_dir: String,
        dconf_dir: String,
        hostname: Option<String>,
    }

    fn schema() -> Value {
        json!({
            "$schema": "http://json-schema.org/draft-07/schema#",
            "type": "object",
            "properties": {
                "cache_dir": { "type": "string", "default": "/var/cache/test" },
                "dconf_dir": { "type": "string", "default": "/etc/dconf" },
                "hostname": { "type": ["string", "null"] },
                "retries": { "type": "integer", "minimum": 0 }
            },
            "additionalProperties": false
        })
    }

    #[test]
    fn test_missing_path_uses_schema_defaults() {
        let manager = ConfigManager::new(schema());
        let config: RootsConfig = manager.load(None).unwrap();
        assert_eq!(config.cache_dir, "/var/cache/test");
        assert_eq!(config.dconf_dir, "/etc/dconf");
        assert_eq!(config.hostname, None);
    }

    #[test]
    fn test_file_overrides_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(&path, "cache_dir: /tmp/cache\nhostname: host1\n").unwrap();

        let config: RootsConfig = ConfigManager::new(schema()).load(Some(&path)).unwrap();
        assert_eq!(config.cache_dir, "/tmp/cache");
        assert_eq!(config.dconf_dir, "/etc/dconf");
        assert_eq!(config.hostname.as_deref(), Some("host1"));
    }

    #[test]
    fn test_json_file_is_accepted() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{ "dconf_dir": "/opt/dconf" }"#).unwrap();

        let config: RootsConfig = ConfigManager::new(schema()).load(Some(&path)).unwrap();
        assert_eq!(config.dconf_dir, "/opt/dconf");
    }

    #[test]
    fn test_invalid_value_fails_validation() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(&path, "retries: -1\n").unwrap();

        let result: Result<RootsConfig, ConfigError> = ConfigManager::new(schema()).load(Some(&path));
        assert!(matches!(result, Err(ConfigError::ValidationFailed { .. })));
    }

    #[test]
    fn test_unknown_property_fails_validation() {
        let manager = ConfigManager::new(schema());
        let result = manager.validate_config_value(&json!({ "sudoers": "/etc" }));
        assert!(matches!(result, Err(ConfigError::ValidationFailed { errors }) if !errors.is_empty()));
    }

    #[test]
    fn test_explicit_missing_file_fails() {
        let dir = TempDir::new().unwrap();
        let result: Result<RootsConfig, ConfigError> =
            ConfigManager::new(schema()).load(Some(&dir.path().join("missing.yaml")));
        assert!(matches!(result, Err(ConfigError::ConfigFileNotFound { .. })));
    }

    #[test]
    fn test_non_mapping_document_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(&path, "- a\n- b\n").unwrap();

        let result = ConfigManager::new(schema()).load_value(Some(&path));
        assert!(matches!(result, Err(ConfigError::ParsingFailed { .. })));
    }
}
