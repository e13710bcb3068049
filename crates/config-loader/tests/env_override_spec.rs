use config_loader::{ConfigError, ConfigManager};
use serde::Deserialize;
use serde_json::json;
use serial_test::serial;
use std::fs;
use tempfile::TempDir;

#[derive(Deserialize, Debug, PartialEq)]
struct Roots {
    cache_dir: String,
    sudoers_dir: String,
    compiler: String,
}

fn manager() -> ConfigManager {
    ConfigManager::new(json!({
        "$schema": "http://json-schema.org/draft-07/schema#",
        "type": "object",
        "properties": {
            "cache_dir": { "type": "string", "default": "/var/cache/gpolicy" },
            "sudoers_dir": { "type": "string", "default": "/etc/sudoers.d" },
            "compiler": { "type": "string", "enum": ["builtin", "dconf"], "default": "dconf" }
        },
        "additionalProperties": false
    }))
    .with_env_prefix("CFGTEST")
}

#[test]
#[serial]
fn given_env_override_when_load_then_env_wins_over_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("gpolicy.yaml");
    fs::write(&path, "cache_dir: /from/file\nsudoers_dir: /from/file/sudoers\n").unwrap();

    std::env::set_var("CFGTEST_CACHE_DIR", "/from/env");
    let roots: Roots = manager().load(Some(&path)).unwrap();
    std::env::remove_var("CFGTEST_CACHE_DIR");

    assert_eq!(
        roots,
        Roots {
            cache_dir: "/from/env".into(),
            sudoers_dir: "/from/file/sudoers".into(),
            compiler: "dconf".into(),
        }
    );
}

#[test]
#[serial]
fn given_env_override_violating_schema_when_load_then_validation_fails() {
    std::env::set_var("CFGTEST_COMPILER", "gcc");
    let result: Result<Roots, ConfigError> = manager().load(None);
    std::env::remove_var("CFGTEST_COMPILER");

    match result {
        Err(ConfigError::ValidationFailed { errors }) => {
            assert_eq!(errors.len(), 1);
            assert_eq!(errors[0].json_pointer, "/compiler");
        }
        other => panic!("expected validation failure, got {:?}", other),
    }
}

#[test]
#[serial]
fn given_no_prefix_when_load_then_env_is_ignored() {
    std::env::set_var("CFGTEST_CACHE_DIR", "/from/env");
    let manager = ConfigManager::new(manager().schema().clone());
    let roots: Roots = manager.load(None).unwrap();
    std::env::remove_var("CFGTEST_CACHE_DIR");

    assert_eq!(roots.cache_dir, "/var/cache/gpolicy");
}
