use config_loader::ConfigManager;
use gpo_entry::Domain;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::PolicyError;

pub const ENV_PREFIX: &str = "GPOLICY";

/// How machine-scoped entries interact with a user-scoped resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrossScope {
    /// Machine and user resolutions never interact.
    None,
    /// Machine entries take precedence over user entries of the same key.
    MachineOverUser,
    /// Machine entries only fill keys the user resolution leaves unset.
    UserOverMachine,
}

impl CrossScope {
    pub fn default_for(domain: Domain) -> Self {
        match domain {
            Domain::Dconf => CrossScope::MachineOverUser,
            Domain::Privilege | Domain::PolicyKit => CrossScope::None,
        }
    }
}

/// Backend used to turn dconf keyfiles into a binary database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompilerKind {
    /// `dconf compile`, as on a real system.
    #[default]
    Dconf,
    /// In-process flattened database, for hosts without dconf.
    Builtin,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManagerConfig {
    pub cache_dir: PathBuf,
    pub dconf_dir: PathBuf,
    pub sudoers_dir: PathBuf,
    pub policykit_dir: PathBuf,
    #[serde(default)]
    pub hostname: Option<String>,
    #[serde(default)]
    pub status_file: Option<PathBuf>,
    #[serde(default)]
    pub dconf_compiler: CompilerKind,
    #[serde(default)]
    pub cross_scope: BTreeMap<Domain, CrossScope>,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            cache_dir: PathBuf::from("/var/cache/gpolicy"),
            dconf_dir: PathBuf::from("/etc/dconf"),
            sudoers_dir: PathBuf::from("/etc/sudoers.d"),
            policykit_dir: PathBuf::from("/etc/polkit-1"),
            hostname: None,
            status_file: None,
            dconf_compiler: CompilerKind::Dconf,
            cross_scope: BTreeMap::new(),
        }
    }
}

impl ManagerConfig {
    /// Loads the configuration file (if any), applies `GPOLICY_*` overrides
    /// and validates the result.
    pub fn load(path: Option<&Path>) -> Result<Self, PolicyError> {
        let manager = ConfigManager::new(schema()).with_env_prefix(ENV_PREFIX);
        Ok(manager.load(path)?)
    }

    /// Every backend root under one directory, mirroring the system layout.
    pub fn rooted_at(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        Self {
            cache_dir: root.join("var/cache/gpolicy"),
            dconf_dir: root.join("etc/dconf"),
            sudoers_dir: root.join("etc/sudoers.d"),
            policykit_dir: root.join("etc/polkit-1"),
            ..Self::default()
        }
    }

    pub fn with_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = dir.into();
        self
    }

    pub fn with_dconf_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dconf_dir = dir.into();
        self
    }

    pub fn with_sudoers_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.sudoers_dir = dir.into();
        self
    }

    pub fn with_policykit_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.policykit_dir = dir.into();
        self
    }

    pub fn with_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = Some(hostname.into());
        self
    }

    pub fn with_status_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.status_file = Some(path.into());
        self
    }

    pub fn with_dconf_compiler(mut self, kind: CompilerKind) -> Self {
        self.dconf_compiler = kind;
        self
    }

    pub fn with_cross_scope(mut self, domain: Domain, scope: CrossScope) -> Self {
        self.cross_scope.insert(domain, scope);
        self
    }

    pub fn cross_scope(&self, domain: Domain) -> CrossScope {
        self.cross_scope
            .get(&domain)
            .copied()
            .unwrap_or_else(|| CrossScope::default_for(domain))
    }

    /// The configured hostname, or the system one.
    pub fn resolve_hostname(&self) -> Result<String, PolicyError> {
        if let Some(h) = &self.hostname {
            return Ok(h.clone());
        }
        hostname::get()
            .map_err(|e| PolicyError::Hostname {
                message: e.to_string(),
            })?
            .into_string()
            .map_err(|raw| PolicyError::Hostname {
                message: format!("hostname is not valid UTF-8: {:?}", raw),
            })
    }
}

/// JSON schema of the configuration document, defaults included.
pub fn schema() -> Value {
    let scope = json!({ "type": "string", "enum": ["none", "machine_over_user", "user_over_machine"] });
    json!({
        "$schema": "http://json-schema.org/draft-07/schema#",
        "title": "Policy manager configuration",
        "type": "object",
        "properties": {
            "cache_dir": { "type": "string", "minLength": 1, "default": "/var/cache/gpolicy" },
            "dconf_dir": { "type": "string", "minLength": 1, "default": "/etc/dconf" },
            "sudoers_dir": { "type": "string", "minLength": 1, "default": "/etc/sudoers.d" },
            "policykit_dir": { "type": "string", "minLength": 1, "default": "/etc/polkit-1" },
            "hostname": { "type": ["string", "null"] },
            "status_file": { "type": ["string", "null"] },
            "dconf_compiler": { "type": "string", "enum": ["dconf", "builtin"], "default": "dconf" },
            "cross_scope": {
                "type": "object",
                "properties": {
                    "dconf": scope,
                    "privilege": scope,
                    "policykit": scope
                },
                "additionalProperties": false
            }
        },
        "additionalProperties": false
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cross_scope_defaults_per_domain() {
        let cfg = ManagerConfig::default();
        assert_eq!(cfg.cross_scope(Domain::Dconf), CrossScope::MachineOverUser);
        assert_eq!(cfg.cross_scope(Domain::Privilege), CrossScope::None);
        assert_eq!(cfg.cross_scope(Domain::PolicyKit), CrossScope::None);

        let cfg = cfg.with_cross_scope(Domain::Dconf, CrossScope::None);
        assert_eq!(cfg.cross_scope(Domain::Dconf), CrossScope::None);
    }

    #[test]
    fn rooted_config_mirrors_system_layout() {
        let cfg = ManagerConfig::rooted_at("/tmp/root");
        assert_eq!(cfg.sudoers_dir, PathBuf::from("/tmp/root/etc/sudoers.d"));
        assert_eq!(cfg.cache_dir, PathBuf::from("/tmp/root/var/cache/gpolicy"));
    }

    #[test]
    fn configured_hostname_wins() {
        let cfg = ManagerConfig::default().with_hostname("host1");
        assert_eq!(cfg.resolve_hostname().unwrap(), "host1");
    }
}
