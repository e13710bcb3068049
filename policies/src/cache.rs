use chrono::{DateTime, Utc};
use gpo_entry::Gpo;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::debug;

use crate::error::PolicyError;
use crate::resolver::ResolvedRuleSet;
use crate::target::validate_name;

/// Subdirectory of the cache root holding one file per target.
pub const GPO_RULES_CACHE_DIR: &str = "gpo_rules";

/// Last successfully applied state of a target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// What was handed to the backends, after entitlement filtering.
    pub rules: ResolvedRuleSet,
    /// The GPO list the rules were resolved from, unfiltered.
    #[serde(default)]
    pub gpos: Vec<Gpo>,
}

impl CacheEntry {
    pub fn empty(target: &str, is_machine: bool) -> Self {
        Self {
            rules: ResolvedRuleSet::empty(target, is_machine),
            gpos: Vec::new(),
        }
    }
}

/// Per-target persisted rule sets with atomic replacement.
#[derive(Debug, Clone)]
pub struct RuleCache {
    dir: PathBuf,
}

impl RuleCache {
    pub fn new(cache_root: impl AsRef<Path>) -> Self {
        Self {
            dir: cache_root.as_ref().join(GPO_RULES_CACHE_DIR),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path(&self, target: &str) -> Result<PathBuf, PolicyError> {
        validate_name(target)?;
        Ok(self.dir.join(target))
    }

    /// Previously stored state. An empty file is a valid, empty state.
    pub fn load(&self, target: &str) -> Result<CacheEntry, PolicyError> {
        let path = self.path(target)?;
        let content = match fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(PolicyError::CacheMiss {
                    target: target.to_string(),
                })
            }
            Err(e) => return Err(PolicyError::io(&path, e)),
        };

        if content.trim().is_empty() {
            debug!("Cache for {} is empty", target);
            return Ok(CacheEntry::empty(target, false));
        }

        serde_yaml::from_str(&content).map_err(|e| PolicyError::Serialization {
            what: format!("rule cache {}", path.display()),
            message: e.to_string(),
        })
    }

    /// Replaces the stored state through a temporary file and a rename, so
    /// readers never see a partial write.
    pub fn store(&self, target: &str, entry: &CacheEntry) -> Result<(), PolicyError> {
        let path = self.path(target)?;
        let content = serde_yaml::to_string(entry).map_err(|e| PolicyError::Serialization {
            what: format!("rule cache for {}", target),
            message: e.to_string(),
        })?;

        fs::create_dir_all(&self.dir).map_err(|e| PolicyError::io(&self.dir, e))?;

        let mut temp_file =
            NamedTempFile::new_in(&self.dir).map_err(|e| PolicyError::io(&self.dir, e))?;
        temp_file
            .write_all(content.as_bytes())
            .map_err(|e| PolicyError::io(temp_file.path(), e))?;
        temp_file
            .flush()
            .map_err(|e| PolicyError::io(temp_file.path(), e))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            temp_file
                .as_file()
                .set_permissions(fs::Permissions::from_mode(0o600))
                .map_err(|e| PolicyError::io(temp_file.path(), e))?;
        }

        temp_file
            .persist(&path)
            .map_err(|e| PolicyError::io(&path, e.error))?;

        debug!("Rule cache saved to {}", path.display());
        Ok(())
    }

    pub fn last_modified(&self, target: &str) -> Result<DateTime<Utc>, PolicyError> {
        let path = self.path(target)?;
        let metadata = match fs::metadata(&path) {
            Ok(m) => m,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(PolicyError::NotFound {
                    target: target.to_string(),
                })
            }
            Err(e) => return Err(PolicyError::io(&path, e)),
        };
        let modified = metadata.modified().map_err(|e| PolicyError::io(&path, e))?;
        Ok(DateTime::<Utc>::from(modified))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::resolve;
    use gpo_entry::{Domain, Entry};
    use tempfile::TempDir;

    fn one_gpo() -> Vec<Gpo> {
        vec![Gpo::new("{one}", "one_gpo")
            .with_rules(Domain::Dconf, vec![Entry::new("org/gnome/a/b", "1").with_meta("i")])
            .unwrap()]
    }

    #[test]
    fn missing_target_is_a_cache_miss() {
        let dir = TempDir::new().unwrap();
        let cache = RuleCache::new(dir.path());
        assert!(matches!(cache.load("user"), Err(PolicyError::CacheMiss { .. })));
        assert!(matches!(cache.last_modified("user"), Err(PolicyError::NotFound { .. })));
    }

    #[test]
    fn stored_entry_loads_back() {
        let dir = TempDir::new().unwrap();
        let cache = RuleCache::new(dir.path());
        let gpos = one_gpo();
        let entry = CacheEntry {
            rules: resolve("user", false, &gpos),
            gpos,
        };

        cache.store("user", &entry).unwrap();

        assert_eq!(cache.load("user").unwrap(), entry);
        assert!(cache.last_modified("user").is_ok());
        assert!(dir.path().join(GPO_RULES_CACHE_DIR).join("user").is_file());
    }

    #[test]
    fn store_leaves_no_temporary_files() {
        let dir = TempDir::new().unwrap();
        let cache = RuleCache::new(dir.path());
        cache.store("user", &CacheEntry::empty("user", false)).unwrap();
        cache.store("user", &CacheEntry::empty("user", false)).unwrap();

        let names: Vec<_> = fs::read_dir(cache.dir())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(names, vec!["user".to_string()]);
    }

    #[test]
    fn empty_file_is_an_empty_state() {
        let dir = TempDir::new().unwrap();
        let cache = RuleCache::new(dir.path());
        fs::create_dir_all(cache.dir()).unwrap();
        fs::write(cache.dir().join("host1"), "").unwrap();

        let entry = cache.load("host1").unwrap();
        assert!(entry.rules.is_empty());
        assert!(entry.gpos.is_empty());
    }

    #[test]
    fn corrupted_file_is_a_serialization_error() {
        let dir = TempDir::new().unwrap();
        let cache = RuleCache::new(dir.path());
        fs::create_dir_all(cache.dir()).unwrap();
        fs::write(cache.dir().join("user"), "rules: [not, a, rule, set").unwrap();

        assert!(matches!(cache.load("user"), Err(PolicyError::Serialization { .. })));
    }

    #[test]
    fn target_names_cannot_escape_the_cache() {
        let dir = TempDir::new().unwrap();
        let cache = RuleCache::new(dir.path());
        assert!(matches!(cache.load("../etc"), Err(PolicyError::InvalidTarget { .. })));
    }
}
