use gpo_entry::{Domain, Entry};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::PathBuf;
use tracing::{debug, info};

use super::{remove_file_if_exists, write_atomic, Applier};
use crate::diff::DomainChanges;
use crate::error::PolicyError;
use crate::target::Target;

static ACTION_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_-]+(?:\.[A-Za-z0-9_-]+)+$").expect("action id pattern must compile"));

/// Authorization results understood by polkit, keyed by policy value.
const RESULTS: [(&str, &str); 6] = [
    ("yes", "YES"),
    ("no", "NO"),
    ("auth_self", "AUTH_SELF"),
    ("auth_self_keep", "AUTH_SELF_KEEP"),
    ("auth_admin", "AUTH_ADMIN"),
    ("auth_admin_keep", "AUTH_ADMIN_KEEP"),
];

/// One JavaScript rule file per action id under `rules.d`.
pub struct PolicyKitApplier {
    rules_dir: PathBuf,
}

impl PolicyKitApplier {
    pub fn new(policykit_dir: impl Into<PathBuf>) -> Self {
        Self {
            rules_dir: policykit_dir.into().join("rules.d"),
        }
    }

    fn prefix(target: &Target) -> String {
        format!("60-policy-{}+", target.file_stem())
    }

    pub fn rule_path(&self, target: &Target, action: &str) -> PathBuf {
        self.rules_dir
            .join(format!("{}{}.rules", Self::prefix(target), action))
    }

    /// Rule files currently owned by the target, sorted.
    pub fn owned_files(&self, target: &Target) -> Result<Vec<PathBuf>, PolicyError> {
        let prefix = Self::prefix(target);
        let entries = match fs::read_dir(&self.rules_dir) {
            Ok(e) => e,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(PolicyError::io(&self.rules_dir, e)),
        };

        let mut owned = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| PolicyError::io(&self.rules_dir, e))?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name.starts_with(&prefix) && name.ends_with(".rules") {
                owned.push(entry.path());
            }
        }
        owned.sort();
        Ok(owned)
    }
}

impl Applier for PolicyKitApplier {
    fn domain(&self) -> Domain {
        Domain::PolicyKit
    }

    fn apply(&self, target: &Target, changes: &DomainChanges) -> Result<(), PolicyError> {
        let mut rules = BTreeMap::new();
        for entry in changes.desired() {
            validate_action(entry)?;
            if entry.disabled {
                continue;
            }
            rules.insert(self.rule_path(target, &entry.key), render(target, entry)?);
        }

        let mut written = 0;
        for (path, content) in &rules {
            if write_atomic(path, content, 0o644)? {
                written += 1;
            }
        }

        let mut removed = 0;
        for path in self.owned_files(target)? {
            if !rules.contains_key(&path) && remove_file_if_exists(&path)? {
                removed += 1;
            }
        }

        if written + removed > 0 {
            info!(written, removed, "Applied policykit policy for {}", target);
        } else {
            debug!("Policykit policy for {} already up to date", target);
        }
        Ok(())
    }
}

fn validate_action(entry: &Entry) -> Result<(), PolicyError> {
    if ACTION_ID.is_match(&entry.key) {
        Ok(())
    } else {
        Err(invalid(entry, "not a polkit action id"))
    }
}

fn render(target: &Target, entry: &Entry) -> Result<String, PolicyError> {
    let value = entry.value.to_string().trim().to_ascii_lowercase();
    let result = RESULTS
        .iter()
        .find(|(name, _)| *name == value)
        .map(|(_, r)| *r)
        .ok_or_else(|| invalid(entry, &format!("{:?} is not an authorization result", value)))?;

    let mut condition = format!("action.id == \"{}\"", entry.key);
    if !target.is_machine() {
        condition.push_str(&format!(
            " && subject.user == \"{}\"",
            target.name().replace('\\', "\\\\").replace('"', "\\\"")
        ));
    }

    Ok(format!(
        "// Policy for {}, managed automatically.\n\
         polkit.addRule(function(action, subject) {{\n    \
         if ({}) {{\n        \
         return polkit.Result.{};\n    \
         }}\n\
         }});\n",
        target, condition, result
    ))
}

fn invalid(entry: &Entry, reason: &str) -> PolicyError {
    PolicyError::InvalidEntry {
        domain: Domain::PolicyKit,
        key: entry.key.clone(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    const MOUNT: &str = "org.freedesktop.udisks2.filesystem-mount";
    const REBOOT: &str = "org.freedesktop.login1.reboot";

    fn changes(entries: Vec<Entry>) -> DomainChanges {
        let mut c = DomainChanges::new(Domain::PolicyKit);
        c.writes = entries;
        c
    }

    #[test]
    fn renders_machine_rule() {
        let target = Target::machine("host1").unwrap();
        assert_eq!(
            render(&target, &Entry::new(MOUNT, "auth_admin_keep")).unwrap(),
            "// Policy for machine host1, managed automatically.\n\
             polkit.addRule(function(action, subject) {\n    \
             if (action.id == \"org.freedesktop.udisks2.filesystem-mount\") {\n        \
             return polkit.Result.AUTH_ADMIN_KEEP;\n    \
             }\n\
             });\n"
        );
    }

    #[test]
    fn user_rules_match_the_subject() {
        let target = Target::user("alice@example.com").unwrap();
        let rule = render(&target, &Entry::new(REBOOT, "no")).unwrap();
        assert!(rule.contains("subject.user == \"alice@example.com\""));
        assert!(rule.contains("polkit.Result.NO"));
    }

    #[test]
    fn rejects_unknown_results_and_action_ids() {
        let target = Target::machine("host1").unwrap();
        assert!(render(&target, &Entry::new(MOUNT, "maybe")).is_err());
        assert!(validate_action(&Entry::new("not an action", "yes")).is_err());
        assert!(validate_action(&Entry::new("../../etc/passwd", "yes")).is_err());
    }

    #[test]
    fn disabled_and_stale_rules_are_swept() {
        let dir = TempDir::new().unwrap();
        let applier = PolicyKitApplier::new(dir.path());
        let target = Target::machine("host1").unwrap();
        let other = Target::machine("host10").unwrap();

        applier
            .apply(&target, &changes(vec![Entry::new(MOUNT, "yes"), Entry::new(REBOOT, "no")]))
            .unwrap();
        applier.apply(&other, &changes(vec![Entry::new(REBOOT, "yes")])).unwrap();
        assert_eq!(applier.owned_files(&target).unwrap().len(), 2);

        applier
            .apply(&target, &changes(vec![Entry::new(MOUNT, "yes"), Entry::disabled(REBOOT)]))
            .unwrap();
        assert_eq!(
            applier.owned_files(&target).unwrap(),
            vec![applier.rule_path(&target, MOUNT)]
        );

        applier.apply(&target, &changes(vec![])).unwrap();
        assert!(applier.owned_files(&target).unwrap().is_empty());
        assert_eq!(applier.owned_files(&other).unwrap().len(), 1);
    }
}
