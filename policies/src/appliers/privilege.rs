use gpo_entry::{Domain, Entry};
use std::path::PathBuf;
use tracing::info;

use super::{remove_file_if_exists, write_atomic, Applier};
use crate::diff::DomainChanges;
use crate::error::PolicyError;
use crate::target::Target;

pub const CLIENT_ADMINS: &str = "client-admins";
pub const ALLOW_LOCAL_ADMINS: &str = "allow-local-admins";

const LOCAL_ADMIN_GROUPS: [&str; 2] = ["%admin", "%sudo"];

/// Grants or withdraws administrator rights through one sudoers drop-in per
/// target, regenerated from scratch on every apply.
pub struct PrivilegeApplier {
    sudoers_dir: PathBuf,
}

impl PrivilegeApplier {
    pub fn new(sudoers_dir: impl Into<PathBuf>) -> Self {
        Self {
            sudoers_dir: sudoers_dir.into(),
        }
    }

    /// sudo skips drop-ins whose name contains a dot.
    pub fn rule_path(&self, target: &Target) -> PathBuf {
        self.sudoers_dir
            .join(format!("99-policy-{}", target.file_stem().replace('.', "_")))
    }
}

impl Applier for PrivilegeApplier {
    fn domain(&self) -> Domain {
        Domain::Privilege
    }

    fn apply(&self, target: &Target, changes: &DomainChanges) -> Result<(), PolicyError> {
        let path = self.rule_path(target);
        let lines = render(&changes.desired())?;

        if lines.is_empty() {
            if remove_file_if_exists(&path)? {
                info!(path = %path.display(), "Removed privilege policy");
            }
            return Ok(());
        }

        let mut content = format!("# Privilege policy for {}, managed automatically.\n", target.name());
        for line in lines {
            content.push_str(&line);
            content.push('\n');
        }
        if write_atomic(&path, &content, 0o440)? {
            info!(path = %path.display(), "Applied privilege policy");
        }
        Ok(())
    }
}

fn render(entries: &[&Entry]) -> Result<Vec<String>, PolicyError> {
    let mut deny_local = Vec::new();
    let mut grants = Vec::new();

    for entry in entries {
        match entry.key.as_str() {
            ALLOW_LOCAL_ADMINS => {
                if entry.disabled || !parse_bool(entry)? {
                    deny_local.extend(
                        LOCAL_ADMIN_GROUPS
                            .iter()
                            .map(|g| format!("{:<24}ALL=(ALL:ALL) !ALL", g)),
                    );
                }
            }
            CLIENT_ADMINS => {
                if entry.disabled {
                    continue;
                }
                for principal in entry.value.items() {
                    if principal.chars().any(|c| c.is_whitespace() || c.is_control() || c == ',') {
                        return Err(invalid(entry, &format!("{:?} is not a valid user or group", principal)));
                    }
                    grants.push(format!("{:<24}ALL=(ALL:ALL) ALL", principal));
                }
            }
            _ => return Err(invalid(entry, "unknown privilege setting")),
        }
    }

    // Later lines win in sudoers: denials first so granted principals keep access.
    Ok(deny_local.into_iter().chain(grants).collect())
}

fn parse_bool(entry: &Entry) -> Result<bool, PolicyError> {
    match entry.value.to_string().trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "1" => Ok(true),
        "false" | "no" | "0" => Ok(false),
        other => Err(invalid(entry, &format!("{:?} is not a boolean", other))),
    }
}

fn invalid(entry: &Entry, reason: &str) -> PolicyError {
    PolicyError::InvalidEntry {
        domain: Domain::Privilege,
        key: entry.key.clone(),
        reason: reason.to_string(),
    }
}
