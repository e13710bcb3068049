//! Backends converging local system state to a resolved rule set.
//!
//! Every applier receives the full picture for its domain (writes, removes
//! and unchanged entries) and must leave the system holding exactly the
//! desired entries, whatever state it started from.

pub mod dconf;
pub mod policykit;
pub mod privilege;

use gpo_entry::Domain;
use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::Path;
use std::sync::Arc;
use tempfile::NamedTempFile;
use tracing::debug;

use crate::diff::DomainChanges;
use crate::error::PolicyError;
use crate::target::Target;

pub use dconf::{BuiltinCompiler, DbCompiler, DconfApplier, DconfCompiler};
pub use policykit::PolicyKitApplier;
pub use privilege::PrivilegeApplier;

pub trait Applier: Send + Sync {
    fn domain(&self) -> Domain;

    fn apply(&self, target: &Target, changes: &DomainChanges) -> Result<(), PolicyError>;
}

/// Appliers keyed by domain; iteration follows domain order.
#[derive(Default, Clone)]
pub struct ApplierRegistry {
    appliers: BTreeMap<Domain, Arc<dyn Applier>>,
}

impl ApplierRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces any applier previously registered for the same domain.
    pub fn register(&mut self, applier: Arc<dyn Applier>) {
        self.appliers.insert(applier.domain(), applier);
    }

    pub fn get(&self, domain: Domain) -> Option<&Arc<dyn Applier>> {
        self.appliers.get(&domain)
    }

    pub fn iter(&self) -> impl Iterator<Item = (Domain, &Arc<dyn Applier>)> {
        self.appliers.iter().map(|(d, a)| (*d, a))
    }

    pub fn len(&self) -> usize {
        self.appliers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.appliers.is_empty()
    }
}

/// Writes `content` through a temporary file in the destination directory.
/// Returns false when the file already held exactly that content.
pub(crate) fn write_atomic(path: &Path, content: &str, mode: u32) -> Result<bool, PolicyError> {
    if let Ok(current) = fs::read_to_string(path) {
        if current == content {
            return Ok(false);
        }
    }

    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir).map_err(|e| PolicyError::io(dir, e))?;

    let mut temp_file = NamedTempFile::new_in(dir).map_err(|e| PolicyError::io(dir, e))?;
    temp_file
        .write_all(content.as_bytes())
        .map_err(|e| PolicyError::io(path, e))?;
    temp_file.flush().map_err(|e| PolicyError::io(path, e))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        temp_file
            .as_file()
            .set_permissions(fs::Permissions::from_mode(mode))
            .map_err(|e| PolicyError::io(path, e))?;
    }
    #[cfg(not(unix))]
    let _ = mode;

    temp_file
        .persist(path)
        .map_err(|e| PolicyError::io(path, e.error))?;
    debug!("Wrote {}", path.display());
    Ok(true)
}

pub(crate) fn remove_file_if_exists(path: &Path) -> Result<bool, PolicyError> {
    match fs::remove_file(path) {
        Ok(()) => {
            debug!("Removed {}", path.display());
            Ok(true)
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(PolicyError::io(path, e)),
    }
}

pub(crate) fn remove_dir_all_if_exists(path: &Path) -> Result<bool, PolicyError> {
    match fs::remove_dir_all(path) {
        Ok(()) => {
            debug!("Removed {}", path.display());
            Ok(true)
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(PolicyError::io(path, e)),
    }
}
