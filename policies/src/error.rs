use config_loader::ConfigError;
use gpo_entry::{Domain, EntryError};
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PolicyError {
    #[error(transparent)]
    Entry(#[from] EntryError),

    #[error("invalid {domain} entry {key:?}: {reason}")]
    InvalidEntry {
        domain: Domain,
        key: String,
        reason: String,
    },

    #[error("invalid target name {target:?}: {reason}")]
    InvalidTarget { target: String, reason: String },

    #[error("no cached policy for {target}")]
    CacheMiss { target: String },

    #[error("no policy was ever applied for {target}")]
    NotFound { target: String },

    #[error("permission denied on {}", .path.display())]
    Permission {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to serialize {what}: {message}")]
    Serialization { what: String, message: String },

    #[error("failed to compile dconf database {db}: {message}")]
    Compile { db: String, message: String },

    #[error("operation cancelled: {reason}")]
    Cancelled { reason: String },

    #[error("failed to apply {domain} policy for {target}: {source}")]
    Apply {
        domain: Domain,
        target: String,
        #[source]
        source: Box<PolicyError>,
    },

    #[error("policy for {target} was applied but could not be saved: {source}")]
    Persist {
        target: String,
        #[source]
        source: Box<PolicyError>,
    },

    #[error("hostname lookup failed: {message}")]
    Hostname { message: String },

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl PolicyError {
    /// Wraps an I/O error, keeping permission failures distinguishable.
    pub fn io(path: impl AsRef<Path>, source: io::Error) -> Self {
        let path = path.as_ref().to_path_buf();
        if source.kind() == io::ErrorKind::PermissionDenied {
            PolicyError::Permission { path, source }
        } else {
            PolicyError::Io { path, source }
        }
    }

    pub fn is_permission(&self) -> bool {
        match self {
            PolicyError::Permission { .. } => true,
            PolicyError::Apply { source, .. } | PolicyError::Persist { source, .. } => {
                source.is_permission()
            }
            _ => false,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, PolicyError::Cancelled { .. })
    }

    pub fn is_unknown_domain(&self) -> bool {
        matches!(self, PolicyError::Entry(EntryError::UnknownDomain { .. }))
    }

    /// Expected absence of state, which most callers treat as empty.
    pub fn is_absent(&self) -> bool {
        matches!(
            self,
            PolicyError::CacheMiss { .. } | PolicyError::NotFound { .. }
        )
    }

    /// The backend whose failure aborted an apply, if any.
    pub fn failed_domain(&self) -> Option<Domain> {
        match self {
            PolicyError::Apply { domain, .. } => Some(*domain),
            _ => None,
        }
    }
}
