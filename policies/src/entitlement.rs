//! Subscription entitlement gate.
//!
//! The entitlement is a single boolean read from an external status provider
//! exposing one string property. `"enabled"` means entitled; any other value,
//! an unset property or a transport failure means not entitled. Domains that
//! require an entitlement are stripped from resolutions when it is missing.

use chrono::{DateTime, Utc};
use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::context::Context;
use crate::error::PolicyError;
use crate::resolver::ResolvedRuleSet;

pub const ENABLED: &str = "enabled";
pub const STATUS_PROPERTY: &str = "Status";

#[derive(Error, Debug)]
pub enum StatusError {
    #[error("status provider unavailable: {message}")]
    Unavailable { message: String },

    #[error("failed to read status from {path}: {message}")]
    Read { path: String, message: String },
}

/// Reads the raw status property of the subscription service.
pub trait StatusProvider: Send + Sync {
    fn status(&self) -> Result<String, StatusError>;
}

/// In-memory provider; `None` simulates an unreachable service.
#[derive(Debug, Default)]
pub struct MemoryStatus {
    value: Mutex<Option<String>>,
}

impl MemoryStatus {
    pub fn new(status: impl Into<String>) -> Self {
        Self {
            value: Mutex::new(Some(status.into())),
        }
    }

    pub fn unavailable() -> Self {
        Self::default()
    }

    pub fn set(&self, status: impl Into<String>) {
        *self.value.lock().unwrap_or_else(PoisonError::into_inner) = Some(status.into());
    }

    pub fn set_unavailable(&self) {
        *self.value.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

impl StatusProvider for MemoryStatus {
    fn status(&self) -> Result<String, StatusError> {
        self.value
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or_else(|| StatusError::Unavailable {
                message: "no status published".to_string(),
            })
    }
}

/// Reads `Status=<value>` from a properties file kept by the subscription
/// service. A missing file or property is an unset status.
#[derive(Debug, Clone)]
pub struct FileStatus {
    path: PathBuf,
}

impl FileStatus {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl StatusProvider for FileStatus {
    fn status(&self) -> Result<String, StatusError> {
        let content = match fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("Status file {} does not exist", self.path.display());
                return Ok(String::new());
            }
            Err(e) => {
                return Err(StatusError::Read {
                    path: self.path.display().to_string(),
                    message: e.to_string(),
                })
            }
        };

        let value = content
            .lines()
            .filter_map(|line| line.split_once('='))
            .find(|(k, _)| k.trim() == STATUS_PROPERTY)
            .map(|(_, v)| v.trim().trim_matches('"').to_string())
            .unwrap_or_default();
        Ok(value)
    }
}

/// Provider used when nothing is configured: always unreachable.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoStatus;

impl StatusProvider for NoStatus {
    fn status(&self) -> Result<String, StatusError> {
        Err(StatusError::Unavailable {
            message: "no status provider configured".to_string(),
        })
    }
}

#[derive(Debug, Clone, Copy)]
struct Snapshot {
    entitled: bool,
    at: DateTime<Utc>,
}

/// Cached entitlement state, refreshed on demand.
pub struct EntitlementGate {
    provider: Arc<dyn StatusProvider>,
    state: Mutex<Option<Snapshot>>,
}

impl EntitlementGate {
    pub fn new(provider: Arc<dyn StatusProvider>) -> Self {
        Self {
            provider,
            state: Mutex::new(None),
        }
    }

    /// Queries the provider and caches the answer.
    ///
    /// Transport failures are not errors: the gate fails closed so that
    /// free-tier policy still applies. Only cancellation is reported.
    pub fn refresh(&self, ctx: &Context) -> Result<bool, PolicyError> {
        ctx.check()?;

        let entitled = match self.provider.status() {
            Ok(status) => status == ENABLED,
            Err(e) => {
                warn!("Could not read entitlement status, assuming not entitled: {}", e);
                false
            }
        };

        let snapshot = Snapshot {
            entitled,
            at: Utc::now(),
        };
        let previous = self
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(snapshot);
        if previous.map(|p| p.entitled) != Some(entitled) {
            info!(entitled, "Entitlement status changed");
        }
        Ok(entitled)
    }

    /// Last known state, without I/O. False until the first refresh.
    pub fn current_status(&self) -> bool {
        self.snapshot().map(|s| s.entitled).unwrap_or(false)
    }

    /// Strips the gated domains from `set` unless entitled. Returns whether
    /// anything was kept back.
    pub fn filter(&self, set: &mut ResolvedRuleSet) -> bool {
        if self.current_status() {
            return false;
        }
        let gated = set.domains().any(|d| d.requires_entitlement());
        set.strip_gated();
        gated
    }

    pub fn last_refresh(&self) -> Option<DateTime<Utc>> {
        self.snapshot().map(|s| s.at)
    }

    fn snapshot(&self) -> Option<Snapshot> {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
