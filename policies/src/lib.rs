//! Group policy reconciliation.
//!
//! A [`Manager`] takes the ordered GPO list retrieved for a user or a
//! machine, resolves it into one winning rule per key, drops the domains the
//! host is not entitled to, and converges the desktop configuration,
//! sudoers and polkit backends to the result. The applied state is cached
//! per target so that rules removed from the directory are rolled back on
//! the next apply and can be inspected with [`Manager::dump_policies`].

pub mod appliers;
pub mod cache;
pub mod config;
pub mod context;
pub mod diff;
pub mod dump;
pub mod entitlement;
pub mod error;
pub mod manager;
pub mod resolver;
pub mod target;

pub use appliers::{Applier, ApplierRegistry};
pub use cache::{CacheEntry, RuleCache, GPO_RULES_CACHE_DIR};
pub use config::{CompilerKind, CrossScope, ManagerConfig};
pub use context::Context;
pub use diff::{diff, DomainChanges};
pub use entitlement::{EntitlementGate, FileStatus, MemoryStatus, NoStatus, StatusError, StatusProvider};
pub use error::PolicyError;
pub use manager::{ApplyState, Manager};
pub use resolver::{resolve, ResolvedRule, ResolvedRuleSet};
pub use target::Target;

pub use gpo_entry::{Domain, Entry, Gpo, Strategy, Value};
