//! # GPO entry model
//!
//! Canonical representation of resolved policy settings and of the Group
//! Policy Objects that carry them. A [`Gpo`] is an ordered bundle of
//! [`Entry`] values partitioned by backend [`Domain`]; GPO lists are handed
//! to the policy engine already ordered from highest to lowest precedence.
//!
//! ```rust
//! use gpo_entry::{Domain, Entry, Gpo};
//!
//! let gpo = Gpo::new("{31B2F340}", "Default Domain Policy")
//!     .with_rules(
//!         Domain::Dconf,
//!         vec![Entry::new("org/gnome/desktop/background/picture-uri", "file:///usr/share/bg.png")],
//!     )
//!     .expect("valid rules");
//!
//! assert_eq!(gpo.entries(Domain::Dconf).len(), 1);
//! assert!(gpo.entries(Domain::Privilege).is_empty());
//! ```
//!
//! GPO lists can also be read from YAML documents:
//!
//! ```yaml
//! - id: "{31B2F340}"
//!   name: Default Domain Policy
//!   rules:
//!     dconf:
//!       - key: org/gnome/desktop/screensaver/lock-enabled
//!         value: "true"
//!         meta: b
//!     policykit:
//!       - key: org.freedesktop.login1.reboot
//!         value: auth_admin
//! ```

pub mod domain;
pub mod entry;
pub mod gpo;

pub use domain::Domain;
pub use entry::{Entry, Strategy, Value};
pub use gpo::{load_gpos, parse_gpos, Gpo};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum EntryError {
    #[error("unknown policy domain: {domain}")]
    UnknownDomain { domain: String },

    #[error("duplicate key {key:?} in domain {domain} of GPO {gpo}")]
    DuplicateKey {
        gpo: String,
        domain: Domain,
        key: String,
    },

    #[error("empty key in domain {domain} of GPO {gpo}")]
    EmptyKey { gpo: String, domain: Domain },

    #[error("failed to read GPO list {path}: {message}")]
    Io { path: String, message: String },

    #[error("failed to parse GPO list: {message}")]
    Parse { message: String },
}
