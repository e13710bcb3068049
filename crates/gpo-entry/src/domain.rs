use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::EntryError;

/// A policy subsystem with its own key namespace and applier.
///
/// The declaration order is the application order: desktop configuration
/// first, then privilege rules, then mandatory-access rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Domain {
    #[serde(rename = "dconf")]
    Dconf,
    #[serde(rename = "privilege")]
    Privilege,
    #[serde(rename = "policykit")]
    PolicyKit,
}

impl Domain {
    pub const ALL: [Domain; 3] = [Domain::Dconf, Domain::Privilege, Domain::PolicyKit];

    pub fn as_str(&self) -> &'static str {
        match self {
            Domain::Dconf => "dconf",
            Domain::Privilege => "privilege",
            Domain::PolicyKit => "policykit",
        }
    }

    /// Whether entries of this domain are only enforced with an active entitlement.
    pub fn requires_entitlement(&self) -> bool {
        match self {
            Domain::Dconf => false,
            Domain::Privilege | Domain::PolicyKit => true,
        }
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Domain {
    type Err = EntryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "dconf" => Ok(Domain::Dconf),
            "privilege" => Ok(Domain::Privilege),
            "policykit" => Ok(Domain::PolicyKit),
            other => Err(EntryError::UnknownDomain {
                domain: other.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn application_order_follows_declaration() {
        let mut domains = vec![Domain::PolicyKit, Domain::Dconf, Domain::Privilege];
        domains.sort();
        assert_eq!(domains, Domain::ALL.to_vec());
    }

    #[test]
    fn parses_known_names_and_rejects_others() {
        for d in Domain::ALL {
            assert_eq!(d.as_str().parse::<Domain>().unwrap(), d);
        }
        let err = "scripts".parse::<Domain>().unwrap_err();
        assert!(matches!(err, EntryError::UnknownDomain { domain } if domain == "scripts"));
    }

    #[test]
    fn only_desktop_configuration_is_free() {
        assert!(!Domain::Dconf.requires_entitlement());
        assert!(Domain::Privilege.requires_entitlement());
        assert!(Domain::PolicyKit.requires_entitlement());
    }
}
