use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::Path;

use crate::{Domain, Entry, EntryError};

/// A named, ordered collection of entries partitioned by domain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawGpo")]
pub struct Gpo {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    rules: BTreeMap<Domain, Vec<Entry>>,
}

/// Wire form of a GPO, with domain names not yet checked.
#[derive(Debug, Deserialize)]
struct RawGpo {
    id: String,
    name: String,
    #[serde(default)]
    rules: BTreeMap<String, Vec<Entry>>,
}

impl TryFrom<RawGpo> for Gpo {
    type Error = EntryError;

    fn try_from(raw: RawGpo) -> Result<Self, Self::Error> {
        let mut gpo = Gpo::new(raw.id, raw.name);
        for (name, entries) in raw.rules {
            let domain: Domain = name.parse()?;
            gpo = gpo.with_rules(domain, entries)?;
        }
        Ok(gpo)
    }
}

impl Gpo {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            rules: BTreeMap::new(),
        }
    }

    /// Sets the rules for one domain, rejecting empty or repeated keys.
    pub fn with_rules(mut self, domain: Domain, entries: Vec<Entry>) -> Result<Self, EntryError> {
        let mut seen = HashSet::new();
        for e in &entries {
            if e.key.trim().is_empty() {
                return Err(EntryError::EmptyKey {
                    gpo: self.id.clone(),
                    domain,
                });
            }
            if !seen.insert(e.key.as_str()) {
                return Err(EntryError::DuplicateKey {
                    gpo: self.id.clone(),
                    domain,
                    key: e.key.clone(),
                });
            }
        }
        if entries.is_empty() {
            self.rules.remove(&domain);
        } else {
            self.rules.insert(domain, entries);
        }
        Ok(self)
    }

    /// Entries of a domain in GPO order; empty when the GPO does not touch it.
    pub fn entries(&self, domain: Domain) -> &[Entry] {
        self.rules.get(&domain).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn domains(&self) -> impl Iterator<Item = Domain> + '_ {
        self.rules.keys().copied()
    }
}

/// Parses a YAML list of GPOs, highest precedence first.
pub fn parse_gpos(content: &str) -> Result<Vec<Gpo>, EntryError> {
    if content.trim().is_empty() {
        return Ok(Vec::new());
    }
    let raw: Vec<RawGpo> = serde_yaml::from_str(content).map_err(|e| EntryError::Parse {
        message: e.to_string(),
    })?;
    raw.into_iter().map(Gpo::try_from).collect()
}

/// Reads a YAML list of GPOs from disk.
pub fn load_gpos(path: impl AsRef<Path>) -> Result<Vec<Gpo>, EntryError> {
    let path = path.as_ref();
    let content = fs::read_to_string(path).map_err(|e| EntryError::Io {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;
    parse_gpos(&content)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn with_rules_rejects_duplicate_keys() {
        let err = Gpo::new("g1", "one")
            .with_rules(
                Domain::Dconf,
                vec![Entry::new("a/b", "1"), Entry::new("a/b", "2")],
            )
            .unwrap_err();
        assert!(matches!(err, EntryError::DuplicateKey { key, .. } if key == "a/b"));
    }

    #[test]
    fn with_rules_rejects_empty_keys() {
        let err = Gpo::new("g1", "one")
            .with_rules(Domain::PolicyKit, vec![Entry::new("  ", "yes")])
            .unwrap_err();
        assert!(matches!(err, EntryError::EmptyKey { domain: Domain::PolicyKit, .. }));
    }

    #[test]
    fn same_key_in_different_domains_is_allowed() {
        let gpo = Gpo::new("g1", "one")
            .with_rules(Domain::Dconf, vec![Entry::new("k", "1")])
            .unwrap()
            .with_rules(Domain::Privilege, vec![Entry::new("k", "2")])
            .unwrap();
        assert_eq!(
            gpo.domains().collect::<Vec<_>>(),
            vec![Domain::Dconf, Domain::Privilege]
        );
    }

    #[test]
    fn unknown_domain_is_rejected_when_parsing() {
        let err = parse_gpos(
            "- id: g1\n  name: one\n  rules:\n    scripts:\n      - key: logon\n        value: x\n",
        )
        .unwrap_err();
        assert!(matches!(err, EntryError::UnknownDomain { domain } if domain == "scripts"));
    }

    #[test]
    fn empty_document_is_an_empty_list() {
        assert!(parse_gpos("").unwrap().is_empty());
        assert!(parse_gpos("[]").unwrap().is_empty());
    }
}
