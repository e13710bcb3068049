use gpo_entry::{Domain, Entry};

use crate::resolver::ResolvedRuleSet;

/// Instructions for one backend, derived from the previous and new resolutions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainChanges {
    pub domain: Domain,
    /// Added or changed winners.
    pub writes: Vec<Entry>,
    /// Keys present previously and absent now.
    pub removes: Vec<String>,
    /// Winners identical to the previous resolution.
    pub unchanged: Vec<Entry>,
}

impl DomainChanges {
    pub fn new(domain: Domain) -> Self {
        Self {
            domain,
            writes: Vec::new(),
            removes: Vec::new(),
            unchanged: Vec::new(),
        }
    }

    /// Every entry the backend must hold once applied, sorted by key.
    pub fn desired(&self) -> Vec<&Entry> {
        let mut all: Vec<&Entry> = self.writes.iter().chain(self.unchanged.iter()).collect();
        all.sort_by(|a, b| a.key.cmp(&b.key));
        all
    }

    /// Nothing to write nor remove.
    pub fn is_noop(&self) -> bool {
        self.writes.is_empty() && self.removes.is_empty()
    }
}

/// Changes per domain, in application order, one element per domain.
pub fn diff(previous: Option<&ResolvedRuleSet>, current: &ResolvedRuleSet) -> Vec<DomainChanges> {
    Domain::ALL
        .iter()
        .map(|&domain| {
            let mut changes = DomainChanges::new(domain);

            for rule in current.rules(domain) {
                let before = previous.and_then(|p| p.get(domain, rule.key()));
                match before {
                    Some(prev) if prev.entry == rule.entry => changes.unchanged.push(rule.entry.clone()),
                    _ => changes.writes.push(rule.entry.clone()),
                }
            }

            if let Some(previous) = previous {
                for rule in previous.rules(domain) {
                    if current.get(domain, rule.key()).is_none() {
                        changes.removes.push(rule.key().to_string());
                    }
                }
            }

            changes
        })
        .collect()
}
