//! Merge engine turning an ordered GPO list into one rule per key.
//!
//! GPOs arrive highest precedence first. For every domain the first GPO
//! defining a key wins and later definitions are kept, in order, as the
//! overridden chain. Append-strategy keys accumulate the values of every
//! GPO instead.

use gpo_entry::{Domain, Entry, Gpo, Value};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GpoRef {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Overridden {
    pub entry: Entry,
    pub gpo: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedRule {
    pub entry: Entry,
    /// Id of the GPO the winning entry comes from.
    pub source: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub overridden: Vec<Overridden>,
}

impl ResolvedRule {
    pub fn key(&self) -> &str {
        &self.entry.key
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainRules {
    pub domain: Domain,
    pub rules: Vec<ResolvedRule>,
}

/// Resolution output for one target, domains in application order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedRuleSet {
    pub target: String,
    #[serde(default)]
    pub is_machine: bool,
    #[serde(default)]
    pub gpos: Vec<GpoRef>,
    #[serde(default)]
    domains: Vec<DomainRules>,
}

impl ResolvedRuleSet {
    pub fn empty(target: impl Into<String>, is_machine: bool) -> Self {
        Self {
            target: target.into(),
            is_machine,
            gpos: Vec::new(),
            domains: Vec::new(),
        }
    }

    /// Rules of one domain, in first-seen precedence order.
    pub fn rules(&self, domain: Domain) -> &[ResolvedRule] {
        self.domains
            .iter()
            .find(|d| d.domain == domain)
            .map(|d| d.rules.as_slice())
            .unwrap_or(&[])
    }

    pub fn get(&self, domain: Domain, key: &str) -> Option<&ResolvedRule> {
        self.rules(domain).iter().find(|r| r.key() == key)
    }

    /// Domains holding at least one rule.
    pub fn domains(&self) -> impl Iterator<Item = Domain> + '_ {
        self.domains
            .iter()
            .filter(|d| !d.rules.is_empty())
            .map(|d| d.domain)
    }

    pub fn is_empty(&self) -> bool {
        self.domains.iter().all(|d| d.rules.is_empty())
    }

    pub fn retain_domains(&mut self, mut keep: impl FnMut(Domain) -> bool) {
        self.domains.retain(|d| keep(d.domain));
    }

    /// Drops every domain that needs an entitlement.
    pub fn strip_gated(&mut self) {
        self.retain_domains(|d| !d.requires_entitlement());
    }

    /// Display name of a GPO, or the id itself when it is unknown.
    pub fn gpo_name<'a>(&'a self, id: &'a str) -> &'a str {
        self.gpos
            .iter()
            .find(|g| g.id == id)
            .map(|g| g.name.as_str())
            .unwrap_or(id)
    }
}

/// Resolves `gpos` (highest precedence first) for a target.
pub fn resolve(target: &str, is_machine: bool, gpos: &[Gpo]) -> ResolvedRuleSet {
    let mut set = ResolvedRuleSet::empty(target, is_machine);
    set.gpos = gpos
        .iter()
        .map(|g| GpoRef {
            id: g.id.clone(),
            name: g.name.clone(),
        })
        .collect();

    for domain in Domain::ALL {
        let rules = resolve_domain(domain, gpos);
        if !rules.is_empty() {
            set.domains.push(DomainRules { domain, rules });
        }
    }

    debug!(
        policy_target = target,
        is_machine,
        gpos = gpos.len(),
        rules = set.domains.iter().map(|d| d.rules.len()).sum::<usize>(),
        "Resolved policy"
    );
    set
}

fn resolve_domain(domain: Domain, gpos: &[Gpo]) -> Vec<ResolvedRule> {
    let mut rules: Vec<ResolvedRule> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for gpo in gpos {
        for entry in gpo.entries(domain) {
            match index.get(&entry.key) {
                None => {
                    index.insert(entry.key.clone(), rules.len());
                    rules.push(ResolvedRule {
                        entry: winner(entry),
                        source: gpo.id.clone(),
                        overridden: Vec::new(),
                    });
                }
                Some(&i) => {
                    let rule = &mut rules[i];
                    if rule.entry.is_append() && !rule.entry.disabled {
                        if !entry.disabled {
                            append_values(&mut rule.entry.value, &entry.value);
                        }
                    } else {
                        rule.overridden.push(Overridden {
                            entry: entry.clone(),
                            gpo: gpo.id.clone(),
                        });
                    }
                }
            }
        }
    }

    rules
}

fn winner(entry: &Entry) -> Entry {
    let mut e = entry.clone();
    if e.is_append() && !e.disabled {
        e.value = Value::List(e.value.items());
    }
    e
}

fn append_values(acc: &mut Value, more: &Value) {
    let mut items = acc.items();
    for item in more.items() {
        if !items.contains(&item) {
            items.push(item);
        }
    }
    *acc = Value::List(items);
}
