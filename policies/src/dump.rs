//! Human readable rendering of resolved policy.
//!
//! Output is a pure function of the rule sets and options: domains follow
//! their application order and keys their resolution order.

use gpo_entry::{Domain, Entry};
use std::fmt::Write;

use crate::config::CrossScope;
use crate::resolver::ResolvedRuleSet;

pub const MACHINE_HEADER: &str = "Policies from machine configuration:";
pub const USER_HEADER: &str = "Policies from user configuration:";
const NO_POLICY: &str = "(no policy)";
const DISABLED: &str = "<disabled>";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DumpOptions {
    /// Suffix every winner with the GPO it comes from.
    pub with_rules: bool,
    /// List shadowed entries below their winner.
    pub with_overridden: bool,
}

#[derive(Debug, Clone)]
struct Line {
    entry: Entry,
    gpo: String,
}

#[derive(Debug, Clone)]
struct Winner {
    line: Line,
    overridden: Vec<Line>,
}

/// One configuration scope, ready to render.
#[derive(Debug, Clone)]
pub struct Layer {
    header: &'static str,
    gpos: Vec<(String, String)>,
    domains: Vec<(Domain, Vec<Winner>)>,
}

impl Layer {
    pub fn new(set: &ResolvedRuleSet) -> Self {
        let header = if set.is_machine { MACHINE_HEADER } else { USER_HEADER };
        let domains = Domain::ALL
            .iter()
            .map(|&domain| {
                let winners = set
                    .rules(domain)
                    .iter()
                    .map(|rule| Winner {
                        line: Line {
                            entry: rule.entry.clone(),
                            gpo: set.gpo_name(&rule.source).to_string(),
                        },
                        overridden: rule
                            .overridden
                            .iter()
                            .map(|o| Line {
                                entry: o.entry.clone(),
                                gpo: set.gpo_name(&o.gpo).to_string(),
                            })
                            .collect(),
                    })
                    .collect();
                (domain, winners)
            })
            .collect();

        Self {
            header,
            gpos: set.gpos.iter().map(|g| (g.name.clone(), g.id.clone())).collect(),
            domains,
        }
    }

    fn winners_mut(&mut self, domain: Domain) -> &mut Vec<Winner> {
        let idx = self
            .domains
            .iter()
            .position(|(d, _)| *d == domain)
            .unwrap_or(0);
        &mut self.domains[idx].1
    }
}

/// Moves keys set in both layers under the winner of the layer that takes
/// precedence for the domain.
pub fn layer_scopes(machine: &mut Layer, user: &mut Layer, scope: impl Fn(Domain) -> CrossScope) {
    for domain in Domain::ALL {
        let (winning, losing) = match scope(domain) {
            CrossScope::None => continue,
            CrossScope::MachineOverUser => (&mut *machine, &mut *user),
            CrossScope::UserOverMachine => (&mut *user, &mut *machine),
        };
        let winners = winning.winners_mut(domain);
        losing.winners_mut(domain).retain(|lost| {
            match winners.iter_mut().find(|w| w.line.entry.key == lost.line.entry.key) {
                Some(w) => {
                    w.overridden.push(lost.line.clone());
                    w.overridden.extend(lost.overridden.iter().cloned());
                    false
                }
                None => true,
            }
        });
    }
}

pub fn render(layers: &[Layer], opts: DumpOptions) -> String {
    let mut out = String::new();
    for layer in layers {
        render_layer(&mut out, layer, opts);
    }
    out
}

fn render_layer(out: &mut String, layer: &Layer, opts: DumpOptions) {
    out.push_str(layer.header);
    out.push('\n');

    if layer.gpos.is_empty() {
        out.push_str(NO_POLICY);
        out.push('\n');
        return;
    }

    for (name, id) in &layer.gpos {
        let _ = writeln!(out, "* {} ({})", name, id);
    }

    for (domain, winners) in &layer.domains {
        if winners.is_empty() {
            continue;
        }
        let _ = writeln!(out, "** {}:", domain);
        for winner in winners {
            let _ = write!(out, "*** {}", format_entry(&winner.line.entry));
            if opts.with_rules {
                let _ = write!(out, "  [{}]", winner.line.gpo);
            }
            out.push('\n');

            if opts.with_overridden {
                for lost in &winner.overridden {
                    let _ = writeln!(out, "-*** {}  [{}]", format_entry(&lost.entry), lost.gpo);
                }
            }
        }
    }
}

fn format_entry(entry: &Entry) -> String {
    if entry.disabled {
        format!("{}: {}", entry.key, DISABLED)
    } else {
        format!("{}: {}", entry.key, entry.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::resolve;
    use gpo_entry::Gpo;
    use pretty_assertions::assert_eq;

    fn gpo(id: &str, name: &str, domain: Domain, entries: Vec<Entry>) -> Gpo {
        Gpo::new(id, name).with_rules(domain, entries).unwrap()
    }

    fn user_set() -> ResolvedRuleSet {
        resolve(
            "alice",
            false,
            &[
                gpo(
                    "{A}",
                    "high",
                    Domain::Dconf,
                    vec![Entry::new("a/k", "1"), Entry::disabled("a/off")],
                ),
                gpo(
                    "{B}",
                    "low",
                    Domain::Dconf,
                    vec![Entry::new("a/k", "2"), Entry::new("a/list", vec!["x".to_string(), "y".to_string()])],
                ),
            ],
        )
    }

    #[test]
    fn renders_winners_only_by_default() {
        let out = render(&[Layer::new(&user_set())], DumpOptions::default());
        assert_eq!(
            out,
            "Policies from user configuration:\n\
             * high ({A})\n\
             * low ({B})\n\
             ** dconf:\n\
             *** a/k: 1\n\
             *** a/off: <disabled>\n\
             *** a/list: x, y\n"
        );
    }

    #[test]
    fn renders_sources_and_overridden_entries() {
        let out = render(
            &[Layer::new(&user_set())],
            DumpOptions {
                with_rules: true,
                with_overridden: true,
            },
        );
        assert_eq!(
            out,
            "Policies from user configuration:\n\
             * high ({A})\n\
             * low ({B})\n\
             ** dconf:\n\
             *** a/k: 1  [high]\n\
             -*** a/k: 2  [low]\n\
             *** a/off: <disabled>  [high]\n\
             *** a/list: x, y  [low]\n"
        );
    }

    #[test]
    fn empty_scope_has_no_policy() {
        let out = render(&[Layer::new(&resolve("host1", true, &[]))], DumpOptions::default());
        assert_eq!(out, "Policies from machine configuration:\n(no policy)\n");
    }

    #[test]
    fn machine_entries_shadow_user_entries() {
        let mut machine = Layer::new(&resolve(
            "host1",
            true,
            &[gpo("{M}", "machine", Domain::Dconf, vec![Entry::new("a/k", "m")])],
        ));
        let mut user = Layer::new(&user_set());
        layer_scopes(&mut machine, &mut user, CrossScope::default_for);

        let out = render(
            &[machine, user],
            DumpOptions {
                with_rules: false,
                with_overridden: true,
            },
        );
        assert_eq!(
            out,
            "Policies from machine configuration:\n\
             * machine ({M})\n\
             ** dconf:\n\
             *** a/k: m\n\
             -*** a/k: 1  [high]\n\
             -*** a/k: 2  [low]\n\
             Policies from user configuration:\n\
             * high ({A})\n\
             * low ({B})\n\
             ** dconf:\n\
             *** a/off: <disabled>\n\
             *** a/list: x, y\n"
        );
    }

    #[test]
    fn user_entries_can_shadow_machine_entries() {
        let mut machine = Layer::new(&resolve(
            "host1",
            true,
            &[gpo("{M}", "machine", Domain::Dconf, vec![Entry::new("a/k", "m"), Entry::new("a/only", "m")])],
        ));
        let mut user = Layer::new(&user_set());
        layer_scopes(&mut machine, &mut user, |_| CrossScope::UserOverMachine);

        let out = render(&[machine, user], DumpOptions::default());
        assert!(out.contains("*** a/only: m\n"));
        assert!(!out.contains("*** a/k: m\n"));
        assert!(out.contains("*** a/k: 1\n"));
    }
}
