use gpo_entry::{load_gpos, Domain, Entry, EntryError, Gpo, Strategy, Value};
use pretty_assertions::assert_eq;
use std::fs;
use tempfile::TempDir;

const ALL_ENTRY_TYPES: &str = r#"
- id: "{C4F393CA-AD9A-4595-AEBC-3FA6EE484285}"
  name: GPO for current machine
  rules:
    dconf:
      - key: org/gnome/desktop/background/picture-uri
        value: file:///usr/share/backgrounds/corp.png
        meta: s
      - key: org/gnome/desktop/lockdown/disable-command-line
        disabled: true
        meta: b
      - key: org/gnome/shell/favorite-apps
        value:
          - firefox.desktop
          - org.gnome.Terminal.desktop
        meta: as
        strategy: append
    privilege:
      - key: client-admins
        value: |
          alice
          %domain admins
    policykit:
      - key: org.freedesktop.login1.reboot
        value: auth_admin
- id: "{31B2F340-016D-11D2-945F-00C04FB984F9}"
  name: Default Domain Policy
  rules:
    dconf:
      - key: org/gnome/desktop/background/picture-uri
        value: file:///usr/share/backgrounds/default.png
        meta: s
"#;

#[test]
fn given_gpo_file_when_loaded_then_order_and_domains_are_kept() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("all_entry_types.gpos");
    fs::write(&path, ALL_ENTRY_TYPES).unwrap();

    let gpos = load_gpos(&path).unwrap();

    assert_eq!(gpos.len(), 2);
    assert_eq!(gpos[0].name, "GPO for current machine");
    assert_eq!(gpos[1].id, "{31B2F340-016D-11D2-945F-00C04FB984F9}");

    let dconf = gpos[0].entries(Domain::Dconf);
    assert_eq!(
        dconf.iter().map(|e| e.key.as_str()).collect::<Vec<_>>(),
        vec![
            "org/gnome/desktop/background/picture-uri",
            "org/gnome/desktop/lockdown/disable-command-line",
            "org/gnome/shell/favorite-apps",
        ]
    );
    assert!(dconf[1].disabled);
    assert_eq!(dconf[2].strategy, Strategy::Append);
    assert_eq!(
        gpos[0].entries(Domain::Privilege)[0].value.items(),
        vec!["alice", "%domain admins"]
    );
    assert!(gpos[1].entries(Domain::PolicyKit).is_empty());
}

#[test]
fn given_gpo_list_when_serialized_then_it_parses_back_identically() {
    let gpo = Gpo::new("g1", "one")
        .with_rules(
            Domain::Dconf,
            vec![
                Entry::new("org/gnome/desktop/session/idle-delay", "300").with_meta("u"),
                Entry::new("org/gnome/shell/enabled-extensions", Value::List(vec!["a@b".into()]))
                    .with_strategy(Strategy::Append),
            ],
        )
        .unwrap();

    let yaml = serde_yaml::to_string(&vec![gpo.clone()]).unwrap();
    let back = gpo_entry::parse_gpos(&yaml).unwrap();

    assert_eq!(back, vec![gpo]);
}

#[test]
fn given_missing_file_when_loaded_then_io_error() {
    let dir = TempDir::new().unwrap();
    let err = load_gpos(dir.path().join("nope.gpos")).unwrap_err();
    assert!(matches!(err, EntryError::Io { .. }));
}

#[test]
fn given_malformed_yaml_when_loaded_then_parse_error() {
    let err = gpo_entry::parse_gpos("- id: [unterminated").unwrap_err();
    assert!(matches!(err, EntryError::Parse { .. }));
}
