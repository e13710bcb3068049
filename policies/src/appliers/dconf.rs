//! Desktop configuration backend.
//!
//! Each user owns a system database `policy_user_<user>` under the dconf
//! root: a keyfile with the enforced values, a locks file holding every
//! managed key, the compiled database and the profile wiring it into the
//! session. The machine database is `policy_machine` and is wired into the
//! greeter profile and, depending on the layering, into every user profile.

use gpo_entry::{Domain, Entry};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use tracing::{debug, info};

use super::{remove_dir_all_if_exists, remove_file_if_exists, write_atomic, Applier};
use crate::config::CrossScope;
use crate::diff::DomainChanges;
use crate::error::PolicyError;
use crate::target::Target;

pub const MACHINE_DB: &str = "policy_machine";
const USER_DB_PREFIX: &str = "policy_user_";
const GREETER_PROFILE: &str = "gdm";

static KEY_PATH: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^/?(?:[A-Za-z0-9_.-]+/)+[A-Za-z0-9-]+$").expect("dconf key pattern must compile")
});

/// Turns a keyfile directory into a binary database.
pub trait DbCompiler: Send + Sync {
    fn compile(&self, keyfile_dir: &Path, output: &Path) -> Result<(), PolicyError>;
}

/// Runs `dconf compile`.
#[derive(Debug, Clone)]
pub struct DconfCompiler {
    program: PathBuf,
}

impl Default for DconfCompiler {
    fn default() -> Self {
        Self {
            program: PathBuf::from("dconf"),
        }
    }
}

impl DconfCompiler {
    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl DbCompiler for DconfCompiler {
    fn compile(&self, keyfile_dir: &Path, output: &Path) -> Result<(), PolicyError> {
        let db = output.display().to_string();
        let result = Command::new(&self.program)
            .arg("compile")
            .arg(output)
            .arg(keyfile_dir)
            .output()
            .map_err(|e| PolicyError::Compile {
                db: db.clone(),
                message: format!("could not run {}: {}", self.program.display(), e),
            })?;

        if !result.status.success() {
            return Err(PolicyError::Compile {
                db,
                message: String::from_utf8_lossy(&result.stderr).trim().to_string(),
            });
        }
        Ok(())
    }
}

/// Flattens the keyfiles into a sorted `/path/key=value` text database,
/// followed by the locked paths.
#[derive(Debug, Clone, Copy, Default)]
pub struct BuiltinCompiler;

impl DbCompiler for BuiltinCompiler {
    fn compile(&self, keyfile_dir: &Path, output: &Path) -> Result<(), PolicyError> {
        let mut values = BTreeMap::new();
        for path in sorted_files(keyfile_dir)? {
            let content = fs::read_to_string(&path).map_err(|e| PolicyError::io(&path, e))?;
            parse_keyfile(&content, &mut values).map_err(|message| PolicyError::Compile {
                db: output.display().to_string(),
                message: format!("{}: {}", path.display(), message),
            })?;
        }

        let mut locks = Vec::new();
        for path in sorted_files(&keyfile_dir.join("locks"))? {
            let content = fs::read_to_string(&path).map_err(|e| PolicyError::io(&path, e))?;
            locks.extend(
                content
                    .lines()
                    .map(str::trim)
                    .filter(|l| !l.is_empty() && !l.starts_with('#'))
                    .map(str::to_string),
            );
        }
        locks.sort();
        locks.dedup();

        let mut db = String::new();
        for (path, value) in &values {
            db.push_str(&format!("{}={}\n", path, value));
        }
        if !locks.is_empty() {
            db.push_str("[locks]\n");
            for lock in &locks {
                db.push_str(lock);
                db.push('\n');
            }
        }

        write_atomic(output, &db, 0o644)?;
        Ok(())
    }
}

fn sorted_files(dir: &Path) -> Result<Vec<PathBuf>, PolicyError> {
    let entries = match fs::read_dir(dir) {
        Ok(e) => e,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(PolicyError::io(dir, e)),
    };
    let mut files = Vec::new();
    for entry in entries {
        let path = entry.map_err(|e| PolicyError::io(dir, e))?.path();
        if path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

fn parse_keyfile(content: &str, values: &mut BTreeMap<String, String>) -> Result<(), String> {
    let mut section: Option<&str> = None;
    for (n, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some(name) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
            section = Some(name.trim_matches('/'));
            continue;
        }
        let (key, value) = line
            .split_once('=')
            .ok_or_else(|| format!("line {}: expected key=value", n + 1))?;
        let dir = section.ok_or_else(|| format!("line {}: key outside of a group", n + 1))?;
        values.insert(format!("/{}/{}", dir, key.trim()), value.trim().to_string());
    }
    Ok(())
}

pub struct DconfApplier {
    root: PathBuf,
    compiler: Arc<dyn DbCompiler>,
    cross_scope: CrossScope,
}

impl DconfApplier {
    pub fn new(root: impl Into<PathBuf>, compiler: Arc<dyn DbCompiler>) -> Self {
        Self {
            root: root.into(),
            compiler,
            cross_scope: CrossScope::default_for(Domain::Dconf),
        }
    }

    pub fn with_cross_scope(mut self, cross_scope: CrossScope) -> Self {
        self.cross_scope = cross_scope;
        self
    }

    pub fn db_name(target: &Target) -> String {
        if target.is_machine() {
            MACHINE_DB.to_string()
        } else {
            format!("{}{}", USER_DB_PREFIX, target.file_stem())
        }
    }

    /// User profiles are named after the user, so a user cannot take the
    /// greeter's profile.
    fn check_target(target: &Target) -> Result<(), PolicyError> {
        if !target.is_machine() && target.file_stem() == GREETER_PROFILE {
            return Err(PolicyError::InvalidTarget {
                target: target.name().to_string(),
                reason: format!("'{}' is the greeter profile", GREETER_PROFILE),
            });
        }
        Ok(())
    }

    fn profile_path(&self, target: &Target) -> PathBuf {
        let name = if target.is_machine() {
            GREETER_PROFILE.to_string()
        } else {
            target.file_stem()
        };
        self.root.join("profile").join(name)
    }

    fn profile(&self, target: &Target, db: &str) -> String {
        let mut profile = String::from("user-db:user\n");
        let system = |name: &str| format!("system-db:{}\n", name);

        if target.is_machine() {
            profile.push_str(&system(db));
            return profile;
        }
        // Locks in a database shadow the databases listed before it.
        match self.cross_scope {
            CrossScope::None => profile.push_str(&system(db)),
            CrossScope::MachineOverUser => {
                profile.push_str(&system(db));
                profile.push_str(&system(MACHINE_DB));
            }
            CrossScope::UserOverMachine => {
                profile.push_str(&system(MACHINE_DB));
                profile.push_str(&system(db));
            }
        }
        profile
    }
}

impl Applier for DconfApplier {
    fn domain(&self) -> Domain {
        Domain::Dconf
    }

    fn apply(&self, target: &Target, changes: &DomainChanges) -> Result<(), PolicyError> {
        Self::check_target(target)?;
        let db = Self::db_name(target);
        let db_dir = self.root.join("db").join(format!("{}.d", db));
        let compiled = self.root.join("db").join(&db);
        let profile_path = self.profile_path(target);

        let desired = changes.desired();
        if desired.is_empty() {
            remove_dir_all_if_exists(&db_dir)?;
            remove_file_if_exists(&compiled)?;
            remove_file_if_exists(&profile_path)?;
            if !changes.removes.is_empty() {
                info!(db = %db, removed = changes.removes.len(), "Removed desktop policy");
            }
            return Ok(());
        }

        let (keyfile, locks) = render(&desired)?;

        write_atomic(&db_dir.join("policy"), &keyfile, 0o644)?;
        write_atomic(&db_dir.join("locks").join("policy"), &locks, 0o644)?;
        // An earlier failed compile can leave unchanged keyfiles behind a stale database.
        debug!("Compiling dconf database {}", compiled.display());
        self.compiler.compile(&db_dir, &compiled)?;
        write_atomic(&profile_path, &self.profile(target, &db), 0o644)?;

        info!(
            db = %db,
            written = changes.writes.len(),
            removed = changes.removes.len(),
            "Applied desktop policy"
        );
        Ok(())
    }
}

/// Keyfile and locks content for the desired entries.
fn render(entries: &[&Entry]) -> Result<(String, String), PolicyError> {
    let mut groups: BTreeMap<&str, Vec<(&str, String)>> = BTreeMap::new();
    let mut locks = Vec::new();

    for entry in entries {
        let (dir, name) = split_key(entry)?;
        locks.push(format!("/{}/{}", dir, name));
        if entry.disabled {
            continue;
        }
        let value = normalize(entry)?;
        groups.entry(dir).or_default().push((name, value));
    }

    let mut keyfile = String::new();
    for (dir, keys) in &groups {
        if !keyfile.is_empty() {
            keyfile.push('\n');
        }
        keyfile.push_str(&format!("[{}]\n", dir));
        for (name, value) in keys {
            keyfile.push_str(&format!("{}={}\n", name, value));
        }
    }

    locks.sort();
    let mut locks = locks.join("\n");
    locks.push('\n');
    Ok((keyfile, locks))
}

fn split_key(entry: &Entry) -> Result<(&str, &str), PolicyError> {
    if !KEY_PATH.is_match(&entry.key) {
        return Err(invalid(entry, "not a dconf key path"));
    }
    let key = entry.key.trim_start_matches('/');
    key.rsplit_once('/')
        .ok_or_else(|| invalid(entry, "not a dconf key path"))
}

/// GVariant text for the entry value, according to the type in `meta`.
/// Entries without a type are written as given.
pub fn normalize(entry: &Entry) -> Result<String, PolicyError> {
    if entry.value.is_empty() && entry.meta.as_deref() != Some("as") {
        return Err(invalid(entry, "empty value"));
    }
    match entry.meta.as_deref() {
        None => Ok(entry.value.to_string().trim().to_string()),
        Some(ty) if ty.starts_with('a') => {
            let single = entry.value.to_string();
            let single = single.trim();
            if single.starts_with('[') && single.ends_with(']') {
                return Ok(single.to_string());
            }
            let items = entry
                .value
                .items()
                .iter()
                .map(|item| scalar(entry, &ty[1..], item))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(format!("[{}]", items.join(", ")))
        }
        Some(ty) => scalar(entry, ty, entry.value.to_string().trim()),
    }
}

fn scalar(entry: &Entry, ty: &str, raw: &str) -> Result<String, PolicyError> {
    match ty {
        "s" => Ok(quote(raw)),
        "b" => match raw.to_ascii_lowercase().as_str() {
            "true" | "yes" | "1" => Ok("true".to_string()),
            "false" | "no" | "0" => Ok("false".to_string()),
            _ => Err(invalid(entry, &format!("{:?} is not a boolean", raw))),
        },
        "i" | "n" | "x" | "y" => raw
            .parse::<i64>()
            .map(|n| n.to_string())
            .map_err(|_| invalid(entry, &format!("{:?} is not an integer", raw))),
        "u" | "q" | "t" => raw
            .parse::<u64>()
            .map(|n| n.to_string())
            .map_err(|_| invalid(entry, &format!("{:?} is not an unsigned integer", raw))),
        "d" => raw
            .parse::<f64>()
            .ok()
            .filter(|f| f.is_finite())
            .map(|f| format!("{:?}", f))
            .ok_or_else(|| invalid(entry, &format!("{:?} is not a double", raw))),
        _ => Ok(raw.to_string()),
    }
}

fn quote(raw: &str) -> String {
    if raw.len() >= 2 && raw.starts_with('\'') && raw.ends_with('\'') {
        return raw.to_string();
    }
    format!("'{}'", raw.replace('\\', "\\\\").replace('\'', "\\'"))
}

fn invalid(entry: &Entry, reason: &str) -> PolicyError {
    PolicyError::InvalidEntry {
        domain: Domain::Dconf,
        key: entry.key.clone(),
        reason: reason.to_string(),
    }
}
