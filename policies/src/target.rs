use std::fmt;

use crate::error::PolicyError;

/// Whose policy is resolved: a user session or a machine.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Target {
    name: String,
    is_machine: bool,
}

impl Target {
    /// Validates the name, which ends up in cache and backend file names.
    pub fn new(name: impl Into<String>, is_machine: bool) -> Result<Self, PolicyError> {
        let name = name.into();
        validate_name(&name)?;
        Ok(Self { name, is_machine })
    }

    pub fn user(name: impl Into<String>) -> Result<Self, PolicyError> {
        Self::new(name, false)
    }

    pub fn machine(name: impl Into<String>) -> Result<Self, PolicyError> {
        Self::new(name, true)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_machine(&self) -> bool {
        self.is_machine
    }

    /// Name safe to embed in a file name.
    pub fn file_stem(&self) -> String {
        sanitize(&self.name)
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_machine {
            write!(f, "machine {}", self.name)
        } else {
            write!(f, "user {}", self.name)
        }
    }
}

pub(crate) fn validate_name(name: &str) -> Result<(), PolicyError> {
    let invalid = |reason: &str| PolicyError::InvalidTarget {
        target: name.to_string(),
        reason: reason.to_string(),
    };

    if name.is_empty() {
        return Err(invalid("name cannot be empty"));
    }
    if name.starts_with('.') {
        return Err(invalid("name cannot start with '.'"));
    }
    if name.contains('/') || name.contains('\\') {
        return Err(invalid("path separators are not allowed"));
    }
    if name.chars().any(|c| c.is_control() || c.is_whitespace()) {
        return Err(invalid("whitespace and control characters are not allowed"));
    }
    Ok(())
}

/// Replaces every character outside `[A-Za-z0-9._-]` with `_`.
pub(crate) fn sanitize(s: &str) -> String {
    s.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_user_and_host_names() {
        assert!(Target::user("alice@example.com").is_ok());
        assert!(Target::machine("host-01.example.com").is_ok());
    }

    #[test]
    fn rejects_names_escaping_the_cache_directory() {
        for bad in ["", "..", ".hidden", "a/b", "a\\b", "a b", "a\nb"] {
            assert!(
                matches!(Target::user(bad), Err(PolicyError::InvalidTarget { .. })),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn file_stem_is_sanitized() {
        let t = Target::user("alice@example.com").unwrap();
        assert_eq!(t.file_stem(), "alice_example.com");
    }
}
