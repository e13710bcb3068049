use serde::{Deserialize, Serialize};
use std::fmt;

/// Payload of an entry: a single string or an ordered list of strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Single(String),
    List(Vec<String>),
}

impl Value {
    /// Individual items, a single value counting as a one-item list.
    /// Multi-line single values are split on newlines, the way list
    /// policies are typed in directory editors.
    pub fn items(&self) -> Vec<String> {
        match self {
            Value::Single(s) => s
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(str::to_string)
                .collect(),
            Value::List(v) => v.clone(),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Value::Single(s) => s.trim().is_empty(),
            Value::List(v) => v.is_empty(),
        }
    }
}

impl Default for Value {
    fn default() -> Self {
        Value::Single(String::new())
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Single(s) => f.write_str(s),
            Value::List(v) => f.write_str(&v.join(", ")),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Single(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Single(s)
    }
}

impl From<Vec<String>> for Value {
    fn from(v: Vec<String>) -> Self {
        Value::List(v)
    }
}

/// How an entry merges with entries of the same key in lower-precedence GPOs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    /// The highest-precedence entry wins, the others are shadowed.
    #[default]
    Override,
    /// Values of every GPO are accumulated in precedence order.
    Append,
}

fn is_default_strategy(s: &Strategy) -> bool {
    *s == Strategy::Override
}

fn is_false(b: &bool) -> bool {
    !*b
}

/// One policy setting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub key: String,
    #[serde(default)]
    pub value: Value,
    #[serde(default, skip_serializing_if = "is_false")]
    pub disabled: bool,
    /// Domain specific auxiliary data, e.g. the GVariant type of a dconf key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<String>,
    #[serde(default, skip_serializing_if = "is_default_strategy")]
    pub strategy: Strategy,
}

impl Entry {
    pub fn new(key: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            disabled: false,
            meta: None,
            strategy: Strategy::Override,
        }
    }

    /// An explicit "unset this key" marker.
    pub fn disabled(key: impl Into<String>) -> Self {
        Self {
            disabled: true,
            ..Self::new(key, Value::default())
        }
    }

    pub fn with_meta(mut self, meta: impl Into<String>) -> Self {
        self.meta = Some(meta.into());
        self
    }

    pub fn with_strategy(mut self, strategy: Strategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn is_append(&self) -> bool {
        self.strategy == Strategy::Append
    }
}
