// packages/runner/src/tools/template.rs
//! Command templates with `{placeholder}` substitution

use serde::{Deserialize, Serialize};
use std::fmt;

/// Placeholder bindings used to render templates
#[derive(Debug, Clone, Default)]
pub struct Vars {
    pairs: Vec<(String, String)>,
}

impl Vars {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: &str, value: impl ToString) -> Self {
        self.set(key, value);
        self
    }

    pub fn set(&mut self, key: &str, value: impl ToString) {
        let value = value.to_string();
        match self.pairs.iter_mut().find(|(k, _)| k == key) {
            Some(pair) => pair.1 = value,
            None => self.pairs.push((key.to_string(), value)),
        }
    }

    /// Copy with every value single-quoted for `/bin/sh`
    pub fn quoted(&self) -> Vars {
        Vars {
            pairs: self
                .pairs
                .iter()
                .map(|(k, v)| (k.clone(), sh_quote(v)))
                .collect(),
        }
    }

    /// Substitute every known `{key}` in `text`; unknown placeholders stay
    pub fn expand(&self, text: &str) -> String {
        let mut out = text.to_string();
        for (key, value) in &self.pairs {
            out = out.replace(&format!("{{{}}}", key), value);
        }
        out
    }
}

/// Quote `value` as one `/bin/sh` word
pub fn sh_quote(value: &str) -> String {
    if !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./:=@%+,".contains(c))
    {
        return value.to_string();
    }
    format!("'{}'", value.replace('\'', "'\\''"))
}

/// A whitespace-separated command line with placeholders
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommandTemplate(String);

impl CommandTemplate {
    pub fn new(template: impl Into<String>) -> Self {
        Self(template.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Render into an argument vector. Splitting happens before
    /// substitution, so a value containing spaces stays one argument.
    pub fn render(&self, vars: &Vars) -> Vec<String> {
        self.0.split_whitespace().map(|arg| vars.expand(arg)).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl From<&str> for CommandTemplate {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl fmt::Display for CommandTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
