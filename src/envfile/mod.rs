//! Env file parsing
//!
//! Apps keep their secret environment as a `KEY=VALUE` text block
//! (`envs/<name>.env`). The parser turns it into an ordered mapping that
//! feeds two consumers: the env Secret (keys and values) and the
//! Deployment (keys only, referenced through `secretKeyRef`).
//!
//! Rules, applied per line:
//! - `KEY=` with nothing after the `=` yields `KEY` with an empty value
//! - otherwise the line must look like `key = value`; anything else is skipped
//! - `"quoted"` values are unwrapped and `\n` escapes become newlines
//! - `'quoted'` values are unwrapped verbatim
//! - the resulting value is trimmed
//!
//! A key declared twice keeps its first position and its last value.

use std::sync::OnceLock;

use regex::Regex;

use crate::{Error, Result};

fn line_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^\s*([A-Za-z0-9_.\-]+)\s*=\s*(.*)?\s*$").expect("env line pattern is valid")
    })
}

/// Ordered key/value pairs parsed from an env file
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EnvVars {
    entries: Vec<(String, String)>,
}

impl EnvVars {
    /// Empty mapping
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite; an existing key keeps its position
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    /// Value for a key
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Whether the key is present
    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Keys in declaration order
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    /// Entries in declaration order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when there are no entries
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Parse an env text block
pub fn parse(text: &str) -> EnvVars {
    let mut vars = EnvVars::new();
    for line in text.lines() {
        if let Some((key, value)) = parse_line(line) {
            vars.insert(key, value);
        }
    }
    vars
}

/// Keys of an env text block, in declaration order
pub fn env_keys(text: &str) -> Vec<String> {
    parse(text).keys().map(str::to_string).collect()
}

/// Parse and add `required` keys missing from the text as empty values
///
/// Fails with [`Error::EmptyEnv`] when nothing is left, `name` identifies the
/// env block in the error.
pub fn parse_with_required(text: &str, required: &[String], name: &str) -> Result<EnvVars> {
    let mut vars = parse(text);
    for key in required {
        if !vars.contains_key(key) {
            vars.insert(key.clone(), "");
        }
    }
    if vars.is_empty() {
        return Err(Error::EmptyEnv(name.to_string()));
    }
    Ok(vars)
}

fn parse_line(line: &str) -> Option<(String, String)> {
    // Bare `KEY=` declares an empty value rather than being skipped
    if line.find('=') == Some(line.len().saturating_sub(1)) && line.trim().len() >= 2 {
        let key = line[..line.len() - 1].trim();
        return Some((key.to_string(), String::new()));
    }

    let captures = line_pattern().captures(line)?;
    let key = captures.get(1)?.as_str();
    let raw = captures.get(2)?.as_str();
    if key.is_empty() || raw.is_empty() {
        return None;
    }

    let value = unquote(raw);
    Some((key.to_string(), value.trim().to_string()))
}

fn unquote(raw: &str) -> String {
    let quoted_with = |q: char| raw.len() > 2 && raw.starts_with(q) && raw.ends_with(q);
    if quoted_with('"') {
        raw[1..raw.len() - 1].replace("\\n", "\n")
    } else if quoted_with('\'') {
        raw[1..raw.len() - 1].to_string()
    } else {
        raw.to_string()
    }
}
