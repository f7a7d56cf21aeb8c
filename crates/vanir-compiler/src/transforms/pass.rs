//! The pass contract
//!
//! Every lowering step implements `Pass` and transforms the IR in place.
//! Passes are configured once from their option strings before they run and
//! never see options meant for another pass.

use crate::context::Context;
use crate::error::CompileResult;
use crate::ir::{Function, Module};
use std::str::FromStr;

/// A transformation over IR
pub trait Pass: Send + Sync {
    /// Canonical name of this pass (for diagnostics)
    fn name(&self) -> &str;

    /// Apply pass-specific options. Unknown keys are ignored.
    fn configure(&mut self, options: &PassOptions) {
        options.warn_unknown(self.name(), &[]);
    }

    /// Transform one function in place
    fn run_on_function(&self, func: &mut Function, ctx: &Context) -> CompileResult<()>;

    /// Transform a whole module. The default runs every function in order.
    fn run_on_module(&self, module: &mut Module, ctx: &Context) -> CompileResult<()> {
        for func in module.functions_mut() {
            log::debug!("{}: running on '{}'", self.name(), func.name);
            self.run_on_function(func, ctx)?;
        }
        Ok(())
    }
}

/// Ordered, opaque option strings for one pass.
///
/// Entries are either `key=value` pairs or bare flags. When a key appears
/// more than once the last entry wins.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassOptions {
    entries: Vec<String>,
}

impl PassOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Split a comma or whitespace separated option string
    pub fn parse(text: &str) -> Self {
        text.split(|c: char| c == ',' || c.is_whitespace())
            .filter(|s| !s.is_empty())
            .collect()
    }

    pub fn push(&mut self, entry: impl Into<String>) {
        self.entries.push(entry.into());
    }

    /// Builder-style `push`
    pub fn with(mut self, entry: impl Into<String>) -> Self {
        self.push(entry);
        self
    }

    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries split into (key, value); bare flags have no value
    pub fn pairs(&self) -> impl Iterator<Item = (&str, Option<&str>)> {
        self.entries.iter().map(|entry| match entry.split_once('=') {
            Some((key, value)) => (key.trim(), Some(value.trim())),
            None => (entry.trim(), None),
        })
    }

    /// Value of the last `key=value` entry for `key`
    pub fn get(&self, key: &str) -> Option<&str> {
        self.pairs()
            .filter(|(k, _)| *k == key)
            .filter_map(|(_, v)| v)
            .last()
    }

    /// Whether `name` is present as a bare flag or as `name=true`
    pub fn flag(&self, name: &str) -> bool {
        self.pairs()
            .filter(|(k, _)| *k == name)
            .last()
            .is_some_and(|(_, v)| matches!(v, None | Some("true") | Some("1")))
    }

    /// Parse the value for `key`. A malformed value is logged and treated as absent.
    pub fn parse_value<T: FromStr>(&self, key: &str) -> Option<T> {
        let raw = self.get(key)?;
        match raw.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                log::warn!("ignoring malformed value '{}' for option '{}'", raw, key);
                None
            }
        }
    }

    /// Log every key that `pass` does not understand
    pub fn warn_unknown(&self, pass: &str, known: &[&str]) {
        for (key, _) in self.pairs() {
            if !known.contains(&key) {
                log::warn!("{}: ignoring unknown option '{}'", pass, key);
            }
        }
    }
}

impl<S: Into<String>> FromIterator<S> for PassOptions {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        PassOptions {
            entries: iter.into_iter().map(Into::into).collect(),
        }
    }
}
