//! Environment resolution with `.env` fallback.
//!
//! Values are read from the process environment first. Only when something
//! is missing is the local `key=value` file parsed, and then only the
//! still-missing keys are taken from it. The process environment itself is
//! never modified.

use std::cell::OnceCell;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use super::ConfigError;

/// Looks up a variable in the real process environment.
fn process_var(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

/// Resolves configuration keys from the environment and a fallback file.
pub struct EnvResolver<L = fn(&str) -> Option<String>> {
    lookup: L,
    env_file: PathBuf,
    file_values: OnceCell<HashMap<String, String>>,
}

impl EnvResolver {
    /// Resolver over the process environment with `env_file` as fallback.
    pub fn from_process(env_file: impl Into<PathBuf>) -> Self {
        Self::with_lookup(env_file, process_var)
    }
}

impl<L: Fn(&str) -> Option<String>> EnvResolver<L> {
    /// Resolver over a custom variable lookup.
    pub fn with_lookup(env_file: impl Into<PathBuf>, lookup: L) -> Self {
        Self {
            lookup,
            env_file: env_file.into(),
            file_values: OnceCell::new(),
        }
    }

    /// Fallback file this resolver reads.
    pub fn env_file(&self) -> &Path {
        &self.env_file
    }

    /// Resolve every key in `required`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingKeys`] listing, in the order given, the
    /// keys absent from both the environment and the fallback file.
    pub fn resolve(&self, required: &[&str]) -> Result<HashMap<String, String>, ConfigError> {
        let mut values = HashMap::new();
        let mut missing = Vec::new();
        for key in required {
            match self.from_env(key) {
                Some(value) => {
                    values.insert((*key).to_string(), value);
                }
                None => missing.push(*key),
            }
        }

        if !missing.is_empty() {
            let file = self.file_values();
            missing.retain(|key| match non_empty(file.get(*key).cloned()) {
                Some(value) => {
                    values.insert((*key).to_string(), value);
                    false
                }
                None => true,
            });
        }

        if missing.is_empty() {
            Ok(values)
        } else {
            Err(ConfigError::MissingKeys(
                missing.into_iter().map(str::to_string).collect(),
            ))
        }
    }

    /// Resolve an optional key through the same env-then-file chain.
    pub fn optional(&self, key: &str) -> Option<String> {
        self.from_env(key)
            .or_else(|| non_empty(self.file_values().get(key).cloned()))
    }

    fn from_env(&self, key: &str) -> Option<String> {
        non_empty((self.lookup)(key))
    }

    fn file_values(&self) -> &HashMap<String, String> {
        self.file_values
            .get_or_init(|| match parse_env_file(&self.env_file) {
                Ok(values) => values,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
                Err(e) => {
                    tracing::warn!(
                        path = %self.env_file.display(),
                        error = %e,
                        "failed to read env file, ignoring it"
                    );
                    HashMap::new()
                }
            })
    }
}

/// Parse a `key=value` file without touching the process environment.
///
/// Blank lines and lines starting with `#` are ignored. The first `=` splits
/// key from value and both sides are trimmed; the value is otherwise taken
/// literally. Lines without `=` or with an empty key are skipped with a
/// warning. The first assignment of a key wins.
///
/// # Errors
///
/// Returns the I/O error if the file cannot be read.
pub fn parse_env_file(path: &Path) -> Result<HashMap<String, String>, std::io::Error> {
    let contents = std::fs::read_to_string(path)?;
    Ok(parse_env_lines(path, &contents))
}

fn parse_env_lines(path: &Path, contents: &str) -> HashMap<String, String> {
    let mut values = HashMap::new();
    for (index, line) in contents.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        match line.split_once('=') {
            Some((key, value)) if !key.trim().is_empty() => {
                values
                    .entry(key.trim().to_string())
                    .or_insert_with(|| value.trim().to_string());
            }
            _ => {
                tracing::warn!(
                    path = %path.display(),
                    line = index + 1,
                    "skipping malformed env line"
                );
            }
        }
    }
    values
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
