//! Named backend options.
//!
//! Options arrive as a flat string map (`key=value` pairs from a CLI or
//! config file). Each backend declares the keys it recognizes and reads
//! them through the typed getters; anything else is rejected.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::ValidationError;

/// Backend-specific settings, keyed by option name.
///
/// # Examples
///
/// ```
/// use fastcrud::storage::StorageOptions;
///
/// let opts: StorageOptions = "base_dir=/tmp/db, sync_on_write=false".parse().unwrap();
/// assert_eq!(opts.get_bool("sync_on_write").unwrap(), Some(false));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StorageOptions {
    values: BTreeMap<String, String>,
}

impl StorageOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style setter.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    /// Parses a single `key=value` pair and adds it.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOption` if there is no `=` or the key is empty.
    pub fn insert_pair(&mut self, pair: &str) -> Result<(), ValidationError> {
        let Some((key, value)) = pair.split_once('=') else {
            return Err(ValidationError::InvalidOption {
                key: pair.trim().to_string(),
                value: String::new(),
                reason: "expected key=value".to_string(),
            });
        };
        let key = key.trim();
        if key.is_empty() {
            return Err(ValidationError::InvalidOption {
                key: String::new(),
                value: value.to_string(),
                reason: "option name cannot be empty".to_string(),
            });
        }
        self.insert(key, value.trim());
        Ok(())
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    /// Fails on the first key not in `known`.
    ///
    /// # Errors
    ///
    /// Returns `UnknownOption` naming the offending key.
    pub fn ensure_known(&self, known: &[&str]) -> Result<(), ValidationError> {
        match self.keys().find(|k| !known.contains(k)) {
            Some(key) => Err(ValidationError::UnknownOption {
                key: key.to_string(),
            }),
            None => Ok(()),
        }
    }

    pub fn get_path(&self, key: &str) -> Option<PathBuf> {
        self.get(key).map(PathBuf::from)
    }

    /// Reads a boolean (`true`/`false`/`1`/`0`/`yes`/`no`).
    pub fn get_bool(&self, key: &str) -> Result<Option<bool>, ValidationError> {
        let Some(raw) = self.get(key) else {
            return Ok(None);
        };
        match raw.to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Ok(Some(true)),
            "false" | "0" | "no" | "off" => Ok(Some(false)),
            _ => Err(invalid(key, raw, "expected true or false")),
        }
    }

    pub fn get_u64(&self, key: &str) -> Result<Option<u64>, ValidationError> {
        self.get_parsed(key, "expected a non-negative integer")
    }

    fn get_parsed<V: FromStr>(&self, key: &str, reason: &str) -> Result<Option<V>, ValidationError> {
        self.get(key)
            .map(|raw| raw.parse::<V>().map_err(|_| invalid(key, raw, reason)))
            .transpose()
    }
}

fn invalid(key: &str, value: &str, reason: &str) -> ValidationError {
    ValidationError::InvalidOption {
        key: key.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

impl FromStr for StorageOptions {
    type Err = ValidationError;

    /// Comma-separated `key=value` pairs.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut options = Self::new();
        for pair in s.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            options.insert_pair(pair)?;
        }
        Ok(options)
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for StorageOptions {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut options = Self::new();
        for (k, v) in iter {
            options.insert(k, v);
        }
        options
    }
}
