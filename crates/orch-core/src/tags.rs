//! Tag mappings attached to every entity.

use std::collections::btree_map::{self, BTreeMap};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::{ErrorInfo, OrchError};

/// Mapping from tag key to nullable tag value. Order is not semantic; the
/// `BTreeMap` only keeps serialization deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Tags(BTreeMap<String, Option<String>>);

/// Length limits a backend imposes on tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagLimits {
    /// Maximum key length in characters.
    pub max_key_len: usize,
    /// Maximum value length in characters.
    pub max_value_len: usize,
}

impl Default for TagLimits {
    fn default() -> Self {
        Self {
            max_key_len: 256,
            max_value_len: 1024,
        }
    }
}

impl Tags {
    /// Creates an empty tag set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets `key` to `value`, returning the previous value.
    pub fn insert(
        &mut self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Option<Option<String>> {
        self.0.insert(key.into(), Some(value.into()))
    }

    /// Sets `key` with a null value.
    pub fn insert_null(&mut self, key: impl Into<String>) -> Option<Option<String>> {
        self.0.insert(key.into(), None)
    }

    /// Sets `key` from a JSON value: strings are stored verbatim, `null` as a
    /// null tag and everything else in its compact JSON rendering.
    pub fn insert_value(&mut self, key: impl Into<String>, value: &Value) {
        let rendered = match value {
            Value::Null => None,
            Value::String(text) => Some(text.clone()),
            other => Some(other.to_string()),
        };
        self.0.insert(key.into(), rendered);
    }

    /// Returns the value of `key`; `Some(None)` marks a null tag.
    pub fn get(&self, key: &str) -> Option<Option<&str>> {
        self.0.get(key).map(|value| value.as_deref())
    }

    /// Returns the non-null value of `key`.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(|value| value.as_deref())
    }

    /// True when `key` is present, null or not.
    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Removes `key`.
    pub fn remove(&mut self, key: &str) -> Option<Option<String>> {
        self.0.remove(key)
    }

    /// Overlays `other` on top of `self`; keys in `other` win.
    pub fn merge(&mut self, other: &Tags) {
        for (key, value) in &other.0 {
            self.0.insert(key.clone(), value.clone());
        }
    }

    /// Number of tags.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True when no tag is set.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates over `(key, value)` pairs in key order.
    pub fn iter(&self) -> btree_map::Iter<'_, String, Option<String>> {
        self.0.iter()
    }

    /// Fails when a key or value exceeds `limits`.
    pub fn validate(&self, limits: &TagLimits) -> Result<(), OrchError> {
        for (key, value) in &self.0 {
            if key.chars().count() > limits.max_key_len {
                return Err(OrchError::Invalid(
                    ErrorInfo::new("tags.key_length", "tag key exceeds backend limit")
                        .with_context("key", key.clone())
                        .with_context("limit", limits.max_key_len.to_string()),
                ));
            }
            if let Some(value) = value {
                if value.chars().count() > limits.max_value_len {
                    return Err(OrchError::Invalid(
                        ErrorInfo::new("tags.value_length", "tag value exceeds backend limit")
                            .with_context("key", key.clone())
                            .with_context("limit", limits.max_value_len.to_string()),
                    ));
                }
            }
        }
        Ok(())
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Tags {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(key, value)| (key.into(), Some(value.into())))
                .collect(),
        )
    }
}

impl IntoIterator for Tags {
    type Item = (String, Option<String>);
    type IntoIter = btree_map::IntoIter<String, Option<String>>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a Tags {
    type Item = (&'a String, &'a Option<String>);
    type IntoIter = btree_map::Iter<'a, String, Option<String>>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
