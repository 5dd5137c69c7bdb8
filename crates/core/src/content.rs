//! Structured value types for free-form content columns.
//!
//! Attachment lists and resource metadata are stored as JSON text. These
//! types are the only way in and out of that representation, so malformed
//! blobs are rejected at the boundary instead of travelling further.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

// ---------------------------------------------------------------------------
// AttachmentList
// ---------------------------------------------------------------------------

/// Ordered, duplicate-free list of attachment paths.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AttachmentList(Vec<String>);

impl AttachmentList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a path at the end. A path already in the list is moved to the
    /// end rather than duplicated.
    pub fn push(&mut self, path: impl Into<String>) {
        let path = path.into();
        self.0.retain(|p| *p != path);
        self.0.push(path);
    }

    /// Remove a path. Returns `true` if it was present.
    pub fn remove(&mut self, path: &str) -> bool {
        let before = self.0.len();
        self.0.retain(|p| p != path);
        self.0.len() != before
    }

    pub fn contains(&self, path: &str) -> bool {
        self.0.iter().any(|p| p == path)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    /// Parse the stored JSON form. An empty string is an empty list.
    pub fn from_json(raw: &str) -> Result<Self, CoreError> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }

        let paths: Vec<String> = serde_json::from_str(raw).map_err(|e| {
            CoreError::Validation(format!("Could not parse attachments list: {e}"))
        })?;

        let mut list = Self::default();
        for path in paths {
            if path.trim().is_empty() {
                return Err(CoreError::Validation(
                    "Attachment paths must not be empty".into(),
                ));
            }
            list.push(path);
        }
        Ok(list)
    }

    pub fn to_json(&self) -> String {
        serde_json::Value::from(self.0.clone()).to_string()
    }
}

// ---------------------------------------------------------------------------
// Metadata
// ---------------------------------------------------------------------------

/// Key/value metadata attached to a resource.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Metadata(BTreeMap<String, String>);

impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.0.insert(key.into(), value.into())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Parse the stored JSON form: an object whose values are all strings.
    pub fn from_json(raw: &str) -> Result<Self, CoreError> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }

        let value: serde_json::Value = serde_json::from_str(raw)
            .map_err(|e| CoreError::Validation(format!("Could not parse metadata: {e}")))?;

        let serde_json::Value::Object(map) = value else {
            return Err(CoreError::Validation(
                "Metadata must be a JSON object".into(),
            ));
        };

        let mut entries = BTreeMap::new();
        for (key, val) in map {
            match val {
                serde_json::Value::String(s) => {
                    entries.insert(key, s);
                }
                other => {
                    return Err(CoreError::Validation(format!(
                        "Metadata value for '{key}' must be a string, got {other}"
                    )));
                }
            }
        }
        Ok(Self(entries))
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(&self.0).unwrap_or_else(|_| "{}".to_string())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
