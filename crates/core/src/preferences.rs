//! Typed view of a user's preference blob.
//!
//! Preferences are persisted as one JSON object per user. The `history` key
//! holds the recency lists; every other key belongs to other features and is
//! carried through untouched.

use std::collections::BTreeMap;

use serde_json::{Map, Value};

use crate::entity::EntityType;
use crate::error::CoreError;
use crate::types::DbId;

/// Preference key holding the recency lists.
pub const HISTORY_KEY: &str = "history";

// ---------------------------------------------------------------------------
// RecencyHistory
// ---------------------------------------------------------------------------

/// Per-type recency lists, each ordered oldest first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecencyHistory(BTreeMap<EntityType, Vec<DbId>>);

impl RecencyHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ids tracked for a type, oldest first.
    pub fn ids(&self, entity_type: EntityType) -> &[DbId] {
        self.0.get(&entity_type).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn ids_mut(&mut self, entity_type: EntityType) -> &mut Vec<DbId> {
        self.0.entry(entity_type).or_default()
    }

    /// Replace a type's list. An empty list removes the type.
    pub fn set(&mut self, entity_type: EntityType, ids: Vec<DbId>) {
        if ids.is_empty() {
            self.0.remove(&entity_type);
        } else {
            self.0.insert(entity_type, ids);
        }
    }

    pub fn remove(&mut self, entity_type: EntityType) -> Option<Vec<DbId>> {
        self.0.remove(&entity_type)
    }

    pub fn clear(&mut self) {
        self.0.clear();
    }

    /// Tracked types in stable order.
    pub fn types(&self) -> impl Iterator<Item = EntityType> + '_ {
        self.0.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (EntityType, &[DbId])> {
        self.0.iter().map(|(t, ids)| (*t, ids.as_slice()))
    }

    pub fn is_empty(&self) -> bool {
        self.0.values().all(Vec::is_empty)
    }

    /// Drop empty lists so that equality and serialization ignore them.
    fn compact(&mut self) {
        self.0.retain(|_, ids| !ids.is_empty());
    }

    fn from_value(value: Value) -> Result<Self, CoreError> {
        let Value::Object(map) = value else {
            return Err(CoreError::Validation(
                "Preference 'history' must be an object".into(),
            ));
        };

        let mut history = Self::default();
        for (key, entries) in map {
            let entity_type = match key.parse::<EntityType>() {
                Ok(t) => t,
                Err(_) => {
                    tracing::warn!(key = %key, "Dropping history for unknown entity type");
                    continue;
                }
            };

            let Value::Array(items) = entries else {
                return Err(CoreError::Validation(format!(
                    "History for '{key}' must be an array of ids"
                )));
            };

            let list = history.ids_mut(entity_type);
            for item in items {
                let id = item.as_i64().ok_or_else(|| {
                    CoreError::Validation(format!("History for '{key}' contains a non-integer id"))
                })?;
                // Legacy blobs may hold duplicates; keep the newest occurrence.
                list.retain(|existing| *existing != id);
                list.push(id);
            }
        }
        history.compact();
        Ok(history)
    }

    fn to_value(&self) -> Value {
        let map: Map<String, Value> = self
            .0
            .iter()
            .filter(|(_, ids)| !ids.is_empty())
            .map(|(t, ids)| (t.as_str().to_string(), Value::from(ids.clone())))
            .collect();
        Value::Object(map)
    }
}

// ---------------------------------------------------------------------------
// UserPreferences
// ---------------------------------------------------------------------------

/// A user's preference state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UserPreferences {
    pub history: RecencyHistory,
    /// Preference keys not owned by this crate.
    pub extra: Map<String, Value>,
}

impl UserPreferences {
    /// Parse a stored preference blob. `null` is an empty preference set.
    pub fn from_value(value: Value) -> Result<Self, CoreError> {
        let mut map = match value {
            Value::Null => return Ok(Self::default()),
            Value::Object(map) => map,
            other => {
                return Err(CoreError::Validation(format!(
                    "User preferences must be a JSON object, got {}",
                    json_kind(&other)
                )));
            }
        };

        let history = match map.remove(HISTORY_KEY) {
            None | Some(Value::Null) => RecencyHistory::default(),
            Some(raw) => RecencyHistory::from_value(raw)?,
        };

        Ok(Self {
            history,
            extra: map,
        })
    }

    /// Serialize back to the stored blob.
    pub fn to_value(&self) -> Value {
        let mut map = self.extra.clone();
        if !self.history.is_empty() {
            map.insert(HISTORY_KEY.to_string(), self.history.to_value());
        }
        Value::Object(map)
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;

    #[test]
    fn null_blob_is_empty() {
        let prefs = UserPreferences::from_value(Value::Null).unwrap();
        assert!(prefs.history.is_empty());
        assert!(prefs.extra.is_empty());
    }

    #[test]
    fn parses_wire_and_legacy_keys() {
        let prefs = UserPreferences::from_value(json!({
            "history": {
                "document": [1, 2, 3],
                "Castle\\Client": [9]
            }
        }))
        .unwrap();
        assert_eq!(prefs.history.ids(EntityType::Document), &[1, 2, 3]);
        assert_eq!(prefs.history.ids(EntityType::Client), &[9]);
    }

    #[test]
    fn unknown_types_are_dropped() {
        let prefs = UserPreferences::from_value(json!({
            "history": { "Castle\\Workflow": [1], "tag": [4] }
        }))
        .unwrap();
        assert_eq!(prefs.history.types().collect::<Vec<_>>(), vec![EntityType::Tag]);
    }

    #[test]
    fn duplicate_ids_keep_newest_position() {
        let prefs = UserPreferences::from_value(json!({
            "history": { "document": [1, 2, 1] }
        }))
        .unwrap();
        assert_eq!(prefs.history.ids(EntityType::Document), &[2, 1]);
    }

    #[test]
    fn malformed_blobs_are_rejected() {
        assert_matches!(
            UserPreferences::from_value(json!([1, 2])),
            Err(CoreError::Validation(_))
        );
        assert_matches!(
            UserPreferences::from_value(json!({ "history": { "document": "1,2" } })),
            Err(CoreError::Validation(_))
        );
        assert_matches!(
            UserPreferences::from_value(json!({ "history": { "document": ["a"] } })),
            Err(CoreError::Validation(_))
        );
    }

    #[test]
    fn unrelated_keys_survive_a_round_trip() {
        let raw = json!({
            "theme": "dark",
            "history": { "discussion": [5] }
        });
        let prefs = UserPreferences::from_value(raw.clone()).unwrap();
        assert_eq!(prefs.extra.get("theme"), Some(&json!("dark")));
        assert_eq!(prefs.to_value(), raw);
    }

    #[test]
    fn empty_history_is_not_written() {
        let mut prefs = UserPreferences::default();
        prefs.history.set(EntityType::Document, vec![]);
        assert_eq!(prefs.to_value(), json!({}));
    }
}
