//! Field rules re-checked when a revision is restored.
//!
//! A restored value was valid when it was first written, but the rules (or
//! the surrounding data) may have moved on since. [`FieldRules`] holds the
//! per-field checks; storage-aware checks such as slug uniqueness wrap it.

use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;

use crate::content::{AttachmentList, Metadata};
use crate::entity::EntityRef;
use crate::error::CoreError;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Maximum length of `name` and `slug` values.
pub const MAX_NAME_LEN: usize = 255;

/// Slugs that would shadow routes.
pub const RESERVED_SLUGS: &[&str] = &["create", "destroy", "edit", "prune"];

/// Regex matching slugs: letters, digits, dashes and underscores.
static SLUG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]+$").expect("valid regex"));

// ---------------------------------------------------------------------------
// RestoreValidator
// ---------------------------------------------------------------------------

/// Checks whether a value may be written back to a field during restore.
#[async_trait]
pub trait RestoreValidator: Send + Sync {
    async fn validate(
        &self,
        entity: EntityRef,
        field: &str,
        value: Option<&str>,
    ) -> Result<(), CoreError>;
}

/// Stateless per-field rules.
#[derive(Debug, Clone, Copy, Default)]
pub struct FieldRules;

impl FieldRules {
    /// Validate a value for the named field. Fields without a rule accept
    /// anything.
    pub fn check(&self, field: &str, value: Option<&str>) -> Result<(), CoreError> {
        match field {
            "name" => validate_name(value),
            "slug" => validate_slug(value),
            "content" => validate_required(field, value).map(|_| ()),
            "metadata" => match value {
                Some(raw) => Metadata::from_json(raw).map(|_| ()),
                None => Ok(()),
            },
            "attachments" => match value {
                Some(raw) => AttachmentList::from_json(raw).map(|_| ()),
                None => Ok(()),
            },
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl RestoreValidator for FieldRules {
    async fn validate(
        &self,
        _entity: EntityRef,
        field: &str,
        value: Option<&str>,
    ) -> Result<(), CoreError> {
        self.check(field, value)
    }
}

// ---------------------------------------------------------------------------
// Rules
// ---------------------------------------------------------------------------

fn validate_required<'a>(field: &str, value: Option<&'a str>) -> Result<&'a str, CoreError> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(CoreError::Validation(format!("The {field} field is required"))),
    }
}

/// Validate a name (required, at most 255 characters).
pub fn validate_name(value: Option<&str>) -> Result<(), CoreError> {
    let name = validate_required("name", value)?;
    if name.chars().count() > MAX_NAME_LEN {
        return Err(CoreError::Validation(format!(
            "The name may not be greater than {MAX_NAME_LEN} characters"
        )));
    }
    Ok(())
}

/// Validate a slug (required, alpha-dash, at most 255 characters, not a
/// reserved route word).
pub fn validate_slug(value: Option<&str>) -> Result<(), CoreError> {
    let slug = validate_required("slug", value)?;
    if slug.chars().count() > MAX_NAME_LEN {
        return Err(CoreError::Validation(format!(
            "The slug may not be greater than {MAX_NAME_LEN} characters"
        )));
    }
    if !SLUG_RE.is_match(slug) {
        return Err(CoreError::Validation(
            "The slug may only contain letters, numbers, dashes and underscores".into(),
        ));
    }
    if RESERVED_SLUGS.contains(&slug) {
        return Err(CoreError::Validation(format!(
            "The slug '{slug}' is reserved"
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn name_rules() {
        assert!(validate_name(Some("Runbook")).is_ok());
        assert_matches!(validate_name(Some("  ")), Err(CoreError::Validation(_)));
        assert_matches!(validate_name(None), Err(CoreError::Validation(_)));
        let long = "x".repeat(256);
        assert_matches!(validate_name(Some(&long)), Err(CoreError::Validation(_)));
        let max = "x".repeat(255);
        assert!(validate_name(Some(&max)).is_ok());
    }

    #[test]
    fn slug_rules() {
        assert!(validate_slug(Some("deploy-guide_2")).is_ok());
        assert_matches!(validate_slug(Some("has space")), Err(CoreError::Validation(_)));
        assert_matches!(
            validate_slug(Some("edit")),
            Err(CoreError::Validation(msg)) if msg.contains("reserved")
        );
        assert_matches!(validate_slug(None), Err(CoreError::Validation(_)));
    }

    #[test]
    fn content_is_required() {
        assert!(FieldRules.check("content", Some("body")).is_ok());
        assert_matches!(FieldRules.check("content", Some("")), Err(CoreError::Validation(_)));
    }

    #[test]
    fn structured_fields_must_parse() {
        assert!(FieldRules.check("metadata", Some(r#"{"k":"v"}"#)).is_ok());
        assert_matches!(FieldRules.check("metadata", Some("nope")), Err(CoreError::Validation(_)));
        assert!(FieldRules.check("attachments", Some(r#"["a.txt"]"#)).is_ok());
        assert_matches!(FieldRules.check("attachments", Some("{}")), Err(CoreError::Validation(_)));
    }

    #[test]
    fn unknown_fields_accept_anything() {
        assert!(FieldRules.check("description", None).is_ok());
    }
}
