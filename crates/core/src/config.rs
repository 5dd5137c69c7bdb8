//! Runtime configuration for the audit, search, and recency components.
//!
//! Each component receives its slice of [`CastleConfig`] at construction;
//! nothing reads the environment after startup.

use std::collections::HashMap;

use crate::entity::EntityType;
use crate::error::CoreError;

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

/// Default number of entries kept per (user, entity type) recency list.
pub const DEFAULT_HISTORY_MAX_SIZE: usize = 5;

/// Default number of revision records kept per entity when cleanup is on.
pub const DEFAULT_REVISION_HISTORY_LIMIT: usize = 100;

/// Default number of revision records per history page.
pub const DEFAULT_REVISION_PAGE_SIZE: i64 = 10;

/// Default number of search results per page.
pub const DEFAULT_SEARCH_PAGE_SIZE: i64 = 20;

/// Maximum number of search results per page.
pub const MAX_SEARCH_PAGE_SIZE: i64 = 100;

// ---------------------------------------------------------------------------
// Component configs
// ---------------------------------------------------------------------------

/// Bounds for per-user recency lists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecencyConfig {
    pub default_max_size: usize,
    /// Overrides of `default_max_size` for individual entity types.
    pub per_type: HashMap<EntityType, usize>,
}

impl RecencyConfig {
    /// Maximum list length for the given entity type.
    pub fn max_size(&self, entity_type: EntityType) -> usize {
        self.per_type
            .get(&entity_type)
            .copied()
            .unwrap_or(self.default_max_size)
    }
}

impl Default for RecencyConfig {
    fn default() -> Self {
        Self {
            default_max_size: DEFAULT_HISTORY_MAX_SIZE,
            per_type: HashMap::new(),
        }
    }
}

/// Defaults applied to revision tracking policies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevisionConfig {
    pub history_limit: usize,
    pub page_size: i64,
}

impl Default for RevisionConfig {
    fn default() -> Self {
        Self {
            history_limit: DEFAULT_REVISION_HISTORY_LIMIT,
            page_size: DEFAULT_REVISION_PAGE_SIZE,
        }
    }
}

/// Pagination bounds for aggregated search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchConfig {
    pub default_page_size: i64,
    pub max_page_size: i64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_page_size: DEFAULT_SEARCH_PAGE_SIZE,
            max_page_size: MAX_SEARCH_PAGE_SIZE,
        }
    }
}

// ---------------------------------------------------------------------------
// CastleConfig
// ---------------------------------------------------------------------------

/// Top-level configuration, loaded from environment variables.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CastleConfig {
    pub recency: RecencyConfig,
    pub revisions: RevisionConfig,
    pub search: SearchConfig,
}

impl CastleConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                              | Default |
    /// |--------------------------------------|---------|
    /// | `CASTLE_HISTORY_MAX_SIZE`            | `5`     |
    /// | `CASTLE_HISTORY_MAX_SIZE_<TYPE>`     | unset   |
    /// | `CASTLE_REVISION_HISTORY_LIMIT`      | `100`   |
    /// | `CASTLE_REVISION_PAGE_SIZE`          | `10`    |
    /// | `CASTLE_SEARCH_PAGE_SIZE`            | `20`    |
    /// | `CASTLE_SEARCH_MAX_PAGE_SIZE`        | `100`   |
    ///
    /// `<TYPE>` is an upper-cased entity type, e.g.
    /// `CASTLE_HISTORY_MAX_SIZE_DOCUMENT`.
    pub fn from_env() -> Result<Self, CoreError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, CoreError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let default_max_size =
            parse_positive(&lookup, "CASTLE_HISTORY_MAX_SIZE", DEFAULT_HISTORY_MAX_SIZE)?;

        let mut per_type = HashMap::new();
        for entity_type in EntityType::ALL {
            let key = format!(
                "CASTLE_HISTORY_MAX_SIZE_{}",
                entity_type.as_str().to_uppercase()
            );
            if lookup(&key).is_some() {
                per_type.insert(entity_type, parse_positive(&lookup, &key, default_max_size)?);
            }
        }

        let history_limit = parse_positive(
            &lookup,
            "CASTLE_REVISION_HISTORY_LIMIT",
            DEFAULT_REVISION_HISTORY_LIMIT,
        )?;
        let revision_page_size = parse_positive(
            &lookup,
            "CASTLE_REVISION_PAGE_SIZE",
            DEFAULT_REVISION_PAGE_SIZE as usize,
        )?;
        let max_page_size = parse_positive(
            &lookup,
            "CASTLE_SEARCH_MAX_PAGE_SIZE",
            MAX_SEARCH_PAGE_SIZE as usize,
        )?;
        let default_page_size = parse_positive(
            &lookup,
            "CASTLE_SEARCH_PAGE_SIZE",
            DEFAULT_SEARCH_PAGE_SIZE as usize,
        )?;

        if default_page_size > max_page_size {
            return Err(CoreError::Config(format!(
                "CASTLE_SEARCH_PAGE_SIZE ({default_page_size}) must not exceed \
                 CASTLE_SEARCH_MAX_PAGE_SIZE ({max_page_size})"
            )));
        }

        Ok(Self {
            recency: RecencyConfig {
                default_max_size,
                per_type,
            },
            revisions: RevisionConfig {
                history_limit,
                page_size: revision_page_size as i64,
            },
            search: SearchConfig {
                default_page_size: default_page_size as i64,
                max_page_size: max_page_size as i64,
            },
        })
    }
}

/// Parse a strictly positive integer, falling back to `default` when unset.
fn parse_positive<F>(lookup: &F, key: &str, default: usize) -> Result<usize, CoreError>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(key) else {
        return Ok(default);
    };

    match raw.trim().parse::<usize>() {
        Ok(0) => Err(CoreError::Config(format!("{key} must be at least 1"))),
        Ok(value) => Ok(value),
        Err(e) => Err(CoreError::Config(format!(
            "{key} must be a positive integer, got '{raw}': {e}"
        ))),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
