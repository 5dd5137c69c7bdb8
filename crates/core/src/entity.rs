//! Entity kinds managed by the knowledge base and their search projections.
//!
//! [`EntityType`] is the closed set of content kinds that can be versioned,
//! searched, or appear in a user's recency history. [`SearchProjection`]
//! declares, per kind, which columns feed relevance scoring and with what
//! weight; the storage layer turns it into a query.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::types::DbId;

// ---------------------------------------------------------------------------
// Entity type constants
// ---------------------------------------------------------------------------

pub const ENTITY_CLIENT: &str = "client";
pub const ENTITY_COMMENT: &str = "comment";
pub const ENTITY_DISCUSSION: &str = "discussion";
pub const ENTITY_DOCUMENT: &str = "document";
pub const ENTITY_RESOURCE: &str = "resource";
pub const ENTITY_TAG: &str = "tag";
pub const ENTITY_USER: &str = "user";

/// Namespace prefix used by preference blobs written before entity types
/// had stable wire names (e.g. `Castle\Document`).
const LEGACY_NAMESPACE: &str = "Castle\\";

// ---------------------------------------------------------------------------
// EntityType
// ---------------------------------------------------------------------------

/// A kind of content object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Client,
    Comment,
    Discussion,
    Document,
    Resource,
    Tag,
    User,
}

impl EntityType {
    /// Every entity type, in declaration order.
    pub const ALL: [EntityType; 7] = [
        Self::Client,
        Self::Comment,
        Self::Discussion,
        Self::Document,
        Self::Resource,
        Self::Tag,
        Self::User,
    ];

    /// Return the stable wire/database representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Client => ENTITY_CLIENT,
            Self::Comment => ENTITY_COMMENT,
            Self::Discussion => ENTITY_DISCUSSION,
            Self::Document => ENTITY_DOCUMENT,
            Self::Resource => ENTITY_RESOURCE,
            Self::Tag => ENTITY_TAG,
            Self::User => ENTITY_USER,
        }
    }

    /// Name of the table holding rows of this type.
    pub fn table_name(&self) -> &'static str {
        match self {
            Self::Client => "clients",
            Self::Comment => "comments",
            Self::Discussion => "discussions",
            Self::Document => "docs",
            Self::Resource => "resources",
            Self::Tag => "tags",
            Self::User => "users",
        }
    }

    /// The legacy class-style name (`Castle\Document`).
    fn legacy_name(&self) -> &'static str {
        match self {
            Self::Client => "Client",
            Self::Comment => "Comment",
            Self::Discussion => "Discussion",
            Self::Document => "Document",
            Self::Resource => "Resource",
            Self::Tag => "Tag",
            Self::User => "User",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = CoreError;

    /// Parse a wire name, or a legacy class-style name such as
    /// `Castle\Document`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(short) = s.strip_prefix(LEGACY_NAMESPACE) {
            return Self::ALL
                .into_iter()
                .find(|t| t.legacy_name() == short)
                .ok_or_else(|| unknown_entity_type(s));
        }

        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| unknown_entity_type(s))
    }
}

fn unknown_entity_type(s: &str) -> CoreError {
    let valid: Vec<&str> = EntityType::ALL.iter().map(EntityType::as_str).collect();
    CoreError::Validation(format!(
        "Unknown entity type '{s}'. Valid types: {}",
        valid.join(", ")
    ))
}

// ---------------------------------------------------------------------------
// EntityRef
// ---------------------------------------------------------------------------

/// Identity of a single entity: its type plus primary key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityRef {
    pub entity_type: EntityType,
    pub id: DbId,
}

impl EntityRef {
    pub fn new(entity_type: EntityType, id: DbId) -> Self {
        Self { entity_type, id }
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.entity_type, self.id)
    }
}

// ---------------------------------------------------------------------------
// Search projections
// ---------------------------------------------------------------------------

/// A column contributing to relevance, with its weight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WeightedColumn {
    /// Qualified column, e.g. `resources.name`.
    pub column: &'static str,
    pub weight: u32,
}

/// A join needed to reach a weighted column on another table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchJoin {
    pub table: &'static str,
    /// Qualified column on the already-joined side.
    pub left: &'static str,
    /// Qualified column on `table`.
    pub right: &'static str,
}

/// Declares how rows of one entity type are scored against a search term.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchProjection {
    pub entity_type: EntityType,
    pub columns: Vec<WeightedColumn>,
    pub joins: Vec<SearchJoin>,
}

impl SearchProjection {
    /// Minimum relevance a row needs to count as a match: a quarter of the
    /// total column weight.
    pub fn threshold(&self) -> f64 {
        let total: u32 = self.columns.iter().map(|c| c.weight).sum();
        f64::from(total) / 4.0
    }

    /// Table whose rows are being ranked.
    pub fn base_table(&self) -> &'static str {
        self.entity_type.table_name()
    }
}

const fn col(column: &'static str, weight: u32) -> WeightedColumn {
    WeightedColumn { column, weight }
}

const fn join(table: &'static str, left: &'static str, right: &'static str) -> SearchJoin {
    SearchJoin { table, left, right }
}

/// Return the default search projection for an entity type.
pub fn default_projection(entity_type: EntityType) -> SearchProjection {
    let (columns, joins) = match entity_type {
        EntityType::Tag => (vec![col("tags.name", 10), col("tags.description", 5)], vec![]),
        EntityType::Document => (
            vec![col("docs.name", 10), col("docs.content", 5), col("tags.name", 4)],
            vec![
                join("docs_tags", "docs.id", "docs_tags.doc_id"),
                join("tags", "docs_tags.tag_id", "tags.id"),
            ],
        ),
        EntityType::Client => (
            vec![col("clients.name", 10), col("clients.slug", 5)],
            vec![],
        ),
        EntityType::Resource => (
            vec![
                col("resources.name", 10),
                col("resources.description", 6),
                col("resource_types.name", 5),
                col("clients.name", 7),
                col("clients.slug", 5),
            ],
            vec![
                join("clients", "resources.client_id", "clients.id"),
                join("resource_types", "resources.resource_type_id", "resource_types.id"),
            ],
        ),
        EntityType::Discussion => (
            vec![
                col("discussions.name", 10),
                col("discussions.content", 5),
                col("users.name", 4),
                col("tags.name", 4),
                col("tags.description", 2),
            ],
            vec![
                // The last editor, not the author, is the searchable user.
                join("users", "discussions.updated_by", "users.id"),
                join("discussions_tags", "discussions.id", "discussions_tags.discussion_id"),
                join("tags", "discussions_tags.tag_id", "tags.id"),
            ],
        ),
        EntityType::Comment => (
            vec![col("comments.content", 10), col("users.name", 4)],
            vec![join("users", "comments.user_id", "users.id")],
        ),
        EntityType::User => (vec![col("users.name", 10), col("users.email", 5)], vec![]),
    };

    SearchProjection {
        entity_type,
        columns,
        joins,
    }
}

/// Entity types searched by default, in result tie-break order.
pub const DEFAULT_SEARCH_ORDER: [EntityType; 7] = [
    EntityType::Tag,
    EntityType::Document,
    EntityType::Client,
    EntityType::Resource,
    EntityType::Discussion,
    EntityType::Comment,
    EntityType::User,
];

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
