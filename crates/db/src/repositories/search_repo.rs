//! Weighted column search over a [`SearchProjection`].
//!
//! Each search word is compared against every weighted column three ways:
//! exact match, prefix match, and substring match, case-insensitively. A
//! match contributes the column weight multiplied by 15, 5, or 1 in that
//! order. Rows scoring below the projection threshold are dropped.
//!
//! The query returns one row per join path, so an entity linked to several
//! matching tags appears several times; summing is left to the aggregator.

use async_trait::async_trait;
use castle_core::entity::{default_projection, EntityType, SearchProjection};
use castle_core::error::CoreError;
use castle_core::search::{search_terms, RawHit, SearchIndex};
use castle_core::types::DbId;

use crate::{storage_error, DbPool};

/// Score multiplier for an exact column match.
pub const EXACT_MULTIPLIER: u32 = 15;

/// Score multiplier for a prefix match.
pub const PREFIX_MULTIPLIER: u32 = 5;

/// Score multiplier for a substring match.
pub const CONTAINS_MULTIPLIER: u32 = 1;

// ---------------------------------------------------------------------------
// Query builder
// ---------------------------------------------------------------------------

/// Escape `LIKE` metacharacters so user input matches literally.
pub fn escape_like(word: &str) -> String {
    let mut escaped = String::with_capacity(word.len());
    for c in word.chars() {
        if matches!(c, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// `LIKE` patterns bound for one word: exact, prefix, substring.
pub fn word_patterns(word: &str) -> [String; 3] {
    let escaped = escape_like(word);
    [
        escaped.clone(),
        format!("{escaped}%"),
        format!("%{escaped}%"),
    ]
}

/// Build the relevance query for `word_count` words.
///
/// Placeholders are numbered word by word, three per word, in the order
/// returned by [`word_patterns`].
pub fn build_relevance_query(projection: &SearchProjection, word_count: usize) -> String {
    let base = projection.base_table();

    let mut terms = Vec::with_capacity(projection.columns.len() * word_count * 3);
    for word in 0..word_count {
        let first = word * 3 + 1;
        for column in &projection.columns {
            let multipliers = [EXACT_MULTIPLIER, PREFIX_MULTIPLIER, CONTAINS_MULTIPLIER];
            for (offset, multiplier) in multipliers.iter().enumerate() {
                terms.push(format!(
                    "CASE WHEN {} ILIKE ${} THEN {} ELSE 0 END",
                    column.column,
                    first + offset,
                    column.weight * multiplier
                ));
            }
        }
    }
    let score = if terms.is_empty() {
        "0".to_string()
    } else {
        terms.join(" + ")
    };

    let joins: String = projection
        .joins
        .iter()
        .map(|j| format!(" LEFT JOIN {} ON {} = {}", j.table, j.left, j.right))
        .collect();

    format!(
        "SELECT id, score FROM ( \
             SELECT {base}.id AS id, ({score})::float8 AS score \
             FROM {base}{joins} \
             WHERE {base}.deleted_at IS NULL \
         ) AS matches \
         WHERE score >= {threshold} \
         ORDER BY score DESC, id",
        threshold = projection.threshold(),
    )
}

// ---------------------------------------------------------------------------
// WeightedColumnIndex
// ---------------------------------------------------------------------------

/// [`SearchIndex`] for one entity type backed by its table.
#[derive(Debug, Clone)]
pub struct WeightedColumnIndex {
    pool: DbPool,
    projection: SearchProjection,
}

impl WeightedColumnIndex {
    pub fn new(pool: DbPool, projection: SearchProjection) -> Self {
        Self { pool, projection }
    }

    /// Index using the stock projection for `entity_type`.
    pub fn for_type(pool: DbPool, entity_type: EntityType) -> Self {
        Self::new(pool, default_projection(entity_type))
    }

    pub fn entity_type(&self) -> EntityType {
        self.projection.entity_type
    }
}

#[async_trait]
impl SearchIndex for WeightedColumnIndex {
    async fn query(&self, term: &str) -> Result<Vec<RawHit>, CoreError> {
        let Some(words) = search_terms(term) else {
            return Ok(Vec::new());
        };

        let query = build_relevance_query(&self.projection, words.len());
        let mut q = sqlx::query_as::<_, (DbId, f64)>(&query);
        for word in &words {
            for pattern in word_patterns(word) {
                q = q.bind(pattern);
            }
        }

        let rows = q
            .fetch_all(&self.pool)
            .await
            .map_err(storage_error("run weighted search"))?;

        tracing::debug!(
            entity_type = %self.projection.entity_type,
            words = words.len(),
            rows = rows.len(),
            "Weighted search finished"
        );
        Ok(rows.into_iter().map(|(id, score)| RawHit::new(id, score)).collect())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
