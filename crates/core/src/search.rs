//! Relevance search aggregated across entity types.
//!
//! Each searchable type is backed by an opaque [`SearchIndex`] that returns
//! raw `(id, score)` hits, possibly several per id when the entity matched
//! through more than one join path. [`RelevanceSearchAggregator`] sums those
//! hits within a type, keeps same-numbered ids of different types apart,
//! ranks everything by score and paginates the result.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use indexmap::IndexMap;
use serde::Serialize;

use crate::config::SearchConfig;
use crate::entity::EntityType;
use crate::error::CoreError;
use crate::types::DbId;

// ---------------------------------------------------------------------------
// Query helpers
// ---------------------------------------------------------------------------

/// Split user input into search terms.
///
/// - Splits on whitespace.
/// - Strips leading/trailing punctuation from each term.
/// - Drops empty terms.
///
/// Returns `None` if the input yields no usable terms.
pub fn search_terms(query: &str) -> Option<Vec<&str>> {
    let terms: Vec<&str> = query
        .split_whitespace()
        .map(|t| t.trim_matches(|c: char| !c.is_alphanumeric() && c != '_' && c != '-'))
        .filter(|t| !t.is_empty())
        .collect();

    if terms.is_empty() { None } else { Some(terms) }
}

/// Whether a search term has nothing to search for.
pub fn is_blank(term: &str) -> bool {
    term.trim().is_empty()
}

/// Clamp a user-provided limit to valid bounds. The result is at least 1
/// even when `max` is not.
pub fn clamp_limit(limit: Option<i64>, default: i64, max: i64) -> i64 {
    limit.unwrap_or(default).min(max).max(1)
}

/// Number of pages needed for `total` items, never less than 1.
pub fn page_count(total: i64, page_size: i64) -> i64 {
    let page_size = page_size.max(1);
    ((total + page_size - 1) / page_size).max(1)
}

/// Clamp a raw provider score into the non-negative finite range.
fn clamp_score(score: f64) -> f64 {
    if score.is_finite() && score > 0.0 { score } else { 0.0 }
}

// ---------------------------------------------------------------------------
// Capabilities
// ---------------------------------------------------------------------------

/// One raw match from a type's search index.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawHit {
    pub id: DbId,
    pub score: f64,
}

impl RawHit {
    pub fn new(id: DbId, score: f64) -> Self {
        Self { id, score }
    }
}

/// Full-text index for a single entity type.
#[async_trait]
pub trait SearchIndex: Send + Sync {
    /// Raw hits for `term`. The same id may appear more than once.
    async fn query(&self, term: &str) -> Result<Vec<RawHit>, CoreError>;
}

/// Decides which entity types a user may see in search results.
#[async_trait]
pub trait AccessPolicy: Send + Sync {
    async fn can_view(&self, user_id: DbId, entity_type: EntityType) -> Result<bool, CoreError>;
}

// ---------------------------------------------------------------------------
// Request / response
// ---------------------------------------------------------------------------

/// A ranked search result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredHit {
    pub entity_type: EntityType,
    pub id: DbId,
    pub score: f64,
}

/// Search parameters.
#[derive(Debug, Clone, Default)]
pub struct SearchQuery {
    pub term: String,
    /// 1-based page number.
    pub page: i64,
    pub page_size: Option<i64>,
}

impl SearchQuery {
    pub fn new(term: impl Into<String>) -> Self {
        Self {
            term: term.into(),
            page: 1,
            page_size: None,
        }
    }

    pub fn page(mut self, page: i64) -> Self {
        self.page = page;
        self
    }

    pub fn page_size(mut self, page_size: i64) -> Self {
        self.page_size = Some(page_size);
        self
    }
}

/// One page of merged search results.
#[derive(Debug, Clone, Serialize)]
pub struct SearchPage {
    pub items: Vec<ScoredHit>,
    /// Size of the merged set across all pages.
    pub total: i64,
    pub page: i64,
    pub page_size: i64,
    /// Types whose provider failed; their results are missing.
    pub failed_types: Vec<EntityType>,
}

impl SearchPage {
    fn empty(page: i64, page_size: i64) -> Self {
        Self {
            items: Vec::new(),
            total: 0,
            page,
            page_size,
            failed_types: Vec::new(),
        }
    }

    /// Whether some providers failed and the ranking is incomplete.
    pub fn is_partial(&self) -> bool {
        !self.failed_types.is_empty()
    }

    pub fn last_page(&self) -> i64 {
        page_count(self.total, self.page_size)
    }
}

// ---------------------------------------------------------------------------
// RelevanceSearchAggregator
// ---------------------------------------------------------------------------

/// Fans a query out to per-type indexes and merges the results.
pub struct RelevanceSearchAggregator {
    providers: Vec<(EntityType, Arc<dyn SearchIndex>)>,
    policy: Arc<dyn AccessPolicy>,
    config: SearchConfig,
}

impl RelevanceSearchAggregator {
    pub fn new(policy: Arc<dyn AccessPolicy>, config: SearchConfig) -> Self {
        Self {
            providers: Vec::new(),
            policy,
            config,
        }
    }

    /// Register the index for a type. Registration order breaks score ties.
    /// Registering a type again replaces its index in place.
    pub fn with_provider(mut self, entity_type: EntityType, index: Arc<dyn SearchIndex>) -> Self {
        match self.providers.iter_mut().find(|(t, _)| *t == entity_type) {
            Some(slot) => slot.1 = index,
            None => self.providers.push((entity_type, index)),
        }
        self
    }

    /// Types with a registered index, in tie-break order.
    pub fn searchable_types(&self) -> Vec<EntityType> {
        self.providers.iter().map(|(t, _)| *t).collect()
    }

    /// Run a search on behalf of `user_id`.
    ///
    /// A failing provider does not fail the call; its type is listed in
    /// [`SearchPage::failed_types`]. Access-policy errors do fail the call.
    pub async fn search(
        &self,
        user_id: DbId,
        query: &SearchQuery,
    ) -> Result<SearchPage, CoreError> {
        let page = query.page.max(1);
        let page_size = clamp_limit(
            query.page_size,
            self.config.default_page_size,
            self.config.max_page_size,
        );

        if is_blank(&query.term) {
            return Ok(SearchPage::empty(page, page_size));
        }
        let term = query.term.trim();

        let mut authorized = Vec::with_capacity(self.providers.len());
        for (entity_type, index) in &self.providers {
            if self.policy.can_view(user_id, *entity_type).await? {
                authorized.push((*entity_type, index.clone()));
            } else {
                tracing::debug!(user_id, %entity_type, "Skipping type the user cannot view");
            }
        }

        let results = futures::future::join_all(
            authorized
                .iter()
                .map(|(_, index)| async move { index.query(term).await }),
        )
        .await;

        let mut merged: Vec<ScoredHit> = Vec::new();
        let mut failed_types = Vec::new();
        for ((entity_type, _), result) in authorized.iter().zip(results) {
            match result {
                Ok(hits) => {
                    tracing::debug!(%entity_type, hits = hits.len(), "Search provider returned");
                    merged.extend(group_by_id(*entity_type, hits));
                }
                Err(e) => {
                    tracing::warn!(%entity_type, error = %e, "Search provider failed");
                    failed_types.push(*entity_type);
                }
            }
        }

        // Stable sort: equal scores keep provider and first-occurrence order.
        merged.sort_by(|a, b| b.score.total_cmp(&a.score));

        let total = merged.len() as i64;
        let offset = (page - 1).saturating_mul(page_size);
        let items: Vec<ScoredHit> = merged
            .into_iter()
            .skip(usize::try_from(offset).unwrap_or(usize::MAX))
            .take(page_size as usize)
            .collect();

        Ok(SearchPage {
            items,
            total,
            page,
            page_size,
            failed_types,
        })
    }

    /// Like [`search`](Self::search), bounded by an overall deadline.
    pub async fn search_with_deadline(
        &self,
        user_id: DbId,
        query: &SearchQuery,
        deadline: Duration,
    ) -> Result<SearchPage, CoreError> {
        match tokio::time::timeout(deadline, self.search(user_id, query)).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(user_id, ?deadline, "Search deadline exceeded");
                Err(CoreError::DeadlineExceeded(format!(
                    "search did not complete within {deadline:?}"
                )))
            }
        }
    }
}

/// Sum one provider's hits per id, in order of first occurrence.
fn group_by_id(entity_type: EntityType, hits: Vec<RawHit>) -> impl Iterator<Item = ScoredHit> {
    let mut scores: IndexMap<DbId, f64> = IndexMap::with_capacity(hits.len());
    for hit in hits {
        *scores.entry(hit.id).or_insert(0.0) += clamp_score(hit.score);
    }
    scores.into_iter().map(move |(id, score)| ScoredHit {
        entity_type,
        id,
        score,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{FailingIndex, StaticAccessPolicy, StaticSearchIndex};
    use assert_matches::assert_matches;

    fn provider(
        entity_type: EntityType,
        index: Arc<dyn SearchIndex>,
    ) -> (EntityType, Arc<dyn SearchIndex>) {
        (entity_type, index)
    }

    fn aggregator(providers: Vec<(EntityType, Arc<dyn SearchIndex>)>) -> RelevanceSearchAggregator {
        let mut agg = RelevanceSearchAggregator::new(
            Arc::new(StaticAccessPolicy::allow_all()),
            SearchConfig::default(),
        );
        for (t, index) in providers {
            agg = agg.with_provider(t, index);
        }
        agg
    }

    fn index(hits: &[(DbId, f64)]) -> Arc<StaticSearchIndex> {
        Arc::new(StaticSearchIndex::new(
            hits.iter().map(|(id, s)| RawHit::new(*id, *s)).collect(),
        ))
    }

    fn hit(entity_type: EntityType, id: DbId, score: f64) -> ScoredHit {
        ScoredHit { entity_type, id, score }
    }

    // -- search_terms ------------------------------------------------------

    #[test]
    fn terms_split_and_trim_punctuation() {
        assert_eq!(search_terms("  deploy, guide! "), Some(vec!["deploy", "guide"]));
        assert_eq!(search_terms("k8s-prod"), Some(vec!["k8s-prod"]));
        assert_eq!(search_terms(" ?! "), None);
    }

    #[test]
    fn clamp_limit_bounds() {
        assert_eq!(clamp_limit(None, 20, 100), 20);
        assert_eq!(clamp_limit(Some(0), 20, 100), 1);
        assert_eq!(clamp_limit(Some(500), 20, 100), 100);
        assert_eq!(clamp_limit(None, 20, 0), 1);
    }

    #[tokio::test]
    async fn zero_max_page_size_still_returns_results() {
        let agg = RelevanceSearchAggregator::new(
            Arc::new(StaticAccessPolicy::allow_all()),
            SearchConfig {
                default_page_size: 20,
                max_page_size: 0,
            },
        )
        .with_provider(EntityType::Tag, index(&[(1, 2.0), (2, 1.0)]));

        let page = agg.search(1, &SearchQuery::new("ops")).await.unwrap();

        assert_eq!(page.page_size, 1);
        assert_eq!(page.items, vec![hit(EntityType::Tag, 1, 2.0)]);
        assert_eq!(page.total, 2);
        assert_eq!(page.last_page(), 2);
    }

    #[test]
    fn page_count_never_divides_by_zero() {
        assert_eq!(page_count(0, 20), 1);
        assert_eq!(page_count(41, 20), 3);
        assert_eq!(page_count(5, 0), 5);
    }

    // -- merge -------------------------------------------------------------

    #[tokio::test]
    async fn same_id_sums_within_a_type_but_not_across_types() {
        let agg = aggregator(vec![
            provider(EntityType::Document, index(&[(1, 3.0), (1, 2.0)])),
            provider(EntityType::Tag, index(&[(1, 5.0)])),
        ]);

        let page = agg.search(1, &SearchQuery::new("runbook")).await.unwrap();

        assert_eq!(page.total, 2);
        assert_eq!(
            page.items,
            vec![hit(EntityType::Document, 1, 5.0), hit(EntityType::Tag, 1, 5.0)]
        );
    }

    #[tokio::test]
    async fn ties_follow_registration_order() {
        let tags = index(&[(9, 4.0)]);
        let docs = index(&[(3, 4.0)]);

        let a = aggregator(vec![
            provider(EntityType::Tag, tags.clone()),
            provider(EntityType::Document, docs.clone()),
        ]);
        let b = aggregator(vec![
            provider(EntityType::Document, docs),
            provider(EntityType::Tag, tags),
        ]);

        let first = a.search(1, &SearchQuery::new("x")).await.unwrap();
        let second = b.search(1, &SearchQuery::new("x")).await.unwrap();

        assert_eq!(first.items[0].entity_type, EntityType::Tag);
        assert_eq!(second.items[0].entity_type, EntityType::Document);

        let again = a.search(1, &SearchQuery::new("x")).await.unwrap();
        assert_eq!(first.items, again.items);
    }

    #[tokio::test]
    async fn ranks_by_score_descending() {
        let agg = aggregator(vec![
            provider(EntityType::Document, index(&[(1, 2.0), (2, 9.0)])),
            provider(EntityType::Client, index(&[(7, 5.0)])),
        ]);
        let page = agg.search(1, &SearchQuery::new("x")).await.unwrap();
        let ids: Vec<DbId> = page.items.iter().map(|h| h.id).collect();
        assert_eq!(ids, vec![2, 7, 1]);
    }

    #[tokio::test]
    async fn negative_and_nan_scores_count_as_zero() {
        let agg = aggregator(vec![(
            EntityType::Document,
            index(&[(1, -4.0), (1, 2.0), (2, f64::NAN)]),
        )]);
        let page = agg.search(1, &SearchQuery::new("x")).await.unwrap();
        assert_eq!(
            page.items,
            vec![hit(EntityType::Document, 1, 2.0), hit(EntityType::Document, 2, 0.0)]
        );
    }

    // -- pagination --------------------------------------------------------

    #[tokio::test]
    async fn paginates_merged_set() {
        let hits: Vec<(DbId, f64)> = (1..=5).map(|i| (i, 10.0 - i as f64)).collect();
        let agg = aggregator(vec![provider(EntityType::Document, index(&hits))]);

        let page = agg
            .search(1, &SearchQuery::new("x").page(2).page_size(2))
            .await
            .unwrap();
        assert_eq!(page.total, 5);
        assert_eq!(page.last_page(), 3);
        assert_eq!(page.items.iter().map(|h| h.id).collect::<Vec<_>>(), vec![3, 4]);

        let beyond = agg
            .search(1, &SearchQuery::new("x").page(9).page_size(2))
            .await
            .unwrap();
        assert!(beyond.items.is_empty());
        assert_eq!(beyond.total, 5);
    }

    #[tokio::test]
    async fn page_below_one_is_first_page() {
        let agg = aggregator(vec![provider(EntityType::Document, index(&[(1, 1.0)]))]);
        let page = agg.search(1, &SearchQuery::new("x").page(0)).await.unwrap();
        assert_eq!(page.page, 1);
        assert_eq!(page.items.len(), 1);
    }

    // -- edge cases --------------------------------------------------------

    #[tokio::test]
    async fn blank_term_queries_no_provider() {
        let docs = index(&[(1, 1.0)]);
        let agg = aggregator(vec![provider(EntityType::Document, docs.clone())]);

        let page = agg.search(1, &SearchQuery::new("   ")).await.unwrap();

        assert_eq!(page.total, 0);
        assert!(page.items.is_empty());
        assert_eq!(docs.calls(), 0);
    }

    #[tokio::test]
    async fn unauthorized_types_are_never_queried() {
        let docs = index(&[(1, 1.0)]);
        let users = index(&[(2, 1.0)]);
        let agg = RelevanceSearchAggregator::new(
            Arc::new(StaticAccessPolicy::allow(1, [EntityType::Document])),
            SearchConfig::default(),
        )
        .with_provider(EntityType::Document, docs.clone())
        .with_provider(EntityType::User, users.clone());

        let page = agg.search(1, &SearchQuery::new("x")).await.unwrap();

        assert_eq!(page.items, vec![hit(EntityType::Document, 1, 1.0)]);
        assert_eq!(users.calls(), 0);
    }

    #[tokio::test]
    async fn failed_provider_yields_partial_results() {
        let agg = aggregator(vec![
            provider(EntityType::Document, index(&[(1, 1.0)])),
            provider(EntityType::Discussion, Arc::new(FailingIndex)),
        ]);

        let page = agg.search(1, &SearchQuery::new("x")).await.unwrap();

        assert!(page.is_partial());
        assert_eq!(page.failed_types, vec![EntityType::Discussion]);
        assert_eq!(page.items.len(), 1);
    }

    #[tokio::test]
    async fn re_registering_replaces_the_index() {
        let agg = aggregator(vec![
            provider(EntityType::Document, index(&[(1, 1.0)])),
            provider(EntityType::Tag, index(&[(2, 1.0)])),
            provider(EntityType::Document, index(&[(3, 1.0)])),
        ]);
        assert_eq!(agg.searchable_types(), vec![EntityType::Document, EntityType::Tag]);
        let page = agg.search(1, &SearchQuery::new("x")).await.unwrap();
        assert_eq!(page.items[0].id, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_is_enforced() {
        let slow = Arc::new(
            StaticSearchIndex::new(vec![RawHit::new(1, 1.0)]).with_delay(Duration::from_secs(5)),
        );
        let agg = aggregator(vec![provider(EntityType::Document, slow)]);

        let result = agg
            .search_with_deadline(1, &SearchQuery::new("x"), Duration::from_secs(1))
            .await;
        assert_matches!(result, Err(CoreError::DeadlineExceeded(_)));

        let ok = agg
            .search_with_deadline(1, &SearchQuery::new("x"), Duration::from_secs(10))
            .await
            .unwrap();
        assert_eq!(ok.total, 1);
    }
}
