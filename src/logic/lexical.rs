use crate::config::AppConfig;
use crate::error::Result;
use crate::logic::visibility::VersionScope;
use crate::model::{ConceptId, DescriptionDoc, VersionedComponent};
use crate::store::search::{Clause, SearchQuery, Sort};
use crate::store::traits::SearchEngine;
use itertools::Itertools;
use serde_json::json;
use std::sync::Arc;

/// Description term search.
///
/// A description matches when every search word is a case-insensitive prefix
/// of some word in its term. Matches rank shortest term first, then
/// alphabetically, so the closest description wins; concept ids are then
/// deduplicated keeping that order. The candidate scan is bounded by the
/// configured large page size.
pub struct DescriptionSearch<S> {
    store: Arc<S>,
    scan_limit: usize,
}

impl<S: SearchEngine> DescriptionSearch<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self::with_config(store, &AppConfig::default())
    }

    pub fn with_config(store: Arc<S>, config: &AppConfig) -> Self {
        Self {
            store,
            scan_limit: config.search.large_page_size,
        }
    }

    pub async fn find_concept_ids(
        &self,
        scope: &VersionScope,
        term: &str,
    ) -> Result<Vec<ConceptId>> {
        let search_words: Vec<String> = term
            .split_whitespace()
            .map(|word| word.to_lowercase())
            .collect();
        if search_words.is_empty() {
            return Ok(Vec::new());
        }
        let query = scope.apply(
            SearchQuery::new().must(Clause::term("active", json!(true))),
            DescriptionDoc::COLLECTION,
        );
        let stream = self
            .store
            .stream(
                DescriptionDoc::COLLECTION,
                &query,
                &[Sort::asc("term"), Sort::asc("concept_id")],
            )
            .await?;

        let mut matches: Vec<(usize, String, ConceptId)> = Vec::new();
        for doc in stream.take(self.scan_limit) {
            let description: DescriptionDoc = serde_json::from_value(doc)?;
            if term_matches(&description.term, &search_words) {
                matches.push((
                    description.term.len(),
                    description.term,
                    description.concept_id,
                ));
            }
        }
        matches.sort();
        Ok(matches
            .into_iter()
            .map(|(_, _, concept_id)| concept_id)
            .unique()
            .collect())
    }
}

fn term_matches(term: &str, search_words: &[String]) -> bool {
    let term_words: Vec<String> = term
        .split_whitespace()
        .map(|word| word.to_lowercase())
        .collect();
    search_words.iter().all(|search_word| {
        term_words
            .iter()
            .any(|term_word| term_word.starts_with(search_word.as_str()))
    })
}
