use crate::config::AppConfig;
use crate::ecl::ast::{ExpressionConstraint, SubExpressionConstraint};
use crate::ecl::parser;
use crate::error::{Result, TermbaseError};
use crate::logic::ecl_query::EclQueryService;
use crate::logic::lexical::DescriptionSearch;
use crate::logic::visibility::VersionScope;
use crate::model::{
    ConceptDoc, ConceptId, Form, QueryConcept, RelationshipDoc, VersionedComponent, IS_A,
};
use crate::store::search::{page_id_list, Clause, PageRequest, SearchPage, SearchQuery, Sort};
use crate::store::traits::SearchEngine;
use log::{debug, error, info};
use serde_json::json;
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

/// A concept search request. Logical and lexical criteria combine by
/// intersection, keeping lexical rank order.
#[derive(Debug, Clone)]
pub struct ConceptQuery {
    form: Form,
    ecl: Option<String>,
    term: Option<String>,
    concept_ids: Option<Vec<ConceptId>>,
    active: Option<bool>,
}

impl ConceptQuery {
    pub fn inferred() -> Self {
        Self {
            form: Form::Inferred,
            ecl: None,
            term: None,
            concept_ids: None,
            active: None,
        }
    }

    pub fn stated() -> Self {
        Self {
            form: Form::Stated,
            ..Self::inferred()
        }
    }

    pub fn ecl(mut self, ecl: &str) -> Self {
        self.ecl = Some(ecl.to_string());
        self
    }

    pub fn term(mut self, term: &str) -> Self {
        self.term = Some(term.to_string());
        self
    }

    /// Restrict results to these concept ids. Without a term criterion the
    /// given order is kept in the result page.
    pub fn concept_ids(mut self, ids: Vec<ConceptId>) -> Self {
        self.concept_ids = Some(ids);
        self
    }

    /// Restrict results by the concept's active flag.
    pub fn active(mut self, active: bool) -> Self {
        self.active = Some(active);
        self
    }
}

/// Front door for concept selection: expression constraints, description
/// search, hierarchy lookups and relationship target resolution.
pub struct QueryService<S> {
    store: Arc<S>,
    ecl: EclQueryService<S>,
    lexical: DescriptionSearch<S>,
    clause_limit: usize,
    recursion_limit: u32,
}

impl<S: SearchEngine> QueryService<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self::with_config(store, &AppConfig::default())
    }

    pub fn with_config(store: Arc<S>, config: &AppConfig) -> Self {
        Self {
            ecl: EclQueryService::with_clause_limit(store.clone(), config.search.clause_limit),
            lexical: DescriptionSearch::with_config(store.clone(), config),
            store,
            clause_limit: config.search.clause_limit,
            recursion_limit: config.limits.recursion_limit,
        }
    }

    pub fn ecl_service(&self) -> &EclQueryService<S> {
        &self.ecl
    }

    /// Run a concept query and return matching ids, paged.
    ///
    /// With both criteria present, descriptions are searched first and the
    /// expression constraint then filters that candidate list, so the page
    /// order stays lexical.
    pub async fn search_for_ids(
        &self,
        scope: &VersionScope,
        query: &ConceptQuery,
        page: &PageRequest,
    ) -> Result<SearchPage<ConceptId>> {
        let constraint = query.ecl.as_deref().map(parser::parse).transpose()?;
        debug!(
            "concept search on {} (ecl: {}, term: {})",
            scope.path(),
            query.ecl.as_deref().unwrap_or("-"),
            query.term.as_deref().unwrap_or("-")
        );

        // Candidate id filter: lexical rank order when a term is present,
        // the caller's order otherwise.
        let mut id_filter: Option<Vec<ConceptId>> = match &query.term {
            Some(term) => {
                let mut lexical_ids = self.lexical.find_concept_ids(scope, term).await?;
                if let Some(requested) = &query.concept_ids {
                    let requested: HashSet<ConceptId> = requested.iter().copied().collect();
                    lexical_ids.retain(|id| requested.contains(id));
                }
                Some(lexical_ids)
            }
            None => query.concept_ids.clone(),
        };
        if let Some(active) = query.active {
            id_filter = Some(self.filter_by_active_state(id_filter, active, scope).await?);
        }

        match (&constraint, id_filter) {
            (Some(constraint), filter) => {
                self.ecl
                    .select_concept_ids(constraint, scope, query.form, filter.as_deref(), page)
                    .await
            }
            (None, Some(ids)) => page_id_list(&ids, page),
            (None, None) => {
                let everything =
                    ExpressionConstraint::Sub(SubExpressionConstraint::wildcard());
                self.ecl
                    .select_concept_ids(&everything, scope, query.form, None, page)
                    .await
            }
        }
    }

    /// Parse and run a bare expression constraint.
    pub async fn ecl_search(
        &self,
        ecl: &str,
        scope: &VersionScope,
        form: Form,
        page: &PageRequest,
    ) -> Result<SearchPage<ConceptId>> {
        let constraint = parser::parse(ecl)?;
        self.ecl
            .select_concept_ids(&constraint, scope, form, None, page)
            .await
    }

    /// Ids that pass the active filter, in the filter's order; without a
    /// prior filter, every matching concept in ascending id order.
    async fn filter_by_active_state(
        &self,
        id_filter: Option<Vec<ConceptId>>,
        active: bool,
        scope: &VersionScope,
    ) -> Result<Vec<ConceptId>> {
        match id_filter {
            Some(ids) => {
                let mut matching: HashSet<ConceptId> = HashSet::new();
                for chunk in ids.chunks(self.clause_limit) {
                    let query = scope.apply(
                        SearchQuery::new()
                            .must(Clause::term("active", json!(active)))
                            .must(Clause::terms(
                                "concept_id",
                                chunk.iter().map(|id| json!(id)).collect(),
                            )),
                        ConceptDoc::COLLECTION,
                    );
                    let stream = self
                        .store
                        .stream(ConceptDoc::COLLECTION, &query, &[])
                        .await?;
                    for doc in stream {
                        let concept: ConceptDoc = serde_json::from_value(doc)?;
                        matching.insert(concept.concept_id);
                    }
                }
                Ok(ids.into_iter().filter(|id| matching.contains(id)).collect())
            }
            None => {
                let query = scope.apply(
                    SearchQuery::new().must(Clause::term("active", json!(active))),
                    ConceptDoc::COLLECTION,
                );
                let stream = self
                    .store
                    .stream(
                        ConceptDoc::COLLECTION,
                        &query,
                        &[Sort::asc("concept_id")],
                    )
                    .await?;
                let mut ids = Vec::new();
                for doc in stream {
                    let concept: ConceptDoc = serde_json::from_value(doc)?;
                    ids.push(concept.concept_id);
                }
                Ok(ids)
            }
        }
    }

    pub async fn find_parents(
        &self,
        concept_id: ConceptId,
        scope: &VersionScope,
        form: Form,
    ) -> Result<Vec<ConceptId>> {
        Ok(self
            .ecl
            .single_concept(concept_id, scope, form)
            .await?
            .map(|concept| concept.parents.into_iter().collect())
            .unwrap_or_default())
    }

    pub async fn find_ancestors(
        &self,
        concept_id: ConceptId,
        scope: &VersionScope,
        form: Form,
    ) -> Result<Vec<ConceptId>> {
        Ok(self
            .ecl
            .single_concept(concept_id, scope, form)
            .await?
            .map(|concept| concept.ancestors.into_iter().collect())
            .unwrap_or_default())
    }

    /// Union of the ancestor sets of several concepts, ascending.
    pub async fn find_ancestors_as_union(
        &self,
        concept_ids: &[ConceptId],
        scope: &VersionScope,
        form: Form,
    ) -> Result<Vec<ConceptId>> {
        let mut union: BTreeSet<ConceptId> = BTreeSet::new();
        for chunk in concept_ids.chunks(self.clause_limit) {
            let query = scope.apply(
                SearchQuery::new()
                    .must(Clause::term("stated", json!(form.is_stated())))
                    .must(Clause::terms(
                        "concept_id",
                        chunk.iter().map(|id| json!(id)).collect(),
                    )),
                QueryConcept::COLLECTION,
            );
            let stream = self
                .store
                .stream(QueryConcept::COLLECTION, &query, &[])
                .await?;
            for doc in stream {
                let concept: QueryConcept = serde_json::from_value(doc)?;
                union.extend(concept.ancestors.iter().copied());
            }
        }
        Ok(union.into_iter().collect())
    }

    pub async fn find_children(
        &self,
        concept_id: ConceptId,
        scope: &VersionScope,
        form: Form,
    ) -> Result<Vec<ConceptId>> {
        self.ids_where(scope, form, Clause::term("parents", json!(concept_id)))
            .await
    }

    /// Descendants from the materialized ancestor sets. When the inferred
    /// index has not been built yet, falls back to walking the is-a
    /// relationships directly.
    pub async fn find_descendants(
        &self,
        concept_id: ConceptId,
        scope: &VersionScope,
        form: Form,
    ) -> Result<Vec<ConceptId>> {
        if form == Form::Inferred && self.index_is_empty(scope, form).await? {
            info!("inferred index empty on {}, walking relationships", scope.path());
            return self.descendants_via_relationships(concept_id, scope).await;
        }
        self.ids_where(scope, form, Clause::term("ancestors", json!(concept_id)))
            .await
    }

    async fn ids_where(
        &self,
        scope: &VersionScope,
        form: Form,
        clause: Clause,
    ) -> Result<Vec<ConceptId>> {
        let query = scope.apply(
            SearchQuery::new()
                .must(Clause::term("stated", json!(form.is_stated())))
                .must(clause),
            QueryConcept::COLLECTION,
        );
        let stream = self
            .store
            .stream(
                QueryConcept::COLLECTION,
                &query,
                &[Sort::asc("concept_id")],
            )
            .await?;
        let mut ids = Vec::new();
        for doc in stream {
            let concept: QueryConcept = serde_json::from_value(doc)?;
            ids.push(concept.concept_id);
        }
        Ok(ids)
    }

    async fn index_is_empty(&self, scope: &VersionScope, form: Form) -> Result<bool> {
        let query = scope.apply(
            SearchQuery::new().must(Clause::term("stated", json!(form.is_stated()))),
            QueryConcept::COLLECTION,
        );
        let page = self
            .store
            .search(QueryConcept::COLLECTION, &query, &[], &PageRequest::of(1))
            .await?;
        Ok(page.total == 0)
    }

    /// Transitive closure of the is-a children of `concept_id`, breadth
    /// first over the relationship documents. Depth is capped.
    async fn descendants_via_relationships(
        &self,
        concept_id: ConceptId,
        scope: &VersionScope,
    ) -> Result<Vec<ConceptId>> {
        let mut found: BTreeSet<ConceptId> = BTreeSet::new();
        let mut frontier: Vec<ConceptId> = vec![concept_id];
        let mut depth = 0;
        while !frontier.is_empty() {
            depth += 1;
            if depth > self.recursion_limit {
                error!(
                    "is-a walk from {} exceeded {} levels on {}",
                    concept_id,
                    self.recursion_limit,
                    scope.path()
                );
                return Err(TermbaseError::RecursionLimitExceeded {
                    limit: self.recursion_limit,
                    context: format!("walking is-a descendants of {concept_id}"),
                });
            }
            let mut next = Vec::new();
            for chunk in frontier.chunks(self.clause_limit) {
                let query = scope.apply(
                    SearchQuery::new()
                        .must(Clause::term("active", json!(true)))
                        .must(Clause::term("type_id", json!(IS_A)))
                        .must(Clause::terms(
                            "destination_id",
                            chunk.iter().map(|id| json!(id)).collect(),
                        )),
                    RelationshipDoc::COLLECTION,
                );
                let stream = self
                    .store
                    .stream(RelationshipDoc::COLLECTION, &query, &[])
                    .await?;
                for doc in stream {
                    let relationship: RelationshipDoc = serde_json::from_value(doc)?;
                    if found.insert(relationship.source_id) {
                        next.push(relationship.source_id);
                    }
                }
            }
            frontier = next;
        }
        Ok(found.into_iter().collect())
    }

    /// Destination concept ids reachable from `source_ids` over the given
    /// attribute types, in descending id order.
    ///
    /// Inferred form reads the relationship documents; stated form reads the
    /// stated attribute maps of the semantic index, where an is-a type means
    /// the stated parents.
    pub async fn find_relationship_destination_ids(
        &self,
        source_ids: &[ConceptId],
        attribute_type_ids: Option<&[ConceptId]>,
        scope: &VersionScope,
        form: Form,
    ) -> Result<Vec<ConceptId>> {
        let mut destinations: BTreeSet<ConceptId> = BTreeSet::new();
        if form.is_stated() {
            // Stringified once; the attribute maps key types by string.
            let type_keys: Option<HashSet<String>> = attribute_type_ids
                .map(|type_ids| type_ids.iter().map(|id| id.to_string()).collect());
            let include_is_a =
                attribute_type_ids.map_or(true, |type_ids| type_ids.contains(&IS_A));
            for chunk in source_ids.chunks(self.clause_limit) {
                let query = scope.apply(
                    SearchQuery::new()
                        .must(Clause::term("stated", json!(true)))
                        .must(Clause::terms(
                            "concept_id",
                            chunk.iter().map(|id| json!(id)).collect(),
                        )),
                    QueryConcept::COLLECTION,
                );
                let stream = self
                    .store
                    .stream(QueryConcept::COLLECTION, &query, &[])
                    .await?;
                for doc in stream {
                    let concept: QueryConcept = serde_json::from_value(doc)?;
                    collect_stated_destinations(
                        &concept,
                        type_keys.as_ref(),
                        include_is_a,
                        &mut destinations,
                    );
                }
            }
        } else {
            for chunk in source_ids.chunks(self.clause_limit) {
                let mut query = SearchQuery::new()
                    .must(Clause::term("active", json!(true)))
                    .must(Clause::terms(
                        "source_id",
                        chunk.iter().map(|id| json!(id)).collect(),
                    ));
                if let Some(type_ids) = attribute_type_ids {
                    query = query.must(Clause::terms(
                        "type_id",
                        type_ids.iter().map(|id| json!(id)).collect(),
                    ));
                }
                let query = scope.apply(query, RelationshipDoc::COLLECTION);
                let stream = self
                    .store
                    .stream(RelationshipDoc::COLLECTION, &query, &[])
                    .await?;
                for doc in stream {
                    let relationship: RelationshipDoc = serde_json::from_value(doc)?;
                    destinations.insert(relationship.destination_id);
                }
            }
        }
        Ok(destinations.into_iter().rev().collect())
    }
}

fn collect_stated_destinations(
    concept: &QueryConcept,
    type_keys: Option<&HashSet<String>>,
    include_is_a: bool,
    destinations: &mut BTreeSet<ConceptId>,
) {
    let type_matches = |type_key: &str| match type_keys {
        Some(keys) => keys.contains(type_key),
        None => type_key != crate::model::ATTR_TYPE_WILDCARD,
    };
    for (type_key, values) in &concept.attr {
        if !type_matches(type_key) {
            continue;
        }
        for raw in values {
            if let crate::model::AttributeValue::Concept(id) =
                crate::model::AttributeValue::parse(raw)
            {
                destinations.insert(id);
            }
        }
    }
    if include_is_a {
        destinations.extend(concept.parents.iter().copied());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logic::branching::BranchService;
    use crate::model::{AttributeValue, BranchPath, GroupedAttributes};
    use crate::store::memory::MemoryIndex;
    use std::collections::BTreeSet;

    const ROOT_CONCEPT: ConceptId = 138875005;
    const A: ConceptId = 100_001;
    const B: ConceptId = 100_002;
    const C: ConceptId = 100_003;
    const SITE: ConceptId = 363698007;
    const HEART: ConceptId = 80891009;

    struct Fixture {
        store: Arc<MemoryIndex>,
        branches: BranchService<MemoryIndex>,
    }

    async fn empty_fixture() -> Fixture {
        let store = Arc::new(MemoryIndex::new());
        let branches = BranchService::new(store.clone());
        branches.create_branch(&BranchPath::root()).await.unwrap();
        Fixture { store, branches }
    }

    async fn scope(fixture: &Fixture) -> VersionScope {
        VersionScope::for_branch(&fixture.branches, &BranchPath::root())
            .await
            .unwrap()
    }

    fn index_doc(
        concept_id: ConceptId,
        form: Form,
        parents: &[ConceptId],
        ancestors: &[ConceptId],
        grouped: GroupedAttributes,
        t: i64,
    ) -> QueryConcept {
        QueryConcept::new(
            concept_id,
            form,
            parents.iter().copied().collect::<BTreeSet<_>>(),
            ancestors.iter().copied().collect::<BTreeSet<_>>(),
            grouped,
            BranchPath::root(),
            t,
        )
    }

    /// A > B > C chain in both the semantic index and the relationships.
    async fn chain_fixture(with_index: bool) -> Fixture {
        let fixture = empty_fixture().await;
        let commit = fixture
            .branches
            .open_commit(&BranchPath::root())
            .await
            .unwrap();
        let t = commit.timepoint();
        let root = BranchPath::root();

        let relationships = vec![
            RelationshipDoc::new(1, B, IS_A, A, 0, root.clone(), t),
            RelationshipDoc::new(2, C, IS_A, B, 0, root.clone(), t),
            RelationshipDoc::new(3, B, SITE, HEART, 1, root.clone(), t),
        ];
        for relationship in &relationships {
            fixture
                .store
                .save(
                    RelationshipDoc::COLLECTION,
                    serde_json::to_value(relationship).unwrap(),
                )
                .await
                .unwrap();
        }

        if with_index {
            let mut site_attrs = GroupedAttributes::new();
            site_attrs
                .entry(1)
                .or_default()
                .entry(SITE.to_string())
                .or_default()
                .push(AttributeValue::Concept(HEART));
            let docs = vec![
                index_doc(A, Form::Inferred, &[], &[], GroupedAttributes::new(), t),
                index_doc(B, Form::Inferred, &[A], &[A], site_attrs.clone(), t),
                index_doc(C, Form::Inferred, &[B], &[A, B], GroupedAttributes::new(), t),
                index_doc(B, Form::Stated, &[A], &[A], site_attrs, t),
            ];
            for doc in &docs {
                fixture
                    .store
                    .save(
                        QueryConcept::COLLECTION,
                        serde_json::to_value(doc).unwrap(),
                    )
                    .await
                    .unwrap();
            }
        }
        fixture.branches.complete_commit(commit).await.unwrap();
        fixture
    }

    #[tokio::test]
    async fn hierarchy_lookups_read_the_materialized_sets() {
        let fixture = chain_fixture(true).await;
        let scope = scope(&fixture).await;
        let service = QueryService::new(fixture.store.clone());
        assert_eq!(
            service.find_parents(C, &scope, Form::Inferred).await.unwrap(),
            vec![B]
        );
        assert_eq!(
            service
                .find_ancestors(C, &scope, Form::Inferred)
                .await
                .unwrap(),
            vec![A, B]
        );
        assert_eq!(
            service
                .find_children(A, &scope, Form::Inferred)
                .await
                .unwrap(),
            vec![B]
        );
        assert_eq!(
            service
                .find_descendants(A, &scope, Form::Inferred)
                .await
                .unwrap(),
            vec![B, C]
        );
        assert!(service
            .find_parents(999, &scope, Form::Inferred)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn descendants_fall_back_to_relationships_without_an_index() {
        let fixture = chain_fixture(false).await;
        let scope = scope(&fixture).await;
        let service = QueryService::new(fixture.store.clone());
        assert_eq!(
            service
                .find_descendants(A, &scope, Form::Inferred)
                .await
                .unwrap(),
            vec![B, C]
        );
    }

    #[tokio::test]
    async fn relationship_walk_respects_the_recursion_cap() {
        let fixture = chain_fixture(false).await;
        let scope = scope(&fixture).await;
        let mut config = AppConfig::default();
        config.limits.recursion_limit = 1;
        let service = QueryService::with_config(fixture.store.clone(), &config);
        let err = service
            .find_descendants(A, &scope, Form::Inferred)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            TermbaseError::RecursionLimitExceeded { limit: 1, .. }
        ));
    }

    #[tokio::test]
    async fn destination_ids_come_back_descending() {
        let fixture = chain_fixture(true).await;
        let scope = scope(&fixture).await;
        let service = QueryService::new(fixture.store.clone());

        let inferred = service
            .find_relationship_destination_ids(&[B, C], None, &scope, Form::Inferred)
            .await
            .unwrap();
        assert_eq!(inferred, vec![HEART, B, A]);

        let typed = service
            .find_relationship_destination_ids(&[B], Some(&[SITE]), &scope, Form::Inferred)
            .await
            .unwrap();
        assert_eq!(typed, vec![HEART]);
    }

    #[tokio::test]
    async fn stated_destinations_use_the_attribute_map_and_parents() {
        let fixture = chain_fixture(true).await;
        let scope = scope(&fixture).await;
        let service = QueryService::new(fixture.store.clone());

        let all = service
            .find_relationship_destination_ids(&[B], None, &scope, Form::Stated)
            .await
            .unwrap();
        assert_eq!(all, vec![HEART, A]);

        let is_a_only = service
            .find_relationship_destination_ids(&[B], Some(&[IS_A]), &scope, Form::Stated)
            .await
            .unwrap();
        assert_eq!(is_a_only, vec![A]);

        let site_only = service
            .find_relationship_destination_ids(&[B], Some(&[SITE]), &scope, Form::Stated)
            .await
            .unwrap();
        assert_eq!(site_only, vec![HEART]);
    }

    #[tokio::test]
    async fn combined_search_keeps_lexical_order() {
        let fixture = chain_fixture(true).await;
        let root = BranchPath::root();
        let commit = fixture.branches.open_commit(&root).await.unwrap();
        let t = commit.timepoint();
        let descriptions = vec![
            crate::model::DescriptionDoc::new(11, C, "Severe finding", root.clone(), t),
            crate::model::DescriptionDoc::new(12, B, "Severe finding of heart", root.clone(), t),
            crate::model::DescriptionDoc::new(13, ROOT_CONCEPT, "Severe", root.clone(), t),
        ];
        for description in &descriptions {
            fixture
                .store
                .save(
                    crate::model::DescriptionDoc::COLLECTION,
                    serde_json::to_value(description).unwrap(),
                )
                .await
                .unwrap();
        }
        fixture.branches.complete_commit(commit).await.unwrap();

        let scope = scope(&fixture).await;
        let service = QueryService::new(fixture.store.clone());
        let query = ConceptQuery::inferred()
            .ecl(&format!("< {A}"))
            .term("severe");
        let page = service
            .search_for_ids(&scope, &query, &PageRequest::of(10))
            .await
            .unwrap();
        // Lexical order is shortest term first; the constraint then drops
        // the concept outside the hierarchy.
        assert_eq!(page.content, vec![C, B]);
    }

    #[tokio::test]
    async fn ancestor_union_merges_the_sets() {
        let fixture = chain_fixture(true).await;
        let scope = scope(&fixture).await;
        let service = QueryService::new(fixture.store.clone());
        assert_eq!(
            service
                .find_ancestors_as_union(&[B, C], &scope, Form::Inferred)
                .await
                .unwrap(),
            vec![A, B]
        );
        assert!(service
            .find_ancestors_as_union(&[], &scope, Form::Inferred)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn id_and_active_filters_narrow_the_results() {
        let fixture = chain_fixture(true).await;
        let root = BranchPath::root();
        let commit = fixture.branches.open_commit(&root).await.unwrap();
        let t = commit.timepoint();
        for (id, active) in [(A, true), (B, true), (C, false)] {
            fixture
                .store
                .save(
                    ConceptDoc::COLLECTION,
                    serde_json::to_value(ConceptDoc::new(id, active, root.clone(), t)).unwrap(),
                )
                .await
                .unwrap();
        }
        fixture.branches.complete_commit(commit).await.unwrap();

        let scope = scope(&fixture).await;
        let service = QueryService::new(fixture.store.clone());

        // The id filter keeps the caller's order.
        let page = service
            .search_for_ids(
                &scope,
                &ConceptQuery::inferred().concept_ids(vec![C, A]),
                &PageRequest::of(10),
            )
            .await
            .unwrap();
        assert_eq!(page.content, vec![C, A]);

        // The active filter drops the inactive concept.
        let page = service
            .search_for_ids(
                &scope,
                &ConceptQuery::inferred().concept_ids(vec![C, A, B]).active(true),
                &PageRequest::of(10),
            )
            .await
            .unwrap();
        assert_eq!(page.content, vec![A, B]);

        // Combined with an expression constraint the filter narrows the
        // hierarchy selection.
        let page = service
            .search_for_ids(
                &scope,
                &ConceptQuery::inferred()
                    .ecl(&format!("<< {A}"))
                    .active(false),
                &PageRequest::of(10),
            )
            .await
            .unwrap();
        assert_eq!(page.content, vec![C]);
    }

    #[tokio::test]
    async fn invalid_expression_is_reported_not_swallowed() {
        let fixture = chain_fixture(true).await;
        let scope = scope(&fixture).await;
        let service = QueryService::new(fixture.store.clone());
        let err = service
            .search_for_ids(
                &scope,
                &ConceptQuery::inferred().ecl("<<<< nonsense"),
                &PageRequest::of(10),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, TermbaseError::InvalidExpression(_)));
    }
}
