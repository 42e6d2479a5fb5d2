use crate::ecl::ast::{
    AttributeOperand, EclAttribute, ExpressionConstraint, FocusConcept, HierarchyOperator,
    Refinement, SubAttributeSet, SubExpressionConstraint,
};
use crate::ecl::range::AttributeRange;
use crate::ecl::refinement::{CompiledAttributeSet, CompiledRefinement, RefinementBuilder};
use crate::error::{Result, TermbaseError};
use crate::logic::visibility::VersionScope;
use crate::model::{ConceptId, Form, MatchContext, QueryConcept, VersionedComponent};
use crate::store::search::{page_id_list, Clause, PageRequest, SearchPage, SearchQuery, Sort};
use crate::store::traits::{SearchEngine, CLAUSE_LIMIT};
use log::debug;
use serde_json::json;
use std::collections::{BTreeSet, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Constraints nest to arbitrary depth, so the recursive selection paths
/// return boxed futures.
type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Evaluates expression constraints against the semantic index.
///
/// Each selection compiles into one boolean query over the `query_concepts`
/// collection. Criteria the index cannot answer exactly are pushed down as
/// coarse narrowing clauses, and the surviving candidates are then filtered
/// one by one against the full refinement semantics. Nested constraints are
/// materialized first and their id sets substituted into the outer query.
pub struct EclQueryService<S> {
    store: Arc<S>,
    clause_limit: usize,
}

impl<S: SearchEngine> EclQueryService<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            clause_limit: CLAUSE_LIMIT,
        }
    }

    pub fn with_clause_limit(store: Arc<S>, clause_limit: usize) -> Self {
        Self {
            store,
            clause_limit,
        }
    }

    /// Concept ids matching a constraint, in ascending id order, paged.
    ///
    /// When `id_filter` is given only ids from the filter are returned, in
    /// the filter's own order. Filters wider than the clause limit are run
    /// in batches and the results unioned.
    pub async fn select_concept_ids(
        &self,
        constraint: &ExpressionConstraint,
        scope: &VersionScope,
        form: Form,
        id_filter: Option<&[ConceptId]>,
        page: &PageRequest,
    ) -> Result<SearchPage<ConceptId>> {
        let (query, residual) = self.build_query(constraint, scope, form).await?;
        match id_filter {
            Some(filter) => {
                let mut matched: HashSet<ConceptId> = HashSet::new();
                for chunk in filter.chunks(self.clause_limit) {
                    let batched = query.clone().must(Clause::terms(
                        "concept_id",
                        chunk.iter().map(|id| json!(id)).collect(),
                    ));
                    matched.extend(self.stream_ids(&batched, residual.as_ref()).await?);
                }
                let ordered: Vec<ConceptId> = filter
                    .iter()
                    .filter(|id| matched.contains(id))
                    .copied()
                    .collect();
                page_id_list(&ordered, page)
            }
            None => {
                if let Some(residual) = &residual {
                    debug!("running inclusion filter for {constraint:?}");
                    let ids = self.stream_ids(&query, Some(residual)).await?;
                    page_id_list(&ids, page)
                } else {
                    let result = self
                        .store
                        .search(
                            QueryConcept::COLLECTION,
                            &query,
                            &[Sort::asc("concept_id")],
                            page,
                        )
                        .await?;
                    let search_after = result.search_after.clone();
                    let total = result.total;
                    let mut content = Vec::with_capacity(result.content.len());
                    for doc in result.content {
                        content.push(concept_id_of(&doc)?);
                    }
                    Ok(SearchPage {
                        content,
                        total,
                        search_after,
                    })
                }
            }
        }
    }

    /// Every matching concept id, unpaged, ascending.
    pub async fn select_all_concept_ids(
        &self,
        constraint: &ExpressionConstraint,
        scope: &VersionScope,
        form: Form,
    ) -> Result<Vec<ConceptId>> {
        self.select_ids_recursive(constraint, scope, form).await
    }

    fn select_ids_recursive<'a>(
        &'a self,
        constraint: &'a ExpressionConstraint,
        scope: &'a VersionScope,
        form: Form,
    ) -> BoxFuture<'a, Result<Vec<ConceptId>>> {
        Box::pin(async move {
            let (query, residual) = self.build_query(constraint, scope, form).await?;
            self.stream_ids(&query, residual.as_ref()).await
        })
    }

    async fn build_query(
        &self,
        constraint: &ExpressionConstraint,
        scope: &VersionScope,
        form: Form,
    ) -> Result<(SearchQuery, Option<CompiledRefinement>)> {
        let mut query = scope.apply(
            SearchQuery::new().must(Clause::term("stated", json!(form.is_stated()))),
            QueryConcept::COLLECTION,
        );
        let (focus, refinement) = match constraint {
            ExpressionConstraint::Sub(focus) => (focus, None),
            ExpressionConstraint::Refined { focus, refinement } => (focus, Some(refinement)),
        };
        if let Some(clause) = self.focus_clause(focus, scope, form).await? {
            query.must.push(clause);
        }
        let residual = match refinement {
            Some(refinement) => {
                let compiled = self.compile_refinement(refinement, scope, form).await?;
                let mut builder = RefinementBuilder::new(&mut query, self.clause_limit);
                builder.add_criteria(&compiled);
                builder.inclusion_filter_required().then_some(compiled)
            }
            None => None,
        };
        Ok((query, residual))
    }

    /// Index clause selecting the focus concepts. `None` matches everything.
    async fn focus_clause(
        &self,
        focus: &SubExpressionConstraint,
        scope: &VersionScope,
        form: Form,
    ) -> Result<Option<Clause>> {
        let ids: BTreeSet<ConceptId> = match &focus.focus {
            FocusConcept::Wildcard => return Ok(None),
            FocusConcept::Concept(id) => BTreeSet::from([*id]),
            FocusConcept::Nested(inner) => self
                .select_ids_recursive(inner, scope, form)
                .await?
                .into_iter()
                .collect(),
        };
        self.hierarchy_clause(focus.operator, ids, scope, form)
            .await
            .map(Some)
    }

    /// Clause selecting the hierarchy closure of `ids` under one operator.
    async fn hierarchy_clause(
        &self,
        operator: HierarchyOperator,
        ids: BTreeSet<ConceptId>,
        scope: &VersionScope,
        form: Form,
    ) -> Result<Clause> {
        let clause = match operator {
            HierarchyOperator::SelfOnly => self.batched_terms("concept_id", &ids),
            HierarchyOperator::DescendantOf => self.batched_terms("ancestors", &ids),
            HierarchyOperator::DescendantOrSelfOf => Clause::Sub(
                SearchQuery::new()
                    .should(self.batched_terms("concept_id", &ids))
                    .should(self.batched_terms("ancestors", &ids)),
            ),
            HierarchyOperator::ChildOf => self.batched_terms("parents", &ids),
            HierarchyOperator::AncestorOf
            | HierarchyOperator::AncestorOrSelfOf
            | HierarchyOperator::ParentOf => {
                // Upward operators read the focus concepts' own materialized
                // sets and select those ids directly.
                let mut selected: BTreeSet<ConceptId> = BTreeSet::new();
                for id in &ids {
                    let Some(concept) = self.single_concept(*id, scope, form).await? else {
                        continue;
                    };
                    match operator {
                        HierarchyOperator::ParentOf => selected.extend(&concept.parents),
                        _ => selected.extend(&concept.ancestors),
                    }
                    if operator == HierarchyOperator::AncestorOrSelfOf {
                        selected.insert(*id);
                    }
                }
                self.batched_terms("concept_id", &selected)
            }
        };
        Ok(clause)
    }

    /// A `Terms` clause over `ids`, split into clause-limit sized batches
    /// under a should group when the set is too wide for a single clause.
    fn batched_terms(&self, field: &str, ids: &BTreeSet<ConceptId>) -> Clause {
        if ids.len() <= self.clause_limit {
            return Clause::terms(field, ids.iter().map(|id| json!(id)).collect());
        }
        let ids: Vec<ConceptId> = ids.iter().copied().collect();
        let batches: Vec<Clause> = ids
            .chunks(self.clause_limit)
            .map(|chunk| Clause::terms(field, chunk.iter().map(|id| json!(id)).collect()))
            .collect();
        Clause::Sub(SearchQuery {
            must: Vec::new(),
            must_not: Vec::new(),
            should: batches,
        })
    }

    /// The semantic-index document of one concept. More than one visible
    /// version of the same concept means the index is corrupt.
    pub async fn single_concept(
        &self,
        concept_id: ConceptId,
        scope: &VersionScope,
        form: Form,
    ) -> Result<Option<QueryConcept>> {
        let query = scope.apply(
            SearchQuery::new()
                .must(Clause::term("concept_id", json!(concept_id)))
                .must(Clause::term("stated", json!(form.is_stated()))),
            QueryConcept::COLLECTION,
        );
        let result = self
            .store
            .search(QueryConcept::COLLECTION, &query, &[], &PageRequest::of(2))
            .await?;
        if result.total > 1 {
            return Err(TermbaseError::integrity(format!(
                "concept {concept_id} has {} visible index documents on '{}'",
                result.total,
                scope.path()
            )));
        }
        result
            .content
            .into_iter()
            .next()
            .map(|doc| serde_json::from_value(doc).map_err(Into::into))
            .transpose()
    }

    /// Compile a refinement into attribute ranges, materializing every
    /// selector that reaches beyond a single named concept.
    fn compile_refinement<'a>(
        &'a self,
        refinement: &'a Refinement,
        scope: &'a VersionScope,
        form: Form,
    ) -> BoxFuture<'a, Result<CompiledRefinement>> {
        Box::pin(async move {
            let mut members = Vec::with_capacity(refinement.members.len());
            for member in &refinement.members {
                members.push(match member {
                    SubAttributeSet::Attribute(attribute) => CompiledAttributeSet::Attribute(
                        self.compile_attribute(attribute, scope, form).await?,
                    ),
                    SubAttributeSet::Group(inner) => CompiledAttributeSet::Group(Box::new(
                        self.compile_refinement(inner, scope, form).await?,
                    )),
                });
            }
            Ok(CompiledRefinement {
                set_operator: refinement.set_operator,
                members,
            })
        })
    }

    async fn compile_attribute(
        &self,
        attribute: &EclAttribute,
        scope: &VersionScope,
        form: Form,
    ) -> Result<AttributeRange> {
        let (type_wildcard, type_fields) = match self
            .resolve_selector(&attribute.attribute_type, scope, form)
            .await?
        {
            None => (true, BTreeSet::new()),
            Some(ids) => (false, ids.iter().map(|id| id.to_string()).collect()),
        };
        let range = match &attribute.value {
            AttributeOperand::Number(value) => AttributeRange::concrete_number_range(
                type_wildcard,
                type_fields,
                attribute.comparison,
                *value,
                attribute.cardinality,
            ),
            AttributeOperand::Text(value) => AttributeRange::concrete_string_range(
                type_wildcard,
                type_fields,
                attribute.comparison,
                value.clone(),
                attribute.cardinality,
            ),
            AttributeOperand::Concept(sub) => {
                let possible_values = self
                    .resolve_selector(sub, scope, form)
                    .await?
                    .map(|ids| ids.iter().map(|id| id.to_string()).collect());
                AttributeRange::concept_range(
                    type_wildcard,
                    type_fields,
                    attribute.comparison,
                    possible_values,
                    attribute.cardinality,
                )
            }
        };
        Ok(range)
    }

    /// Concept ids selected by a subexpression used inside a refinement.
    /// `None` means the selector is an unconstrained wildcard.
    async fn resolve_selector(
        &self,
        sub: &SubExpressionConstraint,
        scope: &VersionScope,
        form: Form,
    ) -> Result<Option<BTreeSet<ConceptId>>> {
        match (&sub.focus, sub.operator) {
            (FocusConcept::Wildcard, _) => Ok(None),
            (FocusConcept::Concept(id), HierarchyOperator::SelfOnly) => {
                Ok(Some(BTreeSet::from([*id])))
            }
            (FocusConcept::Nested(inner), HierarchyOperator::SelfOnly) => Ok(Some(
                self.select_ids_recursive(inner, scope, form)
                    .await?
                    .into_iter()
                    .collect(),
            )),
            _ => {
                let constraint = ExpressionConstraint::Sub(sub.clone());
                let ids = self.select_ids_recursive(&constraint, scope, form).await?;
                Ok(Some(ids.into_iter().collect()))
            }
        }
    }

    async fn stream_ids(
        &self,
        query: &SearchQuery,
        residual: Option<&CompiledRefinement>,
    ) -> Result<Vec<ConceptId>> {
        let stream = self
            .store
            .stream(
                QueryConcept::COLLECTION,
                query,
                &[Sort::asc("concept_id")],
            )
            .await?;
        let mut ids = Vec::new();
        for doc in stream {
            match residual {
                Some(compiled) => {
                    let concept: QueryConcept = serde_json::from_value(doc)?;
                    let context = MatchContext::new(&concept.grouped_attributes);
                    if compiled.is_match(&context) {
                        ids.push(concept.concept_id);
                    }
                }
                None => ids.push(concept_id_of(&doc)?),
            }
        }
        Ok(ids)
    }
}

fn concept_id_of(doc: &serde_json::Value) -> Result<ConceptId> {
    doc.get("concept_id")
        .and_then(|v| v.as_u64())
        .ok_or_else(|| TermbaseError::integrity("index document without a concept_id".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ecl::parser::parse;
    use crate::logic::branching::BranchService;
    use crate::model::{AttributeValue, BranchPath, GroupedAttributes};
    use crate::store::memory::MemoryIndex;

    const FINDING: ConceptId = 404684003;
    const MI: ConceptId = 22298006;
    const STROKE: ConceptId = 230690007;
    const SITE: &str = "363698007";
    const BODY: ConceptId = 123037004;
    const HEART: ConceptId = 80891009;
    const BRAIN: ConceptId = 12738006;

    struct Fixture {
        store: Arc<MemoryIndex>,
        branches: BranchService<MemoryIndex>,
    }

    fn attrs(groups: &[(i32, &str, AttributeValue)]) -> GroupedAttributes {
        let mut grouped = GroupedAttributes::new();
        for (group, type_id, value) in groups {
            grouped
                .entry(*group)
                .or_default()
                .entry(type_id.to_string())
                .or_default()
                .push(value.clone());
        }
        grouped
    }

    async fn fixture_with(store: Arc<MemoryIndex>) -> Fixture {
        let branches = BranchService::new(store.clone());
        branches.create_branch(&BranchPath::root()).await.unwrap();
        let root = BranchPath::root();
        let commit = branches.open_commit(&root).await.unwrap();
        let t = commit.timepoint();
        let concepts = vec![
            QueryConcept::new(
                FINDING,
                Form::Inferred,
                BTreeSet::new(),
                BTreeSet::new(),
                GroupedAttributes::new(),
                root.clone(),
                t,
            ),
            QueryConcept::new(
                MI,
                Form::Inferred,
                BTreeSet::from([FINDING]),
                BTreeSet::from([FINDING]),
                attrs(&[(1, SITE, AttributeValue::Concept(HEART))]),
                root.clone(),
                t,
            ),
            QueryConcept::new(
                STROKE,
                Form::Inferred,
                BTreeSet::from([FINDING]),
                BTreeSet::from([FINDING]),
                attrs(&[(1, SITE, AttributeValue::Concept(BRAIN))]),
                root.clone(),
                t,
            ),
            QueryConcept::new(
                BODY,
                Form::Inferred,
                BTreeSet::new(),
                BTreeSet::new(),
                GroupedAttributes::new(),
                root.clone(),
                t,
            ),
            QueryConcept::new(
                HEART,
                Form::Inferred,
                BTreeSet::from([BODY]),
                BTreeSet::from([BODY]),
                GroupedAttributes::new(),
                root.clone(),
                t,
            ),
            QueryConcept::new(
                BRAIN,
                Form::Inferred,
                BTreeSet::from([BODY]),
                BTreeSet::from([BODY]),
                GroupedAttributes::new(),
                root.clone(),
                t,
            ),
        ];
        for concept in &concepts {
            store
                .save(
                    QueryConcept::COLLECTION,
                    serde_json::to_value(concept).unwrap(),
                )
                .await
                .unwrap();
        }
        branches.complete_commit(commit).await.unwrap();
        Fixture { store, branches }
    }

    async fn fixture() -> Fixture {
        fixture_with(Arc::new(MemoryIndex::new())).await
    }

    async fn select(fixture: &Fixture, ecl: &str) -> Vec<ConceptId> {
        let scope = VersionScope::for_branch(&fixture.branches, &BranchPath::root())
            .await
            .unwrap();
        let service = EclQueryService::new(fixture.store.clone());
        service
            .select_all_concept_ids(&parse(ecl).unwrap(), &scope, Form::Inferred)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn hierarchy_operators_select_the_right_rows() {
        let fixture = fixture().await;
        assert_eq!(select(&fixture, "404684003").await, vec![FINDING]);
        assert_eq!(select(&fixture, "< 404684003").await, vec![MI, STROKE]);
        assert_eq!(
            select(&fixture, "<< 404684003").await,
            vec![MI, STROKE, FINDING]
        );
        assert_eq!(select(&fixture, "<! 404684003").await, vec![MI, STROKE]);
        assert_eq!(select(&fixture, "> 22298006").await, vec![FINDING]);
        assert_eq!(
            select(&fixture, ">> 22298006").await,
            vec![MI, FINDING]
        );
        assert_eq!(select(&fixture, ">! 22298006").await, vec![FINDING]);
        assert_eq!(select(&fixture, "> 404684003").await, Vec::<ConceptId>::new());
    }

    #[tokio::test]
    async fn refined_constraint_narrows_by_attribute() {
        let fixture = fixture().await;
        assert_eq!(
            select(&fixture, "< 404684003 : 363698007 = 80891009").await,
            vec![MI]
        );
        assert_eq!(
            select(&fixture, "< 404684003 : 363698007 = *").await,
            vec![MI, STROKE]
        );
        assert_eq!(
            select(&fixture, "< 404684003 : * = 12738006").await,
            vec![STROKE]
        );
    }

    #[tokio::test]
    async fn expanded_attribute_value_uses_the_hierarchy() {
        let fixture = fixture().await;
        assert_eq!(
            select(&fixture, "< 404684003 : 363698007 = << 123037004").await,
            vec![MI, STROKE]
        );
        assert_eq!(
            select(&fixture, "< 404684003 : 363698007 = << 404684003").await,
            Vec::<ConceptId>::new()
        );
        // A not-equal criterion keeps concepts whose value falls outside.
        assert_eq!(
            select(&fixture, "< 404684003 : 363698007 != 80891009").await,
            vec![STROKE]
        );
    }

    #[tokio::test]
    async fn nested_constraints_resolve_recursively() {
        let fixture = fixture().await;
        // The inner refined constraint selects MI alone, and the outer
        // descendant-or-self closure adds nothing below it.
        assert_eq!(
            select(&fixture, "<< (< 404684003 : 363698007 = 80891009)").await,
            vec![MI]
        );
        // A nested constraint as attribute value expands like any selector.
        assert_eq!(
            select(&fixture, "< 404684003 : 363698007 = (< 123037004)").await,
            vec![MI, STROKE]
        );
        // Nested focus under a downward operator excludes the inner matches.
        assert_eq!(
            select(&fixture, "< (<< 404684003 : 363698007 = *)").await,
            Vec::<ConceptId>::new()
        );
    }

    #[tokio::test]
    async fn upward_operators_batch_wide_ancestor_sets() {
        let store = Arc::new(MemoryIndex::with_clause_limit(2));
        let fixture = fixture_with(store.clone()).await;

        // Three ancestors exceed a two-value terms clause unless batched.
        let root = BranchPath::root();
        let commit = fixture.branches.open_commit(&root).await.unwrap();
        let leaf = QueryConcept::new(
            999_001,
            Form::Inferred,
            BTreeSet::from([MI]),
            BTreeSet::from([FINDING, MI, BODY]),
            GroupedAttributes::new(),
            root.clone(),
            commit.timepoint(),
        );
        store
            .save(QueryConcept::COLLECTION, serde_json::to_value(&leaf).unwrap())
            .await
            .unwrap();
        fixture.branches.complete_commit(commit).await.unwrap();

        let scope = VersionScope::for_branch(&fixture.branches, &BranchPath::root())
            .await
            .unwrap();
        let service = EclQueryService::with_clause_limit(store, 2);
        let ids = service
            .select_all_concept_ids(&parse("> 999001").unwrap(), &scope, Form::Inferred)
            .await
            .unwrap();
        assert_eq!(ids, vec![MI, BODY, FINDING]);
    }

    #[tokio::test]
    async fn id_filter_preserves_the_caller_order() {
        let fixture = fixture().await;
        let scope = VersionScope::for_branch(&fixture.branches, &BranchPath::root())
            .await
            .unwrap();
        let service = EclQueryService::new(fixture.store.clone());
        let filter = vec![STROKE, 999_999, MI];
        let page = service
            .select_concept_ids(
                &parse("< 404684003").unwrap(),
                &scope,
                Form::Inferred,
                Some(&filter),
                &PageRequest::of(10),
            )
            .await
            .unwrap();
        assert_eq!(page.content, vec![STROKE, MI]);
    }

    #[tokio::test]
    async fn batched_id_filter_matches_the_unbatched_result() {
        let fixture = fixture().await;
        let scope = VersionScope::for_branch(&fixture.branches, &BranchPath::root())
            .await
            .unwrap();
        let constraint = parse("<< 404684003").unwrap();
        let filter = vec![FINDING, MI, STROKE, 1, 2, 3];

        let unbatched = EclQueryService::new(fixture.store.clone());
        let batched = EclQueryService::with_clause_limit(fixture.store.clone(), 2);
        let a = unbatched
            .select_concept_ids(
                &constraint,
                &scope,
                Form::Inferred,
                Some(&filter),
                &PageRequest::of(10),
            )
            .await
            .unwrap();
        let b = batched
            .select_concept_ids(
                &constraint,
                &scope,
                Form::Inferred,
                Some(&filter),
                &PageRequest::of(10),
            )
            .await
            .unwrap();
        assert_eq!(a.content, b.content);
        assert_eq!(a.content, vec![FINDING, MI, STROKE]);
        assert_eq!(a.total, b.total);
    }

    #[tokio::test]
    async fn stated_form_is_empty_in_this_fixture() {
        let fixture = fixture().await;
        let scope = VersionScope::for_branch(&fixture.branches, &BranchPath::root())
            .await
            .unwrap();
        let service = EclQueryService::new(fixture.store.clone());
        let ids = service
            .select_all_concept_ids(&parse("<< 404684003").unwrap(), &scope, Form::Stated)
            .await
            .unwrap();
        assert!(ids.is_empty());
    }

    #[tokio::test]
    async fn pagination_walks_the_result_set() {
        let fixture = fixture().await;
        let scope = VersionScope::for_branch(&fixture.branches, &BranchPath::root())
            .await
            .unwrap();
        let service = EclQueryService::new(fixture.store.clone());
        let constraint = parse("<< 404684003").unwrap();
        let first = service
            .select_concept_ids(&constraint, &scope, Form::Inferred, None, &PageRequest::of(2))
            .await
            .unwrap();
        assert_eq!(first.content, vec![MI, STROKE]);
        assert_eq!(first.total, 3);
        let second = service
            .select_concept_ids(
                &constraint,
                &scope,
                Form::Inferred,
                None,
                &PageRequest::after(2, first.search_after.as_deref().unwrap()),
            )
            .await
            .unwrap();
        assert_eq!(second.content, vec![FINDING]);
    }
}
