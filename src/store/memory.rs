use crate::error::{Result, TermbaseError};
use crate::store::search::{
    decode_search_after, encode_search_after, Clause, PageRequest, SearchPage, SearchQuery, Sort,
    SortOrder,
};
use crate::store::traits::{DocStream, SearchEngine, CLAUSE_LIMIT};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::{json, Value};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};

/// In-memory document store. Each collection is a map from `_id` to a JSON
/// document; queries are evaluated by full scan, which is plenty for tests
/// and single-node deployments.
pub struct MemoryIndex {
    collections: RwLock<HashMap<String, BTreeMap<String, Value>>>,
    max_clause_count: usize,
}

impl Default for MemoryIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self::with_clause_limit(CLAUSE_LIMIT)
    }

    pub fn with_clause_limit(max_clause_count: usize) -> Self {
        Self {
            collections: RwLock::new(HashMap::new()),
            max_clause_count,
        }
    }

    fn matching_docs(
        &self,
        collection: &str,
        query: &SearchQuery,
        sort: &[Sort],
    ) -> Result<Vec<Value>> {
        self.check_clause_counts(query)?;
        let collections = self.collections.read();
        let mut matched: Vec<Value> = collections
            .get(collection)
            .map(|docs| {
                docs.values()
                    .filter(|doc| query_matches(query, doc))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        matched.sort_by(|a, b| compare_docs(a, b, sort));
        Ok(matched)
    }

    fn check_clause_counts(&self, query: &SearchQuery) -> Result<()> {
        for clause in query
            .must
            .iter()
            .chain(query.must_not.iter())
            .chain(query.should.iter())
        {
            match clause {
                Clause::Terms { field, values } if values.len() > self.max_clause_count => {
                    return Err(TermbaseError::TooManyClauses {
                        field: field.clone(),
                        count: values.len(),
                        limit: self.max_clause_count,
                    });
                }
                Clause::Sub(sub) => self.check_clause_counts(sub)?,
                _ => {}
            }
        }
        Ok(())
    }
}

#[async_trait]
impl SearchEngine for MemoryIndex {
    async fn save(&self, collection: &str, doc: Value) -> Result<()> {
        self.save_batch(collection, vec![doc]).await
    }

    async fn save_batch(&self, collection: &str, docs: Vec<Value>) -> Result<()> {
        let mut keyed = Vec::with_capacity(docs.len());
        for doc in docs {
            let id = doc
                .get("_id")
                .and_then(|v| v.as_str())
                .ok_or_else(|| {
                    TermbaseError::integrity(format!(
                        "document for collection '{collection}' has no _id"
                    ))
                })?
                .to_string();
            keyed.push((id, doc));
        }
        let mut collections = self.collections.write();
        let coll = collections.entry(collection.to_string()).or_default();
        for (id, doc) in keyed {
            coll.insert(id, doc);
        }
        Ok(())
    }

    async fn search(
        &self,
        collection: &str,
        query: &SearchQuery,
        sort: &[Sort],
        page: &PageRequest,
    ) -> Result<SearchPage<Value>> {
        let matched = self.matching_docs(collection, query, sort)?;
        let total = matched.len();
        let from = match &page.search_after {
            Some(token) => {
                let key = decode_search_after(token)?;
                matched
                    .iter()
                    .position(|doc| sort_key(doc, sort) == key)
                    .map(|index| index + 1)
                    .unwrap_or(total)
            }
            None => 0,
        };
        let content: Vec<Value> = matched.into_iter().skip(from).take(page.size).collect();
        let search_after = content
            .last()
            .map(|doc| encode_search_after(&sort_key(doc, sort)));
        Ok(SearchPage {
            content,
            total,
            search_after,
        })
    }

    async fn stream(
        &self,
        collection: &str,
        query: &SearchQuery,
        sort: &[Sort],
    ) -> Result<DocStream> {
        let matched = self.matching_docs(collection, query, sort)?;
        Ok(Box::new(matched.into_iter()))
    }
}

/// Resolve a dotted field path within a document.
fn field_value<'a>(doc: &'a Value, field: &str) -> Option<&'a Value> {
    let mut current = doc;
    for segment in field.split('.') {
        current = current.get(segment)?;
    }
    Some(current)
}

/// A clause value matches an array field if it matches any element.
fn value_matches(actual: &Value, expected: &Value) -> bool {
    match actual {
        Value::Array(items) => items.iter().any(|item| item == expected),
        other => other == expected,
    }
}

fn query_matches(query: &SearchQuery, doc: &Value) -> bool {
    query.must.iter().all(|c| clause_matches(c, doc))
        && !query.must_not.iter().any(|c| clause_matches(c, doc))
        && (query.should.is_empty() || query.should.iter().any(|c| clause_matches(c, doc)))
}

fn clause_matches(clause: &Clause, doc: &Value) -> bool {
    match clause {
        Clause::Term { field, value } => field_value(doc, field)
            .map(|actual| value_matches(actual, value))
            .unwrap_or(false),
        Clause::Terms { field, values } => field_value(doc, field)
            .map(|actual| values.iter().any(|value| value_matches(actual, value)))
            .unwrap_or(false),
        Clause::Range {
            field,
            gt,
            gte,
            lt,
            lte,
        } => match field_value(doc, field) {
            Some(actual) => {
                gt.as_ref()
                    .map_or(true, |b| compare_values(actual, b) == Ordering::Greater)
                    && gte
                        .as_ref()
                        .map_or(true, |b| compare_values(actual, b) != Ordering::Less)
                    && lt
                        .as_ref()
                        .map_or(true, |b| compare_values(actual, b) == Ordering::Less)
                    && lte
                        .as_ref()
                        .map_or(true, |b| compare_values(actual, b) != Ordering::Greater)
            }
            None => false,
        },
        Clause::Exists { field } => match field_value(doc, field) {
            Some(Value::Null) => false,
            Some(Value::Array(items)) => !items.is_empty(),
            Some(_) => true,
            None => false,
        },
        Clause::Prefix { field, value } => field_value(doc, field)
            .and_then(|actual| actual.as_str())
            .map(|s| s.starts_with(value.as_str()))
            .unwrap_or(false),
        Clause::Sub(sub) => query_matches(sub, doc),
    }
}

fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        _ => a.to_string().cmp(&b.to_string()),
    }
}

/// Sort key for a document: configured sort fields followed by `_id` as the
/// tiebreaker, which also makes search-after keys unique per document.
fn sort_key(doc: &Value, sort: &[Sort]) -> Value {
    let mut key: Vec<Value> = sort
        .iter()
        .map(|s| field_value(doc, &s.field).cloned().unwrap_or(Value::Null))
        .collect();
    key.push(doc.get("_id").cloned().unwrap_or(Value::Null));
    json!(key)
}

fn compare_docs(a: &Value, b: &Value, sort: &[Sort]) -> Ordering {
    for s in sort {
        let av = field_value(a, &s.field).unwrap_or(&Value::Null);
        let bv = field_value(b, &s.field).unwrap_or(&Value::Null);
        let ordering = match s.order {
            SortOrder::Asc => compare_values(av, bv),
            SortOrder::Desc => compare_values(bv, av),
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    let a_id = a.get("_id").unwrap_or(&Value::Null);
    let b_id = b.get("_id").unwrap_or(&Value::Null);
    compare_values(a_id, b_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::search::{PageRequest, Sort};

    fn doc(id: &str, concept_id: u64, term: &str) -> Value {
        json!({ "_id": id, "conceptId": concept_id, "term": term, "attr": { "all": ["100"] } })
    }

    async fn seeded() -> MemoryIndex {
        let index = MemoryIndex::new();
        index
            .save_batch(
                "descriptions",
                vec![
                    doc("a", 1, "Heart attack"),
                    doc("b", 2, "Heart failure"),
                    doc("c", 3, "Kidney failure"),
                ],
            )
            .await
            .unwrap();
        index
    }

    #[tokio::test]
    async fn term_clause_matches_dotted_array_field() {
        let index = seeded().await;
        let query = SearchQuery::new().must(Clause::term("attr.all", json!("100")));
        let page = index
            .search("descriptions", &query, &[], &PageRequest::of(10))
            .await
            .unwrap();
        assert_eq!(page.total, 3);
    }

    #[tokio::test]
    async fn prefix_and_must_not_combine() {
        let index = seeded().await;
        let query = SearchQuery::new()
            .must(Clause::prefix("term", "Heart"))
            .must_not(Clause::term("conceptId", json!(2)));
        let page = index
            .search("descriptions", &query, &[], &PageRequest::of(10))
            .await
            .unwrap();
        assert_eq!(page.content.len(), 1);
        assert_eq!(page.content[0]["_id"], json!("a"));
    }

    #[tokio::test]
    async fn range_is_half_open_with_gte_and_lt() {
        let index = seeded().await;
        let query = SearchQuery::new().must(Clause::Range {
            field: "conceptId".to_string(),
            gt: None,
            gte: Some(json!(2)),
            lt: Some(json!(3)),
            lte: None,
        });
        let page = index
            .search("descriptions", &query, &[], &PageRequest::of(10))
            .await
            .unwrap();
        assert_eq!(page.content.len(), 1);
        assert_eq!(page.content[0]["conceptId"], json!(2));
    }

    #[tokio::test]
    async fn search_after_pages_in_sort_order() {
        let index = seeded().await;
        let sort = vec![Sort::desc("conceptId")];
        let first = index
            .search(
                "descriptions",
                &SearchQuery::new(),
                &sort,
                &PageRequest::of(2),
            )
            .await
            .unwrap();
        assert_eq!(first.content[0]["conceptId"], json!(3));
        let second = index
            .search(
                "descriptions",
                &SearchQuery::new(),
                &sort,
                &PageRequest::after(2, first.search_after.as_deref().unwrap()),
            )
            .await
            .unwrap();
        assert_eq!(second.content.len(), 1);
        assert_eq!(second.content[0]["conceptId"], json!(1));
    }

    #[tokio::test]
    async fn oversized_terms_clause_is_rejected() {
        let index = MemoryIndex::with_clause_limit(2);
        let query = SearchQuery::new().must(Clause::terms(
            "conceptId",
            vec![json!(1), json!(2), json!(3)],
        ));
        let err = index
            .search("descriptions", &query, &[], &PageRequest::of(10))
            .await
            .unwrap_err();
        assert!(matches!(err, TermbaseError::TooManyClauses { count: 3, .. }));
    }

    #[tokio::test]
    async fn document_without_an_id_is_an_integrity_violation() {
        let index = MemoryIndex::new();
        let err = index
            .save("descriptions", json!({ "term": "orphan" }))
            .await
            .unwrap_err();
        assert!(matches!(err, TermbaseError::IntegrityViolation(_)));
    }

    #[tokio::test]
    async fn exists_ignores_null_and_empty_arrays() {
        let index = MemoryIndex::new();
        index
            .save_batch(
                "c",
                vec![
                    json!({ "_id": "1", "end": null }),
                    json!({ "_id": "2", "end": 5 }),
                    json!({ "_id": "3", "tags": [] }),
                ],
            )
            .await
            .unwrap();
        let page = index
            .search(
                "c",
                &SearchQuery::new().must(Clause::exists("end")),
                &[],
                &PageRequest::of(10),
            )
            .await
            .unwrap();
        assert_eq!(page.content.len(), 1);
        assert_eq!(page.content[0]["_id"], json!("2"));
    }
}
