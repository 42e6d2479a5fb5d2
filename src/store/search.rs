use crate::error::{Result, TermbaseError};
use crate::model::ConceptId;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One boolean predicate over a document field. Field names are dotted paths
/// (`attr.127489000`); a clause against an array field matches if any element
/// matches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Clause {
    Term {
        field: String,
        value: Value,
    },
    Terms {
        field: String,
        values: Vec<Value>,
    },
    Range {
        field: String,
        gt: Option<Value>,
        gte: Option<Value>,
        lt: Option<Value>,
        lte: Option<Value>,
    },
    Exists {
        field: String,
    },
    Prefix {
        field: String,
        value: String,
    },
    /// Nested boolean query.
    Sub(SearchQuery),
}

impl Clause {
    pub fn term(field: &str, value: Value) -> Clause {
        Clause::Term {
            field: field.to_string(),
            value,
        }
    }

    pub fn terms(field: &str, values: Vec<Value>) -> Clause {
        Clause::Terms {
            field: field.to_string(),
            values,
        }
    }

    pub fn exists(field: &str) -> Clause {
        Clause::Exists {
            field: field.to_string(),
        }
    }

    pub fn prefix(field: &str, value: &str) -> Clause {
        Clause::Prefix {
            field: field.to_string(),
            value: value.to_string(),
        }
    }

    pub fn range_lte(field: &str, value: Value) -> Clause {
        Clause::Range {
            field: field.to_string(),
            gt: None,
            gte: None,
            lt: None,
            lte: Some(value),
        }
    }

    pub fn range_gt(field: &str, value: Value) -> Clause {
        Clause::Range {
            field: field.to_string(),
            gt: Some(value),
            gte: None,
            lt: None,
            lte: None,
        }
    }
}

/// A boolean query: all `must` clauses hold, no `must_not` clause holds, and
/// at least one `should` clause holds when any are present.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SearchQuery {
    #[serde(default)]
    pub must: Vec<Clause>,
    #[serde(default)]
    pub must_not: Vec<Clause>,
    #[serde(default)]
    pub should: Vec<Clause>,
}

impl SearchQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn must(mut self, clause: Clause) -> Self {
        self.must.push(clause);
        self
    }

    pub fn must_not(mut self, clause: Clause) -> Self {
        self.must_not.push(clause);
        self
    }

    pub fn should(mut self, clause: Clause) -> Self {
        self.should.push(clause);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sort {
    pub field: String,
    pub order: SortOrder,
}

impl Sort {
    pub fn asc(field: &str) -> Sort {
        Sort {
            field: field.to_string(),
            order: SortOrder::Asc,
        }
    }

    pub fn desc(field: &str) -> Sort {
        Sort {
            field: field.to_string(),
            order: SortOrder::Desc,
        }
    }
}

/// Page request carrying an opaque search-after token instead of an offset,
/// so pages stay stable while the underlying index is rebuilt between calls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageRequest {
    pub size: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search_after: Option<String>,
}

impl PageRequest {
    pub fn of(size: usize) -> Self {
        Self {
            size,
            search_after: None,
        }
    }

    pub fn after(size: usize, token: &str) -> Self {
        Self {
            size,
            search_after: Some(token.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchPage<T> {
    pub content: Vec<T>,
    pub total: usize,
    /// Token for the next page; present whenever the page is non-empty.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search_after: Option<String>,
}

impl<T> SearchPage<T> {
    pub fn empty() -> Self {
        Self {
            content: Vec::new(),
            total: 0,
            search_after: None,
        }
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> SearchPage<U> {
        SearchPage {
            content: self.content.into_iter().map(f).collect(),
            total: self.total,
            search_after: self.search_after,
        }
    }
}

/// Encode a sort key as an opaque search-after token.
pub fn encode_search_after(key: &Value) -> String {
    hex::encode(serde_json::to_vec(key).unwrap_or_default())
}

pub fn decode_search_after(token: &str) -> Result<Value> {
    let bytes = hex::decode(token)
        .map_err(|e| TermbaseError::InvalidExpression(format!("bad search-after token: {e}")))?;
    serde_json::from_slice(&bytes)
        .map_err(|e| TermbaseError::InvalidExpression(format!("bad search-after token: {e}")))
}

/// Page a fully materialized, already ordered id list. The token identifies
/// the last returned id by value, so the page boundary survives id
/// insertions elsewhere in the list.
pub fn page_id_list(ids: &[ConceptId], page: &PageRequest) -> Result<SearchPage<ConceptId>> {
    let from = match &page.search_after {
        Some(token) => {
            let key = decode_search_after(token)?;
            let last: ConceptId = serde_json::from_value(key).map_err(|e| {
                TermbaseError::InvalidExpression(format!("bad search-after token: {e}"))
            })?;
            match ids.iter().position(|id| *id == last) {
                Some(index) => index + 1,
                None => ids.len(),
            }
        }
        None => 0,
    };
    let content: Vec<ConceptId> = ids.iter().skip(from).take(page.size).copied().collect();
    let search_after = content
        .last()
        .map(|last| encode_search_after(&serde_json::json!(last)));
    Ok(SearchPage {
        content,
        total: ids.len(),
        search_after,
    })
}
