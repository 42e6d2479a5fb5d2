//! Compilation of resolved refinements into index clauses.
//!
//! Plain equality attributes with default cardinality translate exactly into
//! clauses over the flattened `attr.<typeId>` fields. Everything else gets at
//! most a coarse presence clause to narrow the candidate set, and the builder
//! flags that matched concepts must still pass [`CompiledRefinement::is_match`]
//! one by one.

use crate::ecl::ast::SetOperator;
use crate::ecl::range::AttributeRange;
use crate::model::{AttributeValue, MatchContext, ATTR_TYPE_WILDCARD};
use crate::store::search::{Clause, SearchQuery};
use serde_json::json;
use std::collections::HashMap;

/// A refinement with every attribute criterion resolved to an
/// [`AttributeRange`].
#[derive(Debug, Clone)]
pub struct CompiledRefinement {
    pub set_operator: SetOperator,
    pub members: Vec<CompiledAttributeSet>,
}

#[derive(Debug, Clone)]
pub enum CompiledAttributeSet {
    Attribute(AttributeRange),
    Group(Box<CompiledRefinement>),
}

impl CompiledRefinement {
    /// Full refinement semantics against one concept.
    pub fn is_match(&self, context: &MatchContext<'_>) -> bool {
        let mut members = self.members.iter();
        match self.set_operator {
            SetOperator::Conjunction => members.all(|m| m.is_match(context)),
            SetOperator::Disjunction => members.any(|m| m.is_match(context)),
            SetOperator::Exclusion => {
                let Some(first) = members.next() else {
                    return false;
                };
                first.is_match(context) && !members.any(|m| m.is_match(context))
            }
        }
    }

    /// Refinement semantics restricted to a single relationship group.
    fn matches_group(&self, group: &HashMap<String, Vec<AttributeValue>>) -> bool {
        let mut members = self.members.iter();
        match self.set_operator {
            SetOperator::Conjunction => members.all(|m| m.matches_group(group)),
            SetOperator::Disjunction => members.any(|m| m.matches_group(group)),
            SetOperator::Exclusion => {
                let Some(first) = members.next() else {
                    return false;
                };
                first.matches_group(group) && !members.any(|m| m.matches_group(group))
            }
        }
    }
}

impl CompiledAttributeSet {
    fn is_match(&self, context: &MatchContext<'_>) -> bool {
        match self {
            CompiledAttributeSet::Attribute(range) => range.is_match(context),
            // An attribute group matches when some single group satisfies
            // the whole inner refinement together.
            CompiledAttributeSet::Group(inner) => context
                .groups()
                .any(|(_, group)| inner.matches_group(group)),
        }
    }

    fn matches_group(&self, group: &HashMap<String, Vec<AttributeValue>>) -> bool {
        match self {
            CompiledAttributeSet::Attribute(range) => range.matches_group(group),
            CompiledAttributeSet::Group(inner) => inner.matches_group(group),
        }
    }
}

/// Adds refinement clauses to a query under construction and tracks whether
/// the pushed clauses are exact or only sound.
pub struct RefinementBuilder<'a> {
    query: &'a mut SearchQuery,
    clause_limit: usize,
    inclusion_filter_required: bool,
}

impl<'a> RefinementBuilder<'a> {
    pub fn new(query: &'a mut SearchQuery, clause_limit: usize) -> Self {
        Self {
            query,
            clause_limit,
            inclusion_filter_required: false,
        }
    }

    pub fn add_criteria(&mut self, refinement: &CompiledRefinement) {
        let (clause, exact) = refinement_clause(refinement, self.clause_limit);
        if let Some(clause) = clause {
            self.query.must.push(clause);
        }
        if !exact {
            self.inclusion_filter_required = true;
        }
    }

    pub fn inclusion_filter_required(&self) -> bool {
        self.inclusion_filter_required
    }
}

/// Clause for a whole refinement level, plus whether it is exact. A `None`
/// clause narrows nothing; exactness then never holds.
fn refinement_clause(
    refinement: &CompiledRefinement,
    clause_limit: usize,
) -> (Option<Clause>, bool) {
    match refinement.set_operator {
        SetOperator::Conjunction => {
            let mut must = Vec::new();
            let mut exact = true;
            for member in &refinement.members {
                let (clause, member_exact) = member_clause(member, clause_limit);
                exact &= member_exact;
                if let Some(clause) = clause {
                    must.push(clause);
                } else {
                    exact = false;
                }
            }
            if must.is_empty() {
                (None, false)
            } else if must.len() == 1 {
                (Some(must.remove(0)), exact)
            } else {
                (
                    Some(Clause::Sub(SearchQuery {
                        must,
                        must_not: Vec::new(),
                        should: Vec::new(),
                    })),
                    exact,
                )
            }
        }
        SetOperator::Disjunction => {
            let mut should = Vec::new();
            let mut exact = true;
            for member in &refinement.members {
                let (clause, member_exact) = member_clause(member, clause_limit);
                exact &= member_exact;
                match clause {
                    Some(clause) => should.push(clause),
                    // One unbounded branch makes the union unbounded.
                    None => return (None, false),
                }
            }
            (
                Some(Clause::Sub(SearchQuery {
                    must: Vec::new(),
                    must_not: Vec::new(),
                    should,
                })),
                exact,
            )
        }
        SetOperator::Exclusion => {
            let mut members = refinement.members.iter();
            let Some(first) = members.next() else {
                return (None, false);
            };
            let (first_clause, mut exact) = member_clause(first, clause_limit);
            let Some(first_clause) = first_clause else {
                return (None, false);
            };
            let mut must_not = Vec::new();
            for member in members {
                let (clause, member_exact) = member_clause(member, clause_limit);
                // A subtracted clause may only be pushed when exact, an
                // over-approximation under must_not would drop matches.
                if member_exact {
                    if let Some(clause) = clause {
                        must_not.push(clause);
                        continue;
                    }
                }
                exact = false;
            }
            if must_not.is_empty() {
                (Some(first_clause), exact)
            } else {
                (
                    Some(Clause::Sub(SearchQuery {
                        must: vec![first_clause],
                        must_not,
                        should: Vec::new(),
                    })),
                    exact,
                )
            }
        }
    }
}

fn member_clause(member: &CompiledAttributeSet, clause_limit: usize) -> (Option<Clause>, bool) {
    match member {
        CompiledAttributeSet::Attribute(range) => attribute_clause(range, clause_limit),
        // The flattened attribute fields carry no group boundaries, so a
        // group member is never exact.
        CompiledAttributeSet::Group(inner) => {
            let (clause, _) = refinement_clause(inner, clause_limit);
            (clause, false)
        }
    }
}

fn attribute_clause(range: &AttributeRange, clause_limit: usize) -> (Option<Clause>, bool) {
    let fields: Vec<String> = if range.type_wildcard() {
        vec![format!("attr.{ATTR_TYPE_WILDCARD}")]
    } else {
        range
            .type_fields()
            .iter()
            .map(|id| format!("attr.{id}"))
            .collect()
    };
    if range.is_push_downable(clause_limit) {
        let per_field: Vec<Clause> = fields
            .iter()
            .map(|field| match range.possible_values() {
                Some(values) => {
                    let mut sorted: Vec<&String> = values.iter().collect();
                    sorted.sort();
                    Clause::terms(field, sorted.into_iter().map(|v| json!(v)).collect())
                }
                None => Clause::exists(field),
            })
            .collect();
        (Some(combine_should(per_field)), true)
    } else if range.cardinality().min >= 1 {
        // Presence of the attribute type is implied, push that much.
        let per_field: Vec<Clause> = fields.iter().map(|field| Clause::exists(field)).collect();
        (Some(combine_should(per_field)), false)
    } else {
        (None, false)
    }
}

fn combine_should(mut clauses: Vec<Clause>) -> Clause {
    if clauses.len() == 1 {
        clauses.remove(0)
    } else {
        Clause::Sub(SearchQuery {
            must: Vec::new(),
            must_not: Vec::new(),
            should: clauses,
        })
    }
}
