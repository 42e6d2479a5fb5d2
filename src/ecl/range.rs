use crate::ecl::ast::{Cardinality, ComparisonOperator};
use crate::model::{AttributeValue, MatchContext};
use std::collections::{BTreeSet, HashMap, HashSet};

/// A fully resolved attribute criterion: hierarchy-expanded type ids, a
/// comparison operator and the resolved operand. Evaluated against the
/// grouped attributes of one concept.
#[derive(Debug, Clone)]
pub struct AttributeRange {
    type_wildcard: bool,
    /// Matching attribute type ids, as document field keys.
    type_fields: BTreeSet<String>,
    operator: ComparisonOperator,
    /// Concept operand: `Some` is the expanded value set, `None` is `*`.
    possible_values: Option<HashSet<String>>,
    numeric_value: Option<f64>,
    text_value: Option<String>,
    cardinality: Cardinality,
}

impl AttributeRange {
    pub fn concept_range(
        type_wildcard: bool,
        type_fields: BTreeSet<String>,
        operator: ComparisonOperator,
        possible_values: Option<HashSet<String>>,
        cardinality: Cardinality,
    ) -> Self {
        Self {
            type_wildcard,
            type_fields,
            operator,
            possible_values,
            numeric_value: None,
            text_value: None,
            cardinality,
        }
    }

    pub fn concrete_number_range(
        type_wildcard: bool,
        type_fields: BTreeSet<String>,
        operator: ComparisonOperator,
        value: f64,
        cardinality: Cardinality,
    ) -> Self {
        Self {
            type_wildcard,
            type_fields,
            operator,
            possible_values: None,
            numeric_value: Some(value),
            text_value: None,
            cardinality,
        }
    }

    pub fn concrete_string_range(
        type_wildcard: bool,
        type_fields: BTreeSet<String>,
        operator: ComparisonOperator,
        value: String,
        cardinality: Cardinality,
    ) -> Self {
        Self {
            type_wildcard,
            type_fields,
            operator,
            possible_values: None,
            numeric_value: None,
            text_value: Some(value),
            cardinality,
        }
    }

    pub fn type_wildcard(&self) -> bool {
        self.type_wildcard
    }

    pub fn type_fields(&self) -> &BTreeSet<String> {
        &self.type_fields
    }

    pub fn operator(&self) -> ComparisonOperator {
        self.operator
    }

    pub fn possible_values(&self) -> Option<&HashSet<String>> {
        self.possible_values.as_ref()
    }

    pub fn cardinality(&self) -> Cardinality {
        self.cardinality
    }

    pub fn is_concept_range(&self) -> bool {
        self.numeric_value.is_none() && self.text_value.is_none()
    }

    /// A criterion translates directly into index clauses only when it is a
    /// plain equality over concept values with the default cardinality, and
    /// the expanded value set fits in a single set-membership clause.
    /// Everything else needs the per-concept inclusion filter.
    pub fn is_push_downable(&self, clause_limit: usize) -> bool {
        self.is_concept_range()
            && self.operator == ComparisonOperator::Equal
            && self.cardinality.is_default()
            && self
                .possible_values
                .as_ref()
                .map_or(true, |values| values.len() <= clause_limit)
    }

    pub fn is_type_within_range(&self, type_key: &str) -> bool {
        self.type_wildcard || self.type_fields.contains(type_key)
    }

    pub fn is_value_within_range(&self, value: &AttributeValue) -> bool {
        if let Some(expected) = self.numeric_value {
            let AttributeValue::Number(actual) = value else {
                return false;
            };
            return match self.operator {
                ComparisonOperator::Equal => *actual == expected,
                ComparisonOperator::NotEqual => *actual != expected,
                ComparisonOperator::LessThan => *actual < expected,
                ComparisonOperator::LessOrEqual => *actual <= expected,
                ComparisonOperator::GreaterThan => *actual > expected,
                ComparisonOperator::GreaterOrEqual => *actual >= expected,
            };
        }
        if let Some(expected) = &self.text_value {
            let AttributeValue::Text(actual) = value else {
                return false;
            };
            return match self.operator {
                ComparisonOperator::Equal => actual == expected,
                ComparisonOperator::NotEqual => actual != expected,
                _ => false,
            };
        }
        let AttributeValue::Concept(id) = value else {
            return false;
        };
        let within = self
            .possible_values
            .as_ref()
            .map_or(true, |values| values.contains(&id.to_string()));
        (self.operator == ComparisonOperator::Equal) == within
    }

    /// Count of matching attribute occurrences within one group.
    fn match_count(&self, group: &HashMap<String, Vec<AttributeValue>>) -> u32 {
        group
            .iter()
            .filter(|(type_key, _)| self.is_type_within_range(type_key))
            .map(|(_, values)| {
                values
                    .iter()
                    .filter(|value| self.is_value_within_range(value))
                    .count() as u32
            })
            .sum()
    }

    /// Whether one relationship group satisfies type, value and cardinality
    /// together. Occurrences are counted within the group, never across
    /// groups.
    pub fn matches_group(&self, group: &HashMap<String, Vec<AttributeValue>>) -> bool {
        self.cardinality.accepts(self.match_count(group))
    }

    /// A concept matches when some group's occurrence count falls within the
    /// bounds. A zero minimum flips the quantifier: every group must stay
    /// under the upper bound, and a concept with no groups passes vacuously.
    pub fn is_match(&self, context: &MatchContext<'_>) -> bool {
        if self.cardinality.min == 0 {
            return context
                .groups()
                .all(|(_, group)| self.matches_group(group));
        }
        context.groups().any(|(_, group)| self.matches_group(group))
    }
}
