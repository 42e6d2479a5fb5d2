use crate::model::ConceptId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Hierarchy operator prefixing a focus concept or attribute operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HierarchyOperator {
    SelfOnly,
    DescendantOf,
    DescendantOrSelfOf,
    AncestorOf,
    AncestorOrSelfOf,
    ChildOf,
    ParentOf,
}

impl fmt::Display for HierarchyOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let symbol = match self {
            HierarchyOperator::SelfOnly => "",
            HierarchyOperator::DescendantOf => "<",
            HierarchyOperator::DescendantOrSelfOf => "<<",
            HierarchyOperator::AncestorOf => ">",
            HierarchyOperator::AncestorOrSelfOf => ">>",
            HierarchyOperator::ChildOf => "<!",
            HierarchyOperator::ParentOf => ">!",
        };
        f.write_str(symbol)
    }
}

/// What a subexpression selects before its hierarchy operator applies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FocusConcept {
    Wildcard,
    Concept(ConceptId),
    /// A parenthesized constraint whose result set becomes the focus.
    Nested(Box<ExpressionConstraint>),
}

/// A focus with an optional hierarchy operator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubExpressionConstraint {
    pub operator: HierarchyOperator,
    pub focus: FocusConcept,
}

impl SubExpressionConstraint {
    pub fn wildcard() -> Self {
        Self {
            operator: HierarchyOperator::SelfOnly,
            focus: FocusConcept::Wildcard,
        }
    }

    pub fn of_concept(operator: HierarchyOperator, concept_id: ConceptId) -> Self {
        Self {
            operator,
            focus: FocusConcept::Concept(concept_id),
        }
    }

    pub fn is_wildcard(&self) -> bool {
        matches!(self.focus, FocusConcept::Wildcard)
    }
}

/// Top level of a parsed expression constraint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ExpressionConstraint {
    Sub(SubExpressionConstraint),
    Refined {
        focus: SubExpressionConstraint,
        refinement: Refinement,
    },
}

/// How sibling members of a refinement combine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SetOperator {
    Conjunction,
    Disjunction,
    /// First member minus every following member.
    Exclusion,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Refinement {
    pub set_operator: SetOperator,
    pub members: Vec<SubAttributeSet>,
}

impl Refinement {
    pub fn single(attribute: EclAttribute) -> Self {
        Self {
            set_operator: SetOperator::Conjunction,
            members: vec![SubAttributeSet::Attribute(attribute)],
        }
    }
}

/// One member of a refinement. Tagged so a member is exactly one of an
/// attribute criterion or a nested attribute group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SubAttributeSet {
    Attribute(EclAttribute),
    Group(Box<Refinement>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ComparisonOperator {
    Equal,
    NotEqual,
    LessThan,
    LessOrEqual,
    GreaterThan,
    GreaterOrEqual,
}

impl ComparisonOperator {
    pub fn is_equality(&self) -> bool {
        matches!(
            self,
            ComparisonOperator::Equal | ComparisonOperator::NotEqual
        )
    }
}

/// Right-hand side of an attribute criterion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AttributeOperand {
    /// Concept operand, possibly hierarchy-expanded, `None` id is `*`.
    Concept(SubExpressionConstraint),
    Number(f64),
    Text(String),
}

/// Cardinality constraint `[min..max]`; `max` of `None` is unbounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cardinality {
    pub min: u32,
    pub max: Option<u32>,
}

impl Default for Cardinality {
    fn default() -> Self {
        Self { min: 1, max: None }
    }
}

impl Cardinality {
    pub fn is_default(&self) -> bool {
        self.min == 1 && self.max.is_none()
    }

    pub fn accepts(&self, count: u32) -> bool {
        count >= self.min && self.max.map_or(true, |max| count <= max)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EclAttribute {
    pub attribute_type: SubExpressionConstraint,
    pub comparison: ComparisonOperator,
    pub value: AttributeOperand,
    pub cardinality: Cardinality,
}
