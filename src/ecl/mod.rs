pub mod ast;
pub mod parser;
pub mod range;
pub mod refinement;

pub use ast::{
    AttributeOperand, Cardinality, ComparisonOperator, EclAttribute, ExpressionConstraint,
    HierarchyOperator, Refinement, SetOperator, SubAttributeSet, SubExpressionConstraint,
};
pub use parser::parse;
pub use range::AttributeRange;
pub use refinement::{CompiledAttributeSet, CompiledRefinement, RefinementBuilder};
