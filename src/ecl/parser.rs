//! Recursive-descent parser for the supported expression constraint grammar.
//!
//! ```text
//! expression    = subexpression [ ":" refinement ]
//! subexpression = [ hierarchyOp ] ( "*" | conceptId | "(" expression ")" )
//! refinement    = member { setOp member }          (one setOp per level)
//! member        = attribute | "{" refinement "}" | "(" refinement ")"
//! attribute     = [ "[" min ".." ( max | "*" ) "]" ] subexpression cmp operand
//! operand       = "#" number | quoted string | subexpression
//! ```

use crate::ecl::ast::{
    AttributeOperand, Cardinality, ComparisonOperator, EclAttribute, ExpressionConstraint,
    FocusConcept, HierarchyOperator, Refinement, SetOperator, SubAttributeSet,
    SubExpressionConstraint,
};
use crate::error::{Result, TermbaseError};
use crate::model::ConceptId;

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Lt,
    LtLt,
    Gt,
    GtGt,
    LtBang,
    GtBang,
    Eq,
    NotEq,
    LtEq,
    GtEq,
    Star,
    Colon,
    Comma,
    Hash,
    Dash,
    DotDot,
    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    And,
    Or,
    Minus,
    Number(String),
    Quoted(String),
}

fn invalid(message: impl Into<String>) -> TermbaseError {
    TermbaseError::InvalidExpression(message.into())
}

fn tokenize(input: &str) -> Result<Vec<Token>> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '<' => {
                i += 1;
                match chars.get(i) {
                    Some('<') => {
                        tokens.push(Token::LtLt);
                        i += 1;
                    }
                    Some('!') => {
                        tokens.push(Token::LtBang);
                        i += 1;
                    }
                    Some('=') => {
                        tokens.push(Token::LtEq);
                        i += 1;
                    }
                    _ => tokens.push(Token::Lt),
                }
            }
            '>' => {
                i += 1;
                match chars.get(i) {
                    Some('>') => {
                        tokens.push(Token::GtGt);
                        i += 1;
                    }
                    Some('!') => {
                        tokens.push(Token::GtBang);
                        i += 1;
                    }
                    Some('=') => {
                        tokens.push(Token::GtEq);
                        i += 1;
                    }
                    _ => tokens.push(Token::Gt),
                }
            }
            '!' => {
                i += 1;
                if chars.get(i) == Some(&'=') {
                    tokens.push(Token::NotEq);
                    i += 1;
                } else {
                    return Err(invalid("'!' must be followed by '='"));
                }
            }
            '=' => {
                tokens.push(Token::Eq);
                i += 1;
            }
            '*' => {
                tokens.push(Token::Star);
                i += 1;
            }
            ':' => {
                tokens.push(Token::Colon);
                i += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            '#' => {
                tokens.push(Token::Hash);
                i += 1;
            }
            '-' => {
                tokens.push(Token::Dash);
                i += 1;
            }
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '{' => {
                tokens.push(Token::LBrace);
                i += 1;
            }
            '}' => {
                tokens.push(Token::RBrace);
                i += 1;
            }
            '[' => {
                tokens.push(Token::LBracket);
                i += 1;
            }
            ']' => {
                tokens.push(Token::RBracket);
                i += 1;
            }
            '.' => {
                i += 1;
                if chars.get(i) == Some(&'.') {
                    tokens.push(Token::DotDot);
                    i += 1;
                } else {
                    return Err(invalid("unexpected '.'"));
                }
            }
            '"' => {
                i += 1;
                let mut value = String::new();
                loop {
                    match chars.get(i) {
                        Some('"') => {
                            i += 1;
                            break;
                        }
                        Some(&ch) => {
                            value.push(ch);
                            i += 1;
                        }
                        None => return Err(invalid("unterminated string literal")),
                    }
                }
                tokens.push(Token::Quoted(value));
            }
            c if c.is_ascii_digit() => {
                let mut value = String::new();
                while i < chars.len() {
                    let ch = chars[i];
                    if ch.is_ascii_digit() {
                        value.push(ch);
                        i += 1;
                    } else if ch == '.'
                        && chars.get(i + 1).map_or(false, |n| n.is_ascii_digit())
                        && chars.get(i + 1) != Some(&'.')
                    {
                        value.push(ch);
                        i += 1;
                    } else {
                        break;
                    }
                }
                tokens.push(Token::Number(value));
            }
            c if c.is_ascii_alphabetic() => {
                let mut word = String::new();
                while i < chars.len() && chars[i].is_ascii_alphabetic() {
                    word.push(chars[i]);
                    i += 1;
                }
                match word.to_ascii_uppercase().as_str() {
                    "AND" => tokens.push(Token::And),
                    "OR" => tokens.push(Token::Or),
                    "MINUS" => tokens.push(Token::Minus),
                    other => return Err(invalid(format!("unexpected word '{other}'"))),
                }
            }
            other => return Err(invalid(format!("unexpected character '{other}'"))),
        }
    }
    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn eat(&mut self, expected: Token) -> Result<()> {
        match self.next() {
            Some(token) if token == expected => Ok(()),
            other => Err(invalid(format!("expected {expected:?}, found {other:?}"))),
        }
    }

    fn expression(&mut self) -> Result<ExpressionConstraint> {
        let constraint = self.constraint()?;
        match self.peek() {
            None => Ok(constraint),
            Some(token) => Err(invalid(format!("trailing input at {token:?}"))),
        }
    }

    fn constraint(&mut self) -> Result<ExpressionConstraint> {
        let focus = self.subexpression()?;
        if self.peek() == Some(&Token::Colon) {
            self.next();
            let refinement = self.refinement()?;
            Ok(ExpressionConstraint::Refined { focus, refinement })
        } else {
            Ok(ExpressionConstraint::Sub(focus))
        }
    }

    fn hierarchy_operator(&mut self) -> HierarchyOperator {
        let operator = match self.peek() {
            Some(Token::Lt) => HierarchyOperator::DescendantOf,
            Some(Token::LtLt) => HierarchyOperator::DescendantOrSelfOf,
            Some(Token::Gt) => HierarchyOperator::AncestorOf,
            Some(Token::GtGt) => HierarchyOperator::AncestorOrSelfOf,
            Some(Token::LtBang) => HierarchyOperator::ChildOf,
            Some(Token::GtBang) => HierarchyOperator::ParentOf,
            _ => return HierarchyOperator::SelfOnly,
        };
        self.next();
        operator
    }

    fn subexpression(&mut self) -> Result<SubExpressionConstraint> {
        let operator = self.hierarchy_operator();
        let focus = match self.next() {
            Some(Token::Star) => FocusConcept::Wildcard,
            Some(Token::Number(digits)) => FocusConcept::Concept(parse_concept_id(&digits)?),
            Some(Token::LParen) => {
                let inner = self.constraint()?;
                self.eat(Token::RParen)?;
                FocusConcept::Nested(Box::new(inner))
            }
            other => {
                return Err(invalid(format!(
                    "expected concept id, '*' or '(', found {other:?}"
                )))
            }
        };
        Ok(SubExpressionConstraint { operator, focus })
    }

    fn refinement(&mut self) -> Result<Refinement> {
        let mut members = vec![self.sub_attribute_set()?];
        let mut set_operator: Option<SetOperator> = None;
        loop {
            let next_op = match self.peek() {
                Some(Token::Comma) | Some(Token::And) => SetOperator::Conjunction,
                Some(Token::Or) => SetOperator::Disjunction,
                Some(Token::Minus) => SetOperator::Exclusion,
                _ => break,
            };
            match set_operator {
                None => set_operator = Some(next_op),
                Some(op) if op == next_op => {}
                Some(_) => {
                    return Err(invalid(
                        "mixed set operators require parentheses to disambiguate",
                    ))
                }
            }
            self.next();
            members.push(self.sub_attribute_set()?);
        }
        Ok(Refinement {
            set_operator: set_operator.unwrap_or(SetOperator::Conjunction),
            members,
        })
    }

    fn sub_attribute_set(&mut self) -> Result<SubAttributeSet> {
        match self.peek() {
            Some(Token::LBrace) => {
                self.next();
                let inner = self.refinement()?;
                self.eat(Token::RBrace)?;
                Ok(SubAttributeSet::Group(Box::new(inner)))
            }
            Some(Token::LParen) => {
                // Ambiguous: "( attr )" wraps a single attribute, while
                // "( expression ) = value" is an attribute whose type is a
                // nested constraint. Try the wrapper reading first and fall
                // back to a plain attribute.
                let checkpoint = self.pos;
                self.next();
                let wrapped = self
                    .refinement()
                    .and_then(|inner| {
                        self.eat(Token::RParen)?;
                        single_attribute(inner)
                    })
                    .ok();
                match wrapped {
                    Some(attribute) => Ok(SubAttributeSet::Attribute(attribute)),
                    None => {
                        self.pos = checkpoint;
                        Ok(SubAttributeSet::Attribute(self.attribute()?))
                    }
                }
            }
            _ => Ok(SubAttributeSet::Attribute(self.attribute()?)),
        }
    }

    fn attribute(&mut self) -> Result<EclAttribute> {
        let cardinality = if self.peek() == Some(&Token::LBracket) {
            self.next();
            let min = self.integer()?;
            self.eat(Token::DotDot)?;
            let max = match self.next() {
                Some(Token::Star) => None,
                Some(Token::Number(digits)) => Some(parse_u32(&digits)?),
                other => {
                    return Err(invalid(format!(
                        "expected cardinality bound, found {other:?}"
                    )))
                }
            };
            self.eat(Token::RBracket)?;
            Cardinality { min, max }
        } else {
            Cardinality::default()
        };

        let attribute_type = self.subexpression()?;
        let comparison = match self.next() {
            Some(Token::Eq) => ComparisonOperator::Equal,
            Some(Token::NotEq) => ComparisonOperator::NotEqual,
            Some(Token::Lt) => ComparisonOperator::LessThan,
            Some(Token::LtEq) => ComparisonOperator::LessOrEqual,
            Some(Token::Gt) => ComparisonOperator::GreaterThan,
            Some(Token::GtEq) => ComparisonOperator::GreaterOrEqual,
            other => {
                return Err(invalid(format!(
                    "expected comparison operator, found {other:?}"
                )))
            }
        };
        let value = self.operand()?;
        if !comparison.is_equality() && !matches!(value, AttributeOperand::Number(_)) {
            return Err(invalid(
                "ordering comparisons are only valid against numeric operands",
            ));
        }
        Ok(EclAttribute {
            attribute_type,
            comparison,
            value,
            cardinality,
        })
    }

    fn operand(&mut self) -> Result<AttributeOperand> {
        match self.peek() {
            Some(Token::Hash) => {
                self.next();
                let negative = if self.peek() == Some(&Token::Dash) {
                    self.next();
                    true
                } else {
                    false
                };
                match self.next() {
                    Some(Token::Number(digits)) => {
                        let magnitude: f64 = digits
                            .parse()
                            .map_err(|_| invalid(format!("invalid number '{digits}'")))?;
                        Ok(AttributeOperand::Number(if negative {
                            -magnitude
                        } else {
                            magnitude
                        }))
                    }
                    other => Err(invalid(format!("expected number after '#': {other:?}"))),
                }
            }
            Some(Token::Quoted(_)) => match self.next() {
                Some(Token::Quoted(text)) => Ok(AttributeOperand::Text(text)),
                _ => unreachable!(),
            },
            _ => Ok(AttributeOperand::Concept(self.subexpression()?)),
        }
    }

    fn integer(&mut self) -> Result<u32> {
        match self.next() {
            Some(Token::Number(digits)) => parse_u32(&digits),
            other => Err(invalid(format!("expected integer, found {other:?}"))),
        }
    }
}

fn single_attribute(refinement: Refinement) -> Result<EclAttribute> {
    if refinement.members.len() == 1 {
        if let Some(SubAttributeSet::Attribute(attribute)) = refinement.members.into_iter().next()
        {
            return Ok(attribute);
        }
    }
    Err(invalid(
        "parenthesized refinements may only wrap a single attribute",
    ))
}

fn parse_concept_id(digits: &str) -> Result<ConceptId> {
    digits
        .parse()
        .map_err(|_| invalid(format!("invalid concept id '{digits}'")))
}

fn parse_u32(digits: &str) -> Result<u32> {
    digits
        .parse()
        .map_err(|_| invalid(format!("invalid integer '{digits}'")))
}

/// Parse an expression constraint string into its AST.
pub fn parse(ecl: &str) -> Result<ExpressionConstraint> {
    let trimmed = ecl.trim();
    if trimmed.is_empty() {
        return Err(invalid("empty expression constraint"));
    }
    let tokens = tokenize(trimmed)?;
    Parser { tokens, pos: 0 }.expression()
}
