//! Condition and value expression trees for world rules.
//!
//! Both grammars are closed tagged unions serialized with a `type`
//! discriminant. Evaluation is a post-order walk against a borrowed state.
//!
//! # Invariants
//! - Evaluation never mutates state.
//! - `and` over an empty list is true, `or` over an empty list is false.
//! - Relative-update operators (`fixed`, `increment`, `multiply_by`) are only
//!   evaluated against a rule-action target; anywhere else they fail.

use crate::error::EvalError;
use crate::state::SimulationState;
use scenario_common::Scalar;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Comparison operator of a `comparison` condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ComparisonOp {
    #[serde(rename = "==")]
    Eq,
    #[serde(rename = "!=")]
    Ne,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    Ge,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    Le,
}

impl ComparisonOp {
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::Lt => "<",
            Self::Le => "<=",
        }
    }

    /// Apply the operator to two evaluated operands.
    ///
    /// Numbers and booleans compare numerically (booleans as 0/1), text compares
    /// lexically. Text against a number is unequal and has no ordering.
    pub fn compare(self, left: &Scalar, right: &Scalar) -> Result<bool, EvalError> {
        let ordering = match (left, right) {
            (Scalar::Text(a), Scalar::Text(b)) => Some(a.cmp(b)),
            (Scalar::Text(_), _) | (_, Scalar::Text(_)) => None,
            (a, b) => match (a.as_f64(), b.as_f64()) {
                (Some(x), Some(y)) => x.partial_cmp(&y),
                _ => None,
            },
        };
        let Some(ordering) = ordering else {
            return match self {
                Self::Eq => Ok(false),
                Self::Ne => Ok(true),
                _ => Err(EvalError::Incomparable {
                    operator: self.symbol(),
                }),
            };
        };
        Ok(match self {
            Self::Eq => ordering == Ordering::Equal,
            Self::Ne => ordering != Ordering::Equal,
            Self::Gt => ordering == Ordering::Greater,
            Self::Ge => ordering != Ordering::Less,
            Self::Lt => ordering == Ordering::Less,
            Self::Le => ordering != Ordering::Greater,
        })
    }
}

/// Boolean condition gating a world rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Condition {
    Comparison {
        left: Value,
        operator: ComparisonOp,
        right: Value,
    },
    And { conditions: Vec<Condition> },
    Or { conditions: Vec<Condition> },
    Not { condition: Box<Condition> },
    Always,
}

impl Condition {
    pub fn comparison(left: Value, operator: ComparisonOp, right: Value) -> Self {
        Self::Comparison {
            left,
            operator,
            right,
        }
    }

    /// Evaluate against `state`. `and`/`or` short-circuit, so a failing operand
    /// in an unevaluated branch never surfaces.
    pub fn evaluate(&self, state: &SimulationState) -> Result<bool, EvalError> {
        match self {
            Self::Comparison {
                left,
                operator,
                right,
            } => {
                let l = left.evaluate(state)?;
                let r = right.evaluate(state)?;
                operator.compare(&l, &r)
            }
            Self::And { conditions } => {
                for c in conditions {
                    if !c.evaluate(state)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            Self::Or { conditions } => {
                for c in conditions {
                    if c.evaluate(state)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            Self::Not { condition } => Ok(!condition.evaluate(state)?),
            Self::Always => Ok(true),
        }
    }
}

/// Value expression: state references, literals, relative updates and arithmetic.
///
/// `multiply` is the n-ary product; scaling the target field is `multiply_by`.
/// The two never share a tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Value {
    Resource { name: String },
    Metric { name: String },
    Flag { name: String },
    Metadata {
        #[serde(alias = "key")]
        name: String,
    },
    Time,
    #[serde(rename = "value")]
    Literal { value: Scalar },
    Fixed { value: Scalar },
    Increment { amount: f64 },
    MultiplyBy { factor: f64 },
    Add { values: Vec<Value> },
    Subtract { left: Box<Value>, right: Box<Value> },
    Multiply { values: Vec<Value> },
    Divide {
        numerator: Box<Value>,
        denominator: Box<Value>,
    },
}

impl Value {
    pub fn resource(name: &str) -> Self {
        Self::Resource {
            name: name.to_owned(),
        }
    }

    pub fn metric(name: &str) -> Self {
        Self::Metric {
            name: name.to_owned(),
        }
    }

    pub fn flag(name: &str) -> Self {
        Self::Flag {
            name: name.to_owned(),
        }
    }

    pub fn metadata(name: &str) -> Self {
        Self::Metadata {
            name: name.to_owned(),
        }
    }

    pub fn literal(value: impl Into<Scalar>) -> Self {
        Self::Literal {
            value: value.into(),
        }
    }

    pub fn subtract(left: Value, right: Value) -> Self {
        Self::Subtract {
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn divide(numerator: Value, denominator: Value) -> Self {
        Self::Divide {
            numerator: Box::new(numerator),
            denominator: Box::new(denominator),
        }
    }

    /// Whether this node is a relative update of the target field.
    pub fn is_relative(&self) -> bool {
        matches!(
            self,
            Self::Fixed { .. } | Self::Increment { .. } | Self::MultiplyBy { .. }
        )
    }

    /// Evaluate as an operand. Relative-update operators are rejected here.
    pub fn evaluate(&self, state: &SimulationState) -> Result<Scalar, EvalError> {
        match self {
            Self::Resource { name } => state
                .resources
                .get(name)
                .map(|v| Scalar::Number(*v))
                .ok_or_else(|| missing("resource", name)),
            Self::Metric { name } => state
                .metrics
                .get(name)
                .map(|v| Scalar::Number(*v))
                .ok_or_else(|| missing("metric", name)),
            Self::Flag { name } => state
                .flags
                .get(name)
                .map(|v| Scalar::Bool(*v))
                .ok_or_else(|| missing("flag", name)),
            Self::Metadata { name } => state
                .metadata
                .get(name)
                .cloned()
                .ok_or_else(|| missing("metadata", name)),
            Self::Time => Ok(Scalar::Number(state.time as f64)),
            Self::Literal { value } => Ok(value.clone()),
            Self::Fixed { .. } => Err(EvalError::RelativeOutsideRuleAction { operator: "fixed" }),
            Self::Increment { .. } => Err(EvalError::RelativeOutsideRuleAction {
                operator: "increment",
            }),
            Self::MultiplyBy { .. } => Err(EvalError::RelativeOutsideRuleAction {
                operator: "multiply_by",
            }),
            Self::Add { values } => {
                let mut sum = 0.0;
                for v in values {
                    sum += v.evaluate_number(state)?;
                }
                finite("add", sum)
            }
            Self::Subtract { left, right } => finite(
                "subtract",
                left.evaluate_number(state)? - right.evaluate_number(state)?,
            ),
            Self::Multiply { values } => {
                let mut product = 1.0;
                for v in values {
                    product *= v.evaluate_number(state)?;
                }
                finite("multiply", product)
            }
            Self::Divide {
                numerator,
                denominator,
            } => {
                let n = numerator.evaluate_number(state)?;
                let d = denominator.evaluate_number(state)?;
                if d == 0.0 {
                    return Err(EvalError::DivisionByZero);
                }
                finite("divide", n / d)
            }
        }
    }

    /// Evaluate as the value written into a rule-action target whose current
    /// value is `current` (the target's default when unset).
    pub fn evaluate_for_target(
        &self,
        state: &SimulationState,
        current: &Scalar,
    ) -> Result<Scalar, EvalError> {
        match self {
            Self::Fixed { value } => Ok(value.clone()),
            Self::Increment { amount } => finite("increment", number(current)? + amount),
            Self::MultiplyBy { factor } => finite("multiply_by", number(current)? * factor),
            other => other.evaluate(state),
        }
    }

    fn evaluate_number(&self, state: &SimulationState) -> Result<f64, EvalError> {
        number(&self.evaluate(state)?)
    }
}

fn number(value: &Scalar) -> Result<f64, EvalError> {
    value.as_f64().ok_or(EvalError::TypeMismatch {
        expected: "number",
        found: value.kind(),
    })
}

/// Arithmetic results must stay finite: NaN and infinities cannot be
/// persisted.
fn finite(operator: &'static str, value: f64) -> Result<Scalar, EvalError> {
    if value.is_finite() {
        Ok(Scalar::Number(value))
    } else {
        Err(EvalError::NonFinite { operator })
    }
}

fn missing(kind: &'static str, name: &str) -> EvalError {
    EvalError::MissingField {
        kind,
        name: name.to_owned(),
    }
}
