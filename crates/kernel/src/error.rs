use scenario_common::SimulationId;

/// Errors returned to the caller by simulation operations.
///
/// Constraint violations are not errors: a rejected action is reported through
/// [`crate::ActionResult`] with `success == false`.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EngineError {
    #[error("unknown action '{name}'")]
    UnknownAction { name: String },
    #[error("invalid params for '{action}': {reason}")]
    InvalidParams { action: String, reason: String },
    #[error("rule '{rule_id}' already exists")]
    DuplicateRuleId { rule_id: String },
    #[error("rule '{rule_id}' not found")]
    UnknownRuleId { rule_id: String },
    #[error("simulation {id} not found")]
    SimulationNotFound { id: SimulationId },
}

/// Failure while evaluating a condition or value expression.
///
/// Scoped to the single rule-action (or rule condition) being evaluated.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EvalError {
    #[error("division by zero")]
    DivisionByZero,
    #[error("{kind} '{name}' is not set")]
    MissingField { kind: &'static str, name: String },
    #[error("expected {expected}, found {found}")]
    TypeMismatch {
        expected: &'static str,
        found: &'static str,
    },
    #[error("'{operator}' is only valid as the value of a rule action")]
    RelativeOutsideRuleAction { operator: &'static str },
    #[error("values are not comparable with '{operator}'")]
    Incomparable { operator: &'static str },
    #[error("'{operator}' produced a non-finite number")]
    NonFinite { operator: &'static str },
}
