//! User-authored world rules and the single ordered pass applied on `step`.
//!
//! # Invariants
//! - Rule ids are unique within one engine.
//! - A pass visits each enabled rule once: priority descending, then id ascending.
//! - A failing rule-action is skipped; it never aborts the pass.

use crate::error::{EngineError, EvalError};
use crate::expr::{Condition, Value};
use crate::state::SimulationState;
use scenario_common::Scalar;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Right-hand side of a rule-action: a bare literal or a value expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RuleValue {
    Expr(Value),
    Literal(Scalar),
}

impl RuleValue {
    fn evaluate(&self, state: &SimulationState, current: &Scalar) -> Result<Scalar, EvalError> {
        match self {
            Self::Expr(v) => v.evaluate_for_target(state, current),
            Self::Literal(s) => Ok(s.clone()),
        }
    }
}

impl From<Value> for RuleValue {
    fn from(value: Value) -> Self {
        Self::Expr(value)
    }
}

/// One write performed when a rule fires.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RuleAction {
    SetResource { resource: String, value: RuleValue },
    SetMetric { metric: String, value: RuleValue },
    SetFlag { flag: String, value: RuleValue },
    SetMetadata { key: String, value: RuleValue },
}

impl RuleAction {
    /// Evaluate against `state` and write the result into the target field.
    ///
    /// Nothing is written when evaluation fails.
    pub fn apply(&self, state: &mut SimulationState) -> Result<(), EvalError> {
        match self {
            Self::SetResource { resource, value } => {
                let current = Scalar::Number(state.resource(resource).unwrap_or(0.0));
                let next = as_number(value.evaluate(state, &current)?)?;
                state.resources.insert(resource.clone(), next);
            }
            Self::SetMetric { metric, value } => {
                let current = Scalar::Number(state.metric(metric).unwrap_or(0.0));
                let next = as_number(value.evaluate(state, &current)?)?;
                state.metrics.insert(metric.clone(), next);
            }
            Self::SetFlag { flag, value } => {
                let current = Scalar::Bool(state.flag(flag).unwrap_or(false));
                let next = value.evaluate(state, &current)?.truthy();
                state.flags.insert(flag.clone(), next);
            }
            Self::SetMetadata { key, value } => {
                let current = state
                    .metadata
                    .get(key)
                    .cloned()
                    .unwrap_or(Scalar::Number(0.0));
                let next = value.evaluate(state, &current)?;
                if next.as_f64().is_some_and(|n| !n.is_finite()) {
                    return Err(EvalError::NonFinite {
                        operator: "set_metadata",
                    });
                }
                state.metadata.insert(key.clone(), next);
            }
        }
        Ok(())
    }

    /// `kind.name` of the field this action writes.
    pub fn target(&self) -> String {
        match self {
            Self::SetResource { resource, .. } => format!("resources.{resource}"),
            Self::SetMetric { metric, .. } => format!("metrics.{metric}"),
            Self::SetFlag { flag, .. } => format!("flags.{flag}"),
            Self::SetMetadata { key, .. } => format!("metadata.{key}"),
        }
    }
}

fn as_number(value: Scalar) -> Result<f64, EvalError> {
    match value.as_f64() {
        Some(n) if n.is_finite() => Ok(n),
        Some(_) => Err(EvalError::NonFinite { operator: "set" }),
        None => Err(EvalError::TypeMismatch {
            expected: "number",
            found: value.kind(),
        }),
    }
}

fn default_enabled() -> bool {
    true
}

/// A named, condition-gated automation applied once per `step`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DynamicRule {
    pub rule_id: String,
    pub condition: Condition,
    pub actions: Vec<RuleAction>,
    #[serde(default)]
    pub priority: i64,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

impl DynamicRule {
    pub fn new(rule_id: impl Into<String>, condition: Condition, actions: Vec<RuleAction>) -> Self {
        Self {
            rule_id: rule_id.into(),
            condition,
            actions,
            priority: 0,
            description: String::new(),
            enabled: true,
        }
    }

    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

/// Partial update of a rule. Only supplied fields overwrite.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RulePatch {
    pub condition: Option<Condition>,
    pub actions: Option<Vec<RuleAction>>,
    pub priority: Option<i64>,
    pub description: Option<String>,
    pub enabled: Option<bool>,
}

impl RulePatch {
    fn apply_to(self, rule: &mut DynamicRule) {
        if let Some(condition) = self.condition {
            rule.condition = condition;
        }
        if let Some(actions) = self.actions {
            rule.actions = actions;
        }
        if let Some(priority) = self.priority {
            rule.priority = priority;
        }
        if let Some(description) = self.description {
            rule.description = description;
        }
        if let Some(enabled) = self.enabled {
            rule.enabled = enabled;
        }
    }
}

/// A rule condition or rule-action that could not be evaluated during a pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleFailure {
    pub rule_id: String,
    /// Index into the rule's actions; `None` when the condition failed.
    pub action_index: Option<usize>,
    pub message: String,
}

/// Outcome of one rule pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuleReport {
    /// Ids of rules whose condition held, in evaluation order.
    pub fired: Vec<String>,
    pub failures: Vec<RuleFailure>,
}

/// Rule storage in insertion order, plus the ordered application pass.
#[derive(Debug, Clone, Default)]
pub struct RuleEngine {
    rules: Vec<DynamicRule>,
}

impl RuleEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a list, rejecting duplicate ids.
    pub fn from_rules(rules: Vec<DynamicRule>) -> Result<Self, EngineError> {
        let mut engine = Self::new();
        for rule in rules {
            engine.add(rule)?;
        }
        Ok(engine)
    }

    pub fn add(&mut self, rule: DynamicRule) -> Result<(), EngineError> {
        if self.position(&rule.rule_id).is_some() {
            return Err(EngineError::DuplicateRuleId {
                rule_id: rule.rule_id,
            });
        }
        self.rules.push(rule);
        Ok(())
    }

    pub fn get(&self, rule_id: &str) -> Option<&DynamicRule> {
        self.rules.iter().find(|r| r.rule_id == rule_id)
    }

    /// Rules in insertion order.
    pub fn rules(&self) -> &[DynamicRule] {
        &self.rules
    }

    /// Rules in evaluation order: priority descending, id ascending.
    pub fn ordered(&self) -> Vec<&DynamicRule> {
        let mut ordered: Vec<&DynamicRule> = self.rules.iter().collect();
        ordered.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then_with(|| a.rule_id.cmp(&b.rule_id))
        });
        ordered
    }

    pub fn update(&mut self, rule_id: &str, patch: RulePatch) -> Result<&DynamicRule, EngineError> {
        let idx = self.position(rule_id).ok_or_else(|| unknown(rule_id))?;
        patch.apply_to(&mut self.rules[idx]);
        Ok(&self.rules[idx])
    }

    pub fn remove(&mut self, rule_id: &str) -> Result<DynamicRule, EngineError> {
        let idx = self.position(rule_id).ok_or_else(|| unknown(rule_id))?;
        Ok(self.rules.remove(idx))
    }

    /// Remove every rule and return how many were removed.
    pub fn clear(&mut self) -> usize {
        let n = self.rules.len();
        self.rules.clear();
        n
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Single ordered pass over enabled rules, folding effects into `state`.
    ///
    /// Each condition sees the effects of every rule applied before it.
    pub fn apply(&self, state: &mut SimulationState) -> RuleReport {
        let mut report = RuleReport::default();
        for rule in self.ordered().into_iter().filter(|r| r.enabled) {
            match rule.condition.evaluate(state) {
                Ok(true) => {}
                Ok(false) => continue,
                Err(e) => {
                    debug!(rule_id = %rule.rule_id, error = %e, "rule condition failed");
                    report.failures.push(RuleFailure {
                        rule_id: rule.rule_id.clone(),
                        action_index: None,
                        message: format!("condition: {e}"),
                    });
                    continue;
                }
            }
            debug!(rule_id = %rule.rule_id, "rule fired");
            report.fired.push(rule.rule_id.clone());
            for (idx, action) in rule.actions.iter().enumerate() {
                if let Err(e) = action.apply(state) {
                    debug!(
                        rule_id = %rule.rule_id,
                        action_index = idx,
                        error = %e,
                        "rule action skipped"
                    );
                    report.failures.push(RuleFailure {
                        rule_id: rule.rule_id.clone(),
                        action_index: Some(idx),
                        message: format!("{}: {e}", action.target()),
                    });
                }
            }
        }
        report
    }

    fn position(&self, rule_id: &str) -> Option<usize> {
        self.rules.iter().position(|r| r.rule_id == rule_id)
    }
}

fn unknown(rule_id: &str) -> EngineError {
    EngineError::UnknownRuleId {
        rule_id: rule_id.to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::ComparisonOp;
    use serde_json::json;

    fn set_resource(name: &str, value: Value) -> RuleAction {
        RuleAction::SetResource {
            resource: name.into(),
            value: value.into(),
        }
    }

    #[test]
    fn add_rejects_duplicates() {
        let mut engine = RuleEngine::new();
        engine
            .add(DynamicRule::new("r", Condition::Always, vec![]))
            .unwrap();
        let err = engine
            .add(DynamicRule::new("r", Condition::Always, vec![]))
            .unwrap_err();
        assert_eq!(
            err,
            EngineError::DuplicateRuleId {
                rule_id: "r".into()
            }
        );
    }

    #[test]
    fn ordering_is_priority_then_id() {
        let mut engine = RuleEngine::new();
        for (id, priority) in [("b", 1), ("a", 1), ("c", 5)] {
            let mut rule = DynamicRule::new(id, Condition::Always, vec![]);
            rule.priority = priority;
            engine.add(rule).unwrap();
        }
        let ids: Vec<_> = engine
            .ordered()
            .iter()
            .map(|r| r.rule_id.as_str())
            .collect();
        assert_eq!(ids, vec!["c", "a", "b"]);
    }

    #[test]
    fn higher_priority_effects_are_visible_to_lower() {
        let mut engine = RuleEngine::new();
        // R1 fires only if R2 already raised cpu.
        engine
            .add(
                DynamicRule::new(
                    "r1",
                    Condition::comparison(
                        Value::resource("cpu"),
                        ComparisonOp::Gt,
                        Value::literal(50.0),
                    ),
                    vec![RuleAction::SetFlag {
                        flag: "hot".into(),
                        value: RuleValue::Literal(Scalar::Bool(true)),
                    }],
                )
                .with_priority(10),
            )
            .unwrap();
        engine
            .add(
                DynamicRule::new(
                    "r2",
                    Condition::Always,
                    vec![set_resource("cpu", Value::Fixed { value: 60.0.into() })],
                )
                .with_priority(20),
            )
            .unwrap();

        let mut state = SimulationState::new(None).with_resource("cpu", 10.0);
        let report = engine.apply(&mut state);
        assert_eq!(report.fired, vec!["r2", "r1"]);
        assert_eq!(state.flag("hot"), Some(true));
    }

    #[test]
    fn failing_action_is_skipped_and_pass_continues() {
        let mut engine = RuleEngine::new();
        engine
            .add(DynamicRule::new(
                "r",
                Condition::Always,
                vec![
                    set_resource("x", Value::divide(Value::literal(1.0), Value::literal(0.0))),
                    set_resource("y", Value::Increment { amount: 2.0 }),
                ],
            ))
            .unwrap();
        let mut state = SimulationState::new(None).with_resource("x", 7.0);
        let report = engine.apply(&mut state);
        assert_eq!(state.resource("x"), Some(7.0));
        assert_eq!(state.resource("y"), Some(2.0));
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].action_index, Some(0));
        assert!(report.failures[0].message.contains("division by zero"));
    }

    #[test]
    fn disabled_rules_do_not_run() {
        let mut engine = RuleEngine::new();
        engine
            .add(DynamicRule::new(
                "r",
                Condition::Always,
                vec![set_resource("x", Value::Increment { amount: 1.0 })],
            ))
            .unwrap();
        engine
            .update(
                "r",
                RulePatch {
                    enabled: Some(false),
                    ..RulePatch::default()
                },
            )
            .unwrap();
        let mut state = SimulationState::new(None);
        assert!(engine.apply(&mut state).fired.is_empty());
        assert_eq!(state.resource("x"), None);
    }

    #[test]
    fn update_merges_only_supplied_fields() {
        let mut engine = RuleEngine::new();
        engine
            .add(
                DynamicRule::new("r", Condition::Always, vec![])
                    .with_priority(3)
                    .with_description("before"),
            )
            .unwrap();
        let patch: RulePatch = serde_json::from_value(json!({"priority": 9})).unwrap();
        let updated = engine.update("r", patch).unwrap();
        assert_eq!(updated.priority, 9);
        assert_eq!(updated.description, "before");
        assert_eq!(updated.condition, Condition::Always);
    }

    #[test]
    fn unknown_rule_operations_fail() {
        let mut engine = RuleEngine::new();
        assert!(matches!(
            engine.remove("nope"),
            Err(EngineError::UnknownRuleId { .. })
        ));
        assert!(engine.update("nope", RulePatch::default()).is_err());
        assert!(engine.get("nope").is_none());
    }

    #[test]
    fn clear_reports_count() {
        let mut engine = RuleEngine::new();
        for id in ["a", "b"] {
            engine
                .add(DynamicRule::new(id, Condition::Always, vec![]))
                .unwrap();
        }
        assert_eq!(engine.clear(), 2);
        assert!(engine.is_empty());
    }

    #[test]
    fn rule_wire_format() {
        let rule: DynamicRule = serde_json::from_value(json!({
            "rule_id": "cpu_tracker",
            "condition": {"type": "comparison",
                          "left": {"type": "resource", "name": "cpu"},
                          "operator": ">", "right": {"type": "value", "value": 80}},
            "actions": [
                {"type": "set_metadata", "key": "high_cpu",
                 "value": {"type": "increment", "amount": 1}},
                {"type": "set_flag", "flag": "alert", "value": true},
                {"type": "set_metric", "metric": "errors", "value": 0.5}
            ],
            "priority": 5
        }))
        .unwrap();
        assert!(rule.enabled);
        assert_eq!(rule.description, "");

        let mut engine = RuleEngine::new();
        engine.add(rule).unwrap();
        let mut state = SimulationState::new(None).with_resource("cpu", 90.0);
        engine.apply(&mut state);
        engine.apply(&mut state);
        assert_eq!(state.metadata.get("high_cpu"), Some(&Scalar::Number(2.0)));
        assert_eq!(state.flag("alert"), Some(true));
        assert_eq!(state.metric("errors"), Some(0.5));
    }

    #[test]
    fn non_finite_result_skips_the_action() {
        let overflow = Value::subtract(
            Value::Multiply {
                values: vec![Value::literal(1e308), Value::literal(10.0)],
            },
            Value::Multiply {
                values: vec![Value::literal(1e308), Value::literal(10.0)],
            },
        );
        let mut engine = RuleEngine::new();
        engine
            .add(DynamicRule::new(
                "blowup",
                Condition::Always,
                vec![
                    RuleAction::SetMetric {
                        metric: "x".into(),
                        value: overflow.into(),
                    },
                    RuleAction::SetMetric {
                        metric: "y".into(),
                        value: RuleValue::Literal(Scalar::Number(f64::INFINITY)),
                    },
                    set_resource("cpu", Value::literal(1.0)),
                ],
            ))
            .unwrap();

        let mut state = SimulationState::new(None);
        let report = engine.apply(&mut state);
        assert_eq!(report.fired, vec!["blowup"]);
        assert_eq!(report.failures.len(), 2);
        assert_eq!(report.failures[0].action_index, Some(0));
        assert_eq!(report.failures[1].action_index, Some(1));
        assert_eq!(state.metric("x"), None);
        assert_eq!(state.metric("y"), None);
        assert_eq!(state.resource("cpu"), Some(1.0));
    }
}
