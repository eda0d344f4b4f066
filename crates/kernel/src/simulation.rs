use crate::actions::Action;
use crate::constraints::{Constraint, ConstraintEngine, Violation};
use crate::delta::{StateDelta, compute_delta};
use crate::error::EngineError;
use crate::history::{History, HistoryEvent};
use crate::rng::SimRng;
use crate::rules::{DynamicRule, RuleEngine, RulePatch, RuleReport};
use crate::state::SimulationState;
use scenario_common::{EventId, Scalar, SimulationId, now};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

/// Outcome of [`Simulation::apply`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionResult {
    pub success: bool,
    pub event_id: EventId,
    pub before: SimulationState,
    pub after: SimulationState,
    pub delta: StateDelta,
    pub message: String,
    pub violations: Vec<Violation>,
    /// Rule pass outcome; present for `step` only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule_report: Option<RuleReport>,
}

/// Counts describing a simulation, for display.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationSummary {
    pub simulation_id: SimulationId,
    pub time: u64,
    pub seed: Option<u64>,
    pub resources: usize,
    pub metrics: usize,
    pub flags: usize,
    pub entities: usize,
    pub rules: usize,
    pub constraints: usize,
    pub history: usize,
}

impl std::fmt::Display for SimulationSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let seed = self
            .seed
            .map_or_else(|| "none".to_owned(), |s| s.to_string());
        write!(
            f,
            "Simulation {}: time={} seed={} resources={} metrics={} flags={} entities={} rules={} constraints={} events={}",
            self.simulation_id,
            self.time,
            seed,
            self.resources,
            self.metrics,
            self.flags,
            self.entities,
            self.rules,
            self.constraints,
            self.history
        )
    }
}

/// One simulation instance: the live state plus the rules, constraints,
/// history and random stream that belong to it.
///
/// All state transitions go through [`Simulation::apply`], which computes a
/// candidate on a copy, validates it and then commits or discards it whole.
#[derive(Debug)]
pub struct Simulation {
    state: SimulationState,
    rules: RuleEngine,
    constraints: ConstraintEngine,
    history: History,
    rng: SimRng,
}

impl Simulation {
    /// Empty simulation at time 0.
    pub fn new(seed: Option<u64>) -> Self {
        Self::with_state(SimulationState::new(seed))
    }

    /// Simulation starting from `state`; the stream is seeded from `state.seed`.
    pub fn with_state(state: SimulationState) -> Self {
        let rng = SimRng::new(state.seed);
        info!(simulation_id = %state.simulation_id, seed = ?state.seed, "simulation created");
        Self {
            state,
            rules: RuleEngine::new(),
            constraints: ConstraintEngine::new(),
            history: History::new(),
            rng,
        }
    }

    /// Rebuild a simulation from persisted parts. The stream restarts from the
    /// stored seed.
    pub fn from_parts(
        state: SimulationState,
        rules: Vec<DynamicRule>,
        history: Vec<HistoryEvent>,
        constraints: ConstraintEngine,
    ) -> Result<Self, EngineError> {
        Ok(Self {
            rng: SimRng::new(state.seed),
            rules: RuleEngine::from_rules(rules)?,
            history: History::from_events(history),
            constraints,
            state,
        })
    }

    pub fn with_constraints(mut self, constraints: ConstraintEngine) -> Self {
        self.constraints = constraints;
        self
    }

    pub fn id(&self) -> SimulationId {
        self.state.simulation_id
    }

    pub fn state(&self) -> &SimulationState {
        &self.state
    }

    pub fn seed(&self) -> Option<u64> {
        self.state.seed
    }

    pub fn time(&self) -> u64 {
        self.state.time
    }

    pub fn constraints(&self) -> &ConstraintEngine {
        &self.constraints
    }

    pub fn add_constraint(&mut self, constraint: impl Constraint + 'static) {
        self.constraints.add(constraint);
    }

    pub fn add_constraint_shared(&mut self, constraint: Arc<dyn Constraint>) {
        self.constraints.add_shared(constraint);
    }

    pub fn rules(&self) -> &RuleEngine {
        &self.rules
    }

    pub fn add_rule(&mut self, rule: DynamicRule) -> Result<(), EngineError> {
        let rule_id = rule.rule_id.clone();
        self.rules.add(rule)?;
        info!(simulation_id = %self.id(), rule_id = %rule_id, "rule added");
        Ok(())
    }

    pub fn get_rule(&self, rule_id: &str) -> Result<&DynamicRule, EngineError> {
        self.rules
            .get(rule_id)
            .ok_or_else(|| EngineError::UnknownRuleId {
                rule_id: rule_id.to_owned(),
            })
    }

    /// Rules in evaluation order.
    pub fn list_rules(&self) -> Vec<&DynamicRule> {
        self.rules.ordered()
    }

    pub fn update_rule(
        &mut self,
        rule_id: &str,
        patch: RulePatch,
    ) -> Result<&DynamicRule, EngineError> {
        let simulation_id = self.state.simulation_id;
        let rule = self.rules.update(rule_id, patch)?;
        info!(simulation_id = %simulation_id, rule_id = %rule_id, "rule updated");
        Ok(rule)
    }

    pub fn remove_rule(&mut self, rule_id: &str) -> Result<DynamicRule, EngineError> {
        let removed = self.rules.remove(rule_id)?;
        info!(simulation_id = %self.id(), rule_id = %rule_id, "rule removed");
        Ok(removed)
    }

    pub fn clear_rules(&mut self) -> usize {
        let n = self.rules.clear();
        info!(simulation_id = %self.id(), removed = n, "rules cleared");
        n
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    /// The most recent `limit` events in chronological order; all when `None`.
    pub fn get_history(&self, limit: Option<usize>) -> &[HistoryEvent] {
        self.history.recent(limit)
    }

    pub fn get_event(&self, event_id: EventId) -> Option<&HistoryEvent> {
        self.history.get(event_id)
    }

    /// Apply a named action with JSON parameters.
    ///
    /// Unknown actions and malformed parameters return an error and leave
    /// state and history untouched. Constraint violations are reported as an
    /// unsuccessful result and recorded in history.
    pub fn apply(
        &mut self,
        name: &str,
        params: serde_json::Value,
    ) -> Result<ActionResult, EngineError> {
        let action = Action::parse(name, &params).inspect_err(|e| {
            warn!(
                simulation_id = %self.state.simulation_id,
                action = name,
                error = %e,
                "action refused"
            );
        })?;
        self.apply_action(&action, params)
    }

    /// Apply an already-parsed action. `params` is what gets recorded in history.
    pub fn apply_action(
        &mut self,
        action: &Action,
        params: serde_json::Value,
    ) -> Result<ActionResult, EngineError> {
        let name = action.name();
        let mut candidate = self.state.clone();
        let mut message = action
            .apply(&mut candidate, &mut self.rng)
            .inspect_err(|e| {
                warn!(
                    simulation_id = %self.state.simulation_id,
                    action = name,
                    error = %e,
                    "action refused"
                );
            })?;

        let rule_report = match action {
            Action::Step => {
                let report = self.rules.apply(&mut candidate);
                if !report.fired.is_empty() {
                    message.push_str(&format!(
                        " | World rules applied: {}",
                        report.fired.join(", ")
                    ));
                }
                Some(report)
            }
            _ => None,
        };

        let violations = self.constraints.validate(&candidate, &self.state);
        let event_id = EventId::new();
        let before = self.state.clone();

        if !violations.is_empty() {
            let ids: Vec<&str> = violations
                .iter()
                .map(|v| v.constraint_id.as_str())
                .collect();
            warn!(
                simulation_id = %self.state.simulation_id,
                action = name,
                violations = ?ids,
                "constraint violated"
            );
            let message = format!(
                "Action rejected due to constraint violations: {}",
                ids.join(", ")
            );
            self.history.append(HistoryEvent {
                event_id,
                timestamp: now(),
                action_name: name.to_owned(),
                params,
                before: before.clone(),
                after: before.clone(),
                delta: StateDelta::new(),
                success: false,
                message: message.clone(),
                violations: violations.clone(),
            });
            return Ok(ActionResult {
                success: false,
                event_id,
                after: before.clone(),
                before,
                delta: StateDelta::new(),
                message,
                violations,
                rule_report,
            });
        }

        candidate.updated_at = now();
        let delta = compute_delta(&before, &candidate);
        self.state = candidate;
        self.history.append(HistoryEvent {
            event_id,
            timestamp: self.state.updated_at,
            action_name: name.to_owned(),
            params,
            before: before.clone(),
            after: self.state.clone(),
            delta: delta.clone(),
            success: true,
            message: message.clone(),
            violations: Vec::new(),
        });
        info!(
            simulation_id = %self.state.simulation_id,
            action = name,
            event_id = %event_id,
            time = self.state.time,
            "action applied"
        );

        Ok(ActionResult {
            success: true,
            event_id,
            before,
            after: self.state.clone(),
            delta,
            message,
            violations: Vec::new(),
            rule_report,
        })
    }

    /// Replace state with a fresh one at time 0, clear history and reseed.
    ///
    /// The simulation keeps its identifier, rules and constraints.
    pub fn reset(&mut self, seed: Option<u64>) {
        let mut state = SimulationState::new(seed);
        state.simulation_id = self.state.simulation_id;
        self.state = state;
        self.history.clear();
        self.rng = SimRng::new(seed);
        info!(simulation_id = %self.state.simulation_id, seed = ?seed, "simulation reset");
    }

    /// Independent copy of state, rules, constraints and history under a new id.
    ///
    /// The fork's stream starts fresh from the same seed.
    pub fn fork(&self) -> Simulation {
        let mut state = self.state.clone();
        state.simulation_id = SimulationId::new();
        state.metadata.insert(
            "forked_from".into(),
            Scalar::Text(self.state.simulation_id.to_string()),
        );
        state.metadata.insert(
            "forked_at_time".into(),
            Scalar::Number(self.state.time as f64),
        );
        info!(
            parent_id = %self.state.simulation_id,
            child_id = %state.simulation_id,
            time = self.state.time,
            "simulation forked"
        );
        Simulation {
            rng: SimRng::new(state.seed),
            state,
            rules: self.rules.clone(),
            constraints: self.constraints.clone(),
            history: self.history.clone(),
        }
    }

    pub fn summary(&self) -> SimulationSummary {
        SimulationSummary {
            simulation_id: self.state.simulation_id,
            time: self.state.time,
            seed: self.state.seed,
            resources: self.state.resources.len(),
            metrics: self.state.metrics.len(),
            flags: self.state.flags.len(),
            entities: self.state.entities.len(),
            rules: self.rules.len(),
            constraints: self.constraints.len(),
            history: self.history.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constraints::{MaxResourceConstraint, NonNegativeResourceConstraint};
    use crate::expr::{ComparisonOp, Condition, Value};
    use crate::rules::{RuleAction, RuleValue};
    use serde_json::json;

    fn sim() -> Simulation {
        let state = SimulationState::new(Some(42))
            .with_resource("server_load", 80.0);
        let mut sim = Simulation::with_state(state);
        sim.add_constraint(MaxResourceConstraint::new("server_load", 100.0));
        sim
    }

    #[test]
    fn rejected_action_leaves_state_untouched() {
        let mut sim = sim();
        let before = sim.state().clone();
        let result = sim
            .apply(
                "adjust_resource",
                json!({"resource": "server_load", "delta": 50.0}),
            )
            .unwrap();
        assert!(!result.success);
        assert!(result.delta.is_empty());
        assert_eq!(result.before, result.after);
        assert_eq!(result.violations[0].constraint_id, "max_resource_server_load");
        assert!(
            result.violations[0]
                .message
                .ends_with("exceeds maximum 100.0 (got 130.0)")
        );
        assert_eq!(sim.state(), &before);
        assert_eq!(sim.state().resource("server_load"), Some(80.0));
        assert_eq!(sim.history().len(), 1);
        assert!(!sim.history().events()[0].success);
    }

    #[test]
    fn committed_action_records_delta_and_event() {
        let mut sim = sim();
        let result = sim
            .apply("set_metric", json!({"metric": "latency", "value": 12.5}))
            .unwrap();
        assert!(result.success);
        assert!(result.delta.contains_key("metrics.latency"));
        assert_eq!(sim.state().metric("latency"), Some(12.5));
        let event = sim.get_event(result.event_id).unwrap();
        assert_eq!(event.action_name, "set_metric");
        assert_eq!(event.after, *sim.state());
        assert_eq!(event.params, json!({"metric": "latency", "value": 12.5}));
    }

    #[test]
    fn unknown_action_does_not_touch_history() {
        let mut sim = sim();
        let err = sim.apply("teleport", json!({})).unwrap_err();
        assert!(matches!(err, EngineError::UnknownAction { .. }));
        assert!(sim.history().is_empty());
        let err = sim.apply("set_flag", json!({"flag": "x"})).unwrap_err();
        assert!(matches!(err, EngineError::InvalidParams { .. }));
        assert!(sim.history().is_empty());
    }

    #[test]
    fn rule_effects_roll_back_with_the_step() {
        let mut sim = sim();
        sim.add_rule(DynamicRule::new(
            "spike",
            Condition::Always,
            vec![RuleAction::SetResource {
                resource: "server_load".into(),
                value: RuleValue::Expr(Value::Increment { amount: 30.0 }),
            }],
        ))
        .unwrap();
        let result = sim.apply("step", json!({})).unwrap();
        assert!(!result.success);
        assert_eq!(sim.time(), 0);
        assert_eq!(sim.state().resource("server_load"), Some(80.0));
        assert_eq!(result.rule_report.unwrap().fired, vec!["spike"]);
    }

    #[test]
    fn step_runs_rules_after_time_increment() {
        let mut sim = Simulation::new(Some(1));
        sim.add_rule(DynamicRule::new(
            "stamp",
            Condition::comparison(Value::Time, ComparisonOp::Eq, Value::literal(1.0)),
            vec![RuleAction::SetMetadata {
                key: "seen_time".into(),
                value: RuleValue::Expr(Value::Time),
            }],
        ))
        .unwrap();
        let result = sim.apply("step", serde_json::Value::Null).unwrap();
        assert!(result.success);
        assert!(result.message.contains("World rules applied: stamp"));
        assert_eq!(
            sim.state().metadata.get("seen_time"),
            Some(&Scalar::Number(1.0))
        );
    }

    #[test]
    fn rules_do_not_run_outside_step() {
        let mut sim = Simulation::new(Some(1));
        sim.add_rule(DynamicRule::new(
            "count",
            Condition::Always,
            vec![RuleAction::SetMetric {
                metric: "ticks".into(),
                value: RuleValue::Expr(Value::Increment { amount: 1.0 }),
            }],
        ))
        .unwrap();
        sim.apply("set_flag", json!({"flag": "a", "value": true}))
            .unwrap();
        sim.apply("simulate_load", json!({})).unwrap();
        assert_eq!(sim.state().metric("ticks"), None);
    }

    #[test]
    fn fork_is_isolated() {
        let mut parent = sim();
        parent
            .apply("set_resource", json!({"resource": "cash", "value": 10.0}))
            .unwrap();
        let mut child = parent.fork();
        assert_ne!(child.id(), parent.id());
        assert_eq!(child.history().len(), 1);
        assert_eq!(child.constraints().ids(), parent.constraints().ids());

        child
            .apply("set_resource", json!({"resource": "cash", "value": 99.0}))
            .unwrap();
        parent
            .apply("set_resource", json!({"resource": "cash", "value": 1.0}))
            .unwrap();
        assert_eq!(parent.state().resource("cash"), Some(1.0));
        assert_eq!(child.state().resource("cash"), Some(99.0));
        assert_eq!(
            child.state().metadata.get("forked_from"),
            Some(&Scalar::Text(parent.id().to_string()))
        );
        assert_eq!(parent.history().len(), 2);
        assert_eq!(child.history().len(), 2);
    }

    #[test]
    fn fork_restarts_the_random_stream() {
        let mut parent = Simulation::new(Some(5));
        parent.apply("simulate_load", json!({})).unwrap();
        let mut child = parent.fork();
        let mut fresh = Simulation::new(Some(5));

        let a = child.apply("simulate_load", json!({})).unwrap();
        let b = fresh.apply("simulate_load", json!({})).unwrap();
        assert_eq!(a.after.metric("load"), b.after.metric("load"));
    }

    #[test]
    fn reset_clears_history_and_state() {
        let mut sim = sim();
        sim.add_constraint(NonNegativeResourceConstraint::new("cash"));
        sim.apply("step", json!({})).unwrap();
        let id = sim.id();
        sim.reset(Some(9));
        assert_eq!(sim.id(), id);
        assert_eq!(sim.time(), 0);
        assert_eq!(sim.seed(), Some(9));
        assert!(sim.state().resources.is_empty());
        assert!(sim.history().is_empty());
        assert_eq!(sim.constraints().len(), 2);
    }

    #[test]
    fn rule_crud_through_simulation() {
        let mut sim = Simulation::new(None);
        for (id, priority) in [("a", 1), ("b", 2)] {
            let mut rule = DynamicRule::new(id, Condition::Always, vec![]);
            rule.priority = priority;
            sim.add_rule(rule).unwrap();
        }
        let ids: Vec<_> = sim.list_rules().iter().map(|r| r.rule_id.clone()).collect();
        assert_eq!(ids, vec!["b", "a"]);
        assert!(sim.get_rule("a").is_ok());
        sim.remove_rule("a").unwrap();
        assert!(matches!(
            sim.get_rule("a"),
            Err(EngineError::UnknownRuleId { .. })
        ));
        assert_eq!(sim.clear_rules(), 1);
    }

    #[test]
    fn summary_counts() {
        let mut sim = sim();
        sim.apply("set_flag", json!({"flag": "up", "value": true}))
            .unwrap();
        let summary = sim.summary();
        assert_eq!(summary.resources, 1);
        assert_eq!(summary.flags, 1);
        assert_eq!(summary.constraints, 1);
        assert_eq!(summary.history, 1);
        assert!(summary.to_string().contains("time=0"));
    }
}
