//! Action scripts: rules and constraints to install, then actions to run.
//!
//! ```json
//! {
//!   "constraints": [{"type": "max_resource", "resource": "servers", "max": 10}],
//!   "rules": [{"rule_id": "r1", "condition": {"type": "always"}, "actions": []}],
//!   "actions": [
//!     {"action": "set_resource", "params": {"resource": "cpu", "value": 50}},
//!     {"action": "step", "repeat": 3}
//!   ]
//! }
//! ```

use anyhow::Context;
use scenario_kernel::{ActionResult, ConstraintSpec, DynamicRule, RulePatch, Simulation};
use serde::Deserialize;
use std::path::Path;
use tracing::debug;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Script {
    pub constraints: Vec<ConstraintSpec>,
    pub rules: Vec<DynamicRule>,
    pub actions: Vec<ScriptStep>,
}

#[derive(Debug, Deserialize)]
pub struct ScriptStep {
    pub action: String,
    #[serde(default)]
    pub params: serde_json::Value,
    #[serde(default = "one")]
    pub repeat: u32,
}

fn one() -> u32 {
    1
}

impl Script {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading script {}", path.display()))?;
        serde_json::from_str(&text)
            .with_context(|| format!("parsing script {}", path.display()))
    }

    /// Install constraints and rules, then run every step in order.
    ///
    /// Installing is idempotent, so a script can run against a simulation
    /// opened from a bundle it produced. A constraint whose id is already
    /// registered is skipped; a rule whose id exists is overwritten in place.
    /// Rejected actions are reported, not fatal. Unknown actions and bad
    /// params stop the script.
    pub fn run(&self, sim: &mut Simulation) -> anyhow::Result<Vec<ActionResult>> {
        let mut installed = sim.constraints().ids();
        for spec in &self.constraints {
            let constraint = spec.build();
            let id = constraint.id();
            if installed.contains(&id) {
                debug!(constraint_id = %id, "constraint already installed");
                continue;
            }
            sim.add_constraint_shared(constraint);
            installed.push(id);
        }
        for rule in &self.rules {
            if sim.rules().get(&rule.rule_id).is_some() {
                sim.update_rule(&rule.rule_id, replace_with(rule))?;
            } else {
                sim.add_rule(rule.clone())?;
            }
        }
        let mut results = Vec::new();
        for (index, step) in self.actions.iter().enumerate() {
            for _ in 0..step.repeat {
                let result = sim
                    .apply(&step.action, step.params.clone())
                    .with_context(|| format!("script step {index} ({})", step.action))?;
                results.push(result);
            }
        }
        Ok(results)
    }
}

fn replace_with(rule: &DynamicRule) -> RulePatch {
    RulePatch {
        condition: Some(rule.condition.clone()),
        actions: Some(rule.actions.clone()),
        priority: Some(rule.priority),
        description: Some(rule.description.clone()),
        enabled: Some(rule.enabled),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scenario_kernel::SimulationState;
    use serde_json::json;

    fn script(value: serde_json::Value) -> Script {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn runs_steps_with_repeat() {
        let s = script(json!({
            "rules": [{
                "rule_id": "grow",
                "condition": {"type": "always"},
                "actions": [{
                    "type": "set_resource",
                    "resource": "servers",
                    "value": {"type": "increment", "amount": 1}
                }]
            }],
            "actions": [{"action": "step", "repeat": 3}]
        }));
        let mut sim = Simulation::new(Some(1));
        let results = s.run(&mut sim).unwrap();
        assert_eq!(results.len(), 3);
        assert_eq!(sim.time(), 3);
        assert_eq!(sim.state().resource("servers"), Some(3.0));
    }

    #[test]
    fn constraint_rejections_do_not_stop_the_script() {
        let s = script(json!({
            "constraints": [{"type": "max_resource", "resource": "servers", "max": 2}],
            "actions": [
                {"action": "set_resource", "params": {"resource": "servers", "value": 5}},
                {"action": "set_resource", "params": {"resource": "servers", "value": 1}}
            ]
        }));
        let mut sim = Simulation::with_state(SimulationState::new(Some(1)));
        let results = s.run(&mut sim).unwrap();
        assert!(!results[0].success);
        assert!(results[1].success);
        assert_eq!(sim.state().resource("servers"), Some(1.0));
    }

    #[test]
    fn unknown_action_stops_the_script() {
        let s = script(json!({"actions": [{"action": "teleport"}, {"action": "step"}]}));
        let mut sim = Simulation::new(None);
        let err = s.run(&mut sim).unwrap_err();
        assert!(format!("{err:#}").contains("teleport"));
        assert_eq!(sim.time(), 0);
    }

    #[test]
    fn rerunning_a_script_reuses_installed_rules_and_constraints() {
        let mut s = script(json!({
            "constraints": [{"type": "max_resource", "resource": "servers", "max": 2}],
            "rules": [{
                "rule_id": "grow",
                "condition": {"type": "always"},
                "actions": [{
                    "type": "set_resource",
                    "resource": "servers",
                    "value": {"type": "increment", "amount": 1}
                }]
            }],
            "actions": [{"action": "step"}]
        }));
        let mut sim = Simulation::with_state(SimulationState::new(Some(1)));
        s.run(&mut sim).unwrap();
        s.run(&mut sim).unwrap();
        assert_eq!(sim.rules().len(), 1);
        assert_eq!(sim.constraints().len(), 1);
        assert_eq!(sim.state().resource("servers"), Some(2.0));

        s.rules[0].priority = 7;
        let results = s.run(&mut sim).unwrap();
        assert!(!results[0].success);
        assert_eq!(sim.rules().len(), 1);
        assert_eq!(sim.get_rule("grow").unwrap().priority, 7);
        assert_eq!(sim.state().resource("servers"), Some(2.0));
    }

    #[test]
    fn devops_demo_scales_and_burns_out() {
        let text = include_str!("../../../demos/devops_world.json");
        let s: Script = serde_json::from_str(text).unwrap();
        let mut sim = Simulation::new(Some(42));
        let results = s.run(&mut sim).unwrap();
        assert!(results.iter().all(|r| r.success));

        let state = sim.state();
        assert_eq!(state.time, 5);
        assert_eq!(state.resource("servers"), Some(4.0));
        assert_eq!(state.resource("cpu"), Some(71.25));
        assert_eq!(state.flag("burnout"), Some(true));
        assert!((state.metric("error_rate").unwrap() - 0.05).abs() < 1e-9);

        let last = results.last().unwrap().rule_report.as_ref().unwrap();
        assert_eq!(
            last.fired,
            vec!["cpu_tracker", "load_errors", "burnout", "auto_scale"]
        );
    }
}
