use crate::error::EngineError;
use crate::rng::SimRng;
use crate::state::{Entity, SimulationState};
use serde::{Deserialize, Serialize};

/// Names accepted by [`Action::parse`].
pub const ACTION_NAMES: [&str; 8] = [
    "step",
    "set_resource",
    "adjust_resource",
    "set_metric",
    "set_flag",
    "add_entity",
    "remove_entity",
    "simulate_load",
];

fn default_load_factor() -> f64 {
    1.0
}

fn default_variance() -> f64 {
    0.1
}

/// A recognized action together with its validated parameters.
///
/// Serialized as the parameter object tagged with `"action"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    /// Advance time by one; world rules run afterwards.
    Step,
    SetResource { resource: String, value: f64 },
    /// Add `delta` to a resource (unset resources start at 0).
    AdjustResource { resource: String, delta: f64 },
    SetMetric { metric: String, value: f64 },
    SetFlag { flag: String, value: bool },
    /// Insert or replace an entity.
    AddEntity { entity_id: String, data: Entity },
    RemoveEntity { entity_id: String },
    /// Randomized load against `cpu_available` and `memory_available`.
    SimulateLoad {
        #[serde(default = "default_load_factor")]
        load_factor: f64,
        #[serde(default = "default_variance")]
        variance: f64,
    },
}

impl Action {
    /// Resolve an action name and its JSON parameters.
    ///
    /// Unknown names yield `UnknownAction`; missing or mistyped parameters
    /// yield `InvalidParams`.
    pub fn parse(name: &str, params: &serde_json::Value) -> Result<Self, EngineError> {
        if !ACTION_NAMES.contains(&name) {
            return Err(EngineError::UnknownAction {
                name: name.to_owned(),
            });
        }
        let mut tagged = match params {
            serde_json::Value::Null => serde_json::Map::new(),
            serde_json::Value::Object(map) => map.clone(),
            other => {
                return Err(invalid(
                    name,
                    format!("params must be an object, got {other}"),
                ));
            }
        };
        tagged.insert("action".into(), serde_json::Value::from(name));
        serde_json::from_value(serde_json::Value::Object(tagged))
            .map_err(|e| invalid(name, e.to_string()))
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Step => "step",
            Self::SetResource { .. } => "set_resource",
            Self::AdjustResource { .. } => "adjust_resource",
            Self::SetMetric { .. } => "set_metric",
            Self::SetFlag { .. } => "set_flag",
            Self::AddEntity { .. } => "add_entity",
            Self::RemoveEntity { .. } => "remove_entity",
            Self::SimulateLoad { .. } => "simulate_load",
        }
    }

    /// Apply the action's transformation to a candidate state.
    ///
    /// Returns a human-readable description of what changed.
    pub fn apply(
        &self,
        state: &mut SimulationState,
        rng: &mut SimRng,
    ) -> Result<String, EngineError> {
        let reason = match self {
            Self::Step => {
                let from = state.time;
                state.time += 1;
                format!("Advanced simulation time from {from} to {}", state.time)
            }
            Self::SetResource { resource, value } => {
                let value = finite(self.name(), "value", *value)?;
                let old = state.resources.insert(resource.clone(), value);
                format!(
                    "Set resource '{resource}' from {:?} to {value:?}",
                    old.unwrap_or(0.0)
                )
            }
            Self::AdjustResource { resource, delta } => {
                let old = state.resource(resource).unwrap_or(0.0);
                let new = finite(self.name(), resource, old + delta)?;
                state.resources.insert(resource.clone(), new);
                format!(
                    "Adjusted resource '{resource}' by {delta:?} (from {old:?} to {new:?})"
                )
            }
            Self::SetMetric { metric, value } => {
                let value = finite(self.name(), "value", *value)?;
                let old = state.metrics.insert(metric.clone(), value);
                format!(
                    "Set metric '{metric}' from {:?} to {value:?}",
                    old.unwrap_or(0.0)
                )
            }
            Self::SetFlag { flag, value } => {
                let old = state.flags.insert(flag.clone(), *value);
                format!(
                    "Set flag '{flag}' from {} to {value}",
                    old.unwrap_or(false)
                )
            }
            Self::AddEntity { entity_id, data } => {
                let existed = state.entities.insert(entity_id.clone(), data.clone());
                let verb = if existed.is_some() { "Updated" } else { "Added" };
                format!("{verb} entity '{entity_id}'")
            }
            Self::RemoveEntity { entity_id } => match state.entities.remove(entity_id) {
                Some(_) => format!("Removed entity '{entity_id}'"),
                None => format!("Entity '{entity_id}' not found (no change)"),
            },
            Self::SimulateLoad {
                load_factor,
                variance,
            } => {
                if !load_factor.is_finite() || !variance.is_finite() {
                    return Err(invalid(
                        self.name(),
                        "load_factor and variance must be finite".into(),
                    ));
                }
                let spread = variance.abs();
                let actual = load_factor * (1.0 + rng.uniform(-spread, spread));
                let cpu_delta = -10.0 * actual;
                let memory_delta = -50.0 * actual;
                let cpu = state.resource("cpu_available").unwrap_or(100.0);
                let memory = state.resource("memory_available").unwrap_or(1000.0);
                let cpu = cpu + cpu_delta;
                let memory = memory + memory_delta;
                let cpu = finite(self.name(), "cpu_available", cpu)?;
                let memory = finite(self.name(), "memory_available", memory)?;
                state.resources.insert("cpu_available".into(), cpu);
                state.resources.insert("memory_available".into(), memory);
                state.metrics.insert("load".into(), actual);
                state.time += 1;
                format!(
                    "Applied load factor {load_factor:.2} (actual: {actual:.2}), \
                     CPU: {cpu_delta:.2}, Memory: {memory_delta:.2}"
                )
            }
        };
        Ok(reason)
    }
}

/// Reject writes that would put NaN or an infinity into state.
fn finite(action: &str, field: &str, value: f64) -> Result<f64, EngineError> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(invalid(action, format!("'{field}' would become {value}")))
    }
}

fn invalid(action: &str, reason: String) -> EngineError {
    EngineError::InvalidParams {
        action: action.to_owned(),
        reason,
    }
}
