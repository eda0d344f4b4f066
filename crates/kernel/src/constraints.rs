//! Server-enforced invariants checked against every candidate state.
//!
//! # Invariants
//! - Constraints are pure: checking never mutates state.
//! - Violations are reported in registration order.

use crate::state::SimulationState;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// A single failed constraint check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Violation {
    pub constraint_id: String,
    pub message: String,
}

/// A predicate over a candidate state.
///
/// `committed` is the last committed state, for constraints that relate the
/// candidate to what came before.
pub trait Constraint: fmt::Debug + Send + Sync {
    fn id(&self) -> String;

    fn check(&self, candidate: &SimulationState, committed: &SimulationState) -> Vec<Violation>;
}

/// Resource must not drop below zero. An unset resource reads as 0.
#[derive(Debug, Clone, PartialEq)]
pub struct NonNegativeResourceConstraint {
    resource: String,
}

impl NonNegativeResourceConstraint {
    pub fn new(resource: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
        }
    }
}

impl Constraint for NonNegativeResourceConstraint {
    fn id(&self) -> String {
        format!("non_negative_resource_{}", self.resource)
    }

    fn check(&self, candidate: &SimulationState, _committed: &SimulationState) -> Vec<Violation> {
        let value = candidate.resource(&self.resource).unwrap_or(0.0);
        if value < 0.0 {
            vec![Violation {
                constraint_id: self.id(),
                message: format!(
                    "Resource '{}' cannot be negative (got {value:?})",
                    self.resource
                ),
            }]
        } else {
            Vec::new()
        }
    }
}

/// Resource must not exceed `max`. An unset resource reads as 0.
#[derive(Debug, Clone, PartialEq)]
pub struct MaxResourceConstraint {
    resource: String,
    max: f64,
}

impl MaxResourceConstraint {
    pub fn new(resource: impl Into<String>, max: f64) -> Self {
        Self {
            resource: resource.into(),
            max,
        }
    }
}

impl Constraint for MaxResourceConstraint {
    fn id(&self) -> String {
        format!("max_resource_{}", self.resource)
    }

    fn check(&self, candidate: &SimulationState, _committed: &SimulationState) -> Vec<Violation> {
        let value = candidate.resource(&self.resource).unwrap_or(0.0);
        if value > self.max {
            vec![Violation {
                constraint_id: self.id(),
                message: format!(
                    "Resource '{}' exceeds maximum {:?} (got {value:?})",
                    self.resource, self.max
                ),
            }]
        } else {
            Vec::new()
        }
    }
}

/// Candidate time must not be earlier than the committed time.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TimeMonotonicConstraint;

impl Constraint for TimeMonotonicConstraint {
    fn id(&self) -> String {
        "time_monotonic".to_owned()
    }

    fn check(&self, candidate: &SimulationState, committed: &SimulationState) -> Vec<Violation> {
        if candidate.time < committed.time {
            vec![Violation {
                constraint_id: self.id(),
                message: format!(
                    "Time cannot go backwards (was {}, now {})",
                    committed.time, candidate.time
                ),
            }]
        } else {
            Vec::new()
        }
    }
}

/// Serializable description of a built-in constraint, used by configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConstraintSpec {
    NonNegativeResource { resource: String },
    MaxResource { resource: String, max: f64 },
    TimeMonotonic,
}

impl ConstraintSpec {
    pub fn build(&self) -> Arc<dyn Constraint> {
        match self {
            Self::NonNegativeResource { resource } => {
                Arc::new(NonNegativeResourceConstraint::new(resource.clone()))
            }
            Self::MaxResource { resource, max } => {
                Arc::new(MaxResourceConstraint::new(resource.clone(), *max))
            }
            Self::TimeMonotonic => Arc::new(TimeMonotonicConstraint),
        }
    }
}

/// Ordered set of registered constraints.
///
/// Cloning shares the (stateless) constraint objects.
#[derive(Debug, Clone, Default)]
pub struct ConstraintEngine {
    constraints: Vec<Arc<dyn Constraint>>,
}

impl ConstraintEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_specs<'a>(specs: impl IntoIterator<Item = &'a ConstraintSpec>) -> Self {
        Self {
            constraints: specs.into_iter().map(ConstraintSpec::build).collect(),
        }
    }

    pub fn add(&mut self, constraint: impl Constraint + 'static) {
        self.constraints.push(Arc::new(constraint));
    }

    pub fn add_shared(&mut self, constraint: Arc<dyn Constraint>) {
        self.constraints.push(constraint);
    }

    pub fn len(&self) -> usize {
        self.constraints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.constraints.is_empty()
    }

    pub fn ids(&self) -> Vec<String> {
        self.constraints.iter().map(|c| c.id()).collect()
    }

    /// Run every constraint in registration order and concatenate violations.
    pub fn validate(
        &self,
        candidate: &SimulationState,
        committed: &SimulationState,
    ) -> Vec<Violation> {
        self.constraints
            .iter()
            .flat_map(|c| c.check(candidate, committed))
            .collect()
    }
}
