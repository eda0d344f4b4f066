//! Scenario Kernel: authoritative simulation state, constraint-checked actions,
//! world rules, audit history and timeline forks.
//!
//! # Invariants
//! - An action and the rule effects it triggers commit together or not at all.
//! - `time` never decreases across committed states.
//! - The same seed and the same ordered actions produce the same states and deltas.
//! - A fork shares nothing mutable with its parent.

pub mod actions;
pub mod constraints;
pub mod delta;
pub mod error;
pub mod expr;
pub mod history;
pub mod registry;
pub mod rng;
pub mod rules;
pub mod simulation;
pub mod state;

pub use actions::{ACTION_NAMES, Action};
pub use constraints::{
    Constraint, ConstraintEngine, ConstraintSpec, MaxResourceConstraint,
    NonNegativeResourceConstraint, TimeMonotonicConstraint, Violation,
};
pub use delta::{FieldChange, StateDelta, compute_delta};
pub use error::{EngineError, EvalError};
pub use expr::{ComparisonOp, Condition, Value};
pub use history::{History, HistoryEvent};
pub use registry::{SimulationHandle, SimulationRegistry};
pub use rng::SimRng;
pub use rules::{
    DynamicRule, RuleAction, RuleEngine, RuleFailure, RulePatch, RuleReport, RuleValue,
};
pub use simulation::{ActionResult, Simulation, SimulationSummary};
pub use state::{Entity, STATE_SCHEMA_VERSION, SimulationState};
