use scenario_common::{Scalar, SimulationId, Timestamp, now};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Schema tag written into every serialized state.
pub const STATE_SCHEMA_VERSION: &str = "v1";

/// A named bag of attributes representing a simulated object.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Entity {
    pub attributes: BTreeMap<String, serde_json::Value>,
}

impl Entity {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.attributes.insert(key.to_owned(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.attributes.get(key)
    }
}

/// The authoritative state of one simulation.
///
/// Every mapping is a `BTreeMap` so that serialization, deltas and iteration are
/// deterministic. `time` never decreases across committed states.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationState {
    pub schema_version: String,
    pub simulation_id: SimulationId,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    pub seed: Option<u64>,
    pub time: u64,
    #[serde(default)]
    pub entities: BTreeMap<String, Entity>,
    #[serde(default)]
    pub metrics: BTreeMap<String, f64>,
    #[serde(default)]
    pub resources: BTreeMap<String, f64>,
    #[serde(default)]
    pub flags: BTreeMap<String, bool>,
    #[serde(default)]
    pub metadata: BTreeMap<String, Scalar>,
}

impl SimulationState {
    /// Fresh state at time 0 with a new identifier.
    pub fn new(seed: Option<u64>) -> Self {
        let created = now();
        Self {
            schema_version: STATE_SCHEMA_VERSION.to_owned(),
            simulation_id: SimulationId::new(),
            created_at: created,
            updated_at: created,
            seed,
            time: 0,
            entities: BTreeMap::new(),
            metrics: BTreeMap::new(),
            resources: BTreeMap::new(),
            flags: BTreeMap::new(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_resource(mut self, name: &str, value: f64) -> Self {
        self.resources.insert(name.to_owned(), value);
        self
    }

    pub fn with_metric(mut self, name: &str, value: f64) -> Self {
        self.metrics.insert(name.to_owned(), value);
        self
    }

    pub fn with_flag(mut self, name: &str, value: bool) -> Self {
        self.flags.insert(name.to_owned(), value);
        self
    }

    pub fn resource(&self, name: &str) -> Option<f64> {
        self.resources.get(name).copied()
    }

    pub fn metric(&self, name: &str) -> Option<f64> {
        self.metrics.get(name).copied()
    }

    pub fn flag(&self, name: &str) -> Option<bool> {
        self.flags.get(name).copied()
    }

    /// Equality on simulation content, ignoring identifiers and wall-clock stamps.
    pub fn same_content(&self, other: &Self) -> bool {
        self.seed == other.seed
            && self.time == other.time
            && self.entities == other.entities
            && self.metrics == other.metrics
            && self.resources == other.resources
            && self.flags == other.flags
            && self.metadata == other.metadata
    }
}

impl Default for SimulationState {
    fn default() -> Self {
        Self::new(None)
    }
}
