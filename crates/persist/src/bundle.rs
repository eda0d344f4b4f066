use crate::error::StoreError;
use scenario_common::{SimulationId, Timestamp, now};
use scenario_kernel::{ConstraintEngine, DynamicRule, HistoryEvent, Simulation, SimulationState};
use serde::{Deserialize, Serialize};

/// Current bundle layout version.
pub const BUNDLE_SCHEMA_VERSION: u32 = 1;

/// Everything needed to bring a simulation back: state, rules and the full
/// audit history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationBundle {
    pub schema_version: u32,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub saved_at: Timestamp,
    pub state: SimulationState,
    #[serde(default)]
    pub rules: Vec<DynamicRule>,
    #[serde(default)]
    pub history: Vec<HistoryEvent>,
    /// Ids of the constraints registered at save time. Informational only.
    #[serde(default)]
    pub constraints: Vec<String>,
}

/// Bundle metadata, readable without touching state or history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BundleInfo {
    pub name: String,
    pub description: String,
    pub saved_at: Timestamp,
    pub simulation_id: SimulationId,
    pub time: u64,
    pub seed: Option<u64>,
    pub rule_count: usize,
    pub history_count: usize,
    #[serde(default)]
    pub constraints: Vec<String>,
}

/// Just the version field, decoded ahead of the full bundle.
#[derive(Debug, Deserialize)]
pub(crate) struct BundleHeader {
    pub schema_version: u32,
}

impl BundleHeader {
    pub(crate) fn check(&self) -> Result<(), StoreError> {
        if self.schema_version == BUNDLE_SCHEMA_VERSION {
            Ok(())
        } else {
            Err(StoreError::SchemaMismatch {
                file_version: self.schema_version,
                expected_version: BUNDLE_SCHEMA_VERSION,
            })
        }
    }
}

impl SimulationBundle {
    /// Snapshot `sim` as a bundle named `name`.
    pub fn capture(sim: &Simulation, name: &str, description: &str) -> Self {
        Self {
            schema_version: BUNDLE_SCHEMA_VERSION,
            name: name.to_owned(),
            description: description.to_owned(),
            saved_at: now(),
            state: sim.state().clone(),
            rules: sim.rules().rules().to_vec(),
            history: sim.history().events().to_vec(),
            constraints: sim.constraints().ids(),
        }
    }

    pub fn info(&self) -> BundleInfo {
        BundleInfo {
            name: self.name.clone(),
            description: self.description.clone(),
            saved_at: self.saved_at,
            simulation_id: self.state.simulation_id,
            time: self.state.time,
            seed: self.state.seed,
            rule_count: self.rules.len(),
            history_count: self.history.len(),
            constraints: self.constraints.clone(),
        }
    }

    /// Rebuild a live simulation, checked against the given constraints.
    ///
    /// The random stream restarts from the stored seed rather than resuming.
    pub fn restore(self, constraints: ConstraintEngine) -> Result<Simulation, StoreError> {
        BundleHeader {
            schema_version: self.schema_version,
        }
        .check()?;
        Ok(Simulation::from_parts(
            self.state,
            self.rules,
            self.history,
            constraints,
        )?)
    }
}
