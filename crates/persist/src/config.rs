//! Engine configuration.

use crate::codec::BundleCodec;
use crate::error::StoreError;
use scenario_kernel::{ConstraintEngine, ConstraintSpec, Simulation, SimulationState};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Settings for new simulations and for the bundle store.
///
/// Every field is optional in a config file; missing fields take the
/// default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Seed for simulations created without an explicit one.
    ///
    /// Default: 42.
    pub default_seed: Option<u64>,

    /// Directory of the file-backed bundle store.
    ///
    /// Default: `$HOME/.scenario-engine/simulations`.
    pub storage_dir: PathBuf,

    /// Encoding for newly saved bundles. Default: JSON.
    pub codec: BundleCodec,

    /// Constraints registered on every new or loaded simulation.
    pub default_constraints: Vec<ConstraintSpec>,

    pub initial_resources: BTreeMap<String, f64>,
    pub initial_flags: BTreeMap<String, bool>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let resources = ["cpu_available", "memory_available", "disk_space"];
        let mut default_constraints: Vec<ConstraintSpec> = resources
            .iter()
            .map(|r| ConstraintSpec::NonNegativeResource {
                resource: (*r).to_owned(),
            })
            .collect();
        default_constraints.push(ConstraintSpec::MaxResource {
            resource: "cpu_available".into(),
            max: 100.0,
        });

        Self {
            default_seed: Some(42),
            storage_dir: default_storage_dir(),
            codec: BundleCodec::Json,
            default_constraints,
            initial_resources: resources
                .into_iter()
                .map(str::to_owned)
                .zip([100.0, 1000.0, 5000.0])
                .collect(),
            initial_flags: BTreeMap::from([("system_healthy".to_owned(), true)]),
        }
    }
}

fn default_storage_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".scenario-engine")
        .join("simulations")
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read a JSON config file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        Ok(serde_json::from_slice(&std::fs::read(path)?)?)
    }

    pub fn with_storage_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.storage_dir = dir.into();
        self
    }

    pub fn with_codec(mut self, codec: BundleCodec) -> Self {
        self.codec = codec;
        self
    }

    pub fn constraints(&self) -> ConstraintEngine {
        ConstraintEngine::from_specs(&self.default_constraints)
    }

    /// Initial state for a new simulation. `seed` overrides `default_seed`.
    pub fn initial_state(&self, seed: Option<u64>) -> SimulationState {
        let mut state = SimulationState::new(seed.or(self.default_seed));
        state.resources = self.initial_resources.clone();
        state.flags = self.initial_flags.clone();
        state
    }

    /// A fresh simulation with the configured state and constraints.
    pub fn new_simulation(&self, seed: Option<u64>) -> Simulation {
        Simulation::with_state(self.initial_state(seed))
            .with_constraints(self.constraints())
    }
}
