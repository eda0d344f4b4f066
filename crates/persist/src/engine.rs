//! Session façade: live simulations plus named bundles.

use crate::bundle::{BundleInfo, SimulationBundle};
use crate::config::EngineConfig;
use crate::error::StoreError;
use crate::store::{BundleStore, FileStore};
use scenario_common::SimulationId;
use scenario_kernel::{ActionResult, SimulationHandle, SimulationRegistry, SimulationSummary};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::info;

/// Live simulations addressed by id, backed by a bundle store.
///
/// Lock order is simulation handle first, then store. `load` reads the
/// bundle and builds the new simulation before taking the handle lock, so a
/// failed load leaves the live simulation untouched.
#[derive(Debug)]
pub struct Engine<S: BundleStore> {
    config: EngineConfig,
    registry: SimulationRegistry,
    store: Mutex<S>,
}

impl Engine<FileStore> {
    /// Engine over a file store at `config.storage_dir`.
    pub fn open(config: EngineConfig) -> Result<Self, StoreError> {
        let store = FileStore::open(&config.storage_dir, config.codec)?;
        Ok(Self::new(config, store))
    }
}

impl<S: BundleStore> Engine<S> {
    pub fn new(config: EngineConfig, store: S) -> Self {
        Self {
            config,
            registry: SimulationRegistry::new(),
            store: Mutex::new(store),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &SimulationRegistry {
        &self.registry
    }

    /// Register a simulation built from the config defaults.
    pub fn create_simulation(&self, seed: Option<u64>) -> SimulationId {
        self.registry.insert(self.config.new_simulation(seed))
    }

    pub fn handle(&self, id: SimulationId) -> Result<SimulationHandle, StoreError> {
        Ok(self.registry.get(id)?)
    }

    pub fn apply(
        &self,
        id: SimulationId,
        action: &str,
        params: serde_json::Value,
    ) -> Result<ActionResult, StoreError> {
        Ok(self.handle(id)?.with(|sim| sim.apply(action, params))?)
    }

    pub fn fork(&self, id: SimulationId) -> Result<SimulationId, StoreError> {
        Ok(self.registry.fork(id)?)
    }

    pub fn summary(&self, id: SimulationId) -> Result<SimulationSummary, StoreError> {
        Ok(self.handle(id)?.with(|sim| sim.summary()))
    }

    /// Save simulation `id` as bundle `name`, overwriting any bundle of that name.
    pub fn save(
        &self,
        id: SimulationId,
        name: &str,
        description: &str,
    ) -> Result<BundleInfo, StoreError> {
        let handle = self.handle(id)?;
        let sim = handle.lock();
        let bundle = SimulationBundle::capture(&sim, name, description);
        let saved = self.store().save(&bundle)?;
        info!(simulation_id = %id, bundle = name, time = saved.time, "simulation saved");
        Ok(saved)
    }

    /// Replace the simulation behind `id` with bundle `name`.
    ///
    /// State, rules and history come from the bundle; the simulation keeps its
    /// id and its constraints. The random stream restarts from the stored seed.
    pub fn load(&self, id: SimulationId, name: &str) -> Result<SimulationSummary, StoreError> {
        let handle = self.handle(id)?;
        let mut bundle = self.store().load(name)?;
        bundle.state.simulation_id = id;
        let constraints = handle.with(|sim| sim.constraints().clone());
        let loaded = bundle.restore(constraints)?;
        let summary = loaded.summary();
        *handle.lock() = loaded;
        info!(simulation_id = %id, bundle = name, time = summary.time, "simulation loaded");
        Ok(summary)
    }

    /// Register bundle `name` as a new live simulation with the configured
    /// default constraints.
    ///
    /// The copy gets a fresh id, so opening a bundle never touches the
    /// simulation it was saved from.
    pub fn open_bundle(&self, name: &str) -> Result<SimulationId, StoreError> {
        let mut bundle = self.store().load(name)?;
        let stored_id = bundle.state.simulation_id;
        bundle.state.simulation_id = SimulationId::new();
        let id = self.registry.insert(bundle.restore(self.config.constraints())?);
        info!(simulation_id = %id, stored_id = %stored_id, bundle = name, "simulation opened");
        Ok(id)
    }

    pub fn list(&self) -> Result<Vec<BundleInfo>, StoreError> {
        self.store().list()
    }

    pub fn info(&self, name: &str) -> Result<BundleInfo, StoreError> {
        self.store().info(name)
    }

    pub fn delete(&self, name: &str) -> Result<(), StoreError> {
        self.store().delete(name)
    }

    fn store(&self) -> MutexGuard<'_, S> {
        self.store.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::BundleCodec;
    use crate::store::MemoryStore;
    use serde_json::json;

    fn engine() -> Engine<MemoryStore> {
        Engine::new(EngineConfig::default(), MemoryStore::new(BundleCodec::Json))
    }

    #[test]
    fn failed_load_leaves_simulation_untouched() {
        let engine = engine();
        let id = engine.create_simulation(None);
        engine
            .apply(id, "set_metric", json!({"metric": "m", "value": 1.0}))
            .unwrap();
        let before = engine.summary(id).unwrap();

        assert!(matches!(
            engine.load(id, "missing"),
            Err(StoreError::SimulationNotFound { .. })
        ));
        assert_eq!(engine.summary(id).unwrap(), before);
    }

    #[test]
    fn load_keeps_registry_key_and_session_constraints() {
        let engine = engine();
        let source = engine.create_simulation(Some(1));
        engine.apply(source, "step", json!({})).unwrap();
        engine.save(source, "snap", "").unwrap();

        let target = engine.create_simulation(Some(2));
        let summary = engine.load(target, "snap").unwrap();
        assert_eq!(summary.time, 1);
        assert_eq!(summary.simulation_id, target);
        assert_eq!(summary.constraints, 4);

        let handle = engine.handle(target).unwrap();
        assert_eq!(handle.with(|sim| sim.history().len()), 1);
    }

    #[test]
    fn open_bundle_leaves_the_saved_simulation_alone() {
        let engine = engine();
        let source = engine.create_simulation(Some(1));
        engine.save(source, "snap", "").unwrap();
        for _ in 0..3 {
            engine.apply(source, "step", json!({})).unwrap();
        }

        let opened = engine.open_bundle("snap").unwrap();
        assert_ne!(opened, source);
        assert_eq!(engine.registry().len(), 2);
        assert_eq!(engine.summary(source).unwrap().time, 3);

        let copy = engine.summary(opened).unwrap();
        assert_eq!(copy.simulation_id, opened);
        assert_eq!(copy.time, 0);

        let again = engine.open_bundle("snap").unwrap();
        assert_ne!(again, opened);
        assert_eq!(engine.registry().len(), 3);
    }

    #[test]
    fn constraint_rejection_surfaces_through_engine() {
        let engine = engine();
        let id = engine.create_simulation(None);
        let params = json!({"resource": "cpu_available", "value": 150.0});
        let result = engine.apply(id, "set_resource", params).unwrap();
        assert!(!result.success);
        assert_eq!(result.violations[0].constraint_id, "max_resource_cpu_available");
    }

    #[test]
    fn unknown_simulation_id() {
        let engine = engine();
        let missing = SimulationId::new();
        let err = engine.apply(missing, "step", json!({})).unwrap_err();
        assert!(matches!(err, StoreError::Engine(_)));
    }
}
