use crate::error::EngineError;
use crate::simulation::Simulation;
use scenario_common::SimulationId;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

/// Shared handle to one simulation.
///
/// Every operation against the simulation runs under the handle's lock, so
/// two callers can never interleave on the same candidate computation.
#[derive(Debug, Clone)]
pub struct SimulationHandle {
    inner: Arc<Mutex<Simulation>>,
}

impl SimulationHandle {
    pub fn new(sim: Simulation) -> Self {
        Self {
            inner: Arc::new(Mutex::new(sim)),
        }
    }

    /// Lock for the duration of the returned guard.
    ///
    /// A poisoned lock is recovered: transitions commit by swapping a fully
    /// built candidate, so a panic mid-operation leaves the last committed state.
    pub fn lock(&self) -> MutexGuard<'_, Simulation> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `f` with exclusive access.
    pub fn with<R>(&self, f: impl FnOnce(&mut Simulation) -> R) -> R {
        f(&mut *self.lock())
    }
}

/// Simulations addressed by id.
///
/// Keys are fixed at registration; the simulation behind a key may later be
/// replaced wholesale (for example by a load).
#[derive(Debug, Default)]
pub struct SimulationRegistry {
    sims: RwLock<BTreeMap<SimulationId, SimulationHandle>>,
}

impl SimulationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `sim` under its own id and return that id.
    pub fn insert(&self, sim: Simulation) -> SimulationId {
        let id = sim.id();
        self.write().insert(id, SimulationHandle::new(sim));
        id
    }

    pub fn get(&self, id: SimulationId) -> Result<SimulationHandle, EngineError> {
        self.read()
            .get(&id)
            .cloned()
            .ok_or(EngineError::SimulationNotFound { id })
    }

    /// Fork `id` into a newly registered simulation and return the new id.
    pub fn fork(&self, id: SimulationId) -> Result<SimulationId, EngineError> {
        let child = self.get(id)?.with(|sim| sim.fork());
        Ok(self.insert(child))
    }

    /// Swap the simulation behind `id` for `sim`.
    pub fn replace(&self, id: SimulationId, sim: Simulation) -> Result<(), EngineError> {
        let handle = self.get(id)?;
        *handle.lock() = sim;
        Ok(())
    }

    pub fn remove(&self, id: SimulationId) -> Result<(), EngineError> {
        self.write()
            .remove(&id)
            .map(|_| ())
            .ok_or(EngineError::SimulationNotFound { id })
    }

    pub fn ids(&self) -> Vec<SimulationId> {
        self.read().keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, BTreeMap<SimulationId, SimulationHandle>> {
        self.sims.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, BTreeMap<SimulationId, SimulationHandle>> {
        self.sims.write().unwrap_or_else(PoisonError::into_inner)
    }
}
