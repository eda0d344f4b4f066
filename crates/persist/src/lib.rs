//! Persistence: named simulation bundles, bundle codecs and the session
//! engine that joins live simulations with a store.
//!
//! # Invariants
//! - A bundle carries state, rules and the complete history.
//! - Save and load are all-or-nothing; a failed load leaves the live simulation as it was.
//! - Bundles whose schema version differs from [`BUNDLE_SCHEMA_VERSION`] are refused.

pub mod bundle;
pub mod codec;
pub mod config;
pub mod engine;
pub mod error;
pub mod store;

pub use bundle::{BUNDLE_SCHEMA_VERSION, BundleInfo, SimulationBundle};
pub use codec::BundleCodec;
pub use config::EngineConfig;
pub use engine::Engine;
pub use error::StoreError;
pub use store::{BundleStore, FileStore, IndexEntry, MemoryStore};
