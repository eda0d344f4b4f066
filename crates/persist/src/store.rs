//! Named bundle storage.
//!
//! File layout inside the store directory:
//! ```text
//! index.json                    - index schema version, one entry per bundle
//! bundles/
//!   <name>.<digest>.json        - JSON bundle
//!   <name>.<digest>.cbor.zst    - CBOR+zstd bundle
//! ```
//! `<digest>` is the first 16 hex digits of the file's SHA-256.
//!
//! # Invariants
//! - Saving under an existing name overwrites it; there is no versioning.
//! - A bundle file is never read back unless its SHA-256 matches the index.
//! - Files are written to a temporary name and renamed into place.
//! - The index is the commit point. A save never replaces the file the
//!   current index entry points at, and a failed index write leaves both the
//!   index and the previous bundle intact.

use crate::bundle::{BundleInfo, SimulationBundle};
use crate::codec::{BundleCodec, sha256_hex};
use crate::error::{StoreError, validate_name};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const INDEX_SCHEMA_VERSION: u32 = 1;
const INDEX_FILE: &str = "index.json";
const BUNDLE_DIR: &str = "bundles";

/// Key-value storage for simulation bundles, addressed by name.
pub trait BundleStore: Send {
    /// Write `bundle` under `bundle.name`, replacing any previous bundle.
    fn save(&mut self, bundle: &SimulationBundle) -> Result<BundleInfo, StoreError>;

    fn load(&self, name: &str) -> Result<SimulationBundle, StoreError>;

    fn info(&self, name: &str) -> Result<BundleInfo, StoreError>;

    /// All bundles, most recently saved first.
    fn list(&self) -> Result<Vec<BundleInfo>, StoreError>;

    fn delete(&mut self, name: &str) -> Result<(), StoreError>;
}

fn not_found(name: &str) -> StoreError {
    StoreError::SimulationNotFound {
        name: name.to_owned(),
    }
}

fn newest_first(mut infos: Vec<BundleInfo>) -> Vec<BundleInfo> {
    infos.sort_by(|a, b| {
        b.saved_at
            .cmp(&a.saved_at)
            .then_with(|| a.name.cmp(&b.name))
    });
    infos
}

/// In-memory store. Bundles are kept encoded so loads exercise the codec.
#[derive(Debug, Default)]
pub struct MemoryStore {
    codec: BundleCodec,
    bundles: BTreeMap<String, (BundleInfo, Vec<u8>)>,
}

impl MemoryStore {
    pub fn new(codec: BundleCodec) -> Self {
        Self {
            codec,
            bundles: BTreeMap::new(),
        }
    }
}

impl BundleStore for MemoryStore {
    fn save(&mut self, bundle: &SimulationBundle) -> Result<BundleInfo, StoreError> {
        validate_name(&bundle.name)?;
        let bytes = self.codec.encode(bundle)?;
        let info = bundle.info();
        self.bundles
            .insert(bundle.name.clone(), (info.clone(), bytes));
        Ok(info)
    }

    fn load(&self, name: &str) -> Result<SimulationBundle, StoreError> {
        validate_name(name)?;
        let (_, bytes) = self.bundles.get(name).ok_or_else(|| not_found(name))?;
        self.codec.decode(bytes)
    }

    fn info(&self, name: &str) -> Result<BundleInfo, StoreError> {
        validate_name(name)?;
        self.bundles
            .get(name)
            .map(|(info, _)| info.clone())
            .ok_or_else(|| not_found(name))
    }

    fn list(&self) -> Result<Vec<BundleInfo>, StoreError> {
        let infos = self.bundles.values().map(|(info, _)| info.clone());
        Ok(newest_first(infos.collect()))
    }

    fn delete(&mut self, name: &str) -> Result<(), StoreError> {
        validate_name(name)?;
        self.bundles
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| not_found(name))
    }
}

/// A single entry in the store index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexEntry {
    pub info: BundleInfo,
    /// Path relative to the store root.
    pub file: String,
    pub codec: BundleCodec,
    pub sha256: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoreIndex {
    index_schema_version: u32,
    #[serde(default)]
    entries: BTreeMap<String, IndexEntry>,
}

impl Default for StoreIndex {
    fn default() -> Self {
        Self {
            index_schema_version: INDEX_SCHEMA_VERSION,
            entries: BTreeMap::new(),
        }
    }
}

/// Directory-backed store with an integrity-checked index.
#[derive(Debug)]
pub struct FileStore {
    root: PathBuf,
    codec: BundleCodec,
    index: StoreIndex,
}

impl FileStore {
    /// Open or create a store at `path`. New bundles are written with `codec`;
    /// existing ones are read with whatever codec they were saved in.
    pub fn open(path: impl AsRef<Path>, codec: BundleCodec) -> Result<Self, StoreError> {
        let root = path.as_ref().to_path_buf();
        std::fs::create_dir_all(root.join(BUNDLE_DIR))?;

        let index_path = root.join(INDEX_FILE);
        let index = if index_path.exists() {
            let index: StoreIndex = serde_json::from_slice(&std::fs::read(&index_path)?)?;
            if index.index_schema_version != INDEX_SCHEMA_VERSION {
                return Err(StoreError::SchemaMismatch {
                    file_version: index.index_schema_version,
                    expected_version: INDEX_SCHEMA_VERSION,
                });
            }
            index
        } else {
            let index = StoreIndex::default();
            write_atomic(&index_path, &serde_json::to_vec_pretty(&index)?)?;
            index
        };
        debug!(root = %root.display(), bundles = index.entries.len(), "bundle store opened");

        Ok(Self { root, codec, index })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn codec(&self) -> BundleCodec {
        self.codec
    }

    /// Index entry for `name`, if saved.
    pub fn entry(&self, name: &str) -> Option<&IndexEntry> {
        self.index.entries.get(name)
    }

    /// Re-hash every bundle file against the index.
    pub fn verify_integrity(&self) -> Result<(), StoreError> {
        for entry in self.index.entries.values() {
            self.read_verified(entry)?;
        }
        Ok(())
    }

    fn read_verified(&self, entry: &IndexEntry) -> Result<Vec<u8>, StoreError> {
        let data = std::fs::read(self.root.join(&entry.file))?;
        let actual = sha256_hex(&data);
        if actual != entry.sha256 {
            return Err(StoreError::IntegrityMismatch {
                expected: entry.sha256.clone(),
                actual,
            });
        }
        Ok(data)
    }

    fn save_index(&self) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec_pretty(&self.index)?;
        write_atomic(&self.root.join(INDEX_FILE), &bytes)
    }
}

impl BundleStore for FileStore {
    fn save(&mut self, bundle: &SimulationBundle) -> Result<BundleInfo, StoreError> {
        validate_name(&bundle.name)?;
        let bytes = self.codec.encode(bundle)?;
        let sha256 = sha256_hex(&bytes);
        let file = format!(
            "{BUNDLE_DIR}/{}.{}.{}",
            bundle.name,
            &sha256[..16],
            self.codec.extension()
        );
        write_atomic(&self.root.join(&file), &bytes)?;

        let info = bundle.info();
        let entry = IndexEntry {
            info: info.clone(),
            file: file.clone(),
            codec: self.codec,
            sha256,
        };
        let previous = self.index.entries.insert(bundle.name.clone(), entry);
        if let Err(e) = self.save_index() {
            let reused = previous.as_ref().is_some_and(|old| old.file == file);
            match previous {
                Some(old) => self.index.entries.insert(bundle.name.clone(), old),
                None => self.index.entries.remove(&bundle.name),
            };
            if !reused {
                remove_stale(&self.root.join(&file));
            }
            warn!(bundle = %bundle.name, error = %e, "index write failed, save rolled back");
            return Err(e);
        }

        if let Some(old) = previous.filter(|old| old.file != file) {
            remove_stale(&self.root.join(&old.file));
        }
        info!(bundle = %bundle.name, file = %file, bytes = bytes.len(), "bundle saved");
        Ok(info)
    }

    fn load(&self, name: &str) -> Result<SimulationBundle, StoreError> {
        validate_name(name)?;
        let entry = self.index.entries.get(name).ok_or_else(|| not_found(name))?;
        let data = self.read_verified(entry)?;
        entry.codec.decode(&data)
    }

    fn info(&self, name: &str) -> Result<BundleInfo, StoreError> {
        validate_name(name)?;
        self.index
            .entries
            .get(name)
            .map(|e| e.info.clone())
            .ok_or_else(|| not_found(name))
    }

    fn list(&self) -> Result<Vec<BundleInfo>, StoreError> {
        let infos = self.index.entries.values().map(|e| e.info.clone());
        Ok(newest_first(infos.collect()))
    }

    fn delete(&mut self, name: &str) -> Result<(), StoreError> {
        validate_name(name)?;
        let Some(entry) = self.index.entries.remove(name) else {
            return Err(not_found(name));
        };
        if let Err(e) = self.save_index() {
            self.index.entries.insert(name.to_owned(), entry);
            return Err(e);
        }
        remove_stale(&self.root.join(&entry.file));
        info!(bundle = %name, "bundle deleted");
        Ok(())
    }
}

/// Remove a file the index no longer references. The index has already
/// committed, so failures are logged rather than returned.
fn remove_stale(path: &Path) {
    match std::fs::remove_file(path) {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => {
            warn!(file = %path.display(), error = %e, "stale bundle file left behind");
        }
        _ => {}
    }
}

fn write_atomic(path: &Path, data: &[u8]) -> Result<(), StoreError> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    std::fs::write(&tmp, data)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}
