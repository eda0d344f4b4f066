//! Bundle encodings.
//!
//! JSON is human-readable and the default. `cbor_zstd` is CBOR compressed
//! with zstd for large histories.

use crate::bundle::{BundleHeader, SimulationBundle};
use crate::error::StoreError;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io::{Read, Write};

const ZSTD_LEVEL: i32 = 3;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BundleCodec {
    #[default]
    Json,
    CborZstd,
}

impl BundleCodec {
    /// File extension used by the file store.
    pub fn extension(self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::CborZstd => "cbor.zst",
        }
    }

    pub fn encode(self, bundle: &SimulationBundle) -> Result<Vec<u8>, StoreError> {
        match self {
            Self::Json => Ok(serde_json::to_vec_pretty(bundle)?),
            Self::CborZstd => zstd_compress(&cbor_serialize(bundle)?),
        }
    }

    /// Decode a bundle, checking its schema version before the body.
    pub fn decode(self, data: &[u8]) -> Result<SimulationBundle, StoreError> {
        match self {
            Self::Json => {
                serde_json::from_slice::<BundleHeader>(data)?.check()?;
                Ok(serde_json::from_slice(data)?)
            }
            Self::CborZstd => {
                let raw = zstd_decompress(data)?;
                cbor_deserialize::<BundleHeader>(&raw)?.check()?;
                cbor_deserialize(&raw)
            }
        }
    }
}

fn cbor_serialize<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, StoreError> {
    let mut buf = Vec::new();
    ciborium::into_writer(value, &mut buf)
        .map_err(|e| StoreError::CborEncode(e.to_string()))?;
    Ok(buf)
}

fn cbor_deserialize<T: for<'de> Deserialize<'de>>(data: &[u8]) -> Result<T, StoreError> {
    ciborium::from_reader(data)
        .map_err(|e| StoreError::CborDecode(e.to_string()))
}

fn zstd_compress(data: &[u8]) -> Result<Vec<u8>, StoreError> {
    let mut encoder = zstd::Encoder::new(Vec::new(), ZSTD_LEVEL)?;
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

fn zstd_decompress(data: &[u8]) -> Result<Vec<u8>, StoreError> {
    let mut decoder = zstd::Decoder::new(data)?;
    let mut buf = Vec::new();
    decoder.read_to_end(&mut buf)?;
    Ok(buf)
}

pub(crate) fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundle::BUNDLE_SCHEMA_VERSION;
    use scenario_kernel::{Simulation, SimulationState};
    use serde_json::json;

    fn bundle() -> SimulationBundle {
        let mut sim = Simulation::with_state(
            SimulationState::new(Some(9))
                .with_resource("cpu_available", 100.0)
                .with_flag("system_healthy", true),
        );
        sim.apply("simulate_load", json!({"load_factor": 1.5}))
            .unwrap();
        sim.apply(
            "add_entity",
            json!({"entity_id": "web", "data": {"replicas": 3, "tier": "front"}}),
        )
        .unwrap();
        SimulationBundle::capture(&sim, "codec", "codec check")
    }

    #[test]
    fn both_codecs_preserve_the_bundle() {
        let original = bundle();
        for codec in [BundleCodec::Json, BundleCodec::CborZstd] {
            let bytes = codec.encode(&original).unwrap();
            assert_eq!(codec.decode(&bytes).unwrap(), original, "{codec:?}");
        }
    }

    #[test]
    fn version_is_checked_before_body() {
        let data = json!({"schema_version": 7, "name": "future", "layout": "unknown"});
        let bytes = serde_json::to_vec(&data).unwrap();
        match BundleCodec::Json.decode(&bytes) {
            Err(StoreError::SchemaMismatch {
                file_version,
                expected_version,
            }) => {
                assert_eq!(file_version, 7);
                assert_eq!(expected_version, BUNDLE_SCHEMA_VERSION);
            }
            other => panic!("expected SchemaMismatch, got {other:?}"),
        }
    }

    #[test]
    fn garbage_cbor_is_a_decode_error() {
        let bytes = zstd_compress(b"\xff\xff\xff").unwrap();
        assert!(matches!(
            BundleCodec::CborZstd.decode(&bytes),
            Err(StoreError::CborDecode(_))
        ));
    }

    #[test]
    fn sha256_is_lowercase_hex() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
