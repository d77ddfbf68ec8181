//! Output files kept with a run result
//!
//! Tools such as the DEAP and TensorGP profilers pickle their timing tables to
//! a fixed path. When an invocation rewrites one, the store copies it next to
//! the run's record and the result carries this digest of the copied bytes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// One copied output file, identified by name and SHA-256 digest.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ArtifactRecord {
    run_id: String,
    key: String,
    cas_hash: String,
    size_bytes: u64,
    created_at: DateTime<Utc>,
}

impl ArtifactRecord {
    /// Hash `bytes` copied from the output `key` of run `run_id`.
    #[must_use]
    pub fn from_bytes(run_id: impl Into<String>, key: impl Into<String>, bytes: &[u8]) -> Self {
        Self {
            run_id: run_id.into(),
            key: key.into(),
            cas_hash: sha256_cas(bytes),
            size_bytes: bytes.len() as u64,
            created_at: Utc::now(),
        }
    }

    /// Run that wrote the file, e.g. `deap/nicolau_a/trial-0000`.
    #[must_use]
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// File name inside the run's artifact directory.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// `sha256:<hex>` of the copied bytes.
    #[must_use]
    pub fn cas_hash(&self) -> &str {
        &self.cas_hash
    }

    /// Bytes copied.
    #[must_use]
    pub const fn size_bytes(&self) -> u64 {
        self.size_bytes
    }

    /// When the copy was taken.
    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

/// `sha256:<hex>` digest of `bytes`.
#[must_use]
pub fn sha256_cas(bytes: &[u8]) -> String {
    format!("sha256:{}", hex::encode(Sha256::digest(bytes)))
}
