//! Hashing utilities for content-addressed operations and source verification.
//!
//! This module provides:
//! - `ObjectHash`: the `sha256:<hex>` digest identifying a build operation
//! - `Hashable`: digest of any serializable value
//! - `SourceDigests`: SHA-256 and SHA-512 of downloaded bytes

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256, Sha512};

pub type HashError = serde_json::Error;

/// A content-addressed digest identifying a unique object.
///
/// The digest is the SHA-256 of the JSON-serialized value, so two values that
/// serialize identically share a digest.
///
/// # Format
///
/// `"sha256:"` followed by 64 lowercase hexadecimal characters.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObjectHash(pub String);

impl std::fmt::Display for ObjectHash {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.0)
  }
}

pub trait Hashable: Serialize {
  fn compute_hash(&self) -> Result<ObjectHash, HashError> {
    let serialized = serde_json::to_string(self)?;
    Ok(ObjectHash(format!("sha256:{}", sha256_hex(serialized.as_bytes()))))
  }
}

/// Both digests a source declares, computed over the same bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceDigests {
  pub sha256: String,
  pub sha512: String,
}

impl SourceDigests {
  pub fn of(data: &[u8]) -> Self {
    Self {
      sha256: sha256_hex(data),
      sha512: sha512_hex(data),
    }
  }
}

/// Incrementally computes both source digests over streamed chunks.
#[derive(Default)]
pub struct SourceHasher {
  sha256: Sha256,
  sha512: Sha512,
}

impl SourceHasher {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn update(&mut self, chunk: &[u8]) {
    self.sha256.update(chunk);
    self.sha512.update(chunk);
  }

  pub fn finalize(self) -> SourceDigests {
    SourceDigests {
      sha256: hex::encode(self.sha256.finalize()),
      sha512: hex::encode(self.sha512.finalize()),
    }
  }
}

/// Full lowercase SHA-256 of `data`.
pub fn sha256_hex(data: &[u8]) -> String {
  hex::encode(Sha256::digest(data))
}

/// Full lowercase SHA-512 of `data`.
pub fn sha512_hex(data: &[u8]) -> String {
  hex::encode(Sha512::digest(data))
}
