//! Fixed-length face signatures and their exact-match digests.

use std::fmt;

use ndarray::{Array1, ArrayView1};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Width and height every face crop is resampled to before flattening.
pub const CANONICAL_SIZE: u32 = 100;

/// Number of values in a signature: canonical width × height × 3 channels.
pub const SIGNATURE_LEN: usize = (CANONICAL_SIZE * CANONICAL_SIZE * 3) as usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("invalid signature length {0}")]
pub struct SignatureLengthError(pub usize);

/// One face instance as a flattened canonical pixel grid, values in `[0, 255]`.
///
/// The length is always [`SIGNATURE_LEN`]; the only ways to build one are the
/// checked conversion from `Vec<f32>` and the extractor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<f32>", into = "Vec<f32>")]
pub struct Signature {
    values: Array1<f32>,
}

impl Signature {
    pub(crate) fn from_pixels(pixels: &[u8]) -> Result<Self, SignatureLengthError> {
        Self::try_from(pixels.iter().map(|&p| p as f32).collect::<Vec<_>>())
    }

    pub fn values(&self) -> ArrayView1<'_, f32> {
        self.values.view()
    }

    pub fn to_vec(&self) -> Vec<f32> {
        self.values.to_vec()
    }

    /// Digest of the exact value representation.
    ///
    /// Signatures that are merely close produce unrelated hashes.
    pub fn content_hash(&self) -> ContentHash {
        let mut hasher = Sha256::new();
        for v in self.values.iter() {
            hasher.update(v.to_le_bytes());
        }
        ContentHash(hasher.finalize().into())
    }
}

impl TryFrom<Vec<f32>> for Signature {
    type Error = SignatureLengthError;

    fn try_from(values: Vec<f32>) -> Result<Self, Self::Error> {
        if values.len() != SIGNATURE_LEN {
            return Err(SignatureLengthError(values.len()));
        }
        Ok(Self {
            values: Array1::from_vec(values),
        })
    }
}

impl From<Signature> for Vec<f32> {
    fn from(sig: Signature) -> Self {
        sig.values.to_vec()
    }
}

/// SHA-256 of a signature's little-endian `f32` bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentHash([u8; 32]);

impl ContentHash {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in &self.0 {
            write!(f, "{b:02x}")?;
        }
        Ok(())
    }
}

/// Element-wise mean of a capture session's signatures.
///
/// Callers must never pass an empty slice: a session that collected nothing
/// reports `NoFaceCaptured` instead of aggregating.
pub fn aggregate(signatures: &[Signature]) -> Signature {
    assert!(
        !signatures.is_empty(),
        "aggregate called without any signatures"
    );

    let mut sum = Array1::<f64>::zeros(SIGNATURE_LEN);
    for sig in signatures {
        sum.zip_mut_with(&sig.values, |acc, &v| *acc += v as f64);
    }
    let n = signatures.len() as f64;

    Signature {
        values: sum.mapv(|v| (v / n) as f32),
    }
}
