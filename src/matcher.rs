use facegate_vision::{ContentHash, Signature};

use crate::config::DEFAULT_THRESHOLD;

/// Euclidean distance over all signature dimensions.
pub fn distance(a: &Signature, b: &Signature) -> f64 {
    a.values()
        .iter()
        .zip(b.values().iter())
        .map(|(&x, &y)| {
            let d = x as f64 - y as f64;
            d * d
        })
        .sum::<f64>()
        .sqrt()
}

/// True iff both signatures are present and strictly closer than `threshold`.
pub fn same_identity(a: Option<&Signature>, b: Option<&Signature>, threshold: f32) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => distance(a, b) < threshold as f64,
        _ => false,
    }
}

/// Exact-match fast path; never true for absent hashes.
pub fn same_content_hash(a: Option<&ContentHash>, b: Option<&ContentHash>) -> bool {
    matches!((a, b), (Some(a), Some(b)) if a == b)
}

/// A signature about to be compared against many stored ones, hashed once.
#[derive(Debug, Clone, Copy)]
pub struct Candidate<'a> {
    pub signature: &'a Signature,
    pub hash: ContentHash,
}

impl<'a> Candidate<'a> {
    pub fn new(signature: &'a Signature) -> Self {
        Self {
            signature,
            hash: signature.content_hash(),
        }
    }
}

/// Match policy shared by login, enrollment and the duplicate sweep: the
/// content hash is checked first, then distance.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchPolicy {
    pub threshold: f32,
}

impl Default for MatchPolicy {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
        }
    }
}

impl MatchPolicy {
    pub fn new(threshold: f32) -> Self {
        Self { threshold }
    }

    pub fn matches(
        &self,
        candidate: &Candidate<'_>,
        stored: &Signature,
        stored_hash: Option<&ContentHash>,
    ) -> bool {
        if same_content_hash(Some(&candidate.hash), stored_hash) {
            return true;
        }
        same_identity(Some(candidate.signature), Some(stored), self.threshold)
    }
}
