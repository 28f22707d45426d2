//! Linear duplicate search over the stored population.

use std::collections::HashSet;

use facegate_vision::Signature;
use serde::Serialize;

use crate::matcher::{Candidate, MatchPolicy};
use crate::storage::IdentityRecord;

/// Usernames whose faces matched a primary member. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DuplicateCluster {
    pub primary: String,
    pub similar: Vec<String>,
}

/// Every record whose stored face matches `candidate`, in population order.
/// The candidate is hashed once for the whole scan.
///
/// Records without a face, or whose stored values are not a valid signature,
/// are skipped.
pub fn find_similar<'a>(
    policy: &MatchPolicy,
    candidate: &Signature,
    population: &'a [IdentityRecord],
) -> Vec<&'a IdentityRecord> {
    let candidate = Candidate::new(candidate);
    population
        .iter()
        .filter(|record| match record.signature() {
            None => false,
            Some(Ok(stored)) => policy.matches(&candidate, &stored, record.content_hash.as_ref()),
            Some(Err(e)) => {
                log::warn!("skipping {}: {e}", record.username);
                false
            }
        })
        .collect()
}

/// Split the population into non-overlapping duplicate clusters.
///
/// Each not-yet-assigned record with a valid face seeds a search over the
/// whole population; if any unassigned record besides itself matches, the
/// seed becomes the cluster's primary and every such match is marked
/// assigned. Seeds are taken in population order, so the primary is whichever
/// member comes first.
pub fn partition_duplicates(
    policy: &MatchPolicy,
    population: &[IdentityRecord],
) -> Vec<DuplicateCluster> {
    let mut assigned: HashSet<&str> = HashSet::new();
    let mut clusters = Vec::new();

    for seed in population {
        if assigned.contains(seed.username.as_str()) {
            continue;
        }
        let Some(Ok(signature)) = seed.signature() else {
            continue;
        };

        // members already claimed by an earlier cluster stay there
        let matches: Vec<&IdentityRecord> = find_similar(policy, &signature, population)
            .into_iter()
            .filter(|r| !assigned.contains(r.username.as_str()))
            .collect();
        let similar: Vec<String> = matches
            .iter()
            .filter(|r| r.username != seed.username)
            .map(|r| r.username.clone())
            .collect();
        if similar.is_empty() {
            continue;
        }

        assigned.extend(matches.iter().map(|&r| r.username.as_str()));
        log::info!(
            "{} shares a face with {} other account(s)",
            seed.username,
            similar.len()
        );
        clusters.push(DuplicateCluster {
            primary: seed.username.clone(),
            similar,
        });
    }

    clusters
}
