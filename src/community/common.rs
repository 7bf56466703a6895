// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Common utilities for the resistance optimizer, the security index and the
//! edge mutation strategy.

use foldhash::{HashMap, HashMapExt};
use rand::prelude::*;
use rand_pcg::Pcg64;

use crate::error::{ResistanceError, Result};

// ============================================================================
// RNG Utilities
// ============================================================================

/// RNG used for random edge selection.
pub(crate) type CommunityRng = Pcg64;

/// Build RNG from optional seed.
///
/// If seed is provided, creates a deterministic RNG seeded with that value.
/// Otherwise, creates an RNG seeded from the operating system's entropy source.
#[inline]
pub(crate) fn build_rng(seed: Option<u64>) -> CommunityRng {
    match seed {
        Some(s) => Pcg64::seed_from_u64(s),
        None => Pcg64::from_os_rng(),
    }
}

// ============================================================================
// Entropy Terms
// ============================================================================

/// `x * log2(x)`, with the `x == 0` case taken as 0.
#[inline]
pub(crate) fn xlog2x(x: f64) -> f64 {
    if x > 0.0 {
        x * x.log2()
    } else {
        0.0
    }
}

/// One community's contribution to resistance:
/// `-(weight / total) * log2(volume / total)`.
///
/// Zero weight, zero volume or zero total contribute exactly 0.
#[inline]
pub(crate) fn resistance_term(weight: u64, volume: u64, total: u64) -> f64 {
    if weight == 0 || volume == 0 || total == 0 {
        return 0.0;
    }
    let total = total as f64;
    -(weight as f64 / total) * (volume as f64 / total).log2()
}

// ============================================================================
// Label/Community Grouping
// ============================================================================

/// Check that `membership` covers exactly `node_count` nodes and return the
/// number of community slots (`max + 1`).
pub(crate) fn community_slots(membership: &[usize], node_count: usize) -> Result<usize> {
    if membership.len() != node_count {
        return Err(ResistanceError::invalid(format!(
            "membership has {} entries for {} nodes",
            membership.len(),
            node_count
        )));
    }
    Ok(membership.iter().copied().max().map_or(0, |max| max + 1))
}

/// Members of every community slot, indexed by label.
pub(crate) fn parts_by_label(membership: &[usize], slots: usize) -> Vec<Vec<usize>> {
    let mut parts = vec![Vec::new(); slots];
    for (node, &label) in membership.iter().enumerate() {
        parts[label].push(node);
    }
    parts
}

/// Group nodes by their labels into communities.
///
/// Takes a vector of labels (where labels[i] is the community label for node i)
/// and returns a vector of communities (each community is a vector of node indices).
#[inline]
pub(crate) fn group_by_labels(labels: &[usize]) -> Vec<Vec<usize>> {
    let n = labels.len();
    let mut comms: HashMap<usize, Vec<usize>> = HashMap::with_capacity(n);
    for (node, &label) in labels.iter().enumerate() {
        comms.entry(label).or_default().push(node);
    }
    // Sort communities by their minimum node index for deterministic output order.
    let mut result: Vec<Vec<usize>> = comms.into_values().collect();
    result.sort_by_key(|comm| comm.first().copied().unwrap_or(usize::MAX));
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_arguments_contribute_nothing() {
        assert_eq!(xlog2x(0.0), 0.0);
        assert_eq!(resistance_term(0, 4, 8), 0.0);
        assert_eq!(resistance_term(2, 0, 8), 0.0);
        assert_eq!(resistance_term(2, 4, 0), 0.0);
        assert!((resistance_term(2, 4, 8) - 0.25).abs() < 1e-15);
        assert!((xlog2x(0.5) + 0.5).abs() < 1e-15);
    }

    #[test]
    fn seeded_rng_is_reproducible() {
        let mut a = build_rng(Some(7));
        let mut b = build_rng(Some(7));
        let xs: Vec<usize> = (0..8).map(|_| a.random_range(0..100)).collect();
        let ys: Vec<usize> = (0..8).map(|_| b.random_range(0..100)).collect();
        assert_eq!(xs, ys);
    }

    #[test]
    fn groups_sorted_by_first_member() {
        let groups = group_by_labels(&[4, 1, 4, 0, 1]);
        assert_eq!(groups, vec![vec![0, 2], vec![1, 4], vec![3]]);
        assert_eq!(parts_by_label(&[1, 1, 0], 3), vec![vec![2], vec![0, 1], vec![]]);
        assert_eq!(community_slots(&[2, 0], 2).unwrap(), 3);
        assert!(community_slots(&[0], 2).is_err());
    }
}
