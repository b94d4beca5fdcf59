// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This source code is dual-licensed under either the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree or the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree. You may select, at your option, one of the above-listed licenses.

//! Index arithmetic for the complete binary eviction tree.
//!
//! Nodes are stored in heap layout: the root has index 0 and the children of node `i`
//! are `2i + 1` and `2i + 2`. A tree of height `H` has `2^H` leaves, and the path with
//! identifier `p` ends at the `p`-th leaf from the left. Path levels are counted from the leaf:
//! level 0 is the leaf bucket and level `H` is the root bucket.

use crate::{OramError, PathId};
use rand::{CryptoRng, Rng, RngCore};

/// The numeric type used to index nodes of the tree.
pub type TreeIndex = u64;
/// The numeric type used for tree heights and depths.
pub type TreeHeight = u32;

/// The largest supported tree height. Above it, node indices no longer fit in a `TreeIndex`.
pub const MAXIMUM_TREE_HEIGHT: TreeHeight = 62;

/// Returns an `InvalidConfigurationError` if `height` exceeds `MAXIMUM_TREE_HEIGHT`.
pub fn check_height(height: TreeHeight) -> Result<(), OramError> {
    if height > MAXIMUM_TREE_HEIGHT {
        return Err(OramError::InvalidConfigurationError);
    }
    Ok(())
}

/// The number of leaves, and so of distinct paths, of a tree of height `height`.
pub fn leaf_count(height: TreeHeight) -> u64 {
    1u64 << height
}

/// The number of nodes of a complete binary tree of height `height`, `2^(height + 1) - 1`.
pub fn node_count(height: TreeHeight) -> u64 {
    (1u64 << (height + 1)) - 1
}

/// Returns an `InvalidPathId` error unless `path_id` names a path of a tree of height `height`.
pub fn check_path_id(path_id: PathId, height: TreeHeight) -> Result<(), OramError> {
    check_height(height)?;
    if path_id >= leaf_count(height) {
        return Err(OramError::InvalidPathId { path_id, height });
    }
    Ok(())
}

/// Returns the `height + 1` node indices on path `path_id`, ordered from leaf to root.
///
/// At depth `d` the node index is `(2^d - 1) + offset`, where `offset` is `path_id` at the
/// leaf depth and is halved at every step towards the root.
pub fn path_nodes(path_id: PathId, height: TreeHeight) -> Result<Vec<TreeIndex>, OramError> {
    check_path_id(path_id, height)?;

    let mut result = Vec::with_capacity(usize::try_from(height)? + 1);
    let mut offset = path_id;
    for depth in (0..=height).rev() {
        result.push(((1u64 << depth) - 1) + offset);
        offset /= 2;
    }
    Ok(result)
}

/// Returns the nodes shared by two paths, ordered from the lowest shared node to the root.
///
/// Both arguments are node sequences as returned by [`path_nodes`] for the same tree.
/// The comparison starts at the root end and stops at the first mismatch.
pub fn path_intersection(path_a: &[TreeIndex], path_b: &[TreeIndex]) -> Vec<TreeIndex> {
    let mut shared: Vec<TreeIndex> = path_a
        .iter()
        .rev()
        .zip(path_b.iter().rev())
        .take_while(|(a, b)| a == b)
        .map(|(a, _)| *a)
        .collect();
    shared.reverse();
    shared
}

/// Returns the lowest level (0 = leaf) at which paths `a` and `b` share a node.
///
/// A block assigned to path `b` may be stored on path `a` at this level or any level above it.
pub fn deepest_shared_level(a: PathId, b: PathId) -> usize {
    let differing_bits = a ^ b;
    (u64::BITS - differing_bits.leading_zeros()) as usize
}

/// Returns a uniformly random path identifier for a tree of height `height`.
pub fn random_path<R: RngCore + CryptoRng>(height: TreeHeight, rng: &mut R) -> PathId {
    rng.gen_range(0..leaf_count(height))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, SeedableRng};
    use static_assertions::const_assert_eq;
    use std::mem::size_of;

    #[test]
    fn check_size_of_tree_index() {
        const_assert_eq!(size_of::<TreeIndex>(), 8);
        const_assert_eq!(size_of::<PathId>(), size_of::<TreeIndex>());
    }

    #[test]
    fn node_counts() {
        assert_eq!(node_count(0), 1);
        assert_eq!(node_count(3), 15);
        assert_eq!(leaf_count(3), 8);
    }

    #[test]
    fn path_nodes_height_three() {
        assert_eq!(path_nodes(5, 3).unwrap(), vec![12, 5, 2, 0]);
        assert_eq!(path_nodes(6, 3).unwrap(), vec![13, 6, 2, 0]);
        assert_eq!(path_nodes(0, 3).unwrap(), vec![7, 3, 1, 0]);
        assert_eq!(path_nodes(7, 3).unwrap(), vec![14, 6, 2, 0]);
        assert_eq!(path_nodes(0, 0).unwrap(), vec![0]);
    }

    #[test]
    fn path_nodes_rejects_missing_paths() {
        assert_eq!(
            path_nodes(8, 3),
            Err(OramError::InvalidPathId {
                path_id: 8,
                height: 3
            })
        );
        assert_eq!(
            path_nodes(0, MAXIMUM_TREE_HEIGHT + 1),
            Err(OramError::InvalidConfigurationError)
        );
    }

    #[test]
    fn intersection_of_neighbouring_paths() {
        let a = path_nodes(5, 3).unwrap();
        let b = path_nodes(6, 3).unwrap();
        assert_eq!(path_intersection(&a, &b), vec![2, 0]);
        assert_eq!(path_intersection(&a, &a), a);

        let c = path_nodes(0, 3).unwrap();
        assert_eq!(path_intersection(&a, &c), vec![0]);
    }

    #[test]
    fn deepest_shared_level_agrees_with_intersection() {
        let height = 5;
        for a in 0..leaf_count(height) {
            for b in 0..leaf_count(height) {
                let nodes_a = path_nodes(a, height).unwrap();
                let nodes_b = path_nodes(b, height).unwrap();
                let shared = path_intersection(&nodes_a, &nodes_b);
                let level = deepest_shared_level(a, b);
                assert_eq!(shared.len(), nodes_a.len() - level);
                assert_eq!(shared[0], nodes_a[level]);
            }
        }
    }

    #[test]
    fn random_paths_are_in_range() {
        let mut rng = StdRng::seed_from_u64(0);
        for height in 0..10 {
            for _ in 0..100 {
                assert!(check_path_id(random_path(height, &mut rng), height).is_ok());
            }
        }
    }
}
