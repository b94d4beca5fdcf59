// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This source code is dual-licensed under either the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree or the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree. You may select, at your option, one of the above-listed licenses.

//! The client-held overflow buffer for blocks not currently placed on any path.

use crate::{
    bucket::{ct_position, Block, Path},
    position_map::PositionMap,
    utils::deepest_shared_level,
    Address, BucketSize, PathId,
};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
/// An unordered pool of blocks. Holds at most one block per address.
///
/// The stash is not capped: a block that does not fit on the path being evicted stays here
/// until a later eviction can place it.
pub struct Stash {
    blocks: Vec<Block>,
}

impl Stash {
    /// Returns an empty stash.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a stash holding `blocks`.
    pub fn from_blocks(blocks: Vec<Block>) -> Self {
        let mut stash = Self::new();
        for block in blocks {
            stash.put(block);
        }
        stash
    }

    /// Returns the value stored at `key`, if the stash holds that block.
    pub fn get(&self, key: Address) -> Option<&[u8]> {
        ct_position(&self.blocks, key).map(|i| self.blocks[i].value.as_slice())
    }

    /// Adds `block`, replacing any block with the same key.
    pub fn put(&mut self, block: Block) {
        match ct_position(&self.blocks, block.key) {
            Some(i) => self.blocks[i] = block,
            None => self.blocks.push(block),
        }
    }

    /// Removes and returns the block stored at `key`.
    pub fn remove(&mut self, key: Address) -> Option<Block> {
        ct_position(&self.blocks, key).map(|i| self.blocks.swap_remove(i))
    }

    /// The number of blocks in the stash.
    pub fn occupancy(&self) -> usize {
        self.blocks.len()
    }

    /// Whether the stash is empty.
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// The blocks currently in the stash, in no particular order.
    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    /// Removes and returns every block in the stash.
    pub fn drain(&mut self) -> Vec<Block> {
        std::mem::take(&mut self.blocks)
    }

    /// Moves every block of `path` into the stash, leaving its buckets empty.
    pub fn read_from_path(&mut self, path: &mut Path) {
        for block in path.take_blocks() {
            self.put(block);
        }
    }

    /// Builds a new `levels`-level path for `path_id` out of the stash.
    ///
    /// Blocks are placed greedily, deepest legal level first: a block mapped to path `p` may
    /// go at level `deepest_shared_level(path_id, p)` or above. Blocks that find no free slot,
    /// and blocks without a position map entry, stay in the stash.
    pub fn write_to_path(
        &mut self,
        path_id: PathId,
        levels: usize,
        capacity: BucketSize,
        position_map: &PositionMap,
    ) -> Path {
        let mut placements: Vec<(usize, Block)> = Vec::with_capacity(self.blocks.len());
        let mut retained = Vec::new();

        for block in self.drain() {
            let level = position_map
                .get(block.key)
                .map(|entry| deepest_shared_level(path_id, entry.path_id));
            match level {
                Some(level) if level < levels => placements.push((level, block)),
                _ => retained.push(block),
            }
        }
        placements.sort_by_key(|(level, _)| *level);

        let mut buckets = Path::new(levels, capacity).into_buckets();
        for (lowest_level, block) in placements {
            let mut pending = Some(block);
            for bucket in buckets.iter_mut().skip(lowest_level) {
                if let Some(block) = pending.take() {
                    if let Err(rejected) = bucket.try_insert(block) {
                        pending = Some(rejected);
                    }
                }
            }
            retained.extend(pending);
        }

        self.blocks = retained;
        Path::from_buckets(buckets)
    }
}
