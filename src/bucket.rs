// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This source code is dual-licensed under either the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree or the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree. You may select, at your option, one of the above-listed licenses.

//! Block, bucket and path structures for the eviction tree.

use crate::{Address, BlockSize, BucketSize, OramError};
use subtle::{ConditionallySelectable, ConstantTimeEq};

#[derive(Clone, PartialEq, Eq)]
/// One logical data item: an address together with an opaque value of the instance's block size.
pub struct Block {
    /// The logical address of the block.
    pub key: Address,
    /// The value stored at `key`.
    pub value: Vec<u8>,
}

impl Block {
    /// Creates a block holding `value` at address `key`.
    pub fn new(key: Address, value: Vec<u8>) -> Self {
        Self { key, value }
    }

    /// Returns an `InvalidBlockSize` error unless the value has exactly `block_size` bytes.
    pub fn check_size(&self, block_size: BlockSize) -> Result<(), OramError> {
        if self.value.len() != block_size {
            return Err(OramError::InvalidBlockSize {
                expected: block_size,
                actual: self.value.len(),
            });
        }
        Ok(())
    }
}

impl std::fmt::Debug for Block {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Block")
            .field("key", &self.key)
            .field("value_len", &self.value.len())
            .finish()
    }
}

/// Scans `blocks` for the block with address `key` and returns its index.
///
/// Every block is compared, whether or not the key has already been found.
pub(crate) fn ct_position(blocks: &[Block], key: Address) -> Option<usize> {
    let mut found = subtle::Choice::from(0);
    let mut index: u64 = 0;
    for (i, block) in blocks.iter().enumerate() {
        let matches = block.key.ct_eq(&key) & !found;
        index.conditional_assign(&(i as u64), matches);
        found |= matches;
    }
    if bool::from(found) {
        Some(index as usize)
    } else {
        None
    }
}

/// The largest number of blocks a bucket may hold.
pub const MAXIMUM_BUCKET_CAPACITY: BucketSize = 255;

#[derive(Clone, PartialEq, Eq)]
/// The storage of one tree node: at most `capacity` blocks.
pub struct Bucket {
    capacity: BucketSize,
    blocks: Vec<Block>,
}

impl Bucket {
    /// Creates an empty bucket holding at most `capacity` blocks.
    ///
    /// No storage is reserved up front; callers bound `capacity` by [`MAXIMUM_BUCKET_CAPACITY`].
    pub fn new(capacity: BucketSize) -> Self {
        Self {
            capacity,
            blocks: Vec::new(),
        }
    }

    /// Creates a bucket holding `blocks`, failing if there are more than `capacity` of them.
    pub fn with_blocks(capacity: BucketSize, blocks: Vec<Block>) -> Result<Self, OramError> {
        let mut bucket = Self::new(capacity);
        bucket.write(blocks)?;
        Ok(bucket)
    }

    /// The maximum number of blocks this bucket holds.
    pub fn capacity(&self) -> BucketSize {
        self.capacity
    }

    /// The number of blocks currently held.
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    /// Whether the bucket holds no blocks.
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Whether the bucket holds `capacity` blocks.
    pub fn is_full(&self) -> bool {
        self.blocks.len() >= self.capacity
    }

    /// Replaces the contents of the bucket with `blocks`.
    ///
    /// If `blocks` holds more than `capacity` blocks, returns a `BucketOverflow` error
    /// and leaves the previous contents untouched.
    pub fn write(&mut self, blocks: Vec<Block>) -> Result<(), OramError> {
        if blocks.len() > self.capacity {
            return Err(OramError::BucketOverflow {
                capacity: self.capacity,
                attempted: blocks.len(),
            });
        }
        self.blocks = blocks;
        Ok(())
    }

    /// Returns the blocks currently held.
    pub fn read(&self) -> &[Block] {
        &self.blocks
    }

    /// Adds `block` if there is room, otherwise hands it back.
    pub fn try_insert(&mut self, block: Block) -> Result<(), Block> {
        if self.is_full() {
            return Err(block);
        }
        self.blocks.push(block);
        Ok(())
    }

    /// Removes and returns every block held.
    pub fn take_blocks(&mut self) -> Vec<Block> {
        std::mem::take(&mut self.blocks)
    }
}

impl std::fmt::Debug for Bucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.blocks.is_empty() {
            write!(f, "Bucket::Empty")
        } else {
            f.debug_struct("Bucket")
                .field("capacity", &self.capacity)
                .field("blocks", &self.blocks)
                .finish()
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
/// The buckets along one root-to-leaf path.
/// Level 0 is the leaf bucket, the last level is the root bucket.
pub struct Path {
    buckets: Vec<Bucket>,
}

impl Path {
    /// Creates a path of `levels` empty buckets of capacity `capacity`.
    pub fn new(levels: usize, capacity: BucketSize) -> Self {
        Self {
            buckets: vec![Bucket::new(capacity); levels],
        }
    }

    /// Wraps buckets ordered from leaf to root.
    pub fn from_buckets(buckets: Vec<Bucket>) -> Self {
        Self { buckets }
    }

    /// The number of buckets on the path, `height + 1`.
    pub fn levels(&self) -> usize {
        self.buckets.len()
    }

    /// Returns the bucket at `level`.
    pub fn get(&self, level: usize) -> Result<&Bucket, OramError> {
        self.buckets.get(level).ok_or(OramError::InvalidLevel(level))
    }

    /// Replaces the bucket at `level`.
    pub fn put(&mut self, level: usize, bucket: Bucket) -> Result<(), OramError> {
        let slot = self
            .buckets
            .get_mut(level)
            .ok_or(OramError::InvalidLevel(level))?;
        *slot = bucket;
        Ok(())
    }

    /// The buckets, ordered from leaf to root.
    pub fn buckets(&self) -> &[Bucket] {
        &self.buckets
    }

    /// Consumes the path, returning its buckets ordered from leaf to root.
    pub fn into_buckets(self) -> Vec<Bucket> {
        self.buckets
    }

    /// Returns every block on the path as one sequence, leaf bucket first.
    pub fn flatten_blocks(&self) -> Vec<Block> {
        self.buckets
            .iter()
            .flat_map(|bucket| bucket.read().iter().cloned())
            .collect()
    }

    /// Removes and returns every block on the path, leaving the buckets empty.
    pub fn take_blocks(&mut self) -> Vec<Block> {
        self.buckets
            .iter_mut()
            .flat_map(|bucket| bucket.take_blocks())
            .collect()
    }
}
