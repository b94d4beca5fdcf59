// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This source code is dual-licensed under either the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree or the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree. You may select, at your option, one of the above-listed licenses.

//! The server-side eviction tree: a versioned state machine advanced only by evictions.

use crate::{
    bucket::{Bucket, Path, MAXIMUM_BUCKET_CAPACITY},
    database::{CountAccessesDatabase, Database},
    messages::{PathAndStash, PositionMapReply},
    position_map::PositionMapKind,
    utils::{check_height, check_path_id, node_count, path_nodes, TreeHeight, TreeIndex},
    BlockSize, BucketSize, OramError, PathId, SequenceNumber, Version,
};
use std::collections::BTreeMap;

/// The parameter "Z" from the Path ORAM literature that sets the number of blocks per bucket;
/// typical values are 3 or 4.
/// Here we adopt the more conservative setting of 4.
pub const DEFAULT_BUCKET_CAPACITY: BucketSize = 4;

/// The default tree height, giving `2^10` paths.
pub const DEFAULT_TREE_HEIGHT: TreeHeight = 10;

/// The default block value size in bytes.
pub const DEFAULT_BLOCK_SIZE: BlockSize = 64;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
/// The shape of one ORAM instance.
pub struct OramParameters {
    /// The height `H` of the tree. Paths hold `H + 1` buckets.
    pub height: TreeHeight,
    /// The number of blocks per bucket, `C`.
    pub bucket_capacity: BucketSize,
    /// The size of every block value in bytes.
    pub block_size: BlockSize,
}

impl Default for OramParameters {
    fn default() -> Self {
        Self {
            height: DEFAULT_TREE_HEIGHT,
            bucket_capacity: DEFAULT_BUCKET_CAPACITY,
            block_size: DEFAULT_BLOCK_SIZE,
        }
    }
}

impl OramParameters {
    /// Returns validated parameters.
    ///
    /// # Errors
    ///
    /// Returns an `InvalidConfigurationError` if `height` exceeds
    /// [`MAXIMUM_TREE_HEIGHT`](crate::utils::MAXIMUM_TREE_HEIGHT),
    /// if `bucket_capacity` is 0 or exceeds [`MAXIMUM_BUCKET_CAPACITY`],
    /// or if `block_size` is 0.
    pub fn new(
        height: TreeHeight,
        bucket_capacity: BucketSize,
        block_size: BlockSize,
    ) -> Result<Self, OramError> {
        let parameters = Self {
            height,
            bucket_capacity,
            block_size,
        };
        parameters.validate()?;
        Ok(parameters)
    }

    /// Checks the parameters for consistency.
    pub fn validate(&self) -> Result<(), OramError> {
        check_height(self.height)?;
        if (self.bucket_capacity == 0)
            | (self.bucket_capacity > MAXIMUM_BUCKET_CAPACITY)
            | (self.block_size == 0)
        {
            return Err(OramError::InvalidConfigurationError);
        }
        Ok(())
    }

    /// The number of buckets on a path, `height + 1`.
    pub fn path_levels(&self) -> usize {
        self.height as usize + 1
    }
}

/// The authoritative tree of one ORAM instance.
///
/// The only state transition is [`OramTree::evict`], which commits iff it proposes
/// exactly the current version plus one. Operations are expected to arrive one at a time,
/// already totally ordered.
#[derive(Debug)]
pub struct OramTree {
    parameters: OramParameters,
    kind: PositionMapKind,
    version: Version,
    /// The latest (encrypted) position map. For a Triple tree, the initial map.
    position_map: Vec<u8>,
    /// Encrypted update records, keyed by the version of the eviction that carried them.
    position_map_log: BTreeMap<SequenceNumber, Vec<u8>>,
    stash: Vec<u8>,
    physical_memory: CountAccessesDatabase,
}

impl OramTree {
    /// Creates a tree at version 0 with every node empty, holding the given opaque blobs.
    pub fn create(
        parameters: OramParameters,
        kind: PositionMapKind,
        initial_position_map: Vec<u8>,
        initial_stash: Vec<u8>,
    ) -> Result<Self, OramError> {
        parameters.validate()?;
        log::info!(
            "OramTree::create(H = {}, C = {}, B = {}, {:?})",
            parameters.height,
            parameters.bucket_capacity,
            parameters.block_size,
            kind
        );

        Ok(Self {
            parameters,
            kind,
            version: 0,
            position_map: initial_position_map,
            position_map_log: BTreeMap::new(),
            stash: initial_stash,
            physical_memory: CountAccessesDatabase::new(node_count(parameters.height)),
        })
    }

    /// The parameters the tree was created with.
    pub fn parameters(&self) -> OramParameters {
        self.parameters
    }

    /// How the tree stores its position map.
    pub fn kind(&self) -> PositionMapKind {
        self.kind
    }

    /// The number of committed evictions.
    pub fn version(&self) -> Version {
        self.version
    }

    /// Returns the stash and the buckets of path `path_id`, leaf to root, if `client_version`
    /// is the current version. Otherwise returns `corresponds = false` and no data.
    pub fn get_path_and_stash(
        &mut self,
        client_version: Version,
        path_id: PathId,
    ) -> Result<PathAndStash, OramError> {
        if client_version != self.version {
            log::debug!(
                "Stale read: client version {}, tree version {}",
                client_version,
                self.version
            );
            return Ok(PathAndStash::stale());
        }

        let mut buckets = Vec::with_capacity(self.parameters.path_levels());
        for node in path_nodes(path_id, self.parameters.height)? {
            let bucket = self
                .physical_memory
                .read_db(node)?
                .unwrap_or_else(|| Bucket::new(self.parameters.bucket_capacity));
            buckets.push(bucket);
        }

        let stash = if self.stash.is_empty() {
            None
        } else {
            Some(self.stash.clone())
        };

        Ok(PathAndStash {
            corresponds: true,
            stash,
            path: Some(Path::from_buckets(buckets)),
        })
    }

    /// Commits an eviction of path `path_id` iff `new_version` is the current version plus one.
    ///
    /// On success, the version becomes `new_version`, the stash blob is replaced, the position map
    /// payload is stored (replacing the map of a Full tree, or appended to the log of a Triple tree
    /// at sequence number `new_version`), and every node of the path is overwritten with the
    /// matching bucket of `new_path` (leaf to root).
    ///
    /// # Errors
    ///
    /// Returns `VersionMismatch` for any other version, and an error if the path or its buckets
    /// do not fit the tree. In both cases nothing is modified.
    pub fn evict(
        &mut self,
        new_version: Version,
        new_position_map: Vec<u8>,
        new_stash: Vec<u8>,
        path_id: PathId,
        new_path: Path,
    ) -> Result<(), OramError> {
        if Some(new_version) != self.version.checked_add(1) {
            log::warn!(
                "Rejected eviction: proposed version {}, tree version {}",
                new_version,
                self.version
            );
            return Err(OramError::VersionMismatch {
                current: self.version,
                proposed: new_version,
            });
        }

        let nodes = path_nodes(path_id, self.parameters.height)?;
        let buckets = self.check_path(new_path)?;

        for (node, bucket) in nodes.into_iter().zip(buckets) {
            self.physical_memory.write_db(node, bucket)?;
        }

        match self.kind {
            PositionMapKind::Full => self.position_map = new_position_map,
            PositionMapKind::Triple => {
                self.position_map_log.insert(new_version, new_position_map);
            }
        }
        self.stash = new_stash;
        self.version = new_version;
        log::debug!("Committed eviction of path {} at version {}", path_id, new_version);
        Ok(())
    }

    /// Validates a path proposed by an eviction and rebuilds its buckets with the tree's capacity.
    fn check_path(&self, path: Path) -> Result<Vec<Bucket>, OramError> {
        if path.levels() != self.parameters.path_levels() {
            return Err(OramError::InvalidLevel(path.levels()));
        }

        let mut buckets = Vec::with_capacity(path.levels());
        for mut bucket in path.into_buckets() {
            let blocks = bucket.take_blocks();
            for block in &blocks {
                block.check_size(self.parameters.block_size)?;
            }
            buckets.push(Bucket::with_blocks(self.parameters.bucket_capacity, blocks)?);
        }
        Ok(buckets)
    }

    /// Returns the position map state a client at sequence number `since` is missing.
    ///
    /// A Full tree always answers with its latest map. A Triple tree answers with the log slots
    /// `since + 1 ..= version`, a slot being `None` if its record is no longer held,
    /// plus the initial map if `since` is 0.
    pub fn get_position_map(&self, since: SequenceNumber) -> PositionMapReply {
        match self.kind {
            PositionMapKind::Full => PositionMapReply::Snapshot {
                version: self.version,
                position_map: self.position_map.clone(),
            },
            PositionMapKind::Triple => {
                let first = since.saturating_add(1);
                let entries = (first..=self.version)
                    .map(|sequence| (sequence, self.position_map_log.get(&sequence).cloned()))
                    .collect();
                PositionMapReply::Log {
                    version: self.version,
                    highest_sequence: self.version,
                    base: (since == 0).then(|| self.position_map.clone()),
                    entries,
                }
            }
        }
    }

    /// Discards the log records with sequence numbers up to and including `up_to`.
    /// Clients still behind will see those slots as absent.
    /// Returns the number of discarded records.
    pub fn compact_log(&mut self, up_to: SequenceNumber) -> usize {
        let kept = self.position_map_log.split_off(&up_to.saturating_add(1));
        let discarded = std::mem::replace(&mut self.position_map_log, kept).len();
        log::debug!("Compacted {} position map log records", discarded);
        discarded
    }

    /// Returns every written node. Intended for diagnostics and snapshot export.
    pub fn get_tree(&self) -> BTreeMap<TreeIndex, Bucket> {
        self.physical_memory.snapshot()
    }

    /// The (encrypted) stash blob.
    pub fn stash(&self) -> &[u8] {
        &self.stash
    }

    /// The node storage, with its access counters.
    pub fn physical_memory(&self) -> &CountAccessesDatabase {
        &self.physical_memory
    }
}
