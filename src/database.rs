// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This source code is dual-licensed under either the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree or the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree. You may select, at your option, one of the above-listed licenses.

//! Node storage for the server-side eviction tree.

use crate::{bucket::Bucket, utils::TreeIndex, OramError};
use std::collections::{BTreeMap, HashMap};

/// Storage for the buckets of a tree, keyed by node index.
/// A node holds no bucket until first written.
pub trait Database
where
    Self: Sized,
{
    /// Returns a new `Database` for `number_of_nodes` nodes, none of them written.
    fn new(number_of_nodes: u64) -> Self;
    /// Returns the number of nodes addressable in `self`.
    fn capacity(&self) -> u64;
    /// Reads the bucket stored at `index`, or `None` if the node was never written.
    fn read_db(&mut self, index: TreeIndex) -> Result<Option<Bucket>, OramError>;
    /// Writes the bucket stored at `index`, returning the previous one.
    fn write_db(&mut self, index: TreeIndex, bucket: Bucket) -> Result<Option<Bucket>, OramError>;
    /// Returns every written node, in index order.
    fn snapshot(&self) -> BTreeMap<TreeIndex, Bucket>;
}

/// A simple Database that stores written nodes in a `HashMap`.
#[derive(Debug)]
pub struct SimpleDatabase {
    number_of_nodes: u64,
    nodes: HashMap<TreeIndex, Bucket>,
}

impl SimpleDatabase {
    fn check_index(&self, index: TreeIndex) -> Result<(), OramError> {
        if index >= self.number_of_nodes {
            return Err(OramError::NodeOutOfBounds(index));
        }
        Ok(())
    }
}

impl Database for SimpleDatabase {
    fn new(number_of_nodes: u64) -> Self {
        Self {
            number_of_nodes,
            nodes: HashMap::new(),
        }
    }

    fn capacity(&self) -> u64 {
        self.number_of_nodes
    }

    fn read_db(&mut self, index: TreeIndex) -> Result<Option<Bucket>, OramError> {
        self.check_index(index)?;
        Ok(self.nodes.get(&index).cloned())
    }

    fn write_db(&mut self, index: TreeIndex, bucket: Bucket) -> Result<Option<Bucket>, OramError> {
        self.check_index(index)?;
        Ok(self.nodes.insert(index, bucket))
    }

    fn snapshot(&self) -> BTreeMap<TreeIndex, Bucket> {
        self.nodes
            .iter()
            .map(|(index, bucket)| (*index, bucket.clone()))
            .collect()
    }
}

/// A Database that counts reads and writes.
#[derive(Debug)]
pub struct CountAccessesDatabase {
    data: SimpleDatabase,
    read_count: u64,
    write_count: u64,
}

impl CountAccessesDatabase {
    /// Returns the total number of reads to the database.
    pub fn get_read_count(&self) -> u64 {
        self.read_count
    }

    /// Returns the total number of writes to the database.
    pub fn get_write_count(&self) -> u64 {
        self.write_count
    }
}

impl Database for CountAccessesDatabase {
    fn new(number_of_nodes: u64) -> Self {
        Self {
            data: SimpleDatabase::new(number_of_nodes),
            read_count: 0,
            write_count: 0,
        }
    }

    fn capacity(&self) -> u64 {
        self.data.capacity()
    }

    fn read_db(&mut self, index: TreeIndex) -> Result<Option<Bucket>, OramError> {
        log::debug!("Physical read -- {}", index);

        self.read_count += 1;
        self.data.read_db(index)
    }

    fn write_db(&mut self, index: TreeIndex, bucket: Bucket) -> Result<Option<Bucket>, OramError> {
        log::debug!("Physical write -- {}", index);

        self.write_count += 1;
        self.data.write_db(index, bucket)
    }

    fn snapshot(&self) -> BTreeMap<TreeIndex, Bucket> {
        self.data.snapshot()
    }
}
