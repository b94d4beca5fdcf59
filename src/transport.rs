// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This source code is dual-licensed under either the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree or the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree. You may select, at your option, one of the above-listed licenses.

//! The client's view of the replicated storage service.

use crate::{manager::OramManager, OramError};
use parking_lot::Mutex;
use std::sync::Arc;

/// A byte-oriented channel to a replica group.
///
/// Ordered invocations are delivered to every replica in one total order. Unordered
/// invocations may be answered by any replica, possibly from a lagging state.
pub trait ServiceProxy: Send + Sync {
    /// Submits `request` in total order and returns the group's reply.
    fn invoke_ordered(&self, request: &[u8]) -> Result<Vec<u8>, OramError>;

    /// Submits `request` without ordering and returns one replica's reply.
    fn invoke_unordered(&self, request: &[u8]) -> Result<Vec<u8>, OramError>;

    /// Submits `request` without ordering and returns the reply of every replica that answered.
    fn invoke_unordered_per_replica(&self, request: &[u8]) -> Result<Vec<Vec<u8>>, OramError> {
        Ok(vec![self.invoke_unordered(request)?])
    }
}

/// An in-process replica group. Every replica is a separate [`OramManager`].
///
/// Clones share the same replicas. Ordered invocations from all clones are serialized
/// so that every replica applies them in the same order.
#[derive(Clone, Debug)]
pub struct LocalServiceProxy {
    replicas: Vec<Arc<Mutex<OramManager>>>,
    order: Arc<Mutex<()>>,
}

impl LocalServiceProxy {
    /// Returns a group of `replica_count` empty replicas.
    pub fn new(replica_count: usize) -> Self {
        Self::with_replicas(
            (0..replica_count)
                .map(|_| Arc::new(Mutex::new(OramManager::new())))
                .collect(),
        )
    }

    /// Returns a group over existing replicas.
    pub fn with_replicas(replicas: Vec<Arc<Mutex<OramManager>>>) -> Self {
        Self {
            replicas,
            order: Arc::new(Mutex::new(())),
        }
    }

    /// The replica at `index`, for inspection and local maintenance.
    pub fn replica(&self, index: usize) -> Option<&Arc<Mutex<OramManager>>> {
        self.replicas.get(index)
    }

    /// The number of replicas.
    pub fn replica_count(&self) -> usize {
        self.replicas.len()
    }

    fn first(&self) -> Result<&Arc<Mutex<OramManager>>, OramError> {
        self.replicas
            .first()
            .ok_or_else(|| OramError::Transport(String::from("no replicas")))
    }
}

impl ServiceProxy for LocalServiceProxy {
    fn invoke_ordered(&self, request: &[u8]) -> Result<Vec<u8>, OramError> {
        let first = self.first()?;
        let _order = self.order.lock();
        let reply = first.lock().execute_ordered(request);
        for replica in self.replicas.iter().skip(1) {
            if replica.lock().execute_ordered(request) != reply {
                log::warn!("Replicas diverged on an ordered request");
            }
        }
        Ok(reply)
    }

    fn invoke_unordered(&self, request: &[u8]) -> Result<Vec<u8>, OramError> {
        Ok(self.first()?.lock().execute_unordered(request))
    }

    fn invoke_unordered_per_replica(&self, request: &[u8]) -> Result<Vec<Vec<u8>>, OramError> {
        if self.replicas.is_empty() {
            return Err(OramError::Transport(String::from("no replicas")));
        }
        Ok(self
            .replicas
            .iter()
            .map(|replica| replica.lock().execute_unordered(request))
            .collect())
    }
}
