// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This source code is dual-licensed under either the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree or the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree. You may select, at your option, one of the above-listed licenses.

//! The client's view of which path currently holds each address, and the strategies
//! that keep it consistent with the replicas.

use crate::{
    client::Operation,
    crypto::Cipher,
    messages::{PositionMapReply, Request, Response},
    transport::ServiceProxy,
    Address, OramError, OramId, PathId, SequenceNumber, Version,
};
use std::collections::BTreeMap;

pub mod full;
pub mod triple;

/// Path identifier carried by update records of dummy accesses. Never a real path.
pub const DUMMY_PATH: PathId = PathId::MAX;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
/// The routing state of one address.
pub struct PositionMapEntry {
    /// The path the block is currently assigned to.
    pub path_id: PathId,
    /// The tree version of the last write to the block. Never decreases.
    pub version: Version,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
/// The update record a single access emits under the Triple strategy.
pub struct PositionMapDelta {
    /// The accessed address.
    pub address: Address,
    /// The new routing state, or a `DUMMY_PATH` entry for a dummy access.
    pub entry: PositionMapEntry,
}

impl PositionMapDelta {
    /// Whether this record was emitted by a dummy access.
    pub fn is_dummy(&self) -> bool {
        self.entry.path_id == DUMMY_PATH
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
/// A map from addresses to their routing state. Addresses never written have no entry.
pub struct PositionMap {
    entries: BTreeMap<Address, PositionMapEntry>,
}

impl PositionMap {
    /// Returns an empty position map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the entry for `address`.
    pub fn get(&self, address: Address) -> Option<&PositionMapEntry> {
        self.entries.get(&address)
    }

    /// Sets the entry for `address` unconditionally.
    pub fn set(&mut self, address: Address, entry: PositionMapEntry) {
        self.entries.insert(address, entry);
    }

    /// The number of addresses with an entry.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no address has an entry.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates over entries in address order.
    pub fn iter(&self) -> impl Iterator<Item = (Address, &PositionMapEntry)> {
        self.entries.iter().map(|(address, entry)| (*address, entry))
    }

    /// Adopts every entry of `snapshot` whose version is strictly greater than the local one.
    /// Ties keep the local entry. Returns the number of adopted entries.
    pub fn merge_snapshot(&mut self, snapshot: &PositionMap) -> usize {
        let mut adopted = 0;
        for (address, entry) in snapshot.iter() {
            let newer = match self.entries.get(&address) {
                Some(local) => entry.version > local.version,
                None => true,
            };
            if newer {
                self.entries.insert(address, *entry);
                adopted += 1;
            }
        }
        adopted
    }

    /// Adopts `delta` if its version is at least the local one, so that
    /// re-delivering a record is harmless. Dummy records are never adopted.
    /// Returns whether the entry was adopted.
    pub fn apply_delta(&mut self, delta: &PositionMapDelta) -> bool {
        if delta.is_dummy() {
            return false;
        }
        let adopt = match self.entries.get(&delta.address) {
            Some(local) => delta.entry.version >= local.version,
            None => true,
        };
        if adopt {
            self.entries.insert(delta.address, delta.entry);
        }
        adopt
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
/// Selects how an ORAM instance stores and distributes its position map.
pub enum PositionMapKind {
    /// Every eviction carries the complete position map.
    Full,
    /// Every eviction carries one update record, appended to a replicated log.
    Triple,
}

impl PositionMapKind {
    pub(crate) fn to_u8(self) -> u8 {
        match self {
            PositionMapKind::Full => 0,
            PositionMapKind::Triple => 1,
        }
    }

    pub(crate) fn from_u8(value: u8) -> Result<Self, OramError> {
        match value {
            0 => Ok(PositionMapKind::Full),
            1 => Ok(PositionMapKind::Triple),
            _ => Err(OramError::MalformedEncoding("unknown position map kind")),
        }
    }
}

/// A client-side strategy for keeping the position map consistent with the replicas.
pub trait PositionMapStrategy: Clone + Default + Send {
    /// The decrypted replies collected by one refresh round.
    type Snapshots;

    /// How the server must store this strategy's position map.
    const KIND: PositionMapKind;

    /// The client's merged position map.
    fn position_map(&self) -> &PositionMap;

    /// Fetches and decrypts the position map state reported by every replica.
    fn get_position_maps<P: ServiceProxy + ?Sized, C: Cipher + ?Sized>(
        &self,
        oram_id: OramId,
        proxy: &P,
        cipher: &C,
    ) -> Result<Self::Snapshots, OramError>;

    /// Folds fetched replies into the merged map. Returns the highest tree version reported.
    fn merge_position_maps(&mut self, snapshots: Self::Snapshots) -> Version;

    /// Applies the update rule for one access and returns the plaintext position map payload
    /// to send with the eviction.
    ///
    /// `new_path_id` is a fresh random path and `new_version` the version the eviction will commit.
    fn update_position_map(
        &mut self,
        operation: Operation,
        address: Address,
        is_real_access: bool,
        new_path_id: PathId,
        new_version: Version,
    ) -> Result<Vec<u8>, OramError>;
}

/// Asks every replica for the position map state after `since`.
///
/// Replicas that refuse are skipped. Fails only if none answered with a position map.
pub(crate) fn fetch_position_map_replies<P: ServiceProxy + ?Sized>(
    oram_id: OramId,
    since: SequenceNumber,
    proxy: &P,
) -> Result<Vec<PositionMapReply>, OramError> {
    let responses = Request::GetPositionMap { oram_id, since }.send_unordered_per_replica(proxy)?;

    let mut replies = Vec::with_capacity(responses.len());
    let mut last_error = OramError::UnexpectedReply;
    for response in responses {
        match response {
            Response::PositionMap(reply) => replies.push(reply),
            Response::Failure(reason) => {
                log::warn!("A replica refused a position map request: {:?}", reason);
                last_error = reason.into();
            }
            _ => last_error = OramError::UnexpectedReply,
        }
    }

    if replies.is_empty() {
        return Err(last_error);
    }
    Ok(replies)
}
