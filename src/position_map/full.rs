// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This source code is dual-licensed under either the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree or the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree. You may select, at your option, one of the above-listed licenses.

//! Reconciliation by merging complete position map snapshots.

use super::{
    fetch_position_map_replies, PositionMap, PositionMapEntry, PositionMapKind,
    PositionMapStrategy,
};
use crate::{
    client::Operation,
    codec::{Decode, Encode},
    crypto::Cipher,
    messages::PositionMapReply,
    transport::ServiceProxy,
    Address, OramError, OramId, PathId, Version,
};

/// Every eviction uploads the whole position map. A refresh fetches one snapshot per replica
/// and rebuilds the merged map from them, keeping per address the entry with the highest version.
///
/// A real read moves the block to a new path without changing its version. The local map is
/// therefore discarded on refresh rather than merged into, and among snapshots that tie on an
/// entry's version the one with the highest tree version wins.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FullPositionMap {
    merged_position_map: PositionMap,
}

impl PositionMapStrategy for FullPositionMap {
    type Snapshots = Vec<(Version, PositionMap)>;

    const KIND: PositionMapKind = PositionMapKind::Full;

    fn position_map(&self) -> &PositionMap {
        &self.merged_position_map
    }

    fn get_position_maps<P: ServiceProxy + ?Sized, C: Cipher + ?Sized>(
        &self,
        oram_id: OramId,
        proxy: &P,
        cipher: &C,
    ) -> Result<Self::Snapshots, OramError> {
        let mut snapshots = Vec::new();
        for reply in fetch_position_map_replies(oram_id, 0, proxy)? {
            match reply {
                PositionMapReply::Snapshot {
                    version,
                    position_map,
                } => {
                    let position_map = PositionMap::from_bytes(&cipher.decrypt(&position_map)?)?;
                    snapshots.push((version, position_map));
                }
                PositionMapReply::Log { .. } => return Err(OramError::UnexpectedReply),
            }
        }
        Ok(snapshots)
    }

    fn merge_position_maps(&mut self, mut snapshots: Self::Snapshots) -> Version {
        snapshots.sort_by(|(a, _), (b, _)| b.cmp(a));
        let Some((highest_version, _)) = snapshots.first() else {
            return 0;
        };
        let highest_version = *highest_version;

        let mut merged = PositionMap::new();
        for (version, snapshot) in &snapshots {
            let adopted = merged.merge_snapshot(snapshot);
            log::debug!("Merged snapshot at version {}: {} entries adopted", version, adopted);
        }
        self.merged_position_map = merged;
        highest_version
    }

    fn update_position_map(
        &mut self,
        operation: Operation,
        address: Address,
        is_real_access: bool,
        new_path_id: PathId,
        new_version: Version,
    ) -> Result<Vec<u8>, OramError> {
        match (operation, is_real_access) {
            (Operation::Write, _) => self.merged_position_map.set(
                address,
                PositionMapEntry {
                    path_id: new_path_id,
                    version: new_version,
                },
            ),
            (Operation::Read, true) => {
                if let Some(entry) = self.merged_position_map.get(address).copied() {
                    self.merged_position_map.set(
                        address,
                        PositionMapEntry {
                            path_id: new_path_id,
                            ..entry
                        },
                    );
                }
            }
            (Operation::Read, false) => {}
        }
        self.merged_position_map.to_bytes()
    }
}
