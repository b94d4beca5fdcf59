// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This source code is dual-licensed under either the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree or the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree. You may select, at your option, one of the above-listed licenses.

//! Reconciliation by folding a replicated log of per-access update records.

use super::{
    fetch_position_map_replies, PositionMap, PositionMapDelta, PositionMapEntry,
    PositionMapKind, PositionMapStrategy, DUMMY_PATH,
};
use crate::{
    client::Operation,
    codec::{Decode, Encode},
    crypto::Cipher,
    messages::PositionMapReply,
    transport::ServiceProxy,
    Address, OramError, OramId, PathId, SequenceNumber, Version,
};
use std::collections::BTreeMap;

/// One replica's decrypted log range.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogRange {
    /// The replica's tree version.
    pub version: Version,
    /// The highest sequence number the replica holds.
    pub highest_sequence: SequenceNumber,
    /// The initial position map, present when the range starts at the beginning of the log.
    pub base: Option<PositionMap>,
    /// Slots after the requested watermark. `None` marks a record the replica no longer holds.
    pub entries: Vec<(SequenceNumber, Option<PositionMapDelta>)>,
}

/// Every eviction appends one update record, `(address, path, version)`, to a replicated log
/// at the sequence number of the eviction's version. A refresh folds the records after the
/// local watermark into the merged map.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TriplePositionMap {
    merged_position_map: PositionMap,
    latest_sequence_number: SequenceNumber,
}

impl TriplePositionMap {
    /// The last sequence number incorporated into the merged map.
    pub fn latest_sequence_number(&self) -> SequenceNumber {
        self.latest_sequence_number
    }

    /// Folds the united slots `start + 1 ..= highest` into the merged map and returns the
    /// new watermark.
    ///
    /// Contiguous present slots advance the watermark. Absent slots are skipped while nothing
    /// has been merged yet in this round. The first absent slot after a merge stops the
    /// watermark, so later rounds refetch from there.
    fn fold(
        &mut self,
        start: SequenceNumber,
        highest: SequenceNumber,
        slots: &BTreeMap<SequenceNumber, PositionMapDelta>,
    ) -> SequenceNumber {
        let mut watermark = start;
        let mut merged_any = false;
        let mut contiguous = true;

        for sequence in start.saturating_add(1)..=highest {
            match slots.get(&sequence) {
                Some(delta) => {
                    self.merged_position_map.apply_delta(delta);
                    merged_any = true;
                    if contiguous {
                        watermark = sequence;
                    }
                }
                None if !merged_any => watermark = sequence,
                None => contiguous = false,
            }
        }
        watermark
    }

    fn decode_record<C: Cipher + ?Sized>(
        cipher: &C,
        record: &[u8],
    ) -> Result<PositionMapDelta, OramError> {
        PositionMapDelta::from_bytes(&cipher.decrypt(record)?)
    }
}

impl PositionMapStrategy for TriplePositionMap {
    type Snapshots = Vec<LogRange>;

    const KIND: PositionMapKind = PositionMapKind::Triple;

    fn position_map(&self) -> &PositionMap {
        &self.merged_position_map
    }

    fn get_position_maps<P: ServiceProxy + ?Sized, C: Cipher + ?Sized>(
        &self,
        oram_id: OramId,
        proxy: &P,
        cipher: &C,
    ) -> Result<Self::Snapshots, OramError> {
        let since = self.latest_sequence_number;
        let mut ranges = Vec::new();
        for reply in fetch_position_map_replies(oram_id, since, proxy)? {
            match reply {
                PositionMapReply::Log {
                    version,
                    highest_sequence,
                    base,
                    entries,
                } => {
                    let base = match base {
                        Some(base) => Some(PositionMap::from_bytes(&cipher.decrypt(&base)?)?),
                        None => None,
                    };
                    let entries = entries
                        .into_iter()
                        .map(|(sequence, record)| {
                            let delta = match record {
                                Some(record) => Some(Self::decode_record(cipher, &record)?),
                                None => None,
                            };
                            Ok((sequence, delta))
                        })
                        .collect::<Result<Vec<_>, OramError>>()?;
                    ranges.push(LogRange {
                        version,
                        highest_sequence,
                        base,
                        entries,
                    });
                }
                PositionMapReply::Snapshot { .. } => return Err(OramError::UnexpectedReply),
            }
        }
        Ok(ranges)
    }

    fn merge_position_maps(&mut self, snapshots: Self::Snapshots) -> Version {
        let start = self.latest_sequence_number;
        let mut highest_version = 0;
        let mut highest = start;
        let mut slots = BTreeMap::new();

        for range in snapshots {
            highest_version = highest_version.max(range.version);
            highest = highest.max(range.highest_sequence);
            if start == 0 {
                if let Some(base) = &range.base {
                    self.merged_position_map.merge_snapshot(base);
                }
            }
            for (sequence, delta) in range.entries {
                if let Some(delta) = delta.filter(|_| sequence > start) {
                    slots.entry(sequence).or_insert(delta);
                }
            }
        }

        self.latest_sequence_number = self.fold(start, highest, &slots);
        log::debug!(
            "Folded {} update records, watermark {} -> {}",
            slots.len(),
            start,
            self.latest_sequence_number
        );
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
        let current = self.merged_position_map.get(address).copied();
        let entry = match (operation, is_real_access, current) {
            (Operation::Write, _, _) => PositionMapEntry {
                path_id: new_path_id,
                version: new_version,
            },
            (Operation::Read, true, Some(current)) => PositionMapEntry {
                path_id: new_path_id,
                version: current.version,
            },
            _ => PositionMapEntry {
                path_id: DUMMY_PATH,
                version: new_version,
            },
        };

        let delta = PositionMapDelta { address, entry };
        self.merged_position_map.apply_delta(&delta);
        delta.to_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{
        create_correctness_test, create_correctness_tests_for_strategy,
        create_correctness_tests_for_workload_and_strategy, test_correctness_linear_workload,
        test_correctness_random_workload,
    };

    create_correctness_tests_for_strategy!(TriplePositionMap);

    fn delta(address: Address, path_id: PathId, version: Version) -> PositionMapDelta {
        PositionMapDelta {
            address,
            entry: PositionMapEntry { path_id, version },
        }
    }

    fn range(
        highest_sequence: SequenceNumber,
        entries: Vec<(SequenceNumber, Option<PositionMapDelta>)>,
    ) -> LogRange {
        LogRange {
            version: highest_sequence,
            highest_sequence,
            base: None,
            entries,
        }
    }

    #[test]
    fn contiguous_records_advance_the_watermark() {
        let mut strategy = TriplePositionMap::default();
        let version = strategy.merge_position_maps(vec![range(
            3,
            vec![
                (1, Some(delta(1, 4, 1))),
                (2, Some(delta(2, 5, 2))),
                (3, Some(delta(1, 6, 3))),
            ],
        )]);
        assert_eq!(version, 3);
        assert_eq!(strategy.latest_sequence_number(), 3);
        assert_eq!(
            strategy.position_map().get(1),
            Some(&PositionMapEntry {
                path_id: 6,
                version: 3
            })
        );
    }

    #[test]
    fn refolding_is_idempotent() {
        let records = vec![(1, Some(delta(1, 4, 1))), (2, Some(delta(1, 2, 1)))];
        let mut strategy = TriplePositionMap::default();
        strategy.merge_position_maps(vec![range(2, records.clone())]);
        let once = strategy.clone();

        // Re-delivered records are at or below the watermark and ignored; the
        // merged map would absorb them anyway since adoption uses `>=`.
        strategy.merge_position_maps(vec![range(2, records.clone())]);
        assert_eq!(strategy, once);
        for (_, record) in &records {
            strategy.merged_position_map.apply_delta(&record.unwrap());
        }
        assert_eq!(strategy, once);
    }

    #[test]
    fn gap_after_a_merge_stops_the_watermark() {
        let mut strategy = TriplePositionMap::default();
        strategy.merge_position_maps(vec![range(
            4,
            vec![
                (1, Some(delta(1, 1, 1))),
                (2, None),
                (3, Some(delta(2, 3, 3))),
                (4, Some(delta(3, 3, 4))),
            ],
        )]);
        assert_eq!(strategy.latest_sequence_number(), 1);
        // Records past the gap are still merged.
        assert!(strategy.position_map().get(3).is_some());
    }

    #[test]
    fn leading_gaps_are_skipped_when_nothing_follows() {
        let mut strategy = TriplePositionMap::default();
        strategy.merge_position_maps(vec![range(3, vec![(1, None), (2, None), (3, None)])]);
        assert_eq!(strategy.latest_sequence_number(), 3);
    }

    #[test]
    fn leading_gaps_then_contiguous_records_advance_the_watermark() {
        let mut strategy = TriplePositionMap::default();
        strategy.merge_position_maps(vec![range(
            4,
            vec![
                (1, None),
                (2, Some(delta(1, 1, 2))),
                (3, None),
                (4, Some(delta(2, 2, 4))),
            ],
        )]);
        assert_eq!(strategy.latest_sequence_number(), 2);
        assert_eq!(strategy.position_map().len(), 2);

        // Another replica delivers the pending slot in the next round.
        strategy.merge_position_maps(vec![range(
            4,
            vec![(3, Some(delta(3, 3, 3))), (4, Some(delta(2, 2, 4)))],
        )]);
        assert_eq!(strategy.latest_sequence_number(), 4);
        assert_eq!(
            strategy.position_map().get(3),
            Some(&PositionMapEntry {
                path_id: 3,
                version: 3
            })
        );
    }

    #[test]
    fn replicas_fill_each_others_gaps() {
        let mut strategy = TriplePositionMap::default();
        strategy.merge_position_maps(vec![
            range(3, vec![(1, Some(delta(1, 1, 1))), (2, None), (3, Some(delta(3, 3, 3)))]),
            range(2, vec![(1, None), (2, Some(delta(2, 2, 2)))]),
        ]);
        assert_eq!(strategy.latest_sequence_number(), 3);
        assert_eq!(strategy.position_map().len(), 3);
    }

    #[test]
    fn watermark_never_passes_highest() {
        let mut strategy = TriplePositionMap::default();
        strategy.merge_position_maps(vec![range(2, vec![(1, None), (2, None)])]);
        assert_eq!(strategy.latest_sequence_number(), 2);
        strategy.merge_position_maps(vec![range(2, vec![])]);
        assert_eq!(strategy.latest_sequence_number(), 2);
    }

    #[test]
    fn base_snapshot_is_merged_from_the_beginning_only() {
        let mut base = PositionMap::new();
        base.set(
            5,
            PositionMapEntry {
                path_id: 1,
                version: 0,
            },
        );
        let mut strategy = TriplePositionMap::default();
        strategy.merge_position_maps(vec![LogRange {
            version: 1,
            highest_sequence: 1,
            base: Some(base.clone()),
            entries: vec![(1, Some(delta(6, 2, 1)))],
        }]);
        assert_eq!(strategy.position_map().len(), 2);

        base.set(
            7,
            PositionMapEntry {
                path_id: 1,
                version: 0,
            },
        );
        strategy.merge_position_maps(vec![LogRange {
            version: 1,
            highest_sequence: 1,
            base: Some(base),
            entries: vec![],
        }]);
        assert!(strategy.position_map().get(7).is_none());
    }

    #[test]
    fn update_rule_emits_one_record_per_access() {
        let mut strategy = TriplePositionMap::default();

        let write = strategy
            .update_position_map(Operation::Write, 4, true, 2, 1)
            .unwrap();
        let write = PositionMapDelta::from_bytes(&write).unwrap();
        assert_eq!(write, delta(4, 2, 1));

        let read = strategy
            .update_position_map(Operation::Read, 4, true, 6, 2)
            .unwrap();
        let read = PositionMapDelta::from_bytes(&read).unwrap();
        assert_eq!(read, delta(4, 6, 1));
        assert_eq!(
            strategy.position_map().get(4),
            Some(&PositionMapEntry {
                path_id: 6,
                version: 1
            })
        );

        let dummy = strategy
            .update_position_map(Operation::Read, 4, false, 0, 3)
            .unwrap();
        let dummy = PositionMapDelta::from_bytes(&dummy).unwrap();
        assert!(dummy.is_dummy());
        assert_eq!(strategy.position_map().get(4).unwrap().path_id, 6);
    }
}
