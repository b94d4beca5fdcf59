// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This source code is dual-licensed under either the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree or the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree. You may select, at your option, one of the above-listed licenses.

//! The replica side: a registry of ORAM instances executing decoded requests.

use crate::{
    codec::{Decode, Encode},
    messages::{EvictRequest, FailureReason, Request, Response},
    tree::OramTree,
    OramError, OramId, SequenceNumber,
};
use std::collections::HashMap;

/// Hosts the ORAM instances of one replica.
///
/// Requests that change state must reach every replica in the same order; see
/// [`OramManager::execute_ordered`].
#[derive(Debug, Default)]
pub struct OramManager {
    orams: HashMap<OramId, OramTree>,
}

impl OramManager {
    /// Returns a manager hosting no instances.
    pub fn new() -> Self {
        Self::default()
    }

    /// Decodes and executes a request delivered in total order, returning the encoded reply.
    pub fn execute_ordered(&mut self, request: &[u8]) -> Vec<u8> {
        let response = match Request::from_bytes(request) {
            Ok(request) => self.execute(request),
            Err(error) => {
                log::warn!("Undecodable ordered request: {}", error);
                Response::Failure(FailureReason::InvalidRequest)
            }
        };
        encode_response(response)
    }

    /// Decodes and executes a request delivered without ordering. Only read-only requests
    /// are accepted.
    pub fn execute_unordered(&mut self, request: &[u8]) -> Vec<u8> {
        let response = match Request::from_bytes(request) {
            Ok(request) if request.is_read_only() => self.execute(request),
            Ok(_) => Response::Failure(FailureReason::RequiresOrdering),
            Err(error) => {
                log::warn!("Undecodable unordered request: {}", error);
                Response::Failure(FailureReason::InvalidRequest)
            }
        };
        encode_response(response)
    }

    /// Executes one request. Refused requests leave every instance unchanged.
    pub fn execute(&mut self, request: Request) -> Response {
        match self.try_execute(request) {
            Ok(response) => response,
            Err(error) => Response::Failure(error.into()),
        }
    }

    fn try_execute(&mut self, request: Request) -> Result<Response, OramError> {
        match request {
            Request::CreateOram {
                oram_id,
                parameters,
                kind,
                position_map,
                stash,
            } => {
                if self.orams.contains_key(&oram_id) {
                    return Err(OramError::OramAlreadyExists(oram_id));
                }
                let tree = OramTree::create(parameters, kind, position_map, stash)?;
                self.orams.insert(oram_id, tree);
                log::info!("Created ORAM {}", oram_id);
                Ok(Response::Success)
            }
            Request::GetOram { oram_id } => {
                let tree = self.get(oram_id)?;
                Ok(Response::Oram {
                    parameters: tree.parameters(),
                    kind: tree.kind(),
                })
            }
            Request::GetPositionMap { oram_id, since } => Ok(Response::PositionMap(
                self.get(oram_id)?.get_position_map(since),
            )),
            Request::GetPathAndStash {
                oram_id,
                version,
                path_id,
            } => Ok(Response::PathAndStash(
                self.get_mut(oram_id)?.get_path_and_stash(version, path_id)?,
            )),
            Request::Evict(EvictRequest {
                oram_id,
                new_version,
                position_map,
                stash,
                path_id,
                path,
            }) => {
                self.get_mut(oram_id)?
                    .evict(new_version, position_map, stash, path_id, path)?;
                Ok(Response::Success)
            }
            Request::DeleteOram { oram_id } => {
                self.orams
                    .remove(&oram_id)
                    .ok_or(OramError::UnknownOram(oram_id))?;
                log::info!("Deleted ORAM {}", oram_id);
                Ok(Response::Success)
            }
        }
    }

    /// Returns the instance `oram_id`.
    pub fn get(&self, oram_id: OramId) -> Result<&OramTree, OramError> {
        self.orams
            .get(&oram_id)
            .ok_or(OramError::UnknownOram(oram_id))
    }

    fn get_mut(&mut self, oram_id: OramId) -> Result<&mut OramTree, OramError> {
        self.orams
            .get_mut(&oram_id)
            .ok_or(OramError::UnknownOram(oram_id))
    }

    /// Discards the update log records of `oram_id` up to `up_to`. A local maintenance
    /// operation: replicas may compact independently, which clients see as absent slots.
    pub fn compact_log(
        &mut self,
        oram_id: OramId,
        up_to: SequenceNumber,
    ) -> Result<usize, OramError> {
        Ok(self.get_mut(oram_id)?.compact_log(up_to))
    }

    /// The number of hosted instances.
    pub fn len(&self) -> usize {
        self.orams.len()
    }

    /// Whether no instance is hosted.
    pub fn is_empty(&self) -> bool {
        self.orams.is_empty()
    }
}

/// Encodes a reply. A reply too large for the codec is replaced by an `InvalidRequest` failure.
fn encode_response(response: Response) -> Vec<u8> {
    response.to_bytes().unwrap_or_else(|error| {
        log::warn!("Unencodable reply: {}", error);
        Response::Failure(FailureReason::InvalidRequest)
            .to_bytes()
            .unwrap_or_default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        bucket::{Block, Path},
        messages::{PathAndStash, PositionMapReply},
        position_map::PositionMapKind,
        test_utils::init_logger,
        tree::OramParameters,
    };

    fn parameters() -> OramParameters {
        OramParameters::new(3, 4, 2).unwrap()
    }

    fn create(oram_id: OramId, kind: PositionMapKind) -> Request {
        Request::CreateOram {
            oram_id,
            parameters: parameters(),
            kind,
            position_map: vec![],
            stash: vec![],
        }
    }

    fn evict(new_version: u64) -> Request {
        let mut path = Path::new(4, 4);
        let mut leaf = path.get(0).unwrap().clone();
        leaf.write(vec![Block::new(10, vec![1, 2])]).unwrap();
        path.put(0, leaf).unwrap();
        Request::Evict(EvictRequest {
            oram_id: 1,
            new_version,
            position_map: vec![new_version as u8],
            stash: vec![],
            path_id: 5,
            path,
        })
    }

    #[test]
    fn oram_lifecycle() {
        init_logger();
        let mut manager = OramManager::new();

        assert_eq!(manager.execute(create(1, PositionMapKind::Full)), Response::Success);
        assert_eq!(
            manager.execute(create(1, PositionMapKind::Triple)),
            Response::Failure(FailureReason::OramAlreadyExists(1))
        );
        assert_eq!(
            manager.execute(Request::GetOram { oram_id: 1 }),
            Response::Oram {
                parameters: parameters(),
                kind: PositionMapKind::Full
            }
        );

        assert_eq!(manager.execute(Request::DeleteOram { oram_id: 1 }), Response::Success);
        assert!(manager.is_empty());
        assert_eq!(
            manager.execute(Request::GetOram { oram_id: 1 }),
            Response::Failure(FailureReason::UnknownOram(1))
        );
        assert_eq!(
            manager.execute(Request::DeleteOram { oram_id: 1 }),
            Response::Failure(FailureReason::UnknownOram(1))
        );
    }

    #[test]
    fn evictions_are_version_gated() {
        init_logger();
        let mut manager = OramManager::new();
        manager.execute(create(1, PositionMapKind::Full));

        assert_eq!(manager.execute(evict(1)), Response::Success);
        assert_eq!(
            manager.execute(evict(1)),
            Response::Failure(FailureReason::VersionMismatch {
                current: 1,
                proposed: 1
            })
        );

        let stale = manager.execute(Request::GetPathAndStash {
            oram_id: 1,
            version: 0,
            path_id: 5,
        });
        assert_eq!(stale, Response::PathAndStash(PathAndStash::stale()));

        match manager.execute(Request::GetPathAndStash {
            oram_id: 1,
            version: 1,
            path_id: 5,
        }) {
            Response::PathAndStash(reply) => {
                assert!(reply.corresponds);
                assert_eq!(reply.path.unwrap().flatten_blocks(), vec![Block::new(10, vec![1, 2])]);
            }
            other => panic!("unexpected reply {:?}", other),
        }
    }

    #[test]
    fn unordered_channel_refuses_mutations() {
        init_logger();
        let mut manager = OramManager::new();
        let request = create(1, PositionMapKind::Full).to_bytes().unwrap();
        let reply = manager.execute_unordered(&request);
        assert_eq!(
            Response::from_bytes(&reply).unwrap(),
            Response::Failure(FailureReason::RequiresOrdering)
        );
        assert!(manager.is_empty());

        let request = create(1, PositionMapKind::Triple).to_bytes().unwrap();
        let reply = manager.execute_ordered(&request);
        assert_eq!(Response::from_bytes(&reply).unwrap(), Response::Success);

        let request = Request::GetPositionMap {
            oram_id: 1,
            since: 0,
        };
        let reply = manager.execute_unordered(&request.to_bytes().unwrap());
        match Response::from_bytes(&reply).unwrap() {
            Response::PositionMap(log) => assert_eq!(log.version(), 0),
            other => panic!("unexpected reply {:?}", other),
        }

        let reply = manager.execute_ordered(&[0xff, 0x00]);
        assert_eq!(
            Response::from_bytes(&reply).unwrap(),
            Response::Failure(FailureReason::InvalidRequest)
        );
    }

    #[test]
    fn compaction_leaves_absent_slots() {
        init_logger();
        let mut manager = OramManager::new();
        manager.execute(create(1, PositionMapKind::Triple));
        for version in 1..=3 {
            assert_eq!(manager.execute(evict(version)), Response::Success);
        }
        assert_eq!(manager.compact_log(1, 2), Ok(2));
        assert_eq!(manager.compact_log(2, 2), Err(OramError::UnknownOram(2)));

        match manager.execute(Request::GetPositionMap { oram_id: 1, since: 0 }) {
            Response::PositionMap(PositionMapReply::Log { entries, base, .. }) => {
                assert_eq!(base, Some(vec![]));
                assert_eq!(entries, vec![(1, None), (2, None), (3, Some(vec![3]))]);
            }
            other => panic!("unexpected reply {:?}", other),
        }
    }

    #[test]
    fn oversized_buckets_are_refused() {
        init_logger();
        let mut manager = OramManager::new();
        let request = Request::CreateOram {
            oram_id: 1,
            parameters: OramParameters {
                height: 3,
                bucket_capacity: u32::MAX as usize,
                block_size: 2,
            },
            kind: PositionMapKind::Full,
            position_map: vec![],
            stash: vec![],
        };
        let reply = manager.execute_ordered(&request.to_bytes().unwrap());
        assert_eq!(
            Response::from_bytes(&reply).unwrap(),
            Response::Failure(FailureReason::InvalidRequest)
        );
        assert!(manager.is_empty());

        // The empty root bucket is encoded last, as its capacity followed by a zero length.
        // An eviction claiming an enormous capacity is refused while decoding.
        manager.execute(create(1, PositionMapKind::Full));
        let mut request = evict(1).to_bytes().unwrap();
        let capacity_offset = request.len() - 8;
        request[capacity_offset..capacity_offset + 4].copy_from_slice(&u32::MAX.to_le_bytes());
        let reply = manager.execute_ordered(&request);
        assert_eq!(
            Response::from_bytes(&reply).unwrap(),
            Response::Failure(FailureReason::InvalidRequest)
        );
        assert_eq!(manager.get(1).unwrap().version(), 0);
    }
}
