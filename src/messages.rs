// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This source code is dual-licensed under either the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree or the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree. You may select, at your option, one of the above-listed licenses.

//! Requests and replies exchanged between clients and replicas, with their binary encodings.

use crate::{
    bucket::Path,
    codec::{
        get_bool, get_bytes, get_len, get_optional_bytes, get_sequence_len, get_u32, get_u64,
        get_u8, put_bytes, put_len, put_optional_bytes, Decode, Encode,
    },
    position_map::PositionMapKind,
    transport::ServiceProxy,
    tree::OramParameters,
    OramError, OramId, PathId, SequenceNumber, Version,
};
use bytes::{Buf, BufMut};

#[derive(Clone, Debug, PartialEq, Eq)]
/// An operation on an ORAM instance hosted by the replicas.
pub enum Request {
    /// Creates an ORAM instance.
    CreateOram {
        /// The identifier of the new instance.
        oram_id: OramId,
        /// The shape of the tree.
        parameters: OramParameters,
        /// How the position map is stored.
        kind: PositionMapKind,
        /// The encrypted initial position map.
        position_map: Vec<u8>,
        /// The encrypted initial stash.
        stash: Vec<u8>,
    },
    /// Looks up the parameters of an instance.
    GetOram {
        /// The instance.
        oram_id: OramId,
    },
    /// Fetches the position map state newer than `since`.
    GetPositionMap {
        /// The instance.
        oram_id: OramId,
        /// The sequence number the client has incorporated.
        since: SequenceNumber,
    },
    /// Fetches a path and the stash, if the client's version is current.
    GetPathAndStash {
        /// The instance.
        oram_id: OramId,
        /// The tree version the client believes is current.
        version: Version,
        /// The path to read.
        path_id: PathId,
    },
    /// Commits an eviction.
    Evict(EvictRequest),
    /// Deletes an instance.
    DeleteOram {
        /// The instance.
        oram_id: OramId,
    },
}

#[derive(Clone, Debug, PartialEq, Eq)]
/// The payload of an eviction.
pub struct EvictRequest {
    /// The instance.
    pub oram_id: OramId,
    /// Must be exactly the current version plus one.
    pub new_version: Version,
    /// The encrypted position map payload: a full map or a single update record.
    pub position_map: Vec<u8>,
    /// The encrypted new stash.
    pub stash: Vec<u8>,
    /// The evicted path.
    pub path_id: PathId,
    /// The new buckets of the path, leaf to root.
    pub path: Path,
}

#[derive(Clone, Debug, PartialEq, Eq)]
/// The reply to [`Request::GetPathAndStash`].
pub struct PathAndStash {
    /// Whether the client's version was current. If not, no data is returned.
    pub corresponds: bool,
    /// The encrypted stash, if non-empty.
    pub stash: Option<Vec<u8>>,
    /// The buckets of the requested path, leaf to root.
    pub path: Option<Path>,
}

impl PathAndStash {
    /// The reply to a client whose version is not current.
    pub fn stale() -> Self {
        Self {
            corresponds: false,
            stash: None,
            path: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
/// The reply to [`Request::GetPositionMap`].
pub enum PositionMapReply {
    /// The complete encrypted position map of a Full instance.
    Snapshot {
        /// The tree version the map belongs to.
        version: Version,
        /// The encrypted map.
        position_map: Vec<u8>,
    },
    /// A range of the update log of a Triple instance.
    Log {
        /// The current tree version.
        version: Version,
        /// The highest sequence number the replica holds.
        highest_sequence: SequenceNumber,
        /// The encrypted initial map, sent to clients that have incorporated nothing yet.
        base: Option<Vec<u8>>,
        /// Consecutive slots, each holding an encrypted update record or `None` if absent.
        entries: Vec<(SequenceNumber, Option<Vec<u8>>)>,
    },
}

impl PositionMapReply {
    /// The tree version the reply was produced at.
    pub fn version(&self) -> Version {
        match self {
            PositionMapReply::Snapshot { version, .. } | PositionMapReply::Log { version, .. } => {
                *version
            }
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
/// Why a replica refused a request.
pub enum FailureReason {
    /// An eviction did not propose the current version plus one.
    VersionMismatch {
        /// The current version.
        current: Version,
        /// The proposed version.
        proposed: Version,
    },
    /// No such instance.
    UnknownOram(OramId),
    /// The instance already exists.
    OramAlreadyExists(OramId),
    /// The request could not be decoded or does not fit the instance.
    InvalidRequest,
    /// A mutating request was submitted without ordering.
    RequiresOrdering,
}

impl From<OramError> for FailureReason {
    fn from(error: OramError) -> Self {
        match error {
            OramError::VersionMismatch { current, proposed } => {
                FailureReason::VersionMismatch { current, proposed }
            }
            OramError::UnknownOram(oram_id) => FailureReason::UnknownOram(oram_id),
            OramError::OramAlreadyExists(oram_id) => FailureReason::OramAlreadyExists(oram_id),
            _ => FailureReason::InvalidRequest,
        }
    }
}

impl From<FailureReason> for OramError {
    fn from(reason: FailureReason) -> Self {
        match reason {
            FailureReason::VersionMismatch { current, proposed } => {
                OramError::VersionMismatch { current, proposed }
            }
            FailureReason::UnknownOram(oram_id) => OramError::UnknownOram(oram_id),
            FailureReason::OramAlreadyExists(oram_id) => OramError::OramAlreadyExists(oram_id),
            FailureReason::InvalidRequest | FailureReason::RequiresOrdering => {
                OramError::RequestRejected
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
/// A replica's answer to a [`Request`].
pub enum Response {
    /// The request was applied.
    Success,
    /// The request was refused; nothing was modified.
    Failure(FailureReason),
    /// The parameters of an instance.
    Oram {
        /// The shape of the tree.
        parameters: OramParameters,
        /// How the position map is stored.
        kind: PositionMapKind,
    },
    /// The position map state.
    PositionMap(PositionMapReply),
    /// A path and the stash.
    PathAndStash(PathAndStash),
}

impl Request {
    /// Whether the request leaves replica state unchanged and may be served without ordering.
    pub fn is_read_only(&self) -> bool {
        matches!(
            self,
            Request::GetOram { .. } | Request::GetPositionMap { .. }
        )
    }

    /// Submits the request through the totally ordered channel.
    pub fn send_ordered<P: ServiceProxy + ?Sized>(
        &self,
        proxy: &P,
    ) -> Result<Response, OramError> {
        Response::from_bytes(&proxy.invoke_ordered(&self.to_bytes()?)?)
    }

    /// Submits the request without ordering and returns one replica's reply.
    pub fn send_unordered<P: ServiceProxy + ?Sized>(
        &self,
        proxy: &P,
    ) -> Result<Response, OramError> {
        Response::from_bytes(&proxy.invoke_unordered(&self.to_bytes()?)?)
    }

    /// Submits the request without ordering and returns one reply per replica.
    pub fn send_unordered_per_replica<P: ServiceProxy + ?Sized>(
        &self,
        proxy: &P,
    ) -> Result<Vec<Response>, OramError> {
        proxy
            .invoke_unordered_per_replica(&self.to_bytes()?)?
            .iter()
            .map(|reply| Response::from_bytes(reply))
            .collect()
    }
}

impl Response {
    /// Maps `Success` to `Ok(())` and a failure to its error.
    pub fn into_result(self) -> Result<(), OramError> {
        match self {
            Response::Success => Ok(()),
            Response::Failure(reason) => Err(reason.into()),
            _ => Err(OramError::UnexpectedReply),
        }
    }
}

const CREATE_ORAM: u8 = 1;
const GET_ORAM: u8 = 2;
const GET_POSITION_MAP: u8 = 3;
const GET_PATH_AND_STASH: u8 = 4;
const EVICT: u8 = 5;
const DELETE_ORAM: u8 = 6;

impl Encode for OramParameters {
    fn encode_to<B: BufMut>(&self, buf: &mut B) -> Result<(), OramError> {
        buf.put_u32_le(self.height);
        put_len(buf, self.bucket_capacity)?;
        put_len(buf, self.block_size)
    }
}

impl Decode for OramParameters {
    fn decode_from<B: Buf>(buf: &mut B) -> Result<Self, OramError> {
        let height = get_u32(buf)?;
        let bucket_capacity = get_len(buf)?;
        let block_size = get_len(buf)?;
        Ok(OramParameters {
            height,
            bucket_capacity,
            block_size,
        })
    }
}

impl Encode for Request {
    fn encode_to<B: BufMut>(&self, buf: &mut B) -> Result<(), OramError> {
        match self {
            Request::CreateOram {
                oram_id,
                parameters,
                kind,
                position_map,
                stash,
            } => {
                buf.put_u8(CREATE_ORAM);
                buf.put_u32_le(*oram_id);
                parameters.encode_to(buf)?;
                buf.put_u8(kind.to_u8());
                put_bytes(buf, position_map)?;
                put_bytes(buf, stash)?;
            }
            Request::GetOram { oram_id } => {
                buf.put_u8(GET_ORAM);
                buf.put_u32_le(*oram_id);
            }
            Request::GetPositionMap { oram_id, since } => {
                buf.put_u8(GET_POSITION_MAP);
                buf.put_u32_le(*oram_id);
                buf.put_u64_le(*since);
            }
            Request::GetPathAndStash {
                oram_id,
                version,
                path_id,
            } => {
                buf.put_u8(GET_PATH_AND_STASH);
                buf.put_u32_le(*oram_id);
                buf.put_u64_le(*version);
                buf.put_u64_le(*path_id);
            }
            Request::Evict(evict) => {
                buf.put_u8(EVICT);
                buf.put_u32_le(evict.oram_id);
                buf.put_u64_le(evict.new_version);
                put_bytes(buf, &evict.position_map)?;
                put_bytes(buf, &evict.stash)?;
                buf.put_u64_le(evict.path_id);
                evict.path.encode_to(buf)?;
            }
            Request::DeleteOram { oram_id } => {
                buf.put_u8(DELETE_ORAM);
                buf.put_u32_le(*oram_id);
            }
        }
        Ok(())
    }
}

impl Decode for Request {
    fn decode_from<B: Buf>(buf: &mut B) -> Result<Self, OramError> {
        let tag = get_u8(buf)?;
        let oram_id = get_u32(buf)?;
        match tag {
            CREATE_ORAM => Ok(Request::CreateOram {
                oram_id,
                parameters: OramParameters::decode_from(buf)?,
                kind: PositionMapKind::from_u8(get_u8(buf)?)?,
                position_map: get_bytes(buf)?,
                stash: get_bytes(buf)?,
            }),
            GET_ORAM => Ok(Request::GetOram { oram_id }),
            GET_POSITION_MAP => Ok(Request::GetPositionMap {
                oram_id,
                since: get_u64(buf)?,
            }),
            GET_PATH_AND_STASH => Ok(Request::GetPathAndStash {
                oram_id,
                version: get_u64(buf)?,
                path_id: get_u64(buf)?,
            }),
            EVICT => Ok(Request::Evict(EvictRequest {
                oram_id,
                new_version: get_u64(buf)?,
                position_map: get_bytes(buf)?,
                stash: get_bytes(buf)?,
                path_id: get_u64(buf)?,
                path: Path::decode_from(buf)?,
            })),
            DELETE_ORAM => Ok(Request::DeleteOram { oram_id }),
            _ => Err(OramError::MalformedEncoding("unknown request")),
        }
    }
}

const SUCCESS: u8 = 1;
const FAILURE: u8 = 2;
const ORAM: u8 = 3;
const SNAPSHOT: u8 = 4;
const LOG: u8 = 5;
const PATH_AND_STASH: u8 = 6;

const VERSION_MISMATCH: u8 = 1;
const UNKNOWN_ORAM: u8 = 2;
const ORAM_ALREADY_EXISTS: u8 = 3;
const INVALID_REQUEST: u8 = 4;
const REQUIRES_ORDERING: u8 = 5;

impl Encode for FailureReason {
    fn encode_to<B: BufMut>(&self, buf: &mut B) -> Result<(), OramError> {
        match self {
            FailureReason::VersionMismatch { current, proposed } => {
                buf.put_u8(VERSION_MISMATCH);
                buf.put_u64_le(*current);
                buf.put_u64_le(*proposed);
            }
            FailureReason::UnknownOram(oram_id) => {
                buf.put_u8(UNKNOWN_ORAM);
                buf.put_u32_le(*oram_id);
            }
            FailureReason::OramAlreadyExists(oram_id) => {
                buf.put_u8(ORAM_ALREADY_EXISTS);
                buf.put_u32_le(*oram_id);
            }
            FailureReason::InvalidRequest => buf.put_u8(INVALID_REQUEST),
            FailureReason::RequiresOrdering => buf.put_u8(REQUIRES_ORDERING),
        }
        Ok(())
    }
}

impl Decode for FailureReason {
    fn decode_from<B: Buf>(buf: &mut B) -> Result<Self, OramError> {
        match get_u8(buf)? {
            VERSION_MISMATCH => Ok(FailureReason::VersionMismatch {
                current: get_u64(buf)?,
                proposed: get_u64(buf)?,
            }),
            UNKNOWN_ORAM => Ok(FailureReason::UnknownOram(get_u32(buf)?)),
            ORAM_ALREADY_EXISTS => Ok(FailureReason::OramAlreadyExists(get_u32(buf)?)),
            INVALID_REQUEST => Ok(FailureReason::InvalidRequest),
            REQUIRES_ORDERING => Ok(FailureReason::RequiresOrdering),
            _ => Err(OramError::MalformedEncoding("unknown failure reason")),
        }
    }
}

impl Encode for Response {
    fn encode_to<B: BufMut>(&self, buf: &mut B) -> Result<(), OramError> {
        match self {
            Response::Success => buf.put_u8(SUCCESS),
            Response::Failure(reason) => {
                buf.put_u8(FAILURE);
                reason.encode_to(buf)?;
            }
            Response::Oram { parameters, kind } => {
                buf.put_u8(ORAM);
                parameters.encode_to(buf)?;
                buf.put_u8(kind.to_u8());
            }
            Response::PositionMap(PositionMapReply::Snapshot {
                version,
                position_map,
            }) => {
                buf.put_u8(SNAPSHOT);
                buf.put_u64_le(*version);
                put_bytes(buf, position_map)?;
            }
            Response::PositionMap(PositionMapReply::Log {
                version,
                highest_sequence,
                base,
                entries,
            }) => {
                buf.put_u8(LOG);
                buf.put_u64_le(*version);
                buf.put_u64_le(*highest_sequence);
                put_optional_bytes(buf, base.as_deref())?;
                put_len(buf, entries.len())?;
                for (sequence, record) in entries {
                    buf.put_u64_le(*sequence);
                    put_optional_bytes(buf, record.as_deref())?;
                }
            }
            Response::PathAndStash(reply) => {
                buf.put_u8(PATH_AND_STASH);
                buf.put_u8(u8::from(reply.corresponds));
                put_optional_bytes(buf, reply.stash.as_deref())?;
                match &reply.path {
                    Some(path) => {
                        buf.put_u8(1);
                        path.encode_to(buf)?;
                    }
                    None => buf.put_u8(0),
                }
            }
        }
        Ok(())
    }
}

impl Decode for Response {
    fn decode_from<B: Buf>(buf: &mut B) -> Result<Self, OramError> {
        match get_u8(buf)? {
            SUCCESS => Ok(Response::Success),
            FAILURE => Ok(Response::Failure(FailureReason::decode_from(buf)?)),
            ORAM => Ok(Response::Oram {
                parameters: OramParameters::decode_from(buf)?,
                kind: PositionMapKind::from_u8(get_u8(buf)?)?,
            }),
            SNAPSHOT => Ok(Response::PositionMap(PositionMapReply::Snapshot {
                version: get_u64(buf)?,
                position_map: get_bytes(buf)?,
            })),
            LOG => {
                let version = get_u64(buf)?;
                let highest_sequence = get_u64(buf)?;
                let base = get_optional_bytes(buf)?;
                let len = get_sequence_len(buf, 9)?;
                let mut entries = Vec::with_capacity(len);
                for _ in 0..len {
                    let sequence = get_u64(buf)?;
                    entries.push((sequence, get_optional_bytes(buf)?));
                }
                Ok(Response::PositionMap(PositionMapReply::Log {
                    version,
                    highest_sequence,
                    base,
                    entries,
                }))
            }
            PATH_AND_STASH => {
                let corresponds = get_bool(buf)?;
                let stash = get_optional_bytes(buf)?;
                let path = if get_bool(buf)? {
                    Some(Path::decode_from(buf)?)
                } else {
                    None
                };
                Ok(Response::PathAndStash(PathAndStash {
                    corresponds,
                    stash,
                    path,
                }))
            }
            _ => Err(OramError::MalformedEncoding("unknown response")),
        }
    }
}
