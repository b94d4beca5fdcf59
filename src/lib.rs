// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This source code is dual-licensed under either the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree or the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree. You may select, at your option, one of the above-listed licenses.

//! A Path ORAM tree storage engine designed to run behind a replicated,
//! totally ordered storage backend.
//!
//! The server side is a versioned tree state machine ([`tree::OramTree`]) that commits an eviction
//! only when the proposed version is exactly one greater than the current version.
//! The client side ([`client::OramClient`]) keeps a local view of the position map, reconciled with
//! the replicas by one of two strategies:
//! [`position_map::full::FullPositionMap`] (merged snapshots) or
//! [`position_map::triple::TriplePositionMap`] (an incrementally folded update log).

#![warn(clippy::cargo, clippy::doc_markdown, missing_docs, rustdoc::all)]

use std::num::TryFromIntError;
use thiserror::Error;

pub mod bucket;
pub mod client;
pub mod codec;
pub mod crypto;
pub mod database;
pub mod manager;
pub mod messages;
pub mod position_map;
pub mod stash;
pub mod transport;
pub mod tree;
pub mod utils;

#[cfg(test)]
mod test_utils;

pub use bucket::{Block, Bucket, Path};
pub use client::{ClientConfig, OramClient, Operation};
pub use crypto::{Cipher, PlaintextCipher};
pub use manager::OramManager;
pub use position_map::{
    full::FullPositionMap, triple::TriplePositionMap, PositionMap, PositionMapEntry,
    PositionMapKind, PositionMapStrategy,
};
pub use stash::Stash;
pub use transport::{LocalServiceProxy, ServiceProxy};
pub use tree::{OramParameters, OramTree};

/// The numeric type used to specify the logical address of a block.
pub type Address = u32;

/// The numeric type used to identify a root-to-leaf path, in `0..2^height`.
pub type PathId = u64;

/// The numeric type used for tree versions and position map version identifiers.
pub type Version = u64;

/// The numeric type used to index the replicated position map update log.
pub type SequenceNumber = u64;

/// The numeric type used to specify the number of blocks in a bucket.
pub type BucketSize = usize;

/// The numeric type used to specify the size of a block value in bytes.
pub type BlockSize = usize;

/// Identifies one ORAM instance hosted by an [`OramManager`].
pub type OramId = u32;

#[derive(Error, Debug, PartialEq, Eq)]
/// Errors that can occur while operating the ORAM.
pub enum OramError {
    /// Errors arising from conversions between integer types.
    #[error("Arithmetic error encountered.")]
    IntegerConversionError(#[from] TryFromIntError),
    /// A bucket write would have exceeded the bucket capacity; the bucket was not modified.
    #[error("Bucket holds at most {capacity} blocks, {attempted} were written.")]
    BucketOverflow {
        /// The capacity of the bucket.
        capacity: BucketSize,
        /// The number of blocks the rejected write contained.
        attempted: usize,
    },
    /// An eviction proposed a version other than the current version plus one.
    #[error("Eviction proposed version {proposed}, but the tree is at version {current}.")]
    VersionMismatch {
        /// The version the tree currently holds.
        current: Version,
        /// The version the rejected eviction proposed.
        proposed: Version,
    },
    /// The parameters of an ORAM instance are inconsistent.
    #[error("Invalid configuration.")]
    InvalidConfigurationError,
    /// A path identifier is outside `0..2^height`.
    #[error("Path {path_id} does not exist in a tree of height {height}.")]
    InvalidPathId {
        /// The rejected path identifier.
        path_id: PathId,
        /// The height of the tree.
        height: u32,
    },
    /// A node index is outside the tree.
    #[error("Node {0} is outside the tree.")]
    NodeOutOfBounds(u64),
    /// A path level is outside `0..=height`.
    #[error("Level {0} is out of range for this path.")]
    InvalidLevel(usize),
    /// A block value does not have the block size of its ORAM instance.
    #[error("Block value holds {actual} bytes, expected {expected}.")]
    InvalidBlockSize {
        /// The block size of the ORAM instance.
        expected: BlockSize,
        /// The size of the rejected value.
        actual: usize,
    },
    /// A byte string could not be decoded.
    #[error("Malformed encoding: {0}.")]
    MalformedEncoding(&'static str),
    /// A byte string was produced by an unknown codec version.
    #[error("Unsupported codec version {0}.")]
    UnsupportedCodecVersion(u8),
    /// No ORAM with this identifier exists.
    #[error("No ORAM with identifier {0}.")]
    UnknownOram(OramId),
    /// An ORAM with this identifier already exists.
    #[error("An ORAM with identifier {0} already exists.")]
    OramAlreadyExists(OramId),
    /// The server rejected a request as malformed or inconsistent with the ORAM instance.
    #[error("Request rejected by the storage service.")]
    RequestRejected,
    /// The server answered a request with an unexpected kind of reply.
    #[error("Unexpected reply from the storage service.")]
    UnexpectedReply,
    /// The client did not manage to commit an access within its retry budget.
    #[error("Access did not commit after {0} attempts.")]
    RetriesExhausted(u32),
    /// The transport failed to deliver a request or a reply.
    #[error("Transport failure: {0}")]
    Transport(String),
}
