// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This source code is dual-licensed under either the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree or the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree. You may select, at your option, one of the above-listed licenses.

//! A versioned binary codec for blocks, buckets, paths, stashes and position maps.
//!
//! Every top-level encoding starts with a one-byte codec version. Integers are little-endian.
//! Variable-length sequences carry a `u32` length prefix.

use crate::{
    bucket::{Block, Bucket, Path, MAXIMUM_BUCKET_CAPACITY},
    position_map::{PositionMap, PositionMapDelta, PositionMapEntry},
    stash::Stash,
    OramError,
};
use bytes::{Buf, BufMut};

/// The codec version written in front of every top-level encoding.
pub const CODEC_VERSION: u8 = 1;

/// A type with a binary encoding.
pub trait Encode {
    /// Appends the encoding of `self`, without the codec version byte.
    ///
    /// Fails if a sequence is too long for its `u32` length prefix.
    fn encode_to<B: BufMut>(&self, buf: &mut B) -> Result<(), OramError>;

    /// Returns the versioned encoding of `self`.
    fn to_bytes(&self) -> Result<Vec<u8>, OramError> {
        let mut buf = Vec::new();
        buf.put_u8(CODEC_VERSION);
        self.encode_to(&mut buf)?;
        Ok(buf)
    }
}

/// A type that can be read back from its binary encoding.
pub trait Decode: Sized {
    /// Reads one value, without the codec version byte.
    fn decode_from<B: Buf>(buf: &mut B) -> Result<Self, OramError>;

    /// Reads a value from a versioned encoding, rejecting trailing bytes.
    fn from_bytes(mut bytes: &[u8]) -> Result<Self, OramError> {
        let version = get_u8(&mut bytes)?;
        if version != CODEC_VERSION {
            return Err(OramError::UnsupportedCodecVersion(version));
        }
        let value = Self::decode_from(&mut bytes)?;
        if bytes.has_remaining() {
            return Err(OramError::MalformedEncoding("trailing bytes"));
        }
        Ok(value)
    }
}

pub(crate) fn get_u8<B: Buf>(buf: &mut B) -> Result<u8, OramError> {
    if buf.remaining() < 1 {
        return Err(OramError::MalformedEncoding("truncated u8"));
    }
    Ok(buf.get_u8())
}

pub(crate) fn get_u32<B: Buf>(buf: &mut B) -> Result<u32, OramError> {
    if buf.remaining() < 4 {
        return Err(OramError::MalformedEncoding("truncated u32"));
    }
    Ok(buf.get_u32_le())
}

pub(crate) fn get_u64<B: Buf>(buf: &mut B) -> Result<u64, OramError> {
    if buf.remaining() < 8 {
        return Err(OramError::MalformedEncoding("truncated u64"));
    }
    Ok(buf.get_u64_le())
}

pub(crate) fn get_bool<B: Buf>(buf: &mut B) -> Result<bool, OramError> {
    match get_u8(buf)? {
        0 => Ok(false),
        1 => Ok(true),
        _ => Err(OramError::MalformedEncoding("invalid boolean")),
    }
}

pub(crate) fn put_len<B: BufMut>(buf: &mut B, len: usize) -> Result<(), OramError> {
    buf.put_u32_le(u32::try_from(len)?);
    Ok(())
}

pub(crate) fn get_len<B: Buf>(buf: &mut B) -> Result<usize, OramError> {
    Ok(usize::try_from(get_u32(buf)?)?)
}

pub(crate) fn put_bytes<B: BufMut>(buf: &mut B, bytes: &[u8]) -> Result<(), OramError> {
    put_len(buf, bytes.len())?;
    buf.put_slice(bytes);
    Ok(())
}

pub(crate) fn get_bytes<B: Buf>(buf: &mut B) -> Result<Vec<u8>, OramError> {
    let len = get_len(buf)?;
    if buf.remaining() < len {
        return Err(OramError::MalformedEncoding("truncated byte string"));
    }
    let mut result = vec![0u8; len];
    buf.copy_to_slice(&mut result);
    Ok(result)
}

pub(crate) fn put_optional_bytes<B: BufMut>(
    buf: &mut B,
    bytes: Option<&[u8]>,
) -> Result<(), OramError> {
    match bytes {
        Some(bytes) => {
            buf.put_u8(1);
            put_bytes(buf, bytes)
        }
        None => {
            buf.put_u8(0);
            Ok(())
        }
    }
}

pub(crate) fn get_optional_bytes<B: Buf>(buf: &mut B) -> Result<Option<Vec<u8>>, OramError> {
    if get_bool(buf)? {
        Ok(Some(get_bytes(buf)?))
    } else {
        Ok(None)
    }
}

/// Reads a length prefix for a sequence whose elements take at least `min_element_size` bytes,
/// rejecting lengths the remaining input cannot hold.
pub(crate) fn get_sequence_len<B: Buf>(
    buf: &mut B,
    min_element_size: usize,
) -> Result<usize, OramError> {
    let len = get_len(buf)?;
    if len.saturating_mul(min_element_size) > buf.remaining() {
        return Err(OramError::MalformedEncoding("sequence longer than input"));
    }
    Ok(len)
}

impl Encode for Block {
    fn encode_to<B: BufMut>(&self, buf: &mut B) -> Result<(), OramError> {
        buf.put_u32_le(self.key);
        put_bytes(buf, &self.value)
    }
}

impl Decode for Block {
    fn decode_from<B: Buf>(buf: &mut B) -> Result<Self, OramError> {
        let key = get_u32(buf)?;
        let value = get_bytes(buf)?;
        Ok(Block::new(key, value))
    }
}

const BLOCK_MIN_SIZE: usize = 8;

impl Encode for Bucket {
    fn encode_to<B: BufMut>(&self, buf: &mut B) -> Result<(), OramError> {
        put_len(buf, self.capacity())?;
        put_len(buf, self.len())?;
        for block in self.read() {
            block.encode_to(buf)?;
        }
        Ok(())
    }
}

impl Decode for Bucket {
    fn decode_from<B: Buf>(buf: &mut B) -> Result<Self, OramError> {
        let capacity = get_len(buf)?;
        if capacity > MAXIMUM_BUCKET_CAPACITY {
            return Err(OramError::MalformedEncoding("bucket capacity too large"));
        }
        let len = get_sequence_len(buf, BLOCK_MIN_SIZE)?;
        if len > capacity {
            return Err(OramError::MalformedEncoding(
                "bucket holds more blocks than its capacity",
            ));
        }
        let mut blocks = Vec::with_capacity(len);
        for _ in 0..len {
            blocks.push(Block::decode_from(buf)?);
        }
        Bucket::with_blocks(capacity, blocks)
    }
}

const BUCKET_MIN_SIZE: usize = 8;

impl Encode for Path {
    fn encode_to<B: BufMut>(&self, buf: &mut B) -> Result<(), OramError> {
        put_len(buf, self.levels())?;
        for bucket in self.buckets() {
            bucket.encode_to(buf)?;
        }
        Ok(())
    }
}

impl Decode for Path {
    fn decode_from<B: Buf>(buf: &mut B) -> Result<Self, OramError> {
        let levels = get_sequence_len(buf, BUCKET_MIN_SIZE)?;
        let mut buckets = Vec::with_capacity(levels);
        for _ in 0..levels {
            buckets.push(Bucket::decode_from(buf)?);
        }
        Ok(Path::from_buckets(buckets))
    }
}

impl Encode for Stash {
    fn encode_to<B: BufMut>(&self, buf: &mut B) -> Result<(), OramError> {
        put_len(buf, self.occupancy())?;
        for block in self.blocks() {
            block.encode_to(buf)?;
        }
        Ok(())
    }
}

impl Decode for Stash {
    fn decode_from<B: Buf>(buf: &mut B) -> Result<Self, OramError> {
        let len = get_sequence_len(buf, BLOCK_MIN_SIZE)?;
        let mut blocks = Vec::with_capacity(len);
        for _ in 0..len {
            blocks.push(Block::decode_from(buf)?);
        }
        let stash = Stash::from_blocks(blocks);
        if stash.occupancy() != len {
            return Err(OramError::MalformedEncoding("stash holds a key twice"));
        }
        Ok(stash)
    }
}

impl Encode for PositionMapEntry {
    fn encode_to<B: BufMut>(&self, buf: &mut B) -> Result<(), OramError> {
        buf.put_u64_le(self.path_id);
        buf.put_u64_le(self.version);
        Ok(())
    }
}

impl Decode for PositionMapEntry {
    fn decode_from<B: Buf>(buf: &mut B) -> Result<Self, OramError> {
        let path_id = get_u64(buf)?;
        let version = get_u64(buf)?;
        Ok(PositionMapEntry { path_id, version })
    }
}

const POSITION_MAP_ENTRY_SIZE: usize = 4 + 16;

impl Encode for PositionMap {
    fn encode_to<B: BufMut>(&self, buf: &mut B) -> Result<(), OramError> {
        put_len(buf, self.len())?;
        for (address, entry) in self.iter() {
            buf.put_u32_le(address);
            entry.encode_to(buf)?;
        }
        Ok(())
    }
}

impl Decode for PositionMap {
    fn decode_from<B: Buf>(buf: &mut B) -> Result<Self, OramError> {
        let len = get_sequence_len(buf, POSITION_MAP_ENTRY_SIZE)?;
        let mut map = PositionMap::new();
        for _ in 0..len {
            let address = get_u32(buf)?;
            let entry = PositionMapEntry::decode_from(buf)?;
            if map.get(address).is_some() {
                return Err(OramError::MalformedEncoding("position map holds an address twice"));
            }
            map.set(address, entry);
        }
        Ok(map)
    }
}

impl Encode for PositionMapDelta {
    fn encode_to<B: BufMut>(&self, buf: &mut B) -> Result<(), OramError> {
        buf.put_u32_le(self.address);
        self.entry.encode_to(buf)
    }
}

impl Decode for PositionMapDelta {
    fn decode_from<B: Buf>(buf: &mut B) -> Result<Self, OramError> {
        let address = get_u32(buf)?;
        let entry = PositionMapEntry::decode_from(buf)?;
        Ok(PositionMapDelta { address, entry })
    }
}
