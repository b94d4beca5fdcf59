// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This source code is dual-licensed under either the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree or the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree. You may select, at your option, one of the above-listed licenses.

//! The client-side encryption seam.
//!
//! Position maps, stashes and update records leave the client only as ciphertext produced by a
//! [`Cipher`]. Bucket contents are stored as provided; callers that need them hidden encrypt
//! block values before writing them.

use crate::OramError;

/// Encrypts payloads before they are sent to the replicas and decrypts them on the way back.
pub trait Cipher: Send + Sync {
    /// Returns the ciphertext of `plaintext`.
    fn encrypt(&self, plaintext: &[u8]) -> Vec<u8>;
    /// Returns the plaintext of `ciphertext`, or an error if it was not produced by `encrypt`.
    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, OramError>;
}

/// A `Cipher` that does not encrypt. Only suitable for testing and benchmarking.
#[derive(Clone, Copy, Debug, Default)]
pub struct PlaintextCipher;

impl Cipher for PlaintextCipher {
    fn encrypt(&self, plaintext: &[u8]) -> Vec<u8> {
        plaintext.to_vec()
    }

    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, OramError> {
        Ok(ciphertext.to_vec())
    }
}
