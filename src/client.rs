// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This source code is dual-licensed under either the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree or the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree. You may select, at your option, one of the above-listed licenses.

//! The ORAM client: runs accesses against a replica group with optimistic concurrency.

use crate::{
    bucket::Block,
    codec::{Decode, Encode},
    crypto::Cipher,
    messages::{EvictRequest, FailureReason, PathAndStash, Request, Response},
    position_map::{PositionMap, PositionMapStrategy},
    stash::Stash,
    transport::ServiceProxy,
    tree::OramParameters,
    utils::random_path,
    Address, OramError, OramId, PathId, Version,
};
use parking_lot::Mutex;
use rand::{CryptoRng, RngCore};

/// The kind of a logical access.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Operation {
    /// Reads a block.
    Read,
    /// Overwrites a block.
    Write,
}

/// The number of attempts an access makes before giving up.
pub const DEFAULT_MAX_RETRIES: u32 = 16;

/// Client-side settings.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ClientConfig {
    /// The number of attempts an access makes, each starting with a version check,
    /// before failing with `RetriesExhausted`.
    pub max_retries: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

/// One access, between reading its path and committing its eviction.
struct PendingEviction<'a> {
    operation: Operation,
    address: Address,
    value: Option<&'a [u8]>,
    is_real_access: bool,
    path_id: PathId,
    new_path_id: PathId,
    new_version: Version,
}

#[derive(Debug)]
struct ClientState<S> {
    strategy: S,
    version: Version,
    synchronized: bool,
}

/// A client of one ORAM instance.
///
/// Every access reads one full path and the stash, then evicts that path under the next
/// tree version. If another client committed first, the eviction is refused, the local
/// position map is rolled back and refreshed, and the access starts over.
///
/// Accesses from threads sharing a client are serialized.
#[derive(Debug)]
pub struct OramClient<S, P, C> {
    oram_id: OramId,
    parameters: OramParameters,
    config: ClientConfig,
    proxy: P,
    cipher: C,
    state: Mutex<ClientState<S>>,
}

impl<S: PositionMapStrategy, P: ServiceProxy, C: Cipher> OramClient<S, P, C> {
    /// Creates ORAM instance `oram_id` on the replicas and returns a client for it.
    pub fn create(
        oram_id: OramId,
        parameters: OramParameters,
        config: ClientConfig,
        proxy: P,
        cipher: C,
    ) -> Result<Self, OramError> {
        parameters.validate()?;

        let request = Request::CreateOram {
            oram_id,
            parameters,
            kind: S::KIND,
            position_map: cipher.encrypt(&PositionMap::new().to_bytes()?),
            stash: cipher.encrypt(&Stash::new().to_bytes()?),
        };
        request.send_ordered(&proxy)?.into_result()?;

        Ok(Self {
            oram_id,
            parameters,
            config,
            proxy,
            cipher,
            state: Mutex::new(ClientState {
                strategy: S::default(),
                version: 0,
                synchronized: true,
            }),
        })
    }

    /// Returns a client for the existing instance `oram_id`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfigurationError` if the instance stores its position map
    /// in a form this client's strategy does not use.
    pub fn connect(
        oram_id: OramId,
        config: ClientConfig,
        proxy: P,
        cipher: C,
    ) -> Result<Self, OramError> {
        let parameters = match (Request::GetOram { oram_id }).send_unordered(&proxy)? {
            Response::Oram { parameters, kind } if kind == S::KIND => parameters,
            Response::Oram { .. } => return Err(OramError::InvalidConfigurationError),
            Response::Failure(reason) => return Err(reason.into()),
            _ => return Err(OramError::UnexpectedReply),
        };

        Ok(Self {
            oram_id,
            parameters,
            config,
            proxy,
            cipher,
            state: Mutex::new(ClientState {
                strategy: S::default(),
                version: 0,
                synchronized: false,
            }),
        })
    }

    /// The instance this client accesses.
    pub fn oram_id(&self) -> OramId {
        self.oram_id
    }

    /// The shape of the instance.
    pub fn parameters(&self) -> OramParameters {
        self.parameters
    }

    /// The tree version this client last observed.
    pub fn version(&self) -> Version {
        self.state.lock().version
    }

    /// A copy of the client's merged position map.
    pub fn position_map(&self) -> PositionMap {
        self.state.lock().strategy.position_map().clone()
    }

    /// The replica group this client talks to.
    pub fn proxy(&self) -> &P {
        &self.proxy
    }

    /// Returns the value stored at `address`, or `None` if it was never written.
    pub fn read<R: RngCore + CryptoRng>(
        &self,
        address: Address,
        rng: &mut R,
    ) -> Result<Option<Vec<u8>>, OramError> {
        self.access(Operation::Read, address, None, rng)
    }

    /// Stores `value` at `address` and returns the previous value, if any.
    pub fn write<R: RngCore + CryptoRng>(
        &self,
        address: Address,
        value: Vec<u8>,
        rng: &mut R,
    ) -> Result<Option<Vec<u8>>, OramError> {
        Block::new(address, value.clone()).check_size(self.parameters.block_size)?;
        self.access(Operation::Write, address, Some(value), rng)
    }

    /// Performs an access that reads a random path and changes no block, indistinguishable
    /// on the wire from a real read.
    pub fn dummy_access<R: RngCore + CryptoRng>(&self, rng: &mut R) -> Result<(), OramError> {
        self.run(Operation::Read, 0, None, false, rng).map(|_| ())
    }

    /// Fetches the replicas' position map state and merges it into the local view.
    pub fn refresh(&self) -> Result<(), OramError> {
        let mut state = self.state.lock();
        self.synchronize(&mut state)
    }

    fn access<R: RngCore + CryptoRng>(
        &self,
        operation: Operation,
        address: Address,
        value: Option<Vec<u8>>,
        rng: &mut R,
    ) -> Result<Option<Vec<u8>>, OramError> {
        self.run(operation, address, value, true, rng)
    }

    fn synchronize(&self, state: &mut ClientState<S>) -> Result<(), OramError> {
        let snapshots = state
            .strategy
            .get_position_maps(self.oram_id, &self.proxy, &self.cipher)?;
        state.version = state.strategy.merge_position_maps(snapshots);
        state.synchronized = true;
        log::debug!("Synchronized with the replicas at version {}", state.version);
        Ok(())
    }

    fn run<R: RngCore + CryptoRng>(
        &self,
        operation: Operation,
        address: Address,
        value: Option<Vec<u8>>,
        is_real_access: bool,
        rng: &mut R,
    ) -> Result<Option<Vec<u8>>, OramError> {
        let mut state = self.state.lock();

        for attempt in 0..self.config.max_retries {
            if !state.synchronized {
                self.synchronize(&mut state)?;
            }

            let mapped_path = state
                .strategy
                .position_map()
                .get(address)
                .map(|entry| entry.path_id)
                .filter(|_| is_real_access);
            let path_id =
                mapped_path.unwrap_or_else(|| random_path(self.parameters.height, rng));

            let PathAndStash {
                corresponds,
                stash,
                path,
            } = match (Request::GetPathAndStash {
                oram_id: self.oram_id,
                version: state.version,
                path_id,
            })
            .send_ordered(&self.proxy)?
            {
                Response::PathAndStash(reply) => reply,
                Response::Failure(reason) => return Err(reason.into()),
                _ => return Err(OramError::UnexpectedReply),
            };

            if !corresponds {
                log::debug!("Attempt {}: version {} is stale", attempt, state.version);
                state.synchronized = false;
                continue;
            }

            let mut stash = match stash {
                Some(ciphertext) => Stash::from_bytes(&self.cipher.decrypt(&ciphertext)?)?,
                None => Stash::new(),
            };
            let mut path = path.ok_or(OramError::UnexpectedReply)?;
            stash.read_from_path(&mut path);

            let previous = if is_real_access {
                stash.get(address).map(<[u8]>::to_vec)
            } else {
                None
            };

            let checkpoint = state.strategy.clone();
            let new_version = state.version + 1;
            let pending = PendingEviction {
                operation,
                address,
                value: value.as_deref(),
                is_real_access,
                path_id,
                new_path_id: random_path(self.parameters.height, rng),
                new_version,
            };

            match self.evict(&mut state.strategy, stash, pending) {
                Ok(Response::Success) => {
                    state.version = new_version;
                    return Ok(previous);
                }
                Ok(Response::Failure(FailureReason::VersionMismatch { current, .. })) => {
                    log::debug!(
                        "Attempt {}: eviction at version {} lost to version {}",
                        attempt,
                        new_version,
                        current
                    );
                    state.strategy = checkpoint;
                    state.synchronized = false;
                }
                Ok(Response::Failure(reason)) => {
                    state.strategy = checkpoint;
                    return Err(reason.into());
                }
                Ok(_) => {
                    state.strategy = checkpoint;
                    return Err(OramError::UnexpectedReply);
                }
                Err(error) => {
                    state.strategy = checkpoint;
                    return Err(error);
                }
            }
        }

        log::warn!(
            "Access to address {} failed after {} attempts",
            address,
            self.config.max_retries
        );
        Err(OramError::RetriesExhausted(self.config.max_retries))
    }

    /// Applies the update rule to `strategy`, rebuilds the read path out of `stash` and
    /// submits the eviction. The caller restores `strategy` unless this returns `Success`.
    fn evict(
        &self,
        strategy: &mut S,
        mut stash: Stash,
        pending: PendingEviction<'_>,
    ) -> Result<Response, OramError> {
        let position_map_payload = strategy.update_position_map(
            pending.operation,
            pending.address,
            pending.is_real_access,
            pending.new_path_id,
            pending.new_version,
        )?;
        if let Some(value) = pending.value {
            stash.put(Block::new(pending.address, value.to_vec()));
        }

        let new_path = stash.write_to_path(
            pending.path_id,
            self.parameters.path_levels(),
            self.parameters.bucket_capacity,
            strategy.position_map(),
        );
        log::debug!(
            "Evicting path {} at version {}, {} blocks left in stash",
            pending.path_id,
            pending.new_version,
            stash.occupancy()
        );

        Request::Evict(EvictRequest {
            oram_id: self.oram_id,
            new_version: pending.new_version,
            position_map: self.cipher.encrypt(&position_map_payload),
            stash: self.cipher.encrypt(&stash.to_bytes()?),
            path_id: pending.path_id,
            path: new_path,
        })
        .send_ordered(&self.proxy)
    }
}
