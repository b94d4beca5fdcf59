// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This source code is dual-licensed under either the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree or the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree. You may select, at your option, one of the above-listed licenses.

//! This module contains common test utilities for the client, the replicas and the
//! position map strategies.

use std::collections::HashSet;
use std::sync::Once;
static INIT: Once = Once::new();
use crate::bucket::Block;
use crate::client::{ClientConfig, OramClient};
use crate::codec::Decode;
use crate::crypto::{Cipher, PlaintextCipher};
use crate::position_map::PositionMapStrategy;
use crate::stash::Stash;
use crate::transport::LocalServiceProxy;
use crate::tree::{OramParameters, DEFAULT_BUCKET_CAPACITY};
use crate::{Address, BlockSize, OramId};
use rand::{rngs::StdRng, CryptoRng, Rng, RngCore, SeedableRng};
use simplelog::{Config, WriteLogger};

// For use in manual testing and inspection.
pub(crate) fn init_logger() {
    INIT.call_once(|| {
        WriteLogger::init(log::LevelFilter::Info, Config::default(), std::io::stdout()).unwrap()
    })
}

const TEST_ORAM_ID: OramId = 1;

const MAXIMUM_EXPECTED_STASH_SIZE: usize = 20;

/// Decrypts the stash blob of instance `oram_id` held by replica `replica`.
pub(crate) fn server_stash<C: Cipher>(
    proxy: &LocalServiceProxy,
    replica: usize,
    oram_id: OramId,
    cipher: &C,
) -> Stash {
    let manager = proxy.replica(replica).unwrap().lock();
    let tree = manager.get(oram_id).unwrap();
    Stash::from_bytes(&cipher.decrypt(tree.stash()).unwrap()).unwrap()
}

/// Returns every block of instance `oram_id` held by replica `replica`, in the tree or the stash.
pub(crate) fn collect_blocks<C: Cipher>(
    proxy: &LocalServiceProxy,
    replica: usize,
    oram_id: OramId,
    cipher: &C,
) -> Vec<Block> {
    let mut blocks: Vec<Block> = {
        let manager = proxy.replica(replica).unwrap().lock();
        manager
            .get(oram_id)
            .unwrap()
            .get_tree()
            .into_values()
            .flat_map(|mut bucket| bucket.take_blocks())
            .collect()
    };
    blocks.extend(server_stash(proxy, replica, oram_id, cipher).drain());
    blocks
}

/// A single client over a single replica that checks, after every access, that the access
/// touched exactly one path, that every written block is held exactly once, and that the
/// stash stays small.
pub(crate) struct MonitoredOram<S> {
    client: OramClient<S, LocalServiceProxy, PlaintextCipher>,
    proxy: LocalServiceProxy,
    written: HashSet<Address>,
}

impl<S: PositionMapStrategy> MonitoredOram<S> {
    pub(crate) fn new(block_size: BlockSize, block_capacity: Address) -> Self {
        let height = block_capacity.next_power_of_two().ilog2().max(1);
        let parameters = OramParameters::new(height, DEFAULT_BUCKET_CAPACITY, block_size).unwrap();
        let proxy = LocalServiceProxy::new(1);
        let client = OramClient::create(
            TEST_ORAM_ID,
            parameters,
            ClientConfig::default(),
            proxy.clone(),
            PlaintextCipher,
        )
        .unwrap();
        Self {
            client,
            proxy,
            written: HashSet::new(),
        }
    }

    pub(crate) fn read<R: RngCore + CryptoRng>(
        &mut self,
        address: Address,
        rng: &mut R,
    ) -> Option<Vec<u8>> {
        self.access(address, None, rng)
    }

    pub(crate) fn write<R: RngCore + CryptoRng>(
        &mut self,
        address: Address,
        value: Vec<u8>,
        rng: &mut R,
    ) -> Option<Vec<u8>> {
        self.written.insert(address);
        self.access(address, Some(value), rng)
    }

    fn physical_access_counts(&self) -> (u64, u64) {
        let manager = self.proxy.replica(0).unwrap().lock();
        let memory = manager.get(TEST_ORAM_ID).unwrap().physical_memory();
        (memory.get_read_count(), memory.get_write_count())
    }

    fn access<R: RngCore + CryptoRng>(
        &mut self,
        address: Address,
        value: Option<Vec<u8>>,
        rng: &mut R,
    ) -> Option<Vec<u8>> {
        let (pre_read_count, pre_write_count) = self.physical_access_counts();

        let result = match value {
            Some(value) => self.client.write(address, value, rng),
            None => self.client.read(address, rng),
        }
        .unwrap();

        let (post_read_count, post_write_count) = self.physical_access_counts();
        let levels = self.client.parameters().path_levels() as u64;
        assert_eq!(post_read_count - pre_read_count, levels);
        assert_eq!(post_write_count - pre_write_count, levels);

        let blocks = collect_blocks(&self.proxy, 0, TEST_ORAM_ID, &PlaintextCipher);
        let distinct: HashSet<Address> = blocks.iter().map(|block| block.key).collect();
        assert_eq!(blocks.len(), self.written.len());
        assert_eq!(distinct, self.written);

        let stash_size = server_stash(&self.proxy, 0, TEST_ORAM_ID, &PlaintextCipher).occupancy();
        assert!(stash_size < MAXIMUM_EXPECTED_STASH_SIZE);

        result
    }
}

fn random_block_value<R: Rng>(block_size: BlockSize, rng: &mut R) -> Vec<u8> {
    (0..block_size).map(|_| rng.gen()).collect()
}

/// Tests the correctness of strategy S on a workload of random reads and writes.
pub(crate) fn test_correctness_random_workload<S: PositionMapStrategy>(
    block_size: BlockSize,
    capacity: Address,
    num_operations: u32,
) {
    init_logger();
    let mut rng = StdRng::seed_from_u64(0);

    let mut oram = MonitoredOram::<S>::new(block_size, capacity);
    let mut mirror_array: Vec<Option<Vec<u8>>> = vec![None; capacity as usize];

    for _ in 0..num_operations {
        let random_index = rng.gen_range(0..capacity);
        let value = random_block_value(block_size, &mut rng);

        let read_versus_write = rng.gen::<bool>();

        if read_versus_write {
            assert_eq!(
                oram.read(random_index, &mut rng),
                mirror_array[random_index as usize]
            );
        } else {
            let previous = oram.write(random_index, value.clone(), &mut rng);
            assert_eq!(previous, mirror_array[random_index as usize]);
            mirror_array[random_index as usize] = Some(value);
        }
    }

    for index in 0..capacity {
        assert_eq!(
            oram.read(index, &mut rng),
            mirror_array[index as usize],
            "{index}"
        )
    }
}

/// Tests the correctness of strategy S on repeated passes of sequential accesses
/// 0, 1, ..., `capacity`.
pub(crate) fn test_correctness_linear_workload<S: PositionMapStrategy>(
    block_size: BlockSize,
    capacity: Address,
    num_operations: u32,
) {
    init_logger();
    let mut rng = StdRng::seed_from_u64(0);

    let mut oram = MonitoredOram::<S>::new(block_size, capacity);
    let mut mirror_array: Vec<Option<Vec<u8>>> = vec![None; capacity as usize];

    let num_passes = num_operations / capacity;

    for _ in 0..num_passes {
        for index in 0..capacity {
            let value = random_block_value(block_size, &mut rng);

            let read_versus_write: bool = rng.gen::<bool>();

            if read_versus_write {
                assert_eq!(oram.read(index, &mut rng), mirror_array[index as usize]);
            } else {
                oram.write(index, value.clone(), &mut rng);
                mirror_array[index as usize] = Some(value);
            }
        }
    }

    for index in 0..capacity {
        assert_eq!(
            oram.read(index, &mut rng),
            mirror_array[index as usize],
            "{index}"
        )
    }
}

macro_rules! create_correctness_test {
    ($function_name:ident, $strategy: ident, $block_size: expr, $block_capacity:expr, $iterations_to_test: expr) => {
        paste::paste! {
            #[test]
            fn [<$function_name _ $strategy:snake _ $block_capacity _ $block_size _ $iterations_to_test>]() {
                $function_name::<$strategy>($block_size, $block_capacity, $iterations_to_test);
            }
        }
    };
}

macro_rules! create_correctness_tests_for_workload_and_strategy {
    ($function_name: ident, $strategy: ident) => {
        create_correctness_test!($function_name, $strategy, 2, 2, 10);
        create_correctness_test!($function_name, $strategy, 4, 8, 100);
        create_correctness_test!($function_name, $strategy, 8, 16, 100);
        create_correctness_test!($function_name, $strategy, 4, 32, 100);
        // Block size 16 bytes, block capacity 64 blocks, testing with 200 operations
        create_correctness_test!($function_name, $strategy, 16, 64, 200);
        create_correctness_test!($function_name, $strategy, 2, 8, 1000);
    };
}

macro_rules! create_correctness_tests_for_strategy {
    ($strategy: ident) => {
        create_correctness_tests_for_workload_and_strategy!(
            test_correctness_linear_workload,
            $strategy
        );
        create_correctness_tests_for_workload_and_strategy!(
            test_correctness_random_workload,
            $strategy
        );
    };
}

pub(crate) use create_correctness_test;
pub(crate) use create_correctness_tests_for_strategy;
pub(crate) use create_correctness_tests_for_workload_and_strategy;
