// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This source code is dual-licensed under either the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree or the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree. You may select, at your option, one of the above-listed licenses.

//! A very simple demonstration of the use of a replicated ORAM.

extern crate replicated_oram;

use rand::rngs::OsRng;
use replicated_oram::{
    ClientConfig, LocalServiceProxy, OramClient, OramError, OramParameters, PlaintextCipher,
    TriplePositionMap,
};

fn main() -> Result<(), OramError> {
    let mut rng = OsRng;
    let proxy = LocalServiceProxy::new(4);

    let alice = OramClient::<TriplePositionMap, _, _>::create(
        1,
        OramParameters::new(3, 4, 8)?,
        ClientConfig::default(),
        proxy.clone(),
        PlaintextCipher,
    )?;
    let bob = OramClient::<TriplePositionMap, _, _>::connect(
        1,
        ClientConfig::default(),
        proxy,
        PlaintextCipher,
    )?;

    alice.write(10, 42u64.to_le_bytes().to_vec(), &mut rng)?;
    println!("{:?}", bob.read(10, &mut rng)?);
    Ok(())
}
