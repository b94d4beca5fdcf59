// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This source code is dual-licensed under either the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree or the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree. You may select, at your option, one of the above-listed licenses.

//! A simple interactive demonstration of two clients sharing a replicated ORAM.

use rand::rngs::OsRng;
use replicated_oram::{
    ClientConfig, LocalServiceProxy, OramClient, OramParameters, PlaintextCipher,
    TriplePositionMap,
};
use rustyline::history::FileHistory;
use rustyline::Editor;

fn parse_number(
    prompt: &str,
    rl: &mut Editor<(), FileHistory>,
) -> Result<u64, Box<dyn std::error::Error>> {
    Ok(loop {
        println!("{}", prompt);
        println!();
        let readline: String = rl.readline("> ")?;
        let number_parse = readline.parse::<u64>();
        match number_parse {
            Ok(number) => break number,
            Err(_) => {
                println!("Expected a number. Try again.");
                continue;
            }
        }
    })
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut rng = OsRng;

    let mut rl = Editor::<(), _>::new()?;

    let height = parse_number("How tall should the tree be?", &mut rl)?;
    let parameters = OramParameters::new(u32::try_from(height)?, 4, 8)?;

    let proxy = LocalServiceProxy::new(4);
    let clients = [
        OramClient::<TriplePositionMap, _, _>::create(
            1,
            parameters,
            ClientConfig::default(),
            proxy.clone(),
            PlaintextCipher,
        )?,
        OramClient::connect(1, ClientConfig::default(), proxy, PlaintextCipher)?,
    ];

    loop {
        let action = loop {
            println!("Enter an option (R or W):");
            println!("R) Read");
            println!("W) Write");
            let action: String = rl.readline("> ")?;
            if (action != "R") & (action != "W") {
                println!("Try again.");
                continue;
            }
            break action;
        };

        let client = parse_number("Which client (0 or 1)?", &mut rl)?;
        let Some(client) = clients.get(usize::try_from(client)?) else {
            println!("No such client.");
            continue;
        };
        let address = u32::try_from(parse_number("What address?", &mut rl)?)?;

        if action == "R" {
            match client.read(address, &mut rng)? {
                Some(bytes) => println!(
                    "Value at {} is {} (version {}).",
                    address,
                    u64::from_le_bytes(bytes.as_slice().try_into()?),
                    client.version()
                ),
                None => println!("Address {} was never written.", address),
            }
        }

        if action == "W" {
            let value = parse_number("Value to write?", &mut rl)?;
            client.write(address, value.to_le_bytes().to_vec(), &mut rng)?;
            println!("Wrote value {} to address {}.", value, address);
        }
    }
}
