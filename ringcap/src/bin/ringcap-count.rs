// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2024 Nathaniel Bennett <me[at]nathanielbennett[dotcom]>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Count captured packets per link-layer protocol.
//!
//! Usage: ringcap-count <interface>
//!
//! Requires `CAP_NET_RAW`. Set `RUST_LOG=debug` to see ring setup details.

use std::collections::BTreeMap;
use std::env;
use std::time::{Duration, Instant};

use ringcap::{drain, open_interface, CaptureConfig, Interface};

const REPORT_INTERVAL: Duration = Duration::from_secs(5);
const DRAIN_BUDGET: usize = 256;

fn main() -> ringcap::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args: Vec<String> = env::args().collect();
    if args.len() != 2 {
        eprintln!("Usage: {} <interface>", args[0]);
        std::process::exit(1);
    }

    let iface = match args[1].as_str() {
        "any" => Interface::any(),
        name => Interface::new_raw(name.as_bytes())?,
    };

    let mut capture = open_interface(iface, libc::ETH_P_ALL as u16, &CaptureConfig::default())?;
    log::info!("capturing on {} using {:?}", args[1], capture.method());

    let mut counts: BTreeMap<u16, u64> = BTreeMap::new();
    let mut bytes = 0u64;
    let mut last_report = Instant::now();

    loop {
        if capture.socket().poll_readable(Some(REPORT_INTERVAL))? {
            while drain(capture.as_mut(), DRAIN_BUDGET, |packet| {
                *counts.entry(packet.protocol()).or_default() += 1;
                bytes += packet.len() as u64;
            }) == DRAIN_BUDGET
            {}
        }

        if last_report.elapsed() >= REPORT_INTERVAL {
            for (protocol, count) in &counts {
                log::info!("ethertype {:#06x}: {} packets", protocol, count);
            }

            let stats = capture.stats();
            let kernel = capture.socket().packet_stats()?;
            log::info!(
                "{} packets ({} bytes), {} blocks released, {} malformed; kernel saw {} and dropped {}",
                stats.packets(),
                bytes,
                stats.blocks_released(),
                stats.malformed_blocks(),
                kernel.packets_seen(),
                kernel.packets_dropped()
            );

            last_report = Instant::now();
        }
    }
}
