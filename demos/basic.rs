// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Publish a handful of fields, then read the file back like a cold
//! consumer would.
//!
//! ```sh
//! cargo run --example basic
//! ```

use mmetrics::{Config, MmStats, StatsReader};

fn main() -> mmetrics::Result<()> {
    let config = Config::from_env();
    let path = config.path_for("basic-demo.mmetrics");

    let mut builder = MmStats::builder();
    builder.with_system_fields();
    let requests = builder.counter("web.requests");
    let errors = builder.counter("web.errors");
    let latency = builder.timer("web.latency");
    let state = builder.string("web.state", 32);

    let mut stats = builder.create(&path)?;
    stats.set_string(state, "serving");

    for i in 0..100u32 {
        stats.timer(latency).time(|| {
            std::thread::sleep(std::time::Duration::from_micros(50));
        });
        stats.counter(requests).inc();
        if i % 25 == 0 {
            stats.counter(errors).inc();
        }
    }

    println!("published {} bytes to {}", stats.size(), path.display());
    println!();

    for stat in StatsReader::from_file(&path)? {
        println!("  {:<24} {}", stat.label, stat.value);
    }

    stats.remove();
    Ok(())
}
