// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

#![allow(clippy::uninlined_format_args)] // Test/bench code readability over pedantic
#![allow(clippy::cast_precision_loss)] // Stats/metrics need this
#![allow(clippy::cast_sign_loss)] // Test data conversions
#![allow(clippy::cast_possible_truncation)] // Test parameters
#![allow(clippy::float_cmp)] // Test assertions with constants
#![allow(clippy::missing_panics_doc)] // Tests panic on failure
#![allow(clippy::items_after_statements)] // Test helpers

//! End-to-end scenarios: publish through a mapping, read back through the
//! file, and check the wire-level invariants a cold consumer relies on.

use mmetrics::{aggregate, layout, MmapRegion, Stat, StatsBuilder, StatsReader, Value};
use std::collections::HashSet;
use std::path::PathBuf;

fn temp_path(dir: &tempfile::TempDir, name: &str) -> PathBuf {
    dir.path().join(name)
}

fn read_all(path: &std::path::Path) -> Vec<Stat> {
    StatsReader::from_file(path).expect("open").collect()
}

#[test]
fn test_two_publishers_are_disjoint() {
    let dir = tempfile::tempdir().unwrap();

    let mut ba = StatsBuilder::new();
    let a_blue = ba.uint32("blue");
    let a_red = ba.uint32("red");
    let mut a = ba.create(temp_path(&dir, "a.mmetrics")).unwrap();

    let mut bb = StatsBuilder::new();
    let b_blue = bb.uint32("blue");
    bb.uint32("red");
    let mut b = bb.create(temp_path(&dir, "b.mmetrics")).unwrap();

    a.set(a_blue, 1);
    a.set(a_red, 2);
    b.set(b_blue, 42);

    assert_eq!(a.get(a_blue), 1);
    assert_eq!(a.get(a_red), 2);
    assert_eq!(b.get(b_blue), 42);

    let a_stats = read_all(a.path().unwrap());
    let b_stats = read_all(b.path().unwrap());
    assert_eq!(
        a_stats,
        vec![
            Stat {
                label: "blue".into(),
                value: Value::UInt(1)
            },
            Stat {
                label: "red".into(),
                value: Value::UInt(2)
            },
        ]
    );
    assert_eq!(
        b_stats,
        vec![
            Stat {
                label: "blue".into(),
                value: Value::UInt(42)
            },
            Stat {
                label: "red".into(),
                value: Value::UInt(0)
            },
        ]
    );

    let a_bytes = std::fs::read(a.path().unwrap()).unwrap();
    let b_bytes = std::fs::read(b.path().unwrap()).unwrap();
    assert_ne!(a_bytes, b_bytes);
}

#[test]
fn test_reader_yields_declaration_order_with_last_values() {
    let dir = tempfile::tempdir().unwrap();

    let mut builder = StatsBuilder::new();
    let g = builder.uint64("one");
    let c = builder.counter("two");
    let s = builder.string("three", 8);
    builder.flag("four", true);
    let mut stats = builder.create(temp_path(&dir, "order.mmetrics")).unwrap();

    for i in 1..=5u64 {
        stats.set(g, i);
    }
    stats.counter(c).add(7);
    stats.set_string(s, "hi");

    let parsed = read_all(stats.path().unwrap());
    let labels: Vec<&str> = parsed.iter().map(|s| s.label.as_str()).collect();
    assert_eq!(labels, vec!["one", "two", "three", "four"]);
    assert_eq!(parsed[0].value, Value::UInt(5));
    assert_eq!(parsed[1].value, Value::UInt(7));
    assert_eq!(parsed[2].value, Value::Str("hi".into()));
    assert_eq!(parsed[3].value, Value::Bool(true));
}

#[test]
fn test_wire_invariants() {
    let dir = tempfile::tempdir().unwrap();

    let mut builder = StatsBuilder::new();
    builder.with_system_fields();
    builder.uint32("gauge");
    builder.counter("hits");
    builder.string("name", 12);
    let stats = builder.create(temp_path(&dir, "wire.mmetrics")).unwrap();

    let bytes = std::fs::read(stats.path().unwrap()).unwrap();

    // Version tag, and a page-multiple file length.
    assert_eq!(bytes[0], layout::FORMAT_VERSION);
    assert_eq!(bytes.len() % MmapRegion::page_size(), 0);

    // Walk raw records: unique labels, consistent sizes, valid index
    // bytes, and a zero byte right after the last record.
    let mut seen = HashSet::new();
    let mut off = 1usize;
    loop {
        let label_sz =
            usize::from(u16::from_le_bytes([bytes[off], bytes[off + 1]]));
        if label_sz == 0 {
            break;
        }
        let label = String::from_utf8(bytes[off + 2..off + 2 + label_sz].to_vec()).unwrap();
        assert!(seen.insert(label), "duplicate label in mapping");
        off += 2 + label_sz;

        let type_sz = usize::from(u16::from_le_bytes([bytes[off], bytes[off + 1]]));
        assert!(type_sz > 0);
        let sig = std::str::from_utf8(&bytes[off + 2..off + 2 + type_sz]).unwrap();
        let width = layout::signature_width(sig).expect("known signature");
        off += 2 + type_sz;

        let buf_idx = bytes[off];
        assert!(buf_idx == 0 || buf_idx == 1 || buf_idx == layout::UNBUFFERED);
        off += 1;
        off += if buf_idx == layout::UNBUFFERED {
            width
        } else {
            2 * width
        };
    }
    assert_eq!(bytes[off], 0, "end-of-records marker must be zero");
}

#[test]
fn test_float_widths_differ() {
    let dir = tempfile::tempdir().unwrap();

    let mut builder = StatsBuilder::new();
    let f = builder.float32("f");
    let d = builder.float64("d");
    let mut stats = builder.create(temp_path(&dir, "floats.mmetrics")).unwrap();

    let third = 1.0f64 / 3.0;
    stats.set(f, third as f32);
    stats.set(d, third);

    let parsed = read_all(stats.path().unwrap());
    let Value::Float(rf) = parsed[0].value else {
        panic!("f32 field should decode as float");
    };
    let Value::Float(rd) = parsed[1].value else {
        panic!("f64 field should decode as float");
    };

    assert!(rf > 0.3 && rf < 0.4);
    assert!(rd > 0.3 && rd < 0.4);
    // The widths round differently: bit-for-bit inequality is the point.
    assert_ne!(rf, rd);
    assert_eq!(rd, third);
}

#[test]
fn test_non_finite_floats_roundtrip() {
    let dir = tempfile::tempdir().unwrap();

    let mut builder = StatsBuilder::new();
    let d = builder.float64("d");
    let mut stats = builder.create(temp_path(&dir, "nan.mmetrics")).unwrap();

    stats.set(d, f64::NAN);
    let parsed = read_all(stats.path().unwrap());
    let Value::Float(v) = parsed[0].value else {
        panic!("expected float");
    };
    assert!(v.is_nan());

    stats.set(d, f64::INFINITY);
    assert_eq!(stats.get(d), f64::INFINITY);
}

#[test]
fn test_moving_average_thousand_ones() {
    let dir = tempfile::tempdir().unwrap();

    let mut builder = StatsBuilder::new();
    let key = builder.moving_average("ma", 100);
    let mut stats = builder.create(temp_path(&dir, "ma.mmetrics")).unwrap();

    for _ in 0..1000 {
        stats.moving_average(key).add(1.0);
    }
    assert_eq!(stats.moving_average(key).value(), 1.0);

    let parsed = read_all(stats.path().unwrap());
    assert_eq!(parsed[0].value, Value::Float(1.0));
}

#[test]
fn test_moving_average_bounded_by_last_window() {
    let dir = tempfile::tempdir().unwrap();
    let window = 50usize;

    let mut builder = StatsBuilder::new();
    let key = builder.moving_average("ma", window);
    let mut stats = builder.create(temp_path(&dir, "bound.mmetrics")).unwrap();

    // Feed 1..=2W: only W+1..=2W remain in the window.
    for i in 1..=(2 * window) {
        stats.moving_average(key).add(i as f64);
    }
    let value = stats.moving_average(key).value();
    let last_block_mean = ((window + 1)..=(2 * window)).sum::<usize>() as f64 / window as f64;
    assert_eq!(value, last_block_mean);
}

#[test]
fn test_timer_elapsed_seconds() {
    let dir = tempfile::tempdir().unwrap();

    let mut builder = StatsBuilder::new();
    let key = builder.timer("t");
    let mut stats = builder.create(temp_path(&dir, "timer.mmetrics")).unwrap();

    let mut t = stats.timer(key);
    t.start();
    std::thread::sleep(std::time::Duration::from_millis(5));
    assert_eq!(t.value(), 0.0, "no publication until the scope closes");
    let elapsed = t.stop();

    assert!(elapsed >= 0.005);
    assert!(elapsed < 5.0, "elapsed {elapsed}s is implausible");
    assert_eq!(t.last(), elapsed);
    assert_eq!(t.value(), elapsed, "first sample is the window mean");
}

#[test]
fn test_aggregate_across_files() {
    let dir = tempfile::tempdir().unwrap();
    let mut paths = Vec::new();

    for (i, value) in [1u32, 2, 3, 4].iter().enumerate() {
        let mut builder = StatsBuilder::new();
        let g = builder.uint32("req.count");
        let mut stats = builder
            .create(temp_path(&dir, &format!("agg{i}.mmetrics")))
            .unwrap();
        stats.set(g, *value);
        paths.push(stats.path().unwrap().to_path_buf());
    }

    let readers: Vec<_> = paths
        .iter()
        .map(|p| StatsReader::from_file(p).unwrap())
        .collect();
    let summaries = aggregate(readers);
    let s = &summaries["req.count"];

    assert_eq!(s.count(), 4);
    assert_eq!(s.sum, 10.0);
    assert_eq!(s.mean, 2.5);
    assert_eq!(s.median, 3.0);
    assert_eq!(s.percentile(0.5), 2.5);
}

#[test]
fn test_reader_sees_live_updates_through_the_file() {
    let dir = tempfile::tempdir().unwrap();

    let mut builder = StatsBuilder::new();
    let g = builder.uint64("live");
    let mut stats = builder.create(temp_path(&dir, "live.mmetrics")).unwrap();
    let path = stats.path().unwrap().to_path_buf();

    for i in [1u64, 10, 100] {
        stats.set(g, i);
        // A shared file mapping needs no flush for other processes (or a
        // fresh read) to observe the store.
        let parsed = read_all(&path);
        assert_eq!(parsed[0].value, Value::UInt(i));
    }
}

#[test]
fn test_concurrent_reader_never_sees_torn_values() {
    let dir = tempfile::tempdir().unwrap();

    let mut builder = StatsBuilder::new();
    let g = builder.uint64("seq");
    let mut stats = builder.create(temp_path(&dir, "torn.mmetrics")).unwrap();
    let path = stats.path().unwrap().to_path_buf();

    const WRITES: u64 = 20_000;
    let writer = std::thread::spawn(move || {
        for i in 1..=WRITES {
            stats.set(g, i);
        }
        stats
    });

    // Every value decoded mid-flight must be one the writer actually
    // published. A torn read would show up as a hybrid of two counts.
    while !writer.is_finished() {
        for stat in read_all(&path) {
            let Value::UInt(v) = stat.value else {
                panic!("unexpected value kind");
            };
            assert!(v <= WRITES, "impossible value {v}");
        }
    }

    let stats = writer.join().unwrap();
    assert_eq!(stats.get(g), WRITES);
    let parsed = read_all(&path);
    assert_eq!(parsed[0].value, Value::UInt(WRITES));
}

#[test]
fn test_randomized_labels_roundtrip() {
    let dir = tempfile::tempdir().unwrap();

    let labels: Vec<String> = (0..32)
        .map(|i| format!("field.{}.{i}", fastrand::u32(..)))
        .collect();

    let mut builder = StatsBuilder::new();
    let keys: Vec<_> = labels.iter().map(|l| builder.uint64(l)).collect();
    let mut stats = builder.create(temp_path(&dir, "rand.mmetrics")).unwrap();

    let values: Vec<u64> = keys
        .iter()
        .map(|&k| {
            let v = u64::from(fastrand::u32(..));
            stats.set(k, v);
            v
        })
        .collect();

    let parsed = read_all(stats.path().unwrap());
    assert_eq!(parsed.len(), labels.len());
    for ((stat, label), value) in parsed.iter().zip(&labels).zip(&values) {
        assert_eq!(&stat.label, label);
        assert_eq!(stat.value, Value::UInt(*value));
    }
}
