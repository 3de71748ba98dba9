// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # mmetrics - lock-free memory-mapped process metrics
//!
//! Producers declare named fields once, then publish updates into a
//! memory-mapped file. Any out-of-process consumer can open that file and
//! decode current values without taking locks and without the producer's
//! cooperation: every update leaves the mapping in a state where a
//! concurrent reader sees either the previous or the next consistent
//! value, never a torn one.
//!
//! ## Quick Start
//!
//! ```no_run
//! use mmetrics::{MmStats, Result, StatsReader};
//!
//! fn main() -> Result<()> {
//!     let mut builder = MmStats::builder();
//!     builder.with_system_fields();
//!     let requests = builder.counter("web.requests");
//!     let latency = builder.timer("web.latency");
//!
//!     let mut stats = builder.create("/tmp/web-1234-1234.mmetrics")?;
//!     stats.counter(requests).inc();
//!     stats.timer(latency).time(|| {
//!         // handle a request
//!     });
//!
//!     // Any process can read it back.
//!     for stat in StatsReader::from_file("/tmp/web-1234-1234.mmetrics")? {
//!         println!("{} = {}", stat.label, stat.value);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! +---------------------------------------------------------------+
//! |  Producer                          Consumers (any process)    |
//! |  StatsBuilder -> MmStats           StatsReader   aggregate()  |
//! |        |            |                   ^            ^        |
//! |        v            v                   |            |        |
//! |  +---------------------------------------------------------+ |
//! |  | mapping: [version][field record][field record]...[0...] | |
//! |  +---------------------------------------------------------+ |
//! |        MmapRegion (page-aligned, file-backed, MAP_SHARED)     |
//! +---------------------------------------------------------------+
//! ```
//!
//! Double-buffered fields commit each write with a release-ordered flip
//! of their index byte; readers pick the stable slot with an acquire
//! load. One thread of execution owns the writes to any given field;
//! readers are unbounded and never coordinate.
//!
//! ## Modules Overview
//!
//! - [`publisher`] - field declaration and the single-writer publisher
//! - [`reader`] - tolerant streaming parser for metric files
//! - [`aggregate`] - per-label summaries across many files
//! - [`group`] - several named field groups sharing one mapping
//! - [`clean`] - stale-file janitor
//! - [`layout`] / [`mmap`] - binary format and mapping primitives
//! - [`config`] - publication defaults and environment overrides

use std::fmt;
use std::io;

/// Per-label summaries over many metric streams.
pub mod aggregate;
/// Stale-file janitor (POSIX pid probe lives here, not in the core).
pub mod clean;
/// Publication defaults, resolvable from the environment.
pub mod config;
/// Field kinds, type signatures, and slot encoding.
pub mod fields;
/// Field-group template: shared mapping, prefixed labels.
pub mod group;
/// Binary layout constants and record framing.
pub mod layout;
/// File-backed mapping management.
pub mod mmap;
/// Field declaration and the single-writer publisher.
pub mod publisher;
/// Version-gated streaming parser.
pub mod reader;

pub use aggregate::{aggregate, Summary, PERCENTILES};
pub use clean::{reap_stale, ReapReport};
pub use config::Config;
pub use fields::{FieldKind, Scalar, Value};
pub use group::{GroupBuilder, GroupTemplate};
pub use mmap::{Flush, MmapRegion};
pub use publisher::{
    Average, AverageKey, BoolKey, ByteKey, Counter, CounterKey, GaugeKey, MmStats, MovingAvg,
    MovingAvgKey, StatsBuilder, StringKey, Timer, TimerKey,
};
pub use reader::{Stat, StatsReader};

/// Errors surfaced by construction and by readers.
///
/// Steady-state writes never produce one of these: after a publisher is
/// constructed, writes either succeed or deterministically no-op.
#[derive(Debug)]
pub enum Error {
    /// Backing file creation failed
    Create(io::Error),

    /// Backing file truncate/extend failed
    Truncate(io::Error),

    /// Memory mapping failed
    Mmap(io::Error),

    /// msync failed
    Msync(io::Error),

    /// Metrics file open failed
    Open(io::Error),

    /// Reading a metrics stream failed
    Read(io::Error),

    /// Two fields declared with the same label
    DuplicateLabel(String),

    /// Empty label, or label longer than its length prefix can carry
    InvalidLabel(String),

    /// Version byte is not a format this parser understands
    UnsupportedVersion(u8),

    /// Frame ended before its declared contents
    TruncatedFrame,

    /// Type signature with no known slot width
    UnknownSignature(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Create(e) => write!(f, "backing file creation failed: {e}"),
            Self::Truncate(e) => write!(f, "backing file truncate failed: {e}"),
            Self::Mmap(e) => write!(f, "memory mapping failed: {e}"),
            Self::Msync(e) => write!(f, "mapping flush failed: {e}"),
            Self::Open(e) => write!(f, "metrics file open failed: {e}"),
            Self::Read(e) => write!(f, "metrics stream read failed: {e}"),
            Self::DuplicateLabel(label) => write!(f, "duplicate field label: {label}"),
            Self::InvalidLabel(label) => write!(f, "invalid field label: {label:?}"),
            Self::UnsupportedVersion(v) => write!(f, "unsupported format version: {v}"),
            Self::TruncatedFrame => write!(f, "truncated field record"),
            Self::UnknownSignature(sig) => write!(f, "unknown type signature: {sig:?}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Create(e)
            | Self::Truncate(e)
            | Self::Mmap(e)
            | Self::Msync(e)
            | Self::Open(e)
            | Self::Read(e) => Some(e),
            _ => None,
        }
    }
}

/// Result type for mmetrics operations.
pub type Result<T> = std::result::Result<T, Error>;
