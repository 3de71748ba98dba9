// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Stale metrics file janitor.
//!
//! Producers that exit uncleanly leave their files behind; nothing in the
//! format marks them dead, so a sweeper decides liveness by probing the
//! published `sys.pid` with `kill(pid, 0)`. That probe is POSIX-specific
//! and deliberately lives here, at the edge, rather than in the core
//! read/write path: the file format itself carries no platform
//! assumptions.
//!
//! A process-wide lock serializes sweeps so two threads reaping sibling
//! per-thread files cannot race each other's unlinks.

use crate::fields::Value;
use crate::reader::StatsReader;
use parking_lot::Mutex;
use std::io;
use std::path::Path;

/// Serializes concurrent sweeps within this process.
static SWEEP_LOCK: Mutex<()> = Mutex::new(());

/// Outcome of one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReapReport {
    /// Files unlinked because their producer is gone.
    pub removed: usize,
    /// Files whose producer is still running (or owned by another user).
    pub alive: usize,
}

/// Sweep `files`, removing those whose publishing process no longer
/// exists.
///
/// Per file: directories are skipped; unreadable or unparsable files are
/// skipped with a log line; a file with no label ending in `sys.pid` is
/// skipped (there is no safe liveness signal without one). `ESRCH` from
/// the probe means the pid is free and the file is unlinked; `EPERM`
/// means the pid is alive but owned by another user, so the file is left
/// alone.
pub fn reap_stale<I, P>(files: I) -> ReapReport
where
    I: IntoIterator<Item = P>,
    P: AsRef<Path>,
{
    let _guard = SWEEP_LOCK.lock();
    let mut report = ReapReport::default();

    for file in files {
        let path = file.as_ref();
        if path.is_dir() {
            continue;
        }

        let reader = match StatsReader::from_file(path) {
            Ok(r) => r,
            Err(e) => {
                log::debug!("[MM] janitor skipping {}: {e}", path.display());
                continue;
            }
        };

        let Some(pid) = find_pid(reader) else {
            log::debug!("[MM] {} has no sys.pid field, skipping", path.display());
            continue;
        };

        match probe(pid) {
            Liveness::Alive => report.alive += 1,
            Liveness::OtherUser => {
                log::debug!("[MM] pid {pid} owned by another user, skipping");
                report.alive += 1;
            }
            Liveness::Gone => {
                log::debug!("[MM] pid {pid} not found, removing {}", path.display());
                match std::fs::remove_file(path) {
                    Ok(()) => report.removed += 1,
                    Err(e) => log::warn!("[MM] could not remove {}: {e}", path.display()),
                }
            }
            Liveness::Unknown => {
                log::warn!("[MM] pid {pid} probe failed, leaving {}", path.display());
            }
        }
    }

    report
}

/// Last value of a label ending in `sys.pid`, if any.
fn find_pid<R: io::Read>(reader: StatsReader<R>) -> Option<i64> {
    let mut pid = None;
    for stat in reader {
        if stat.label.ends_with("sys.pid") {
            pid = match stat.value {
                Value::UInt(v) => i64::try_from(v).ok(),
                Value::Int(v) => Some(v),
                _ => None,
            };
        }
    }
    pid
}

enum Liveness {
    Alive,
    OtherUser,
    Gone,
    Unknown,
}

fn probe(pid: i64) -> Liveness {
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return Liveness::Gone;
    };
    if pid <= 0 {
        // 0 and negatives address process groups, not a single producer.
        return Liveness::Unknown;
    }

    // SAFETY: kill with signal 0 performs only the permission and
    // existence checks, it delivers nothing.
    let ret = unsafe { libc::kill(pid, 0) };
    if ret == 0 {
        return Liveness::Alive;
    }
    match io::Error::last_os_error().raw_os_error() {
        Some(libc::ESRCH) => Liveness::Gone,
        Some(libc::EPERM) => Liveness::OtherUser,
        _ => Liveness::Unknown,
    }
}
