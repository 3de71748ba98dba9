// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! File-backed memory mapping management.
//!
//! Provides a safe wrapper around `mmap`, `msync`, and `munmap` for the
//! regular files that back published metrics. Unlike an anonymous or
//! `shm_open` segment, the backing file stays visible in the filesystem so
//! any consumer can open and parse it without coordinating with the
//! producer.
//!
//! # Region Lifecycle
//!
//! 1. Producer creates the region with [`MmapRegion::create`]
//! 2. Readers open the file read-only whenever they like
//! 3. The region is unmapped on drop
//! 4. [`MmapRegion::remove`] additionally unlinks the backing file
//!
//! The manager never interprets the bytes it owns. It guarantees that on
//! return from `create` every byte is zero (a fresh `O_TRUNC` file extended
//! by `ftruncate` reads back as zeros) and that the mapped size is at least
//! the requested size, rounded up to a positive multiple of the page size.

use crate::{Error, Result};
use std::fs::{self, OpenOptions};
use std::io;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::ptr;

/// How [`MmapRegion::flush`] waits for durability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flush {
    /// `MS_SYNC`: block until the pages reach the backing file.
    Sync,
    /// `MS_ASYNC`: schedule the writeback and return immediately.
    Async,
}

/// A page-aligned, file-backed, shared read/write mapping.
///
/// Automatically unmapped on drop. The backing file is only unlinked by an
/// explicit [`MmapRegion::remove`].
#[derive(Debug)]
pub struct MmapRegion {
    /// Pointer to the mapped memory region
    ptr: *mut u8,
    /// Effective (page-rounded) size of the mapping
    size: usize,
    /// Backing file path (for unlink)
    path: PathBuf,
}

// SAFETY: the region points to shared memory designed for cross-thread and
// cross-process access. All concurrent mutation goes through atomic index
// bytes (see the publisher's publication protocol); the raw payload stores
// are single-writer by contract.
unsafe impl Send for MmapRegion {}
unsafe impl Sync for MmapRegion {}

impl MmapRegion {
    /// Platform page size in bytes.
    #[must_use]
    pub fn page_size() -> usize {
        // SAFETY: sysconf with a valid name constant has no preconditions.
        let sz = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
        if sz <= 0 {
            4096
        } else {
            sz as usize
        }
    }

    /// Round `requested` up to a positive multiple of the page size.
    #[must_use]
    pub fn round_to_page(requested: usize) -> usize {
        let page = Self::page_size();
        if requested <= page {
            page
        } else {
            requested.div_ceil(page) * page
        }
    }

    /// Create the backing file and map it shared read/write.
    ///
    /// The file is opened with create+truncate+read/write, extended to the
    /// page-rounded size (which zero-fills it), and mapped `MAP_SHARED`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Create`], [`Error::Truncate`], or [`Error::Mmap`]
    /// if the corresponding step fails.
    pub fn create(path: &Path, requested: usize) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .map_err(Error::Create)?;

        let size = Self::round_to_page(requested);
        file.set_len(size as u64).map_err(Error::Truncate)?;

        // SAFETY:
        // - addr is null, letting the kernel choose the placement
        // - size is the page-rounded length the file was just extended to
        // - PROT_READ | PROT_WRITE with MAP_SHARED is a valid combination
        //   for a writable shared file mapping
        // - the fd is valid for the duration of the call; mmap holds its
        //   own reference afterwards, so dropping `file` below is fine
        // - mmap returns MAP_FAILED on error (checked below)
        let ptr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                size,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                file.as_raw_fd(),
                0,
            )
        };

        if ptr == libc::MAP_FAILED {
            let err = io::Error::last_os_error();
            // Don't leave a useless zero file behind.
            let _ = fs::remove_file(path);
            return Err(Error::Mmap(err));
        }

        // The descriptor can be closed now; the mapping keeps the file
        // alive and the path is what remove() unlinks.
        drop(file);

        Ok(Self {
            ptr: ptr.cast::<u8>(),
            size,
            path: path.to_path_buf(),
        })
    }

    /// Raw pointer to the mapped bytes.
    #[inline]
    #[must_use]
    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr
    }

    /// Effective size of the mapping (a page multiple).
    #[inline]
    #[must_use]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Path of the backing file.
    #[inline]
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Flush mapped pages to the backing file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Msync`] if the `msync` call fails.
    pub fn flush(&self, mode: Flush) -> Result<()> {
        let flags = match mode {
            Flush::Sync => libc::MS_SYNC,
            Flush::Async => libc::MS_ASYNC,
        };
        // SAFETY: ptr/size describe exactly the region returned by mmap in
        // create(), which has not been unmapped (remove() consumes self).
        let ret = unsafe { libc::msync(self.ptr.cast::<libc::c_void>(), self.size, flags) };
        if ret != 0 {
            return Err(Error::Msync(io::Error::last_os_error()));
        }
        Ok(())
    }

    /// Unmap the region and unlink the backing file.
    ///
    /// An unlink failure is tolerated: the mapping is gone either way and
    /// the leftover file is reaped by the janitor eventually, so it is only
    /// logged as a warning.
    pub fn remove(self) {
        if let Err(e) = fs::remove_file(&self.path) {
            if e.kind() != io::ErrorKind::NotFound {
                log::warn!("[MM] could not unlink {}: {}", self.path.display(), e);
            }
        }
        // Drop unmaps.
    }
}

impl Drop for MmapRegion {
    fn drop(&mut self) {
        // SAFETY: ptr/size come from the successful mmap in create() and
        // Drop runs at most once, so the region is still mapped here.
        unsafe {
            libc::munmap(self.ptr.cast::<libc::c_void>(), self.size);
        }
    }
}
