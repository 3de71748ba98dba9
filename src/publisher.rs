// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Single-writer metrics publisher.
//!
//! A [`StatsBuilder`] collects field declarations and hands out typed keys;
//! [`StatsBuilder::create`] sizes the layout, creates the mapping, writes
//! the version byte and every field header, and returns the [`MmStats`]
//! publisher. The declaration is fixed for the life of the mapping.
//!
//! # Publication Protocol
//!
//! Double-buffered fields carry two adjacent payload slots and an index
//! byte naming the current *write* slot:
//!
//! 1. Store the new value into slot `buf_idx`
//! 2. Store `buf_idx ^ 1` into the index byte with Release ordering
//!
//! A reader loads the index byte (Acquire) and decodes the *other* slot,
//! so it observes either the previous committed value or the fully written
//! next one, never a torn composite. Unbuffered fields (bytes, bools,
//! strings, statics) are single-slot direct stores: used where one aligned
//! store is naturally atomic, or where the value is written once before
//! any reader could care.
//!
//! Exactly one thread of execution may mutate a given field. Writers to
//! different fields of the same mapping do not coordinate, and no ordering
//! is promised between updates to different fields.
//!
//! # Compound Fields
//!
//! Counters, averages, moving averages, and timers publish a derived value
//! through the double-buffered protocol while keeping their private
//! producer state (totals, ring windows, timer instants) outside the
//! mapping, owned by the publisher.

use crate::fields::{
    self, FieldKind, Scalar, Value, DEFAULT_WINDOW, STATIC_TEXT_CAPACITY,
};
use crate::layout::{self, FORMAT_VERSION, UNBUFFERED, VERSION_BYTES};
use crate::mmap::{Flush, MmapRegion};
use crate::{Error, Result};
use std::collections::HashSet;
use std::marker::PhantomData;
use std::path::Path;
use std::ptr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

/// Key to a double-buffered numeric gauge of type `T`.
#[derive(Debug)]
pub struct GaugeKey<T: Scalar> {
    idx: u16,
    _marker: PhantomData<T>,
}

impl<T: Scalar> Clone for GaugeKey<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T: Scalar> Copy for GaugeKey<T> {}

/// Key to an unbuffered signed byte field.
#[derive(Debug, Clone, Copy)]
pub struct ByteKey(u16);

/// Key to an unbuffered boolean field.
#[derive(Debug, Clone, Copy)]
pub struct BoolKey(u16);

/// Key to a bounded UTF-8 string field.
#[derive(Debug, Clone, Copy)]
pub struct StringKey(u16);

/// Key to a counter field.
#[derive(Debug, Clone, Copy)]
pub struct CounterKey(u16);

/// Key to a cumulative average field.
#[derive(Debug, Clone, Copy)]
pub struct AverageKey(u16);

/// Key to a fixed-window moving average field.
#[derive(Debug, Clone, Copy)]
pub struct MovingAvgKey(u16);

/// Key to a timer field.
#[derive(Debug, Clone, Copy)]
pub struct TimerKey(u16);

/// Initial payload for a static field: immediate bytes, or a producer
/// resolved exactly once at `create`.
enum StaticSource {
    Bytes(Vec<u8>),
    Producer(Box<dyn FnOnce() -> Vec<u8>>),
}

impl StaticSource {
    fn resolve(self) -> Vec<u8> {
        match self {
            Self::Bytes(b) => b,
            Self::Producer(f) => f(),
        }
    }
}

struct FieldDecl {
    label: String,
    kind: FieldKind,
    init: Option<StaticSource>,
}

/// Declaration-order builder for a publisher's field set.
///
/// Declaration methods return typed keys usable on the [`MmStats`]
/// instance built by [`StatsBuilder::create`]. Iteration order (and thus
/// record order in the mapping) is the order of the declaration calls.
#[derive(Default)]
pub struct StatsBuilder {
    fields: Vec<FieldDecl>,
}

impl StatsBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self { fields: Vec::new() }
    }

    fn push(&mut self, label: &str, kind: FieldKind, init: Option<StaticSource>) -> u16 {
        let idx = self.fields.len() as u16;
        self.fields.push(FieldDecl {
            label: label.to_string(),
            kind,
            init,
        });
        idx
    }

    fn gauge<T: Scalar>(&mut self, label: &str) -> GaugeKey<T> {
        GaugeKey {
            idx: self.push(label, T::KIND, None),
            _marker: PhantomData,
        }
    }

    /// Double-buffered unsigned 64-bit gauge.
    pub fn uint64(&mut self, label: &str) -> GaugeKey<u64> {
        self.gauge(label)
    }

    /// Double-buffered unsigned 32-bit gauge.
    pub fn uint32(&mut self, label: &str) -> GaugeKey<u32> {
        self.gauge(label)
    }

    /// Double-buffered signed 32-bit gauge.
    pub fn int32(&mut self, label: &str) -> GaugeKey<i32> {
        self.gauge(label)
    }

    /// Double-buffered unsigned 16-bit gauge.
    pub fn uint16(&mut self, label: &str) -> GaugeKey<u16> {
        self.gauge(label)
    }

    /// Double-buffered signed 16-bit gauge.
    pub fn int16(&mut self, label: &str) -> GaugeKey<i16> {
        self.gauge(label)
    }

    /// Double-buffered 32-bit float gauge.
    pub fn float32(&mut self, label: &str) -> GaugeKey<f32> {
        self.gauge(label)
    }

    /// Double-buffered 64-bit float gauge.
    pub fn float64(&mut self, label: &str) -> GaugeKey<f64> {
        self.gauge(label)
    }

    /// Unbuffered signed byte field (a single aligned store).
    pub fn byte(&mut self, label: &str) -> ByteKey {
        ByteKey(self.push(label, FieldKind::Byte, None))
    }

    /// Unbuffered boolean field with an explicit initial value.
    pub fn flag(&mut self, label: &str, initial: bool) -> BoolKey {
        BoolKey(self.push(label, FieldKind::Bool { initial }, None))
    }

    /// Bounded UTF-8 string field. A zero capacity is bumped to one byte.
    pub fn string(&mut self, label: &str, capacity: u16) -> StringKey {
        let capacity = capacity.max(1);
        StringKey(self.push(label, FieldKind::String { capacity }, None))
    }

    /// Counter: unsigned 64-bit, incremented via [`Counter::inc`].
    pub fn counter(&mut self, label: &str) -> CounterKey {
        CounterKey(self.push(label, FieldKind::Counter, None))
    }

    /// Cumulative average of every sample ever added.
    pub fn average(&mut self, label: &str) -> AverageKey {
        AverageKey(self.push(label, FieldKind::Average, None))
    }

    /// Moving average over the last `window` samples. A zero window is
    /// bumped to one sample.
    pub fn moving_average(&mut self, label: &str, window: usize) -> MovingAvgKey {
        let window = window.max(1);
        MovingAvgKey(self.push(label, FieldKind::MovingAverage { window }, None))
    }

    /// Timer publishing a moving average (window 100) of elapsed seconds.
    pub fn timer(&mut self, label: &str) -> TimerKey {
        TimerKey(self.push(
            label,
            FieldKind::Timer {
                window: DEFAULT_WINDOW,
            },
            None,
        ))
    }

    /// Static unsigned 32-bit value, written once at init.
    pub fn static_u32(&mut self, label: &str, value: u32) {
        self.push(
            label,
            FieldKind::StaticUInt32,
            Some(StaticSource::Bytes(value.to_le_bytes().to_vec())),
        );
    }

    /// Static u32 whose value is produced once at `create`.
    pub fn static_u32_with(&mut self, label: &str, producer: impl FnOnce() -> u32 + 'static) {
        self.push(
            label,
            FieldKind::StaticUInt32,
            Some(StaticSource::Producer(Box::new(move || {
                producer().to_le_bytes().to_vec()
            }))),
        );
    }

    /// Static unsigned 64-bit value.
    pub fn static_u64(&mut self, label: &str, value: u64) {
        self.push(
            label,
            FieldKind::StaticUInt64,
            Some(StaticSource::Bytes(value.to_le_bytes().to_vec())),
        );
    }

    /// Static u64 whose value is produced once at `create`.
    pub fn static_u64_with(&mut self, label: &str, producer: impl FnOnce() -> u64 + 'static) {
        self.push(
            label,
            FieldKind::StaticUInt64,
            Some(StaticSource::Producer(Box::new(move || {
                producer().to_le_bytes().to_vec()
            }))),
        );
    }

    /// Static signed 64-bit value.
    pub fn static_i64(&mut self, label: &str, value: i64) {
        self.push(
            label,
            FieldKind::StaticInt64,
            Some(StaticSource::Bytes(value.to_le_bytes().to_vec())),
        );
    }

    /// Static i64 whose value is produced once at `create`.
    pub fn static_i64_with(&mut self, label: &str, producer: impl FnOnce() -> i64 + 'static) {
        self.push(
            label,
            FieldKind::StaticInt64,
            Some(StaticSource::Producer(Box::new(move || {
                producer().to_le_bytes().to_vec()
            }))),
        );
    }

    /// Static 64-bit float value.
    pub fn static_f64(&mut self, label: &str, value: f64) {
        self.push(
            label,
            FieldKind::StaticFloat64,
            Some(StaticSource::Bytes(value.to_le_bytes().to_vec())),
        );
    }

    /// Static f64 whose value is produced once at `create`.
    pub fn static_f64_with(&mut self, label: &str, producer: impl FnOnce() -> f64 + 'static) {
        self.push(
            label,
            FieldKind::StaticFloat64,
            Some(StaticSource::Producer(Box::new(move || {
                producer().to_le_bytes().to_vec()
            }))),
        );
    }

    /// Static text value (capacity 256, UTF-8 truncated at a boundary).
    pub fn static_text(&mut self, label: &str, value: &str) {
        self.push(
            label,
            FieldKind::StaticText,
            Some(StaticSource::Bytes(fields::encode_string(
                value,
                usize::from(STATIC_TEXT_CAPACITY),
            ))),
        );
    }

    /// Static text whose value is produced once at `create`.
    pub fn static_text_with(&mut self, label: &str, producer: impl FnOnce() -> String + 'static) {
        self.push(
            label,
            FieldKind::StaticText,
            Some(StaticSource::Producer(Box::new(move || {
                fields::encode_string(&producer(), usize::from(STATIC_TEXT_CAPACITY))
            }))),
        );
    }

    /// Declare the conventional identity field set:
    ///
    /// `sys.pid`, `sys.tid` (0 when unknown), `sys.uid`, `sys.gid`,
    /// `sys.created` (seconds since the epoch), and `sys.version` (this
    /// crate's version string). All values are sampled at `create` time.
    pub fn with_system_fields(&mut self) -> &mut Self {
        self.static_u32_with("sys.pid", std::process::id);
        self.static_i64_with("sys.tid", gettid);
        // SAFETY: getuid/getgid cannot fail and have no preconditions.
        self.static_u64_with("sys.uid", || u64::from(unsafe { libc::getuid() }));
        self.static_u64_with("sys.gid", || u64::from(unsafe { libc::getgid() }));
        self.static_f64_with("sys.created", unix_now);
        self.static_text("sys.version", env!("CARGO_PKG_VERSION"));
        self
    }

    /// Byte footprint of the declared layout, version tag included.
    #[must_use]
    pub fn layout_size(&self) -> usize {
        VERSION_BYTES
            + self
                .fields
                .iter()
                .map(|d| d.kind.record_size(&d.label))
                .sum::<usize>()
    }

    /// Create the mapping at `path` and initialize every declared field.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::DuplicateLabel`] or [`Error::InvalidLabel`] on a
    /// bad declaration, or with an I/O error from the mapping manager. No
    /// step after the mapping exists can fail, so construction never
    /// leaves a partially initialized file behind.
    pub fn create(self, path: impl AsRef<Path>) -> Result<MmStats> {
        let path = path.as_ref();

        let mut seen = HashSet::new();
        for decl in &self.fields {
            if decl.label.is_empty() || decl.label.len() > usize::from(u16::MAX) {
                return Err(Error::InvalidLabel(decl.label.clone()));
            }
            if !seen.insert(decl.label.clone()) {
                return Err(Error::DuplicateLabel(decl.label.clone()));
            }
        }

        let total = self.layout_size();

        // Resolve deferred statics before the mapping exists; after this
        // point construction cannot fail.
        let decls: Vec<(String, FieldKind, Option<Vec<u8>>)> = self
            .fields
            .into_iter()
            .map(|d| (d.label, d.kind, d.init.map(StaticSource::resolve)))
            .collect();

        let region = MmapRegion::create(path, total)?;
        let base = region.as_ptr();

        // SAFETY: the region is at least one page, so offset 0 is valid,
        // and no reader-relevant data exists before headers are written.
        unsafe {
            *base = FORMAT_VERSION;
        }

        let mut offset = VERSION_BYTES;
        let mut slots = Vec::with_capacity(decls.len());
        let mut state = Vec::with_capacity(decls.len());

        for (label, kind, init) in decls {
            let width = kind.slot_width();
            let buf_idx = if kind.double_buffered() { 0 } else { UNBUFFERED };

            let mut record = Vec::with_capacity(kind.record_size(&label));
            let header_len = layout::encode_header(&mut record, &label, &kind.signature(), buf_idx);

            if kind.double_buffered() {
                // Both slots start at zero, write slot is 0.
                record.resize(record.len() + 2 * width, 0);
            } else {
                let mut slot = match (&kind, init) {
                    (_, Some(bytes)) => bytes,
                    (FieldKind::Bool { initial }, None) => vec![u8::from(*initial)],
                    _ => Vec::new(),
                };
                slot.resize(width, 0);
                record.extend_from_slice(&slot);
            }

            debug_assert_eq!(record.len(), kind.record_size(&label));
            debug_assert!(offset + record.len() <= region.size());

            // SAFETY: offset + record.len() <= layout_size() <= region
            // size; the record buffer and the mapping do not overlap.
            unsafe {
                ptr::copy_nonoverlapping(record.as_ptr(), base.add(offset), record.len());
            }

            state.push(ProducerState::for_kind(&kind));
            slots.push(FieldSlot {
                label,
                kind,
                value_off: offset + header_len,
            });
            offset += record.len();
        }

        Ok(MmStats {
            region: Some(region),
            fields: slots,
            state,
        })
    }
}

/// Linux thread id, 0 on platforms without a cheap equivalent.
#[cfg(target_os = "linux")]
fn gettid() -> i64 {
    // SAFETY: gettid takes no arguments and cannot fail.
    unsafe { libc::syscall(libc::SYS_gettid) as i64 }
}

#[cfg(not(target_os = "linux"))]
fn gettid() -> i64 {
    0
}

fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

#[derive(Debug)]
struct FieldSlot {
    label: String,
    kind: FieldKind,
    /// Offset of the first payload slot; the index byte sits just before.
    value_off: usize,
}

/// Fixed-length sample window shared by moving averages and timers.
#[derive(Debug)]
struct MovingWindow {
    samples: Vec<f64>,
    idx: usize,
    full: bool,
}

impl MovingWindow {
    fn new(window: usize) -> Self {
        Self {
            samples: vec![0.0; window.max(1)],
            idx: 0,
            full: false,
        }
    }

    /// Record a sample and return the mean over the populated window.
    fn add(&mut self, value: f64) -> f64 {
        self.samples[self.idx] = value;
        let filled = if self.full {
            self.samples.len()
        } else {
            self.idx + 1
        };
        let mean = self.samples[..filled].iter().sum::<f64>() / filled as f64;

        if self.idx == self.samples.len() - 1 {
            self.idx = 0;
            self.full = true;
        } else {
            self.idx += 1;
        }
        mean
    }
}

/// Producer-side private state, kept outside the mapping.
#[derive(Debug)]
enum ProducerState {
    Plain,
    Average { count: u64, total: f64 },
    Window(MovingWindow),
    Timer {
        window: MovingWindow,
        started: Option<Instant>,
        last: f64,
    },
}

impl ProducerState {
    fn for_kind(kind: &FieldKind) -> Self {
        match kind {
            FieldKind::Average => Self::Average {
                count: 0,
                total: 0.0,
            },
            FieldKind::MovingAverage { window } => Self::Window(MovingWindow::new(*window)),
            FieldKind::Timer { window } => Self::Timer {
                window: MovingWindow::new(*window),
                started: None,
                last: 0.0,
            },
            _ => Self::Plain,
        }
    }
}

/// A single-writer publisher bound to one mapping.
///
/// Steady-state writes never fail: after [`MmStats::remove`] every
/// operation is a deterministic no-op and reads return defaults. Keys
/// minted by a different builder than the one that created this instance
/// are answered the same way, never with undefined behavior.
#[derive(Debug)]
pub struct MmStats {
    region: Option<MmapRegion>,
    fields: Vec<FieldSlot>,
    state: Vec<ProducerState>,
}

impl MmStats {
    /// Start a declaration.
    #[must_use]
    pub fn builder() -> StatsBuilder {
        StatsBuilder::new()
    }

    /// Backing file path, `None` once removed.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.region.as_ref().map(MmapRegion::path)
    }

    /// Mapped size in bytes (a page multiple), 0 once removed.
    #[must_use]
    pub fn size(&self) -> usize {
        self.region.as_ref().map_or(0, MmapRegion::size)
    }

    /// Labels in declaration order.
    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.label.as_str())
    }

    /// Flush the mapping to its backing file. A no-op once removed.
    pub fn flush(&self, mode: Flush) -> Result<()> {
        match &self.region {
            Some(region) => region.flush(mode),
            None => Ok(()),
        }
    }

    /// Unmap, close, and unlink the backing file. Idempotent; all
    /// subsequent field operations become no-ops.
    pub fn remove(&mut self) {
        if let Some(region) = self.region.take() {
            region.remove();
        }
    }

    // ----- generic slot access ------------------------------------------------

    /// Index byte of a double-buffered field, viewed atomically.
    ///
    /// Alignment is trivially satisfied (alignment of `AtomicU8` is 1) and
    /// the byte lives inside the mapping for as long as `region` does.
    fn index_byte(region: &MmapRegion, value_off: usize) -> &AtomicU8 {
        // SAFETY: value_off - 1 is the buf_idx byte of a record fully
        // inside the mapping; see the layout invariants checked at create.
        unsafe { &*region.as_ptr().add(value_off - 1).cast::<AtomicU8>() }
    }

    /// Double-buffered publication: store into the write slot, then flip.
    fn store_buffered(&self, value_off: usize, bytes: &[u8]) {
        let Some(region) = &self.region else {
            log::debug!("[MM] write after remove ignored");
            return;
        };
        let width = bytes.len();
        let index = Self::index_byte(region, value_off);
        // Relaxed is enough for our own index byte: this is the only
        // writer, and the value is re-masked to 0/1.
        let wb = usize::from(index.load(Ordering::Relaxed) & 1);

        // SAFETY: value_off + 2*width is within the mapping (layout is
        // sized from the same declaration); single writer per field, so
        // the write slot is not concurrently accessed by readers, which
        // only decode the other slot.
        unsafe {
            ptr::copy_nonoverlapping(
                bytes.as_ptr(),
                region.as_ptr().add(value_off + wb * width),
                width,
            );
        }

        // Publication flip: Release pairs with the reader's Acquire load,
        // making the slot store above visible before the new index.
        index.store((wb ^ 1) as u8, Ordering::Release);
    }

    /// Read the stable slot of a double-buffered field.
    fn load_buffered(&self, value_off: usize, out: &mut [u8]) -> bool {
        let Some(region) = &self.region else {
            return false;
        };
        let width = out.len();
        let index = Self::index_byte(region, value_off);
        let stable = usize::from(index.load(Ordering::Acquire) & 1) ^ 1;

        // SAFETY: same bounds argument as store_buffered; the stable slot
        // is not written until the next publication flip.
        unsafe {
            ptr::copy_nonoverlapping(
                region.as_ptr().add(value_off + stable * width),
                out.as_mut_ptr(),
                width,
            );
        }
        true
    }

    /// Direct store for unbuffered fields.
    fn store_unbuffered(&self, value_off: usize, bytes: &[u8]) {
        let Some(region) = &self.region else {
            log::debug!("[MM] write after remove ignored");
            return;
        };
        // SAFETY: value_off + bytes.len() is within the mapping; for the
        // one-byte kinds this compiles to a single naturally atomic store.
        unsafe {
            ptr::copy_nonoverlapping(bytes.as_ptr(), region.as_ptr().add(value_off), bytes.len());
        }
    }

    /// Copy of an unbuffered field's slot.
    fn load_unbuffered(&self, value_off: usize, out: &mut [u8]) -> bool {
        let Some(region) = &self.region else {
            return false;
        };
        // SAFETY: same bounds argument as store_unbuffered.
        unsafe {
            ptr::copy_nonoverlapping(region.as_ptr().add(value_off), out.as_mut_ptr(), out.len());
        }
        true
    }

    fn field(&self, idx: u16) -> Option<&FieldSlot> {
        self.fields.get(usize::from(idx))
    }

    // ----- gauges -------------------------------------------------------------

    /// Assign a gauge. Publication follows the double-buffered protocol.
    pub fn set<T: Scalar>(&mut self, key: GaugeKey<T>, value: T) {
        let Some(slot) = self.field(key.idx).filter(|f| f.kind == T::KIND) else {
            log::debug!("[MM] gauge key {} does not match this publisher", key.idx);
            return;
        };
        let mut buf = [0u8; 8];
        let width = T::KIND.slot_width();
        value.write_le(&mut buf[..width]);
        self.store_buffered(slot.value_off, &buf[..width]);
    }

    /// Current (stable) gauge value; the type's default once removed.
    #[must_use]
    pub fn get<T: Scalar>(&self, key: GaugeKey<T>) -> T {
        let Some(slot) = self.field(key.idx).filter(|f| f.kind == T::KIND) else {
            return T::default();
        };
        let mut buf = [0u8; 8];
        let width = T::KIND.slot_width();
        if self.load_buffered(slot.value_off, &mut buf[..width]) {
            T::read_le(&buf[..width])
        } else {
            T::default()
        }
    }

    // ----- unbuffered simple fields -------------------------------------------

    /// Assign a byte field.
    pub fn set_byte(&mut self, key: ByteKey, value: i8) {
        let Some(slot) = self.field(key.0).filter(|f| f.kind == FieldKind::Byte) else {
            return;
        };
        self.store_unbuffered(slot.value_off, &[value as u8]);
    }

    /// Current byte value.
    #[must_use]
    pub fn get_byte(&self, key: ByteKey) -> i8 {
        let Some(slot) = self.field(key.0).filter(|f| f.kind == FieldKind::Byte) else {
            return 0;
        };
        let mut buf = [0u8; 1];
        if self.load_unbuffered(slot.value_off, &mut buf) {
            buf[0] as i8
        } else {
            0
        }
    }

    /// Assign a boolean field: stored as 1 or 0.
    pub fn set_bool(&mut self, key: BoolKey, value: bool) {
        let Some(slot) = self
            .field(key.0)
            .filter(|f| matches!(f.kind, FieldKind::Bool { .. }))
        else {
            return;
        };
        self.store_unbuffered(slot.value_off, &[u8::from(value)]);
    }

    /// Current boolean value.
    #[must_use]
    pub fn get_bool(&self, key: BoolKey) -> bool {
        let Some(slot) = self
            .field(key.0)
            .filter(|f| matches!(f.kind, FieldKind::Bool { .. }))
        else {
            return false;
        };
        let mut buf = [0u8; 1];
        self.load_unbuffered(slot.value_off, &mut buf) && buf[0] != 0
    }

    /// Assign a string field. Values longer than the capacity are
    /// truncated at a byte boundary and re-trimmed to a valid UTF-8
    /// prefix; this never fails.
    pub fn set_string(&mut self, key: StringKey, value: &str) {
        let Some(slot) = self.field(key.0) else {
            return;
        };
        let FieldKind::String { capacity } = slot.kind else {
            return;
        };
        let encoded = fields::encode_string(value, usize::from(capacity));
        self.store_unbuffered(slot.value_off, &encoded);
    }

    /// Current string value, NUL-trimmed.
    #[must_use]
    pub fn get_string(&self, key: StringKey) -> String {
        let Some(slot) = self.field(key.0) else {
            return String::new();
        };
        let FieldKind::String { capacity } = slot.kind else {
            return String::new();
        };
        let mut buf = vec![0u8; usize::from(capacity)];
        if !self.load_unbuffered(slot.value_off, &mut buf) {
            return String::new();
        }
        let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
        String::from_utf8_lossy(&buf[..end]).into_owned()
    }

    // ----- compound field handles ---------------------------------------------

    /// Handle to a counter field.
    pub fn counter(&mut self, key: CounterKey) -> Counter<'_> {
        Counter {
            stats: self,
            idx: key.0,
        }
    }

    /// Handle to a cumulative average field.
    pub fn average(&mut self, key: AverageKey) -> Average<'_> {
        Average {
            stats: self,
            idx: key.0,
        }
    }

    /// Handle to a moving average field.
    pub fn moving_average(&mut self, key: MovingAvgKey) -> MovingAvg<'_> {
        MovingAvg {
            stats: self,
            idx: key.0,
        }
    }

    /// Handle to a timer field.
    pub fn timer(&mut self, key: TimerKey) -> Timer<'_> {
        Timer {
            stats: self,
            idx: key.0,
        }
    }

    // ----- generic read surface -----------------------------------------------

    /// Logical current value of any field, by label.
    ///
    /// This is the same projection a reader walking the file would see,
    /// including static and compound fields. `None` for unknown labels or
    /// once removed.
    #[must_use]
    pub fn read(&self, label: &str) -> Option<Value> {
        let slot = self.fields.iter().find(|f| f.label == label)?;
        let width = slot.kind.slot_width();
        let mut buf = vec![0u8; width];
        let ok = if slot.kind.double_buffered() {
            self.load_buffered(slot.value_off, &mut buf)
        } else {
            self.load_unbuffered(slot.value_off, &mut buf)
        };
        if !ok {
            return None;
        }
        fields::decode_value(&slot.kind.signature(), &buf)
    }

    // ----- compound internals -------------------------------------------------

    fn counter_value(&self, idx: u16) -> u64 {
        let Some(slot) = self.field(idx).filter(|f| f.kind == FieldKind::Counter) else {
            return 0;
        };
        let mut buf = [0u8; 8];
        if self.load_buffered(slot.value_off, &mut buf) {
            u64::from_le_bytes(buf)
        } else {
            0
        }
    }

    fn counter_store(&mut self, idx: u16, value: u64) {
        let Some(slot) = self.field(idx).filter(|f| f.kind == FieldKind::Counter) else {
            return;
        };
        self.store_buffered(slot.value_off, &value.to_le_bytes());
    }

    fn average_add(&mut self, idx: u16, value: f64) {
        let i = usize::from(idx);
        let Some(ProducerState::Average { count, total }) = self.state.get_mut(i) else {
            return;
        };
        *count += 1;
        *total += value;
        let mean = *total / *count as f64;
        let value_off = self.fields[i].value_off;
        self.store_buffered(value_off, &mean.to_le_bytes());
    }

    fn moving_add(&mut self, idx: u16, value: f64) {
        let i = usize::from(idx);
        let Some(ProducerState::Window(window)) = self.state.get_mut(i) else {
            return;
        };
        let mean = window.add(value);
        let value_off = self.fields[i].value_off;
        self.store_buffered(value_off, &mean.to_le_bytes());
    }

    fn f64_value(&self, idx: u16) -> f64 {
        let Some(slot) = self.field(idx).filter(|f| f.kind.slot_width() == 8) else {
            return 0.0;
        };
        let mut buf = [0u8; 8];
        if self.load_buffered(slot.value_off, &mut buf) {
            f64::from_le_bytes(buf)
        } else {
            0.0
        }
    }

    fn timer_start(&mut self, idx: u16) {
        if let Some(ProducerState::Timer { started, .. }) = self.state.get_mut(usize::from(idx)) {
            *started = Some(Instant::now());
        }
    }

    fn timer_stop(&mut self, idx: u16) -> f64 {
        let i = usize::from(idx);
        let Some(ProducerState::Timer {
            window,
            started,
            last,
        }) = self.state.get_mut(i)
        else {
            return 0.0;
        };
        let Some(t0) = started.take() else {
            // stop without start
            return 0.0;
        };
        let elapsed = t0.elapsed().as_secs_f64();
        *last = elapsed;
        let mean = window.add(elapsed);
        let value_off = self.fields[i].value_off;
        self.store_buffered(value_off, &mean.to_le_bytes());
        elapsed
    }

    fn timer_last(&self, idx: u16) -> f64 {
        match self.state.get(usize::from(idx)) {
            Some(ProducerState::Timer { last, started, .. }) => match started {
                Some(t0) => t0.elapsed().as_secs_f64(),
                None => *last,
            },
            _ => 0.0,
        }
    }
}

/// Counter handle: a u64 that can only move by explicit amounts.
///
/// Decrements saturate at zero.
pub struct Counter<'a> {
    stats: &'a mut MmStats,
    idx: u16,
}

impl Counter<'_> {
    /// Add one.
    pub fn inc(&mut self) {
        self.add(1);
    }

    /// Add `n` (which may be negative); the result saturates at zero.
    pub fn add(&mut self, n: i64) {
        let next = self.stats.counter_value(self.idx).saturating_add_signed(n);
        self.stats.counter_store(self.idx, next);
    }

    /// Overwrite the count.
    pub fn set(&mut self, value: u64) {
        self.stats.counter_store(self.idx, value);
    }

    /// Current count.
    #[must_use]
    pub fn value(&self) -> u64 {
        self.stats.counter_value(self.idx)
    }
}

/// Cumulative average handle.
pub struct Average<'a> {
    stats: &'a mut MmStats,
    idx: u16,
}

impl Average<'_> {
    /// Fold a sample into the running mean and publish it.
    pub fn add(&mut self, value: f64) {
        self.stats.average_add(self.idx, value);
    }

    /// Published mean.
    #[must_use]
    pub fn value(&self) -> f64 {
        self.stats.f64_value(self.idx)
    }
}

/// Fixed-window moving average handle.
pub struct MovingAvg<'a> {
    stats: &'a mut MmStats,
    idx: u16,
}

impl MovingAvg<'_> {
    /// Record a sample; publishes the mean over the populated window.
    pub fn add(&mut self, value: f64) {
        self.stats.moving_add(self.idx, value);
    }

    /// Published window mean.
    #[must_use]
    pub fn value(&self) -> f64 {
        self.stats.f64_value(self.idx)
    }
}

/// Timer handle: measures elapsed wall-clock seconds per scope and feeds
/// them into a moving average.
pub struct Timer<'a> {
    stats: &'a mut MmStats,
    idx: u16,
}

impl Timer<'_> {
    /// Start (or restart) the timer.
    pub fn start(&mut self) {
        self.stats.timer_start(self.idx);
    }

    /// Stop the timer, publish the updated mean, and return the elapsed
    /// seconds. A stop without a matching start is a no-op returning 0.
    pub fn stop(&mut self) -> f64 {
        self.stats.timer_stop(self.idx)
    }

    /// Time a closure: start, run, stop.
    pub fn time<R>(&mut self, f: impl FnOnce() -> R) -> R {
        self.start();
        let out = f();
        self.stop();
        out
    }

    /// Elapsed seconds of the most recent measurement. While the timer is
    /// running this reports the live elapsed time; 0 before any.
    #[must_use]
    pub fn last(&self) -> f64 {
        self.stats.timer_last(self.idx)
    }

    /// Published moving-average value.
    #[must_use]
    pub fn value(&self) -> f64 {
        self.stats.f64_value(self.idx)
    }
}
