// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Multiple named field groups sharing one mapping.
//!
//! A [`GroupTemplate`] lets independent components declare their own field
//! sets while the process publishes a single file. Each group's name
//! prefixes every label it declares (the prefix is used verbatim, so most
//! callers end it with a separator such as `"web."`). Layout offsets are
//! assigned in group-declaration order, fields within a group in their own
//! declaration order; groups never share slots.
//!
//! The total mapping size is the version byte plus the sum of all group
//! layouts, exactly as if one builder had declared everything.

use crate::publisher::{
    AverageKey, BoolKey, ByteKey, CounterKey, GaugeKey, MmStats, MovingAvgKey, StatsBuilder,
    StringKey, TimerKey,
};
use crate::Result;
use std::path::Path;

/// Composes several prefixed declaration groups into one publisher.
#[derive(Default)]
pub struct GroupTemplate {
    builder: StatsBuilder,
}

impl GroupTemplate {
    #[must_use]
    pub fn new() -> Self {
        Self {
            builder: StatsBuilder::new(),
        }
    }

    /// Open a declaration group whose labels all start with `prefix`.
    pub fn group(&mut self, prefix: &str) -> GroupBuilder<'_> {
        GroupBuilder {
            builder: &mut self.builder,
            prefix: prefix.to_string(),
        }
    }

    /// Create the shared mapping; keys from every group stay valid on the
    /// returned publisher.
    ///
    /// # Errors
    ///
    /// Same failure modes as [`StatsBuilder::create`]; two groups
    /// declaring the same prefixed label fail with a duplicate-label
    /// error.
    pub fn create(self, path: impl AsRef<Path>) -> Result<MmStats> {
        self.builder.create(path)
    }
}

/// Declaration surface of one group; delegates to the shared builder with
/// the group prefix applied.
pub struct GroupBuilder<'a> {
    builder: &'a mut StatsBuilder,
    prefix: String,
}

impl GroupBuilder<'_> {
    fn label(&self, label: &str) -> String {
        format!("{}{label}", self.prefix)
    }

    pub fn uint64(&mut self, label: &str) -> GaugeKey<u64> {
        self.builder.uint64(&self.label(label))
    }

    pub fn uint32(&mut self, label: &str) -> GaugeKey<u32> {
        self.builder.uint32(&self.label(label))
    }

    pub fn int32(&mut self, label: &str) -> GaugeKey<i32> {
        self.builder.int32(&self.label(label))
    }

    pub fn uint16(&mut self, label: &str) -> GaugeKey<u16> {
        self.builder.uint16(&self.label(label))
    }

    pub fn int16(&mut self, label: &str) -> GaugeKey<i16> {
        self.builder.int16(&self.label(label))
    }

    pub fn float32(&mut self, label: &str) -> GaugeKey<f32> {
        self.builder.float32(&self.label(label))
    }

    pub fn float64(&mut self, label: &str) -> GaugeKey<f64> {
        self.builder.float64(&self.label(label))
    }

    pub fn byte(&mut self, label: &str) -> ByteKey {
        self.builder.byte(&self.label(label))
    }

    pub fn flag(&mut self, label: &str, initial: bool) -> BoolKey {
        self.builder.flag(&self.label(label), initial)
    }

    pub fn string(&mut self, label: &str, capacity: u16) -> StringKey {
        self.builder.string(&self.label(label), capacity)
    }

    pub fn counter(&mut self, label: &str) -> CounterKey {
        self.builder.counter(&self.label(label))
    }

    pub fn average(&mut self, label: &str) -> AverageKey {
        self.builder.average(&self.label(label))
    }

    pub fn moving_average(&mut self, label: &str, window: usize) -> MovingAvgKey {
        self.builder.moving_average(&self.label(label), window)
    }

    pub fn timer(&mut self, label: &str) -> TimerKey {
        self.builder.timer(&self.label(label))
    }

    pub fn static_u32(&mut self, label: &str, value: u32) {
        self.builder.static_u32(&self.label(label), value);
    }

    pub fn static_u64(&mut self, label: &str, value: u64) {
        self.builder.static_u64(&self.label(label), value);
    }

    pub fn static_i64(&mut self, label: &str, value: i64) {
        self.builder.static_i64(&self.label(label), value);
    }

    pub fn static_f64(&mut self, label: &str, value: f64) {
        self.builder.static_f64(&self.label(label), value);
    }

    pub fn static_text(&mut self, label: &str, value: &str) {
        self.builder.static_text(&self.label(label), value);
    }
}
