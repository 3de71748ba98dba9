// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Reduce many metric streams into per-label summary views.
//!
//! The aggregator consumes any number of reader streams (typically one per
//! producer file), groups numeric samples by label, and computes count,
//! min, max, sum, mean, median, and a fixed percentile set per label.
//! String values are grouped but excluded from the numeric statistics.
//!
//! # Percentile Policy
//!
//! With `n` sorted samples and `p` in `(0, 1)`: `pos = p * (n + 1)`,
//! clamped to `[1, n]`, then linear interpolation between the samples at
//! `floor(pos)` and `floor(pos) + 1` (1-based) by the fractional part.
//! `p <= 0` returns the minimum, `p >= 1` the maximum.

use crate::reader::Stat;
use std::collections::BTreeMap;

/// Percentiles exported in every [`Summary`].
pub const PERCENTILES: [f64; 5] = [0.75, 0.95, 0.98, 0.99, 0.999];

/// Per-label summary statistics.
#[derive(Debug, Clone, PartialEq)]
pub struct Summary {
    /// Numeric samples in arrival order.
    pub values: Vec<f64>,
    pub min: f64,
    pub max: f64,
    pub sum: f64,
    pub mean: f64,
    /// Middle element of the sorted samples (upper middle for even
    /// counts), 0 when empty.
    pub median: f64,
    /// `(p, value)` for every entry of [`PERCENTILES`].
    pub percentiles: Vec<(f64, f64)>,
    sorted: Vec<f64>,
}

impl Summary {
    fn from_values(values: Vec<f64>) -> Self {
        let mut sorted = values.clone();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

        let n = sorted.len();
        let sum: f64 = sorted.iter().sum();
        let (min, max, mean, median) = if n == 0 {
            (0.0, 0.0, 0.0, 0.0)
        } else {
            (sorted[0], sorted[n - 1], sum / n as f64, sorted[n / 2])
        };

        let percentiles = PERCENTILES
            .iter()
            .map(|&p| (p, percentile_of(&sorted, p)))
            .collect();

        Self {
            values,
            min,
            max,
            sum,
            mean,
            median,
            percentiles,
            sorted,
        }
    }

    /// Number of numeric samples.
    #[must_use]
    pub fn count(&self) -> usize {
        self.values.len()
    }

    /// Interpolated percentile of the samples, by the policy above.
    #[must_use]
    pub fn percentile(&self, p: f64) -> f64 {
        percentile_of(&self.sorted, p)
    }
}

fn percentile_of(sorted: &[f64], p: f64) -> f64 {
    let n = sorted.len();
    if n == 0 {
        return 0.0;
    }
    if p <= 0.0 {
        return sorted[0];
    }
    if p >= 1.0 {
        return sorted[n - 1];
    }

    let pos = (p * (n as f64 + 1.0)).clamp(1.0, n as f64);
    let idx = pos.floor() as usize; // 1-based rank of the lower sample
    let frac = pos - pos.floor();
    if idx >= n {
        return sorted[n - 1];
    }
    sorted[idx - 1] + frac * (sorted[idx] - sorted[idx - 1])
}

/// Group every stream's values by label and summarize each group.
///
/// Labels are returned in sorted order so repeated aggregations over the
/// same inputs are directly comparable.
pub fn aggregate<I, S>(streams: I) -> BTreeMap<String, Summary>
where
    I: IntoIterator<Item = S>,
    S: IntoIterator<Item = Stat>,
{
    let mut groups: BTreeMap<String, Vec<f64>> = BTreeMap::new();

    for stream in streams {
        for stat in stream {
            let group = groups.entry(stat.label).or_default();
            if let Some(v) = stat.value.as_f64() {
                group.push(v);
            } else {
                log::debug!("[MM] non-numeric value excluded from aggregation");
            }
        }
    }

    groups
        .into_iter()
        .map(|(label, values)| (label, Summary::from_values(values)))
        .collect()
}
