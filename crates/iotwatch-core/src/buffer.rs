//! Fixed-capacity sample window for the active device.
//!
//! The window keeps its chart-ready shape (one label column plus one column per
//! metric) up to date on every append, so reading a snapshot never rebuilds
//! anything. Columns always have the same length.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};

use crate::model::{Metric, Sample};

pub const DEFAULT_CAPACITY: usize = 30;

/// Largest window a buffer will allocate for.
pub const MAX_CAPACITY: usize = 4096;

const LABEL_FORMAT: &str = "%H:%M:%S";

#[derive(Debug, Clone)]
pub struct MetricSeries {
    metric: Metric,
    data: VecDeque<Option<f64>>,
}

impl MetricSeries {
    fn new(metric: Metric) -> Self {
        Self {
            metric,
            data: VecDeque::new(),
        }
    }

    pub fn metric(&self) -> Metric {
        self.metric
    }

    pub fn data(&self) -> &VecDeque<Option<f64>> {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn latest(&self) -> Option<f64> {
        self.data.back().copied().flatten()
    }
}

/// Borrowed, read-only view of the window.
#[derive(Debug, Clone, Copy)]
pub struct SeriesSnapshot<'a> {
    pub device_id: Option<&'a str>,
    pub labels: &'a VecDeque<String>,
    pub timestamps: &'a VecDeque<DateTime<Utc>>,
    pub series: &'a [MetricSeries],
    pub revision: u64,
}

impl<'a> SeriesSnapshot<'a> {
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn series_for(&self, metric: Metric) -> Option<&'a MetricSeries> {
        self.series.iter().find(|s| s.metric == metric)
    }
}

#[derive(Debug, Clone)]
pub struct TimeSeriesBuffer {
    device_id: Option<String>,
    capacity: usize,
    labels: VecDeque<String>,
    timestamps: VecDeque<DateTime<Utc>>,
    series: Vec<MetricSeries>,
    revision: u64,
}

impl Default for TimeSeriesBuffer {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

impl TimeSeriesBuffer {
    /// Capacity is clamped to `1..=MAX_CAPACITY`.
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.clamp(1, MAX_CAPACITY);
        Self {
            device_id: None,
            capacity,
            labels: VecDeque::with_capacity(capacity + 1),
            timestamps: VecDeque::with_capacity(capacity + 1),
            series: Metric::ALL.iter().copied().map(MetricSeries::new).collect(),
            revision: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn device_id(&self) -> Option<&str> {
        self.device_id.as_deref()
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn newest_timestamp(&self) -> Option<DateTime<Utc>> {
        self.timestamps.back().copied()
    }

    pub fn reset(&mut self) {
        self.labels.clear();
        self.timestamps.clear();
        for series in &mut self.series {
            series.data.clear();
        }
        self.revision += 1;
    }

    /// Clears the window and binds it to `device_id`.
    pub fn rebind(&mut self, device_id: impl Into<String>) {
        self.reset();
        self.device_id = Some(device_id.into());
    }

    pub fn append(&mut self, sample: &Sample) {
        self.append_with_capacity(sample, self.capacity);
    }

    /// Appends in arrival order; the caller owns chronological ordering.
    /// Equal timestamps are kept.
    pub fn append_with_capacity(&mut self, sample: &Sample, capacity: usize) {
        self.labels.push_back(sample.timestamp.format(LABEL_FORMAT).to_string());
        self.timestamps.push_back(sample.timestamp);
        for series in &mut self.series {
            series.data.push_back(sample.metrics.get(series.metric));
        }

        while self.labels.len() > capacity {
            self.labels.pop_front();
            self.timestamps.pop_front();
            for series in &mut self.series {
                series.data.pop_front();
            }
        }
        self.revision += 1;
    }

    pub fn snapshot(&self) -> SeriesSnapshot<'_> {
        SeriesSnapshot {
            device_id: self.device_id.as_deref(),
            labels: &self.labels,
            timestamps: &self.timestamps,
            series: &self.series,
            revision: self.revision,
        }
    }
}
