//! Bounded trailing history of GPS positions.
//!
//! A fixed-capacity FIFO: insertion order is arrival order, the oldest entry is
//! dropped once the buffer is full, and entries are never reordered or
//! deduplicated. Only GPS-sourced samples are accepted.

use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use crate::{geo_utils, GpsPoint, LocationSample, LocationSource};

/// Position-only projection of a GPS [`LocationSample`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ffi", derive(uniffi::Record))]
pub struct HistoryPoint {
    pub latitude: f64,
    pub longitude: f64,
    pub timestamp_ms: u64,
}

impl HistoryPoint {
    pub fn point(&self) -> GpsPoint {
        GpsPoint::new(self.latitude, self.longitude)
    }
}

/// Capped, insertion-ordered window of recent GPS positions.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryBuffer {
    points: VecDeque<HistoryPoint>,
    capacity: usize,
}

impl HistoryBuffer {
    /// Create an empty buffer. A capacity of zero is treated as one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            points: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append the projection of a GPS sample, evicting the oldest entry when full.
    ///
    /// Returns `false` (and stores nothing) for non-GPS samples.
    pub fn push(&mut self, sample: &LocationSample) -> bool {
        if sample.source != LocationSource::Gps {
            debug!("[History] Ignoring {:?}-sourced sample", sample.source);
            return false;
        }
        if self.points.len() == self.capacity {
            self.points.pop_front();
        }
        self.points.push_back(HistoryPoint {
            latitude: sample.latitude,
            longitude: sample.longitude,
            timestamp_ms: sample.timestamp_ms,
        });
        true
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &HistoryPoint> {
        self.points.iter()
    }

    pub fn latest(&self) -> Option<&HistoryPoint> {
        self.points.back()
    }

    pub fn to_vec(&self) -> Vec<HistoryPoint> {
        self.points.iter().copied().collect()
    }

    /// Distance covered across the retained window, in kilometres.
    pub fn track_length_km(&self) -> f64 {
        let track: Vec<GpsPoint> = self.points.iter().map(HistoryPoint::point).collect();
        geo_utils::track_length_km(&track)
    }
}
