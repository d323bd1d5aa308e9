//! Geolocation Samples
//!
//! Coordinate samples as delivered by the device position stream, and the
//! bounded queue that buffers them between engine ticks. No domain logic.

use std::collections::VecDeque;
use serde::{Serialize, Deserialize};

use crate::core::geo::GeoPoint;

/// Status reported by the position source with each sample.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleStatus {
    /// A fix was produced.
    Ok,
    /// The user denied location permission.
    Denied,
    /// The source timed out waiting for a fix.
    Timeout,
    /// No positioning hardware / service.
    Unavailable,
}

impl SampleStatus {
    /// Is this a sensor failure?
    #[inline]
    pub fn is_failure(self) -> bool {
        self != SampleStatus::Ok
    }
}

/// One sample from the position stream.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PositionSample {
    /// Reported coordinate (ignored unless status is Ok)
    pub point: GeoPoint,
    /// Horizontal accuracy radius in meters
    pub accuracy_m: f64,
    /// Source status
    pub status: SampleStatus,
}

impl PositionSample {
    /// A successful fix.
    pub const fn fix(point: GeoPoint, accuracy_m: f64) -> Self {
        Self { point, accuracy_m, status: SampleStatus::Ok }
    }

    /// A sensor failure.
    pub const fn failure(status: SampleStatus) -> Self {
        Self { point: GeoPoint::new(0.0, 0.0), accuracy_m: f64::INFINITY, status }
    }

    /// Is this a usable fix under the given accuracy limit?
    pub fn is_acceptable(&self, max_accuracy_m: f64) -> bool {
        self.status == SampleStatus::Ok
            && self.point.is_valid()
            && self.accuracy_m.is_finite()
            && self.accuracy_m >= 0.0
            && self.accuracy_m <= max_accuracy_m
    }
}

// =============================================================================
// POSITION QUEUE
// =============================================================================

/// Bounded FIFO of position samples.
///
/// When full, the oldest sample is dropped: only the latest positions
/// matter because recomputation is idempotent.
#[derive(Clone, Debug)]
pub struct PositionQueue {
    samples: VecDeque<PositionSample>,
    capacity: usize,
    dropped: u64,
}

impl PositionQueue {
    /// Create a queue holding at most `capacity` samples (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
            dropped: 0,
        }
    }

    /// Enqueue a sample. Returns true if an older sample was dropped.
    pub fn push(&mut self, sample: PositionSample) -> bool {
        let mut dropped = false;
        if self.samples.len() >= self.capacity {
            self.samples.pop_front();
            self.dropped += 1;
            dropped = true;
        }
        self.samples.push_back(sample);
        dropped
    }

    /// Take every queued sample in arrival order.
    pub fn drain(&mut self) -> Vec<PositionSample> {
        self.samples.drain(..).collect()
    }

    /// Number of queued samples.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Is the queue empty?
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Samples dropped for lack of room since creation.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}
