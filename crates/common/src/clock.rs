//! Media timestamps and clock utilities.
//!
//! Capture devices stamp every buffer with a presentation timestamp on a
//! monotonic device clock. A recording re-expresses those timestamps
//! relative to its session-zero (the first accepted video frame). This
//! module provides:
//! - [`MediaTime`], a signed nanosecond timestamp
//! - [`RecordingClock`], a monotonic clock for stamping device buffers
//! - [`DriftMeasurement`] for comparing the tails of two streams

use std::fmt;
use std::ops::{Add, Sub};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

/// A presentation timestamp in nanoseconds.
///
/// Signed so that a timestamp rebased onto a later origin can be detected
/// as "before session-zero" instead of silently wrapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct MediaTime(i64);

impl MediaTime {
    pub const ZERO: MediaTime = MediaTime(0);

    pub const fn from_nanos(ns: i64) -> Self {
        Self(ns)
    }

    pub const fn from_millis(ms: i64) -> Self {
        Self(ms * 1_000_000)
    }

    pub fn from_secs_f64(secs: f64) -> Self {
        Self((secs * 1_000_000_000.0).round() as i64)
    }

    pub fn from_duration(duration: Duration) -> Self {
        Self(duration.as_nanos().min(i64::MAX as u128) as i64)
    }

    pub const fn as_nanos(self) -> i64 {
        self.0
    }

    pub fn as_secs_f64(self) -> f64 {
        self.0 as f64 / 1_000_000_000.0
    }

    pub fn is_negative(self) -> bool {
        self.0 < 0
    }

    /// Express `self` relative to `origin`.
    ///
    /// Returns `None` when `self` lies before the origin.
    pub fn since(self, origin: MediaTime) -> Option<MediaTime> {
        let rebased = self.0.checked_sub(origin.0)?;
        (rebased >= 0).then_some(MediaTime(rebased))
    }

    /// Convert to an unsigned nanosecond count, clamping negatives to zero.
    pub fn to_unsigned_nanos(self) -> u64 {
        self.0.max(0) as u64
    }
}

impl Add for MediaTime {
    type Output = MediaTime;

    fn add(self, rhs: MediaTime) -> MediaTime {
        MediaTime(self.0.saturating_add(rhs.0))
    }
}

impl Sub for MediaTime {
    type Output = MediaTime;

    fn sub(self, rhs: MediaTime) -> MediaTime {
        MediaTime(self.0.saturating_sub(rhs.0))
    }
}

impl fmt::Display for MediaTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.3}s", self.as_secs_f64())
    }
}

/// A monotonic clock that stamps buffers relative to the moment the
/// device was opened.
#[derive(Debug, Clone)]
pub struct RecordingClock {
    epoch: Instant,

    /// Wall-clock time at epoch (RFC 3339).
    epoch_wall: String,
}

impl RecordingClock {
    /// Create a new clock anchored to now.
    pub fn start() -> Self {
        Self {
            epoch: Instant::now(),
            epoch_wall: chrono::Utc::now().to_rfc3339(),
        }
    }

    /// Time elapsed since the epoch as a media timestamp.
    pub fn now(&self) -> MediaTime {
        MediaTime::from_duration(self.epoch.elapsed())
    }

    /// Wall-clock time at the epoch.
    pub fn epoch_wall(&self) -> &str {
        &self.epoch_wall
    }
}

/// Drift between the same instant as observed on two streams.
#[derive(Debug, Clone, Copy)]
pub struct DriftMeasurement {
    /// Timestamp in the reference stream.
    pub reference: MediaTime,
    /// Timestamp in the measured stream.
    pub measured: MediaTime,
}

impl DriftMeasurement {
    /// Drift in nanoseconds (positive = measured is ahead).
    pub fn drift_ns(&self) -> i64 {
        self.measured.as_nanos() - self.reference.as_nanos()
    }

    pub fn drift_ms(&self) -> f64 {
        self.drift_ns() as f64 / 1_000_000.0
    }

    pub fn exceeds_threshold_ms(&self, threshold_ms: f64) -> bool {
        self.drift_ms().abs() > threshold_ms
    }
}
