//! Logical timestamps for event scheduling
//!
//! All events in the host are stamped with a `Time`: a signed nanosecond
//! count on a monotonic clock anchored at process start. The event timer
//! correlates these timestamps with the audio thread's sample counter, so
//! `Time` only needs to be cheap to copy, compare and subtract.

use std::ops::{Add, Sub};
use std::sync::OnceLock;
use std::time::{Duration, Instant};

/// Monotonic anchor shared by every `Time::now()` call in the process.
fn process_epoch() -> Instant {
    static EPOCH: OnceLock<Instant> = OnceLock::new();
    *EPOCH.get_or_init(Instant::now)
}

/// A point in time, in nanoseconds since process start.
///
/// The zero value doubles as the "process as soon as possible" marker,
/// see [`Time::immediate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Time {
    nanos: i64,
}

impl Time {
    /// Construct from a raw nanosecond count.
    pub const fn from_nanos(nanos: i64) -> Self {
        Self { nanos }
    }

    /// Construct from seconds.
    pub fn from_secs_f64(secs: f64) -> Self {
        Self {
            nanos: (secs * 1e9) as i64,
        }
    }

    /// The distinguished "no target time, process as soon as possible"
    /// timestamp. It converts as maximally overdue, so events stamped with
    /// it are always delivered in the next audio block.
    pub const fn immediate() -> Self {
        Self { nanos: 0 }
    }

    /// The current time on the process-wide monotonic clock.
    pub fn now() -> Self {
        Self {
            nanos: process_epoch().elapsed().as_nanos() as i64,
        }
    }

    pub const fn as_nanos(&self) -> i64 {
        self.nanos
    }

    pub fn as_secs_f64(&self) -> f64 {
        self.nanos as f64 * 1e-9
    }

    /// Signed distance from `earlier` to `self` in nanoseconds.
    pub const fn nanos_since(&self, earlier: Time) -> i64 {
        self.nanos - earlier.nanos
    }
}

impl Add<Duration> for Time {
    type Output = Time;

    fn add(self, rhs: Duration) -> Time {
        Time::from_nanos(self.nanos + rhs.as_nanos() as i64)
    }
}

impl Sub<Duration> for Time {
    type Output = Time;

    fn sub(self, rhs: Duration) -> Time {
        Time::from_nanos(self.nanos - rhs.as_nanos() as i64)
    }
}
