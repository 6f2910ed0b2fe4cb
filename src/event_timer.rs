//! Correlation between wall-clock time and the audio sample counter
//!
//! The audio thread counts samples, the control plane thinks in wall-clock
//! [`Time`]. The timer holds the last known correlation between the two: the
//! wall-clock instant of the next audio block boundary, re-anchored whenever
//! a synchronisation marker arrives from the real-time thread. Both
//! conversion directions are pure arithmetic, nothing here allocates or
//! blocks.

use crate::time::Time;

pub struct EventTimer {
    sample_rate: f32,
    block_size: usize,
    /// Wall-clock time of the start of the next audio block.
    outgoing_time: Time,
}

impl EventTimer {
    /// The anchor starts at the current time, so events stamped "now" are
    /// deliverable before the first synchronisation marker arrives.
    pub fn new(sample_rate: f32, block_size: usize) -> Self {
        Self {
            sample_rate,
            block_size,
            outgoing_time: Time::now(),
        }
    }

    /// Convert a target time into a sample offset relative to the next block
    /// boundary. `send_now` is true when the offset falls inside the next
    /// block; an overdue target clamps to offset 0 rather than being dropped.
    pub fn sample_offset_from_realtime(&self, time: Time) -> (bool, usize) {
        let delta_nanos = time.nanos_since(self.outgoing_time);
        let offset = (delta_nanos as f64 * 1e-9 * self.sample_rate as f64).floor() as i64;
        if offset < 0 {
            (true, 0)
        } else if (offset as usize) < self.block_size {
            (true, offset as usize)
        } else {
            (false, offset as usize)
        }
    }

    /// Timestamp a sample offset within the next block, the inverse of
    /// [`sample_offset_from_realtime`](Self::sample_offset_from_realtime).
    pub fn real_time_from_sample_offset(&self, sample_offset: usize) -> Time {
        let nanos = (sample_offset as f64 / self.sample_rate as f64 * 1e9) as i64;
        Time::from_nanos(self.outgoing_time.as_nanos() + nanos)
    }

    /// Re-anchor the correlation. Invoked only in response to a
    /// synchronisation marker from the real-time thread.
    pub fn set_outgoing_time(&mut self, timestamp: Time) {
        self.outgoing_time = timestamp;
    }

    /// Re-configuration when the audio frontend renegotiates its stream.
    pub fn set_sample_rate(&mut self, sample_rate: f32) {
        self.sample_rate = sample_rate;
    }

    pub fn sample_rate(&self) -> f32 {
        self.sample_rate
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn anchored_timer(anchor: Time) -> EventTimer {
        let mut timer = EventTimer::new(48_000.0, 64);
        timer.set_outgoing_time(anchor);
        timer
    }

    #[test]
    fn test_overdue_target_clamps_to_offset_zero() {
        let timer = anchored_timer(Time::from_secs_f64(1.0));
        let (send_now, offset) = timer.sample_offset_from_realtime(Time::from_secs_f64(0.5));
        assert!(send_now);
        assert_eq!(offset, 0);

        // The distinguished immediate timestamp behaves the same way.
        let (send_now, offset) = timer.sample_offset_from_realtime(Time::immediate());
        assert!(send_now);
        assert_eq!(offset, 0);
    }

    #[test]
    fn test_target_inside_next_block_is_due() {
        let anchor = Time::from_secs_f64(1.0);
        let timer = anchored_timer(anchor);
        // 32 samples at 48 kHz.
        let target = anchor + Duration::from_nanos((32.0 / 48_000.0 * 1e9) as u64);
        let (send_now, offset) = timer.sample_offset_from_realtime(target);
        assert!(send_now);
        assert_eq!(offset, 32);
    }

    #[test]
    fn test_target_beyond_next_block_waits() {
        let anchor = Time::from_secs_f64(1.0);
        let timer = anchored_timer(anchor);
        let target = anchor + Duration::from_millis(10);
        let (send_now, offset) = timer.sample_offset_from_realtime(target);
        assert!(!send_now);
        assert_eq!(offset, 480);
    }

    #[test]
    fn test_sample_offset_round_trips_exactly() {
        let timer = anchored_timer(Time::from_secs_f64(2.0));
        for offset in [0usize, 1, 17, 63] {
            let time = timer.real_time_from_sample_offset(offset);
            let (send_now, back) = timer.sample_offset_from_realtime(time);
            assert!(send_now);
            assert_eq!(back, offset);
        }
    }

    #[test]
    fn test_sample_rate_change_rescales_offsets() {
        let anchor = Time::from_secs_f64(1.0);
        let mut timer = anchored_timer(anchor);
        let target = anchor + Duration::from_nanos((32.0 / 48_000.0 * 1e9) as u64);
        assert_eq!(timer.sample_offset_from_realtime(target), (true, 32));

        // Half the rate puts the same instant half as many samples away.
        timer.set_sample_rate(24_000.0);
        assert_eq!(timer.sample_offset_from_realtime(target), (true, 16));
    }

    #[test]
    fn test_reanchoring_shifts_conversions() {
        let mut timer = anchored_timer(Time::from_secs_f64(1.0));
        let target = Time::from_secs_f64(1.5);
        let (send_now, _) = timer.sample_offset_from_realtime(target);
        assert!(!send_now);

        timer.set_outgoing_time(Time::from_secs_f64(1.5));
        let (send_now, offset) = timer.sample_offset_from_realtime(target);
        assert!(send_now);
        assert_eq!(offset, 0);

        // The inverse direction reflects the new anchor as well.
        assert_eq!(
            timer.real_time_from_sample_offset(0),
            Time::from_secs_f64(1.5)
        );
    }
}
