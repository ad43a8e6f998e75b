//! Frame pacing and presentation timestamps
//!
//! Timestamps advance by a fixed step derived from the design frame rate, not
//! from wall-clock capture time. A producer that falls more than one frame
//! behind is re-anchored at the current instant, so a stall never turns into
//! a burst of unpaced frames.

use crate::types::VIDEO_CLOCK_RATE;
use std::time::{Duration, Instant};

/// Paces a frame producer at a fixed cadence
#[derive(Debug, Clone)]
pub struct FrameClock {
    fps: u32,
    start: Option<Instant>,
    /// pts of the frame due at `start`
    anchor_pts: u64,
    pts: u64,
}

impl FrameClock {
    pub fn new(fps: u32) -> Self {
        Self {
            fps: fps.max(1),
            start: None,
            anchor_pts: 0,
            pts: 0,
        }
    }

    /// Timestamp increment between consecutive frames, in 90 kHz ticks
    #[inline]
    pub fn step(&self) -> u64 {
        (VIDEO_CLOCK_RATE / self.fps) as u64
    }

    pub fn frame_duration(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.fps as f64)
    }

    /// Advance to the next frame slot.
    ///
    /// Returns the frame's pts and how long the caller should wait before
    /// producing it. The first call anchors the clock and never waits. A
    /// tick more than one frame late re-anchors the clock at `now`.
    pub fn tick(&mut self) -> (u64, Duration) {
        self.tick_at(Instant::now())
    }

    fn tick_at(&mut self, now: Instant) -> (u64, Duration) {
        match self.start {
            None => {
                self.start = Some(now);
                self.anchor_pts = 0;
                self.pts = 0;
                (0, Duration::ZERO)
            }
            Some(start) => {
                self.pts += self.step();
                let offset = Duration::from_secs_f64(
                    (self.pts - self.anchor_pts) as f64 / VIDEO_CLOCK_RATE as f64,
                );
                let due = start + offset;
                let late = now.saturating_duration_since(due);
                if late > self.frame_duration() {
                    log::debug!("Frame clock {:?} behind, re-anchoring", late);
                    self.start = Some(now);
                    self.anchor_pts = self.pts;
                }
                (self.pts, due.saturating_duration_since(now))
            }
        }
    }

    /// Blocking variant of [`tick`](Self::tick) that sleeps out the wait.
    pub fn pace(&mut self) -> u64 {
        let (pts, wait) = self.tick();
        if !wait.is_zero() {
            std::thread::sleep(wait);
        }
        pts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_tick_is_zero_without_wait() {
        let mut clock = FrameClock::new(30);
        let (pts, wait) = clock.tick();
        assert_eq!(pts, 0);
        assert_eq!(wait, Duration::ZERO);
    }

    #[test]
    fn test_pts_advances_by_cadence() {
        let mut clock = FrameClock::new(30);
        let base = Instant::now();
        assert_eq!(clock.tick_at(base).0, 0);
        assert_eq!(clock.tick_at(base).0, 3_000);
        assert_eq!(clock.tick_at(base).0, 6_000);
    }

    #[test]
    fn test_slow_consumer_does_not_wait() {
        let mut clock = FrameClock::new(10);
        let base = Instant::now();
        clock.tick_at(base);
        let (pts, wait) = clock.tick_at(base + Duration::from_secs(5));
        assert_eq!(pts, 9_000);
        assert_eq!(wait, Duration::ZERO);
    }

    #[test]
    fn test_stall_does_not_burst() {
        let mut clock = FrameClock::new(10);
        let base = Instant::now();
        clock.tick_at(base);
        let stalled = base + Duration::from_secs(5);
        assert_eq!(clock.tick_at(stalled), (9_000, Duration::ZERO));

        // Back on cadence: the next frame waits a full frame, pts keeps its step
        let (pts, wait) = clock.tick_at(stalled);
        assert_eq!(pts, 18_000);
        assert!(wait > Duration::from_millis(90), "waited {:?}", wait);
        assert!(wait <= Duration::from_millis(100));

        let unpaced = (0..60)
            .filter(|_| clock.tick_at(stalled).1.is_zero())
            .count();
        assert_eq!(unpaced, 0);
    }

    #[test]
    fn test_small_lateness_keeps_anchor() {
        let mut clock = FrameClock::new(10);
        let base = Instant::now();
        clock.tick_at(base);
        // 50 ms late for the 100 ms slot: caught up on the next tick
        let (_, wait) = clock.tick_at(base + Duration::from_millis(150));
        assert_eq!(wait, Duration::ZERO);
        let (_, wait) = clock.tick_at(base + Duration::from_millis(150));
        assert!(wait > Duration::from_millis(45) && wait <= Duration::from_millis(50));
    }

    #[test]
    fn test_fast_consumer_waits_for_slot() {
        let mut clock = FrameClock::new(10);
        let base = Instant::now();
        clock.tick_at(base);
        let (_, wait) = clock.tick_at(base);
        assert!(wait > Duration::from_millis(90));
        assert!(wait <= Duration::from_millis(100));
    }
}
