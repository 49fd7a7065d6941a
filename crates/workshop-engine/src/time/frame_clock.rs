use std::time::{Duration, Instant};

/// Frame timing snapshot.
#[derive(Debug, Copy, Clone)]
pub struct FrameTime {
    /// Seconds since the previous tick, clamped.
    pub dt: f32,

    /// Seconds since the clock was created or last reset.
    pub elapsed: f32,

    pub now: Instant,

    /// Monotonic frame counter, starting at 0.
    pub frame_index: u64,
}

/// Produces [`FrameTime`] snapshots and paces a loop to a target interval.
///
/// Delta time is clamped so a stall (debugger, suspended view) does not
/// produce one huge step.
#[derive(Debug, Clone)]
pub struct FrameClock {
    start: Instant,
    last: Instant,
    frame_index: u64,
    dt_min: Duration,
    dt_max: Duration,
    interval: Option<Duration>,
    next_deadline: Instant,
}

impl FrameClock {
    /// Unpaced clock with default clamps (0.1 ms .. 250 ms).
    pub fn new() -> Self {
        Self::with_clamps(Duration::from_micros(100), Duration::from_millis(250))
    }

    pub fn with_clamps(dt_min: Duration, dt_max: Duration) -> Self {
        debug_assert!(dt_min <= dt_max);
        let now = Instant::now();
        Self {
            start: now,
            last: now,
            frame_index: 0,
            dt_min,
            dt_max,
            interval: None,
            next_deadline: now,
        }
    }

    /// Clock paced to `frames_per_second` (at least 1).
    pub fn paced(frames_per_second: u32) -> Self {
        let mut clock = Self::new();
        clock.interval = Some(Duration::from_secs_f64(1.0 / frames_per_second.max(1) as f64));
        clock
    }

    pub fn interval(&self) -> Option<Duration> {
        self.interval
    }

    /// Resets the delta baseline, e.g. when resuming after a stop.
    pub fn reset(&mut self) {
        let now = Instant::now();
        self.last = now;
        self.next_deadline = now;
    }

    /// Advances the clock and schedules the next deadline.
    pub fn tick(&mut self) -> FrameTime {
        let now = Instant::now();
        let dt = now
            .saturating_duration_since(self.last)
            .clamp(self.dt_min, self.dt_max);
        self.last = now;

        if let Some(interval) = self.interval {
            // Skip missed deadlines instead of bursting to catch up.
            self.next_deadline = (self.next_deadline + interval).max(now);
        }

        let ft = FrameTime {
            dt: dt.as_secs_f32(),
            elapsed: now.saturating_duration_since(self.start).as_secs_f32(),
            now,
            frame_index: self.frame_index,
        };
        self.frame_index = self.frame_index.wrapping_add(1);
        ft
    }

    /// Time left until the next frame is due. Zero for unpaced clocks.
    pub fn until_next_frame(&self) -> Duration {
        match self.interval {
            Some(_) => self.next_deadline.saturating_duration_since(Instant::now()),
            None => Duration::ZERO,
        }
    }
}

impl Default for FrameClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_index_increments() {
        let mut clock = FrameClock::new();
        assert_eq!(clock.tick().frame_index, 0);
        assert_eq!(clock.tick().frame_index, 1);
    }

    #[test]
    fn dt_is_clamped() {
        let mut clock = FrameClock::with_clamps(Duration::from_millis(5), Duration::from_millis(10));
        let ft = clock.tick();
        assert!(ft.dt >= 0.005 - f32::EPSILON);
        assert!(ft.dt <= 0.010 + f32::EPSILON);
    }

    #[test]
    fn paced_clock_waits_one_interval() {
        let mut clock = FrameClock::paced(10);
        assert_eq!(clock.interval(), Some(Duration::from_millis(100)));
        clock.tick();
        let wait = clock.until_next_frame();
        assert!(wait > Duration::from_millis(50));
        assert!(wait <= Duration::from_millis(100));
    }

    #[test]
    fn unpaced_clock_never_waits() {
        let mut clock = FrameClock::new();
        clock.tick();
        assert_eq!(clock.until_next_frame(), Duration::ZERO);
    }

    #[test]
    fn zero_fps_is_treated_as_one() {
        assert_eq!(FrameClock::paced(0).interval(), Some(Duration::from_secs(1)));
    }
}
