//! Timing anchors for precise playback
//!
//! Position is derived from the context clock instead of being polled:
//! `elapsed = now - started_at - paused_total`. While paused, the clock is
//! frozen at `paused_at`.

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PreciseClock {
    started_at: f64,
    paused_total: f64,
    paused_at: Option<f64>,
}

impl PreciseClock {
    /// Anchor so that `elapsed(now) == offset`, running
    pub fn start(now: f64, offset: f64) -> Self {
        Self {
            started_at: now - offset,
            paused_total: 0.0,
            paused_at: None,
        }
    }

    /// Anchor at `offset` without running
    pub fn paused(now: f64, offset: f64) -> Self {
        Self {
            started_at: now - offset,
            paused_total: 0.0,
            paused_at: Some(now),
        }
    }

    pub fn pause(&mut self, now: f64) {
        if self.paused_at.is_none() {
            self.paused_at = Some(now);
        }
    }

    pub fn resume(&mut self, now: f64) {
        if let Some(at) = self.paused_at.take() {
            self.paused_total += (now - at).max(0.0);
        }
    }

    pub fn is_paused(&self) -> bool {
        self.paused_at.is_some()
    }

    /// Seconds of audio played at context time `now`
    pub fn elapsed(&self, now: f64) -> f64 {
        let now = self.paused_at.unwrap_or(now);
        (now - self.started_at - self.paused_total).max(0.0)
    }

    pub fn started_at(&self) -> f64 {
        self.started_at
    }

    pub fn paused_total(&self) -> f64 {
        self.paused_total
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn running_clock_tracks_context_time() {
        let clock = PreciseClock::start(10.0, 3.0);
        assert_eq!(clock.started_at(), 7.0);
        assert!((clock.elapsed(12.5) - 5.5).abs() < 1e-9);
    }

    #[test]
    fn pause_freezes_position() {
        let mut clock = PreciseClock::start(0.0, 0.0);
        clock.pause(4.0);
        assert!((clock.elapsed(100.0) - 4.0).abs() < 1e-9);

        clock.resume(100.0);
        assert_eq!(clock.paused_total(), 96.0);
        assert!((clock.elapsed(101.0) - 5.0).abs() < 1e-9);
    }

    #[test]
    fn double_pause_keeps_first_anchor() {
        let mut clock = PreciseClock::start(0.0, 0.0);
        clock.pause(2.0);
        clock.pause(5.0);
        clock.resume(6.0);
        assert!((clock.elapsed(6.0) - 2.0).abs() < 1e-9);
    }

    #[test]
    fn paused_anchor_does_not_advance() {
        let clock = PreciseClock::paused(3.0, 42.0);
        assert!(clock.is_paused());
        assert!((clock.elapsed(50.0) - 42.0).abs() < 1e-9);
    }
}
