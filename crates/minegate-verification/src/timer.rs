use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Outcome of a single timer tick.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TickOutcome {
    /// Timer was not running; nothing changed
    Idle,
    /// Seconds left after this tick
    Running(u32),
    /// Countdown reached zero on this tick and the timer stopped
    Elapsed,
}

/// Bounded countdown for one verification attempt.
///
/// Counts logical seconds; the caller drives `tick` from a periodic schedule.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionTimer {
    time_remaining: u32,
    is_running: bool,
    start_time: Option<DateTime<Utc>>,
}

impl SessionTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start (or restart) the countdown.
    pub fn start(&mut self, duration_secs: u32, now: DateTime<Utc>) {
        self.start_time = Some(now);
        self.time_remaining = duration_secs;
        self.is_running = true;
    }

    pub fn tick(&mut self) -> TickOutcome {
        if !self.is_running {
            return TickOutcome::Idle;
        }
        self.time_remaining = self.time_remaining.saturating_sub(1);
        if self.time_remaining == 0 {
            self.is_running = false;
            TickOutcome::Elapsed
        } else {
            TickOutcome::Running(self.time_remaining)
        }
    }

    /// Stop without touching the remaining time.
    pub fn stop(&mut self) {
        self.is_running = false;
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    pub fn time_remaining(&self) -> u32 {
        self.time_remaining
    }

    pub fn is_running(&self) -> bool {
        self.is_running
    }

    pub fn start_time(&self) -> Option<DateTime<Utc>> {
        self.start_time
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn countdown_elapses_and_stops() {
        let mut timer = SessionTimer::new();
        timer.start(3, Utc::now());
        assert!(timer.is_running());
        assert!(timer.start_time().is_some());

        assert_eq!(timer.tick(), TickOutcome::Running(2));
        assert_eq!(timer.tick(), TickOutcome::Running(1));
        assert_eq!(timer.tick(), TickOutcome::Elapsed);
        assert!(!timer.is_running());
        assert_eq!(timer.time_remaining(), 0);
        assert_eq!(timer.tick(), TickOutcome::Idle);
    }

    #[test]
    fn stop_keeps_remaining_time() {
        let mut timer = SessionTimer::new();
        timer.start(30, Utc::now());
        timer.tick();
        timer.stop();
        assert_eq!(timer.time_remaining(), 29);
        assert_eq!(timer.tick(), TickOutcome::Idle);
        assert_eq!(timer.time_remaining(), 29);
    }

    #[test]
    fn restart_replaces_countdown() {
        let mut timer = SessionTimer::new();
        timer.start(30, Utc::now());
        timer.tick();
        timer.start(10, Utc::now());
        assert_eq!(timer.time_remaining(), 10);
        assert!(timer.is_running());
    }

    #[test]
    fn zero_window_elapses_on_first_tick() {
        let mut timer = SessionTimer::new();
        timer.start(0, Utc::now());
        assert_eq!(timer.tick(), TickOutcome::Elapsed);
    }
}
