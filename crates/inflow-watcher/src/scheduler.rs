//! Activity-aware poll scheduling.
//!
//! Pure, testable state machine with no clock access — all times are passed
//! in as epoch milliseconds. The watcher task owns one scheduler and asks it
//! for the next delay after every completed poll; that call is the single
//! interval-selection decision point.

// ─── Scheduler ───────────────────────────────────────────────────

/// Cancellable scheduler handle owned by a watcher.
///
/// Recorded activity only updates a timestamp; it never reschedules the
/// pending fire. The active/idle choice is made when the *next* fire is
/// scheduled.
#[derive(Debug, Clone)]
pub struct PollScheduler {
    active_interval_ms: u64,
    idle_interval_ms: u64,
    idle_threshold_ms: u64,
    last_activity_ms: Option<u64>,
    next_fire_ms: Option<u64>,
    running: bool,
}

impl PollScheduler {
    pub fn new(active_interval_ms: u64, idle_interval_ms: u64, idle_threshold_ms: u64) -> Self {
        Self {
            active_interval_ms,
            idle_interval_ms,
            idle_threshold_ms,
            last_activity_ms: None,
            next_fire_ms: None,
            running: false,
        }
    }

    pub fn start(&mut self) {
        self.running = true;
    }

    /// Stop scheduling and cancel any pending fire.
    pub fn stop(&mut self) {
        self.running = false;
        self.next_fire_ms = None;
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Scheduled time of the next poll, if one is pending.
    pub fn next_fire_ms(&self) -> Option<u64> {
        self.next_fire_ms
    }

    /// Record user activity. Affects the next scheduling decision only.
    pub fn record_activity(&mut self, now_ms: u64) {
        self.last_activity_ms = Some(now_ms);
    }

    /// True when activity was recorded within the idle threshold.
    pub fn user_active(&self, now_ms: u64) -> bool {
        match self.last_activity_ms {
            Some(ts) => now_ms.saturating_sub(ts) < self.idle_threshold_ms,
            None => false,
        }
    }

    /// The single decision point: active interval while the user is active,
    /// idle interval otherwise.
    pub fn select_interval_ms(&self, now_ms: u64) -> u64 {
        if self.user_active(now_ms) {
            self.active_interval_ms
        } else {
            self.idle_interval_ms
        }
    }

    /// Schedule the next fire relative to `now_ms` and return the chosen
    /// interval. No-op returning the active interval if the scheduler has
    /// been stopped.
    pub fn schedule_next(&mut self, now_ms: u64) -> u64 {
        if !self.running {
            return self.active_interval_ms;
        }
        let interval = self.select_interval_ms(now_ms);
        self.next_fire_ms = Some(now_ms.saturating_add(interval));
        interval
    }

    /// Cancel the pending fire without stopping the scheduler (used by
    /// `poll_now`, which polls immediately and then reschedules).
    pub fn cancel_pending(&mut self) {
        self.next_fire_ms = None;
    }
}

// ─── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    const ACTIVE: u64 = 60_000;
    const IDLE: u64 = 300_000;
    const THRESHOLD: u64 = 300_000;

    fn make() -> PollScheduler {
        let mut s = PollScheduler::new(ACTIVE, IDLE, THRESHOLD);
        s.start();
        s
    }

    #[test]
    fn no_activity_selects_idle_interval() {
        let s = make();
        assert_eq!(s.select_interval_ms(1_000_000), IDLE);
        assert!(!s.user_active(1_000_000));
    }

    #[test]
    fn recent_activity_selects_active_interval() {
        let mut s = make();
        s.record_activity(1_000_000);
        assert_eq!(s.select_interval_ms(1_000_000 + THRESHOLD - 1), ACTIVE);
    }

    #[test]
    fn stale_activity_selects_idle_interval() {
        let mut s = make();
        s.record_activity(1_000_000);
        assert_eq!(s.select_interval_ms(1_000_000 + THRESHOLD), IDLE);
    }

    #[test]
    fn schedule_next_sets_fire_time() {
        let mut s = make();
        s.record_activity(500);
        let interval = s.schedule_next(1_000);
        assert_eq!(interval, ACTIVE);
        assert_eq!(s.next_fire_ms(), Some(1_000 + ACTIVE));
    }

    #[test]
    fn record_activity_does_not_move_pending_fire() {
        let mut s = make();
        s.schedule_next(0);
        let pending = s.next_fire_ms();
        s.record_activity(10);
        assert_eq!(s.next_fire_ms(), pending);
    }

    #[test]
    fn cancel_pending_keeps_running() {
        let mut s = make();
        s.schedule_next(0);
        s.cancel_pending();
        assert!(s.next_fire_ms().is_none());
        assert!(s.is_running());
    }

    #[test]
    fn stop_cancels_and_halts() {
        let mut s = make();
        s.schedule_next(0);
        s.stop();
        assert!(!s.is_running());
        assert!(s.next_fire_ms().is_none());
        // schedule_next after stop must not resurrect the timer
        s.schedule_next(1_000);
        assert!(s.next_fire_ms().is_none());
    }

    #[test]
    fn activity_at_exact_threshold_counts_as_idle() {
        let mut s = make();
        s.record_activity(0);
        assert!(!s.user_active(THRESHOLD));
        assert!(s.user_active(THRESHOLD - 1));
    }
}
