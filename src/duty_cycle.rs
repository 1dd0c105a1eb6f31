use core::cmp::min;
use embassy_time::{Duration, Instant};

/// Work the link runner has to do in the current tick
#[derive(Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "std", derive(Debug))]
pub struct DueWork {
    pub transmit: bool,
    pub poll: bool,
}

/// Duty Cycle Scheduler
///
/// Decides on every wake tick whether an uplink attempt and/or a downlink poll
/// is due. It only bounds how often the link uses the transport; regulatory
/// airtime limits are enforced by the radio stack itself.
///
/// An attempt consumes its interval regardless of outcome: a failed transmit is
/// retried on the next interval, not on the next tick. The runner sleeps a fixed
/// tick between evaluations, so intervals are honoured to the tick resolution.
pub struct DutyCycleScheduler {
    send_interval: Duration,
    poll_interval: Duration,
    last_send_at: Instant,
    last_poll_at: Instant,
}

impl DutyCycleScheduler {
    /// Creates a scheduler whose intervals both start counting at `start`
    pub fn new(send_interval: Duration, poll_interval: Duration, start: Instant) -> Self {
        DutyCycleScheduler {
            send_interval,
            poll_interval,
            last_send_at: start,
            last_poll_at: start,
        }
    }

    /// Restarts both intervals at `now`
    pub fn restart(&mut self, now: Instant) {
        self.last_send_at = now;
        self.last_poll_at = now;
    }

    /// Evaluates both intervals at `now` and marks the due ones as consumed
    pub fn evaluate(&mut self, now: Instant) -> DueWork {
        let mut due = DueWork::default();

        if now.saturating_duration_since(self.last_send_at) >= self.send_interval {
            due.transmit = true;
            self.last_send_at = now;
        }

        if now.saturating_duration_since(self.last_poll_at) >= self.poll_interval {
            due.poll = true;
            self.last_poll_at = now;
        }

        due
    }

    /// Earliest instant at which either interval expires
    pub fn next_due(&self) -> Instant {
        min(self.last_send_at + self.send_interval, self.last_poll_at + self.poll_interval)
    }

    pub fn last_send_at(&self) -> Instant {
        self.last_send_at
    }

    pub fn last_poll_at(&self) -> Instant {
        self.last_poll_at
    }
}

#[cfg(all(test, feature = "std"))]
mod tests {
    use super::*;

    fn scheduler(send_secs: u64, poll_secs: u64) -> DutyCycleScheduler {
        DutyCycleScheduler::new(Duration::from_secs(send_secs), Duration::from_secs(poll_secs), Instant::from_secs(0))
    }

    #[test]
    fn nothing_due_before_first_interval() {
        let mut s = scheduler(60, 60);
        assert_eq!(s.evaluate(Instant::from_secs(0)), DueWork::default());
        assert_eq!(s.evaluate(Instant::from_secs(59)), DueWork::default());
    }

    #[test]
    fn due_exactly_at_interval() {
        let mut s = scheduler(60, 120);
        let due = s.evaluate(Instant::from_secs(60));
        assert!(due.transmit);
        assert!(!due.poll);
        assert_eq!(s.last_send_at(), Instant::from_secs(60));
        assert_eq!(s.last_poll_at(), Instant::from_secs(0));
    }

    #[test]
    fn two_ticks_thirty_seconds_apart_give_at_most_one_transmit() {
        let mut s = scheduler(60, 3600);
        let transmits = [30, 60]
            .iter()
            .filter(|&&t| s.evaluate(Instant::from_secs(t)).transmit)
            .count();
        assert!(transmits <= 1);

        let mut s = scheduler(60, 3600);
        let transmits = [45, 75]
            .iter()
            .filter(|&&t| s.evaluate(Instant::from_secs(t)).transmit)
            .count();
        assert!(transmits <= 1);
    }

    #[test]
    fn three_ticks_spanning_interval_give_exactly_one_transmit() {
        let mut s = scheduler(60, 3600);
        let transmits = [30, 60, 90]
            .iter()
            .filter(|&&t| s.evaluate(Instant::from_secs(t)).transmit)
            .count();
        assert_eq!(transmits, 1);
    }

    #[test]
    fn consumed_interval_restarts_from_evaluation_time() {
        let mut s = scheduler(60, 3600);
        assert!(s.evaluate(Instant::from_secs(70)).transmit);
        assert!(!s.evaluate(Instant::from_secs(120)).transmit);
        assert!(s.evaluate(Instant::from_secs(130)).transmit);
    }

    #[test]
    fn intervals_are_independent() {
        let mut s = scheduler(1800, 60);
        let mut polls = 0;
        let mut transmits = 0;
        for tick in 1..=60 {
            let due = s.evaluate(Instant::from_secs(tick * 30));
            polls += due.poll as u32;
            transmits += due.transmit as u32;
        }
        assert_eq!(polls, 30);
        assert_eq!(transmits, 1);
    }

    #[test]
    fn time_before_start_saturates() {
        let mut s = DutyCycleScheduler::new(Duration::from_secs(10), Duration::from_secs(10), Instant::from_secs(100));
        assert_eq!(s.evaluate(Instant::from_secs(50)), DueWork::default());
    }

    #[test]
    fn restart_resets_both_intervals() {
        let mut s = scheduler(60, 30);
        s.restart(Instant::from_secs(500));
        assert_eq!(s.evaluate(Instant::from_secs(520)), DueWork::default());
        assert_eq!(s.next_due(), Instant::from_secs(530));
        let due = s.evaluate(Instant::from_secs(560));
        assert!(due.transmit && due.poll);
    }
}
