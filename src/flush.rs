use std::time::{Duration, Instant};

/// Debounce timer plus bookkeeping for the single in-flight flush.
#[derive(Debug, Clone)]
pub struct FlushScheduler {
    delay: Duration,
    flight_timeout: Duration,
    deadline: Option<Instant>,
    in_flight: Option<InFlight>,
    next_ticket: u64,
}

#[derive(Debug, Clone, Copy)]
struct InFlight {
    ticket: u64,
    started: Instant,
}

impl FlushScheduler {
    pub fn new(delay: Duration, flight_timeout: Duration) -> Self {
        Self {
            delay,
            flight_timeout,
            deadline: None,
            in_flight: None,
            next_ticket: 1,
        }
    }

    /// (Re)starts the debounce window; bursts coalesce into one flush.
    pub fn arm(&mut self, now: Instant) {
        self.deadline = Some(now + self.delay);
    }

    pub fn arm_now(&mut self, now: Instant) {
        self.deadline = Some(now);
    }

    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    pub fn disarm(&mut self) {
        self.deadline = None;
    }

    pub fn in_flight(&self) -> Option<u64> {
        self.in_flight.map(|f| f.ticket)
    }

    pub fn next_wakeup(&self) -> Option<Instant> {
        let flight_expiry = self.in_flight.map(|f| f.started + self.flight_timeout);
        match (self.deadline, flight_expiry) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Returns a ticket when a flush should start now. A due deadline waits
    /// while another flush is in flight; a flight older than the timeout is
    /// abandoned so the next window is not blocked forever.
    pub fn poll(&mut self, now: Instant) -> Option<u64> {
        if let Some(flight) = self.in_flight {
            if now.duration_since(flight.started) >= self.flight_timeout {
                tracing::warn!(
                    ticket = flight.ticket,
                    timeout_ms = self.flight_timeout.as_millis() as u64,
                    "flush timed out; keys stay dirty"
                );
                self.in_flight = None;
            } else {
                return None;
            }
        }
        match self.deadline {
            Some(at) if at <= now => {
                self.deadline = None;
                let ticket = self.next_ticket;
                self.next_ticket += 1;
                self.in_flight = Some(InFlight {
                    ticket,
                    started: now,
                });
                Some(ticket)
            }
            _ => None,
        }
    }

    /// Marks a flight as resolved. `false` when the ticket was already
    /// abandoned or superseded.
    pub fn finish(&mut self, ticket: u64) -> bool {
        match self.in_flight {
            Some(f) if f.ticket == ticket => {
                self.in_flight = None;
                true
            }
            _ => false,
        }
    }

    /// Releases a ticket that was issued but had nothing to send.
    pub fn cancel(&mut self, ticket: u64) {
        self.finish(ticket);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn rearming_pushes_the_deadline_out() {
        let t0 = Instant::now();
        let mut s = FlushScheduler::new(ms(1500), ms(10_000));
        s.arm(t0);
        s.arm(t0 + ms(1000));
        assert_eq!(s.poll(t0 + ms(1600)), None);
        assert_eq!(s.poll(t0 + ms(2500)), Some(1));
        assert!(!s.is_armed());
    }

    #[test]
    fn nothing_fires_without_a_mutation() {
        let t0 = Instant::now();
        let mut s = FlushScheduler::new(ms(10), ms(100));
        assert_eq!(s.poll(t0 + ms(1000)), None);
        assert_eq!(s.next_wakeup(), None);
    }

    #[test]
    fn due_window_waits_for_the_in_flight_flush() {
        let t0 = Instant::now();
        let mut s = FlushScheduler::new(ms(10), ms(1000));
        s.arm(t0);
        let first = s.poll(t0 + ms(10)).expect("first flush");
        s.arm(t0 + ms(20));
        assert_eq!(s.poll(t0 + ms(40)), None);
        assert!(s.finish(first));
        assert_eq!(s.poll(t0 + ms(41)), Some(first + 1));
    }

    #[test]
    fn failed_flush_does_not_rearm() {
        let t0 = Instant::now();
        let mut s = FlushScheduler::new(ms(10), ms(1000));
        s.arm(t0);
        let ticket = s.poll(t0 + ms(10)).unwrap();
        assert!(s.finish(ticket));
        assert_eq!(s.poll(t0 + ms(5000)), None);
        assert_eq!(s.next_wakeup(), None);
    }

    #[test]
    fn stale_flight_is_abandoned_after_timeout() {
        let t0 = Instant::now();
        let mut s = FlushScheduler::new(ms(10), ms(100));
        s.arm(t0);
        let ticket = s.poll(t0 + ms(10)).unwrap();
        s.arm(t0 + ms(20));
        assert_eq!(s.next_wakeup(), Some(t0 + ms(30)));
        assert_eq!(s.poll(t0 + ms(50)), None);
        assert_eq!(s.poll(t0 + ms(110)), Some(ticket + 1));
        assert!(!s.finish(ticket));
    }
}
