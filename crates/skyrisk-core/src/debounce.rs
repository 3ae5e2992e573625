//! Trailing-edge debouncer for recomputation requests.
//!
//! A single pending slot: every submission overwrites the slot and
//! pushes the deadline out, so a burst of edits triggers one recompute
//! after the burst goes quiet.

use std::time::{Duration, Instant};

/// Delay applied to interactive edits before recomputing.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_secs(1);

#[derive(Debug)]
struct Pending<T> {
    request: T,
    deadline: Instant,
}

#[derive(Debug)]
pub struct Debouncer<T> {
    delay: Duration,
    pending: Option<Pending<T>>,
}

impl<T> Debouncer<T> {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            pending: None,
        }
    }

    /// Queue a request, replacing any pending one and restarting the delay.
    pub fn submit(&mut self, request: T) {
        self.pending = Some(Pending {
            request,
            deadline: Instant::now() + self.delay,
        });
    }

    /// Take the pending request if its deadline has passed at `now`.
    pub fn poll_at(&mut self, now: Instant) -> Option<T> {
        if self.pending.as_ref().is_some_and(|p| now >= p.deadline) {
            return self.pending.take().map(|p| p.request);
        }
        None
    }

    pub fn poll(&mut self) -> Option<T> {
        self.poll_at(Instant::now())
    }

    /// Deadline of the pending request, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.pending.as_ref().map(|p| p.deadline)
    }

    /// Drop the pending request without firing it.
    pub fn clear(&mut self) {
        self.pending = None;
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }
}

impl<T> Default for Debouncer<T> {
    fn default() -> Self {
        Self::new(DEFAULT_DEBOUNCE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fires_only_after_the_delay() {
        let mut debouncer = Debouncer::new(Duration::from_millis(100));
        let start = Instant::now();
        debouncer.submit(1);
        assert_eq!(debouncer.poll_at(start + Duration::from_millis(50)), None);
        assert_eq!(
            debouncer.poll_at(start + Duration::from_millis(200)),
            Some(1)
        );
        // Consumed: nothing left to fire.
        assert_eq!(debouncer.poll_at(start + Duration::from_secs(10)), None);
    }

    #[test]
    fn later_submission_wins_and_resets_the_clock() {
        let mut debouncer = Debouncer::new(Duration::from_millis(100));
        debouncer.submit(1);
        let first_deadline = debouncer.deadline().unwrap();
        debouncer.submit(2);
        let second_deadline = debouncer.deadline().unwrap();
        assert!(second_deadline >= first_deadline);
        assert_eq!(debouncer.poll_at(second_deadline), Some(2));
    }

    #[test]
    fn clear_discards_the_pending_request() {
        let mut debouncer = Debouncer::new(Duration::from_millis(100));
        debouncer.submit(1);
        debouncer.clear();
        assert!(!debouncer.is_pending());
        assert_eq!(
            debouncer.poll_at(Instant::now() + Duration::from_secs(10)),
            None
        );
    }

    #[test]
    fn empty_debouncer_never_fires() {
        let mut debouncer: Debouncer<u32> = Debouncer::default();
        assert!(!debouncer.is_pending());
        assert_eq!(debouncer.poll(), None);
    }
}
