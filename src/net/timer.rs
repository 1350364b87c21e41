//! One-shot connection timers.
//!
//! A timer is plain state: an optional deadline. The worker polls deadlines
//! from its event loop and fires expired timers; an expired timer disarms
//! itself and stays disarmed until something arms it again.

use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    Recv,
    Send,
}

#[derive(Debug, Clone, Default)]
pub struct Timer {
    deadline: Option<Instant>,
}

impl Timer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm (or re-arm) the timer to fire `after` from now.
    pub fn set_after(&mut self, after: Duration) {
        self.deadline = Some(Instant::now() + after);
    }

    /// Disarm without firing.
    pub fn suspend(&mut self) {
        self.deadline = None;
    }

    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Disarm and report true if the deadline has passed at `now`.
    pub fn expire(&mut self, now: Instant) -> bool {
        match self.deadline {
            Some(deadline) if deadline <= now => {
                self.deadline = None;
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expires_once() {
        let mut timer = Timer::new();
        timer.set_after(Duration::from_millis(10));
        let later = Instant::now() + Duration::from_secs(1);

        assert!(timer.expire(later));
        assert!(!timer.is_armed());
        assert!(!timer.expire(later));
    }

    #[test]
    fn not_before_deadline() {
        let mut timer = Timer::new();
        timer.set_after(Duration::from_secs(60));
        assert!(!timer.expire(Instant::now()));
        assert!(timer.is_armed());
    }

    #[test]
    fn suspend_disarms() {
        let mut timer = Timer::new();
        timer.set_after(Duration::from_millis(1));
        timer.suspend();
        assert!(timer.deadline().is_none());
        assert!(!timer.expire(Instant::now() + Duration::from_secs(1)));
    }
}
