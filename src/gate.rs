//! Single-slot, non-blocking gate guarding bandwidth test execution.
//!
//! Acquisition never waits: a held gate means "a test is running" and the
//! caller gets a rejection. The slot is released when the returned
//! [`GatePermit`] is released or dropped, so every exit path of a test run
//! (including early returns and panics unwinding through it) frees it
//! exactly once.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Default)]
pub struct TestGate {
    held: Arc<AtomicBool>,
}

impl TestGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the slot if it is free. Returns `None` without side effects when
    /// another run already holds it.
    pub fn try_acquire(&self) -> Option<GatePermit> {
        self.held
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| GatePermit {
                held: Arc::clone(&self.held),
                released: false,
            })
    }

    pub fn is_held(&self) -> bool {
        self.held.load(Ordering::Acquire)
    }
}

/// Proof of ownership of the gate.
#[derive(Debug)]
#[must_use = "dropping the permit releases the gate immediately"]
pub struct GatePermit {
    held: Arc<AtomicBool>,
    released: bool,
}

impl GatePermit {
    /// Release the slot now rather than at end of scope.
    pub fn release(mut self) {
        self.release_inner();
    }

    fn release_inner(&mut self) {
        if !self.released {
            self.released = true;
            self.held.store(false, Ordering::Release);
        }
    }
}

impl Drop for GatePermit {
    fn drop(&mut self) {
        self.release_inner();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_acquire_is_rejected() {
        let gate = TestGate::new();
        let permit = gate.try_acquire().expect("first acquire");
        assert!(gate.is_held());
        assert!(gate.try_acquire().is_none());
        // The failed attempt must not have disturbed the holder.
        assert!(gate.is_held());
        permit.release();
        assert!(!gate.is_held());
    }

    #[test]
    fn test_drop_releases() {
        let gate = TestGate::new();
        {
            let _permit = gate.try_acquire().unwrap();
            assert!(gate.is_held());
        }
        assert!(!gate.is_held());
        assert!(gate.try_acquire().is_some());
    }

    #[test]
    fn test_clones_share_the_slot() {
        let gate = TestGate::new();
        let other = gate.clone();
        let _permit = gate.try_acquire().unwrap();
        assert!(other.is_held());
        assert!(other.try_acquire().is_none());
    }

    #[test]
    fn test_release_after_reacquire_does_not_free_new_owner() {
        let gate = TestGate::new();
        let first = gate.try_acquire().unwrap();
        first.release();
        let _second = gate.try_acquire().unwrap();
        // The first permit is gone; nothing else can clear the flag.
        assert!(gate.is_held());
        assert!(gate.try_acquire().is_none());
    }

    #[test]
    fn test_at_most_one_owner_under_contention() {
        let gate = TestGate::new();
        let winners = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let barrier = std::sync::Arc::new(std::sync::Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let gate = gate.clone();
                let winners = winners.clone();
                let barrier = barrier.clone();
                std::thread::spawn(move || {
                    barrier.wait();
                    if let Some(permit) = gate.try_acquire() {
                        winners.fetch_add(1, Ordering::SeqCst);
                        // Hold until every contender has tried.
                        std::thread::sleep(std::time::Duration::from_millis(50));
                        drop(permit);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(winners.load(Ordering::SeqCst), 1);
        assert!(!gate.is_held());
    }
}
