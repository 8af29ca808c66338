//! Reusable N-party barrier
//!
//! Generation-counted: after the last party arrives, every waiter is
//! released and the barrier resets for the next round. There is no
//! timeout; a party that never arrives hangs the round, and diagnosing
//! that is a watchdog's job, not the barrier's.
//!
//! The driver observes progress without being a party through
//! [`StepBarrier::wait_generation`].

use std::sync::{Condvar, Mutex};

struct BarrierState {
    arrived: usize,
    generation: u64,
}

pub struct StepBarrier {
    state: Mutex<BarrierState>,
    cv: Condvar,
    parties: usize,
}

impl StepBarrier {
    /// `parties` must be at least 1; a single-party barrier releases
    /// immediately on arrival.
    pub fn new(parties: usize) -> Self {
        assert!(parties >= 1, "barrier needs at least one party");
        Self {
            state: Mutex::new(BarrierState {
                arrived: 0,
                generation: 0,
            }),
            cv: Condvar::new(),
            parties,
        }
    }

    #[inline]
    pub fn parties(&self) -> usize {
        self.parties
    }

    /// Completed rounds so far.
    pub fn generation(&self) -> u64 {
        self.state.lock().map(|s| s.generation).unwrap_or(0)
    }

    /// Arrive and block until all parties of this round have arrived.
    ///
    /// Returns true for the last arrival (the round leader).
    pub fn arrive(&self) -> bool {
        let mut state = match self.state.lock() {
            Ok(s) => s,
            Err(_) => return false,
        };
        state.arrived += 1;
        if state.arrived == self.parties {
            state.arrived = 0;
            state.generation += 1;
            self.cv.notify_all();
            return true;
        }
        let round = state.generation;
        while state.generation == round {
            state = match self.cv.wait(state) {
                Ok(s) => s,
                Err(_) => return false,
            };
        }
        false
    }

    /// Block until the generation counter reaches `target`. Not an
    /// arrival; does not count toward the party total.
    pub fn wait_generation(&self, target: u64) {
        let mut state = match self.state.lock() {
            Ok(s) => s,
            Err(_) => return,
        };
        while state.generation < target {
            state = match self.cv.wait(state) {
                Ok(s) => s,
                Err(_) => return,
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_single_party_releases_immediately() {
        let barrier = StepBarrier::new(1);
        assert!(barrier.arrive());
        assert!(barrier.arrive());
        assert_eq!(barrier.generation(), 2);
    }

    #[test]
    fn test_rendezvous() {
        let barrier = Arc::new(StepBarrier::new(4));
        let before = Arc::new(AtomicUsize::new(0));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let barrier = Arc::clone(&barrier);
                let before = Arc::clone(&before);
                thread::spawn(move || {
                    before.fetch_add(1, Ordering::SeqCst);
                    barrier.arrive();
                    // Everyone arrived before anyone was released.
                    assert_eq!(before.load(Ordering::SeqCst), 4);
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(barrier.generation(), 1);
    }

    #[test]
    fn test_reusable_across_rounds() {
        let barrier = Arc::new(StepBarrier::new(3));
        let handles: Vec<_> = (0..3)
            .map(|_| {
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    for _ in 0..50 {
                        barrier.arrive();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(barrier.generation(), 50);
    }

    #[test]
    fn test_exactly_one_leader_per_round() {
        let barrier = Arc::new(StepBarrier::new(4));
        let leaders = Arc::new(AtomicUsize::new(0));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let barrier = Arc::clone(&barrier);
                let leaders = Arc::clone(&leaders);
                thread::spawn(move || {
                    for _ in 0..25 {
                        if barrier.arrive() {
                            leaders.fetch_add(1, Ordering::SeqCst);
                        }
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(leaders.load(Ordering::SeqCst), 25);
    }

    #[test]
    fn test_observer_sees_completed_generation() {
        let barrier = Arc::new(StepBarrier::new(2));
        let workers: Vec<_> = (0..2)
            .map(|_| {
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.arrive();
                })
            })
            .collect();
        barrier.wait_generation(1);
        assert_eq!(barrier.generation(), 1);
        for h in workers {
            h.join().unwrap();
        }
    }
}
