//! Quiescence barrier between updates and maintenance.
//!
//! Any number of updates may be in flight together. Maintenance raises a hold
//! that blocks new updates, then waits for the in-flight count to drain to
//! zero before it touches shared state.

use parking_lot::{Condvar, Mutex};

#[derive(Debug, Default)]
struct BarrierState {
    hold_updates: bool,
    update_counter: usize,
}

#[derive(Debug, Default)]
pub(crate) struct UpdateBarrier {
    state: Mutex<BarrierState>,
    quiesced: Condvar,
    maintenance_finished: Condvar,
}

impl UpdateBarrier {
    /// Register an update, waiting out any active hold.
    pub(crate) fn enter_update(&self) {
        let mut state = self.state.lock();
        while state.hold_updates {
            self.maintenance_finished.wait(&mut state);
        }
        state.update_counter += 1;
    }

    pub(crate) fn exit_update(&self) {
        let mut state = self.state.lock();
        debug_assert!(state.update_counter > 0);
        state.update_counter = state.update_counter.saturating_sub(1);
        if state.hold_updates && state.update_counter == 0 {
            self.quiesced.notify_one();
        }
    }

    /// Block new updates and wait for in-flight ones to finish. Updates
    /// resume when the guard is dropped.
    pub(crate) fn quiesce(&self) -> QuiesceGuard<'_> {
        let mut state = self.state.lock();
        // One maintenance operation at a time; a concurrent hold is waited out.
        while state.hold_updates {
            self.maintenance_finished.wait(&mut state);
        }
        state.hold_updates = true;
        while state.update_counter > 0 {
            self.quiesced.wait(&mut state);
        }
        QuiesceGuard { barrier: self }
    }

    #[cfg(test)]
    pub(crate) fn in_flight(&self) -> usize {
        self.state.lock().update_counter
    }
}

#[must_use = "updates resume as soon as the guard is dropped"]
pub(crate) struct QuiesceGuard<'a> {
    barrier: &'a UpdateBarrier,
}

impl Drop for QuiesceGuard<'_> {
    fn drop(&mut self) {
        self.barrier.state.lock().hold_updates = false;
        self.barrier.maintenance_finished.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            atomic::{AtomicBool, AtomicUsize, Ordering},
            Arc,
        },
        thread,
        time::Duration,
    };

    use super::*;

    #[test]
    fn hold_blocks_new_updates_until_released() {
        let barrier = Arc::new(UpdateBarrier::default());
        let entered = Arc::new(AtomicBool::new(false));

        let guard = barrier.quiesce();
        let handle = {
            let barrier = Arc::clone(&barrier);
            let entered = Arc::clone(&entered);
            thread::spawn(move || {
                barrier.enter_update();
                entered.store(true, Ordering::SeqCst);
                barrier.exit_update();
            })
        };
        thread::sleep(Duration::from_millis(50));
        assert!(!entered.load(Ordering::SeqCst));
        drop(guard);
        handle.join().unwrap();
        assert!(entered.load(Ordering::SeqCst));
        assert_eq!(barrier.in_flight(), 0);
    }

    #[test]
    fn quiesce_waits_for_in_flight_updates() {
        let barrier = Arc::new(UpdateBarrier::default());
        barrier.enter_update();
        let quiesced = Arc::new(AtomicBool::new(false));
        let handle = {
            let barrier = Arc::clone(&barrier);
            let quiesced = Arc::clone(&quiesced);
            thread::spawn(move || {
                let _guard = barrier.quiesce();
                quiesced.store(true, Ordering::SeqCst);
            })
        };
        thread::sleep(Duration::from_millis(50));
        assert!(!quiesced.load(Ordering::SeqCst));
        barrier.exit_update();
        handle.join().unwrap();
        assert!(quiesced.load(Ordering::SeqCst));
    }

    #[test]
    fn updates_never_overlap_maintenance() {
        const MUTATORS: usize = 8;
        const ROUNDS: usize = 500;

        let barrier = Arc::new(UpdateBarrier::default());
        let active_updates = Arc::new(AtomicUsize::new(0));
        let in_maintenance = Arc::new(AtomicBool::new(false));
        let overlaps = Arc::new(AtomicUsize::new(0));
        let done = Arc::new(AtomicBool::new(false));

        let mutators: Vec<_> = (0..MUTATORS)
            .map(|seed| {
                let barrier = Arc::clone(&barrier);
                let active_updates = Arc::clone(&active_updates);
                let in_maintenance = Arc::clone(&in_maintenance);
                let overlaps = Arc::clone(&overlaps);
                thread::spawn(move || {
                    let mut rng = fastrand::Rng::with_seed(seed as u64);
                    for _ in 0..ROUNDS {
                        barrier.enter_update();
                        active_updates.fetch_add(1, Ordering::SeqCst);
                        if in_maintenance.load(Ordering::SeqCst) {
                            overlaps.fetch_add(1, Ordering::SeqCst);
                        }
                        if rng.bool() {
                            thread::yield_now();
                        }
                        active_updates.fetch_sub(1, Ordering::SeqCst);
                        barrier.exit_update();
                    }
                })
            })
            .collect();

        let maintainer = {
            let barrier = Arc::clone(&barrier);
            let active_updates = Arc::clone(&active_updates);
            let in_maintenance = Arc::clone(&in_maintenance);
            let overlaps = Arc::clone(&overlaps);
            let done = Arc::clone(&done);
            thread::spawn(move || {
                let mut holds = 0usize;
                while !done.load(Ordering::SeqCst) {
                    let guard = barrier.quiesce();
                    in_maintenance.store(true, Ordering::SeqCst);
                    if active_updates.load(Ordering::SeqCst) != 0 {
                        overlaps.fetch_add(1, Ordering::SeqCst);
                    }
                    thread::yield_now();
                    in_maintenance.store(false, Ordering::SeqCst);
                    drop(guard);
                    holds += 1;
                }
                holds
            })
        };

        for mutator in mutators {
            mutator.join().unwrap();
        }
        done.store(true, Ordering::SeqCst);
        let holds = maintainer.join().unwrap();

        assert!(holds > 0);
        assert_eq!(overlaps.load(Ordering::SeqCst), 0);
        assert_eq!(barrier.in_flight(), 0);
    }
}
