//! Reusable rendezvous barrier used to detect the end of a walk.
//!
//! Every worker and the driver arrive at the barrier when they find the work
//! queue empty. Only when all parties are waiting at the same time is the
//! walk finished. A party that gives up waiting breaks the barrier so that
//! the others return to polling the queue too; a broken barrier rejects new
//! arrivals until it is [`reset`](TerminationBarrier::reset).

use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// Outcome of [`TerminationBarrier::wait`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BarrierWait {
    /// All parties arrived.
    Arrived,
    /// The wait timed out or the barrier was broken or reset.
    TimedOut,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Filling,
    Draining,
    Resetting,
    Broken,
}

#[derive(Debug)]
struct State {
    phase: Phase,
    count: usize,
}

#[derive(Debug)]
pub struct TerminationBarrier {
    parties: usize,
    state: Mutex<State>,
    cond: Condvar,
}

impl TerminationBarrier {
    pub fn new(parties: usize) -> Self {
        Self {
            parties: parties.max(1),
            state: Mutex::new(State {
                phase: Phase::Filling,
                count: 0,
            }),
            cond: Condvar::new(),
        }
    }

    pub fn parties(&self) -> usize {
        self.parties
    }

    /// Waits for all parties, giving up after `timeout`. Giving up breaks
    /// the barrier for everybody waiting in the same round.
    pub fn wait(&self, timeout: Duration) -> BarrierWait {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();

        // A previous round is still being left.
        while matches!(state.phase, Phase::Draining | Phase::Resetting) {
            if self.cond.wait_until(&mut state, deadline).timed_out() {
                return BarrierWait::TimedOut;
            }
        }
        if state.phase == Phase::Broken {
            return BarrierWait::TimedOut;
        }

        state.count += 1;
        let outcome = if state.count == self.parties {
            state.phase = Phase::Draining;
            self.cond.notify_all();
            BarrierWait::Arrived
        } else {
            loop {
                if state.phase != Phase::Filling {
                    break if state.phase == Phase::Draining {
                        BarrierWait::Arrived
                    } else {
                        BarrierWait::TimedOut
                    };
                }
                if self.cond.wait_until(&mut state, deadline).timed_out()
                    && state.phase == Phase::Filling
                {
                    state.phase = Phase::Broken;
                    self.cond.notify_all();
                    break BarrierWait::TimedOut;
                }
            }
        };

        state.count -= 1;
        if state.count == 0 && matches!(state.phase, Phase::Draining | Phase::Resetting) {
            state.phase = Phase::Filling;
            self.cond.notify_all();
        }
        outcome
    }

    /// Returns the barrier to its initial state. Parties still waiting
    /// return [`BarrierWait::TimedOut`].
    pub fn reset(&self) {
        let mut state = self.state.lock();
        if state.count > 0 {
            if matches!(state.phase, Phase::Filling | Phase::Broken) {
                state.phase = Phase::Resetting;
            }
        } else {
            state.phase = Phase::Filling;
        }
        self.cond.notify_all();
    }

    /// Number of parties currently waiting in the filling round.
    pub fn n_waiting(&self) -> usize {
        let state = self.state.lock();
        if state.phase == Phase::Filling {
            state.count
        } else {
            0
        }
    }

    pub fn is_broken(&self) -> bool {
        self.state.lock().phase == Phase::Broken
    }
}
