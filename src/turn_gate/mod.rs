//! # Turn gate
//! A fairness controller in front of the [ResourceLock](crate::resource_lock::ResourceLock).
//!
//! The gate lets in participants of one role only - whoever's turn it is. Once `quota[role]` of them
//! have completed, the turn goes to the other role and everybody waiting is woken up.
//! So any waiting participant waits for at most one full batch of the opposite role.
//!
//! It's a classic monitor: one mutex over all the counters plus a condvar to wait on.
//! The predicate (`turn == my role`) is re-checked after every wake-up, so spurious or
//! unrelated wake-ups do no harm.
//!
//! The gate is always released before the resource lock is requested, and nobody asks for the gate
//! while holding the resource lock => there's no lock ordering to deadlock on.
//!
//! ## Stalls
//! If a role completes fewer operations in total than a multiple of its quota,
//! its last phase never reaches the quota and the turn never flips back.
//! The gate doesn't try to fix it, the timed [TurnGate::enter_phase_until] is there to notice it.

use std::time::Instant;

use log::{debug, trace};
use parking_lot::{Condvar, Mutex};

use crate::{
    cancel::CancelToken,
    error::{Error, Result},
    role::{PerRole, Role},
};

/// All the gate's counters, only ever touched under the gate's mutex
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GateState {
    /// whose phase is open
    pub turn: Role,
    /// admitted but not completed yet
    pub active: PerRole<u32>,
    /// completed since the role's counter was reset last time
    pub completed: PerRole<u32>,
    /// completed batches of both roles so far
    pub batches: u64,
    /// number of times the turn actually changed hands
    pub flips: u64,
}

/// A turn change made by [TurnGate::complete_phase]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Flip {
    /// the role whose batch was completed, i.e. the turn before
    pub from: Role,
    /// the turn after
    pub to: Role,
    /// flip's sequence number, starting from 1
    pub flips: u64,
}

pub struct TurnGate {
    quota: PerRole<u32>,
    state: Mutex<GateState>,
    turn_changed: Condvar,
}

impl TurnGate {
    pub fn new(quota: PerRole<u32>, initial: Role) -> Result<Self> {
        if quota.writer == 0 || quota.reader == 0 {
            return Err(Error::InvalidConfig(format!(
                "group quota must be positive, got {quota:?}"
            )));
        }
        Ok(Self {
            quota,
            state: Mutex::new(GateState {
                turn: initial,
                active: PerRole::default(),
                completed: PerRole::default(),
                batches: 0,
                flips: 0,
            }),
            turn_changed: Condvar::new(),
        })
    }

    pub fn quota(&self) -> PerRole<u32> {
        self.quota
    }

    /// Block until it's `role`'s turn, then count the caller as active.
    /// Waits forever if the turn never comes.
    pub fn enter_phase(&self, role: Role) {
        let mut state = self.state.lock();
        while state.turn != role {
            // unlocks the mutex while waiting, re-locks on wake-up
            self.turn_changed.wait(&mut state);
        }
        state.active[role] += 1;
        trace!("{role} admitted, {} active", state.active[role]);
    }

    /// Same as [TurnGate::enter_phase], but gives up at `deadline` (`None` - never) or once `cancel` fires.
    /// Giving up leaves the counters untouched.
    ///
    /// Whoever cancels must call [TurnGate::wake_all] afterwards, or the waiters only notice at their deadline.
    pub fn enter_phase_until(
        &self,
        role: Role,
        deadline: Option<Instant>,
        cancel: &CancelToken,
    ) -> Result<()> {
        let started = Instant::now();
        let mut state = self.state.lock();
        while state.turn != role {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled { role });
            }
            match deadline {
                Some(deadline) => {
                    let timed_out = self
                        .turn_changed
                        .wait_until(&mut state, deadline)
                        .timed_out();
                    if timed_out && state.turn != role {
                        return Err(Error::GateTimeout {
                            role,
                            waited: started.elapsed(),
                        });
                    }
                }
                None => self.turn_changed.wait(&mut state),
            }
        }
        state.active[role] += 1;
        trace!("{role} admitted, {} active", state.active[role]);
        Ok(())
    }

    /// Count the caller as completed; flip the turn and wake everybody if the role's quota is met.
    /// Returns the flip if the turn changed hands: a batch completed after its role's turn is over changes nothing.
    /// Call it after the resource lock is released. Never blocks for long.
    ///
    /// # Panics
    /// - the role has no active participants => completion without admission
    /// - the completion counter went past the quota
    pub fn complete_phase(&self, role: Role) -> Option<Flip> {
        let mut state = self.state.lock();
        assert!(
            state.active[role] > 0,
            "{role} completed a phase it wasn't admitted to"
        );
        state.active[role] -= 1;
        state.completed[role] += 1;
        assert!(
            state.completed[role] <= self.quota[role],
            "{role} completions {} exceed the quota {}",
            state.completed[role],
            self.quota[role]
        );
        if state.completed[role] < self.quota[role] {
            return None;
        }

        // the role's batch is over: the turn goes to the other one
        // a late batch of the role whose turn is already over leaves the turn where it is
        state.completed[role] = 0;
        state.batches += 1;
        if state.turn != role {
            trace!("late {role} batch, the turn stays with {}", state.turn);
            return None;
        }
        state.turn = role.other();
        state.flips += 1;
        let flip = Flip {
            from: role,
            to: state.turn,
            flips: state.flips,
        };
        self.turn_changed.notify_all();
        drop(state);

        debug!("{role} batch is done, turn {} -> {}", flip.from, flip.to);
        Some(flip)
    }

    /// Undo an admission: the caller leaves without completing, e.g. it couldn't get the resource lock.
    /// Nothing is counted as completed, the turn stays as it is.
    pub fn abandon_phase(&self, role: Role) {
        let mut state = self.state.lock();
        assert!(
            state.active[role] > 0,
            "{role} abandoned a phase it wasn't admitted to"
        );
        state.active[role] -= 1;
        trace!("{role} left without completing");
    }

    /// Wake all the waiters to let them re-check their predicate and the cancel token
    pub fn wake_all(&self) {
        // taking the mutex orders this wake after any waiter that's about to sleep
        let _state = self.state.lock();
        self.turn_changed.notify_all();
    }

    pub fn snapshot(&self) -> GateState {
        *self.state.lock()
    }
}
