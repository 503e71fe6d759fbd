//! # Participant
//! One thread, one role, a fixed number of operations. Every operation goes through the same cycle:
//!
//! `WaitingForTurn -> Active -> InCriticalSection -> Completed -> (WaitingForTurn | Done)`
//!
//! Note the gap between `Active` (admitted by the gate) and `InCriticalSection` (holding the lock):
//! participants of the same role race for the lock in any order, which is fine as there's
//! no order promised within a phase.
//!
//! Nothing survives between the cycles except the countdown.

use std::{
    sync::atomic::{AtomicU64, Ordering::Relaxed},
    thread::sleep,
    time::{Duration, Instant},
};

use log::trace;
use strum_macros::Display;

use crate::{
    cancel::CancelToken,
    error::Result,
    observe::{OperationEvent, Observer},
    resource_lock::ResourceLock,
    role::{PerRole, Role},
    turn_gate::TurnGate,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum ParticipantState {
    WaitingForTurn,
    Active,
    InCriticalSection,
    Completed,
    Done,
}

/// Everything the participants share
#[derive(Clone, Copy)]
pub struct Context<'a> {
    pub gate: &'a TurnGate,
    pub resource: &'a ResourceLock<i64>,
    pub observer: &'a dyn Observer,
    pub cancel: &'a CancelToken,
    /// completed operations of all the participants together
    pub progress: &'a AtomicU64,
    /// delay inside the critical section, only to widen the interleaving window
    pub think_time: PerRole<Duration>,
    /// how long each suspension point may last, `None` - forever
    pub op_timeout: Option<Duration>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParticipantReport {
    pub id: u32,
    pub role: Role,
    pub completed_ops: u32,
    /// how many times this participant's completion handed the turn over
    pub flips: u32,
}

#[derive(Debug)]
pub struct Participant {
    pub id: u32,
    pub role: Role,
    pub ops_remaining: u32,
    state: ParticipantState,
}

impl Participant {
    pub fn new(id: u32, role: Role, ops: u32) -> Self {
        Self {
            id,
            role,
            ops_remaining: ops,
            state: ParticipantState::WaitingForTurn,
        }
    }

    /// Run all the operations. Stops at the first timeout or cancellation,
    /// leaving the gate and the lock as if the failed operation never started.
    pub fn run(mut self, ctx: Context<'_>) -> Result<ParticipantReport> {
        let mut report = ParticipantReport {
            id: self.id,
            role: self.role,
            completed_ops: 0,
            flips: 0,
        };

        while self.ops_remaining > 0 {
            self.switch(ParticipantState::WaitingForTurn);
            // a timeout too far in the future to represent means no deadline
            let deadline = ctx.op_timeout.and_then(|t| Instant::now().checked_add(t));
            ctx.gate.enter_phase_until(self.role, deadline, ctx.cancel)?;
            self.switch(ParticipantState::Active);

            if let Err(e) = self.critical_section(&ctx, report.completed_ops) {
                ctx.gate.abandon_phase(self.role);
                return Err(e);
            }

            // the resource lock is released by now
            self.switch(ParticipantState::Completed);
            if ctx.gate.complete_phase(self.role).is_some() {
                report.flips += 1;
            }
            ctx.progress.fetch_add(1, Relaxed);
            report.completed_ops += 1;
            self.ops_remaining -= 1;
        }

        self.switch(ParticipantState::Done);
        Ok(report)
    }

    /// Lock in the role's mode, do the operation, let the observer know, release on the way out
    fn critical_section(&mut self, ctx: &Context<'_>, operation_index: u32) -> Result<i64> {
        let value = match self.role {
            Role::Writer => {
                let mut resource = ctx.resource.try_write_for(ctx.op_timeout, ctx.cancel)?;
                self.switch(ParticipantState::InCriticalSection);
                *resource += i64::from(self.id);
                self.finish_operation(ctx, operation_index, *resource)
            }
            Role::Reader => {
                let resource = ctx.resource.try_read_for(ctx.op_timeout, ctx.cancel)?;
                self.switch(ParticipantState::InCriticalSection);
                self.finish_operation(ctx, operation_index, *resource)
            }
        };
        Ok(value)
    }

    fn finish_operation(&self, ctx: &Context<'_>, operation_index: u32, value: i64) -> i64 {
        ctx.observer.on_operation(&OperationEvent {
            role: self.role,
            participant_id: self.id,
            operation_index,
            value,
            timestamp: Instant::now(),
        });
        let think_time = ctx.think_time[self.role];
        if !think_time.is_zero() {
            sleep(think_time);
        }
        value
    }

    fn switch(&mut self, next: ParticipantState) {
        trace!("{} {}: {} -> {next}", self.role, self.id, self.state);
        self.state = next;
    }
}
