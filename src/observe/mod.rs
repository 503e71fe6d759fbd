//! # Observability hook
//! Each completed critical section produces exactly one [OperationEvent].
//! The core hands it to an [Observer] and never prints anything on its own.

use std::time::Instant;

use log::info;
use parking_lot::Mutex;

use crate::role::Role;

pub mod console;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OperationEvent {
    pub role: Role,
    pub participant_id: u32,
    /// 0-based index of the operation within the participant's run
    pub operation_index: u32,
    /// the resource's value as seen under the lock, after the write for writers
    pub value: i64,
    pub timestamp: Instant,
}

/// Called from the participants' threads, while the resource lock is still held => keep it short
pub trait Observer: Sync {
    fn on_operation(&self, event: &OperationEvent);
}

impl<F> Observer for F
where
    F: Fn(&OperationEvent) + Sync,
{
    fn on_operation(&self, event: &OperationEvent) {
        self(event)
    }
}

pub struct NoopObserver;

impl Observer for NoopObserver {
    fn on_operation(&self, _: &OperationEvent) {}
}

/// One `info` line per operation
pub struct LogObserver;

impl Observer for LogObserver {
    fn on_operation(&self, event: &OperationEvent) {
        let verb = match event.role {
            Role::Writer => "writes",
            Role::Reader => "reads",
        };
        info!(
            "{} {} {verb} value: {}",
            event.role, event.participant_id, event.value
        );
    }
}

/// Keeps all the events in the order they arrived
#[derive(Default)]
pub struct Recorder {
    events: Mutex<Vec<OperationEvent>>,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }

    pub fn events(&self) -> Vec<OperationEvent> {
        self.events.lock().clone()
    }

    pub fn into_events(self) -> Vec<OperationEvent> {
        self.events.into_inner()
    }
}

impl Observer for Recorder {
    fn on_operation(&self, event: &OperationEvent) {
        self.events.lock().push(*event);
    }
}
