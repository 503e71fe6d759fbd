//! Coordinated shutdown: one flag, many threads polling it at their suspension points.

use std::sync::{
    atomic::{AtomicBool, Ordering::Relaxed},
    Arc,
};

#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    stop: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    // Relaxed is enough: the waiters re-check it under the gate's mutex anyway
    pub fn cancel(&self) {
        self.stop.store(true, Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.stop.load(Relaxed)
    }
}
