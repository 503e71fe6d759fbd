//! # Resource lock
//! Shared / exclusive access to the payload: N readers or 1 writer, never both.
//!
//! The locking itself is done by [parking_lot::RwLock], as it's fast, doesn't poison and, the most
//! important part, knows how to give up after a timeout.
//!
//! On top of it there's a single state word that mirrors who's inside:
//! - `0` - nobody
//! - `N` - N readers
//! - `u32::MAX` - a writer
//!
//! The word is only touched while the matching guard is held, so it never lies.
//! It's there to check mutual exclusion on every entry and to let tests look at the holders.
//!
//! There's no reentrancy and no upgrade from read to write.

use std::{
    ops::{Deref, DerefMut},
    sync::atomic::{
        AtomicU32,
        Ordering::{Acquire, Release},
    },
    time::{Duration, Instant},
};

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::{
    cancel::CancelToken,
    error::{Error, Result},
    role::Role,
};

const EXCLUSIVE: u32 = u32::MAX;

/// how long a single blocking attempt lasts before the cancel token is looked at again
const POLL_SLICE: Duration = Duration::from_millis(5);

/// Who holds the lock at the moment of the snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Holders {
    Free,
    Shared(u32),
    Exclusive,
}

pub struct ResourceLock<Y> {
    state: AtomicU32,
    value: RwLock<Y>,
}

impl<Y> ResourceLock<Y> {
    pub fn new(value: Y) -> Self {
        Self {
            state: AtomicU32::new(0),
            value: RwLock::new(value),
        }
    }

    /// lock for reads, blocks as long as it takes
    pub fn read(&self) -> ReadGuard<'_, Y> {
        ReadGuard::new(self.value.read(), &self.state)
    }

    /// lock for writes, blocks as long as it takes
    pub fn write(&self) -> WriteGuard<'_, Y> {
        WriteGuard::new(self.value.write(), &self.state)
    }

    /// Read lock that gives up after `timeout` (`None` - never) or once `cancel` fires.
    /// Failure leaves the lock untouched.
    pub fn try_read_for(
        &self,
        timeout: Option<Duration>,
        cancel: &CancelToken,
    ) -> Result<ReadGuard<'_, Y>> {
        poll(Role::Reader, timeout, cancel, |slice| {
            self.value
                .try_read_for(slice)
                .map(|guard| ReadGuard::new(guard, &self.state))
        })
    }

    /// Write lock that gives up after `timeout` (`None` - never) or once `cancel` fires.
    /// Failure leaves the lock untouched.
    pub fn try_write_for(
        &self,
        timeout: Option<Duration>,
        cancel: &CancelToken,
    ) -> Result<WriteGuard<'_, Y>> {
        poll(Role::Writer, timeout, cancel, |slice| {
            self.value
                .try_write_for(slice)
                .map(|guard| WriteGuard::new(guard, &self.state))
        })
    }

    pub fn holders(&self) -> Holders {
        match self.state.load(Acquire) {
            0 => Holders::Free,
            EXCLUSIVE => Holders::Exclusive,
            n => Holders::Shared(n),
        }
    }

    pub fn into_inner(self) -> Y {
        self.value.into_inner()
    }
}

impl<Y: Default> Default for ResourceLock<Y> {
    fn default() -> Self {
        Self::new(Y::default())
    }
}

/// try to get a guard in short slices, so the cancel token gets noticed in time
fn poll<G>(
    role: Role,
    timeout: Option<Duration>,
    cancel: &CancelToken,
    mut attempt: impl FnMut(Duration) -> Option<G>,
) -> Result<G> {
    let started = Instant::now();
    loop {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled { role });
        }
        let slice = match timeout {
            Some(t) => t.saturating_sub(started.elapsed()).min(POLL_SLICE),
            None => POLL_SLICE,
        };
        if let Some(guard) = attempt(slice) {
            return Ok(guard);
        }
        if let Some(t) = timeout {
            let waited = started.elapsed();
            if waited >= t {
                return Err(Error::LockTimeout { role, waited });
            }
        }
    }
}

pub struct ReadGuard<'a, Y> {
    guard: RwLockReadGuard<'a, Y>,
    state: &'a AtomicU32,
}

impl<'a, Y> ReadGuard<'a, Y> {
    fn new(guard: RwLockReadGuard<'a, Y>, state: &'a AtomicU32) -> Self {
        let before = state.fetch_add(1, Acquire);
        // a writer inside or a wrapped counter - either way the exclusion is gone
        assert!(before < EXCLUSIVE - 1, "reader admitted next to a writer");
        Self { guard, state }
    }
}

impl<Y> Deref for ReadGuard<'_, Y> {
    type Target = Y;
    fn deref(&self) -> &Self::Target {
        &self.guard
    }
}

/// the ledger goes first, the actual lock is released right after, when the fields drop
impl<Y> Drop for ReadGuard<'_, Y> {
    fn drop(&mut self) {
        self.state.fetch_sub(1, Release);
    }
}

pub struct WriteGuard<'a, Y> {
    guard: RwLockWriteGuard<'a, Y>,
    state: &'a AtomicU32,
}

impl<'a, Y> WriteGuard<'a, Y> {
    fn new(guard: RwLockWriteGuard<'a, Y>, state: &'a AtomicU32) -> Self {
        let before = state.swap(EXCLUSIVE, Acquire);
        assert_eq!(0, before, "writer admitted next to other holders");
        Self { guard, state }
    }
}

impl<Y> Deref for WriteGuard<'_, Y> {
    type Target = Y;
    fn deref(&self) -> &Self::Target {
        &self.guard
    }
}

impl<Y> DerefMut for WriteGuard<'_, Y> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.guard
    }
}

impl<Y> Drop for WriteGuard<'_, Y> {
    fn drop(&mut self) {
        self.state.store(0, Release);
    }
}
