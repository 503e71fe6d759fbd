use std::time::Duration;

use crate::role::Role;

/// Everything a caller can recover from.
/// Broken invariants aren't here: they panic.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum Error {
    /// The role's turn didn't come before the deadline.
    #[error("{role} gave up waiting for its turn after {waited:?}")]
    GateTimeout { role: Role, waited: Duration },
    /// The resource lock wasn't grantable before the deadline.
    #[error("{role} gave up waiting for the resource lock after {waited:?}")]
    LockTimeout { role: Role, waited: Duration },
    /// The cancel token fired while the participant was suspended.
    #[error("{role} was cancelled")]
    Cancelled { role: Role },
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// The run deadline passed before every participant finished.
    #[error("run stalled after {completed} of {expected} operations")]
    Stalled { completed: u64, expected: u64 },
    #[error("can't spawn a participant: {0}")]
    Spawn(String),
    #[error("can't parse {0}")]
    Parse(String),
}

impl Error {
    /// timeouts and cancellation leave no trace in the gate or the lock => the call may be repeated
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::GateTimeout { .. } | Error::LockTimeout { .. } | Error::Cancelled { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
