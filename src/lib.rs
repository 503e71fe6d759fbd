//! # Group-alternating reader / writer scheduling
//!
//! Writers and readers take turns in batches: up to `quota[writer]` writer operations, then up to
//! `quota[reader]` reader operations, and so on. Nobody starves for longer than one batch of the other role.
//!
//! 2 independent layers:
//! - [TurnGate] decides whose turn it is
//! - [ResourceLock] keeps readers and writers of the same turn from stepping on each other
//!
//! The gate is always released before the lock is requested.
//!
//! [Scheduler] spawns the participants and runs them to completion.

pub mod cancel;
pub mod error;
pub mod observe;
pub mod participant;
pub mod resource_lock;
pub mod role;
pub mod scheduler;
pub mod turn_gate;

pub use cancel::CancelToken;
pub use error::{Error, Result};
pub use observe::{LogObserver, NoopObserver, Observer, OperationEvent, Recorder};
pub use participant::{Participant, ParticipantReport, ParticipantState};
pub use resource_lock::{Holders, ResourceLock};
pub use role::{PerRole, Role};
pub use scheduler::{Config, RunReport, Scheduler};
pub use turn_gate::{Flip, GateState, TurnGate};
