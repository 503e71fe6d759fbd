//! # Scheduler
//! Builds the gate and the resource, spawns every participant on its own thread and waits for all of them.
//!
//! A run ends in one of 3 ways:
//! - everybody is done => [RunReport]
//! - a participant gave up (see `op_timeout`) => the rest are cancelled, the participant's error is returned
//! - `run_timeout` passed => a watchdog cancels everybody, [Error::Stalled] is returned
//!
//! Either way all the threads are joined before [Scheduler::run] returns.

use std::{
    panic::resume_unwind,
    sync::{
        atomic::{AtomicU64, Ordering::Relaxed},
        mpsc::{self, RecvTimeoutError},
    },
    thread::{self, Scope, ScopedJoinHandle},
    time::{Duration, Instant},
};

use log::{debug, info, warn};
use strum::IntoEnumIterator;

use crate::{
    cancel::CancelToken,
    error::{Error, Result},
    observe::Observer,
    participant::{Context, Participant, ParticipantReport},
    resource_lock::ResourceLock,
    role::{PerRole, Role},
    turn_gate::{GateState, TurnGate},
};

mod config;

pub use config::{Config, Key};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub final_value: i64,
    pub ops: PerRole<u64>,
    /// completed batches of both roles
    pub batches: u64,
    /// times the turn changed hands, at most `batches`
    pub flips: u64,
    pub elapsed: Duration,
    pub participants: Vec<ParticipantReport>,
}

pub struct Scheduler {
    config: Config,
}

impl Scheduler {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Run every participant to completion, see the module docs for the ways it can end
    pub fn run(&self, observer: &dyn Observer) -> Result<RunReport> {
        let config = &self.config;
        config.validate()?;
        if let Some(role) = config.stall_risk() {
            warn!("{role} phase may never complete with {config:?}");
        }

        let gate = TurnGate::new(config.quota, config.initial_turn)?;
        let resource = ResourceLock::new(0);
        let cancel = CancelToken::new();
        let progress = AtomicU64::new(0);
        let ctx = Context {
            gate: &gate,
            resource: &resource,
            observer,
            cancel: &cancel,
            progress: &progress,
            think_time: config.think_time,
            op_timeout: config.op_timeout,
        };

        let started = Instant::now();
        let (results, stalled) = thread::scope(|s| {
            let (done_tx, done_rx) = mpsc::channel::<()>();
            let (cancel, gate) = (ctx.cancel, ctx.gate);
            let watchdog = config.run_timeout.map(|timeout| {
                s.spawn(move || match done_rx.recv_timeout(timeout) {
                    Err(RecvTimeoutError::Timeout) => {
                        warn!("run isn't over after {timeout:?}, cancelling");
                        cancel.cancel();
                        gate.wake_all();
                        true
                    }
                    _ => false,
                })
            });

            let handles = self.spawn_all(s, ctx);
            let results: Vec<_> = match handles {
                Ok(handles) => handles.into_iter().map(|h| join_or_unwind(h, ctx)).collect(),
                Err(e) => vec![Err(e)],
            };

            // let the watchdog go
            drop(done_tx);
            let fired = watchdog.is_some_and(|w| join_or_unwind(w, ctx));
            // the deadline may pass right after the last participant is done
            let stalled = fired && results.iter().any(|r| r.is_err());
            (results, stalled)
        });
        let elapsed = started.elapsed();

        if stalled {
            let expected = config.expected_ops();
            return Err(Error::Stalled {
                completed: progress.load(Relaxed),
                expected: expected.writer + expected.reader,
            });
        }

        // the first participant's failure is the reason, the others were cancelled because of it
        let mut participants = Vec::with_capacity(results.len());
        let mut cancelled = None;
        for result in results {
            match result {
                Ok(report) => participants.push(report),
                Err(e @ Error::Cancelled { .. }) => cancelled = cancelled.or(Some(e)),
                Err(e) => return Err(e),
            }
        }
        if let Some(e) = cancelled {
            return Err(e);
        }

        let mut ops = PerRole::default();
        for p in &participants {
            ops[p.role] += u64::from(p.completed_ops);
        }
        let GateState { batches, flips, .. } = gate.snapshot();
        let final_value = resource.into_inner();
        info!(
            "all participants are done in {elapsed:?}, {batches} batches, {flips} turn flips, final value {final_value}"
        );
        Ok(RunReport {
            final_value,
            ops,
            batches,
            flips,
            elapsed,
            participants,
        })
    }

    /// writers first, then readers
    fn spawn_all<'scope, 'env>(
        &self,
        s: &'scope Scope<'scope, 'env>,
        ctx: Context<'env>,
    ) -> Result<Vec<ScopedJoinHandle<'scope, Result<ParticipantReport>>>> {
        let mut handles = Vec::new();
        for role in Role::iter() {
            for id in 1..=self.config.population[role] {
                let participant = Participant::new(id, role, self.config.ops[role]);
                let spawned = thread::Builder::new()
                    .name(format!("{role}-{id}"))
                    .spawn_scoped(s, move || {
                        let result = participant.run(ctx);
                        if let Err(e) = &result {
                            debug!("{role} {id} stopped: {e}");
                            stop_everybody(ctx);
                        }
                        result
                    });
                match spawned {
                    Ok(handle) => handles.push(handle),
                    Err(e) => {
                        // the ones already running would wait for the missing one forever
                        stop_everybody(ctx);
                        return Err(Error::Spawn(e.to_string()));
                    }
                }
            }
        }
        Ok(handles)
    }
}

fn stop_everybody(ctx: Context<'_>) {
    ctx.cancel.cancel();
    ctx.gate.wake_all();
}

/// a panicked thread means a broken invariant => stop the others and pass the panic on
fn join_or_unwind<T>(handle: ScopedJoinHandle<'_, T>, ctx: Context<'_>) -> T {
    match handle.join() {
        Ok(result) => result,
        Err(panic) => {
            stop_everybody(ctx);
            resume_unwind(panic)
        }
    }
}

#[cfg(test)]
mod test {
    use std::{
        collections::HashSet,
        panic::{catch_unwind, AssertUnwindSafe},
    };

    use crate::observe::{NoopObserver, OperationEvent, Recorder};

    use super::*;

    fn quick(population: PerRole<u32>, ops: PerRole<u32>, quota: PerRole<u32>) -> Config {
        Config {
            population,
            ops,
            quota,
            think_time: PerRole::new(Duration::from_millis(2), Duration::from_millis(1)),
            run_timeout: Some(Duration::from_secs(30)),
            ..Config::default()
        }
    }

    /// consecutive events of the same role
    fn phases(events: &[OperationEvent]) -> Vec<Vec<OperationEvent>> {
        let mut phases: Vec<Vec<OperationEvent>> = Vec::new();
        for e in events {
            match phases.last_mut() {
                Some(phase) if phase[0].role == e.role => phase.push(*e),
                _ => phases.push(vec![*e]),
            }
        }
        phases
    }

    #[test]
    fn test_three_writers_one_op_each() {
        let config = quick(PerRole::new(3, 0), PerRole::new(1, 0), PerRole::new(3, 5));
        let recorder = Recorder::new();

        let report = Scheduler::new(config).run(&recorder).unwrap();

        assert_eq!(6, report.final_value);
        assert_eq!((1, 1), (report.batches, report.flips));
        assert_eq!(PerRole::new(3, 0), report.ops);

        // writes are serialized => the values are prefix sums of some permutation of 1, 2, 3
        let events = recorder.into_events();
        let mut ids: Vec<_> = events.iter().map(|e| e.participant_id).collect();
        let mut sum = 0;
        for (e, id) in events.iter().zip(&ids) {
            sum += i64::from(*id);
            assert_eq!(sum, e.value);
        }
        ids.sort();
        assert_eq!(vec![1, 2, 3], ids);
    }

    #[test]
    fn test_too_few_readers_stall() {
        let config = Config {
            run_timeout: Some(Duration::from_millis(300)),
            ..quick(PerRole::new(3, 2), PerRole::new(1, 1), PerRole::new(3, 5))
        };
        // a 2nd writer's operation can't start: the readers' phase never ends
        let config = Config {
            ops: PerRole::new(2, 1),
            ..config
        };
        assert_eq!(Some(Role::Reader), config.stall_risk());

        let started = Instant::now();
        let err = Scheduler::new(config).run(&NoopObserver).unwrap_err();

        // 3 writes end the first batch, up to 2 more were already admitted, then both reads
        match err {
            Error::Stalled {
                completed,
                expected,
            } => {
                assert_eq!(8, expected);
                assert!((5..8).contains(&completed), "{completed} completed");
            }
            e => panic!("unexpected {e}"),
        }
        assert!(started.elapsed() >= Duration::from_millis(300));
    }

    #[test]
    fn test_op_timeout_stops_the_run() {
        let config = Config {
            op_timeout: Some(Duration::from_millis(50)),
            run_timeout: None,
            ..quick(PerRole::new(1, 0), PerRole::new(2, 0), PerRole::new(1, 1))
        };
        let err = Scheduler::new(config).run(&NoopObserver).unwrap_err();
        assert!(matches!(err, Error::GateTimeout { role: Role::Writer, .. }));
    }

    #[test]
    fn test_invalid_config_spawns_nothing() {
        let config = Config {
            quota: PerRole::new(0, 5),
            ..Config::default()
        };
        let recorder = Recorder::new();
        assert!(matches!(
            Scheduler::new(config).run(&recorder),
            Err(Error::InvalidConfig(_))
        ));
        assert!(recorder.is_empty());
    }

    #[test]
    fn test_balanced_population_runs_to_completion() {
        let config = quick(PerRole::new(3, 5), PerRole::new(4, 3), PerRole::new(3, 5));
        let expected_value = config.expected_value();
        let recorder = Recorder::new();

        let report = Scheduler::new(config).run(&recorder).unwrap();

        // conservation: the sum doesn't depend on the interleaving
        assert_eq!(expected_value, report.final_value);
        assert_eq!(PerRole::new(12, 15), report.ops);
        assert!(report
            .participants
            .iter()
            .all(|p| p.completed_ops == if p.role == Role::Writer { 4 } else { 3 }));
        assert_eq!(27, recorder.len());
    }

    #[test]
    fn test_readers_see_settled_values() {
        let config = quick(PerRole::new(3, 5), PerRole::new(2, 2), PerRole::new(3, 5));
        let recorder = Recorder::new();
        Scheduler::new(config).run(&recorder).unwrap();

        let events = recorder.into_events();
        // every value a reader saw was produced by some completed write
        let written: HashSet<_> = events
            .iter()
            .filter(|e| e.role == Role::Writer)
            .map(|e| e.value)
            .chain([0])
            .collect();
        for e in events.iter().filter(|e| e.role == Role::Reader) {
            assert!(written.contains(&e.value), "reader saw {}", e.value);
        }
    }

    #[test]
    fn test_one_participant_per_quota_alternates_strictly() {
        // with one op per participant and population == quota, phases can't overlap
        let config = quick(PerRole::new(3, 5), PerRole::new(1, 1), PerRole::new(3, 5));
        let recorder = Recorder::new();
        let report = Scheduler::new(config).run(&recorder).unwrap();

        assert_eq!((2, 2), (report.batches, report.flips));
        let phases = phases(&recorder.into_events());
        assert_eq!(2, phases.len());
        assert_eq!((Role::Writer, 3), (phases[0][0].role, phases[0].len()));
        assert_eq!((Role::Reader, 5), (phases[1][0].role, phases[1].len()));
        // every reader came after all the writes
        assert!(phases[1].iter().all(|e| e.value == 6));
    }

    #[test]
    fn test_flip_count_follows_the_quota() {
        let config = quick(PerRole::new(3, 5), PerRole::new(3, 3), PerRole::new(3, 5));
        let recorder = Recorder::new();
        let report = Scheduler::new(config).run(&recorder).unwrap();

        // 9 writes in batches of 3, 15 reads in batches of 5
        // a batch going past its quota would've panicked inside the gate
        assert_eq!((6, 6), (report.batches, report.flips));
        assert_eq!(24, recorder.len());
        assert_eq!(18, report.final_value);
    }

    #[test]
    fn test_more_participants_than_the_quota() {
        // the 6 writers most likely get in at once, so 3 of them finish during the readers' phase
        // the long reads keep the readers' window open until all 10 readers are in
        let config = Config {
            think_time: PerRole::new(Duration::from_millis(2), Duration::from_millis(50)),
            ..quick(PerRole::new(6, 10), PerRole::new(1, 1), PerRole::new(3, 5))
        };
        let expected_value = config.expected_value();
        let recorder = Recorder::new();

        let report = Scheduler::new(config).run(&recorder).unwrap();

        assert_eq!(expected_value, report.final_value);
        assert_eq!(PerRole::new(6, 10), report.ops);
        assert_eq!(16, report.participants.len());
        assert!(report.participants.iter().all(|p| p.completed_ops == 1));
        assert_eq!(16, recorder.len());

        // 2 batches per role; the turn goes at least W -> R -> W, late batches don't count
        assert_eq!(4, report.batches);
        assert!(
            (2..=4).contains(&report.flips),
            "{} flips",
            report.flips
        );
        let handed_over: u64 = report.participants.iter().map(|p| u64::from(p.flips)).sum();
        assert_eq!(report.flips, handed_over);
    }

    #[test]
    fn test_panicked_thread_stops_the_run() {
        let gate = TurnGate::new(PerRole::new(3, 5), Role::Writer).unwrap();
        let resource = ResourceLock::new(0);
        let cancel = CancelToken::new();
        let progress = AtomicU64::new(0);
        let ctx = Context {
            gate: &gate,
            resource: &resource,
            observer: &NoopObserver,
            cancel: &cancel,
            progress: &progress,
            think_time: PerRole::default(),
            op_timeout: None,
        };

        let result = catch_unwind(AssertUnwindSafe(|| {
            thread::scope(|s| {
                let watchdog = s.spawn(|| -> bool { panic!("watchdog failed") });
                join_or_unwind(watchdog, ctx)
            })
        }));

        assert!(result.is_err());
        assert!(cancel.is_cancelled());
    }
}
