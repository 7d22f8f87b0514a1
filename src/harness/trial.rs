//! 单轮试验：Idle → Resetting → Prepared → Running → Joining → Idle。
use std::sync::mpsc;
use std::thread;
use std::time::Instant;

use log::{debug, warn};

use crate::concurrency::affinity::{AffinityError, AffinityPlan};
use crate::config::{ExecutionMode, HarnessConfig, PinMode};
use crate::detect::AnomalyPolicy;
use crate::harness::HarnessError;
use crate::harness::worker::{ReaderOutcome, ReaderPlan, WriterPlan, run_reader, run_writer};
use crate::report::TrialReport;
use crate::rng::MersenneTwister;
use crate::state::{HarnessState, Role};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrialPhase {
    Idle,
    Resetting,
    Prepared,
    Running,
    Joining,
}

type PinReport = (Role, Result<Option<usize>, AffinityError>);
/// Reader outcome plus the units the reader and writer ended up pinned to.
type ConcurrentExit = (ReaderOutcome, Option<usize>, Option<usize>);

/// One reset → run → join cycle, seeded by its ordinal number.
#[derive(Debug)]
pub struct Trial<'a> {
    number: u32,
    config: &'a HarnessConfig,
    affinity: AffinityPlan,
    phase: TrialPhase,
}

impl<'a> Trial<'a> {
    pub fn new(number: u32, config: &'a HarnessConfig, affinity: AffinityPlan) -> Self {
        Self {
            number,
            config,
            affinity,
            phase: TrialPhase::Idle,
        }
    }

    pub fn phase(&self) -> TrialPhase {
        self.phase
    }

    fn advance(&mut self, next: TrialPhase) {
        debug!("trial {}: {:?} -> {:?}", self.number, self.phase, next);
        self.phase = next;
    }

    pub fn run<P>(
        mut self,
        state: &mut HarnessState,
        policy: &P,
    ) -> Result<TrialReport, HarnessError>
    where
        P: AnomalyPolicy + ?Sized,
    {
        let start = Instant::now();
        self.advance(TrialPhase::Resetting);
        state.reset(self.config.seeds.main_for(self.number));

        let (outcome, reader_cpu, writer_cpu) = match self.config.mode {
            ExecutionMode::Concurrent => self.run_concurrent(state, policy)?,
            ExecutionMode::Sequential => (self.run_sequential(state, policy), None, None),
        };
        self.advance(TrialPhase::Idle);

        Ok(TrialReport {
            trial: self.number,
            accumulator: state.reader.accumulator,
            reads: state.reader.touched.count(),
            writes: state.writer.touched.count(),
            reader_cpu,
            writer_cpu,
            anomaly: match outcome {
                ReaderOutcome::Completed => None,
                ReaderOutcome::Stopped(anomaly) => Some(anomaly),
            },
            elapsed: start.elapsed(),
        })
    }

    /// Writer to completion, then reader, both on the calling thread.
    fn run_sequential<P>(&mut self, state: &mut HarnessState, policy: &P) -> ReaderOutcome
    where
        P: AnomalyPolicy + ?Sized,
    {
        let seeds = self.config.seeds;
        let HarnessState {
            array,
            reader,
            writer,
        } = &mut *state;

        reader.prepare(array);
        writer.prepare();
        let mut reader_rng = MersenneTwister::new(seeds.reader_for(self.number));
        let mut writer_rng = MersenneTwister::new(seeds.writer_for(self.number));
        self.advance(TrialPhase::Prepared);

        self.advance(TrialPhase::Running);
        run_writer(
            array,
            writer,
            &mut writer_rng,
            &WriterPlan::from_config(self.config),
        );
        eprintln!("Writer has finished");
        let outcome = run_reader(
            array,
            reader,
            &mut reader_rng,
            &ReaderPlan::from_config(self.config),
            policy,
        );
        if outcome == ReaderOutcome::Completed {
            eprintln!("Reader has finished");
        }

        self.advance(TrialPhase::Joining);
        outcome
    }

    fn run_concurrent<P>(
        &mut self,
        state: &mut HarnessState,
        policy: &P,
    ) -> Result<ConcurrentExit, HarnessError>
    where
        P: AnomalyPolicy + ?Sized,
    {
        let number = self.number;
        let seeds = self.config.seeds;
        let affinity = self.affinity;
        let reader_plan = ReaderPlan::from_config(self.config);
        let writer_plan = WriterPlan::from_config(self.config);
        let HarnessState {
            array,
            reader,
            writer,
        } = &mut *state;
        let array = &*array;

        // trial-scoped primitives, dropped when this function returns
        let (reader_gate, reader_gate_rx) = mpsc::sync_channel::<()>(1);
        let (writer_gate, writer_gate_rx) = mpsc::sync_channel::<()>(1);
        let (done_tx, done_rx) = mpsc::channel::<Role>();
        let (pin_tx, pin_rx) = mpsc::channel::<PinReport>();

        thread::scope(|s| -> Result<ConcurrentExit, HarnessError> {
            let reader_done = done_tx.clone();
            let reader_pin = pin_tx.clone();
            let reader_handle = thread::Builder::new()
                .name("reader".into())
                .spawn_scoped(s, move || {
                    let _ = reader_pin.send((Role::Reader, affinity.pin_current(Role::Reader)));
                    reader.prepare(array);
                    let mut rng = MersenneTwister::new(seeds.reader_for(number));
                    reader_gate_rx.recv().ok()?;

                    let outcome = run_reader(array, reader, &mut rng, &reader_plan, policy);
                    if outcome == ReaderOutcome::Completed {
                        eprintln!("Reader has finished");
                    }
                    let _ = reader_done.send(Role::Reader);
                    Some(outcome)
                })
                .map_err(|source| HarnessError::Spawn {
                    role: Role::Reader,
                    source,
                })?;

            let writer_done = done_tx.clone();
            let writer_pin = pin_tx.clone();
            let writer_handle = match thread::Builder::new()
                .name("writer".into())
                .spawn_scoped(s, move || {
                    let _ = writer_pin.send((Role::Writer, affinity.pin_current(Role::Writer)));
                    writer.prepare();
                    let mut rng = MersenneTwister::new(seeds.writer_for(number));
                    writer_gate_rx.recv().ok()?;

                    run_writer(array, writer, &mut rng, &writer_plan);
                    eprintln!("Writer has finished");
                    let _ = writer_done.send(Role::Writer);
                    Some(())
                }) {
                Ok(handle) => handle,
                Err(source) => {
                    // closing the gate lets the reader return without running
                    drop(reader_gate);
                    let _ = reader_handle.join();
                    return Err(HarnessError::Spawn {
                        role: Role::Writer,
                        source,
                    });
                }
            };
            drop(done_tx);
            drop(pin_tx);

            let mut reader_cpu = None;
            let mut writer_cpu = None;
            let mut failure = None;
            for (role, pinned) in pin_rx.iter().take(2) {
                let cpu = match pinned {
                    Ok(cpu) => cpu,
                    Err(err) if affinity.mode == PinMode::Required => {
                        failure = Some(HarnessError::Affinity(err));
                        None
                    }
                    Err(err) => {
                        warn!("{} runs unpinned: {}", role, err);
                        None
                    }
                };
                match role {
                    Role::Reader => reader_cpu = cpu,
                    Role::Writer => writer_cpu = cpu,
                }
            }
            if let Some(err) = failure {
                drop(reader_gate);
                drop(writer_gate);
                let _ = reader_handle.join();
                let _ = writer_handle.join();
                return Err(err);
            }
            self.advance(TrialPhase::Prepared);
            thread::sleep(self.config.settle());

            self.advance(TrialPhase::Running);
            let _ = reader_gate.send(());
            let _ = writer_gate.send(());

            self.advance(TrialPhase::Joining);
            let writer_exit = writer_handle
                .join()
                .map_err(|_| HarnessError::WorkerPanicked(Role::Writer))?;
            let reader_exit = reader_handle
                .join()
                .map_err(|_| HarnessError::WorkerPanicked(Role::Reader))?;
            for _ in 0..2 {
                done_rx.recv().map_err(|_| HarnessError::MissingCompletion)?;
            }

            match (reader_exit, writer_exit) {
                (Some(outcome), Some(())) => Ok((outcome, reader_cpu, writer_cpu)),
                _ => Err(HarnessError::MissingCompletion),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::Record;

    fn config(mode: ExecutionMode) -> HarnessConfig {
        HarnessConfig {
            array_len: 100,
            reader_iterations: 10,
            writer_iterations: 10,
            reader_sleep_micros: 0,
            writer_sleep_micros: 0,
            settle_millis: 0,
            pin: PinMode::Off,
            mode,
            ..HarnessConfig::default()
        }
    }

    #[test]
    fn sequential_trial_is_reproducible() {
        let config = config(ExecutionMode::Sequential);
        let policy = Record::new();
        let mut state = HarnessState::new(config.array_len);

        let first = Trial::new(3, &config, AffinityPlan::unpinned())
            .run(&mut state, &policy)
            .unwrap();
        let second = Trial::new(3, &config, AffinityPlan::unpinned())
            .run(&mut state, &policy)
            .unwrap();

        assert_eq!(first.accumulator, second.accumulator);
        assert_eq!((first.reads, first.writes), (10, 10));
        assert!(first.anomaly.is_none());
        assert!(policy.anomalies().is_empty());
        assert!(state.reader.change_count.iter().all(|&c| c <= 1));
    }

    #[test]
    fn concurrent_trial_runs_both_budgets() {
        let config = config(ExecutionMode::Concurrent);
        let policy = Record::new();
        let mut state = HarnessState::new(config.array_len);

        let report = Trial::new(0, &config, AffinityPlan::unpinned())
            .run(&mut state, &policy)
            .unwrap();
        assert_eq!(report.writes, 10);
        if report.anomaly.is_none() {
            assert_eq!(report.reads, 10);
        }
        assert_eq!((report.reader_cpu, report.writer_cpu), (None, None));
    }

    #[test]
    fn starts_idle() {
        let config = config(ExecutionMode::Sequential);
        let trial = Trial::new(0, &config, AffinityPlan::unpinned());
        assert_eq!(trial.phase(), TrialPhase::Idle);
    }
}
