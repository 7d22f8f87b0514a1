//! Trial orchestration.
//!
//! [`Harness`] owns the shared state, resets it before every trial and lends
//! it to one reader and one writer thread for the duration of the trial.
pub mod trial;
pub mod worker;

use std::io;
use std::time::Instant;

use log::{debug, info};
use thiserror::Error;

use crate::concurrency::affinity::{AffinityError, AffinityPlan};
use crate::config::{ConfigError, ExecutionMode, HarnessConfig};
use crate::detect::{AnomalyPolicy, FailFast};
use crate::report::{RunReport, TrialReport};
use crate::state::{HarnessState, Role};

pub use trial::{Trial, TrialPhase};
pub use worker::{ReaderOutcome, ReaderPlan, WriterPlan, fold, run_reader, run_writer};

#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Affinity(#[from] AffinityError),
    #[error("failed to spawn {role} thread: {source}")]
    Spawn { role: Role, source: io::Error },
    #[error("{0} thread panicked")]
    WorkerPanicked(Role),
    #[error("a worker exited without signalling completion")]
    MissingCompletion,
}

pub struct Harness<P: AnomalyPolicy = FailFast> {
    config: HarnessConfig,
    affinity: AffinityPlan,
    state: HarnessState,
    policy: P,
}

impl Harness<FailFast> {
    /// A harness that terminates the process on the first anomaly.
    pub fn fail_fast(config: HarnessConfig) -> Result<Self, HarnessError> {
        Self::new(config, FailFast)
    }
}

impl<P: AnomalyPolicy> Harness<P> {
    /// Validates `config` and resolves the processing-unit plan.
    pub fn new(config: HarnessConfig, policy: P) -> Result<Self, HarnessError> {
        config.validate()?;
        let affinity = match config.mode {
            ExecutionMode::Concurrent => AffinityPlan::resolve(&config)?,
            ExecutionMode::Sequential => AffinityPlan::unpinned(),
        };
        debug!("config: {:?}", config);
        debug!("affinity: {:?}", affinity);
        Ok(Self {
            state: HarnessState::new(config.array_len),
            config,
            affinity,
            policy,
        })
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    pub fn affinity(&self) -> &AffinityPlan {
        &self.affinity
    }

    pub fn policy(&self) -> &P {
        &self.policy
    }

    pub fn state(&self) -> &HarnessState {
        &self.state
    }

    pub fn run_trial(&mut self, number: u32) -> Result<TrialReport, HarnessError> {
        Trial::new(number, &self.config, self.affinity).run(&mut self.state, &self.policy)
    }

    /// Runs every configured trial, stopping early if the policy let an
    /// anomaly through instead of exiting.
    pub fn run(&mut self) -> Result<RunReport, HarnessError> {
        let start = Instant::now();
        let mut report = RunReport::new(self.config.mode, self.config.trials);

        for number in 0..self.config.trials {
            let trial = self.run_trial(number)?;
            if let Some(anomaly) = trial.anomaly.clone() {
                info!("trial {} stopped: {}", number, anomaly);
                report.anomaly = Some((number, anomaly));
                report.trials.push(trial);
                break;
            }
            eprintln!("Iteration {} finished ({})", number, trial.accumulator);
            report.trials.push(trial);
        }

        report.total_time = start.elapsed();
        info!(
            "{} of {} trials completed in {:?}",
            report.completed(),
            report.planned_trials,
            report.total_time
        );
        Ok(report)
    }
}
