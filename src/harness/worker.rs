//! Reader and writer loops.
//!
//! Both loops sample indices without replacement from their own PRNG stream
//! and touch the raced array without any synchronization.
use std::time::Duration;

use crate::config::HarnessConfig;
use crate::detect::{Anomaly, AnomalyPolicy, RematDetector};
use crate::raced::RacedArray;
use crate::rng::MersenneTwister;
use crate::state::{ReaderState, WriterState};
use crate::util::spin_for;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriterPlan {
    pub iterations: usize,
    pub sleep: Duration,
}

#[derive(Debug, Clone, Copy)]
pub struct ReaderPlan {
    pub iterations: usize,
    pub check_every: usize,
    pub sleep: Duration,
    pub detector: RematDetector,
}

impl WriterPlan {
    pub fn from_config(config: &HarnessConfig) -> Self {
        Self {
            iterations: config.writer_iterations,
            sleep: config.writer_sleep(),
        }
    }
}

impl ReaderPlan {
    pub fn from_config(config: &HarnessConfig) -> Self {
        Self {
            iterations: config.reader_iterations,
            check_every: config.check_every,
            sleep: config.reader_sleep(),
            detector: RematDetector::new(config.check_window()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReaderOutcome {
    Completed,
    /// The policy asked the reader to stop after this anomaly.
    Stopped(Anomaly),
}

/// Folds a read value into the running accumulator.
///
/// The value has no meaning; it only keeps the loads observable.
#[inline]
pub fn fold(accumulator: i32, read: i32) -> i32 {
    let lhs = read.wrapping_add(read).wrapping_sub(1);
    let rhs = accumulator
        .wrapping_sub(1)
        .wrapping_add(read)
        .wrapping_mul(read);
    lhs.wrapping_add(rhs)
}

pub fn run_writer(
    array: &RacedArray,
    state: &mut WriterState,
    rng: &mut MersenneTwister,
    plan: &WriterPlan,
) {
    for _ in 0..plan.iterations {
        let index = state.touched.pick_untouched(rng);
        array.store(index, rng.next_i32());
        spin_for(plan.sleep);
    }
}

pub fn run_reader<P>(
    array: &RacedArray,
    state: &mut ReaderState,
    rng: &mut MersenneTwister,
    plan: &ReaderPlan,
    policy: &P,
) -> ReaderOutcome
where
    P: AnomalyPolicy + ?Sized,
{
    for i in 0..plan.iterations {
        let index = state.touched.pick_untouched(rng);
        let read = array.load(index);
        state.accumulator = fold(state.accumulator, read);
        if i % plan.check_every == 0 {
            if let Some(anomaly) =
                plan.detector
                    .check(array, &mut state.last_observed, &mut state.change_count)
            {
                if policy.on_anomaly(&anomaly).is_break() {
                    return ReaderOutcome::Stopped(anomaly);
                }
            }
        }
        spin_for(plan.sleep);
    }
    ReaderOutcome::Completed
}
