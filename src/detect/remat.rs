//! 重物化（rematerialization）检测
//!
//! The reader keeps a snapshot of the array taken before the trial starts and
//! periodically diffs the live array against it. The writer touches every
//! index at most once per trial, so under any sane visibility semantics a slot
//! can change at most once relative to that baseline: from its initial random
//! value to the written one. A second observed change means a stale value came
//! back after a fresher one had already been seen.
use std::fmt;
use std::ops::ControlFlow;
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};

use crate::raced::RacedArray;

/// More than this many observed changes on one slot is an anomaly.
pub const MAX_LEGIT_CHANGES: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Anomaly {
    pub index: usize,
    /// Snapshot value before this pass.
    pub previous: i32,
    /// Value observed by this pass.
    pub observed: i32,
    pub changes: u32,
}

impl fmt::Display for Anomaly {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "slot {} changed {} times ({} -> {})",
            self.index, self.changes, self.previous, self.observed
        )
    }
}

/// Scans the first `window` slots of the array on every [`check`](Self::check).
///
/// The threshold is only sound while the writer samples indices without
/// replacement. If a writer ever writes the same slot twice in one trial, two
/// legitimate changes become possible and this detector starts reporting false
/// positives.
#[derive(Debug, Clone, Copy)]
pub struct RematDetector {
    window: usize,
}

impl RematDetector {
    pub fn new(window: usize) -> Self {
        Self { window }
    }

    pub fn window(&self) -> usize {
        self.window
    }

    /// Diffs the array against `last_observed`, bumping `change_count` for
    /// every slot that moved. Stops at the first slot whose count exceeds
    /// [`MAX_LEGIT_CHANGES`].
    pub fn check(
        &self,
        array: &RacedArray,
        last_observed: &mut [i32],
        change_count: &mut [u32],
    ) -> Option<Anomaly> {
        for i in 0..self.window {
            let v = array.load(i);
            if v != last_observed[i] {
                change_count[i] += 1;
                if change_count[i] > MAX_LEGIT_CHANGES {
                    return Some(Anomaly {
                        index: i,
                        previous: last_observed[i],
                        observed: v,
                        changes: change_count[i],
                    });
                }
                last_observed[i] = v;
            }
        }
        None
    }
}

/// What the reader does once the detector fires.
pub trait AnomalyPolicy: Sync {
    /// `Break` stops the reader; a policy may also never return.
    fn on_anomaly(&self, anomaly: &Anomaly) -> ControlFlow<()>;
}

/// Reports `UB was caught!` and terminates the process with status 0.
#[derive(Debug, Default, Clone, Copy)]
pub struct FailFast;

impl AnomalyPolicy for FailFast {
    fn on_anomaly(&self, anomaly: &Anomaly) -> ControlFlow<()> {
        log::error!("visibility anomaly: {}", anomaly);
        eprintln!("\nUB was caught!");
        std::process::exit(0);
    }
}

/// Keeps every anomaly and stops the reader on the first one.
#[derive(Debug, Default)]
pub struct Record {
    seen: Mutex<Vec<Anomaly>>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    /// A panicking recorder thread must not lose what was already recorded.
    fn seen(&self) -> MutexGuard<'_, Vec<Anomaly>> {
        self.seen.lock().unwrap_or_else(|poisoned: PoisonError<_>| {
            log::warn!("anomaly record poisoned, recovering");
            poisoned.into_inner()
        })
    }

    pub fn anomalies(&self) -> Vec<Anomaly> {
        self.seen().clone()
    }

    pub fn first(&self) -> Option<Anomaly> {
        self.anomalies().into_iter().next()
    }
}

impl AnomalyPolicy for Record {
    fn on_anomaly(&self, anomaly: &Anomaly) -> ControlFlow<()> {
        log::warn!("visibility anomaly recorded: {}", anomaly);
        self.seen().push(anomaly.clone());
        ControlFlow::Break(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rng::MersenneTwister;
    use crate::state::{HarnessState, TouchedSet};

    fn baseline(array: &RacedArray) -> (Vec<i32>, Vec<u32>) {
        (array.snapshot(), vec![0; array.len()])
    }

    #[test]
    fn unchanged_array_never_fires() {
        let mut state = HarnessState::new(32);
        state.reset(65);
        let (mut last, mut counts) = baseline(&state.array);
        let detector = RematDetector::new(32);
        for _ in 0..5 {
            assert_eq!(detector.check(&state.array, &mut last, &mut counts), None);
        }
        assert!(counts.iter().all(|&c| c == 0));
    }

    #[test]
    fn single_writes_count_once() {
        let mut state = HarnessState::new(200);
        state.reset(65);
        let (mut last, mut counts) = baseline(&state.array);
        let detector = RematDetector::new(200);

        // writer and reader strictly alternate, no overlap
        let mut touched = TouchedSet::new(200);
        let mut rng = MersenneTwister::new(651);
        for _ in 0..150 {
            let index = touched.pick_untouched(&mut rng);
            let value = rng.next_i32();
            state.array.store(index, value);
            assert_eq!(detector.check(&state.array, &mut last, &mut counts), None);
        }
        assert!(counts.iter().all(|&c| c <= 1));
        assert!(counts.iter().filter(|&&c| c == 1).count() <= 150);
    }

    #[test]
    fn reappearing_value_fires() {
        let array = RacedArray::new(4);
        array.store(1, 10);
        let (mut last, mut counts) = baseline(&array);
        let detector = RematDetector::new(4);

        array.store(1, 20);
        assert_eq!(detector.check(&array, &mut last, &mut counts), None);
        assert_eq!(counts[1], 1);

        array.store(1, 10);
        let anomaly = detector.check(&array, &mut last, &mut counts).unwrap();
        assert_eq!(
            anomaly,
            Anomaly {
                index: 1,
                previous: 20,
                observed: 10,
                changes: 2,
            }
        );
        assert!(anomaly.changes > MAX_LEGIT_CHANGES);
    }

    #[test]
    fn window_limits_scan() {
        let array = RacedArray::new(8);
        let (mut last, mut counts) = baseline(&array);
        let detector = RematDetector::new(4);
        assert_eq!(detector.window(), 4);
        array.store(6, 1);
        array.store(6, 2);
        assert_eq!(detector.check(&array, &mut last, &mut counts), None);
        array.store(6, 3);
        assert_eq!(detector.check(&array, &mut last, &mut counts), None);
        assert_eq!(counts[6], 0);
    }

    #[test]
    fn record_policy_stops_and_keeps_anomaly() {
        let policy = Record::new();
        let anomaly = Anomaly {
            index: 3,
            previous: 1,
            observed: 2,
            changes: 2,
        };
        assert_eq!(policy.on_anomaly(&anomaly), ControlFlow::Break(()));
        assert_eq!(policy.first(), Some(anomaly));
    }

    #[test]
    fn record_survives_poisoned_lock() {
        let policy = Record::new();
        let first = Anomaly {
            index: 0,
            previous: 5,
            observed: 6,
            changes: 2,
        };
        let _ = policy.on_anomaly(&first);

        let poisoner: std::thread::Result<()> = std::thread::scope(|s| {
            s.spawn(|| {
                let _guard = policy.seen.lock().unwrap();
                panic!("recorder thread died");
            })
            .join()
        });
        assert!(poisoner.is_err());
        assert!(policy.seen.is_poisoned());

        let second = Anomaly {
            index: 9,
            ..first.clone()
        };
        assert_eq!(policy.on_anomaly(&second), ControlFlow::Break(()));
        assert_eq!(policy.anomalies(), vec![first, second]);
    }
}
