//! 每轮试验的簿记状态。
//!
//! The orchestrator owns a [`HarnessState`] and lends its pieces to the
//! worker threads for exactly one trial: the raced array is shared, every
//! other field is exclusively borrowed by one role.
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::raced::RacedArray;
use crate::rng::MersenneTwister;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    Reader,
    Writer,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Reader => write!(f, "reader"),
            Role::Writer => write!(f, "writer"),
        }
    }
}

/// Per-role "already selected this trial" flags.
#[derive(Debug, Clone)]
pub struct TouchedSet {
    flags: Vec<bool>,
}

impl TouchedSet {
    pub fn new(len: usize) -> Self {
        Self {
            flags: vec![false; len],
        }
    }

    /// Draws indices from `rng` until an untouched one comes up, then marks it.
    ///
    /// Never returns if every index is already touched; callers keep their
    /// iteration budget at or below the array length.
    pub fn pick_untouched(&mut self, rng: &mut MersenneTwister) -> usize {
        let len = self.flags.len();
        let mut index = rng.index_in_range(len);
        while self.flags[index] {
            index = rng.index_in_range(len);
        }
        self.flags[index] = true;
        index
    }

    pub fn contains(&self, index: usize) -> bool {
        self.flags[index]
    }

    /// Number of distinct indices picked since the last clear.
    pub fn count(&self) -> usize {
        self.flags.iter().filter(|&&touched| touched).count()
    }

    pub fn clear(&mut self) {
        self.flags.fill(false);
    }
}

/// State owned by the reader thread (and the detector it drives).
#[derive(Debug, Clone)]
pub struct ReaderState {
    pub touched: TouchedSet,
    pub last_observed: Vec<i32>,
    pub change_count: Vec<u32>,
    pub accumulator: i32,
}

impl ReaderState {
    pub fn new(len: usize) -> Self {
        Self {
            touched: TouchedSet::new(len),
            last_observed: vec![0; len],
            change_count: vec![0; len],
            accumulator: 0,
        }
    }

    /// Takes the detector baseline from the current array contents.
    pub fn prepare(&mut self, array: &RacedArray) {
        self.touched.clear();
        for (i, last) in self.last_observed.iter_mut().enumerate() {
            *last = array.load(i);
        }
        self.change_count.fill(0);
        self.accumulator = 0;
    }
}

#[derive(Debug, Clone)]
pub struct WriterState {
    pub touched: TouchedSet,
}

impl WriterState {
    pub fn new(len: usize) -> Self {
        Self {
            touched: TouchedSet::new(len),
        }
    }

    pub fn prepare(&mut self) {
        self.touched.clear();
    }
}

#[derive(Debug)]
pub struct HarnessState {
    pub array: RacedArray,
    pub reader: ReaderState,
    pub writer: WriterState,
}

impl HarnessState {
    pub fn new(len: usize) -> Self {
        Self {
            array: RacedArray::new(len),
            reader: ReaderState::new(len),
            writer: WriterState::new(len),
        }
    }

    /// Regenerates the array from `seed` and clears all bookkeeping.
    ///
    /// Calling it twice with the same seed produces identical contents.
    pub fn reset(&mut self, seed: u32) {
        let mut rng = MersenneTwister::new(seed);
        self.array.refill(&mut rng);
        self.reader.touched.clear();
        self.reader.last_observed.fill(0);
        self.reader.change_count.fill(0);
        self.reader.accumulator = 0;
        self.writer.touched.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn picks_are_without_replacement() {
        let mut touched = TouchedSet::new(50);
        let mut rng = MersenneTwister::new(651);
        let mut seen = std::collections::HashSet::new();
        for _ in 0..50 {
            let index = touched.pick_untouched(&mut rng);
            assert!(seen.insert(index), "index {index} picked twice");
        }
        assert_eq!(touched.count(), 50);
        assert!((0..50).all(|i| touched.contains(i)));

        touched.clear();
        assert_eq!(touched.count(), 0);
        assert!(!touched.contains(0));
    }

    #[test]
    fn count_is_number_of_flagged_indices() {
        let mut touched = TouchedSet::new(100);
        let mut rng = MersenneTwister::new(6565);
        let picked: Vec<usize> = (0..20).map(|_| touched.pick_untouched(&mut rng)).collect();

        let flagged: Vec<usize> = (0..100).filter(|&i| touched.contains(i)).collect();
        assert_eq!(flagged.len(), 20);
        assert_eq!(touched.count(), flagged.len());
        let mut sorted = picked;
        sorted.sort_unstable();
        assert_eq!(sorted, flagged);
    }

    #[test]
    fn reset_is_idempotent() {
        let mut state = HarnessState::new(1000);
        state.reset(65 + 4);
        let first = state.array.snapshot();
        state.array.store(0, first[0].wrapping_add(1));
        state.reset(65 + 4);
        assert_eq!(state.array.snapshot(), first);

        state.reset(65 + 5);
        assert_ne!(state.array.snapshot(), first);
    }

    #[test]
    fn reset_clears_bookkeeping() {
        let mut state = HarnessState::new(16);
        let mut rng = MersenneTwister::new(1);
        state.writer.touched.pick_untouched(&mut rng);
        state.reader.change_count[3] = 2;
        state.reader.accumulator = 99;

        state.reset(65);
        assert_eq!(state.writer.touched.count(), 0);
        assert!(state.reader.change_count.iter().all(|&c| c == 0));
        assert_eq!(state.reader.accumulator, 0);
    }

    #[test]
    fn prepare_snapshots_array() {
        let mut state = HarnessState::new(8);
        state.reset(65);
        state.reader.prepare(&state.array);
        assert_eq!(state.reader.last_observed, state.array.snapshot());
    }
}
