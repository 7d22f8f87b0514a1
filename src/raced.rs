//! The raced resource: a shared `i32` array read and written without any
//! synchronization.
//!
//! Concurrent [`RacedArray::load`] / [`RacedArray::store`] calls from different
//! threads are data races and therefore undefined behavior. That is the
//! subject of the experiment, so every access is a plain load or store: no
//! atomics, no volatile, no locks. All other state in the crate is ordinary
//! safe Rust.
use std::cell::UnsafeCell;
use std::fmt;

use crate::rng::MersenneTwister;

pub struct RacedArray {
    slots: Box<[UnsafeCell<i32>]>,
}

// SAFETY: deliberately unsound. Reader and writer threads race on the slots;
// the harness exists to observe what the compiler and hardware do with it.
unsafe impl Sync for RacedArray {}

impl RacedArray {
    pub fn new(len: usize) -> Self {
        Self {
            slots: (0..len).map(|_| UnsafeCell::new(0)).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Plain, unsynchronized load of slot `index`.
    #[inline]
    pub fn load(&self, index: usize) -> i32 {
        // SAFETY: see the module docs; racing with `store` is intended.
        unsafe { *self.slots[index].get() }
    }

    /// Plain, unsynchronized store into slot `index`.
    #[inline]
    pub fn store(&self, index: usize, value: i32) {
        // SAFETY: see the module docs; racing with `load` is intended.
        unsafe { *self.slots[index].get() = value }
    }

    /// Regenerates every slot from `rng`. Exclusive access, so no race.
    pub fn refill(&mut self, rng: &mut MersenneTwister) {
        for slot in self.slots.iter_mut() {
            *slot.get_mut() = rng.next_i32();
        }
    }

    /// Copies the current contents out of the array.
    pub fn snapshot(&self) -> Vec<i32> {
        (0..self.len()).map(|i| self.load(i)).collect()
    }
}

impl fmt::Debug for RacedArray {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RacedArray")
            .field("len", &self.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_sees_previous_store() {
        let array = RacedArray::new(4);
        array.store(2, -17);
        assert_eq!(array.load(2), -17);
        assert_eq!(array.snapshot(), vec![0, 0, -17, 0]);
    }

    #[test]
    fn refill_is_deterministic() {
        let mut a = RacedArray::new(64);
        let mut b = RacedArray::new(64);
        a.refill(&mut MersenneTwister::new(65));
        b.refill(&mut MersenneTwister::new(65));
        assert_eq!(a.snapshot(), b.snapshot());

        let mut rng = MersenneTwister::new(65);
        let expected: Vec<i32> = (0..64).map(|_| rng.next_i32()).collect();
        assert_eq!(a.snapshot(), expected);
    }

    #[test]
    #[should_panic]
    fn out_of_range_load_panics() {
        RacedArray::new(3).load(3);
    }
}
