//! 确定性伪随机数生成器（Mersenne Twister 变体）。
//!
//! Every logical stream of the harness (array setup, reader, writer) owns its
//! own [`MersenneTwister`]. Identical seeds always yield identical sequences,
//! which is what makes a trial reproducible from its ordinal number.
use std::fmt;

use rand::rand_core::impls;
use rand::{RngCore, SeedableRng};

/// Number of 32-bit words in the generator state.
pub const MT_LEN: usize = 624;
/// Offset of the second twist operand.
const MT_IA: usize = 397;
/// Twist matrix applied when the low bit of the mixed word is set.
const MATRIX_A: u32 = 0x9908_B0DF;
/// Outputs discarded after seeding, in multiples of the state length.
const WARMUP_ROUNDS: usize = 100;

/// Twist-and-swizzle generator over a 624 word buffer.
///
/// A seed of `0` degenerates into an all-zero stream; the harness never uses it.
#[derive(Clone, PartialEq, Eq)]
pub struct MersenneTwister {
    buffer: [u32; MT_LEN],
    index: usize,
}

impl MersenneTwister {
    /// Fills the whole state with `seed` and burns `624 * 100` outputs.
    pub fn new(seed: u32) -> Self {
        let mut rng = Self {
            buffer: [seed; MT_LEN],
            index: 0,
        };
        for _ in 0..MT_LEN * WARMUP_ROUNDS {
            rng.next_u32();
        }
        rng
    }

    pub fn next_u32(&mut self) -> u32 {
        let i = self.index;
        let i2 = if i + 1 >= MT_LEN { 0 } else { i + 1 };
        let j = if i + MT_IA >= MT_LEN {
            i + MT_IA - MT_LEN
        } else {
            i + MT_IA
        };

        // twist
        let s = (self.buffer[i] & 0x8000_0000) | (self.buffer[i2] & 0x7fff_ffff);
        let mut r = self.buffer[j] ^ (s >> 1) ^ ((s & 1) * MATRIX_A);
        self.buffer[i] = r;
        self.index = i2;

        // temper
        r ^= r >> 11;
        r ^= (r << 7) & 0x9d2c_5680;
        r ^= (r << 15) & 0xefc6_0000;
        r ^= r >> 18;
        r
    }

    /// The next word reinterpreted as a signed array value.
    pub fn next_i32(&mut self) -> i32 {
        self.next_u32() as i32
    }

    /// `next_u32() % n`. Slightly biased for large `n`, which is irrelevant here.
    ///
    /// # Panics
    ///
    /// Panics if `n` is zero.
    pub fn index_in_range(&mut self, n: usize) -> usize {
        assert!(n > 0, "range must be non-empty");
        self.next_u32() as usize % n
    }
}

impl fmt::Debug for MersenneTwister {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MersenneTwister")
            .field("index", &self.index)
            .finish_non_exhaustive()
    }
}

impl RngCore for MersenneTwister {
    fn next_u32(&mut self) -> u32 {
        MersenneTwister::next_u32(self)
    }

    fn next_u64(&mut self) -> u64 {
        impls::next_u64_via_u32(self)
    }

    fn fill_bytes(&mut self, dst: &mut [u8]) {
        impls::fill_bytes_via_next(self, dst)
    }
}

impl SeedableRng for MersenneTwister {
    type Seed = [u8; 4];

    fn from_seed(seed: Self::Seed) -> Self {
        Self::new(u32::from_le_bytes(seed))
    }
}
