//! Deterministic Random Stream
//!
//! Every stateful component of the engine draws its randomness from a
//! [`RandomStream`] it owns (or is handed for the duration of a block). The
//! stream uses the Xorshift128+ algorithm: fast, a period of 2^128 - 1, and
//! good enough statistical quality for control-rate synthesis. Determinism
//! given a seed is part of the contract: the déjà vu loop, replay and
//! preset-recall machinery all rely on replaying identical draws.

/// A seedable random number generator using Xorshift128+.
#[derive(Debug, Clone, Copy)]
pub struct RandomStream {
    s0: u64,
    s1: u64,
}

impl RandomStream {
    /// Create a new stream with the given state words.
    ///
    /// The seeds should not both be zero.
    #[inline]
    pub const fn new(s0: u64, s1: u64) -> Self {
        let s0 = if s0 == 0 && s1 == 0 { 1 } else { s0 };
        Self { s0, s1 }
    }

    /// Create a new stream from a single 64-bit seed.
    ///
    /// The seed is expanded into two state words with splitmix64.
    #[inline]
    pub fn from_seed(seed: u64) -> Self {
        let s0 = splitmix64(seed);
        let s1 = splitmix64(seed.wrapping_add(0x9e3779b97f4a7c15));
        Self::new(s0, s1)
    }

    /// Create a new stream seeded from system entropy (std only).
    #[cfg(feature = "std")]
    pub fn from_entropy() -> Self {
        Self::from_seed(rand::random::<u64>())
    }

    /// Generate the next u64 value.
    #[inline]
    pub fn next_u64(&mut self) -> u64 {
        let s0 = self.s0;
        let mut s1 = self.s1;
        let result = s0.wrapping_add(s1);

        s1 ^= s0;
        self.s0 = s0.rotate_left(24) ^ s1 ^ (s1 << 16);
        self.s1 = s1.rotate_left(37);

        result
    }

    /// Generate the next u32 word (upper half of the u64 state output).
    #[inline]
    pub fn next_u32(&mut self) -> u32 {
        (self.next_u64() >> 32) as u32
    }

    /// Generate a random f32 in the range [0.0, 1.0).
    ///
    /// Uses the upper 24 bits so the result is exactly representable.
    #[inline]
    pub fn next_f32(&mut self) -> f32 {
        (self.next_u64() >> 40) as f32 * (1.0 / (1u64 << 24) as f32)
    }

    /// Generate a random bool with the given probability (0.0 to 1.0).
    #[inline]
    pub fn next_bool(&mut self, probability: f32) -> bool {
        self.next_f32() < probability
    }

    /// Jump the stream state forward by 2^64 steps.
    ///
    /// Useful for splitting one seed into independent per-channel streams.
    pub fn jump(&mut self) {
        const JUMP: [u64; 2] = [0xdf900294d8f554a5, 0x170865df4b3201fc];

        let mut s0 = 0u64;
        let mut s1 = 0u64;

        for jump_val in JUMP.iter() {
            for b in 0..64 {
                if (jump_val >> b) & 1 != 0 {
                    s0 ^= self.s0;
                    s1 ^= self.s1;
                }
                self.next_u64();
            }
        }

        self.s0 = s0;
        self.s1 = s1;
    }
}

impl Default for RandomStream {
    fn default() -> Self {
        Self::new(0x853c49e6748fea9b, 0xda3e39cb94b95bdb)
    }
}

/// Splitmix64 mixing function for deriving state from seeds.
#[inline]
fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9e3779b97f4a7c15);
    x = (x ^ (x >> 30)).wrapping_mul(0xbf58476d1ce4e5b9);
    x = (x ^ (x >> 27)).wrapping_mul(0x94d049bb133111eb);
    x ^ (x >> 31)
}
