//! Seeded random source for reproducible merges.

/// Simple LCG random number generator for reproducibility.
///
/// The sequence depends only on the seed, so a run can be replayed exactly.
#[derive(Debug, Clone)]
pub(crate) struct SimpleRng {
    state: u64,
}

impl SimpleRng {
    pub(crate) fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    fn next_u64(&mut self) -> u64 {
        self.state = self.state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        self.state
    }

    /// Uniform index in `0..n`. `n` must be non-zero.
    pub(crate) fn next_index(&mut self, n: usize) -> usize {
        // Low LCG bits have short periods; draw from the high half.
        ((self.next_u64() >> 32) % n as u64) as usize
    }
}
