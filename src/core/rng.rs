// Region random stream (no external crates).
//
// This is NOT cryptographically secure.
// It drives wiring and growth draws, which must replay exactly for a given seed.

/// Knuth MMIX multiplier.
const LCG_MUL: u64 = 6364136223846793005;
/// Knuth MMIX increment.
const LCG_INC: u64 = 1442695040888963407;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lcg {
    state: u64,
}

impl Lcg {
    pub fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    pub fn state(&self) -> u64 {
        self.state
    }

    #[inline]
    pub fn next_u64(&mut self) -> u64 {
        self.state = self.state.wrapping_mul(LCG_MUL).wrapping_add(LCG_INC);
        // Low LCG bits are weak; fold the high half down.
        self.state ^ (self.state >> 33)
    }

    /// Uniform draw in [0, 1) from the top 53 bits.
    #[inline]
    pub fn next_f64(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64
    }
}
