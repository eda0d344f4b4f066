use rand::{Rng, SeedableRng};
use rand_pcg::Pcg64Mcg;

/// The seeded random stream owned by one simulation.
///
/// PCG is portable across platforms and releases, so a seed always yields
/// the same draws. The stream position is not persisted: rebuilding from the
/// same seed restarts at the first draw.
#[derive(Debug, Clone)]
pub struct SimRng {
    seed: Option<u64>,
    inner: Pcg64Mcg,
}

impl SimRng {
    /// Stream seeded from `seed`, or from entropy when `None`.
    pub fn new(seed: Option<u64>) -> Self {
        let inner = match seed {
            Some(seed) => Pcg64Mcg::seed_from_u64(seed),
            None => Pcg64Mcg::seed_from_u64(rand::random()),
        };
        Self { seed, inner }
    }

    pub fn seed(&self) -> Option<u64> {
        self.seed
    }

    /// Uniform draw in `[lo, hi)`. Always consumes exactly one draw.
    pub fn uniform(&mut self, lo: f64, hi: f64) -> f64 {
        let unit: f64 = self.inner.random();
        lo + (hi - lo) * unit
    }
}
