//! Deterministic random number generation for synthetic ledgers.
//!
//! RULE: The generator never calls a platform RNG. Every stream is
//! derived from one master seed and a stable stream slot, so the same
//! seed always yields the same participants and the same rows.

use rand::{Rng, RngCore, SeedableRng};
use rand_pcg::Pcg64Mcg;

pub struct PlanRng {
    pub name: &'static str,
    inner: Pcg64Mcg,
}

impl PlanRng {
    pub fn new(master_seed: u64, slot: StreamSlot) -> Self {
        let derived_seed = master_seed ^ (slot as u64).wrapping_mul(0x9e37_79b9_7f4a_7c15);
        Self {
            name: slot.name(),
            inner: Pcg64Mcg::seed_from_u64(derived_seed),
        }
    }

    pub fn next_u64(&mut self) -> u64 {
        self.inner.next_u64()
    }

    /// Uniform in [lo, hi]. Returns `lo` if the range is empty.
    pub fn between(&mut self, lo: i64, hi: i64) -> i64 {
        if hi <= lo {
            return lo;
        }
        self.inner.gen_range(lo..=hi)
    }

    /// Bernoulli trial: true with probability p.
    pub fn chance(&mut self, p: f64) -> bool {
        self.inner.gen_bool(p.clamp(0.0, 1.0))
    }

    pub fn pick<'a, T>(&mut self, items: &'a [T]) -> Option<&'a T> {
        if items.is_empty() {
            return None;
        }
        let i = self.inner.gen_range(0..items.len());
        items.get(i)
    }
}

/// Stable stream assignments. Append only; reordering changes every
/// stream's seed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u64)]
pub enum StreamSlot {
    Participants = 0,
    Contributions = 1,
    Payments = 2,
    Transfers = 3,
}

impl StreamSlot {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Participants => "participants",
            Self::Contributions => "contributions",
            Self::Payments => "payments",
            Self::Transfers => "transfers",
        }
    }
}
