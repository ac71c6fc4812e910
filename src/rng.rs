//! Injected randomness source.
//!
//! Every stochastic component (price models, fault strategies, synthetic
//! trades) draws from one shared, optionally seeded generator so a scenario
//! run is reproducible end to end.

use std::sync::{Arc, Mutex};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, LogNormal, StandardNormal};

#[derive(Clone)]
pub struct SharedRng {
    inner: Arc<Mutex<StdRng>>,
}

impl SharedRng {
    /// Deterministic generator for reproducible scenarios.
    pub fn seeded(seed: u64) -> Self {
        Self {
            inner: Arc::new(Mutex::new(StdRng::seed_from_u64(seed))),
        }
    }

    pub fn from_entropy() -> Self {
        Self {
            inner: Arc::new(Mutex::new(StdRng::from_entropy())),
        }
    }

    /// Seed from config, entropy when absent.
    pub fn from_seed_opt(seed: Option<u64>) -> Self {
        match seed {
            Some(s) => Self::seeded(s),
            None => Self::from_entropy(),
        }
    }

    /// Bernoulli draw; `p` outside [0, 1] saturates.
    pub fn chance(&self, p: f64) -> bool {
        let mut rng = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        rng.gen::<f64>() < p
    }

    pub fn range_f64(&self, lo: f64, hi: f64) -> f64 {
        if hi <= lo {
            return lo;
        }
        let mut rng = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        rng.gen_range(lo..hi)
    }

    /// Inclusive integer range.
    pub fn range_usize(&self, lo: usize, hi: usize) -> usize {
        if hi <= lo {
            return lo;
        }
        let mut rng = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        rng.gen_range(lo..=hi)
    }

    /// Z ~ N(0, 1).
    pub fn standard_normal(&self) -> f64 {
        let mut rng = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        StandardNormal.sample(&mut *rng)
    }

    /// exp(N(mu, sigma)); falls back to exp(mu) on degenerate parameters.
    pub fn log_normal(&self, mu: f64, sigma: f64) -> f64 {
        match LogNormal::new(mu, sigma) {
            Ok(dist) => {
                let mut rng = self.inner.lock().unwrap_or_else(|e| e.into_inner());
                dist.sample(&mut *rng)
            }
            Err(_) => mu.exp(),
        }
    }
}

impl std::fmt::Debug for SharedRng {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SharedRng")
    }
}
