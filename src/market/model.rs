//! Stochastic price models.
//!
//! Both models draw Z ~ N(0,1) from the injected shared generator, so a
//! seeded run replays the same price path.

use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;

use crate::rng::SharedRng;

/// Trading year in seconds: 252 trading days.
const SECONDS_PER_YEAR: f64 = 252.0 * 86_400.0;

/// Prices never collapse to zero; floor matches the original simulator.
const PRICE_FLOOR: f64 = 0.01;

#[derive(Debug, Clone)]
pub enum PriceModel {
    /// Geometric Brownian motion with annualized drift and volatility.
    ///
    /// `S' = S · exp((μ − σ²/2)·dt + σ·√dt·Z)` with
    /// `dt = tick_interval / (252·86400)`, so the volatility observed over
    /// wall-clock time is independent of the tick rate.
    Gbm { drift: f64, volatility: f64, dt: f64 },
    /// `S' = max(S + S·σ·Z, 0.01)`. Retained for compatibility; only σ is
    /// used and there is no tick-rate scaling.
    RandomWalk { volatility: f64 },
}

impl PriceModel {
    pub fn gbm(drift: f64, volatility: f64, tick_interval_seconds: f64) -> Self {
        PriceModel::Gbm {
            drift,
            volatility,
            dt: tick_interval_seconds / SECONDS_PER_YEAR,
        }
    }

    pub fn random_walk(volatility: f64) -> Self {
        PriceModel::RandomWalk { volatility }
    }

    /// Build from the config's `pricing_model` section; anything that is not
    /// `random_walk` gets the default GBM.
    pub fn from_config(model_type: &str, drift: f64, volatility: f64, tick_interval: f64) -> Self {
        match model_type {
            "random_walk" => PriceModel::random_walk(volatility),
            _ => PriceModel::gbm(drift, volatility, tick_interval),
        }
    }

    pub fn next_price(&self, current: Decimal, rng: &SharedRng) -> Decimal {
        let current_f = current.to_f64().unwrap_or(PRICE_FLOOR);
        let next = match self {
            PriceModel::Gbm { drift, volatility, dt } => {
                let drift_component = (drift - 0.5 * volatility * volatility) * dt;
                let shock = volatility * dt.sqrt() * rng.standard_normal();
                current_f * (drift_component + shock).exp()
            }
            PriceModel::RandomWalk { volatility } => {
                current_f + current_f * volatility * rng.standard_normal()
            }
        };
        Decimal::from_f64(next.max(PRICE_FLOOR)).unwrap_or(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_gbm_is_reproducible_under_seed() {
        let model = PriceModel::gbm(0.05, 0.2, 1.0);
        let a: Vec<Decimal> = {
            let rng = SharedRng::seeded(9);
            let mut price = dec!(50000);
            (0..50)
                .map(|_| {
                    price = model.next_price(price, &rng);
                    price
                })
                .collect()
        };
        let b: Vec<Decimal> = {
            let rng = SharedRng::seeded(9);
            let mut price = dec!(50000);
            (0..50)
                .map(|_| {
                    price = model.next_price(price, &rng);
                    price
                })
                .collect()
        };
        assert_eq!(a, b);
    }

    #[test]
    fn test_gbm_stays_positive() {
        let model = PriceModel::gbm(0.0, 0.5, 0.001);
        let rng = SharedRng::seeded(3);
        let mut price = dec!(100);
        for _ in 0..1000 {
            price = model.next_price(price, &rng);
            assert!(price > Decimal::ZERO);
        }
    }

    #[test]
    fn test_gbm_per_tick_moves_shrink_with_tick_interval() {
        // Same annualized sigma, 1000x smaller tick → much smaller per-tick
        // log-returns (scaling is sqrt(dt)).
        let coarse = PriceModel::gbm(0.0, 0.2, 1.0);
        let fine = PriceModel::gbm(0.0, 0.2, 0.001);
        let rng_a = SharedRng::seeded(11);
        let rng_b = SharedRng::seeded(11);

        let mut coarse_sum = 0.0;
        let mut fine_sum = 0.0;
        let mut price_a = dec!(100);
        let mut price_b = dec!(100);
        for _ in 0..200 {
            let next_a = coarse.next_price(price_a, &rng_a);
            let next_b = fine.next_price(price_b, &rng_b);
            coarse_sum += ret(price_a, next_a).abs();
            fine_sum += ret(price_b, next_b).abs();
            price_a = next_a;
            price_b = next_b;
        }
        // sqrt(1000) ≈ 31.6; leave slack for sampling noise.
        assert!(coarse_sum > fine_sum * 10.0);
    }

    #[test]
    fn test_random_walk_floors_at_one_cent() {
        let model = PriceModel::random_walk(10.0);
        let rng = SharedRng::seeded(1);
        let mut price = dec!(0.02);
        for _ in 0..100 {
            price = model.next_price(price, &rng);
            assert!(price >= dec!(0.01));
        }
    }

    #[test]
    fn test_from_config_selects_model() {
        assert!(matches!(
            PriceModel::from_config("random_walk", 0.0, 0.1, 1.0),
            PriceModel::RandomWalk { .. }
        ));
        assert!(matches!(
            PriceModel::from_config("gbm", 0.0, 0.1, 1.0),
            PriceModel::Gbm { .. }
        ));
        assert!(matches!(
            PriceModel::from_config("unknown", 0.0, 0.1, 1.0),
            PriceModel::Gbm { .. }
        ));
    }

    fn ret(from: Decimal, to: Decimal) -> f64 {
        use rust_decimal::prelude::ToPrimitive;
        (to.to_f64().unwrap() / from.to_f64().unwrap()).ln()
    }
}
