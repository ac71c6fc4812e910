//! Per-symbol market-data state.
//!
//! Each tick advances the price process, refreshes the 24h running stats,
//! stamps the next sequence id, and appends to the bounded history ring that
//! backs the price-history endpoint. Sequence ids are per (TICKER, symbol),
//! start at 1, and advance exactly once per tick regardless of whether any
//! broadcast succeeds.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::model::PriceModel;
use crate::engine::OrderSide;
use crate::rng::SharedRng;
use crate::server::messages::ServerMessage;

/// Fixed spread fraction, 10 bps; applied half above, half below last.
const TICKER_SPREAD: Decimal = Decimal::from_parts(1, 0, 0, false, 3); // 0.001

/// Bounded history; old points fall off the front.
const HISTORY_CAP: usize = 10_000;

/// Synthetic public trades per tick (probability).
const TRADE_PROBABILITY: f64 = 0.3;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricePoint {
    pub timestamp: DateTime<Utc>,
    pub price: Decimal,
    pub bid: Decimal,
    pub ask: Decimal,
    pub volume_24h: Decimal,
}

#[derive(Debug)]
pub struct MarketDataGenerator {
    symbol: String,
    model: PriceModel,
    current_price: Decimal,
    high_24h: Decimal,
    low_24h: Decimal,
    volume_24h: Decimal,
    sequence_id: u64,
    last_update: DateTime<Utc>,
    history: VecDeque<PricePoint>,
}

impl MarketDataGenerator {
    pub fn new(symbol: impl Into<String>, initial_price: Decimal, model: PriceModel) -> Self {
        Self {
            symbol: symbol.into(),
            model,
            current_price: initial_price,
            high_24h: initial_price,
            low_24h: initial_price,
            volume_24h: Decimal::ZERO,
            sequence_id: 0,
            last_update: Utc::now(),
            history: VecDeque::new(),
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn current_price(&self) -> Decimal {
        self.current_price
    }

    pub fn set_price(&mut self, price: Decimal) {
        self.current_price = price;
        self.last_update = Utc::now();
    }

    pub fn sequence_id(&self) -> u64 {
        self.sequence_id
    }

    /// Advance the price process one step and emit the sequenced ticker.
    pub fn next_tick(&mut self, rng: &SharedRng) -> ServerMessage {
        let next = self.model.next_price(self.current_price, rng);
        self.current_price = next;
        if next > self.high_24h {
            self.high_24h = next;
        }
        if next < self.low_24h {
            self.low_24h = next;
        }
        self.last_update = Utc::now();
        self.sequence_id += 1;

        let ticker = self.ticker();
        if let ServerMessage::MarketData { bid, ask, .. } = &ticker {
            self.history.push_back(PricePoint {
                timestamp: self.last_update,
                price: self.current_price,
                bid: *bid,
                ask: *ask,
                volume_24h: self.volume_24h,
            });
            if self.history.len() > HISTORY_CAP {
                self.history.pop_front();
            }
        }
        ticker
    }

    /// Current ticker snapshot without advancing the process (request API).
    pub fn ticker(&self) -> ServerMessage {
        let half = self.current_price * TICKER_SPREAD / Decimal::TWO;
        ServerMessage::MarketData {
            timestamp: self.last_update,
            symbol: self.symbol.clone(),
            last_price: self.current_price,
            bid: self.current_price - half,
            ask: self.current_price + half,
            volume_24h: self.volume_24h,
            high_24h: self.high_24h,
            low_24h: self.low_24h,
            sequence_id: self.sequence_id,
        }
    }

    /// Maybe synthesize a public trade around the current price. Volume
    /// accrues only when a trade happens.
    pub fn maybe_trade(&mut self, rng: &SharedRng) -> Option<ServerMessage> {
        if !rng.chance(TRADE_PROBABILITY) {
            return None;
        }
        let quantity = Decimal::from_f64(rng.range_f64(0.1, 2.0))?.round_dp(4);
        let side = if rng.chance(0.5) {
            OrderSide::Buy
        } else {
            OrderSide::Sell
        };
        let wiggle = Decimal::from_f64(rng.range_f64(-0.0001, 0.0001))?;
        let price = (self.current_price + self.current_price * wiggle).round_dp(8);
        self.volume_24h += quantity;

        Some(ServerMessage::Trade {
            timestamp: Utc::now(),
            trade_id: Uuid::new_v4().to_string(),
            symbol: self.symbol.clone(),
            price,
            quantity,
            side,
        })
    }

    /// Chronological history within `[start, end]`, truncated to the most
    /// recent `limit` points.
    pub fn history(
        &self,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Vec<PricePoint> {
        let filtered: Vec<&PricePoint> = self
            .history
            .iter()
            .filter(|p| start.map_or(true, |s| p.timestamp >= s))
            .filter(|p| end.map_or(true, |e| p.timestamp <= e))
            .collect();
        let skip = filtered.len().saturating_sub(limit);
        filtered.into_iter().skip(skip).cloned().collect()
    }
}
