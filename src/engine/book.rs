//! Price-time-priority limit order book.
//!
//! The book is a pure data structure: it never matches. Orders live once in
//! the engine's arena; levels hold order ids in FIFO queues, keyed by price
//! in a `BTreeMap` per side. Level quantity sums track *remaining* (not
//! original) quantities, so the engine reports partial executions through
//! [`OrderBook::reduce`] and passes the remaining quantity on removal.

use std::collections::{BTreeMap, HashMap, VecDeque};

use rust_decimal::Decimal;

use super::orders::OrderSide;

#[derive(Debug, Default)]
pub struct PriceLevel {
    orders: VecDeque<String>,
    total_quantity: Decimal,
}

impl PriceLevel {
    fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }

    pub fn total_quantity(&self) -> Decimal {
        self.total_quantity
    }

    pub fn order_count(&self) -> usize {
        self.orders.len()
    }
}

/// Per-symbol book. Invariants: no empty price levels, an order id appears in
/// exactly one level, and only open LIMIT orders with remaining quantity are
/// present.
#[derive(Debug)]
pub struct OrderBook {
    symbol: String,
    bids: BTreeMap<Decimal, PriceLevel>,
    asks: BTreeMap<Decimal, PriceLevel>,
    index: HashMap<String, (OrderSide, Decimal)>,
}

impl OrderBook {
    pub fn new(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            bids: BTreeMap::new(),
            asks: BTreeMap::new(),
            index: HashMap::new(),
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// Insert a resting order at the back of its price level.
    pub fn add(&mut self, order_id: &str, side: OrderSide, price: Decimal, remaining: Decimal) {
        debug_assert!(
            !self.index.contains_key(order_id),
            "order already in book"
        );
        self.index.insert(order_id.to_string(), (side, price));
        let level = self.side_mut(side).entry(price).or_default();
        level.orders.push_back(order_id.to_string());
        level.total_quantity += remaining;
    }

    /// Remove an order wherever it rests. `remaining` is the order's current
    /// remaining quantity (zero for a fully-executed maker). Returns false if
    /// the order is not in the book.
    pub fn remove(&mut self, order_id: &str, remaining: Decimal) -> bool {
        let Some((side, price)) = self.index.remove(order_id) else {
            return false;
        };
        let levels = self.side_mut(side);
        if let Some(level) = levels.get_mut(&price) {
            level.orders.retain(|id| id != order_id);
            level.total_quantity -= remaining;
            if level.is_empty() {
                levels.remove(&price);
            }
        }
        true
    }

    /// Decrease a resting order's contribution after a partial execution.
    pub fn reduce(&mut self, order_id: &str, quantity: Decimal) {
        let Some((side, price)) = self.index.get(order_id).copied() else {
            return;
        };
        if let Some(level) = self.side_mut(side).get_mut(&price) {
            level.total_quantity -= quantity;
        }
    }

    pub fn contains(&self, order_id: &str) -> bool {
        self.index.contains_key(order_id)
    }

    pub fn best_bid(&self) -> Option<Decimal> {
        self.bids.keys().next_back().copied()
    }

    pub fn best_ask(&self) -> Option<Decimal> {
        self.asks.keys().next().copied()
    }

    pub fn spread(&self) -> Option<Decimal> {
        Some(self.best_ask()? - self.best_bid()?)
    }

    pub fn mid_price(&self) -> Option<Decimal> {
        Some((self.best_ask()? + self.best_bid()?) / Decimal::TWO)
    }

    /// FIFO head at the given price, if the level exists.
    pub fn front_order_at(&self, side: OrderSide, price: Decimal) -> Option<&str> {
        let levels = match side {
            OrderSide::Buy => &self.bids,
            OrderSide::Sell => &self.asks,
        };
        levels
            .get(&price)
            .and_then(|level| level.orders.front())
            .map(String::as_str)
    }

    /// `(bids, asks)` as `(price, total_quantity)` pairs, best first,
    /// truncated to `levels`.
    pub fn depth(&self, levels: usize) -> (Vec<(Decimal, Decimal)>, Vec<(Decimal, Decimal)>) {
        let bids = self
            .bids
            .iter()
            .rev()
            .take(levels)
            .map(|(price, level)| (*price, level.total_quantity))
            .collect();
        let asks = self
            .asks
            .iter()
            .take(levels)
            .map(|(price, level)| (*price, level.total_quantity))
            .collect();
        (bids, asks)
    }

    /// Total resting quantity reachable by a taker willing to trade at
    /// `limit` (None for a market taker). Used for the fill-or-kill
    /// feasibility check.
    pub fn available_quantity(&self, taker_side: OrderSide, limit: Option<Decimal>) -> Decimal {
        match taker_side {
            OrderSide::Buy => self
                .asks
                .iter()
                .take_while(|(price, _)| limit.map_or(true, |lim| **price <= lim))
                .map(|(_, level)| level.total_quantity)
                .sum(),
            OrderSide::Sell => self
                .bids
                .iter()
                .rev()
                .take_while(|(price, _)| limit.map_or(true, |lim| **price >= lim))
                .map(|(_, level)| level.total_quantity)
                .sum(),
        }
    }

    pub fn order_count(&self) -> usize {
        self.index.len()
    }

    pub fn volume_at(&self, side: OrderSide, price: Decimal) -> Decimal {
        let levels = match side {
            OrderSide::Buy => &self.bids,
            OrderSide::Sell => &self.asks,
        };
        levels
            .get(&price)
            .map(|level| level.total_quantity)
            .unwrap_or(Decimal::ZERO)
    }

    fn side_mut(&mut self, side: OrderSide) -> &mut BTreeMap<Decimal, PriceLevel> {
        match side {
            OrderSide::Buy => &mut self.bids,
            OrderSide::Sell => &mut self.asks,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn book_with(entries: &[(&str, OrderSide, Decimal, Decimal)]) -> OrderBook {
        let mut book = OrderBook::new("BTC/USD");
        for (id, side, price, qty) in entries {
            book.add(id, *side, *price, *qty);
        }
        book
    }

    #[test]
    fn test_best_bid_ask_ordering() {
        let book = book_with(&[
            ("b1", OrderSide::Buy, dec!(49000), dec!(1)),
            ("b2", OrderSide::Buy, dec!(49500), dec!(1)),
            ("a1", OrderSide::Sell, dec!(50500), dec!(1)),
            ("a2", OrderSide::Sell, dec!(50100), dec!(1)),
        ]);
        assert_eq!(book.best_bid(), Some(dec!(49500)));
        assert_eq!(book.best_ask(), Some(dec!(50100)));
        assert_eq!(book.spread(), Some(dec!(600)));
        assert_eq!(book.mid_price(), Some(dec!(49800)));
    }

    #[test]
    fn test_fifo_within_level() {
        let book = book_with(&[
            ("first", OrderSide::Sell, dec!(50000), dec!(1)),
            ("second", OrderSide::Sell, dec!(50000), dec!(1)),
        ]);
        assert_eq!(book.front_order_at(OrderSide::Sell, dec!(50000)), Some("first"));
    }

    #[test]
    fn test_remove_clears_empty_level() {
        let mut book = book_with(&[("b1", OrderSide::Buy, dec!(49000), dec!(2))]);
        assert!(book.remove("b1", dec!(2)));
        assert_eq!(book.best_bid(), None);
        assert_eq!(book.order_count(), 0);
        // Second removal is a no-op.
        assert!(!book.remove("b1", dec!(2)));
    }

    #[test]
    fn test_depth_tracks_remaining_after_reduce() {
        let mut book = book_with(&[
            ("a1", OrderSide::Sell, dec!(50000), dec!(2)),
            ("a2", OrderSide::Sell, dec!(50000), dec!(1)),
            ("a3", OrderSide::Sell, dec!(50100), dec!(5)),
        ]);
        book.reduce("a1", dec!(1.5));
        let (bids, asks) = book.depth(10);
        assert!(bids.is_empty());
        assert_eq!(asks, vec![(dec!(50000), dec!(1.5)), (dec!(50100), dec!(5))]);
    }

    #[test]
    fn test_depth_truncates_to_levels() {
        let book = book_with(&[
            ("b1", OrderSide::Buy, dec!(100), dec!(1)),
            ("b2", OrderSide::Buy, dec!(101), dec!(1)),
            ("b3", OrderSide::Buy, dec!(102), dec!(1)),
        ]);
        let (bids, _) = book.depth(2);
        assert_eq!(bids.len(), 2);
        assert_eq!(bids[0].0, dec!(102));
        assert_eq!(bids[1].0, dec!(101));
    }

    #[test]
    fn test_available_quantity_respects_limit() {
        let book = book_with(&[
            ("a1", OrderSide::Sell, dec!(50000), dec!(1)),
            ("a2", OrderSide::Sell, dec!(50100), dec!(2)),
            ("a3", OrderSide::Sell, dec!(50200), dec!(4)),
        ]);
        assert_eq!(book.available_quantity(OrderSide::Buy, Some(dec!(50100))), dec!(3));
        assert_eq!(book.available_quantity(OrderSide::Buy, Some(dec!(49000))), dec!(0));
        assert_eq!(book.available_quantity(OrderSide::Buy, None), dec!(7));
    }

    #[test]
    fn test_volume_at_price() {
        let book = book_with(&[
            ("b1", OrderSide::Buy, dec!(49000), dec!(2)),
            ("b2", OrderSide::Buy, dec!(49000), dec!(3)),
        ]);
        assert_eq!(book.volume_at(OrderSide::Buy, dec!(49000)), dec!(5));
        assert_eq!(book.volume_at(OrderSide::Sell, dec!(49000)), dec!(0));
    }
}
