//! Matching engine: order admission, price-time-priority matching, TIF
//! handling, cancellation, and read-only queries.
//!
//! All orders ever placed live in one arena map; books hold ids only.
//! Matching is atomic per `place` call: the engine is driven behind a single
//! lock, so no other order for the same symbol interleaves with an
//! in-progress match.

use std::collections::{HashMap, HashSet};

use rust_decimal::Decimal;
use thiserror::Error;
use uuid::Uuid;

use super::accounts::{split_symbol, AccountManager};
use super::book::OrderBook;
use super::orders::{Fill, Order, OrderSide, OrderStatus, OrderType, TimeInForce};

#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error("unknown symbol: {0}")]
    UnknownSymbol(String),
    #[error("insufficient balance")]
    InsufficientBalance { order_id: String },
    #[error("fill-or-kill order cannot be fully filled")]
    UnfillableFok { order_id: String },
    #[error("price is required for LIMIT orders")]
    PriceRequired,
    #[error("price must be positive")]
    InvalidPrice,
    #[error("MARKET orders must not carry a price")]
    UnexpectedPrice,
    #[error("quantity must be positive")]
    InvalidQuantity,
    #[error("order not found")]
    OrderNotFound,
    #[error("order does not belong to this session")]
    NotOrderOwner,
    #[error("cannot cancel order with status {0}")]
    NotCancellable(OrderStatus),
}

impl ExchangeError {
    /// Stable machine-readable code surfaced on both transports.
    pub fn code(&self) -> &'static str {
        match self {
            ExchangeError::UnknownSymbol(_) => "invalid_symbol",
            ExchangeError::InsufficientBalance { .. } => "insufficient_balance",
            ExchangeError::UnfillableFok { .. } => "unfillable_fok",
            ExchangeError::PriceRequired
            | ExchangeError::InvalidPrice
            | ExchangeError::UnexpectedPrice
            | ExchangeError::InvalidQuantity => "validation",
            ExchangeError::OrderNotFound => "order_not_found",
            ExchangeError::NotOrderOwner => "not_order_owner",
            ExchangeError::NotCancellable(_) => "order_not_cancellable",
        }
    }

    /// The order id recorded for rejections that allocate one.
    pub fn order_id(&self) -> Option<&str> {
        match self {
            ExchangeError::InsufficientBalance { order_id }
            | ExchangeError::UnfillableFok { order_id } => Some(order_id),
            _ => None,
        }
    }
}

#[derive(Debug)]
pub struct ExchangeEngine {
    symbols: HashSet<String>,
    books: HashMap<String, OrderBook>,
    accounts: AccountManager,
    orders: HashMap<String, Order>,
    fills: Vec<Fill>,
    last_prices: HashMap<String, Decimal>,
}

impl ExchangeEngine {
    pub fn new(symbols: Vec<String>, accounts: AccountManager) -> Self {
        let books = symbols
            .iter()
            .map(|s| (s.clone(), OrderBook::new(s.clone())))
            .collect();
        Self {
            symbols: symbols.into_iter().collect(),
            books,
            accounts,
            orders: HashMap::new(),
            fills: Vec::new(),
            last_prices: HashMap::new(),
        }
    }

    pub fn symbols(&self) -> &HashSet<String> {
        &self.symbols
    }

    pub fn accounts(&self) -> &AccountManager {
        &self.accounts
    }

    pub fn accounts_mut(&mut self) -> &mut AccountManager {
        &mut self.accounts
    }

    /// Admit, match, and apply time-in-force for a new order.
    #[allow(clippy::too_many_arguments)]
    pub fn place_order(
        &mut self,
        session_id: &str,
        symbol: &str,
        side: OrderSide,
        order_type: OrderType,
        quantity: Decimal,
        price: Option<Decimal>,
        time_in_force: TimeInForce,
    ) -> Result<(Order, Vec<Fill>), ExchangeError> {
        if !self.symbols.contains(symbol) {
            return Err(ExchangeError::UnknownSymbol(symbol.to_string()));
        }
        if quantity <= Decimal::ZERO {
            return Err(ExchangeError::InvalidQuantity);
        }
        match (order_type, price) {
            (OrderType::Limit, None) => return Err(ExchangeError::PriceRequired),
            (OrderType::Market, Some(_)) => return Err(ExchangeError::UnexpectedPrice),
            (_, Some(p)) if p <= Decimal::ZERO => return Err(ExchangeError::InvalidPrice),
            _ => {}
        }

        let order_id = Uuid::new_v4().to_string();
        let now = chrono::Utc::now();
        let mut order = Order {
            order_id: order_id.clone(),
            session_id: session_id.to_string(),
            symbol: symbol.to_string(),
            side,
            order_type,
            price,
            quantity,
            filled_quantity: Decimal::ZERO,
            status: OrderStatus::Pending,
            time_in_force,
            created_at: now,
            updated_at: now,
        };

        let account = self.accounts.get_or_create(session_id);
        if !validate_order_balance(&order, account.balances()) {
            order.reject();
            self.orders.insert(order_id.clone(), order);
            return Err(ExchangeError::InsufficientBalance { order_id });
        }

        // FOK is atomic: reject up front when resting liquidity within the
        // limit cannot cover the full quantity, so no fill is ever produced
        // and then reverted.
        if time_in_force == TimeInForce::Fok {
            let book = &self.books[symbol];
            if book.available_quantity(side, price) < quantity {
                order.reject();
                self.orders.insert(order_id.clone(), order);
                return Err(ExchangeError::UnfillableFok { order_id });
            }
        }

        order.status = OrderStatus::Open;
        let fills = self.match_order(&mut order);

        if order.remaining_quantity() > Decimal::ZERO {
            match order_type {
                OrderType::Limit => match time_in_force {
                    TimeInForce::Gtc => {
                        let book = self.books.get_mut(symbol).expect("book exists");
                        book.add(
                            &order.order_id,
                            order.side,
                            order.price.expect("limit order has price"),
                            order.remaining_quantity(),
                        );
                    }
                    TimeInForce::Ioc => order.cancel(),
                    // Feasibility was checked before matching.
                    TimeInForce::Fok => debug_assert!(false, "FOK left remainder after pre-check"),
                },
                // Not enough liquidity for the full market order.
                OrderType::Market => order.cancel(),
            }
        }

        self.orders.insert(order_id, order.clone());
        Ok((order, fills))
    }

    /// Owner-scoped cancel. Terminal and unknown orders fail.
    pub fn cancel_order(&mut self, session_id: &str, order_id: &str) -> Result<Order, ExchangeError> {
        let order = self
            .orders
            .get_mut(order_id)
            .ok_or(ExchangeError::OrderNotFound)?;
        if order.session_id != session_id {
            return Err(ExchangeError::NotOrderOwner);
        }
        if !matches!(order.status, OrderStatus::Open | OrderStatus::PartiallyFilled) {
            return Err(ExchangeError::NotCancellable(order.status));
        }

        let remaining = order.remaining_quantity();
        if let Some(book) = self.books.get_mut(&order.symbol) {
            book.remove(order_id, remaining);
        }
        order.cancel();
        Ok(order.clone())
    }

    /// Unscoped lookup for internal fan-out (fill notifications); the
    /// session-scoped query surface is [`ExchangeEngine::get_order`].
    pub fn order_snapshot(&self, order_id: &str) -> Option<&Order> {
        self.orders.get(order_id)
    }

    pub fn get_order(&self, session_id: &str, order_id: &str) -> Option<&Order> {
        self.orders
            .get(order_id)
            .filter(|o| o.session_id == session_id)
    }

    pub fn get_orders(
        &self,
        session_id: &str,
        symbol: Option<&str>,
        status: Option<OrderStatus>,
    ) -> Vec<&Order> {
        let mut orders: Vec<&Order> = self
            .orders
            .values()
            .filter(|o| o.session_id == session_id)
            .filter(|o| symbol.map_or(true, |s| o.symbol == s))
            .filter(|o| status.map_or(true, |st| o.status == st))
            .collect();
        orders.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        orders
    }

    pub fn orderbook(&self, symbol: &str) -> Option<&OrderBook> {
        self.books.get(symbol)
    }

    pub fn last_price(&self, symbol: &str) -> Option<Decimal> {
        self.last_prices.get(symbol).copied()
    }

    /// Seed or override the reference price (used at startup and by the
    /// market-data feed).
    pub fn set_last_price(&mut self, symbol: &str, price: Decimal) {
        self.last_prices.insert(symbol.to_string(), price);
    }

    pub fn fills(&self, session_id: Option<&str>) -> Vec<&Fill> {
        self.fills
            .iter()
            .filter(|f| session_id.map_or(true, |s| f.session_id == s))
            .collect()
    }

    /// Walk the opposite side of the book, best price first, FIFO within a
    /// level. The maker's price wins; price improvement goes to the taker.
    fn match_order(&mut self, taker: &mut Order) -> Vec<Fill> {
        let mut fills = Vec::new();

        while taker.remaining_quantity() > Decimal::ZERO {
            let book = self.books.get(&taker.symbol).expect("book exists");
            let maker_side = match taker.side {
                OrderSide::Buy => OrderSide::Sell,
                OrderSide::Sell => OrderSide::Buy,
            };
            let Some(best_price) = (match taker.side {
                OrderSide::Buy => book.best_ask(),
                OrderSide::Sell => book.best_bid(),
            }) else {
                break;
            };

            if taker.order_type == OrderType::Limit {
                let limit = taker.price.expect("limit order has price");
                let crosses = match taker.side {
                    OrderSide::Buy => best_price <= limit,
                    OrderSide::Sell => best_price >= limit,
                };
                if !crosses {
                    break;
                }
            }

            let Some(maker_id) = book.front_order_at(maker_side, best_price).map(String::from)
            else {
                break;
            };

            let (taker_fill, maker_fill) = self.execute_fill(taker, &maker_id, best_price);
            fills.push(taker_fill);
            fills.push(maker_fill);
        }

        fills
    }

    fn execute_fill(
        &mut self,
        taker: &mut Order,
        maker_id: &str,
        price: Decimal,
    ) -> (Fill, Fill) {
        let maker = self.orders.get_mut(maker_id).expect("maker in arena");
        let fill_qty = taker.remaining_quantity().min(maker.remaining_quantity());

        taker.fill(fill_qty);
        maker.fill(fill_qty);
        let maker_filled = maker.is_filled();
        let maker_remaining = maker.remaining_quantity();
        let maker_session = maker.session_id.clone();
        let maker_side = maker.side;

        self.last_prices.insert(taker.symbol.clone(), price);

        let book = self.books.get_mut(&taker.symbol).expect("book exists");
        if maker_filled {
            book.remove(maker_id, maker_remaining);
        } else {
            book.reduce(maker_id, fill_qty);
        }

        let now = chrono::Utc::now();
        let taker_fill = Fill {
            fill_id: Uuid::new_v4().to_string(),
            order_id: taker.order_id.clone(),
            session_id: taker.session_id.clone(),
            symbol: taker.symbol.clone(),
            side: taker.side,
            price,
            quantity: fill_qty,
            timestamp: now,
            is_maker: false,
        };
        let maker_fill = Fill {
            fill_id: Uuid::new_v4().to_string(),
            order_id: maker_id.to_string(),
            session_id: maker_session,
            symbol: taker.symbol.clone(),
            side: maker_side,
            price,
            quantity: fill_qty,
            timestamp: now,
            is_maker: true,
        };

        self.accounts
            .get_or_create(&taker_fill.session_id)
            .apply_fill(&taker_fill, price);
        self.accounts
            .get_or_create(&maker_fill.session_id)
            .apply_fill(&maker_fill, price);

        self.fills.push(taker_fill.clone());
        self.fills.push(maker_fill.clone());
        (taker_fill, maker_fill)
    }
}

/// Balance admission check. Deliberately lax: only BUY LIMIT notional is
/// checked against the quote balance; SELL and MARKET pass, and resting
/// orders do not reserve funds.
fn validate_order_balance(
    order: &Order,
    balances: &HashMap<String, Decimal>,
) -> bool {
    if order.side == OrderSide::Buy {
        if let Some(price) = order.price {
            let (_, quote) = split_symbol(&order.symbol);
            let required = price * order.quantity;
            return balances.get(&quote).copied().unwrap_or(Decimal::ZERO) >= required;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn engine() -> ExchangeEngine {
        let mut defaults = HashMap::new();
        defaults.insert("USD".to_string(), dec!(100000));
        defaults.insert("BTC".to_string(), dec!(10));
        ExchangeEngine::new(
            vec!["BTC/USD".to_string(), "ETH/USD".to_string()],
            AccountManager::new(defaults),
        )
    }

    fn place_limit(
        eng: &mut ExchangeEngine,
        session: &str,
        side: OrderSide,
        qty: Decimal,
        price: Decimal,
    ) -> (Order, Vec<Fill>) {
        eng.place_order(
            session,
            "BTC/USD",
            side,
            OrderType::Limit,
            qty,
            Some(price),
            TimeInForce::Gtc,
        )
        .expect("place succeeds")
    }

    #[test]
    fn test_full_match_between_two_sessions() {
        let mut eng = engine();
        let (sell, _) = place_limit(&mut eng, "a", OrderSide::Sell, dec!(1), dec!(50000));
        let (buy, fills) = place_limit(&mut eng, "b", OrderSide::Buy, dec!(1), dec!(50000));

        assert_eq!(fills.len(), 2);
        assert!(fills.iter().all(|f| f.price == dec!(50000) && f.quantity == dec!(1)));
        assert_eq!(buy.status, OrderStatus::Filled);
        assert_eq!(
            eng.get_order("a", &sell.order_id).unwrap().status,
            OrderStatus::Filled
        );
        assert_eq!(eng.last_price("BTC/USD"), Some(dec!(50000)));

        let book = eng.orderbook("BTC/USD").unwrap();
        assert_eq!(book.order_count(), 0);
        assert_eq!(book.best_bid(), None);
        assert_eq!(book.best_ask(), None);
    }

    #[test]
    fn test_partial_fill_leaves_remainder_in_book() {
        let mut eng = engine();
        let (buy, _) = place_limit(&mut eng, "a", OrderSide::Buy, dec!(2), dec!(50000));
        let (sell, fills) = place_limit(&mut eng, "b", OrderSide::Sell, dec!(1), dec!(50000));

        assert_eq!(sell.status, OrderStatus::Filled);
        assert_eq!(fills.len(), 2);

        let resting = eng.get_order("a", &buy.order_id).unwrap();
        assert_eq!(resting.status, OrderStatus::PartiallyFilled);
        assert_eq!(resting.filled_quantity, dec!(1));
        assert_eq!(resting.remaining_quantity(), dec!(1));

        let book = eng.orderbook("BTC/USD").unwrap();
        assert_eq!(book.best_bid(), Some(dec!(50000)));
        assert_eq!(book.volume_at(OrderSide::Buy, dec!(50000)), dec!(1));
    }

    #[test]
    fn test_insufficient_balance_records_rejected_order() {
        let mut eng = engine();
        eng.accounts_mut().get_or_create("c").set_balance("USD", dec!(500));

        let err = eng
            .place_order(
                "c",
                "BTC/USD",
                OrderSide::Buy,
                OrderType::Limit,
                dec!(0.1),
                Some(dec!(9000)),
                TimeInForce::Gtc,
            )
            .unwrap_err();

        let order_id = err.order_id().expect("rejection assigns an id").to_string();
        assert_eq!(err.code(), "insufficient_balance");
        let order = eng.get_order("c", &order_id).unwrap();
        assert_eq!(order.status, OrderStatus::Rejected);
        // Balance untouched.
        assert_eq!(eng.accounts().get("c").unwrap().balance("USD"), dec!(500));
    }

    #[test]
    fn test_buy_limit_at_exact_balance_boundary() {
        let mut eng = engine();
        eng.accounts_mut().get_or_create("c").set_balance("USD", dec!(1000));

        // balance / price exactly
        let ok = eng.place_order(
            "c",
            "BTC/USD",
            OrderSide::Buy,
            OrderType::Limit,
            dec!(0.1),
            Some(dec!(10000)),
            TimeInForce::Gtc,
        );
        assert!(ok.is_ok());

        // one quote unit more
        let err = eng
            .place_order(
                "c",
                "BTC/USD",
                OrderSide::Buy,
                OrderType::Limit,
                dec!(0.1),
                Some(dec!(10010)),
                TimeInForce::Gtc,
            )
            .unwrap_err();
        assert_eq!(err.code(), "insufficient_balance");
    }

    #[test]
    fn test_unknown_symbol_rejected_without_order() {
        let mut eng = engine();
        let err = eng
            .place_order(
                "a",
                "DOGE/USD",
                OrderSide::Buy,
                OrderType::Limit,
                dec!(1),
                Some(dec!(1)),
                TimeInForce::Gtc,
            )
            .unwrap_err();
        assert_eq!(err.code(), "invalid_symbol");
        assert!(err.order_id().is_none());
    }

    #[test]
    fn test_limit_requires_price_and_market_forbids_it() {
        let mut eng = engine();
        let err = eng
            .place_order("a", "BTC/USD", OrderSide::Buy, OrderType::Limit, dec!(1), None, TimeInForce::Gtc)
            .unwrap_err();
        assert!(matches!(err, ExchangeError::PriceRequired));

        let err = eng
            .place_order(
                "a",
                "BTC/USD",
                OrderSide::Buy,
                OrderType::Market,
                dec!(1),
                Some(dec!(1)),
                TimeInForce::Gtc,
            )
            .unwrap_err();
        assert!(matches!(err, ExchangeError::UnexpectedPrice));
    }

    #[test]
    fn test_price_improvement_goes_to_taker() {
        let mut eng = engine();
        place_limit(&mut eng, "a", OrderSide::Sell, dec!(1), dec!(49000));
        let (_, fills) = place_limit(&mut eng, "b", OrderSide::Buy, dec!(1), dec!(50000));
        // Maker price wins.
        assert!(fills.iter().all(|f| f.price == dec!(49000)));
    }

    #[test]
    fn test_matching_walks_levels_in_price_order() {
        let mut eng = engine();
        place_limit(&mut eng, "a", OrderSide::Sell, dec!(1), dec!(50200));
        place_limit(&mut eng, "a", OrderSide::Sell, dec!(1), dec!(50000));
        place_limit(&mut eng, "a", OrderSide::Sell, dec!(1), dec!(50100));

        let (order, fills) = eng
            .place_order(
                "b",
                "BTC/USD",
                OrderSide::Buy,
                OrderType::Market,
                dec!(3),
                None,
                TimeInForce::Gtc,
            )
            .unwrap();
        assert_eq!(order.status, OrderStatus::Filled);
        let taker_prices: Vec<Decimal> =
            fills.iter().filter(|f| !f.is_maker).map(|f| f.price).collect();
        assert_eq!(taker_prices, vec![dec!(50000), dec!(50100), dec!(50200)]);
    }

    #[test]
    fn test_fifo_priority_within_level() {
        let mut eng = engine();
        let (first, _) = place_limit(&mut eng, "a", OrderSide::Sell, dec!(1), dec!(50000));
        let (second, _) = place_limit(&mut eng, "b", OrderSide::Sell, dec!(1), dec!(50000));

        place_limit(&mut eng, "c", OrderSide::Buy, dec!(1), dec!(50000));
        assert_eq!(eng.get_order("a", &first.order_id).unwrap().status, OrderStatus::Filled);
        assert_eq!(eng.get_order("b", &second.order_id).unwrap().status, OrderStatus::Open);
    }

    #[test]
    fn test_market_remainder_is_cancelled() {
        let mut eng = engine();
        place_limit(&mut eng, "a", OrderSide::Sell, dec!(1), dec!(50000));
        let (order, fills) = eng
            .place_order(
                "b",
                "BTC/USD",
                OrderSide::Buy,
                OrderType::Market,
                dec!(2),
                None,
                TimeInForce::Gtc,
            )
            .unwrap();
        assert_eq!(fills.len(), 2);
        assert_eq!(order.status, OrderStatus::Cancelled);
        assert_eq!(order.filled_quantity, dec!(1));
    }

    #[test]
    fn test_ioc_cancels_remainder() {
        let mut eng = engine();
        place_limit(&mut eng, "a", OrderSide::Sell, dec!(1), dec!(50000));
        let (order, fills) = eng
            .place_order(
                "b",
                "BTC/USD",
                OrderSide::Buy,
                OrderType::Limit,
                dec!(2),
                Some(dec!(50000)),
                TimeInForce::Ioc,
            )
            .unwrap();
        assert_eq!(fills.len(), 2);
        assert_eq!(order.status, OrderStatus::Cancelled);
        assert_eq!(order.filled_quantity, dec!(1));
        assert_eq!(eng.orderbook("BTC/USD").unwrap().order_count(), 0);
    }

    #[test]
    fn test_ioc_with_no_match_is_cancelled_with_zero_fills() {
        let mut eng = engine();
        let (order, fills) = eng
            .place_order(
                "b",
                "BTC/USD",
                OrderSide::Buy,
                OrderType::Limit,
                dec!(1),
                Some(dec!(40000)),
                TimeInForce::Ioc,
            )
            .unwrap();
        assert!(fills.is_empty());
        assert_eq!(order.status, OrderStatus::Cancelled);
    }

    #[test]
    fn test_fok_unfillable_leaves_no_trace() {
        let mut eng = engine();
        place_limit(&mut eng, "a", OrderSide::Sell, dec!(1), dec!(50000));
        let depth_before = eng.orderbook("BTC/USD").unwrap().depth(10);

        let err = eng
            .place_order(
                "b",
                "BTC/USD",
                OrderSide::Buy,
                OrderType::Limit,
                dec!(2),
                Some(dec!(50000)),
                TimeInForce::Fok,
            )
            .unwrap_err();
        assert_eq!(err.code(), "unfillable_fok");

        let order = eng.get_order("b", err.order_id().unwrap()).unwrap();
        assert_eq!(order.status, OrderStatus::Rejected);
        assert_eq!(order.filled_quantity, Decimal::ZERO);
        assert!(eng.fills(Some("b")).is_empty());
        assert_eq!(eng.orderbook("BTC/USD").unwrap().depth(10), depth_before);
    }

    #[test]
    fn test_fok_fillable_executes_completely() {
        let mut eng = engine();
        place_limit(&mut eng, "a", OrderSide::Sell, dec!(1), dec!(50000));
        place_limit(&mut eng, "a", OrderSide::Sell, dec!(1), dec!(50100));

        let (order, fills) = eng
            .place_order(
                "b",
                "BTC/USD",
                OrderSide::Buy,
                OrderType::Limit,
                dec!(2),
                Some(dec!(50100)),
                TimeInForce::Fok,
            )
            .unwrap();
        assert_eq!(order.status, OrderStatus::Filled);
        assert_eq!(fills.len(), 4);
    }

    #[test]
    fn test_place_then_cancel_restores_depth() {
        let mut eng = engine();
        place_limit(&mut eng, "a", OrderSide::Buy, dec!(1), dec!(49000));
        let before = eng.orderbook("BTC/USD").unwrap().depth(10);

        let (order, _) = place_limit(&mut eng, "b", OrderSide::Buy, dec!(2), dec!(49500));
        let cancelled = eng.cancel_order("b", &order.order_id).unwrap();
        assert_eq!(cancelled.status, OrderStatus::Cancelled);
        assert_eq!(eng.orderbook("BTC/USD").unwrap().depth(10), before);
    }

    #[test]
    fn test_cancel_rejects_wrong_owner_unknown_and_terminal() {
        let mut eng = engine();
        let (order, _) = place_limit(&mut eng, "a", OrderSide::Buy, dec!(1), dec!(49000));

        assert!(matches!(
            eng.cancel_order("b", &order.order_id),
            Err(ExchangeError::NotOrderOwner)
        ));
        assert!(matches!(
            eng.cancel_order("a", "missing"),
            Err(ExchangeError::OrderNotFound)
        ));

        eng.cancel_order("a", &order.order_id).unwrap();
        assert!(matches!(
            eng.cancel_order("a", &order.order_id),
            Err(ExchangeError::NotCancellable(OrderStatus::Cancelled))
        ));
    }

    #[test]
    fn test_get_orders_filters() {
        let mut eng = engine();
        place_limit(&mut eng, "a", OrderSide::Buy, dec!(1), dec!(49000));
        eng.place_order(
            "a",
            "ETH/USD",
            OrderSide::Buy,
            OrderType::Limit,
            dec!(1),
            Some(dec!(3000)),
            TimeInForce::Gtc,
        )
        .unwrap();
        place_limit(&mut eng, "b", OrderSide::Sell, dec!(1), dec!(51000));

        assert_eq!(eng.get_orders("a", None, None).len(), 2);
        assert_eq!(eng.get_orders("a", Some("BTC/USD"), None).len(), 1);
        assert_eq!(eng.get_orders("a", None, Some(OrderStatus::Open)).len(), 2);
        assert_eq!(eng.get_orders("a", None, Some(OrderStatus::Filled)).len(), 0);
    }

    #[test]
    fn test_filled_never_exceeds_quantity_across_trades() {
        let mut eng = engine();
        place_limit(&mut eng, "a", OrderSide::Sell, dec!(0.4), dec!(50000));
        place_limit(&mut eng, "a", OrderSide::Sell, dec!(0.4), dec!(50000));
        place_limit(&mut eng, "b", OrderSide::Buy, dec!(1), dec!(50000));

        for order in eng.get_orders("a", None, None) {
            assert!(order.filled_quantity <= order.quantity);
            assert_eq!(order.status == OrderStatus::Filled, order.is_filled());
        }
    }

    #[test]
    fn test_bid_ask_never_cross_after_resting_inserts() {
        let mut eng = engine();
        place_limit(&mut eng, "a", OrderSide::Buy, dec!(1), dec!(49000));
        place_limit(&mut eng, "b", OrderSide::Sell, dec!(1), dec!(51000));
        let book = eng.orderbook("BTC/USD").unwrap();
        assert!(book.best_bid().unwrap() < book.best_ask().unwrap());
    }

    #[test]
    fn test_equity_preserved_across_matched_trade() {
        let mut eng = engine();
        place_limit(&mut eng, "a", OrderSide::Sell, dec!(1), dec!(50000));
        place_limit(&mut eng, "b", OrderSide::Buy, dec!(1), dec!(50000));
        let price = eng.last_price("BTC/USD").unwrap();

        // quote cash + position exposure at the trade price, per session and
        // in total, is what it was before the trade (all started flat with
        // 100k USD).
        let mut total = Decimal::ZERO;
        for session in ["a", "b"] {
            let account = eng.accounts.get(session).unwrap();
            let pos_qty = account
                .position_ref("BTC/USD")
                .map(|p| p.quantity)
                .unwrap_or(Decimal::ZERO);
            let value = account.balance("USD") + pos_qty * price;
            assert_eq!(value, dec!(100000));
            total += value;
        }
        assert_eq!(total, dec!(200000));
    }
}
