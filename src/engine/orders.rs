//! Order, fill and position value types.
//!
//! Status lifecycle:
//!   PENDING → OPEN → PARTIALLY_FILLED → FILLED
//!                 ↘ CANCELLED            (terminal)
//!   PENDING → REJECTED                   (terminal)
//!
//! Terminal statuses are absorbing; `filled_quantity` never exceeds
//! `quantity`.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "BUY",
            OrderSide::Sell => "SELL",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderType {
    Limit,
    Market,
}

impl OrderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderType::Limit => "LIMIT",
            OrderType::Market => "MARKET",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Pending,
    Open,
    PartiallyFilled,
    Filled,
    Cancelled,
    Rejected,
}

impl OrderStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Filled | OrderStatus::Cancelled | OrderStatus::Rejected
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "PENDING",
            OrderStatus::Open => "OPEN",
            OrderStatus::PartiallyFilled => "PARTIALLY_FILLED",
            OrderStatus::Filled => "FILLED",
            OrderStatus::Cancelled => "CANCELLED",
            OrderStatus::Rejected => "REJECTED",
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TimeInForce {
    /// Rest until cancelled.
    #[default]
    Gtc,
    /// Fill what crosses now, cancel the rest.
    Ioc,
    /// Fill completely now or reject entirely.
    Fok,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub order_id: String,
    pub session_id: String,
    pub symbol: String,
    pub side: OrderSide,
    #[serde(rename = "type")]
    pub order_type: OrderType,
    pub price: Option<Decimal>,
    pub quantity: Decimal,
    pub filled_quantity: Decimal,
    pub status: OrderStatus,
    pub time_in_force: TimeInForce,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    pub fn remaining_quantity(&self) -> Decimal {
        self.quantity - self.filled_quantity
    }

    pub fn is_filled(&self) -> bool {
        self.filled_quantity >= self.quantity
    }

    /// Apply an execution of `quantity` against this order.
    ///
    /// The matching loop computes fill sizes as min(remaining, remaining), so
    /// overfills are a programming error, not a user error.
    pub fn fill(&mut self, quantity: Decimal) {
        debug_assert!(quantity > Decimal::ZERO, "fill quantity must be positive");
        debug_assert!(
            quantity <= self.remaining_quantity(),
            "fill exceeds remaining quantity"
        );
        self.filled_quantity += quantity;
        self.updated_at = Utc::now();
        self.status = if self.is_filled() {
            OrderStatus::Filled
        } else {
            OrderStatus::PartiallyFilled
        };
    }

    /// Cancel, preserving any fills that already happened.
    pub fn cancel(&mut self) {
        debug_assert!(!self.status.is_terminal(), "cancel on terminal order");
        self.status = OrderStatus::Cancelled;
        self.updated_at = Utc::now();
    }

    pub fn reject(&mut self) {
        self.status = OrderStatus::Rejected;
        self.updated_at = Utc::now();
    }
}

/// One side of an execution. Two fills are emitted per match so each owner
/// account observes its own side.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fill {
    pub fill_id: String,
    pub order_id: String,
    pub session_id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub price: Decimal,
    pub quantity: Decimal,
    pub timestamp: DateTime<Utc>,
    pub is_maker: bool,
}

/// Signed exposure per (session, symbol). Positive is long.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub quantity: Decimal,
    pub average_price: Decimal,
    pub realized_pnl: Decimal,
    pub unrealized_pnl: Decimal,
}

impl Position {
    pub fn new(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            quantity: Decimal::ZERO,
            average_price: Decimal::ZERO,
            realized_pnl: Decimal::ZERO,
            unrealized_pnl: Decimal::ZERO,
        }
    }

    /// Fold a fill into the position.
    ///
    /// Closing quantity realizes P&L at (fill price − average price) against
    /// the direction of the existing position. A flip or fresh open resets
    /// the average price; growth on the same side blends it by absolute size.
    pub fn update_on_fill(&mut self, fill: &Fill) {
        let fill_qty = match fill.side {
            OrderSide::Buy => fill.quantity,
            OrderSide::Sell => -fill.quantity,
        };

        let old_qty = self.quantity;
        let opposing = (old_qty > Decimal::ZERO && fill_qty < Decimal::ZERO)
            || (old_qty < Decimal::ZERO && fill_qty > Decimal::ZERO);
        if opposing {
            let closing = fill_qty.abs().min(old_qty.abs());
            let direction = if old_qty > Decimal::ZERO {
                Decimal::ONE
            } else {
                -Decimal::ONE
            };
            self.realized_pnl += closing * (fill.price - self.average_price) * direction;
        }

        let new_qty = old_qty + fill_qty;
        if new_qty.is_zero() {
            self.average_price = Decimal::ZERO;
        } else if old_qty * new_qty < Decimal::ZERO || old_qty.is_zero() {
            // Flip or fresh open: the fill price is the new basis.
            self.average_price = fill.price;
        } else if new_qty.abs() > old_qty.abs() {
            // Same-side growth: blend by absolute quantities.
            let total = old_qty.abs() * self.average_price + fill_qty.abs() * fill.price;
            self.average_price = total / new_qty.abs();
        }
        self.quantity = new_qty;
    }

    pub fn unrealized_at(&mut self, mark_price: Decimal) -> Decimal {
        self.unrealized_pnl = if self.quantity.is_zero() {
            Decimal::ZERO
        } else {
            self.quantity * (mark_price - self.average_price)
        };
        self.unrealized_pnl
    }
}
