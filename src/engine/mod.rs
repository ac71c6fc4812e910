//! Exchange core: order/fill/position model, per-symbol books, accounts, and
//! the matching engine that ties them together.

pub mod accounts;
pub mod book;
pub mod exchange;
pub mod orders;

pub use accounts::{split_symbol, Account, AccountManager};
pub use book::OrderBook;
pub use exchange::{ExchangeEngine, ExchangeError};
pub use orders::{Fill, Order, OrderSide, OrderStatus, OrderType, Position, TimeInForce};
