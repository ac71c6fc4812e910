//! faultline — a crypto-exchange simulator with network fault injection.
//!
//! One process serves a request API and a streaming surface, matches orders
//! against in-memory books, synthesizes market data from a stochastic price
//! process, and can inject drops, delays, reorderings, duplications,
//! corruption, throttling, rate-limit bans and silent connections into both
//! directions, so client trading stacks can be exercised against adversarial
//! network conditions.
//!
//! Architecture:
//!   streaming frame → inbound fault pipeline → router → engine/queries
//!                   → reply → per-session outbound pipeline → socket
//!   one market-data producer task per symbol → sequenced tickers → fan-out
//!
//! The [`client`] module is the counterpart stack under test: sequence gap
//! detection, REST reconciliation, heartbeat liveness, and backoff reconnect.

pub mod client;
pub mod config;
pub mod engine;
pub mod faults;
pub mod market;
pub mod rng;
pub mod server;

pub use config::Config;
pub use server::ExchangeServer;
