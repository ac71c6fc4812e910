//! Market data: stochastic price models, per-symbol generators, and the
//! broadcast publisher.

pub mod generator;
pub mod model;
pub mod publisher;

pub use generator::{MarketDataGenerator, PricePoint};
pub use model::PriceModel;
pub use publisher::MarketDataPublisher;
