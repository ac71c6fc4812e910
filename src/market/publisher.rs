//! Per-symbol market-data producer tasks.
//!
//! One tokio task per symbol, driven by `tokio::time::interval` so the tick
//! cadence does not drift under load (missed ticks are skipped, not bursted).
//! Each tick serializes the ticker once and enqueues it per subscribed
//! session; per-session outbound strategies run on each session's writer
//! task. A failing tick body is logged and the loop continues after a one
//! second pause.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, Duration, MissedTickBehavior};
use tracing::{error, info};

use super::generator::MarketDataGenerator;
use crate::rng::SharedRng;
use crate::server::messages::{Channel, MessageKind, ServerMessage};
use crate::server::sessions::ConnectionManager;

pub struct MarketDataPublisher {
    generators: HashMap<String, Arc<Mutex<MarketDataGenerator>>>,
    sessions: Arc<ConnectionManager>,
    tick_interval: Duration,
    rng: SharedRng,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl MarketDataPublisher {
    pub fn new(sessions: Arc<ConnectionManager>, tick_interval_seconds: f64, rng: SharedRng) -> Self {
        Self {
            generators: HashMap::new(),
            sessions,
            tick_interval: Duration::from_secs_f64(tick_interval_seconds.max(0.000_001)),
            rng,
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn add_generator(&mut self, generator: MarketDataGenerator) {
        self.generators.insert(
            generator.symbol().to_string(),
            Arc::new(Mutex::new(generator)),
        );
    }

    pub fn generator(&self, symbol: &str) -> Option<Arc<Mutex<MarketDataGenerator>>> {
        self.generators.get(symbol).cloned()
    }

    pub fn symbols(&self) -> Vec<String> {
        self.generators.keys().cloned().collect()
    }

    /// Spawn one producer task per symbol.
    pub fn start_all(&self) {
        let mut tasks = self.tasks.lock().unwrap();
        if !tasks.is_empty() {
            return;
        }
        for (symbol, generator) in &self.generators {
            info!(symbol, interval = ?self.tick_interval, "market data producer started");
            tasks.push(tokio::spawn(publish_loop(
                symbol.clone(),
                generator.clone(),
                self.sessions.clone(),
                self.tick_interval,
                self.rng.clone(),
            )));
        }
    }

    /// Abort producer tasks; pending sleeps are cancelled at their await
    /// points so shutdown is prompt.
    pub fn stop_all(&self) {
        let mut tasks = self.tasks.lock().unwrap();
        for task in tasks.drain(..) {
            task.abort();
        }
        info!("market data producers stopped");
    }
}

impl std::fmt::Debug for MarketDataPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MarketDataPublisher")
            .field("symbols", &self.generators.keys().collect::<Vec<_>>())
            .field("tick_interval", &self.tick_interval)
            .finish()
    }
}

async fn publish_loop(
    symbol: String,
    generator: Arc<Mutex<MarketDataGenerator>>,
    sessions: Arc<ConnectionManager>,
    tick_interval: Duration,
    rng: SharedRng,
) {
    let ticker_key = Channel::Ticker.key(&symbol);
    let trades_key = Channel::Trades.key(&symbol);
    let mut ticks = interval(tick_interval);
    ticks.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // The first interval tick completes immediately; skip it so the first
    // ticker lands one interval after start.
    ticks.tick().await;

    loop {
        ticks.tick().await;
        if let Err(e) = publish_once(&generator, &sessions, &ticker_key, &trades_key, &rng) {
            error!(symbol, error = %e, "market data tick failed");
            sleep(Duration::from_secs(1)).await;
        }
    }
}

fn publish_once(
    generator: &Arc<Mutex<MarketDataGenerator>>,
    sessions: &Arc<ConnectionManager>,
    ticker_key: &str,
    trades_key: &str,
    rng: &SharedRng,
) -> Result<(), serde_json::Error> {
    let (ticker, trade) = {
        let mut generator = generator.lock().unwrap_or_else(|e| e.into_inner());
        (generator.next_tick(rng), generator.maybe_trade(rng))
    };

    // Serialize once; every subscriber gets the same frame through its own
    // outbound pipeline.
    let payload: Arc<str> = Arc::from(serde_json::to_string(&ticker)?.as_str());
    sessions.broadcast_channel(ticker_key, payload, MessageKind::MarketData);

    if let Some(trade) = trade {
        let payload: Arc<str> = Arc::from(serde_json::to_string(&trade)?.as_str());
        sessions.broadcast_channel(trades_key, payload, MessageKind::Trade);
    }
    Ok(())
}

// Re-exported for the request API, which reads tickers without ticking.
pub fn ticker_snapshot(generator: &Arc<Mutex<MarketDataGenerator>>) -> ServerMessage {
    generator.lock().unwrap_or_else(|e| e.into_inner()).ticker()
}
