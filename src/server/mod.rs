//! Server assembly: configuration → engine, market data, fault pipelines,
//! router, transports — and the start/stop lifecycle.

pub mod messages;
pub mod rest;
pub mod router;
pub mod sessions;
pub mod ws;

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use anyhow::Context;
use axum::routing::{get, post};
use axum::Router;
use tokio::task::JoinHandle;
use tracing::info;

use crate::config::{Config, FailureMode, FailuresConfig};
use crate::engine::{AccountManager, ExchangeEngine};
use crate::faults::strategies::{
    CorruptStrategy, DelayStrategy, DropStrategy, DuplicateStrategy, LatencyStrategy,
    ReorderStrategy, SilentStrategy, ThrottleStrategy,
};
use crate::faults::{FaultInjector, FaultStrategy, RateLimitStrategy, VolumeDetector};
use crate::market::{MarketDataGenerator, MarketDataPublisher, PriceModel};
use crate::rng::SharedRng;
use router::{
    HeartbeatHandler, MessageRouter, OrderHandler, RouteHandler, SharedEngine, SubscriptionHandler,
};
use sessions::ConnectionManager;

use messages::MessageKind;

pub struct AppState {
    pub config: Config,
    pub engine: SharedEngine,
    pub sessions: Arc<ConnectionManager>,
    pub faults: Arc<FaultInjector>,
    pub rate_limiter: Option<Arc<RateLimitStrategy>>,
    pub rest_latency: Option<FaultStrategy>,
    pub market: Arc<MarketDataPublisher>,
    pub router: MessageRouter,
}

pub struct ExchangeServer {
    state: Arc<AppState>,
    listener_task: Mutex<Option<JoinHandle<()>>>,
    local_addr: Mutex<Option<SocketAddr>>,
}

impl ExchangeServer {
    pub fn new(config: Config) -> anyhow::Result<Self> {
        let rng = SharedRng::from_seed_opt(config.failures.seed);
        let sessions = Arc::new(ConnectionManager::new());

        let default_balance = config.default_balance().context("default_balance")?;
        let initial_prices = config.initial_prices().context("initial_prices")?;

        let mut engine = ExchangeEngine::new(
            config.exchange.symbols.clone(),
            AccountManager::new(default_balance),
        );
        for (symbol, price) in &initial_prices {
            engine.set_last_price(symbol, *price);
        }
        let engine: SharedEngine = Arc::new(Mutex::new(engine));

        let model_cfg = &config.exchange.pricing_model;
        let mut market = MarketDataPublisher::new(
            sessions.clone(),
            config.exchange.tick_interval,
            rng.clone(),
        );
        for symbol in &config.exchange.symbols {
            let Some(initial_price) = initial_prices.get(symbol) else {
                continue;
            };
            let model = PriceModel::from_config(
                &model_cfg.model_type,
                model_cfg.drift,
                model_cfg.volatility,
                config.exchange.tick_interval,
            );
            market.add_generator(MarketDataGenerator::new(symbol, *initial_price, model));
        }
        let market = Arc::new(market);

        let (faults, rate_limiter, rest_latency) = if config.failures.enabled {
            configure_failures(&config.failures, &rng)
        } else {
            (FaultInjector::disabled(), None, None)
        };

        let mut router = MessageRouter::new();
        for kind in [
            MessageKind::PlaceOrder,
            MessageKind::CancelOrder,
            MessageKind::GetOrder,
            MessageKind::GetOrders,
            MessageKind::GetBalance,
            MessageKind::GetPosition,
        ] {
            router.register(
                kind,
                RouteHandler::Order(OrderHandler::new(engine.clone(), sessions.clone())),
            );
        }
        router.register(
            MessageKind::Subscribe,
            RouteHandler::Subscription(SubscriptionHandler::new(sessions.clone())),
        );
        router.register(
            MessageKind::Unsubscribe,
            RouteHandler::Subscription(SubscriptionHandler::new(sessions.clone())),
        );
        router.register(
            MessageKind::Ping,
            RouteHandler::Heartbeat(HeartbeatHandler::new()),
        );

        let state = Arc::new(AppState {
            config,
            engine,
            sessions,
            faults: Arc::new(faults),
            rate_limiter,
            rest_latency,
            market,
            router,
        });

        Ok(Self {
            state,
            listener_task: Mutex::new(None),
            local_addr: Mutex::new(None),
        })
    }

    pub fn state(&self) -> Arc<AppState> {
        self.state.clone()
    }

    /// Bind and serve; returns the bound address (useful with port 0).
    pub async fn start(&self) -> anyhow::Result<SocketAddr> {
        if let Some(addr) = *self.local_addr.lock().unwrap() {
            return Ok(addr);
        }

        let bind_addr = format!(
            "{}:{}",
            self.state.config.server.host, self.state.config.server.port
        );
        let listener = tokio::net::TcpListener::bind(&bind_addr)
            .await
            .with_context(|| format!("failed to bind {bind_addr}"))?;
        let addr = listener.local_addr()?;

        self.state.market.start_all();

        let app = build_routes(self.state.clone());
        let task = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                tracing::error!(error = %e, "server terminated");
            }
        });

        *self.listener_task.lock().unwrap() = Some(task);
        *self.local_addr.lock().unwrap() = Some(addr);
        info!(%addr, "server started");
        Ok(addr)
    }

    /// Ordered shutdown: producers, then sessions (close 1001), then the
    /// listener. Reorder buffers are drained and discarded.
    pub async fn stop(&self) {
        info!("stopping server");
        self.state.market.stop_all();
        self.state.faults.flush_reorder_buffers();
        self.state.sessions.close_all(1001, "Server shutdown");
        if let Some(task) = self.listener_task.lock().unwrap().take() {
            task.abort();
        }
        *self.local_addr.lock().unwrap() = None;
        info!("server stopped");
    }
}

fn build_routes(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(rest::health))
        .route("/api/v1/symbols", get(rest::get_symbols))
        .route("/api/v1/ticker", get(rest::get_ticker))
        .route("/api/v1/orders", post(rest::place_order).get(rest::get_orders))
        .route(
            "/api/v1/orders/:order_id",
            get(rest::get_order).delete(rest::cancel_order),
        )
        .route("/api/v1/balance", get(rest::get_balance))
        .route("/api/v1/position", get(rest::get_position))
        .route("/api/v1/prices", get(rest::get_prices))
        .route("/ws", get(ws::ws_handler))
        .with_state(state)
}

/// Build the fault pipelines from config.
///
/// `failures.modes` is an unordered JSON object, so strategies are wired in a
/// fixed canonical order — inbound: Reorder → Throttle → RateLimit → Latency
/// → Drop; outbound: Duplicate → Corrupt → Latency → Delay → Drop → Silent.
/// The drop strategy is one instance in both directions (shared counters),
/// and the rate limiter instance is shared with the request API. Unknown
/// mode names are ignored.
fn configure_failures(
    failures: &FailuresConfig,
    rng: &SharedRng,
) -> (
    FaultInjector,
    Option<Arc<RateLimitStrategy>>,
    Option<FaultStrategy>,
) {
    let mut injector = FaultInjector::new();
    let enabled = |name: &str| failures.modes.get(name).filter(|mode| mode.enabled);

    let latency = failures.latency.enabled.then(|| {
        let (mu, sigma) = failures.latency.mu_sigma();
        FaultStrategy::Latency(LatencyStrategy::new(mu, sigma, rng.clone()))
    });

    let rate_limiter = enabled("rate_limit").map(|mode: &FailureMode| {
        Arc::new(RateLimitStrategy::new(
            mode.baseline_rps.unwrap_or(10),
            mode.wait_period_seconds.unwrap_or(10),
            mode.second_violation_ban_seconds.unwrap_or(60),
            mode.violation_window_seconds.unwrap_or(60),
            VolumeDetector::default(),
        ))
    });

    let drop = enabled("drop_messages")
        .and_then(|mode| mode.probability)
        .map(|p| DropStrategy::new(p, rng.clone()));

    // Inbound: Reorder → Throttle → RateLimit → Latency → Drop
    if let Some(mode) = enabled("reorder_messages") {
        if let Some(window) = mode.window_size {
            injector.add_inbound(FaultStrategy::Reorder(ReorderStrategy::new(
                window,
                rng.clone(),
            )));
        }
    }
    if let Some(mode) = enabled("throttle_messages") {
        if let Some(max_rps) = mode.max_messages_per_second {
            injector.add_inbound(FaultStrategy::Throttle(ThrottleStrategy::new(max_rps)));
        }
    }
    if let Some(limiter) = &rate_limiter {
        injector.add_inbound(FaultStrategy::RateLimit(limiter.clone()));
    }
    if let Some(latency) = &latency {
        injector.add_inbound(latency.clone());
    }
    if let Some(drop) = &drop {
        injector.add_inbound(FaultStrategy::Drop(drop.clone()));
    }

    // Outbound: Duplicate → Corrupt → Latency → Delay → Drop → Silent
    if let Some(mode) = enabled("duplicate_messages") {
        if let Some(p) = mode.probability {
            injector.add_outbound(FaultStrategy::Duplicate(DuplicateStrategy::new(
                p,
                mode.max_duplicates.unwrap_or(2),
                rng.clone(),
            )));
        }
    }
    if let Some(mode) = enabled("corrupt_messages") {
        if let Some(p) = mode.probability {
            injector.add_outbound(FaultStrategy::Corrupt(CorruptStrategy::new(
                p,
                mode.corruption_level.unwrap_or(0.1),
                rng.clone(),
            )));
        }
    }
    if let Some(latency) = &latency {
        injector.add_outbound(latency.clone());
    }
    if let Some(mode) = enabled("delay_messages") {
        if let (Some(min_ms), Some(max_ms)) = (mode.min_ms, mode.max_ms) {
            injector.add_outbound(FaultStrategy::Delay(DelayStrategy::new(
                min_ms,
                max_ms,
                rng.clone(),
            )));
        }
    }
    if let Some(drop) = &drop {
        injector.add_outbound(FaultStrategy::Drop(drop.clone()));
    }
    if let Some(mode) = enabled("silent_connection") {
        injector.add_outbound(FaultStrategy::Silent(SilentStrategy::new(
            true,
            mode.after_messages.unwrap_or(0),
        )));
    }

    (injector, rate_limiter, latency)
}
