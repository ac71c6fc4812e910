//! Client network manager.
//!
//! One actor owns the streaming connection and its defenses:
//!
//! * heartbeat PINGs with per-ping timeout checks,
//! * an idle watchdog that declares the stream silent faster than the
//!   heartbeat can (half-open connections deliver no frames at all),
//! * per-(channel, symbol) sequence tracking with gap-triggered
//!   reconciliation over the request API,
//! * teardown → backfill → exponential-backoff reconnect → resubscribe.
//!
//! The application talks to it through a command channel and listens on an
//! event channel.

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Result;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::{interval, sleep, timeout, Duration, Instant};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use super::heartbeat::HeartbeatMonitor;
use super::rate_limit::{RestRateLimiter, RestRateLimiterConfig};
use super::reconciler::{ReconcileEvent, Reconciler};
use super::sequence::{Gap, SequenceTracker};
use crate::server::messages::{Channel, ClientMessage};

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type WsSource = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct NetworkConfig {
    pub heartbeat_interval: Duration,
    pub heartbeat_timeout: Duration,
    /// Seconds without any frame before the stream is declared silent;
    /// typically shorter than the heartbeat interval.
    pub idle_timeout: Duration,
    pub reconnect_initial_backoff: Duration,
    pub reconnect_max_backoff: Duration,
    pub reconnect_max_attempts: u32,
    pub price_history_limit: usize,
    pub reconciliation_enabled: bool,
    pub rate_limiter: RestRateLimiterConfig,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(60),
            heartbeat_timeout: Duration::from_secs(10),
            idle_timeout: Duration::from_secs(10),
            reconnect_initial_backoff: Duration::from_secs(1),
            reconnect_max_backoff: Duration::from_secs(10),
            reconnect_max_attempts: 5,
            price_history_limit: 500,
            reconciliation_enabled: true,
            rate_limiter: RestRateLimiterConfig::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub enum NetEvent {
    Connected,
    Disconnected,
    HealthChanged(bool),
    /// Every decoded frame, after sequence bookkeeping.
    Frame(Value),
    GapDetected(Gap),
    Reconciled(ReconcileEvent),
    /// Reconnect gave up after `reconnect_max_attempts`.
    ReconnectFailed,
}

#[derive(Debug)]
pub enum NetCommand {
    Send(ClientMessage),
    Shutdown,
}

/// Cloneable application-side handle.
#[derive(Debug, Clone)]
pub struct NetworkHandle {
    cmd_tx: mpsc::Sender<NetCommand>,
}

impl NetworkHandle {
    pub async fn send(&self, message: ClientMessage) -> Result<()> {
        self.cmd_tx
            .send(NetCommand::Send(message))
            .await
            .map_err(|_| anyhow::anyhow!("network manager is gone"))
    }

    pub async fn subscribe(&self, channel: Channel, symbol: &str) -> Result<()> {
        self.send(ClientMessage::Subscribe {
            request_id: Some(format!("sub_{}", uuid::Uuid::new_v4())),
            channel,
            symbol: symbol.to_string(),
        })
        .await
    }

    pub async fn shutdown(&self) {
        let _ = self.cmd_tx.send(NetCommand::Shutdown).await;
    }
}

enum ConnectionEnd {
    Shutdown,
    Silent,
    Closed,
}

pub struct NetworkManager {
    config: NetworkConfig,
    ws_url: String,
    session_id: String,
    subscriptions: HashSet<(Channel, String)>,
    tracker: SequenceTracker,
    heartbeat: HeartbeatMonitor,
    reconciler: Reconciler,
    cmd_rx: mpsc::Receiver<NetCommand>,
    event_tx: mpsc::Sender<NetEvent>,
    deadline_tx: mpsc::Sender<String>,
    deadline_rx: mpsc::Receiver<String>,
}

impl NetworkManager {
    /// Returns the manager (drive it with [`NetworkManager::run`]), the
    /// command handle, and the event stream.
    pub fn new(
        base_url: &str,
        session_id: impl Into<String>,
        config: NetworkConfig,
    ) -> (Self, NetworkHandle, mpsc::Receiver<NetEvent>) {
        let session_id = session_id.into();
        let limiter = Arc::new(RestRateLimiter::new(config.rate_limiter.clone()));
        let reconciler = Reconciler::new(base_url, session_id.clone(), limiter);
        let (cmd_tx, cmd_rx) = mpsc::channel(64);
        let (event_tx, event_rx) = mpsc::channel(1024);
        let (deadline_tx, deadline_rx) = mpsc::channel(64);

        let manager = Self {
            heartbeat: HeartbeatMonitor::new(config.heartbeat_timeout),
            config,
            ws_url: ws_url(base_url),
            session_id,
            subscriptions: HashSet::new(),
            tracker: SequenceTracker::new(),
            reconciler,
            cmd_rx,
            event_tx,
            deadline_tx,
            deadline_rx,
        };
        (manager, NetworkHandle { cmd_tx }, event_rx)
    }

    /// Actor main loop: connect, serve the connection, recover from silence,
    /// until shutdown or the reconnect budget is spent.
    pub async fn run(mut self) {
        info!(session_id = %self.session_id, url = %self.ws_url, "network manager started");

        let (mut sink, mut source) = match self.connect_with_backoff().await {
            Some(halves) => halves,
            None => {
                let _ = self.event_tx.send(NetEvent::ReconnectFailed).await;
                return;
            }
        };

        loop {
            match self.run_connection(&mut sink, &mut source).await {
                ConnectionEnd::Shutdown => {
                    let _ = sink.send(Message::Close(None)).await;
                    info!("network manager shut down");
                    return;
                }
                ConnectionEnd::Silent | ConnectionEnd::Closed => {
                    let _ = self.event_tx.send(NetEvent::Disconnected).await;
                    drop(sink);
                    drop(source);
                    self.heartbeat.reset();
                    self.backfill_price_history().await;
                    match self.connect_with_backoff().await {
                        Some(halves) => (sink, source) = halves,
                        None => {
                            warn!("reconnect attempts exhausted");
                            let _ = self.event_tx.send(NetEvent::ReconnectFailed).await;
                            return;
                        }
                    }
                }
            }
        }
    }

    async fn run_connection(&mut self, sink: &mut WsSink, source: &mut WsSource) -> ConnectionEnd {
        let mut ping_timer = interval(self.config.heartbeat_interval);
        // interval fires immediately; the first tick is the "start" tick.
        ping_timer.tick().await;
        let mut last_frame = Instant::now();

        loop {
            let idle_deadline = last_frame + self.config.idle_timeout;
            tokio::select! {
                command = self.cmd_rx.recv() => {
                    match command {
                        Some(NetCommand::Send(message)) => {
                            self.note_subscription(&message);
                            if let Err(e) = send_message(sink, &message).await {
                                warn!(error = %e, "send failed");
                                return ConnectionEnd::Closed;
                            }
                        }
                        Some(NetCommand::Shutdown) | None => return ConnectionEnd::Shutdown,
                    }
                }
                _ = ping_timer.tick() => {
                    let request_id = self.heartbeat.ping_sent();
                    let ping = ClientMessage::Ping { request_id: Some(request_id.clone()) };
                    if let Err(e) = send_message(sink, &ping).await {
                        warn!(error = %e, "ping send failed");
                        return ConnectionEnd::Closed;
                    }
                    // Arm the timeout check for this ping.
                    let deadline_tx = self.deadline_tx.clone();
                    let timeout = self.heartbeat.timeout();
                    tokio::spawn(async move {
                        sleep(timeout).await;
                        let _ = deadline_tx.send(request_id).await;
                    });
                }
                expired = self.deadline_rx.recv() => {
                    if let Some(request_id) = expired {
                        if self.heartbeat.expire(&request_id) {
                            warn!("heartbeat timed out, connection unhealthy");
                            let _ = self.event_tx.send(NetEvent::HealthChanged(false)).await;
                            return ConnectionEnd::Silent;
                        }
                    }
                }
                _ = tokio::time::sleep_until(idle_deadline) => {
                    warn!(
                        idle = ?self.config.idle_timeout,
                        "no frames within idle window, treating stream as silent"
                    );
                    return ConnectionEnd::Silent;
                }
                frame = source.next() => {
                    match frame {
                        Some(Ok(Message::Text(text))) => {
                            last_frame = Instant::now();
                            self.handle_frame(&text).await;
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            warn!("stream closed by server");
                            return ConnectionEnd::Closed;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            warn!(error = %e, "stream receive error");
                            return ConnectionEnd::Closed;
                        }
                    }
                }
            }
        }
    }

    async fn handle_frame(&mut self, raw: &str) {
        let value: Value = match serde_json::from_str(raw) {
            Ok(value) => value,
            Err(e) => {
                // Corruption strategies produce exactly this.
                debug!(error = %e, "unparseable frame dropped");
                return;
            }
        };

        match value.get("type").and_then(Value::as_str) {
            Some("PONG") => {
                if let Some(request_id) = value.get("request_id").and_then(Value::as_str) {
                    if self.heartbeat.pong_received(request_id) {
                        let _ = self.event_tx.send(NetEvent::HealthChanged(true)).await;
                    }
                }
            }
            Some("MARKET_DATA") if self.config.reconciliation_enabled => {
                let symbol = value.get("symbol").and_then(Value::as_str).unwrap_or("");
                if let Some(sequence_id) = value.get("sequence_id").and_then(Value::as_u64) {
                    if let Some(gap) = self.tracker.update("TICKER", symbol, sequence_id) {
                        let _ = self.event_tx.send(NetEvent::GapDetected(gap.clone())).await;
                        self.spawn_gap_reconciliation(gap);
                    }
                }
            }
            _ => {}
        }

        let _ = self.event_tx.send(NetEvent::Frame(value)).await;
    }

    /// Gap recovery runs off the read loop: ticker refetch plus orders and
    /// balance snapshots.
    fn spawn_gap_reconciliation(&self, gap: Gap) {
        let reconciler = self.reconciler.clone();
        let event_tx = self.event_tx.clone();
        tokio::spawn(async move {
            match reconciler.reconcile_market_data(&gap.symbol, &gap).await {
                Ok(event) => {
                    let _ = event_tx.send(NetEvent::Reconciled(event)).await;
                }
                Err(e) => warn!(error = %e, "market data reconciliation failed"),
            }
            for event in reconciler.reconcile_all().await {
                let _ = event_tx.send(NetEvent::Reconciled(event)).await;
            }
        });
    }

    /// After silence: fetch a bounded history window per remembered symbol.
    async fn backfill_price_history(&self) {
        if !self.config.reconciliation_enabled {
            return;
        }
        let symbols: HashSet<&String> = self.subscriptions.iter().map(|(_, s)| s).collect();
        for symbol in symbols {
            match self
                .reconciler
                .reconcile_price_history(symbol, None, None, self.config.price_history_limit)
                .await
            {
                Ok(event) => {
                    let _ = self.event_tx.send(NetEvent::Reconciled(event)).await;
                }
                Err(e) => warn!(symbol, error = %e, "price history backfill failed"),
            }
        }
    }

    /// Exponential backoff: initial → max, doubling, bounded attempts.
    /// Resubscribes every remembered `(channel, symbol)` pair on success.
    async fn connect_with_backoff(&mut self) -> Option<(WsSink, WsSource)> {
        let mut delay = self.config.reconnect_initial_backoff;
        for attempt in 1..=self.config.reconnect_max_attempts {
            info!(attempt, max = self.config.reconnect_max_attempts, "connecting stream");
            match timeout(CONNECT_TIMEOUT, connect_async(&self.ws_url)).await {
                Ok(Ok((stream, _response))) => {
                    info!("stream connected");
                    // Sequence expectations survive the reconnect: the first
                    // tickers on the new stream reveal what was missed.
                    let (mut sink, source) = stream.split();
                    if self.resubscribe(&mut sink).await.is_err() {
                        warn!("resubscribe failed, retrying connection");
                    } else {
                        let _ = self.event_tx.send(NetEvent::Connected).await;
                        return Some((sink, source));
                    }
                }
                Ok(Err(e)) => warn!(error = %e, "connect failed"),
                Err(_) => warn!("connect timed out"),
            }
            sleep(delay).await;
            delay = (delay * 2).min(self.config.reconnect_max_backoff);
        }
        None
    }

    async fn resubscribe(&self, sink: &mut WsSink) -> Result<()> {
        for (channel, symbol) in &self.subscriptions {
            let message = ClientMessage::Subscribe {
                request_id: Some(format!("resub_{}", uuid::Uuid::new_v4())),
                channel: *channel,
                symbol: symbol.clone(),
            };
            send_message(sink, &message).await?;
        }
        Ok(())
    }

    /// Remember (or forget) subscriptions as they pass through, so reconnects
    /// can replay them.
    fn note_subscription(&mut self, message: &ClientMessage) {
        match message {
            ClientMessage::Subscribe { channel, symbol, .. } => {
                self.subscriptions.insert((*channel, symbol.clone()));
            }
            ClientMessage::Unsubscribe { channel, symbol, .. } => {
                self.subscriptions.remove(&(*channel, symbol.clone()));
            }
            _ => {}
        }
    }
}

async fn send_message(sink: &mut WsSink, message: &ClientMessage) -> Result<()> {
    let payload = serde_json::to_string(message)?;
    sink.send(Message::Text(payload)).await?;
    Ok(())
}

/// `http(s)://host` → `ws(s)://host/ws`.
fn ws_url(base_url: &str) -> String {
    format!("{}/ws", base_url.trim_end_matches('/').replacen("http", "ws", 1))
}
