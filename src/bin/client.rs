//! Demo trading client.
//!
//! `client --base-url <url> [--scenarios] [--symbol S]` — streams tickers
//! through the full network manager (heartbeat, gap detection, reconnect) and
//! optionally drives demo request-API flows.

use clap::Parser;
use serde_json::json;
use tokio::time::{sleep, Duration};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use faultline::client::{NetEvent, NetworkConfig, NetworkManager};
use faultline::server::messages::Channel;

#[derive(Debug, Parser)]
#[command(name = "client", about = "Crypto-exchange simulator demo client")]
struct Args {
    /// Server base URL, e.g. http://127.0.0.1:8765
    #[arg(long, default_value = "http://127.0.0.1:8765")]
    base_url: String,

    /// Also run the request-API demo flows.
    #[arg(long)]
    scenarios: bool,

    /// Symbol to stream.
    #[arg(long, default_value = "BTC/USD")]
    symbol: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let session_id = format!("client-{}", Uuid::new_v4());
    info!(base_url = %args.base_url, session_id = %session_id, "starting client");

    let (manager, handle, mut events) =
        NetworkManager::new(&args.base_url, session_id.clone(), NetworkConfig::default());
    let manager_task = tokio::spawn(manager.run());

    handle.subscribe(Channel::Ticker, &args.symbol).await?;
    handle.subscribe(Channel::Trades, &args.symbol).await?;

    let event_task = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                NetEvent::Frame(frame) => {
                    let kind = frame.get("type").and_then(|t| t.as_str()).unwrap_or("?");
                    match kind {
                        "MARKET_DATA" => info!(
                            "ticker {} last={} seq={}",
                            frame["symbol"].as_str().unwrap_or("?"),
                            frame["last_price"].as_str().unwrap_or("?"),
                            frame["sequence_id"]
                        ),
                        "TRADE" => info!(
                            "trade {} {}@{}",
                            frame["side"].as_str().unwrap_or("?"),
                            frame["quantity"].as_str().unwrap_or("?"),
                            frame["price"].as_str().unwrap_or("?")
                        ),
                        other => info!("frame {other}: {frame}"),
                    }
                }
                NetEvent::GapDetected(gap) => warn!("sequence gap: {gap}"),
                NetEvent::Reconciled(event) => info!("reconciled: {event:?}"),
                NetEvent::Connected => info!("stream connected"),
                NetEvent::Disconnected => warn!("stream lost, recovering"),
                NetEvent::HealthChanged(healthy) => info!(healthy, "heartbeat health changed"),
                NetEvent::ReconnectFailed => {
                    warn!("reconnect failed permanently");
                    break;
                }
            }
        }
    });

    if args.scenarios {
        if let Err(e) = run_scenarios(&args.base_url, &session_id, &args.symbol).await {
            warn!(error = %e, "scenario run failed");
        }
    }

    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("interrupt received"),
        _ = event_task => {}
    }
    handle.shutdown().await;
    let _ = manager_task.await;
    Ok(())
}

/// Request-API walkthrough: balance, place, query, cancel, history.
async fn run_scenarios(base_url: &str, session_id: &str, symbol: &str) -> anyhow::Result<()> {
    let client = reqwest::Client::new();
    let get = |endpoint: &str| {
        client
            .get(format!("{base_url}{endpoint}"))
            .header("X-Session-ID", session_id)
    };

    info!("— scenario: account snapshot —");
    let balance: serde_json::Value = get("/api/v1/balance").send().await?.json().await?;
    info!("balances: {}", balance["balances"]);

    info!("— scenario: place and cancel a resting limit order —");
    let ticker: serde_json::Value = get(&format!("/api/v1/ticker?symbol={symbol}"))
        .send()
        .await?
        .json()
        .await?;
    let last: f64 = ticker["last_price"]
        .as_str()
        .unwrap_or("0")
        .parse()
        .unwrap_or(0.0);
    let bid_price = format!("{:.2}", last * 0.95);

    let order: serde_json::Value = client
        .post(format!("{base_url}/api/v1/orders"))
        .header("X-Session-ID", session_id)
        .json(&json!({
            "symbol": symbol,
            "side": "BUY",
            "type": "LIMIT",
            "price": bid_price,
            "quantity": "0.1",
        }))
        .send()
        .await?
        .json()
        .await?;
    let order_id = order["order_id"].as_str().unwrap_or_default().to_string();
    info!("placed {} @ {} → {}", order_id, bid_price, order["status"]);

    sleep(Duration::from_millis(500)).await;
    let cancelled: serde_json::Value = client
        .delete(format!("{base_url}/api/v1/orders/{order_id}"))
        .header("X-Session-ID", session_id)
        .send()
        .await?
        .json()
        .await?;
    info!("cancelled: {}", cancelled["status"]);

    info!("— scenario: bounded price history —");
    let prices: serde_json::Value = get(&format!("/api/v1/prices?symbol={symbol}&limit=5"))
        .send()
        .await?
        .json()
        .await?;
    let count = prices["prices"].as_array().map(Vec::len).unwrap_or(0);
    info!("fetched {count} history points");

    Ok(())
}
