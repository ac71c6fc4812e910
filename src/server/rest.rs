//! Request API.
//!
//! JSON over HTTP; decimal fields travel as strings, timestamps as ISO-8601
//! UTC. The session is the `X-Session-ID` header, defaulting to a shared
//! session when absent. Every endpoint except `/health` passes the
//! server-side rate limiter (429 + `Retry-After` on rejection) and the
//! optional latency simulation on the way in and out.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::json;
use tracing::error;

use super::messages::{OrderInfo, ServerMessage};
use super::AppState;
use crate::engine::{split_symbol, ExchangeError, OrderSide, OrderStatus, OrderType, TimeInForce};
use crate::faults::FaultContext;

const DEFAULT_SESSION: &str = "rest-session";
const DEFAULT_PRICE_LIMIT: usize = 100;
const MAX_PRICE_LIMIT: usize = 1000;

fn session_id(headers: &HeaderMap) -> String {
    headers
        .get("X-Session-ID")
        .and_then(|v| v.to_str().ok())
        .unwrap_or(DEFAULT_SESSION)
        .to_string()
}

fn bad_request(message: impl Into<String>) -> Response {
    (StatusCode::BAD_REQUEST, Json(json!({ "error": message.into() }))).into_response()
}

fn not_found(message: impl Into<String>) -> Response {
    (StatusCode::NOT_FOUND, Json(json!({ "error": message.into() }))).into_response()
}

/// 429 with `Retry-After` (absent for permanent bans) and the structured
/// body clients key off.
fn check_rate_limit(state: &AppState, session: &str) -> Result<(), Response> {
    let Some(limiter) = &state.rate_limiter else {
        return Ok(());
    };
    match limiter.check(session) {
        Ok(()) => Ok(()),
        Err(rejection) => {
            let mut body = json!({
                "error": rejection.message,
                "violation_count": rejection.violation_count,
            });
            let mut response_headers = HeaderMap::new();
            if let Some(retry_after) = rejection.retry_after {
                body["retry_after"] = json!(retry_after);
                if let Ok(value) = retry_after.to_string().parse() {
                    response_headers.insert("Retry-After", value);
                }
            }
            Err((StatusCode::TOO_MANY_REQUESTS, response_headers, Json(body)).into_response())
        }
    }
}

async fn simulate_latency(state: &AppState, direction_inbound: bool) {
    if let Some(latency) = &state.rest_latency {
        let mut ctx = if direction_inbound {
            FaultContext::inbound(DEFAULT_SESSION, "REST_REQUEST")
        } else {
            FaultContext::outbound(DEFAULT_SESSION, "REST_RESPONSE")
        };
        let _ = latency.apply(String::new(), &mut ctx).await;
    }
}

fn ticker_body(ticker: &ServerMessage) -> serde_json::Value {
    match ticker {
        ServerMessage::MarketData {
            timestamp,
            symbol,
            last_price,
            bid,
            ask,
            volume_24h,
            high_24h,
            low_24h,
            sequence_id,
        } => json!({
            "symbol": symbol,
            "last_price": last_price.to_string(),
            "bid": bid.to_string(),
            "ask": ask.to_string(),
            "high_24h": high_24h.to_string(),
            "low_24h": low_24h.to_string(),
            "volume_24h": volume_24h.to_string(),
            "sequence_id": sequence_id,
            "timestamp": timestamp.to_rfc3339(),
        }),
        _ => json!({}),
    }
}

// ─────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────

pub async fn health() -> Response {
    Json(json!({ "status": "ok", "service": "faultline" })).into_response()
}

pub async fn get_symbols(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    let session = session_id(&headers);
    if let Err(rejection) = check_rate_limit(&state, &session) {
        return rejection;
    }
    simulate_latency(&state, true).await;
    let mut symbols: Vec<String> = state
        .engine
        .lock()
        .unwrap()
        .symbols()
        .iter()
        .cloned()
        .collect();
    symbols.sort();
    simulate_latency(&state, false).await;
    Json(json!({ "symbols": symbols })).into_response()
}

#[derive(Debug, Deserialize)]
pub struct SymbolQuery {
    symbol: Option<String>,
}

pub async fn get_ticker(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<SymbolQuery>,
) -> Response {
    let session = session_id(&headers);
    if let Err(rejection) = check_rate_limit(&state, &session) {
        return rejection;
    }
    simulate_latency(&state, true).await;

    let Some(symbol) = query.symbol else {
        simulate_latency(&state, false).await;
        return bad_request("symbol parameter required");
    };
    let Some(generator) = state.market.generator(&symbol) else {
        simulate_latency(&state, false).await;
        return not_found(format!("Symbol {symbol} not found"));
    };

    let ticker = crate::market::publisher::ticker_snapshot(&generator);
    simulate_latency(&state, false).await;
    Json(ticker_body(&ticker)).into_response()
}

pub async fn place_order(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: String,
) -> Response {
    let session = session_id(&headers);
    if let Err(rejection) = check_rate_limit(&state, &session) {
        return rejection;
    }
    simulate_latency(&state, true).await;

    let Ok(data) = serde_json::from_str::<serde_json::Value>(&body) else {
        simulate_latency(&state, false).await;
        return bad_request("Invalid JSON");
    };

    let missing: Vec<&str> = ["symbol", "side", "type", "quantity"]
        .into_iter()
        .filter(|field| data.get(field).is_none())
        .collect();
    if !missing.is_empty() {
        simulate_latency(&state, false).await;
        return bad_request(format!("Missing required fields: {}", missing.join(", ")));
    }

    let parsed = parse_order_request(&data);
    let (symbol, side, order_type, quantity, price, time_in_force) = match parsed {
        Ok(fields) => fields,
        Err(message) => {
            simulate_latency(&state, false).await;
            return bad_request(message);
        }
    };

    let result = state.engine.lock().unwrap().place_order(
        &session,
        &symbol,
        side,
        order_type,
        quantity,
        price,
        time_in_force,
    );
    simulate_latency(&state, false).await;

    match result {
        Ok((order, _fills)) => (
            StatusCode::CREATED,
            Json(serde_json::to_value(OrderInfo::from(&order)).unwrap_or_default()),
        )
            .into_response(),
        Err(e) => {
            let mut body = json!({ "error": e.to_string(), "code": e.code() });
            if let Some(order_id) = e.order_id() {
                body["order_id"] = json!(order_id);
            }
            (StatusCode::BAD_REQUEST, Json(body)).into_response()
        }
    }
}

type OrderFields = (
    String,
    OrderSide,
    OrderType,
    Decimal,
    Option<Decimal>,
    TimeInForce,
);

fn parse_order_request(data: &serde_json::Value) -> Result<OrderFields, String> {
    let symbol = data["symbol"]
        .as_str()
        .ok_or("symbol must be a string")?
        .to_string();
    let side: OrderSide = serde_json::from_value(data["side"].clone())
        .map_err(|_| "side must be BUY or SELL".to_string())?;
    let order_type: OrderType = serde_json::from_value(data["type"].clone())
        .map_err(|_| "type must be LIMIT or MARKET".to_string())?;
    let quantity = decimal_field(data, "quantity")?.ok_or("quantity must be a decimal string")?;
    let price = decimal_field(data, "price")?;
    let time_in_force = match data.get("time_in_force") {
        None => TimeInForce::Gtc,
        Some(raw) => serde_json::from_value(raw.clone())
            .map_err(|_| "time_in_force must be GTC, IOC or FOK".to_string())?,
    };
    if order_type == OrderType::Limit && price.is_none() {
        return Err("price required for LIMIT orders".to_string());
    }
    Ok((symbol, side, order_type, quantity, price, time_in_force))
}

fn decimal_field(data: &serde_json::Value, field: &str) -> Result<Option<Decimal>, String> {
    match data.get(field) {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(value) => serde_json::from_value::<Decimal>(value.clone())
            .map(Some)
            .map_err(|_| format!("{field} must be a decimal string")),
    }
}

pub async fn cancel_order(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(order_id): Path<String>,
) -> Response {
    let session = session_id(&headers);
    if let Err(rejection) = check_rate_limit(&state, &session) {
        return rejection;
    }
    simulate_latency(&state, true).await;

    let result = state.engine.lock().unwrap().cancel_order(&session, &order_id);
    simulate_latency(&state, false).await;

    match result {
        Ok(order) => Json(json!({ "order_id": order.order_id, "status": "cancelled" })).into_response(),
        Err(e @ ExchangeError::NotCancellable(_))
        | Err(e @ ExchangeError::OrderNotFound)
        | Err(e @ ExchangeError::NotOrderOwner) => not_found(e.to_string()),
        Err(e) => {
            error!(error = %e, "cancel failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "Internal server error" })),
            )
                .into_response()
        }
    }
}

pub async fn get_order(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(order_id): Path<String>,
) -> Response {
    let session = session_id(&headers);
    if let Err(rejection) = check_rate_limit(&state, &session) {
        return rejection;
    }
    simulate_latency(&state, true).await;

    let body = state
        .engine
        .lock()
        .unwrap()
        .get_order(&session, &order_id)
        .map(OrderInfo::from)
        .map(|info| serde_json::to_value(info).unwrap_or_default());
    simulate_latency(&state, false).await;

    match body {
        Some(order) => Json(order).into_response(),
        None => not_found("Order not found"),
    }
}

#[derive(Debug, Deserialize)]
pub struct OrdersQuery {
    symbol: Option<String>,
    status: Option<String>,
}

pub async fn get_orders(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<OrdersQuery>,
) -> Response {
    let session = session_id(&headers);
    if let Err(rejection) = check_rate_limit(&state, &session) {
        return rejection;
    }
    simulate_latency(&state, true).await;

    let status = match query.status.as_deref() {
        None => None,
        Some(raw) => {
            match serde_json::from_value::<OrderStatus>(serde_json::Value::String(raw.to_string()))
            {
                Ok(status) => Some(status),
                Err(_) => {
                    simulate_latency(&state, false).await;
                    return bad_request(format!("Unknown status: {raw}"));
                }
            }
        }
    };

    let orders: Vec<OrderInfo> = state
        .engine
        .lock()
        .unwrap()
        .get_orders(&session, query.symbol.as_deref(), status)
        .into_iter()
        .map(OrderInfo::from)
        .collect();
    simulate_latency(&state, false).await;
    Json(json!({ "orders": orders })).into_response()
}

pub async fn get_balance(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    let session = session_id(&headers);
    if let Err(rejection) = check_rate_limit(&state, &session) {
        return rejection;
    }
    simulate_latency(&state, true).await;

    let balances: std::collections::HashMap<String, String> = state
        .engine
        .lock()
        .unwrap()
        .accounts_mut()
        .get_or_create(&session)
        .balances()
        .iter()
        .map(|(asset, amount)| (asset.clone(), amount.to_string()))
        .collect();
    simulate_latency(&state, false).await;
    Json(json!({ "balances": balances })).into_response()
}

pub async fn get_position(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<SymbolQuery>,
) -> Response {
    let session = session_id(&headers);
    if let Err(rejection) = check_rate_limit(&state, &session) {
        return rejection;
    }
    simulate_latency(&state, true).await;

    let Some(symbol) = query.symbol else {
        simulate_latency(&state, false).await;
        return bad_request("symbol parameter required");
    };

    let (base, _) = split_symbol(&symbol);
    let quantity = state
        .engine
        .lock()
        .unwrap()
        .accounts_mut()
        .get_or_create(&session)
        .balance(&base);
    simulate_latency(&state, false).await;
    Json(json!({ "symbol": symbol, "asset": base, "quantity": quantity.to_string() })).into_response()
}

#[derive(Debug, Deserialize)]
pub struct PricesQuery {
    symbol: Option<String>,
    start: Option<String>,
    end: Option<String>,
    limit: Option<usize>,
}

pub async fn get_prices(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<PricesQuery>,
) -> Response {
    let session = session_id(&headers);
    if let Err(rejection) = check_rate_limit(&state, &session) {
        return rejection;
    }
    simulate_latency(&state, true).await;

    let Some(symbol) = query.symbol else {
        simulate_latency(&state, false).await;
        return bad_request("symbol parameter required");
    };
    let Some(generator) = state.market.generator(&symbol) else {
        simulate_latency(&state, false).await;
        return not_found(format!("Symbol {symbol} not found"));
    };

    let start = match parse_timestamp(query.start.as_deref()) {
        Ok(ts) => ts,
        Err(message) => {
            simulate_latency(&state, false).await;
            return bad_request(message);
        }
    };
    let end = match parse_timestamp(query.end.as_deref()) {
        Ok(ts) => ts,
        Err(message) => {
            simulate_latency(&state, false).await;
            return bad_request(message);
        }
    };
    let limit = query
        .limit
        .unwrap_or(DEFAULT_PRICE_LIMIT)
        .min(MAX_PRICE_LIMIT);

    let points: Vec<serde_json::Value> = generator
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .history(start, end, limit)
        .into_iter()
        .map(|point| {
            json!({
                "timestamp": point.timestamp.to_rfc3339(),
                "price": point.price.to_string(),
                "bid": point.bid.to_string(),
                "ask": point.ask.to_string(),
                "volume_24h": point.volume_24h.to_string(),
            })
        })
        .collect();
    simulate_latency(&state, false).await;
    Json(json!({ "symbol": symbol, "prices": points })).into_response()
}

fn parse_timestamp(raw: Option<&str>) -> Result<Option<DateTime<Utc>>, String> {
    match raw {
        None => Ok(None),
        Some(raw) => DateTime::parse_from_rfc3339(raw)
            .map(|ts| Some(ts.with_timezone(&Utc)))
            .map_err(|_| format!("invalid timestamp: {raw}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_order_request_happy_path() {
        let data = json!({
            "symbol": "BTC/USD",
            "side": "BUY",
            "type": "LIMIT",
            "price": "50000",
            "quantity": "0.5",
            "time_in_force": "FOK"
        });
        let (symbol, side, order_type, quantity, price, tif) =
            parse_order_request(&data).unwrap();
        assert_eq!(symbol, "BTC/USD");
        assert_eq!(side, OrderSide::Buy);
        assert_eq!(order_type, OrderType::Limit);
        assert_eq!(quantity.to_string(), "0.5");
        assert_eq!(price.unwrap().to_string(), "50000");
        assert_eq!(tif, TimeInForce::Fok);
    }

    #[test]
    fn test_parse_order_request_rejects_bad_enum() {
        let data = json!({
            "symbol": "BTC/USD",
            "side": "HOLD",
            "type": "LIMIT",
            "price": "1",
            "quantity": "1"
        });
        assert!(parse_order_request(&data).unwrap_err().contains("side"));
    }

    #[test]
    fn test_parse_order_request_requires_price_for_limit() {
        let data = json!({
            "symbol": "BTC/USD",
            "side": "BUY",
            "type": "LIMIT",
            "quantity": "1"
        });
        assert!(parse_order_request(&data).unwrap_err().contains("price"));
    }

    #[test]
    fn test_parse_order_request_accepts_numeric_decimals() {
        let data = json!({
            "symbol": "BTC/USD",
            "side": "SELL",
            "type": "MARKET",
            "quantity": 2
        });
        let (_, _, order_type, quantity, price, _) = parse_order_request(&data).unwrap();
        assert_eq!(order_type, OrderType::Market);
        assert_eq!(quantity.to_string(), "2");
        assert!(price.is_none());
    }

    #[test]
    fn test_parse_timestamp() {
        assert_eq!(parse_timestamp(None).unwrap(), None);
        assert!(parse_timestamp(Some("2026-01-01T00:00:00Z")).unwrap().is_some());
        assert!(parse_timestamp(Some("yesterday")).is_err());
    }
}
