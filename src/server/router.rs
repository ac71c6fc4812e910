//! Streaming message router: parse, dispatch, reply.
//!
//! Contract: malformed JSON or bad fields → `ERROR{INVALID_MESSAGE}`;
//! an unknown or unregistered kind → `ERROR{NO_HANDLER}`; a handler failure →
//! `ERROR{HANDLER_ERROR}` carrying the message type in `details`. Handlers
//! never panic the process.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use serde_json::Value;
use tracing::debug;

use super::messages::{ClientMessage, MessageKind, OrderInfo, ServerMessage};
use super::sessions::ConnectionManager;
use crate::engine::{ExchangeEngine, ExchangeError};

pub type SharedEngine = Arc<Mutex<ExchangeEngine>>;

/// Closed set of handlers; registration decides which kinds are routable.
#[derive(Debug)]
pub enum RouteHandler {
    Order(OrderHandler),
    Subscription(SubscriptionHandler),
    Heartbeat(HeartbeatHandler),
}

impl RouteHandler {
    fn handle(&self, message: ClientMessage, session_id: &str) -> Result<Option<ServerMessage>> {
        match self {
            RouteHandler::Order(h) => h.handle(message, session_id),
            RouteHandler::Subscription(h) => h.handle(message, session_id),
            RouteHandler::Heartbeat(h) => h.handle(message, session_id),
        }
    }
}

#[derive(Debug, Default)]
pub struct MessageRouter {
    handlers: HashMap<MessageKind, RouteHandler>,
}

impl MessageRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, kind: MessageKind, handler: RouteHandler) {
        self.handlers.insert(kind, handler);
    }

    pub fn has_handler(&self, kind: MessageKind) -> bool {
        self.handlers.contains_key(&kind)
    }

    /// Route one raw frame. `None` means the handler chose not to reply.
    pub fn route(&self, raw: &str, session_id: &str) -> Option<ServerMessage> {
        let value: Value = match serde_json::from_str(raw) {
            Ok(v) => v,
            Err(e) => {
                return Some(ServerMessage::error(
                    None,
                    "INVALID_MESSAGE",
                    format!("Invalid JSON: {e}"),
                    None,
                ))
            }
        };

        let request_id = value
            .get("request_id")
            .and_then(Value::as_str)
            .map(String::from);
        let Some(type_str) = value.get("type").and_then(Value::as_str) else {
            return Some(ServerMessage::error(
                request_id,
                "INVALID_MESSAGE",
                "Message must have a 'type' field",
                None,
            ));
        };

        let handler = match MessageKind::parse(type_str).and_then(|k| self.handlers.get(&k)) {
            Some(handler) => handler,
            None => {
                return Some(ServerMessage::error(
                    request_id,
                    "NO_HANDLER",
                    format!("No handler registered for message type: {type_str}"),
                    None,
                ))
            }
        };

        let type_owned = type_str.to_string();
        let message: ClientMessage = match serde_json::from_value(value) {
            Ok(m) => m,
            Err(e) => {
                return Some(ServerMessage::error(
                    request_id,
                    "INVALID_MESSAGE",
                    format!("Invalid message format: {e}"),
                    None,
                ))
            }
        };

        match handler.handle(message, session_id) {
            Ok(reply) => reply,
            Err(e) => {
                debug!(session_id, message_type = %type_owned, error = %e, "handler failed");
                Some(ServerMessage::error(
                    request_id,
                    "HANDLER_ERROR",
                    format!("Error handling message: {e}"),
                    Some(serde_json::json!({ "message_type": type_owned })),
                ))
            }
        }
    }
}

// ─────────────────────────────────────────────────────────
// Order handler
// ─────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct OrderHandler {
    engine: SharedEngine,
    sessions: Arc<ConnectionManager>,
}

impl OrderHandler {
    pub fn new(engine: SharedEngine, sessions: Arc<ConnectionManager>) -> Self {
        Self { engine, sessions }
    }

    fn handle(&self, message: ClientMessage, session_id: &str) -> Result<Option<ServerMessage>> {
        match message {
            ClientMessage::PlaceOrder {
                request_id,
                symbol,
                side,
                order_type,
                price,
                quantity,
                time_in_force,
            } => {
                let mut engine = self.engine.lock().unwrap();
                match engine.place_order(
                    session_id,
                    &symbol,
                    side,
                    order_type,
                    quantity,
                    price,
                    time_in_force,
                ) {
                    Ok((order, fills)) => {
                        // Push each fill to the session that owns the filled
                        // order, so resting makers learn about executions.
                        for fill in &fills {
                            if let Some(filled) = engine.order_snapshot(&fill.order_id) {
                                let frame = ServerMessage::fill(fill, filled);
                                self.sessions.send(
                                    &fill.session_id,
                                    Arc::from(frame.to_json().as_str()),
                                    MessageKind::OrderFill,
                                );
                            }
                        }
                        Ok(Some(ServerMessage::ack(request_id, &order)))
                    }
                    Err(e) => Ok(Some(ServerMessage::reject(
                        request_id,
                        e.order_id().map(String::from),
                        e.code(),
                    ))),
                }
            }
            ClientMessage::CancelOrder {
                request_id,
                order_id,
            } => {
                let mut engine = self.engine.lock().unwrap();
                match engine.cancel_order(session_id, &order_id) {
                    Ok(order) => Ok(Some(ServerMessage::OrderCancel {
                        request_id,
                        timestamp: chrono::Utc::now(),
                        order_id: order.order_id,
                        symbol: order.symbol,
                    })),
                    Err(e @ ExchangeError::OrderNotFound) => Ok(Some(ServerMessage::error(
                        request_id,
                        "ORDER_NOT_FOUND",
                        e.to_string(),
                        None,
                    ))),
                    Err(e) => Ok(Some(ServerMessage::error(
                        request_id,
                        "CANCEL_FAILED",
                        e.to_string(),
                        None,
                    ))),
                }
            }
            ClientMessage::GetOrder {
                request_id,
                order_id,
            } => {
                let engine = self.engine.lock().unwrap();
                match engine.get_order(session_id, &order_id) {
                    Some(order) => Ok(Some(ServerMessage::ack(request_id, order))),
                    None => Ok(Some(ServerMessage::error(
                        request_id,
                        "ORDER_NOT_FOUND",
                        "Order not found",
                        None,
                    ))),
                }
            }
            ClientMessage::GetOrders {
                request_id,
                symbol,
                status,
            } => {
                let engine = self.engine.lock().unwrap();
                let orders = engine
                    .get_orders(session_id, symbol.as_deref(), status)
                    .into_iter()
                    .map(OrderInfo::from)
                    .collect();
                Ok(Some(ServerMessage::Orders {
                    request_id,
                    timestamp: chrono::Utc::now(),
                    orders,
                }))
            }
            ClientMessage::GetBalance { request_id } => {
                let mut engine = self.engine.lock().unwrap();
                let balances = engine
                    .accounts_mut()
                    .get_or_create(session_id)
                    .balances()
                    .clone();
                Ok(Some(ServerMessage::BalanceUpdate {
                    request_id,
                    timestamp: chrono::Utc::now(),
                    balances,
                }))
            }
            ClientMessage::GetPosition { request_id, symbol } => {
                let mut engine = self.engine.lock().unwrap();
                let mark = engine.last_price(&symbol);
                let account = engine.accounts_mut().get_or_create(session_id);
                let position = account.position(&symbol);
                if let Some(mark) = mark {
                    position.unrealized_at(mark);
                }
                Ok(Some(ServerMessage::position(request_id, position)))
            }
            other => anyhow::bail!("order handler cannot handle {:?}", other.kind()),
        }
    }
}

// ─────────────────────────────────────────────────────────
// Subscription handler
// ─────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct SubscriptionHandler {
    sessions: Arc<ConnectionManager>,
}

impl SubscriptionHandler {
    pub fn new(sessions: Arc<ConnectionManager>) -> Self {
        Self { sessions }
    }

    fn handle(&self, message: ClientMessage, session_id: &str) -> Result<Option<ServerMessage>> {
        match message {
            ClientMessage::Subscribe {
                request_id,
                channel,
                symbol,
            } => {
                if self.sessions.subscribe(session_id, &channel.key(&symbol)) {
                    Ok(None)
                } else {
                    Ok(Some(ServerMessage::error(
                        request_id,
                        "SUBSCRIBE_FAILED",
                        "Failed to subscribe",
                        None,
                    )))
                }
            }
            ClientMessage::Unsubscribe {
                channel, symbol, ..
            } => {
                self.sessions.unsubscribe(session_id, &channel.key(&symbol));
                Ok(None)
            }
            other => anyhow::bail!("subscription handler cannot handle {:?}", other.kind()),
        }
    }
}

// ─────────────────────────────────────────────────────────
// Heartbeat handler
// ─────────────────────────────────────────────────────────

/// PING → PONG with the same request id; the client's liveness check depends
/// on the echo.
#[derive(Debug, Default)]
pub struct HeartbeatHandler;

impl HeartbeatHandler {
    pub fn new() -> Self {
        Self
    }

    fn handle(&self, message: ClientMessage, _session_id: &str) -> Result<Option<ServerMessage>> {
        match message {
            ClientMessage::Ping { request_id } => Ok(Some(ServerMessage::pong(request_id))),
            other => anyhow::bail!("heartbeat handler cannot handle {:?}", other.kind()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::AccountManager;
    use rust_decimal_macros::dec;
    use std::collections::HashMap;

    fn router() -> (MessageRouter, SharedEngine, Arc<ConnectionManager>) {
        let mut defaults = HashMap::new();
        defaults.insert("USD".to_string(), dec!(100000));
        let engine: SharedEngine = Arc::new(Mutex::new(ExchangeEngine::new(
            vec!["BTC/USD".to_string()],
            AccountManager::new(defaults),
        )));
        let sessions = Arc::new(ConnectionManager::new());

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
        (router, engine, sessions)
    }

    fn expect_error(reply: Option<ServerMessage>, expected_code: &str) -> String {
        match reply {
            Some(ServerMessage::Error { code, message, .. }) => {
                assert_eq!(code, expected_code);
                message
            }
            other => panic!("expected {expected_code} error, got {other:?}"),
        }
    }

    #[test]
    fn test_invalid_json_yields_invalid_message() {
        let (router, _, _) = router();
        expect_error(router.route("{not json", "s"), "INVALID_MESSAGE");
    }

    #[test]
    fn test_missing_type_yields_invalid_message() {
        let (router, _, _) = router();
        expect_error(router.route("{\"symbol\":\"BTC/USD\"}", "s"), "INVALID_MESSAGE");
    }

    #[test]
    fn test_unknown_kind_yields_no_handler() {
        let (router, _, _) = router();
        expect_error(router.route("{\"type\":\"WAT\"}", "s"), "NO_HANDLER");
    }

    #[test]
    fn test_unregistered_kind_yields_no_handler() {
        let router = MessageRouter::new();
        expect_error(router.route("{\"type\":\"PING\"}", "s"), "NO_HANDLER");
    }

    #[test]
    fn test_bad_fields_yield_invalid_message() {
        let (router, _, _) = router();
        // quantity missing
        let raw = "{\"type\":\"PLACE_ORDER\",\"symbol\":\"BTC/USD\",\"side\":\"BUY\",\"order_type\":\"LIMIT\",\"price\":\"1\"}";
        expect_error(router.route(raw, "s"), "INVALID_MESSAGE");
    }

    #[test]
    fn test_ping_pongs_with_request_id() {
        let (router, _, _) = router();
        match router.route("{\"type\":\"PING\",\"request_id\":\"hb-1\"}", "s") {
            Some(ServerMessage::Pong { request_id, .. }) => {
                assert_eq!(request_id.as_deref(), Some("hb-1"))
            }
            other => panic!("expected PONG, got {other:?}"),
        }
    }

    #[test]
    fn test_place_order_acks_and_rejects() {
        let (router, _, _) = router();
        let raw = serde_json::json!({
            "type": "PLACE_ORDER",
            "request_id": "r-1",
            "symbol": "BTC/USD",
            "side": "BUY",
            "order_type": "LIMIT",
            "price": "50000",
            "quantity": "0.5"
        })
        .to_string();
        match router.route(&raw, "alice") {
            Some(ServerMessage::OrderAck { request_id, status, .. }) => {
                assert_eq!(request_id.as_deref(), Some("r-1"));
                assert_eq!(status, crate::engine::OrderStatus::Open);
            }
            other => panic!("expected ORDER_ACK, got {other:?}"),
        }

        let raw = serde_json::json!({
            "type": "PLACE_ORDER",
            "symbol": "DOGE/USD",
            "side": "BUY",
            "order_type": "LIMIT",
            "price": "1",
            "quantity": "1"
        })
        .to_string();
        match router.route(&raw, "alice") {
            Some(ServerMessage::OrderReject { reason, order_id, .. }) => {
                assert_eq!(reason, "invalid_symbol");
                assert!(order_id.is_none());
            }
            other => panic!("expected ORDER_REJECT, got {other:?}"),
        }
    }

    #[test]
    fn test_fills_are_pushed_to_maker_session() {
        let (router, _, sessions) = router();
        // The maker needs a live session queue to receive its fill.
        let (tx, mut rx) = tokio::sync::mpsc::channel(8);
        let maker_session = sessions.add(tx);

        let sell = serde_json::json!({
            "type": "PLACE_ORDER", "symbol": "BTC/USD", "side": "SELL",
            "order_type": "LIMIT", "price": "50000", "quantity": "1"
        })
        .to_string();
        router.route(&sell, &maker_session);

        let buy = serde_json::json!({
            "type": "PLACE_ORDER", "symbol": "BTC/USD", "side": "BUY",
            "order_type": "LIMIT", "price": "50000", "quantity": "1"
        })
        .to_string();
        router.route(&buy, "taker");

        match rx.try_recv().unwrap() {
            crate::server::sessions::Outbound::Frame { payload, kind } => {
                assert_eq!(kind, MessageKind::OrderFill);
                let value: serde_json::Value = serde_json::from_str(&payload).unwrap();
                assert_eq!(value["type"], "ORDER_FILL");
                assert_eq!(value["is_maker"], true);
                assert_eq!(value["status"], "FILLED");
            }
            other => panic!("expected fill frame, got {other:?}"),
        }
    }

    #[test]
    fn test_cancel_unknown_order() {
        let (router, _, _) = router();
        let raw = "{\"type\":\"CANCEL_ORDER\",\"order_id\":\"nope\"}";
        expect_error(router.route(raw, "s"), "ORDER_NOT_FOUND");
    }

    #[test]
    fn test_get_orders_lists_session_orders() {
        let (router, _, _) = router();
        let place = serde_json::json!({
            "type": "PLACE_ORDER", "symbol": "BTC/USD", "side": "BUY",
            "order_type": "LIMIT", "price": "40000", "quantity": "1"
        })
        .to_string();
        router.route(&place, "alice");

        match router.route("{\"type\":\"GET_ORDERS\"}", "alice") {
            Some(ServerMessage::Orders { orders, .. }) => assert_eq!(orders.len(), 1),
            other => panic!("expected ORDERS, got {other:?}"),
        }
        match router.route("{\"type\":\"GET_ORDERS\"}", "bob") {
            Some(ServerMessage::Orders { orders, .. }) => assert!(orders.is_empty()),
            other => panic!("expected ORDERS, got {other:?}"),
        }
    }

    #[test]
    fn test_balance_and_position_queries() {
        let (router, _, _) = router();
        match router.route("{\"type\":\"GET_BALANCE\"}", "alice") {
            Some(ServerMessage::BalanceUpdate { balances, .. }) => {
                assert_eq!(balances["USD"], dec!(100000));
            }
            other => panic!("expected BALANCE_UPDATE, got {other:?}"),
        }
        match router.route("{\"type\":\"GET_POSITION\",\"symbol\":\"BTC/USD\"}", "alice") {
            Some(ServerMessage::PositionUpdate { quantity, .. }) => {
                assert_eq!(quantity, dec!(0));
            }
            other => panic!("expected POSITION_UPDATE, got {other:?}"),
        }
    }

    #[test]
    fn test_subscribe_success_is_silent() {
        let (router, _, sessions) = router();
        let (tx, _rx) = tokio::sync::mpsc::channel(8);
        let session_id = sessions.add(tx);

        let raw = "{\"type\":\"SUBSCRIBE\",\"channel\":\"TICKER\",\"symbol\":\"BTC/USD\"}";
        assert!(router.route(raw, &session_id).is_none());
        assert_eq!(sessions.subscribers("TICKER:BTC/USD"), vec![session_id.clone()]);

        let raw = "{\"type\":\"UNSUBSCRIBE\",\"channel\":\"TICKER\",\"symbol\":\"BTC/USD\"}";
        assert!(router.route(raw, &session_id).is_none());
        assert!(sessions.subscribers("TICKER:BTC/USD").is_empty());
    }

    #[test]
    fn test_subscribe_unknown_session_fails() {
        let (router, _, _) = router();
        let raw = "{\"type\":\"SUBSCRIBE\",\"channel\":\"TICKER\",\"symbol\":\"BTC/USD\"}";
        expect_error(router.route(raw, "ghost"), "SUBSCRIBE_FAILED");
    }
}
