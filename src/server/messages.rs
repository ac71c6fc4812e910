//! Wire messages for the streaming surface.
//!
//! Frames are JSON objects tagged by a `type` field. Decimals travel as
//! strings, timestamps as ISO-8601 UTC. Inbound kinds form a closed set; the
//! router rejects anything else.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::engine::{Order, OrderSide, OrderStatus, OrderType, Position, TimeInForce};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageKind {
    // Client → server
    PlaceOrder,
    CancelOrder,
    GetOrder,
    GetOrders,
    GetBalance,
    GetPosition,
    Subscribe,
    Unsubscribe,
    Ping,
    // Server → client
    OrderAck,
    OrderFill,
    OrderCancel,
    OrderReject,
    Orders,
    BalanceUpdate,
    PositionUpdate,
    MarketData,
    Trade,
    Pong,
    Error,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::PlaceOrder => "PLACE_ORDER",
            MessageKind::CancelOrder => "CANCEL_ORDER",
            MessageKind::GetOrder => "GET_ORDER",
            MessageKind::GetOrders => "GET_ORDERS",
            MessageKind::GetBalance => "GET_BALANCE",
            MessageKind::GetPosition => "GET_POSITION",
            MessageKind::Subscribe => "SUBSCRIBE",
            MessageKind::Unsubscribe => "UNSUBSCRIBE",
            MessageKind::Ping => "PING",
            MessageKind::OrderAck => "ORDER_ACK",
            MessageKind::OrderFill => "ORDER_FILL",
            MessageKind::OrderCancel => "ORDER_CANCEL",
            MessageKind::OrderReject => "ORDER_REJECT",
            MessageKind::Orders => "ORDERS",
            MessageKind::BalanceUpdate => "BALANCE_UPDATE",
            MessageKind::PositionUpdate => "POSITION_UPDATE",
            MessageKind::MarketData => "MARKET_DATA",
            MessageKind::Trade => "TRADE",
            MessageKind::Pong => "PONG",
            MessageKind::Error => "ERROR",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        serde_json::from_value(Value::String(s.to_string())).ok()
    }
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Subscription channels; keys on the wire are `"<CHANNEL>:<SYMBOL>"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Channel {
    Trades,
    Ticker,
    Orderbook,
    OrderbookL2,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Trades => "TRADES",
            Channel::Ticker => "TICKER",
            Channel::Orderbook => "ORDERBOOK",
            Channel::OrderbookL2 => "ORDERBOOK_L2",
        }
    }

    pub fn key(&self, symbol: &str) -> String {
        format!("{}:{}", self.as_str(), symbol)
    }
}

/// Inbound frames.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientMessage {
    PlaceOrder {
        #[serde(default)]
        request_id: Option<String>,
        symbol: String,
        side: OrderSide,
        order_type: OrderType,
        #[serde(default)]
        price: Option<Decimal>,
        quantity: Decimal,
        #[serde(default)]
        time_in_force: TimeInForce,
    },
    CancelOrder {
        #[serde(default)]
        request_id: Option<String>,
        order_id: String,
    },
    GetOrder {
        #[serde(default)]
        request_id: Option<String>,
        order_id: String,
    },
    GetOrders {
        #[serde(default)]
        request_id: Option<String>,
        #[serde(default)]
        symbol: Option<String>,
        #[serde(default)]
        status: Option<OrderStatus>,
    },
    GetBalance {
        #[serde(default)]
        request_id: Option<String>,
    },
    GetPosition {
        #[serde(default)]
        request_id: Option<String>,
        symbol: String,
    },
    Subscribe {
        #[serde(default)]
        request_id: Option<String>,
        channel: Channel,
        symbol: String,
    },
    Unsubscribe {
        #[serde(default)]
        request_id: Option<String>,
        channel: Channel,
        symbol: String,
    },
    Ping {
        #[serde(default)]
        request_id: Option<String>,
    },
}

impl ClientMessage {
    pub fn kind(&self) -> MessageKind {
        match self {
            ClientMessage::PlaceOrder { .. } => MessageKind::PlaceOrder,
            ClientMessage::CancelOrder { .. } => MessageKind::CancelOrder,
            ClientMessage::GetOrder { .. } => MessageKind::GetOrder,
            ClientMessage::GetOrders { .. } => MessageKind::GetOrders,
            ClientMessage::GetBalance { .. } => MessageKind::GetBalance,
            ClientMessage::GetPosition { .. } => MessageKind::GetPosition,
            ClientMessage::Subscribe { .. } => MessageKind::Subscribe,
            ClientMessage::Unsubscribe { .. } => MessageKind::Unsubscribe,
            ClientMessage::Ping { .. } => MessageKind::Ping,
        }
    }
}

/// REST/streaming order snapshot (decimals as strings via serde).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderInfo {
    pub order_id: String,
    pub symbol: String,
    pub side: OrderSide,
    #[serde(rename = "type")]
    pub order_type: OrderType,
    pub status: OrderStatus,
    pub price: Option<Decimal>,
    pub quantity: Decimal,
    pub filled_quantity: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Order> for OrderInfo {
    fn from(order: &Order) -> Self {
        Self {
            order_id: order.order_id.clone(),
            symbol: order.symbol.clone(),
            side: order.side,
            order_type: order.order_type,
            status: order.status,
            price: order.price,
            quantity: order.quantity,
            filled_quantity: order.filled_quantity,
            created_at: order.created_at,
            updated_at: order.updated_at,
        }
    }
}

/// Outbound frames.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServerMessage {
    OrderAck {
        request_id: Option<String>,
        timestamp: DateTime<Utc>,
        order_id: String,
        status: OrderStatus,
        symbol: String,
        side: OrderSide,
        order_type: OrderType,
        price: Option<Decimal>,
        quantity: Decimal,
        filled_quantity: Decimal,
    },
    OrderFill {
        request_id: Option<String>,
        timestamp: DateTime<Utc>,
        fill_id: String,
        order_id: String,
        symbol: String,
        side: OrderSide,
        price: Decimal,
        quantity: Decimal,
        filled_quantity: Decimal,
        remaining_quantity: Decimal,
        status: OrderStatus,
        is_maker: bool,
    },
    OrderCancel {
        request_id: Option<String>,
        timestamp: DateTime<Utc>,
        order_id: String,
        symbol: String,
    },
    OrderReject {
        request_id: Option<String>,
        timestamp: DateTime<Utc>,
        order_id: Option<String>,
        reason: String,
    },
    Orders {
        request_id: Option<String>,
        timestamp: DateTime<Utc>,
        orders: Vec<OrderInfo>,
    },
    BalanceUpdate {
        request_id: Option<String>,
        timestamp: DateTime<Utc>,
        balances: HashMap<String, Decimal>,
    },
    PositionUpdate {
        request_id: Option<String>,
        timestamp: DateTime<Utc>,
        symbol: String,
        quantity: Decimal,
        average_price: Decimal,
        unrealized_pnl: Decimal,
        realized_pnl: Decimal,
    },
    MarketData {
        timestamp: DateTime<Utc>,
        symbol: String,
        last_price: Decimal,
        bid: Decimal,
        ask: Decimal,
        volume_24h: Decimal,
        high_24h: Decimal,
        low_24h: Decimal,
        sequence_id: u64,
    },
    Trade {
        timestamp: DateTime<Utc>,
        trade_id: String,
        symbol: String,
        price: Decimal,
        quantity: Decimal,
        side: OrderSide,
    },
    Pong {
        request_id: Option<String>,
        timestamp: DateTime<Utc>,
    },
    Error {
        request_id: Option<String>,
        timestamp: DateTime<Utc>,
        code: String,
        message: String,
        details: Option<Value>,
    },
}

impl ServerMessage {
    pub fn kind(&self) -> MessageKind {
        match self {
            ServerMessage::OrderAck { .. } => MessageKind::OrderAck,
            ServerMessage::OrderFill { .. } => MessageKind::OrderFill,
            ServerMessage::OrderCancel { .. } => MessageKind::OrderCancel,
            ServerMessage::OrderReject { .. } => MessageKind::OrderReject,
            ServerMessage::Orders { .. } => MessageKind::Orders,
            ServerMessage::BalanceUpdate { .. } => MessageKind::BalanceUpdate,
            ServerMessage::PositionUpdate { .. } => MessageKind::PositionUpdate,
            ServerMessage::MarketData { .. } => MessageKind::MarketData,
            ServerMessage::Trade { .. } => MessageKind::Trade,
            ServerMessage::Pong { .. } => MessageKind::Pong,
            ServerMessage::Error { .. } => MessageKind::Error,
        }
    }

    pub fn ack(request_id: Option<String>, order: &Order) -> Self {
        ServerMessage::OrderAck {
            request_id,
            timestamp: Utc::now(),
            order_id: order.order_id.clone(),
            status: order.status,
            symbol: order.symbol.clone(),
            side: order.side,
            order_type: order.order_type,
            price: order.price,
            quantity: order.quantity,
            filled_quantity: order.filled_quantity,
        }
    }

    pub fn fill(fill: &crate::engine::Fill, order: &Order) -> Self {
        ServerMessage::OrderFill {
            request_id: None,
            timestamp: Utc::now(),
            fill_id: fill.fill_id.clone(),
            order_id: fill.order_id.clone(),
            symbol: fill.symbol.clone(),
            side: fill.side,
            price: fill.price,
            quantity: fill.quantity,
            filled_quantity: order.filled_quantity,
            remaining_quantity: order.remaining_quantity(),
            status: order.status,
            is_maker: fill.is_maker,
        }
    }

    pub fn reject(request_id: Option<String>, order_id: Option<String>, reason: impl Into<String>) -> Self {
        ServerMessage::OrderReject {
            request_id,
            timestamp: Utc::now(),
            order_id,
            reason: reason.into(),
        }
    }

    pub fn position(request_id: Option<String>, position: &Position) -> Self {
        ServerMessage::PositionUpdate {
            request_id,
            timestamp: Utc::now(),
            symbol: position.symbol.clone(),
            quantity: position.quantity,
            average_price: position.average_price,
            unrealized_pnl: position.unrealized_pnl,
            realized_pnl: position.realized_pnl,
        }
    }

    pub fn pong(request_id: Option<String>) -> Self {
        ServerMessage::Pong {
            request_id,
            timestamp: Utc::now(),
        }
    }

    pub fn error(
        request_id: Option<String>,
        code: impl Into<String>,
        message: impl Into<String>,
        details: Option<Value>,
    ) -> Self {
        ServerMessage::Error {
            request_id,
            timestamp: Utc::now(),
            code: code.into(),
            message: message.into(),
            details,
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).expect("wire message serializes")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_client_message_round_trip() {
        let raw = serde_json::json!({
            "type": "PLACE_ORDER",
            "request_id": "r-1",
            "symbol": "BTC/USD",
            "side": "BUY",
            "order_type": "LIMIT",
            "price": "50000",
            "quantity": "0.5",
            "time_in_force": "IOC"
        });
        let msg: ClientMessage = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(msg.kind(), MessageKind::PlaceOrder);

        // Parse-then-serialize equals the original up to field reordering.
        let reserialized: Value = serde_json::from_str(&serde_json::to_string(&msg).unwrap()).unwrap();
        assert_eq!(reserialized, raw);
    }

    #[test]
    fn test_time_in_force_defaults_to_gtc() {
        let msg: ClientMessage = serde_json::from_value(serde_json::json!({
            "type": "PLACE_ORDER",
            "symbol": "BTC/USD",
            "side": "SELL",
            "order_type": "MARKET",
            "quantity": "1"
        }))
        .unwrap();
        match msg {
            ClientMessage::PlaceOrder { time_in_force, price, .. } => {
                assert_eq!(time_in_force, TimeInForce::Gtc);
                assert_eq!(price, None);
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn test_market_data_carries_sequence_id() {
        let msg = ServerMessage::MarketData {
            timestamp: Utc::now(),
            symbol: "BTC/USD".into(),
            last_price: dec!(50000),
            bid: dec!(49975),
            ask: dec!(50025),
            volume_24h: dec!(12.5),
            high_24h: dec!(50100),
            low_24h: dec!(49900),
            sequence_id: 42,
        };
        let value: Value = serde_json::from_str(&msg.to_json()).unwrap();
        assert_eq!(value["type"], "MARKET_DATA");
        assert_eq!(value["sequence_id"], 42);
        // Decimals travel as strings.
        assert_eq!(value["last_price"], "50000");
    }

    #[test]
    fn test_kind_spelling_matches_wire() {
        assert_eq!(MessageKind::parse("PLACE_ORDER"), Some(MessageKind::PlaceOrder));
        assert_eq!(MessageKind::parse("PONG"), Some(MessageKind::Pong));
        assert_eq!(MessageKind::parse("bogus"), None);
        assert_eq!(MessageKind::OrderAck.as_str(), "ORDER_ACK");
    }

    #[test]
    fn test_channel_keys() {
        assert_eq!(Channel::Ticker.key("BTC/USD"), "TICKER:BTC/USD");
        assert_eq!(Channel::OrderbookL2.as_str(), "ORDERBOOK_L2");
    }
}
