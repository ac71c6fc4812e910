//! Request-API reconciliation.
//!
//! After a sequence gap or a silent stream the client refetches truth over
//! the request API: current ticker and a bounded price-history window for
//! market data, plus the full orders list and balances for account state.
//! Every call goes through the client-side rate limiter.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{info, warn};

use super::rate_limit::RestRateLimiter;
use super::sequence::Gap;

#[derive(Debug, Clone)]
pub enum ReconcileEvent {
    MarketData { symbol: String, data: Value },
    PriceHistory { symbol: String, points: Vec<Value> },
    Orders(Vec<Value>),
    Balances(HashMap<String, String>),
}

#[derive(Debug, Clone)]
pub struct Reconciler {
    base_url: String,
    session_id: String,
    client: reqwest::Client,
    limiter: Arc<RestRateLimiter>,
}

impl Reconciler {
    pub fn new(
        base_url: impl Into<String>,
        session_id: impl Into<String>,
        limiter: Arc<RestRateLimiter>,
    ) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            session_id: session_id.into(),
            client: reqwest::Client::new(),
            limiter,
        }
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}{}", self.base_url, endpoint)
    }

    async fn get(&self, endpoint: &str, query: &[(String, String)]) -> Result<Value> {
        let url = self.url(endpoint);
        let response = self
            .limiter
            .execute(endpoint, || {
                self.client
                    .get(&url)
                    .header("X-Session-ID", &self.session_id)
                    .query(query)
            })
            .await?;
        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("{endpoint} returned {status}");
        }
        response.json().await.context("invalid JSON body")
    }

    /// Refetch the current ticker after a gap. The gap itself cannot be
    /// replayed, but the latest state supersedes it.
    pub async fn reconcile_market_data(&self, symbol: &str, gap: &Gap) -> Result<ReconcileEvent> {
        info!(%gap, "reconciling market data");
        let data = self
            .get("/api/v1/ticker", &[("symbol".to_string(), symbol.to_string())])
            .await?;
        Ok(ReconcileEvent::MarketData {
            symbol: symbol.to_string(),
            data,
        })
    }

    pub async fn reconcile_price_history(
        &self,
        symbol: &str,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<ReconcileEvent> {
        let mut query = vec![
            ("symbol".to_string(), symbol.to_string()),
            ("limit".to_string(), limit.to_string()),
        ];
        if let Some(start) = start {
            query.push(("start".to_string(), start.to_rfc3339()));
        }
        if let Some(end) = end {
            query.push(("end".to_string(), end.to_rfc3339()));
        }

        let data = self.get("/api/v1/prices", &query).await?;
        let points = data
            .get("prices")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        info!(symbol, count = points.len(), "price history backfilled");
        Ok(ReconcileEvent::PriceHistory {
            symbol: symbol.to_string(),
            points,
        })
    }

    pub async fn reconcile_orders(&self) -> Result<ReconcileEvent> {
        let data = self.get("/api/v1/orders", &[]).await?;
        let orders = data
            .get("orders")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        Ok(ReconcileEvent::Orders(orders))
    }

    pub async fn reconcile_balance(&self) -> Result<ReconcileEvent> {
        let data = self.get("/api/v1/balance", &[]).await?;
        let balances = data
            .get("balances")
            .and_then(Value::as_object)
            .map(|map| {
                map.iter()
                    .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                    .collect()
            })
            .unwrap_or_default();
        Ok(ReconcileEvent::Balances(balances))
    }

    /// Full account reconciliation; partial failures are logged, not fatal.
    pub async fn reconcile_all(&self) -> Vec<ReconcileEvent> {
        let mut events = Vec::new();
        match self.reconcile_orders().await {
            Ok(event) => events.push(event),
            Err(e) => warn!(error = %e, "orders reconciliation failed"),
        }
        match self.reconcile_balance().await {
            Ok(event) => events.push(event),
            Err(e) => warn!(error = %e, "balance reconciliation failed"),
        }
        events
    }
}
