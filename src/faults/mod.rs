//! Fault-injection pipeline.
//!
//! Two ordered strategy chains, inbound and outbound. A frame flows through
//! each strategy in order; the first strategy to consume it short-circuits
//! the chain. A disabled injector is a pass-through.

pub mod rate_limit;
pub mod strategies;

use tracing::info;

pub use rate_limit::{RateLimitRejection, RateLimitStrategy, VolumeDetector};
pub use strategies::FaultStrategy;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Inbound,
    Outbound,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Inbound => "inbound",
            Direction::Outbound => "outbound",
        }
    }
}

/// Per-frame context handed through the chain. Strategies read the session
/// and may leave structured results behind (rate-limit rejections) for the
/// caller to surface.
#[derive(Debug, Clone)]
pub struct FaultContext {
    pub session_id: String,
    pub message_type: String,
    pub direction: Direction,
    pub rate_limited: Option<RateLimitRejection>,
}

impl FaultContext {
    pub fn inbound(session_id: impl Into<String>, message_type: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            message_type: message_type.into(),
            direction: Direction::Inbound,
            rate_limited: None,
        }
    }

    pub fn outbound(session_id: impl Into<String>, message_type: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            message_type: message_type.into(),
            direction: Direction::Outbound,
            rate_limited: None,
        }
    }
}

#[derive(Debug, Default)]
pub struct FaultInjector {
    inbound: Vec<FaultStrategy>,
    outbound: Vec<FaultStrategy>,
    enabled: bool,
}

impl FaultInjector {
    pub fn new() -> Self {
        Self {
            inbound: Vec::new(),
            outbound: Vec::new(),
            enabled: true,
        }
    }

    pub fn disabled() -> Self {
        Self {
            inbound: Vec::new(),
            outbound: Vec::new(),
            enabled: false,
        }
    }

    pub fn add_inbound(&mut self, strategy: FaultStrategy) {
        self.inbound.push(strategy);
    }

    pub fn add_outbound(&mut self, strategy: FaultStrategy) {
        self.outbound.push(strategy);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn inbound_count(&self) -> usize {
        self.inbound.len()
    }

    pub fn outbound_count(&self) -> usize {
        self.outbound.len()
    }

    /// Run an inbound frame through the chain. `None` means consumed; the
    /// context records why when a strategy left a structured reason.
    pub async fn inject_inbound(&self, frame: String, ctx: &mut FaultContext) -> Option<String> {
        self.run(&self.inbound, frame, ctx).await
    }

    pub async fn inject_outbound(&self, frame: String, ctx: &mut FaultContext) -> Option<String> {
        self.run(&self.outbound, frame, ctx).await
    }

    async fn run(
        &self,
        chain: &[FaultStrategy],
        frame: String,
        ctx: &mut FaultContext,
    ) -> Option<String> {
        if !self.enabled || chain.is_empty() {
            return Some(frame);
        }
        let mut current = frame;
        for strategy in chain {
            current = strategy.apply(current, ctx).await?;
        }
        Some(current)
    }

    /// Reset every strategy's state and counters.
    pub fn reset_all(&self) {
        for strategy in self.inbound.iter().chain(self.outbound.iter()) {
            strategy.reset();
        }
    }

    /// Drain reorder buffers at shutdown; buffered frames are discarded.
    pub fn flush_reorder_buffers(&self) {
        for strategy in self.inbound.iter().chain(self.outbound.iter()) {
            if let FaultStrategy::Reorder(reorder) = strategy {
                let discarded = reorder.flush().len();
                if discarded > 0 {
                    info!(discarded, "reorder buffer flushed at shutdown");
                }
            }
        }
    }

    /// Per-strategy statistics, keyed `<name>_<position>` per direction.
    pub fn statistics(&self) -> serde_json::Value {
        let collect = |chain: &[FaultStrategy]| -> serde_json::Value {
            let mut map = serde_json::Map::new();
            for (i, strategy) in chain.iter().enumerate() {
                map.insert(format!("{}_{}", strategy.name(), i), strategy.stats());
            }
            serde_json::Value::Object(map)
        };
        serde_json::json!({
            "enabled": self.enabled,
            "inbound": collect(&self.inbound),
            "outbound": collect(&self.outbound),
        })
    }
}
