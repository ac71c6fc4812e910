//! Network fault strategies.
//!
//! Each strategy either passes a (possibly transformed) frame on or consumes
//! it. Strategy state lives behind `Arc`s so one instance can sit in both
//! pipeline directions sharing its counters, the way the simulator wires
//! `drop_messages`. Sleeps run on the calling session's writer task, never
//! while holding a lock, so penalties apply per session without stalling
//! neighbors. A strategy never fails: bad input degrades to pass-through.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::time::{sleep, Duration, Instant};

use super::rate_limit::RateLimitStrategy;
use super::FaultContext;
use crate::rng::SharedRng;

/// The closed set of fault strategies; the pipeline iterates these without
/// dynamic dispatch.
#[derive(Debug, Clone)]
pub enum FaultStrategy {
    Drop(DropStrategy),
    Delay(DelayStrategy),
    Duplicate(DuplicateStrategy),
    Reorder(ReorderStrategy),
    Corrupt(CorruptStrategy),
    Throttle(ThrottleStrategy),
    Silent(SilentStrategy),
    Latency(LatencyStrategy),
    RateLimit(Arc<RateLimitStrategy>),
}

impl FaultStrategy {
    pub async fn apply(&self, frame: String, ctx: &mut FaultContext) -> Option<String> {
        match self {
            FaultStrategy::Drop(s) => s.apply(frame),
            FaultStrategy::Delay(s) => s.apply(frame).await,
            FaultStrategy::Duplicate(s) => s.apply(frame),
            FaultStrategy::Reorder(s) => s.apply(frame),
            FaultStrategy::Corrupt(s) => s.apply(frame),
            FaultStrategy::Throttle(s) => s.apply(frame).await,
            FaultStrategy::Silent(s) => s.apply(frame, ctx),
            FaultStrategy::Latency(s) => s.apply(frame).await,
            FaultStrategy::RateLimit(s) => match s.check(&ctx.session_id) {
                Ok(()) => Some(frame),
                Err(rejection) => {
                    ctx.rate_limited = Some(rejection);
                    None
                }
            },
        }
    }

    pub fn reset(&self) {
        match self {
            FaultStrategy::Drop(s) => s.reset(),
            FaultStrategy::Delay(s) => s.reset(),
            FaultStrategy::Duplicate(s) => s.reset(),
            FaultStrategy::Reorder(s) => s.reset(),
            FaultStrategy::Corrupt(s) => s.reset(),
            FaultStrategy::Throttle(s) => s.reset(),
            FaultStrategy::Silent(s) => s.reset(),
            FaultStrategy::Latency(s) => s.reset(),
            FaultStrategy::RateLimit(s) => s.reset(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            FaultStrategy::Drop(_) => "drop",
            FaultStrategy::Delay(_) => "delay",
            FaultStrategy::Duplicate(_) => "duplicate",
            FaultStrategy::Reorder(_) => "reorder",
            FaultStrategy::Corrupt(_) => "corrupt",
            FaultStrategy::Throttle(_) => "throttle",
            FaultStrategy::Silent(_) => "silent",
            FaultStrategy::Latency(_) => "latency",
            FaultStrategy::RateLimit(_) => "rate_limit",
        }
    }

    pub fn stats(&self) -> serde_json::Value {
        match self {
            FaultStrategy::Drop(s) => s.stats(),
            FaultStrategy::Delay(s) => s.stats(),
            FaultStrategy::Duplicate(s) => s.stats(),
            FaultStrategy::Reorder(s) => s.stats(),
            FaultStrategy::Corrupt(s) => s.stats(),
            FaultStrategy::Throttle(s) => s.stats(),
            FaultStrategy::Silent(s) => s.stats(),
            FaultStrategy::Latency(s) => s.stats(),
            FaultStrategy::RateLimit(s) => s.stats(),
        }
    }
}

// ─────────────────────────────────────────────────────────
// Drop
// ─────────────────────────────────────────────────────────

/// Consume the frame with probability `p`.
#[derive(Debug, Clone)]
pub struct DropStrategy {
    probability: f64,
    rng: SharedRng,
    dropped: Arc<AtomicU64>,
}

impl DropStrategy {
    pub fn new(probability: f64, rng: SharedRng) -> Self {
        Self {
            probability: probability.clamp(0.0, 1.0),
            rng,
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    fn apply(&self, frame: String) -> Option<String> {
        if self.rng.chance(self.probability) {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            None
        } else {
            Some(frame)
        }
    }

    fn reset(&self) {
        self.dropped.store(0, Ordering::Relaxed);
    }

    pub(crate) fn stats(&self) -> serde_json::Value {
        serde_json::json!({ "dropped_count": self.dropped.load(Ordering::Relaxed) })
    }
}

// ─────────────────────────────────────────────────────────
// Delay
// ─────────────────────────────────────────────────────────

/// Sleep uniform[min, max] milliseconds, then pass through.
#[derive(Debug, Clone)]
pub struct DelayStrategy {
    min_ms: u64,
    max_ms: u64,
    rng: SharedRng,
    delayed: Arc<AtomicU64>,
    total_delay_ms: Arc<AtomicU64>,
}

impl DelayStrategy {
    pub fn new(min_ms: u64, max_ms: u64, rng: SharedRng) -> Self {
        let (min_ms, max_ms) = if min_ms <= max_ms {
            (min_ms, max_ms)
        } else {
            (max_ms, min_ms)
        };
        Self {
            min_ms,
            max_ms,
            rng,
            delayed: Arc::new(AtomicU64::new(0)),
            total_delay_ms: Arc::new(AtomicU64::new(0)),
        }
    }

    async fn apply(&self, frame: String) -> Option<String> {
        let delay_ms = self.rng.range_f64(self.min_ms as f64, self.max_ms as f64);
        self.delayed.fetch_add(1, Ordering::Relaxed);
        self.total_delay_ms
            .fetch_add(delay_ms as u64, Ordering::Relaxed);
        sleep(Duration::from_millis(delay_ms as u64)).await;
        Some(frame)
    }

    fn reset(&self) {
        self.delayed.store(0, Ordering::Relaxed);
        self.total_delay_ms.store(0, Ordering::Relaxed);
    }

    pub(crate) fn stats(&self) -> serde_json::Value {
        let delayed = self.delayed.load(Ordering::Relaxed);
        let total = self.total_delay_ms.load(Ordering::Relaxed);
        serde_json::json!({
            "delayed_count": delayed,
            "total_delay_ms": total,
            "average_delay_ms": if delayed > 0 { total as f64 / delayed as f64 } else { 0.0 },
        })
    }
}

// ─────────────────────────────────────────────────────────
// Duplicate
// ─────────────────────────────────────────────────────────

/// With probability `p`, queue 1..=max_duplicates copies of the frame; queued
/// copies are emitted in place of frames on subsequent invocations.
#[derive(Debug, Clone)]
pub struct DuplicateStrategy {
    probability: f64,
    max_duplicates: usize,
    rng: SharedRng,
    pending: Arc<Mutex<VecDeque<String>>>,
    duplicated: Arc<AtomicU64>,
}

impl DuplicateStrategy {
    pub fn new(probability: f64, max_duplicates: usize, rng: SharedRng) -> Self {
        Self {
            probability: probability.clamp(0.0, 1.0),
            max_duplicates: max_duplicates.max(1),
            rng,
            pending: Arc::new(Mutex::new(VecDeque::new())),
            duplicated: Arc::new(AtomicU64::new(0)),
        }
    }

    fn apply(&self, frame: String) -> Option<String> {
        let mut pending = self.pending.lock().unwrap();
        if let Some(copy) = pending.pop_front() {
            return Some(copy);
        }
        if self.rng.chance(self.probability) {
            let copies = self.rng.range_usize(1, self.max_duplicates);
            self.duplicated.fetch_add(copies as u64, Ordering::Relaxed);
            for _ in 0..copies {
                pending.push_back(frame.clone());
            }
        }
        Some(frame)
    }

    fn reset(&self) {
        self.pending.lock().unwrap().clear();
        self.duplicated.store(0, Ordering::Relaxed);
    }

    pub(crate) fn stats(&self) -> serde_json::Value {
        serde_json::json!({
            "duplicated_count": self.duplicated.load(Ordering::Relaxed),
            "pending_count": self.pending.lock().unwrap().len(),
        })
    }
}

// ─────────────────────────────────────────────────────────
// Reorder
// ─────────────────────────────────────────────────────────

/// Buffer frames until the window fills, then emit one picked at random from
/// the buffer, so the oldest frame is not necessarily first out.
#[derive(Debug, Clone)]
pub struct ReorderStrategy {
    window_size: usize,
    rng: SharedRng,
    buffer: Arc<Mutex<VecDeque<String>>>,
    reordered: Arc<AtomicU64>,
}

impl ReorderStrategy {
    pub fn new(window_size: usize, rng: SharedRng) -> Self {
        Self {
            window_size: window_size.max(2),
            rng,
            buffer: Arc::new(Mutex::new(VecDeque::new())),
            reordered: Arc::new(AtomicU64::new(0)),
        }
    }

    fn apply(&self, frame: String) -> Option<String> {
        let mut buffer = self.buffer.lock().unwrap();
        buffer.push_back(frame);
        if buffer.len() < self.window_size {
            return None;
        }
        let index = self.rng.range_usize(0, buffer.len() - 1);
        if index != 0 {
            self.reordered.fetch_add(1, Ordering::Relaxed);
        }
        buffer.remove(index)
    }

    /// Drain whatever is buffered, in arbitrary order. Called at shutdown;
    /// the drained frames are discarded by the caller.
    pub fn flush(&self) -> Vec<String> {
        self.buffer.lock().unwrap().drain(..).collect()
    }

    fn reset(&self) {
        self.buffer.lock().unwrap().clear();
        self.reordered.store(0, Ordering::Relaxed);
    }

    pub(crate) fn stats(&self) -> serde_json::Value {
        serde_json::json!({
            "reordered_count": self.reordered.load(Ordering::Relaxed),
            "buffered_count": self.buffer.lock().unwrap().len(),
        })
    }
}

// ─────────────────────────────────────────────────────────
// Corrupt
// ─────────────────────────────────────────────────────────

/// With probability `p`, overwrite ⌈len·level⌉ randomly chosen characters
/// with random printable ASCII.
#[derive(Debug, Clone)]
pub struct CorruptStrategy {
    probability: f64,
    corruption_level: f64,
    rng: SharedRng,
    corrupted: Arc<AtomicU64>,
}

impl CorruptStrategy {
    pub fn new(probability: f64, corruption_level: f64, rng: SharedRng) -> Self {
        Self {
            probability: probability.clamp(0.0, 1.0),
            corruption_level: corruption_level.clamp(0.0, 1.0),
            rng,
            corrupted: Arc::new(AtomicU64::new(0)),
        }
    }

    fn apply(&self, frame: String) -> Option<String> {
        if frame.is_empty() || !self.rng.chance(self.probability) {
            return Some(frame);
        }
        self.corrupted.fetch_add(1, Ordering::Relaxed);

        let mut chars: Vec<char> = frame.chars().collect();
        let corruptions = ((chars.len() as f64 * self.corruption_level).ceil() as usize).max(1);
        for _ in 0..corruptions {
            let pos = self.rng.range_usize(0, chars.len() - 1);
            chars[pos] = char::from(self.rng.range_usize(33, 126) as u8);
        }
        Some(chars.into_iter().collect())
    }

    fn reset(&self) {
        self.corrupted.store(0, Ordering::Relaxed);
    }

    pub(crate) fn stats(&self) -> serde_json::Value {
        serde_json::json!({ "corrupted_count": self.corrupted.load(Ordering::Relaxed) })
    }
}

// ─────────────────────────────────────────────────────────
// Throttle
// ─────────────────────────────────────────────────────────

/// Enforce a minimum interval of `1/max_rps` between emissions by sleeping.
#[derive(Debug, Clone)]
pub struct ThrottleStrategy {
    min_interval: Duration,
    last_emit: Arc<Mutex<Option<Instant>>>,
    throttled: Arc<AtomicU64>,
}

impl ThrottleStrategy {
    pub fn new(max_messages_per_second: u32) -> Self {
        let max_rps = max_messages_per_second.max(1);
        Self {
            min_interval: Duration::from_secs_f64(1.0 / max_rps as f64),
            last_emit: Arc::new(Mutex::new(None)),
            throttled: Arc::new(AtomicU64::new(0)),
        }
    }

    async fn apply(&self, frame: String) -> Option<String> {
        let wait = {
            let last = self.last_emit.lock().unwrap();
            match *last {
                Some(t) => self.min_interval.checked_sub(t.elapsed()),
                None => None,
            }
        };
        if let Some(wait) = wait {
            if !wait.is_zero() {
                self.throttled.fetch_add(1, Ordering::Relaxed);
                sleep(wait).await;
            }
        }
        *self.last_emit.lock().unwrap() = Some(Instant::now());
        Some(frame)
    }

    fn reset(&self) {
        *self.last_emit.lock().unwrap() = None;
        self.throttled.store(0, Ordering::Relaxed);
    }

    pub(crate) fn stats(&self) -> serde_json::Value {
        serde_json::json!({ "throttled_count": self.throttled.load(Ordering::Relaxed) })
    }
}

// ─────────────────────────────────────────────────────────
// Silent connection
// ─────────────────────────────────────────────────────────

/// Per session: let the first `after_messages` frames out, then consume
/// everything — PONGs included. The socket stays open, which is exactly what
/// a half-open connection looks like to the peer.
#[derive(Debug, Clone)]
pub struct SilentStrategy {
    enabled: bool,
    after_messages: u64,
    counts: Arc<Mutex<HashMap<String, u64>>>,
    message_count: Arc<AtomicU64>,
    dropped: Arc<AtomicU64>,
}

impl SilentStrategy {
    pub fn new(enabled: bool, after_messages: u64) -> Self {
        Self {
            enabled,
            after_messages,
            counts: Arc::new(Mutex::new(HashMap::new())),
            message_count: Arc::new(AtomicU64::new(0)),
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    fn apply(&self, frame: String, ctx: &FaultContext) -> Option<String> {
        self.message_count.fetch_add(1, Ordering::Relaxed);
        if !self.enabled {
            return Some(frame);
        }
        let mut counts = self.counts.lock().unwrap();
        let count = counts.entry(ctx.session_id.clone()).or_insert(0);
        *count += 1;
        if *count > self.after_messages {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            None
        } else {
            Some(frame)
        }
    }

    fn reset(&self) {
        self.counts.lock().unwrap().clear();
        self.message_count.store(0, Ordering::Relaxed);
        self.dropped.store(0, Ordering::Relaxed);
    }

    pub(crate) fn stats(&self) -> serde_json::Value {
        serde_json::json!({
            "enabled": self.enabled,
            "message_count": self.message_count.load(Ordering::Relaxed),
            "dropped_count": self.dropped.load(Ordering::Relaxed),
        })
    }
}

// ─────────────────────────────────────────────────────────
// Latency simulation
// ─────────────────────────────────────────────────────────

/// Log-normal additional latency in microseconds, applied symmetrically on
/// ingress and egress. `stable` mode: μ=3.8 σ=0.2; `typical`: μ=5.0 σ=0.3.
#[derive(Debug, Clone)]
pub struct LatencyStrategy {
    mu: f64,
    sigma: f64,
    rng: SharedRng,
    applied: Arc<AtomicU64>,
    total_us: Arc<AtomicU64>,
}

impl LatencyStrategy {
    pub fn new(mu: f64, sigma: f64, rng: SharedRng) -> Self {
        Self {
            mu,
            sigma,
            rng,
            applied: Arc::new(AtomicU64::new(0)),
            total_us: Arc::new(AtomicU64::new(0)),
        }
    }

    async fn apply(&self, frame: String) -> Option<String> {
        let micros = self.rng.log_normal(self.mu, self.sigma);
        self.applied.fetch_add(1, Ordering::Relaxed);
        self.total_us.fetch_add(micros as u64, Ordering::Relaxed);
        sleep(Duration::from_micros(micros as u64)).await;
        Some(frame)
    }

    fn reset(&self) {
        self.applied.store(0, Ordering::Relaxed);
        self.total_us.store(0, Ordering::Relaxed);
    }

    pub(crate) fn stats(&self) -> serde_json::Value {
        serde_json::json!({
            "applied_count": self.applied.load(Ordering::Relaxed),
            "total_latency_us": self.total_us.load(Ordering::Relaxed),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::messages::MessageKind;

    fn ctx() -> FaultContext {
        FaultContext::outbound("session-1", MessageKind::MarketData.as_str())
    }

    fn rng() -> SharedRng {
        SharedRng::seeded(99)
    }

    #[tokio::test]
    async fn test_drop_all_and_none() {
        let mut context = ctx();
        let always = FaultStrategy::Drop(DropStrategy::new(1.0, rng()));
        assert_eq!(always.apply("m".into(), &mut context).await, None);

        let never = FaultStrategy::Drop(DropStrategy::new(0.0, rng()));
        assert_eq!(never.apply("m".into(), &mut context).await, Some("m".into()));
        assert_eq!(always.stats()["dropped_count"], 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delay_waits_within_bounds() {
        let mut context = ctx();
        let strategy = FaultStrategy::Delay(DelayStrategy::new(100, 200, rng()));
        let start = Instant::now();
        let result = strategy.apply("m".into(), &mut context).await;
        let elapsed = start.elapsed();
        assert_eq!(result, Some("m".into()));
        assert!(elapsed >= Duration::from_millis(100));
        assert!(elapsed <= Duration::from_millis(250));
    }

    #[tokio::test]
    async fn test_duplicate_emits_copies_on_subsequent_calls() {
        let mut context = ctx();
        let strategy = FaultStrategy::Duplicate(DuplicateStrategy::new(1.0, 1, rng()));
        // First frame passes and queues exactly one copy.
        assert_eq!(strategy.apply("a".into(), &mut context).await, Some("a".into()));
        // The copy replaces the next frame through the strategy.
        assert_eq!(strategy.apply("b".into(), &mut context).await, Some("a".into()));
        assert_eq!(strategy.stats()["duplicated_count"], 1);
    }

    #[tokio::test]
    async fn test_reorder_holds_until_window_full() {
        let mut context = ctx();
        let inner = ReorderStrategy::new(3, rng());
        let strategy = FaultStrategy::Reorder(inner.clone());

        assert_eq!(strategy.apply("1".into(), &mut context).await, None);
        assert_eq!(strategy.apply("2".into(), &mut context).await, None);
        let emitted = strategy.apply("3".into(), &mut context).await.unwrap();
        assert!(["1", "2", "3"].contains(&emitted.as_str()));

        let buffered = inner.flush();
        assert_eq!(buffered.len(), 2);
        assert_eq!(inner.flush().len(), 0);
    }

    #[tokio::test]
    async fn test_corrupt_changes_content_same_length() {
        let mut context = ctx();
        let strategy = FaultStrategy::Corrupt(CorruptStrategy::new(1.0, 0.5, rng()));
        let original = "{\"type\":\"MARKET_DATA\",\"sequence_id\":1}".to_string();
        let corrupted = strategy.apply(original.clone(), &mut context).await.unwrap();
        assert_eq!(corrupted.chars().count(), original.chars().count());
        assert_ne!(corrupted, original);
        assert!(corrupted.chars().all(|c| c.is_ascii()));
    }

    #[tokio::test]
    async fn test_corrupt_passes_empty_frame() {
        let mut context = ctx();
        let strategy = FaultStrategy::Corrupt(CorruptStrategy::new(1.0, 0.5, rng()));
        assert_eq!(strategy.apply(String::new(), &mut context).await, Some(String::new()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_throttle_spaces_emissions() {
        let mut context = ctx();
        let strategy = FaultStrategy::Throttle(ThrottleStrategy::new(10));
        let start = Instant::now();
        strategy.apply("1".into(), &mut context).await;
        strategy.apply("2".into(), &mut context).await;
        strategy.apply("3".into(), &mut context).await;
        // 10 rps → at least 200ms for the second and third frames.
        assert!(start.elapsed() >= Duration::from_millis(200));
        assert_eq!(strategy.stats()["throttled_count"], 2);
    }

    #[tokio::test]
    async fn test_silent_allows_first_n_then_consumes_everything() {
        let mut context = ctx();
        let strategy = FaultStrategy::Silent(SilentStrategy::new(true, 2));

        assert!(strategy.apply("1".into(), &mut context).await.is_some());
        assert!(strategy.apply("2".into(), &mut context).await.is_some());
        assert!(strategy.apply("3".into(), &mut context).await.is_none());
        // PONGs are not exempt.
        let mut pong_ctx = FaultContext::outbound("session-1", MessageKind::Pong.as_str());
        assert!(strategy.apply("pong".into(), &mut pong_ctx).await.is_none());
        assert_eq!(strategy.stats()["dropped_count"], 2);
    }

    #[tokio::test]
    async fn test_silent_is_per_session() {
        let strategy = FaultStrategy::Silent(SilentStrategy::new(true, 1));
        let mut one = FaultContext::outbound("one", "MARKET_DATA");
        let mut two = FaultContext::outbound("two", "MARKET_DATA");

        assert!(strategy.apply("a".into(), &mut one).await.is_some());
        assert!(strategy.apply("b".into(), &mut one).await.is_none());
        // A fresh session still gets its first message.
        assert!(strategy.apply("a".into(), &mut two).await.is_some());
    }

    #[tokio::test]
    async fn test_silent_disabled_passes_but_counts() {
        let mut context = ctx();
        let strategy = FaultStrategy::Silent(SilentStrategy::new(false, 0));
        assert!(strategy.apply("m".into(), &mut context).await.is_some());
        assert_eq!(strategy.stats()["message_count"], 1);
        assert_eq!(strategy.stats()["dropped_count"], 0);
    }

    #[tokio::test]
    async fn test_silent_after_zero_consumes_immediately() {
        let mut context = ctx();
        let strategy = FaultStrategy::Silent(SilentStrategy::new(true, 0));
        assert!(strategy.apply("m".into(), &mut context).await.is_none());
    }

    #[tokio::test]
    async fn test_silent_reset_reopens_session() {
        let mut context = ctx();
        let inner = SilentStrategy::new(true, 1);
        let strategy = FaultStrategy::Silent(inner.clone());
        strategy.apply("a".into(), &mut context).await;
        assert!(strategy.apply("b".into(), &mut context).await.is_none());
        strategy.reset();
        assert!(strategy.apply("c".into(), &mut context).await.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_latency_passes_frame_through() {
        let mut context = ctx();
        let strategy = FaultStrategy::Latency(LatencyStrategy::new(5.0, 0.3, rng()));
        assert_eq!(strategy.apply("m".into(), &mut context).await, Some("m".into()));
        assert_eq!(strategy.stats()["applied_count"], 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_strategy_sets_context() {
        let limiter = Arc::new(RateLimitStrategy::new(
            1,
            10,
            60,
            60,
            super::super::rate_limit::VolumeDetector::default(),
        ));
        let strategy = FaultStrategy::RateLimit(limiter);
        let mut context = FaultContext::inbound("s", "PLACE_ORDER");

        assert!(strategy.apply("a".into(), &mut context).await.is_some());
        assert!(context.rate_limited.is_none());

        assert!(strategy.apply("b".into(), &mut context).await.is_none());
        let rejection = context.rate_limited.as_ref().unwrap();
        assert_eq!(rejection.retry_after, Some(10));
    }
}
