//! Per-session rate limiting with escalating penalties.
//!
//! A sliding one-second window of request timestamps gates admission; the
//! limit is `max(1, ⌊baseline_rps · volume_multiplier⌋)`. Violations inside
//! `violation_window` escalate: first → `wait_period` ban, second →
//! `second_violation_ban`, third → permanent ban. Time comes from
//! `tokio::time::Instant` so the ladder is testable under a paused clock.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

use tokio::time::{Duration, Instant};

/// Scales the admission limit down during simulated high-volume periods.
#[derive(Debug)]
pub enum VolumeDetector {
    /// Fixed multiplier, toggled externally. Normal periods report 1.0.
    Hardcoded {
        high_volume: AtomicBool,
        multiplier: f64,
    },
}

impl VolumeDetector {
    pub fn hardcoded(high_volume: bool, multiplier: f64) -> Self {
        VolumeDetector::Hardcoded {
            high_volume: AtomicBool::new(high_volume),
            multiplier,
        }
    }

    pub fn is_high_volume(&self) -> bool {
        match self {
            VolumeDetector::Hardcoded { high_volume, .. } => high_volume.load(Ordering::Relaxed),
        }
    }

    pub fn volume_multiplier(&self) -> f64 {
        match self {
            VolumeDetector::Hardcoded {
                high_volume,
                multiplier,
            } => {
                if high_volume.load(Ordering::Relaxed) {
                    *multiplier
                } else {
                    1.0
                }
            }
        }
    }

    pub fn set_high_volume(&self, value: bool) {
        match self {
            VolumeDetector::Hardcoded { high_volume, .. } => {
                high_volume.store(value, Ordering::Relaxed)
            }
        }
    }
}

impl Default for VolumeDetector {
    fn default() -> Self {
        VolumeDetector::hardcoded(false, 0.5)
    }
}

/// Structured rejection surfaced as 429 (request API) or an ERROR frame
/// (streaming). Permanent bans carry no `retry_after`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitRejection {
    pub message: String,
    pub retry_after: Option<u64>,
    pub violation_count: usize,
    pub permanent: bool,
}

#[derive(Debug, Default)]
struct LimiterState {
    requests: HashMap<String, VecDeque<Instant>>,
    violations: HashMap<String, Vec<Instant>>,
    bans: HashMap<String, Instant>,
    permanent_bans: HashSet<String>,
}

#[derive(Debug)]
pub struct RateLimitStrategy {
    baseline_rps: u32,
    wait_period: Duration,
    second_violation_ban: Duration,
    violation_window: Duration,
    volume_detector: VolumeDetector,
    state: Mutex<LimiterState>,
    rate_limited_count: AtomicU64,
}

impl RateLimitStrategy {
    pub fn new(
        baseline_rps: u32,
        wait_period_seconds: u64,
        second_violation_ban_seconds: u64,
        violation_window_seconds: u64,
        volume_detector: VolumeDetector,
    ) -> Self {
        Self {
            baseline_rps: baseline_rps.max(1),
            wait_period: Duration::from_secs(wait_period_seconds),
            second_violation_ban: Duration::from_secs(second_violation_ban_seconds),
            violation_window: Duration::from_secs(violation_window_seconds),
            volume_detector,
            state: Mutex::new(LimiterState::default()),
            rate_limited_count: AtomicU64::new(0),
        }
    }

    pub fn volume_detector(&self) -> &VolumeDetector {
        &self.volume_detector
    }

    pub fn current_limit(&self) -> u32 {
        let scaled = (self.baseline_rps as f64 * self.volume_detector.volume_multiplier()) as u32;
        scaled.max(1)
    }

    /// Admit or reject one request for `session_id`, recording it on success.
    pub fn check(&self, session_id: &str) -> Result<(), RateLimitRejection> {
        let now = Instant::now();
        let mut state = self.state.lock().unwrap();

        if state.permanent_bans.contains(session_id) {
            self.rate_limited_count.fetch_add(1, Ordering::Relaxed);
            return Err(self.permanent_rejection(&state, session_id));
        }

        if let Some(expiry) = state.bans.get(session_id).copied() {
            if expiry > now {
                self.rate_limited_count.fetch_add(1, Ordering::Relaxed);
                let remaining = expiry.duration_since(now).as_secs() + 1;
                let violation_count = state
                    .violations
                    .get(session_id)
                    .map(Vec::len)
                    .unwrap_or(0);
                return Err(RateLimitRejection {
                    message: "Rate limit exceeded. Account temporarily banned".to_string(),
                    retry_after: Some(remaining),
                    violation_count,
                    permanent: false,
                });
            }
            state.bans.remove(session_id);
        }

        let limit = self.current_limit() as usize;
        let window_start = now.checked_sub(Duration::from_secs(1)).unwrap_or(now);
        let timestamps = state.requests.entry(session_id.to_string()).or_default();
        while timestamps.front().map_or(false, |t| *t < window_start) {
            timestamps.pop_front();
        }

        if timestamps.len() >= limit {
            self.rate_limited_count.fetch_add(1, Ordering::Relaxed);
            return Err(self.record_violation(&mut state, session_id, now));
        }

        timestamps.push_back(now);
        Ok(())
    }

    fn record_violation(
        &self,
        state: &mut LimiterState,
        session_id: &str,
        now: Instant,
    ) -> RateLimitRejection {
        let violations = state.violations.entry(session_id.to_string()).or_default();
        violations.push(now);
        let window_start = now.checked_sub(self.violation_window).unwrap_or(now);
        violations.retain(|v| *v > window_start);
        let violation_count = violations.len();

        if violation_count >= 3 {
            state.permanent_bans.insert(session_id.to_string());
            self.permanent_rejection(state, session_id)
        } else if violation_count == 2 {
            state
                .bans
                .insert(session_id.to_string(), now + self.second_violation_ban);
            RateLimitRejection {
                message: "Rate limit exceeded. Account temporarily banned".to_string(),
                retry_after: Some(self.second_violation_ban.as_secs()),
                violation_count,
                permanent: false,
            }
        } else {
            state
                .bans
                .insert(session_id.to_string(), now + self.wait_period);
            RateLimitRejection {
                message: "Rate limit exceeded".to_string(),
                retry_after: Some(self.wait_period.as_secs()),
                violation_count,
                permanent: false,
            }
        }
    }

    fn permanent_rejection(&self, state: &LimiterState, session_id: &str) -> RateLimitRejection {
        RateLimitRejection {
            message: "Account permanently banned due to repeated rate limit violations"
                .to_string(),
            retry_after: None,
            violation_count: state
                .violations
                .get(session_id)
                .map(Vec::len)
                .unwrap_or(0),
            permanent: true,
        }
    }

    pub fn violation_count(&self, session_id: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .violations
            .get(session_id)
            .map(Vec::len)
            .unwrap_or(0)
    }

    pub fn is_permanently_banned(&self, session_id: &str) -> bool {
        self.state
            .lock()
            .unwrap()
            .permanent_bans
            .contains(session_id)
    }

    pub fn rate_limited_count(&self) -> u64 {
        self.rate_limited_count.load(Ordering::Relaxed)
    }

    pub fn reset(&self) {
        let mut state = self.state.lock().unwrap();
        state.requests.clear();
        state.violations.clear();
        state.bans.clear();
        state.permanent_bans.clear();
        self.rate_limited_count.store(0, Ordering::Relaxed);
    }

    pub fn stats(&self) -> serde_json::Value {
        let state = self.state.lock().unwrap();
        serde_json::json!({
            "rate_limited_count": self.rate_limited_count.load(Ordering::Relaxed),
            "banned_sessions": state.bans.len() + state.permanent_bans.len(),
            "permanent_bans": state.permanent_bans.len(),
        })
    }
}

impl Default for RateLimitStrategy {
    fn default() -> Self {
        Self::new(10, 10, 60, 60, VolumeDetector::default())
    }
}
