//! Heartbeat health tracking.
//!
//! The network manager sends `PING{request_id}` every interval and feeds
//! PONGs back here. A ping whose PONG does not arrive within the timeout
//! marks the connection unhealthy; a PONG for any outstanding ping restores
//! health. Timeout checks are armed per ping by the owner (one sleep task
//! each), so the monitor itself holds no background task.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::time::{Duration, Instant};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct HeartbeatMonitor {
    timeout: Duration,
    pending: Arc<Mutex<HashMap<String, Instant>>>,
    healthy: Arc<AtomicBool>,
}

impl HeartbeatMonitor {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            pending: Arc::new(Mutex::new(HashMap::new())),
            healthy: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Register an outgoing ping; returns its request id.
    pub fn ping_sent(&self) -> String {
        let request_id = Uuid::new_v4().to_string();
        self.pending
            .lock()
            .unwrap()
            .insert(request_id.clone(), Instant::now());
        request_id
    }

    /// A PONG for any outstanding ping restores health. Returns true when
    /// health flipped from unhealthy to healthy.
    pub fn pong_received(&self, request_id: &str) -> bool {
        let known = self.pending.lock().unwrap().remove(request_id).is_some();
        if known {
            return !self.healthy.swap(true, Ordering::SeqCst);
        }
        false
    }

    /// Expire one ping after its timeout. Returns true when this flipped the
    /// connection to unhealthy.
    pub fn expire(&self, request_id: &str) -> bool {
        let expired = self.pending.lock().unwrap().remove(request_id).is_some();
        if expired {
            return self.healthy.swap(false, Ordering::SeqCst);
        }
        false
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::SeqCst)
    }

    /// Forget outstanding pings (connection torn down or replaced).
    pub fn reset(&self) {
        self.pending.lock().unwrap().clear();
        self.healthy.store(true, Ordering::SeqCst);
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().unwrap().len()
    }
}
