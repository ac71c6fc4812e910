//! Streaming session registry and fan-out.
//!
//! Each connection owns a bounded outbound queue drained by its writer task;
//! enqueueing never blocks the caller. A full queue drops the frame (counted)
//! so one slow peer cannot stall the market-data producer or its neighbors.
//! Transport-level failures are treated as "session gone".

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use super::messages::MessageKind;

/// Outbound queue capacity per session.
pub const OUTBOUND_QUEUE_CAPACITY: usize = 256;

/// A frame (or control message) bound for one peer. Frames are shared so a
/// ticker serialized once can be enqueued to every subscriber.
#[derive(Debug, Clone)]
pub enum Outbound {
    Frame { payload: Arc<str>, kind: MessageKind },
    Close { code: u16, reason: String },
}

#[derive(Debug)]
struct SessionEntry {
    tx: mpsc::Sender<Outbound>,
    connected_at: DateTime<Utc>,
    last_activity: DateTime<Utc>,
    subscriptions: HashSet<String>,
}

#[derive(Debug, Clone)]
pub struct SessionInfo {
    pub session_id: String,
    pub connected_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub subscriptions: HashSet<String>,
}

#[derive(Debug, Default)]
pub struct ConnectionManager {
    sessions: Mutex<HashMap<String, SessionEntry>>,
    dropped_frames: AtomicU64,
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection; returns the server-assigned session id.
    pub fn add(&self, tx: mpsc::Sender<Outbound>) -> String {
        let session_id = Uuid::new_v4().to_string();
        let now = Utc::now();
        self.sessions.lock().unwrap().insert(
            session_id.clone(),
            SessionEntry {
                tx,
                connected_at: now,
                last_activity: now,
                subscriptions: HashSet::new(),
            },
        );
        session_id
    }

    pub fn remove(&self, session_id: &str) {
        self.sessions.lock().unwrap().remove(session_id);
    }

    pub fn session(&self, session_id: &str) -> Option<SessionInfo> {
        self.sessions
            .lock()
            .unwrap()
            .get(session_id)
            .map(|entry| SessionInfo {
                session_id: session_id.to_string(),
                connected_at: entry.connected_at,
                last_activity: entry.last_activity,
                subscriptions: entry.subscriptions.clone(),
            })
    }

    pub fn touch(&self, session_id: &str) {
        if let Some(entry) = self.sessions.lock().unwrap().get_mut(session_id) {
            entry.last_activity = Utc::now();
        }
    }

    /// Duplicate subscribes are idempotent.
    pub fn subscribe(&self, session_id: &str, channel_key: &str) -> bool {
        match self.sessions.lock().unwrap().get_mut(session_id) {
            Some(entry) => {
                entry.subscriptions.insert(channel_key.to_string());
                true
            }
            None => false,
        }
    }

    pub fn unsubscribe(&self, session_id: &str, channel_key: &str) -> bool {
        match self.sessions.lock().unwrap().get_mut(session_id) {
            Some(entry) => {
                entry.subscriptions.remove(channel_key);
                true
            }
            None => false,
        }
    }

    pub fn subscribers(&self, channel_key: &str) -> Vec<String> {
        self.sessions
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, entry)| entry.subscriptions.contains(channel_key))
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Enqueue one frame for one session. False when the session is gone or
    /// its queue is full (frame dropped, counted).
    pub fn send(&self, session_id: &str, payload: Arc<str>, kind: MessageKind) -> bool {
        let tx = match self.sessions.lock().unwrap().get(session_id) {
            Some(entry) => entry.tx.clone(),
            None => return false,
        };
        match tx.try_send(Outbound::Frame { payload, kind }) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.dropped_frames.fetch_add(1, Ordering::Relaxed);
                debug!(session_id, "outbound queue full, frame dropped");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    pub fn broadcast(&self, payload: Arc<str>, kind: MessageKind, exclude: Option<&str>) -> usize {
        let ids: Vec<String> = {
            let sessions = self.sessions.lock().unwrap();
            sessions
                .keys()
                .filter(|id| exclude.map_or(true, |ex| ex != id.as_str()))
                .cloned()
                .collect()
        };
        ids.into_iter()
            .filter(|id| self.send(id, payload.clone(), kind))
            .count()
    }

    pub fn broadcast_channel(&self, channel_key: &str, payload: Arc<str>, kind: MessageKind) -> usize {
        self.subscribers(channel_key)
            .into_iter()
            .filter(|id| self.send(id, payload.clone(), kind))
            .count()
    }

    pub fn close(&self, session_id: &str, code: u16, reason: &str) {
        let tx = match self.sessions.lock().unwrap().get(session_id) {
            Some(entry) => entry.tx.clone(),
            None => return,
        };
        let _ = tx.try_send(Outbound::Close {
            code,
            reason: reason.to_string(),
        });
        self.remove(session_id);
    }

    pub fn close_all(&self, code: u16, reason: &str) {
        let ids: Vec<String> = self.sessions.lock().unwrap().keys().cloned().collect();
        for id in ids {
            self.close(&id, code, reason);
        }
    }

    pub fn session_count(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }

    pub fn dropped_frames(&self) -> u64 {
        self.dropped_frames.load(Ordering::Relaxed)
    }
}
