//! Sequence-id tracking for gap detection.

use std::collections::HashMap;
use std::sync::Mutex;

/// Inclusive range of sequence ids the client failed to observe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Gap {
    pub channel: String,
    pub symbol: String,
    pub start_seq: u64,
    pub end_seq: u64,
}

impl std::fmt::Display for Gap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Gap({}:{} seq={}..{})",
            self.channel, self.symbol, self.start_seq, self.end_seq
        )
    }
}

/// Next expected id per `(channel, symbol)`, starting at 1.
///
/// `seq == expected` advances; `seq < expected` is a duplicate or stale frame
/// and is ignored; `seq > expected` reports `[expected, seq−1]` and resumes
/// after the observed id.
#[derive(Debug, Default)]
pub struct SequenceTracker {
    expected: Mutex<HashMap<(String, String), u64>>,
}

impl SequenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&self, channel: &str, symbol: &str, sequence_id: u64) -> Option<Gap> {
        let mut expected = self.expected.lock().unwrap();
        let key = (channel.to_string(), symbol.to_string());
        let want = expected.get(&key).copied().unwrap_or(1);

        if sequence_id < want {
            return None;
        }
        let gap = (sequence_id > want).then(|| Gap {
            channel: channel.to_string(),
            symbol: symbol.to_string(),
            start_seq: want,
            end_seq: sequence_id - 1,
        });
        expected.insert(key, sequence_id + 1);
        gap
    }

    pub fn expected(&self, channel: &str, symbol: &str) -> u64 {
        self.expected
            .lock()
            .unwrap()
            .get(&(channel.to_string(), symbol.to_string()))
            .copied()
            .unwrap_or(1)
    }

    pub fn reset(&self, channel: &str, symbol: &str) {
        self.expected
            .lock()
            .unwrap()
            .remove(&(channel.to_string(), symbol.to_string()));
    }

    pub fn reset_all(&self) {
        self.expected.lock().unwrap().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_order_feed_has_no_gaps() {
        let tracker = SequenceTracker::new();
        for seq in [1, 2, 3, 4] {
            assert_eq!(tracker.update("TICKER", "BTC/USD", seq), None);
        }
        assert_eq!(tracker.expected("TICKER", "BTC/USD"), 5);
    }

    #[test]
    fn test_skip_reports_gap() {
        let tracker = SequenceTracker::new();
        tracker.update("TICKER", "BTC/USD", 1);
        tracker.update("TICKER", "BTC/USD", 2);
        let gap = tracker.update("TICKER", "BTC/USD", 4).unwrap();
        assert_eq!((gap.start_seq, gap.end_seq), (3, 3));
        assert_eq!(tracker.expected("TICKER", "BTC/USD"), 5);
    }

    #[test]
    fn test_late_frame_is_ignored_after_gap() {
        let tracker = SequenceTracker::new();
        tracker.update("TICKER", "BTC/USD", 1);
        let gap = tracker.update("TICKER", "BTC/USD", 3).unwrap();
        assert_eq!((gap.start_seq, gap.end_seq), (2, 2));
        // The late 2 arrives after we already skipped past it.
        assert_eq!(tracker.update("TICKER", "BTC/USD", 2), None);
        assert_eq!(tracker.expected("TICKER", "BTC/USD"), 4);
    }

    #[test]
    fn test_first_observed_id_may_gap_from_one() {
        let tracker = SequenceTracker::new();
        let gap = tracker.update("TICKER", "BTC/USD", 5).unwrap();
        assert_eq!((gap.start_seq, gap.end_seq), (1, 4));
    }

    #[test]
    fn test_pairs_are_independent() {
        let tracker = SequenceTracker::new();
        tracker.update("TICKER", "BTC/USD", 1);
        assert_eq!(tracker.update("TICKER", "ETH/USD", 1), None);
        assert_eq!(tracker.update("TRADES", "BTC/USD", 1), None);
    }

    #[test]
    fn test_reset() {
        let tracker = SequenceTracker::new();
        tracker.update("TICKER", "BTC/USD", 7);
        tracker.reset("TICKER", "BTC/USD");
        assert_eq!(tracker.expected("TICKER", "BTC/USD"), 1);
    }
}
