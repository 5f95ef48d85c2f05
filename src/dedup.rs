use std::collections::{HashMap, VecDeque};

pub const DEFAULT_DEDUP_CAPACITY: usize = 500;

#[derive(Clone, Debug, PartialEq)]
struct SeenLine {
    message: String,
    time_ms: i64,
}

/// Sliding-window duplicate suppression, one bounded window per container key.
///
/// Reconnects re-fetch a short recent window of logs; any line whose
/// `(message, time_ms)` pair was already emitted within the window is dropped.
/// Windows live as long as the buffer itself so suppression spans reconnects.
pub struct DedupBuffer {
    windows: HashMap<String, VecDeque<SeenLine>>,
    capacity: usize,
}

impl DedupBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            windows: HashMap::new(),
            capacity: capacity.max(1),
        }
    }

    /// True if the entry is new; false if it duplicates a recent one.
    /// Accepted entries are recorded, evicting the oldest past capacity.
    pub fn accept(&mut self, key: &str, message: &str, time_ms: i64) -> bool {
        let window = self.windows.entry(key.to_string()).or_default();

        if window
            .iter()
            .any(|seen| seen.time_ms == time_ms && seen.message == message)
        {
            return false;
        }

        if window.len() == self.capacity {
            window.pop_front();
        }
        window.push_back(SeenLine {
            message: message.to_string(),
            time_ms,
        });

        true
    }
}

impl Default for DedupBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_DEDUP_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_pair_is_suppressed() {
        let mut buf = DedupBuffer::default();
        assert!(buf.accept("p.c", "a", 1_000));
        assert!(!buf.accept("p.c", "a", 1_000));
    }

    #[test]
    fn same_message_different_instant_passes() {
        let mut buf = DedupBuffer::default();
        assert!(buf.accept("p.c", "heartbeat", 1_000));
        assert!(buf.accept("p.c", "heartbeat", 2_000));
    }

    #[test]
    fn windows_are_scoped_per_key() {
        let mut buf = DedupBuffer::default();
        assert!(buf.accept("p.c1", "a", 1_000));
        assert!(buf.accept("p.c2", "a", 1_000));
    }

    #[test]
    fn eviction_forgets_the_oldest() {
        let mut buf = DedupBuffer::new(2);
        assert!(buf.accept("k", "a", 1));
        assert!(buf.accept("k", "b", 2));
        assert!(buf.accept("k", "c", 3)); // evicts a
        assert!(buf.accept("k", "a", 1));
        assert!(!buf.accept("k", "c", 3));
    }

    #[test]
    fn missing_timestamps_collide_at_zero() {
        let mut buf = DedupBuffer::default();
        assert!(buf.accept("k", "tick", 0));
        assert!(!buf.accept("k", "tick", 0));
    }

    #[test]
    fn overlap_within_capacity_is_fully_suppressed() {
        let mut buf = DedupBuffer::default();
        for i in 0..400 {
            assert!(buf.accept("k", &format!("line {i}"), i));
        }
        // replayed suffix, as a reconnect would re-fetch
        for i in 300..400 {
            assert!(!buf.accept("k", &format!("line {i}"), i));
        }
    }
}
