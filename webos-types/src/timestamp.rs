//! Millisecond timestamps with a tie-breaking sequence counter.
//!
//! State history and message ordering need a strictly increasing clock even
//! when several mutations land in the same millisecond. `tick` gives that:
//! it advances to wall time when wall time has moved on, and bumps the
//! sequence otherwise.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::time::{SystemTime, UNIX_EPOCH};

/// A wall-clock timestamp in milliseconds plus a sequence for ties.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Timestamp {
    /// Milliseconds since Unix epoch.
    millis: u64,
    /// Orders events recorded within the same millisecond.
    seq: u32,
}

fn wall_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

impl Timestamp {
    /// Creates a timestamp at the current wall time.
    #[must_use]
    pub fn now() -> Self {
        Self {
            millis: wall_millis(),
            seq: 0,
        }
    }

    #[must_use]
    pub const fn new(millis: u64, seq: u32) -> Self {
        Self { millis, seq }
    }

    #[must_use]
    pub const fn millis(&self) -> u64 {
        self.millis
    }

    #[must_use]
    pub const fn seq(&self) -> u32 {
        self.seq
    }

    /// Returns the next timestamp, strictly greater than `self` unless
    /// `self` is already the maximum representable value.
    ///
    /// An exhausted sequence carries into the next millisecond.
    #[must_use]
    pub fn tick(&self) -> Self {
        let now = wall_millis();
        if now > self.millis {
            return Self { millis: now, seq: 0 };
        }
        match self.seq.checked_add(1) {
            Some(seq) => Self {
                millis: self.millis,
                seq,
            },
            None => Self {
                millis: self.millis.saturating_add(1),
                seq: if self.millis == u64::MAX { u32::MAX } else { 0 },
            },
        }
    }
}

impl Default for Timestamp {
    fn default() -> Self {
        Self::now()
    }
}

impl PartialOrd for Timestamp {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Timestamp {
    fn cmp(&self, other: &Self) -> Ordering {
        self.millis
            .cmp(&other.millis)
            .then_with(|| self.seq.cmp(&other.seq))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tick_is_strictly_increasing() {
        let mut ts = Timestamp::now();
        for _ in 0..1000 {
            let next = ts.tick();
            assert!(next > ts);
            ts = next;
        }
    }

    #[test]
    fn tick_carries_exhausted_seq_into_next_millisecond() {
        let ts = Timestamp::new(u64::MAX - 1, u32::MAX);
        let next = ts.tick();
        assert!(next > ts);
        assert_eq!(next, Timestamp::new(u64::MAX, 0));
    }

    #[test]
    fn tick_from_future_bumps_seq() {
        let future = Timestamp::new(u64::MAX - 1, 3);
        let next = future.tick();
        assert_eq!(next.millis(), u64::MAX - 1);
        assert_eq!(next.seq(), 4);
    }
}
