//! Media clock used to stamp produced frames

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use super::types::Timestamp;

/// Media clock for frame timestamps
///
/// All timestamps are relative to a base `Instant` taken when the clock is
/// created. The clock is cheap to clone; clones share base and sequence
/// counter.
#[derive(Clone)]
pub struct MediaClock {
    base: Instant,
    sequence: Arc<AtomicU64>,
}

impl MediaClock {
    /// Create a new media clock starting now
    pub fn new() -> Self {
        Self {
            base: Instant::now(),
            sequence: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Current timestamp
    pub fn now(&self) -> Timestamp {
        Timestamp::from_micros(self.base.elapsed().as_micros() as i64)
    }

    /// Next frame sequence number, starting at zero
    pub fn next_sequence(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for MediaClock {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MediaClock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaClock")
            .field("elapsed", &self.base.elapsed())
            .field("sequence", &self.sequence.load(Ordering::Relaxed))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_clock_basic() {
        let clock = MediaClock::new();
        thread::sleep(Duration::from_millis(10));

        let ts = clock.now();
        assert!(ts.micros >= 10_000);
    }

    #[test]
    fn test_sequence_shared_between_clones() {
        let clock = MediaClock::new();
        let clone = clock.clone();

        assert_eq!(clock.next_sequence(), 0);
        assert_eq!(clone.next_sequence(), 1);
        assert_eq!(clock.next_sequence(), 2);
    }
}
