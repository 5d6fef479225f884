// crates/cmo-core/src/core/time.rs
// ============================================================================
// Module: Time
// Description: Timestamp representation and the deterministic virtual clock.
// Purpose: Keep replay deterministic by never reading wall-clock time inside
//          the executor; all timestamps are explicit values carried on
//          records or produced by the activity boundary's virtual clock.
// Dependencies: serde, time
// ============================================================================

//! ## Overview
//! The executor never calls `SystemTime::now()` directly. A run's virtual
//! clock starts at the run's `startedAt` timestamp and advances by a fixed
//! increment each time a node requests `now()` through the activity
//! boundary, so RECORD and REPLAY produce identical timestamps for identical
//! step sequences.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;

// ============================================================================
// SECTION: Timestamp
// ============================================================================

/// A point in time, either a real wall-clock instant or a logical tick.
///
/// # Invariants
/// - `UnixMillis` values are milliseconds since the Unix epoch and may be
///   negative only for dates before 1970.
/// - `Logical` values are monotonically non-decreasing within a single run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Timestamp {
    /// Milliseconds since the Unix epoch.
    UnixMillis(i64),
    /// An engine-assigned logical tick, used when no wall-clock value is
    /// meaningful (e.g. in purely synthetic test runs).
    Logical(u64),
}

impl Timestamp {
    /// Returns the Unix-milliseconds value, if this is that variant.
    #[must_use]
    pub const fn as_unix_millis(self) -> Option<i64> {
        match self {
            Self::UnixMillis(value) => Some(value),
            Self::Logical(_) => None,
        }
    }

    /// Returns the logical-tick value, if this is that variant.
    #[must_use]
    pub const fn as_logical(self) -> Option<u64> {
        match self {
            Self::Logical(value) => Some(value),
            Self::UnixMillis(_) => None,
        }
    }
}

// ============================================================================
// SECTION: Virtual Clock
// ============================================================================

/// Default increment, in milliseconds, applied to the virtual clock each
/// time a node requests the current time through the activity boundary.
///
/// A fixed, non-zero increment guarantees successive `now()` calls within a
/// run are strictly increasing without reading real wall-clock time, so
/// REPLAY reproduces the exact sequence RECORD observed.
pub const DEFAULT_VIRTUAL_CLOCK_INCREMENT_MILLIS: i64 = 1;

/// A deterministic, monotonically increasing clock seeded from a run's
/// start time.
///
/// # Invariants
/// - `tick()` always returns a timestamp strictly greater than the previous
///   tick's result.
/// - Given the same starting timestamp and increment, repeated construction
///   and ticking yields an identical sequence of values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VirtualClock {
    /// The next value `tick()` will return.
    next_millis: i64,
    /// Amount to advance after each `tick()`.
    increment_millis: i64,
}

impl VirtualClock {
    /// Creates a clock seeded at `start`, advancing by
    /// [`DEFAULT_VIRTUAL_CLOCK_INCREMENT_MILLIS`] on each tick.
    #[must_use]
    pub const fn new(start: Timestamp) -> Self {
        Self::with_increment(start, DEFAULT_VIRTUAL_CLOCK_INCREMENT_MILLIS)
    }

    /// Creates a clock seeded at `start`, advancing by `increment_millis`
    /// on each tick.
    #[must_use]
    pub const fn with_increment(start: Timestamp, increment_millis: i64) -> Self {
        let next_millis = match start {
            Timestamp::UnixMillis(value) => value,
            Timestamp::Logical(value) => value as i64,
        };
        Self {
            next_millis,
            increment_millis,
        }
    }

    /// Returns the next timestamp in sequence and advances the clock.
    #[must_use]
    pub fn tick(&mut self) -> Timestamp {
        let value = self.next_millis;
        self.next_millis = self.next_millis.saturating_add(self.increment_millis);
        Timestamp::UnixMillis(value)
    }

    /// Returns the timestamp that would be produced by the next `tick()`
    /// without advancing the clock.
    #[must_use]
    pub const fn peek(&self) -> Timestamp {
        Timestamp::UnixMillis(self.next_millis)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, reason = "test-only assertions")]
mod tests {
    use super::DEFAULT_VIRTUAL_CLOCK_INCREMENT_MILLIS;
    use super::Timestamp;
    use super::VirtualClock;

    #[test]
    fn ticks_are_strictly_increasing() {
        let mut clock = VirtualClock::new(Timestamp::UnixMillis(1_000));
        let first = clock.tick();
        let second = clock.tick();
        assert!(second.as_unix_millis().unwrap() > first.as_unix_millis().unwrap());
    }

    #[test]
    fn default_increment_is_deterministic_across_instances() {
        let mut clock_a = VirtualClock::new(Timestamp::UnixMillis(0));
        let mut clock_b = VirtualClock::new(Timestamp::UnixMillis(0));
        for _ in 0..5 {
            assert_eq!(clock_a.tick(), clock_b.tick());
        }
    }

    #[test]
    fn peek_does_not_advance() {
        let clock = VirtualClock::new(Timestamp::UnixMillis(42));
        assert_eq!(clock.peek(), clock.peek());
    }

    #[test]
    fn custom_increment_is_respected() {
        let mut clock = VirtualClock::with_increment(Timestamp::UnixMillis(0), 100);
        let first = clock.tick();
        let second = clock.tick();
        assert_eq!(
            second.as_unix_millis().unwrap() - first.as_unix_millis().unwrap(),
            100
        );
    }

    #[test]
    fn logical_timestamp_round_trips() {
        let ts = Timestamp::Logical(7);
        assert_eq!(ts.as_logical(), Some(7));
        assert_eq!(ts.as_unix_millis(), None);
    }

    #[test]
    fn default_increment_constant_is_nonzero() {
        assert!(DEFAULT_VIRTUAL_CLOCK_INCREMENT_MILLIS > 0);
    }
}
