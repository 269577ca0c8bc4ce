// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Clock abstraction for testable time handling.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// A clock that provides the current wall time.
///
/// Every component that stamps a record with `now()` takes a `Clock` instead
/// of calling `Utc::now()` directly, so scenarios like "a lease that expired
/// five hours ago" (reaper tests) don't need real sleeps.
pub trait Clock: Clone + Send + Sync {
    fn now_utc(&self) -> DateTime<Utc>;

    fn epoch_ms(&self) -> u64 {
        self.now_utc().timestamp_millis().max(0) as u64
    }

    /// ISO-8601 UTC timestamp with second precision and a literal `Z`
    /// suffix, matching `mcp/server.py::utc_now()`.
    fn now_iso(&self) -> String {
        self.now_utc().format("%Y-%m-%dT%H:%M:%SZ").to_string()
    }

    /// Compact timestamp used inside generated ids: `YYYYMMDDTHHMMSSZ`.
    fn now_compact(&self) -> String {
        self.now_utc().format("%Y%m%dT%H%M%SZ").to_string()
    }
}

/// Real system clock.
#[derive(Clone, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_utc(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Fake clock for testing with controllable time.
#[derive(Clone)]
pub struct FakeClock {
    epoch_ms: Arc<Mutex<i64>>,
}

impl FakeClock {
    pub fn new() -> Self {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO)
            .as_millis() as i64;
        Self { epoch_ms: Arc::new(Mutex::new(now)) }
    }

    pub fn at(epoch_ms: i64) -> Self {
        Self { epoch_ms: Arc::new(Mutex::new(epoch_ms)) }
    }

    pub fn advance(&self, duration: Duration) {
        *self.epoch_ms.lock() += duration.as_millis() as i64;
    }

    pub fn set_epoch_ms(&self, ms: i64) {
        *self.epoch_ms.lock() = ms;
    }
}

impl Default for FakeClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for FakeClock {
    fn now_utc(&self) -> DateTime<Utc> {
        let ms = *self.epoch_ms.lock();
        DateTime::from_timestamp_millis(ms).unwrap_or_else(Utc::now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fake_clock_advances() {
        let clock = FakeClock::at(0);
        assert_eq!(clock.now_iso(), "1970-01-01T00:00:00Z");
        clock.advance(Duration::from_secs(3661));
        assert_eq!(clock.now_iso(), "1970-01-01T01:01:01Z");
    }

    #[test]
    fn compact_format_has_no_separators() {
        let clock = FakeClock::at(0);
        assert_eq!(clock.now_compact(), "19700101T000000Z");
    }
}
