//! Cache Item and Clock
//!
//! A [`CacheItem`] is logically gone once `now - created_at > ttl`. Time is read
//! through the [`Clock`] trait so expiry can be driven by simulated time.

use std::fmt::Debug;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde_json::Value;

// =============================================================================
// Clock
// =============================================================================

/// Source of "now" for expiry decisions
pub trait Clock: Send + Sync + Debug {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually advanced clock for simulated time
#[derive(Debug)]
pub struct ManualClock {
    now: RwLock<DateTime<Utc>>,
}

impl ManualClock {
    /// Start at the current wall-clock time
    pub fn new() -> Self {
        Self::starting_at(Utc::now())
    }

    /// Start at a fixed instant
    pub fn starting_at(start: DateTime<Utc>) -> Self {
        Self {
            now: RwLock::new(start),
        }
    }

    /// Move time forward
    pub fn advance(&self, by: Duration) {
        let delta = chrono::Duration::from_std(by).unwrap_or(chrono::Duration::MAX);
        let mut now = self.now.write();
        *now += delta;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.read()
    }
}

// =============================================================================
// Cache Item
// =============================================================================

/// A stored value with its timestamps and optional time-to-live
#[derive(Debug, Clone, PartialEq)]
pub struct CacheItem {
    pub key: String,
    pub value: Value,
    pub created_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
    /// `None` never expires
    pub ttl: Option<Duration>,
}

impl CacheItem {
    /// Create an item written at `now`
    pub fn new(key: impl Into<String>, value: Value, ttl: Option<Duration>, now: DateTime<Utc>) -> Self {
        Self {
            key: key.into(),
            value,
            created_at: now,
            last_accessed: now,
            ttl,
        }
    }

    /// Time elapsed since the item was written (zero if the clock went backwards)
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        (now - self.created_at).to_std().unwrap_or(Duration::ZERO)
    }

    /// Check if the item has expired at `now`
    #[inline]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        match self.ttl {
            Some(ttl) => self.age(now) > ttl,
            None => false,
        }
    }

    /// TTL left at `now`; `None` for items that never expire
    pub fn remaining_ttl(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.ttl.map(|ttl| ttl.saturating_sub(self.age(now)))
    }

    /// Approximate payload size, used for store statistics
    pub fn size_hint(&self) -> usize {
        self.key.len() + self.value.to_string().len()
    }
}

// =============================================================================
// Tests
// =============================================================================
