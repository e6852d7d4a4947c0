// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Journal-derived rate limiter for contact submissions.
//!
//! There are no counters of its own. Each check scans the submission journal
//! and counts prior records from the same address (or its anonymized form):
//! 1. within the sliding window (5 per hour default)
//! 2. within the last 24 hours (20 per day default)
//!
//! The scan runs against a wall-clock budget. A failed or slow scan lets the
//! request through rather than rejecting it.

use crate::address::anonymize;
use crate::config::RateLimitConfig;
use crate::record::RateCounts;
use crate::store::{EventStore, StoredLine};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::time::Instant;
use tracing::{debug, warn};

/// Result of a rate limit check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RateLimitResult {
    /// Under both limits
    Allowed {
        counts: RateCounts,
        /// Submissions left in the current window
        remaining: u32,
    },
    /// At or over a limit
    Limited {
        counts: RateCounts,
        reason: RateLimitReason,
    },
    /// Counts could not be established; treated as allowed
    Unavailable { cause: LimiterFailure },
}

impl RateLimitResult {
    /// Observed counts, zero when unavailable.
    pub fn counts(&self) -> RateCounts {
        match self {
            Self::Allowed { counts, .. } | Self::Limited { counts, .. } => *counts,
            Self::Unavailable { .. } => RateCounts::default(),
        }
    }

    pub fn is_limited(&self) -> bool {
        matches!(self, Self::Limited { .. })
    }
}

/// Reason for rate limiting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitReason {
    /// Address reached the per-window maximum
    WindowExceeded,
    /// Address reached the per-day maximum
    DailyExceeded,
}

impl std::fmt::Display for RateLimitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::WindowExceeded => write!(f, "Window rate limit exceeded"),
            Self::DailyExceeded => write!(f, "Daily rate limit exceeded"),
        }
    }
}

/// Why a check failed open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LimiterFailure {
    StoreUnreadable(String),
    ScanBudgetExceeded,
}

impl std::fmt::Display for LimiterFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::StoreUnreadable(e) => write!(f, "store unreadable: {e}"),
            Self::ScanBudgetExceeded => write!(f, "scan budget exceeded"),
        }
    }
}

/// Rate limiter over the submission journal.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    config: RateLimitConfig,
    store: EventStore,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig, store: EventStore) -> Self {
        Self { config, store }
    }

    /// Count prior records for `address` and compare against the limits.
    ///
    /// Only records already in the journal are counted, so the attempt being
    /// decided is never part of its own count.
    pub fn check(&self, address: &str, now: DateTime<Utc>) -> RateLimitResult {
        let counts = match self.scan_counts(address, now) {
            Ok(counts) => counts,
            Err(cause) => {
                warn!(%address, %cause, "Rate limiter unavailable, failing open");
                return RateLimitResult::Unavailable { cause };
            }
        };

        if counts.window_count >= self.config.max_per_window {
            debug!(%address, window_count = counts.window_count, "Window rate limit exceeded");
            RateLimitResult::Limited {
                counts,
                reason: RateLimitReason::WindowExceeded,
            }
        } else if counts.day_count >= self.config.max_per_day {
            debug!(%address, day_count = counts.day_count, "Daily rate limit exceeded");
            RateLimitResult::Limited {
                counts,
                reason: RateLimitReason::DailyExceeded,
            }
        } else {
            RateLimitResult::Allowed {
                counts,
                remaining: self.config.max_per_window - counts.window_count,
            }
        }
    }

    /// Prior-record counts for `address`, zero when the journal cannot be read.
    pub fn counts_for(&self, address: &str, now: DateTime<Utc>) -> RateCounts {
        self.check(address, now).counts()
    }

    fn scan_counts(&self, address: &str, now: DateTime<Utc>) -> Result<RateCounts, LimiterFailure> {
        let deadline = Instant::now() + self.config.scan_budget();
        let anonymized = anonymize(address);
        let window_start = now - ChronoDuration::seconds(self.config.window_secs as i64);
        let day_start = now - ChronoDuration::hours(24);

        let scan = self
            .store
            .scan()
            .map_err(|e| LimiterFailure::StoreUnreadable(e.to_string()))?;

        let mut counts = RateCounts::default();
        for line in scan {
            if Instant::now() >= deadline {
                return Err(LimiterFailure::ScanBudgetExceeded);
            }
            let line = line.map_err(|e| LimiterFailure::StoreUnreadable(e.to_string()))?;
            let StoredLine::Record(record) = line else {
                continue;
            };
            if record.address != address && record.address != anonymized {
                continue;
            }
            if record.timestamp > now {
                continue;
            }
            if record.timestamp > window_start {
                counts.window_count += 1;
            }
            if record.timestamp > day_start {
                counts.day_count += 1;
            }
        }
        Ok(counts)
    }
}
