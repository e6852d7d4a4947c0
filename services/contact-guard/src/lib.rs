// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Contact Guard
//!
//! Abuse prevention for a public contact form:
//!
//! - Rule-based spam scoring (0-100) with a configurable block threshold
//! - IP blocklist and whitelist with CIDR ranges and expiring blocks
//! - Rate limiting derived from the submission journal
//! - Append-only journals with rotation and compressed archives
//! - Address anonymization after a retention window, with an audit trail
//! - Daily reports, statistics and trends
//!
//! [`ContactGuard`] composes everything; the HTTP service and `guardctl`
//! are thin adapters over it.

pub mod address;
pub mod blocklist;
pub mod config;
pub mod error;
pub mod guard;
pub mod handlers;
pub mod journal;
pub mod limiter;
pub mod metrics;
pub mod record;
pub mod report;
pub mod retention;
pub mod scorer;
pub mod store;

pub use address::{AddressTarget, CidrRange};
pub use blocklist::BlocklistStore;
pub use config::Config;
pub use error::{ConfigError, GuardError, ValidationError};
pub use guard::{AdminOutcome, BlockDuration, ContactGuard, SubmissionRequest, Verdict};
pub use limiter::{RateLimitResult, RateLimiter};
pub use record::{Decision, SubmissionRecord};
pub use retention::{RetentionJob, RetentionSummary};
pub use scorer::{ReasonCode, SpamScorer};
pub use store::EventStore;
