// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! The decision facade.
//!
//! `ContactGuard` is the single entry point used by the HTTP service and the
//! operator CLI. A submission is decided in this order:
//!
//! 1. Whitelist/blocklist lookup (a block short-circuits scoring)
//! 2. Rate limit derived from prior records
//! 3. Spam scoring
//! 4. Durable append of the decision
//!
//! All calls are synchronous and do blocking file I/O.

use crate::address::{anonymize, parse_address};
use crate::blocklist::{BlocklistEntry, BlocklistExport, BlocklistStats, BlocklistStore, WhitelistEntry};
use crate::config::Config;
use crate::error::{Result, ValidationError};
use crate::limiter::{RateLimitResult, RateLimiter};
use crate::metrics::GuardMetrics;
use crate::record::{
    fingerprint, redact_form, AuditEntry, Decision, FormFields, SecurityEvent, SecurityEventKind,
    SubmissionRecord,
};
use crate::report::{self, DailyReport, Statistics, TrendPoint};
use crate::retention::{RetentionJob, RetentionSummary};
use crate::scorer::{ScoreContext, ScoreOutcome, SpamScorer, Submission};
use crate::store::EventStore;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// Client-facing text for a blocked submission.
pub const REJECTED_MESSAGE: &str = "Submission rejected.";

/// Client-facing text for an accepted submission.
pub const ACCEPTED_MESSAGE: &str = "Submission accepted.";

/// A contact form submission with its request metadata.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubmissionRequest {
    pub form_fields: FormFields,
    pub client_address: String,
    #[serde(default)]
    pub user_agent: Option<String>,
    #[serde(default)]
    pub accept_language: Option<String>,
    #[serde(default)]
    pub referer: Option<String>,
    #[serde(default)]
    pub rendered_at_epoch_seconds: Option<i64>,
}

/// The decision returned to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verdict {
    pub allowed: bool,
    pub risk_score: u32,
    pub reasons: Vec<String>,
    pub message: String,
}

/// How long a block lasts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockDuration {
    Days(u32),
    Permanent,
}

impl BlockDuration {
    /// Expiry instant, or `None` for a permanent block.
    pub fn expires_at(
        &self,
        now: DateTime<Utc>,
    ) -> std::result::Result<Option<DateTime<Utc>>, ValidationError> {
        match *self {
            Self::Days(days) => Duration::try_days(i64::from(days))
                .and_then(|span| now.checked_add_signed(span))
                .map(Some)
                .ok_or(ValidationError::InvalidDuration(days)),
            Self::Permanent => Ok(None),
        }
    }
}

/// Whether an admin operation changed anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdminOutcome {
    Applied,
    /// Already present, absent, or overridden by the whitelist
    Unchanged,
}

impl AdminOutcome {
    fn from_changed(changed: bool) -> Self {
        if changed {
            Self::Applied
        } else {
            Self::Unchanged
        }
    }

    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied)
    }
}

pub struct ContactGuard {
    config: Config,
    store: EventStore,
    blocklist: BlocklistStore,
    limiter: RateLimiter,
    scorer: SpamScorer,
    retention: RetentionJob,
    metrics: GuardMetrics,
}

impl ContactGuard {
    /// Build every component from a validated configuration.
    pub fn open(config: Config) -> Result<Self> {
        config.validate()?;
        let now = Utc::now();

        let store = EventStore::open(&config.storage)?;
        let blocklist = BlocklistStore::new(&config.storage);
        let limiter = RateLimiter::new(config.rate_limit.clone(), store.clone());
        let scorer = SpamScorer::new(config.scoring.clone())?;
        let retention = RetentionJob::new(&store, &config.storage, &config.retention);
        let metrics = GuardMetrics::new()?;

        let guard = Self {
            config,
            store,
            blocklist,
            limiter,
            scorer,
            retention,
            metrics,
        };

        let expired = guard.blocklist.clean_expired(now)?;
        if expired > 0 {
            guard.record_event(now, SecurityEventKind::BlocklistExpired { count: expired });
        }

        info!(
            data_dir = %guard.config.storage.data_dir.display(),
            block_threshold = guard.config.scoring.block_threshold,
            retention_days = guard.config.retention.retention_days,
            "Contact guard ready"
        );
        Ok(guard)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn metrics(&self) -> &GuardMetrics {
        &self.metrics
    }

    pub fn submit(&self, request: &SubmissionRequest) -> Result<Verdict> {
        self.submit_at(request, Utc::now())
    }

    /// Decide one submission and append the decision.
    ///
    /// A malformed client address is a validation error. Failing to append
    /// the decision is an error too; no verdict is returned without a record.
    pub fn submit_at(&self, request: &SubmissionRequest, now: DateTime<Utc>) -> Result<Verdict> {
        let addr = parse_address(&request.client_address)?;
        let address = addr.to_string();
        let fingerprint = fingerprint(
            request.user_agent.as_deref().unwrap_or(""),
            request.accept_language.as_deref().unwrap_or(""),
        );

        let (outcome, rate_counts, blocklisted) = match self.blocklist.block_details(addr, now) {
            Some(entry) => {
                debug!(entry = %entry.target, "Submission from blocklisted address");
                (ScoreOutcome::blocklisted(), None, true)
            }
            None => {
                let rate = self.limiter.check(&address, now);
                if let RateLimitResult::Unavailable { .. } = rate {
                    self.metrics.observe_failopen();
                }
                let submission = Submission {
                    fields: &request.form_fields,
                    rendered_at: request.rendered_at_epoch_seconds,
                    referer: request.referer.as_deref(),
                };
                let ctx = ScoreContext {
                    now,
                    rate_limited: rate.is_limited(),
                };
                let counts = match rate {
                    RateLimitResult::Unavailable { .. } => None,
                    ref other => Some(other.counts()),
                };
                (self.scorer.score(&submission, &ctx), counts, false)
            }
        };

        let blocked = blocklisted || self.scorer.blocks(outcome.risk_score);
        let decision = if blocked {
            Decision::Blocked
        } else {
            Decision::Allowed
        };
        let reasons = outcome.reason_strings();

        let scoring = &self.config.scoring;
        let mut record = SubmissionRecord::new(
            now,
            address.as_str(),
            fingerprint.as_str(),
            redact_form(
                &request.form_fields,
                &scoring.logged_fields,
                &scoring.message_field,
                scoring.message_log_chars,
            ),
            outcome.risk_score,
            reasons.clone(),
            decision,
        );
        if let Some(counts) = rate_counts {
            record = record.with_rate_counts(counts);
        }
        self.store.append(&record)?;

        if blocked {
            self.record_event(
                now,
                SecurityEventKind::SubmissionBlocked {
                    risk_score: outcome.risk_score,
                    reasons: reasons.clone(),
                    fingerprint: fingerprint.clone(),
                },
            );
        }
        self.metrics.observe_decision(decision, outcome.risk_score, &reasons);

        info!(
            address = %anonymize(&address),
            %fingerprint,
            decision = decision.as_str(),
            risk_score = outcome.risk_score,
            reasons = ?reasons,
            "Submission decided"
        );

        Ok(Verdict {
            allowed: !blocked,
            risk_score: outcome.risk_score,
            reasons,
            message: if blocked { REJECTED_MESSAGE } else { ACCEPTED_MESSAGE }.to_string(),
        })
    }

    pub fn block_address(
        &self,
        target: &str,
        reason: Option<String>,
        duration: BlockDuration,
        metadata: BTreeMap<String, String>,
    ) -> Result<AdminOutcome> {
        let now = Utc::now();
        let expires_at = duration.expires_at(now)?;
        let added = self
            .blocklist
            .add(target, reason.clone(), expires_at, metadata, now)?;
        if added {
            self.record_event(
                now,
                SecurityEventKind::BlocklistAdded {
                    target: canonical(target),
                    reason,
                    expires_at,
                },
            );
        }
        Ok(AdminOutcome::from_changed(added))
    }

    pub fn unblock_address(&self, target: &str) -> Result<AdminOutcome> {
        let removed = self.blocklist.remove(target)?;
        if removed {
            self.record_event(
                Utc::now(),
                SecurityEventKind::BlocklistRemoved {
                    target: canonical(target),
                },
            );
        }
        Ok(AdminOutcome::from_changed(removed))
    }

    pub fn whitelist_address(&self, target: &str, note: Option<String>) -> Result<AdminOutcome> {
        let now = Utc::now();
        let added = self.blocklist.add_whitelist(target, note.clone(), now)?;
        if added {
            self.record_event(
                now,
                SecurityEventKind::WhitelistAdded {
                    target: canonical(target),
                    note,
                },
            );
        }
        Ok(AdminOutcome::from_changed(added))
    }

    pub fn remove_whitelist(&self, target: &str) -> Result<AdminOutcome> {
        let removed = self.blocklist.remove_whitelist(target)?;
        if removed {
            self.record_event(
                Utc::now(),
                SecurityEventKind::WhitelistRemoved {
                    target: canonical(target),
                },
            );
        }
        Ok(AdminOutcome::from_changed(removed))
    }

    /// Block many targets with one reason; invalid ones are skipped.
    pub fn bulk_block(&self, targets: &[String], reason: Option<&str>) -> usize {
        let added = self.blocklist.bulk_add(targets, reason, Utc::now());
        info!(requested = targets.len(), added, "Bulk block complete");
        added
    }

    pub fn list_blocklist(&self) -> Result<Vec<BlocklistEntry>> {
        self.blocklist.list_blocklist()
    }

    pub fn list_whitelist(&self) -> Result<Vec<WhitelistEntry>> {
        self.blocklist.list_whitelist()
    }

    pub fn blocklist_stats(&self) -> Result<BlocklistStats> {
        self.blocklist.stats(Utc::now())
    }

    pub fn export_lists(&self) -> Result<BlocklistExport> {
        self.blocklist.export(Utc::now())
    }

    pub fn import_lists(&self, export: &BlocklistExport) -> Result<()> {
        self.blocklist.import(export)
    }

    pub fn clean_expired_blocks(&self) -> Result<usize> {
        let now = Utc::now();
        let count = self.blocklist.clean_expired(now)?;
        if count > 0 {
            self.record_event(now, SecurityEventKind::BlocklistExpired { count });
        }
        Ok(count)
    }

    pub fn daily_report(&self, date: NaiveDate) -> Result<DailyReport> {
        let records = self.store.records()?;
        Ok(report::daily_report(&records, date, &self.config.scoring.email_field))
    }

    /// Newest records first.
    pub fn recent_records(&self, limit: usize, include_anonymized: bool) -> Result<Vec<SubmissionRecord>> {
        Ok(report::recent_records(self.store.records()?, limit, include_anonymized))
    }

    pub fn statistics(&self, days: u32) -> Result<Statistics> {
        Ok(report::statistics(&self.store.records()?, days, Utc::now()))
    }

    pub fn trend(&self, days: u32) -> Result<Vec<TrendPoint>> {
        Ok(report::trend(&self.store.records()?, days, Utc::now()))
    }

    pub fn security_events(&self, limit: usize) -> Result<Vec<SecurityEvent>> {
        self.store.security_events(limit)
    }

    pub fn run_retention_sweep(&self) -> Result<RetentionSummary> {
        self.run_retention_sweep_at(Utc::now())
    }

    pub fn run_retention_sweep_at(&self, now: DateTime<Utc>) -> Result<RetentionSummary> {
        let summary = self.retention.run(now)?;
        self.record_event(
            now,
            SecurityEventKind::RetentionSweep {
                anonymized: summary.anonymized_count,
                scanned: summary.scanned,
            },
        );
        Ok(summary)
    }

    /// Delete anonymized records older than `older_than_days`, or the
    /// configured purge age.
    pub fn purge_anonymized(&self, older_than_days: Option<u32>) -> Result<usize> {
        let now = Utc::now();
        let days = older_than_days.unwrap_or(self.config.retention.purge_after_days);
        let purged = self.retention.purge_anonymized(days, now)?;
        if purged > 0 {
            self.record_event(now, SecurityEventKind::AnonymizedPurged { purged });
        }
        Ok(purged)
    }

    pub fn retention_history(&self, limit: usize) -> Result<Vec<AuditEntry>> {
        self.retention.history(limit)
    }

    /// Security events are best effort once the primary write succeeded.
    fn record_event(&self, now: DateTime<Utc>, kind: SecurityEventKind) {
        if let Err(e) = self.store.append_event(&SecurityEvent::new(now, kind)) {
            warn!(error = %e, "Failed to write security event");
        }
    }
}

/// Canonical text of an already validated target.
fn canonical(target: &str) -> String {
    target
        .parse::<crate::address::AddressTarget>()
        .map(|t| t.to_string())
        .unwrap_or_else(|_| target.trim().to_string())
}
