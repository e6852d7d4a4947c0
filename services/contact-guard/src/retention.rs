// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Address retention: anonymization sweep, audit trail and purge.
//!
//! Both the sweep and the purge hold the submission journal's writer lock for
//! the whole read-rewrite cycle, so appends wait instead of being lost.

use crate::address::{anonymize, hash_address};
use crate::config::{RetentionConfig, StorageConfig};
use crate::error::{GuardError, Result};
use crate::journal::Journal;
use crate::record::{AuditEntry, SubmissionRecord, AUTO_ANONYMIZATION};
use crate::store::EventStore;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetentionSummary {
    /// Lines read, including unparseable ones
    pub scanned: usize,
    pub anonymized_count: usize,
    /// Lines passed through without being understood
    pub opaque_lines: usize,
    pub rewritten: bool,
}

#[derive(Debug, Clone)]
pub struct RetentionJob {
    submissions: Journal,
    audit: Journal,
    retention_days: u32,
}

impl RetentionJob {
    pub fn new(store: &EventStore, storage: &StorageConfig, config: &RetentionConfig) -> Self {
        Self {
            submissions: store.submissions().clone(),
            audit: Journal::new(storage.audit_log()),
            retention_days: config.retention_days,
        }
    }

    /// Anonymize every record older than the retention window.
    ///
    /// Audit entries are written before the journal is replaced, so an
    /// interrupted run can leave a duplicate audit entry but never a missing
    /// one. Lines that are not touched are written back byte for byte.
    pub fn run(&self, now: DateTime<Utc>) -> Result<RetentionSummary> {
        let lock = self.submissions.lock()?;
        let cutoff = now - Duration::days(i64::from(self.retention_days));

        let mut summary = RetentionSummary::default();
        let mut output: Vec<Vec<u8>> = Vec::new();
        let mut audit_entries = Vec::new();

        for raw in self.submissions.lines()? {
            let raw = raw.map_err(|e| GuardError::storage(self.submissions.path(), e))?;
            summary.scanned += 1;

            let mut record = match serde_json::from_slice::<SubmissionRecord>(&raw) {
                Ok(record) => record,
                Err(_) => {
                    summary.opaque_lines += 1;
                    output.push(raw);
                    continue;
                }
            };

            if record.anonymized || record.timestamp >= cutoff {
                output.push(raw);
                continue;
            }

            let original = std::mem::take(&mut record.address);
            record.address = anonymize(&original);
            record.anonymized = true;
            record.anonymized_at = Some(now);

            audit_entries.push(AuditEntry {
                timestamp: now,
                original_timestamp: record.timestamp,
                original_address_hash: hash_address(&original),
                anonymized_address: record.address.clone(),
                action: AUTO_ANONYMIZATION.to_string(),
                retention_days: self.retention_days,
            });

            let line = serde_json::to_vec(&record)
                .map_err(|e| GuardError::serialization(self.submissions.path(), e))?;
            output.push(line);
        }

        summary.anonymized_count = audit_entries.len();
        if audit_entries.is_empty() {
            debug!(scanned = summary.scanned, "Nothing to anonymize");
            return Ok(summary);
        }

        for entry in &audit_entries {
            self.audit.append(entry)?;
        }
        self.submissions.rewrite(&lock, &output)?;
        summary.rewritten = true;

        info!(
            scanned = summary.scanned,
            anonymized = summary.anonymized_count,
            opaque = summary.opaque_lines,
            retention_days = self.retention_days,
            "Retention sweep complete"
        );
        Ok(summary)
    }

    /// Delete anonymized records older than `older_than_days`.
    pub fn purge_anonymized(&self, older_than_days: u32, now: DateTime<Utc>) -> Result<usize> {
        let lock = self.submissions.lock()?;
        let cutoff = now - Duration::days(i64::from(older_than_days));

        let mut kept: Vec<Vec<u8>> = Vec::new();
        let mut purged = 0;
        for raw in self.submissions.lines()? {
            let raw = raw.map_err(|e| GuardError::storage(self.submissions.path(), e))?;
            let expired = serde_json::from_slice::<SubmissionRecord>(&raw)
                .map(|r| r.anonymized && r.timestamp < cutoff)
                .unwrap_or(false);
            if expired {
                purged += 1;
            } else {
                kept.push(raw);
            }
        }

        if purged > 0 {
            self.submissions.rewrite(&lock, &kept)?;
            info!(purged, older_than_days, "Purged anonymized records");
        }
        Ok(purged)
    }

    /// The newest audit entries first.
    pub fn history(&self, limit: usize) -> Result<Vec<AuditEntry>> {
        let mut entries = Vec::new();
        for raw in self.audit.lines()? {
            let raw = raw.map_err(|e| GuardError::storage(self.audit.path(), e))?;
            if let Ok(entry) = serde_json::from_slice::<AuditEntry>(&raw) {
                entries.push(entry);
            }
        }
        entries.reverse();
        entries.truncate(limit);
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{Decision, FormFields};
    use std::fs;
    use tempfile::TempDir;

    struct Fixture {
        dir: TempDir,
        store: EventStore,
        job: RetentionJob,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let storage = StorageConfig {
            data_dir: dir.path().to_path_buf(),
            ..StorageConfig::default()
        };
        let store = EventStore::open(&storage).unwrap();
        let job = RetentionJob::new(&store, &storage, &RetentionConfig::default());
        Fixture { dir, store, job }
    }

    fn record(address: &str, at: DateTime<Utc>) -> SubmissionRecord {
        SubmissionRecord::new(at, address, "fp", FormFields::new(), 5, vec![], Decision::Allowed)
    }

    fn journal_text(f: &Fixture) -> String {
        fs::read_to_string(f.dir.path().join("submissions.log")).unwrap()
    }

    #[test]
    fn test_old_records_anonymized_recent_untouched() {
        let f = fixture();
        let now = Utc::now();
        f.store.append(&record("192.168.1.100", now - Duration::days(20))).unwrap();
        f.store.append(&record("192.168.1.101", now - Duration::days(2))).unwrap();
        let recent_line = journal_text(&f).lines().nth(1).unwrap().to_string();

        let summary = f.job.run(now).unwrap();
        assert_eq!(summary.anonymized_count, 1);
        assert_eq!(summary.scanned, 2);
        assert!(summary.rewritten);

        let text = journal_text(&f);
        let lines: Vec<&str> = text.lines().collect();
        let old: SubmissionRecord = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(old.address, "192.168.1.XXX");
        assert!(old.anonymized);
        assert_eq!(old.anonymized_at, Some(now));
        assert_eq!(lines[1], recent_line);
        assert!(!text.contains("192.168.1.100"));

        let history = f.job.history(10).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].original_address_hash, hash_address("192.168.1.100"));
        assert_eq!(history[0].anonymized_address, "192.168.1.XXX");
        assert_eq!(history[0].action, AUTO_ANONYMIZATION);
        assert_eq!(history[0].retention_days, 14);
    }

    #[test]
    fn test_second_run_is_a_no_op() {
        let f = fixture();
        let now = Utc::now();
        f.store.append(&record("2001:db8::7", now - Duration::days(30))).unwrap();

        assert_eq!(f.job.run(now).unwrap().anonymized_count, 1);
        let after_first = journal_text(&f);

        let second = f.job.run(now).unwrap();
        assert_eq!(second.anonymized_count, 0);
        assert!(!second.rewritten);
        assert_eq!(journal_text(&f), after_first);
        assert_eq!(f.job.history(10).unwrap().len(), 1);
    }

    #[test]
    fn test_opaque_lines_pass_through() {
        let f = fixture();
        let now = Utc::now();
        f.store.append(&record("10.0.0.1", now - Duration::days(40))).unwrap();
        f.store.submissions().append_line(b"{broken json").unwrap();
        f.store.submissions().append_line(br#"{"some":"other shape"}"#).unwrap();

        let summary = f.job.run(now).unwrap();
        assert_eq!(summary.opaque_lines, 2);
        assert_eq!(summary.anonymized_count, 1);

        let text = journal_text(&f);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[1], "{broken json");
        assert_eq!(lines[2], r#"{"some":"other shape"}"#);
    }

    #[test]
    fn test_unknown_fields_survive_rewrite() {
        let f = fixture();
        let now = Utc::now();
        let mut old = record("10.0.0.2", now - Duration::days(40));
        old.extra.insert("campaign".into(), serde_json::json!("spring"));
        f.store.append(&old).unwrap();

        f.job.run(now).unwrap();
        assert!(journal_text(&f).contains(r#""campaign":"spring""#));
    }

    #[test]
    fn test_purge_anonymized() {
        let f = fixture();
        let now = Utc::now();
        f.store.append(&record("10.0.0.3", now - Duration::days(400))).unwrap();
        f.store.append(&record("10.0.0.4", now - Duration::days(20))).unwrap();
        f.job.run(now).unwrap();

        assert_eq!(f.job.purge_anonymized(365, now).unwrap(), 1);
        assert_eq!(f.job.purge_anonymized(365, now).unwrap(), 0);
        assert_eq!(f.store.records().unwrap().len(), 1);
    }

    #[test]
    fn test_empty_store() {
        let f = fixture();
        let summary = f.job.run(Utc::now()).unwrap();
        assert_eq!(summary, RetentionSummary::default());
        assert!(f.job.history(5).unwrap().is_empty());
    }
}
