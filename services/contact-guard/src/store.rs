// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Event store: the submission journal and the security log.

use crate::config::StorageConfig;
use crate::error::{GuardError, Result};
use crate::journal::{Journal, Lines, Rotation};
use crate::record::{SecurityEvent, SubmissionRecord};
use std::fs;
use std::io;

/// A journal line read back as a record, or kept verbatim when it is not one.
#[derive(Debug, Clone, PartialEq)]
pub enum StoredLine {
    Record(Box<SubmissionRecord>),
    Opaque(Vec<u8>),
}

impl StoredLine {
    pub fn parse(raw: Vec<u8>) -> Self {
        match serde_json::from_slice::<SubmissionRecord>(&raw) {
            Ok(record) => Self::Record(Box::new(record)),
            Err(_) => Self::Opaque(raw),
        }
    }

    pub fn into_record(self) -> Option<SubmissionRecord> {
        match self {
            Self::Record(record) => Some(*record),
            Self::Opaque(_) => None,
        }
    }
}

/// Lazy scan over the submission journal.
pub struct Scan {
    lines: Lines,
}

impl Iterator for Scan {
    type Item = io::Result<StoredLine>;

    fn next(&mut self) -> Option<Self::Item> {
        self.lines.next().map(|line| line.map(StoredLine::parse))
    }
}

#[derive(Debug, Clone)]
pub struct EventStore {
    submissions: Journal,
    security: Journal,
}

impl EventStore {
    /// Open the store under `storage.data_dir`, creating the directory.
    pub fn open(storage: &StorageConfig) -> Result<Self> {
        fs::create_dir_all(&storage.data_dir)
            .map_err(|e| GuardError::storage(&storage.data_dir, e))?;

        let rotation = Rotation {
            max_bytes: storage.max_file_bytes,
            archive_dir: storage.archive_dir(),
            compress: storage.compress_archives,
        };

        Ok(Self {
            submissions: Journal::new(storage.submissions_log()).with_rotation(rotation.clone()),
            security: Journal::new(storage.security_log()).with_rotation(rotation),
        })
    }

    pub fn append(&self, record: &SubmissionRecord) -> Result<()> {
        self.submissions.append(record)
    }

    pub fn append_event(&self, event: &SecurityEvent) -> Result<()> {
        self.security.append(event)
    }

    /// Scan the submission journal from the beginning.
    pub fn scan(&self) -> Result<Scan> {
        Ok(Scan {
            lines: self.submissions.lines()?,
        })
    }

    /// All readable submission records, oldest first.
    pub fn records(&self) -> Result<Vec<SubmissionRecord>> {
        let path = self.submissions.path().to_path_buf();
        let mut records = Vec::new();
        for line in self.scan()? {
            let line = line.map_err(|e| GuardError::storage(&path, e))?;
            if let Some(record) = line.into_record() {
                records.push(record);
            }
        }
        Ok(records)
    }

    /// Newest security events first, skipping unreadable lines.
    pub fn security_events(&self, limit: usize) -> Result<Vec<SecurityEvent>> {
        let path = self.security.path().to_path_buf();
        let mut events = Vec::new();
        for line in self.security.lines()? {
            let line = line.map_err(|e| GuardError::storage(&path, e))?;
            if let Ok(event) = serde_json::from_slice::<SecurityEvent>(&line) {
                events.push(event);
            }
        }
        events.reverse();
        events.truncate(limit);
        Ok(events)
    }

    pub(crate) fn submissions(&self) -> &Journal {
        &self.submissions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{Decision, FormFields, SecurityEventKind};
    use chrono::Utc;
    use std::io::Write;
    use tempfile::TempDir;

    fn store(dir: &TempDir) -> EventStore {
        let storage = StorageConfig {
            data_dir: dir.path().to_path_buf(),
            ..StorageConfig::default()
        };
        EventStore::open(&storage).unwrap()
    }

    fn record(address: &str) -> SubmissionRecord {
        SubmissionRecord::new(
            Utc::now(),
            address,
            "fp",
            FormFields::new(),
            0,
            vec![],
            Decision::Allowed,
        )
    }

    #[test]
    fn test_scan_tolerates_malformed_lines() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store.append(&record("192.0.2.1")).unwrap();

        let mut file = fs::OpenOptions::new()
            .append(true)
            .open(dir.path().join("submissions.log"))
            .unwrap();
        writeln!(file, "not json at all").unwrap();
        drop(file);

        store.append(&record("192.0.2.2")).unwrap();

        let lines: Vec<_> = store.scan().unwrap().map(|l| l.unwrap()).collect();
        assert_eq!(lines.len(), 3);
        assert!(matches!(lines[1], StoredLine::Opaque(ref raw) if raw == b"not json at all"));
        assert_eq!(store.records().unwrap().len(), 2);
    }

    #[test]
    fn test_security_events_newest_first() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        for count in 1..=3 {
            store
                .append_event(&SecurityEvent::new(
                    Utc::now(),
                    SecurityEventKind::BlocklistExpired { count },
                ))
                .unwrap();
        }

        let events = store.security_events(2).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].kind, SecurityEventKind::BlocklistExpired { count: 3 });
    }
}
