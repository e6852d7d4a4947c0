// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Persistent blocklist and whitelist.
//!
//! Both lists are JSON arrays on disk. Every mutation is a read-modify-write
//! under an exclusive lock on `<file>.lock`, finished by an atomic replace.
//! Lookups take no lock and fail open.

use crate::address::AddressTarget;
use crate::config::StorageConfig;
use crate::error::{GuardError, Result};
use crate::journal::{write_atomic, FileLock};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlocklistEntry {
    #[serde(alias = "ip")]
    pub target: String,
    #[serde(default)]
    pub reason: Option<String>,
    pub added_at: DateTime<Utc>,
    /// Absent for permanent blocks
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl BlocklistEntry {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    pub fn is_permanent(&self) -> bool {
        self.expires_at.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WhitelistEntry {
    #[serde(alias = "ip")]
    pub target: String,
    #[serde(default)]
    pub note: Option<String>,
    pub added_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlocklistStats {
    pub total: usize,
    pub active: usize,
    pub expired: usize,
    pub permanent: usize,
    pub whitelisted: usize,
}

/// Both lists as one portable document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlocklistExport {
    pub blocklist: Vec<BlocklistEntry>,
    pub whitelist: Vec<WhitelistEntry>,
    pub exported_at: DateTime<Utc>,
}

trait Targeted {
    fn target(&self) -> &str;
}

impl Targeted for BlocklistEntry {
    fn target(&self) -> &str {
        &self.target
    }
}

impl Targeted for WhitelistEntry {
    fn target(&self) -> &str {
        &self.target
    }
}

/// Parse an entry's stored target, warning on entries edited into nonsense.
fn parsed<T: Targeted>(entry: &T) -> Option<AddressTarget> {
    match entry.target().parse::<AddressTarget>() {
        Ok(target) => Some(target),
        Err(e) => {
            warn!(entry = entry.target(), error = %e, "Ignoring unparseable list entry");
            None
        }
    }
}

#[derive(Debug, Clone)]
pub struct BlocklistStore {
    blocklist_path: PathBuf,
    whitelist_path: PathBuf,
}

impl BlocklistStore {
    pub fn new(storage: &StorageConfig) -> Self {
        Self {
            blocklist_path: storage.blocklist_file(),
            whitelist_path: storage.whitelist_file(),
        }
    }

    /// Open the store and drop blocks that have already expired.
    pub fn open(storage: &StorageConfig, now: DateTime<Utc>) -> Result<Self> {
        let store = Self::new(storage);
        store.clean_expired(now)?;
        Ok(store)
    }

    /// Whether `addr` is currently blocked. Whitelisted addresses never are.
    pub fn is_blocked(&self, addr: IpAddr, now: DateTime<Utc>) -> bool {
        self.block_details(addr, now).is_some()
    }

    /// The first active entry covering `addr`, unless it is whitelisted.
    pub fn block_details(&self, addr: IpAddr, now: DateTime<Utc>) -> Option<BlocklistEntry> {
        if self.is_whitelisted(addr) {
            return None;
        }

        let entries = match self.list_blocklist() {
            Ok(entries) => entries,
            Err(e) => {
                warn!(error = %e, "Blocklist unreadable, failing open");
                return None;
            }
        };

        entries.into_iter().find(|entry| {
            !entry.is_expired(now) && parsed(entry).is_some_and(|target| target.matches(addr))
        })
    }

    pub fn is_whitelisted(&self, addr: IpAddr) -> bool {
        match self.list_whitelist() {
            Ok(entries) => entries
                .iter()
                .any(|entry| parsed(entry).is_some_and(|target| target.matches(addr))),
            Err(e) => {
                warn!(error = %e, "Whitelist unreadable");
                false
            }
        }
    }

    /// Add a block. Returns `false` if the target is already listed or
    /// whitelisted.
    pub fn add(
        &self,
        target: &str,
        reason: Option<String>,
        expires_at: Option<DateTime<Utc>>,
        metadata: BTreeMap<String, String>,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let parsed_target: AddressTarget = target.parse()?;

        let whitelist = self.list_whitelist()?;
        let base = parsed_target.base_address();
        let whitelisted = whitelist
            .iter()
            .filter_map(parsed)
            .any(|w| w == parsed_target || w.matches(base));
        if whitelisted {
            info!(entry = %parsed_target, "Not blocking whitelisted target");
            return Ok(false);
        }

        let _lock = lock(&self.blocklist_path)?;
        let mut entries: Vec<BlocklistEntry> = read_list(&self.blocklist_path)?;

        // A lapsed block on the same target is replaced rather than kept.
        entries.retain(|e| !(e.is_expired(now) && parsed(e) == Some(parsed_target)));
        if entries.iter().any(|e| parsed(e) == Some(parsed_target)) {
            return Ok(false);
        }

        entries.push(BlocklistEntry {
            target: parsed_target.to_string(),
            reason,
            added_at: now,
            expires_at,
            metadata,
        });
        write_list(&self.blocklist_path, &entries)?;

        info!(entry = %parsed_target, ?expires_at, "Added to blocklist");
        Ok(true)
    }

    /// Remove a block. Returns `false` if it was not listed.
    pub fn remove(&self, target: &str) -> Result<bool> {
        let parsed_target: AddressTarget = target.parse()?;
        let removed = remove_from::<BlocklistEntry>(&self.blocklist_path, parsed_target)?;
        if removed {
            info!(entry = %parsed_target, "Removed from blocklist");
        }
        Ok(removed)
    }

    /// Exempt a target. Returns `false` if it is already whitelisted.
    pub fn add_whitelist(&self, target: &str, note: Option<String>, now: DateTime<Utc>) -> Result<bool> {
        let parsed_target: AddressTarget = target.parse()?;

        let _lock = lock(&self.whitelist_path)?;
        let mut entries: Vec<WhitelistEntry> = read_list(&self.whitelist_path)?;
        if entries.iter().any(|e| parsed(e) == Some(parsed_target)) {
            return Ok(false);
        }

        entries.push(WhitelistEntry {
            target: parsed_target.to_string(),
            note,
            added_at: now,
        });
        write_list(&self.whitelist_path, &entries)?;

        info!(entry = %parsed_target, "Added to whitelist");
        Ok(true)
    }

    pub fn remove_whitelist(&self, target: &str) -> Result<bool> {
        let parsed_target: AddressTarget = target.parse()?;
        let removed = remove_from::<WhitelistEntry>(&self.whitelist_path, parsed_target)?;
        if removed {
            info!(entry = %parsed_target, "Removed from whitelist");
        }
        Ok(removed)
    }

    /// Physically remove expired blocks. Returns how many were dropped.
    pub fn clean_expired(&self, now: DateTime<Utc>) -> Result<usize> {
        let _lock = lock(&self.blocklist_path)?;
        let mut entries: Vec<BlocklistEntry> = read_list(&self.blocklist_path)?;
        let before = entries.len();
        entries.retain(|e| !e.is_expired(now));
        let cleaned = before - entries.len();

        if cleaned > 0 {
            write_list(&self.blocklist_path, &entries)?;
            info!(cleaned, "Removed expired blocks");
        }
        Ok(cleaned)
    }

    pub fn list_blocklist(&self) -> Result<Vec<BlocklistEntry>> {
        read_list(&self.blocklist_path)
    }

    pub fn list_whitelist(&self) -> Result<Vec<WhitelistEntry>> {
        read_list(&self.whitelist_path)
    }

    pub fn stats(&self, now: DateTime<Utc>) -> Result<BlocklistStats> {
        let blocklist = self.list_blocklist()?;
        let mut stats = BlocklistStats {
            total: blocklist.len(),
            whitelisted: self.list_whitelist()?.len(),
            ..BlocklistStats::default()
        };

        for entry in &blocklist {
            if entry.is_permanent() {
                stats.permanent += 1;
                stats.active += 1;
            } else if entry.is_expired(now) {
                stats.expired += 1;
            } else {
                stats.active += 1;
            }
        }
        Ok(stats)
    }

    /// Block many targets with one reason. Invalid or failing targets are
    /// skipped; returns how many were added.
    pub fn bulk_add<S: AsRef<str>>(&self, targets: &[S], reason: Option<&str>, now: DateTime<Utc>) -> usize {
        let mut added = 0;
        for target in targets {
            let target = target.as_ref();
            match self.add(target, reason.map(str::to_string), None, BTreeMap::new(), now) {
                Ok(true) => added += 1,
                Ok(false) => {}
                Err(e) => warn!(entry = %target, error = %e, "Skipping target in bulk add"),
            }
        }
        added
    }

    pub fn export(&self, now: DateTime<Utc>) -> Result<BlocklistExport> {
        Ok(BlocklistExport {
            blocklist: self.list_blocklist()?,
            whitelist: self.list_whitelist()?,
            exported_at: now,
        })
    }

    /// Replace both lists. Every target is validated before anything is
    /// written.
    pub fn import(&self, export: &BlocklistExport) -> Result<()> {
        for target in export
            .blocklist
            .iter()
            .map(|e| e.target.as_str())
            .chain(export.whitelist.iter().map(|e| e.target.as_str()))
        {
            target.parse::<AddressTarget>()?;
        }

        let _block_lock = lock(&self.blocklist_path)?;
        let _white_lock = lock(&self.whitelist_path)?;
        write_list(&self.blocklist_path, &export.blocklist)?;
        write_list(&self.whitelist_path, &export.whitelist)?;

        info!(
            blocklist = export.blocklist.len(),
            whitelist = export.whitelist.len(),
            "Imported lists"
        );
        Ok(())
    }
}

fn lock(path: &Path) -> Result<FileLock> {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".lock");
    FileLock::acquire(&path.with_file_name(name))
}

fn read_list<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(GuardError::storage(path, e)),
    };
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(Vec::new());
    }
    serde_json::from_slice(&bytes).map_err(|e| GuardError::serialization(path, e))
}

fn write_list<T: Serialize>(path: &Path, entries: &[T]) -> Result<()> {
    let json = serde_json::to_vec_pretty(entries).map_err(|e| GuardError::serialization(path, e))?;
    write_atomic(path, &json).map_err(|e| GuardError::storage(path, e))
}

fn remove_from<T>(path: &Path, target: AddressTarget) -> Result<bool>
where
    T: Targeted + Serialize + DeserializeOwned,
{
    let _lock = lock(path)?;
    let mut entries: Vec<T> = read_list(path)?;
    let before = entries.len();
    entries.retain(|e| parsed(e) != Some(target));
    if entries.len() == before {
        return Ok(false);
    }
    write_list(path, &entries)?;
    Ok(true)
}
