// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Configuration for the contact guard.
//!
//! A single immutable [`Config`] is built at process start (JSON file, then
//! environment overrides, then list files) and handed to every component.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Environment variable naming an optional JSON config file.
pub const CONFIG_FILE_ENV: &str = "CONTACT_GUARD_CONFIG";

/// Longest rate window; the daily limit covers anything beyond a day.
pub const MAX_WINDOW_SECS: u64 = 86_400;

/// Configuration for the contact guard service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Server bind address (default: 127.0.0.1:8080)
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// On-disk layout and rotation
    #[serde(default)]
    pub storage: StorageConfig,

    /// Log-derived rate limiting
    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    /// Spam scoring thresholds, penalties and lists
    #[serde(default)]
    pub scoring: ScoringConfig,

    /// Address retention policy
    #[serde(default)]
    pub retention: RetentionConfig,

    /// Admin API access
    #[serde(default)]
    pub admin: AdminConfig,

    /// Metrics configuration
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Where the journals and documents live.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory holding all persisted files (default: ./data)
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Journals above this size are rotated into `archive/` (default: 10 MiB)
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: u64,

    /// Gzip rotated journals (default: true)
    #[serde(default = "default_true")]
    pub compress_archives: bool,
}

/// Rate limiting derived from the submission journal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Sliding window length in seconds (default: 3600)
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,

    /// Prior submissions allowed inside the window (default: 5)
    #[serde(default = "default_max_per_window")]
    pub max_per_window: u32,

    /// Prior submissions allowed inside the trailing day (default: 20)
    #[serde(default = "default_max_per_day")]
    pub max_per_day: u32,

    /// Wall-clock budget for one journal scan in milliseconds (default: 250)
    #[serde(default = "default_scan_budget_ms")]
    pub scan_budget_ms: u64,
}

/// Spam scoring rules. Every threshold and point value is tunable.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    pub block_threshold: u32,

    pub honeypot_field: String,
    pub honeypot_penalty: u32,

    /// Hidden form field carrying the render time in epoch seconds
    pub timestamp_field: String,
    pub min_elapsed_secs: i64,
    pub max_elapsed_secs: i64,
    pub missing_timestamp_penalty: u32,
    pub too_fast_penalty: u32,
    pub too_slow_penalty: u32,

    pub rate_limit_penalty: u32,

    pub required_fields: Vec<String>,
    pub missing_field_penalty: u32,

    pub email_field: String,
    pub max_email_length: usize,
    pub invalid_email_penalty: u32,
    pub email_too_long_penalty: u32,
    pub disposable_email_penalty: u32,
    pub disposable_domains: Vec<String>,
    pub disposable_domain_file: Option<PathBuf>,

    pub message_field: String,
    pub keywords: Vec<String>,
    pub keyword_file: Option<PathBuf>,
    pub keyword_penalty: u32,
    pub patterns: Vec<String>,
    pub pattern_file: Option<PathBuf>,
    pub pattern_penalty: u32,

    pub max_links: usize,
    pub link_penalty: u32,

    pub min_message_length: usize,
    pub max_message_length: usize,
    pub short_message_penalty: u32,
    pub long_message_penalty: u32,

    pub min_alnum_ratio: f64,
    pub symbol_penalty: u32,
    pub max_caps_ratio: f64,
    pub caps_min_letters: usize,
    pub caps_penalty: u32,

    /// Hosts a referer must point at. Empty means only presence is checked.
    pub allowed_referer_hosts: Vec<String>,
    pub referer_penalty: u32,

    /// Form fields copied verbatim into the journal
    pub logged_fields: Vec<String>,
    /// Characters of the message kept in the journal
    pub message_log_chars: usize,
}

/// Address retention policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionConfig {
    /// Days a full address is kept before anonymization (default: 14)
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,

    /// Days after which anonymized records are purged (default: 365)
    #[serde(default = "default_purge_after_days")]
    pub purge_after_days: u32,
}

/// Admin API access.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AdminConfig {
    /// Bearer token for `/admin/*`. Admin routes are disabled when unset.
    #[serde(default)]
    pub token: Option<String>,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable Prometheus metrics endpoint (default: true)
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Metrics endpoint path (default: /metrics)
    #[serde(default = "default_metrics_path")]
    pub path: String,
}

// Default value functions
fn default_bind_addr() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_max_file_bytes() -> u64 {
    10 * 1024 * 1024
}

fn default_window_secs() -> u64 {
    3600
}

fn default_max_per_window() -> u32 {
    5
}

fn default_max_per_day() -> u32 {
    20
}

fn default_scan_budget_ms() -> u64 {
    250
}

fn default_retention_days() -> u32 {
    14
}

fn default_purge_after_days() -> u32 {
    365
}

fn default_true() -> bool {
    true
}

fn default_metrics_path() -> String {
    "/metrics".to_string()
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            storage: StorageConfig::default(),
            rate_limit: RateLimitConfig::default(),
            scoring: ScoringConfig::default(),
            retention: RetentionConfig::default(),
            admin: AdminConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            max_file_bytes: default_max_file_bytes(),
            compress_archives: default_true(),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window_secs: default_window_secs(),
            max_per_window: default_max_per_window(),
            max_per_day: default_max_per_day(),
            scan_budget_ms: default_scan_budget_ms(),
        }
    }
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            block_threshold: 30,
            honeypot_field: "website".to_string(),
            honeypot_penalty: 50,
            timestamp_field: "form_timestamp".to_string(),
            min_elapsed_secs: 3,
            max_elapsed_secs: 3600,
            missing_timestamp_penalty: 15,
            too_fast_penalty: 40,
            too_slow_penalty: 10,
            rate_limit_penalty: 30,
            required_fields: strings(&["name", "email", "message"]),
            missing_field_penalty: 10,
            email_field: "email".to_string(),
            max_email_length: 254,
            invalid_email_penalty: 15,
            email_too_long_penalty: 20,
            disposable_email_penalty: 25,
            disposable_domains: strings(&[
                "tempmail.com",
                "temp-mail.org",
                "guerrillamail.com",
                "10minutemail.com",
                "throwaway.email",
                "mailinator.com",
                "trashmail.com",
                "yopmail.com",
                "getnada.com",
                "tempmail.de",
            ]),
            disposable_domain_file: None,
            message_field: "message".to_string(),
            keywords: strings(&[
                "viagra",
                "cialis",
                "casino",
                "lottery",
                "prize",
                "click here",
                "buy now",
                "limited time",
                "act now",
                "congratulations",
                "winner",
                "free money",
            ]),
            keyword_file: None,
            keyword_penalty: 5,
            patterns: strings(&[
                r"(?i)https?://[^\s]+\.(ru|cn|tk)\b",
                r"\b\d{13,16}\b",
                r"(?i)<script",
                r"(?i)eval\(",
            ]),
            pattern_file: None,
            pattern_penalty: 10,
            max_links: 3,
            link_penalty: 5,
            min_message_length: 10,
            max_message_length: 5000,
            short_message_penalty: 15,
            long_message_penalty: 10,
            min_alnum_ratio: 0.3,
            symbol_penalty: 20,
            max_caps_ratio: 0.5,
            caps_min_letters: 10,
            caps_penalty: 15,
            allowed_referer_hosts: Vec::new(),
            referer_penalty: 10,
            logged_fields: strings(&["name", "email", "subject"]),
            message_log_chars: 200,
        }
    }
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            retention_days: default_retention_days(),
            purge_after_days: default_purge_after_days(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            path: default_metrics_path(),
        }
    }
}

impl StorageConfig {
    pub fn submissions_log(&self) -> PathBuf {
        self.data_dir.join("submissions.log")
    }

    pub fn security_log(&self) -> PathBuf {
        self.data_dir.join("security.log")
    }

    pub fn audit_log(&self) -> PathBuf {
        self.data_dir.join("anonymization_history.log")
    }

    pub fn blocklist_file(&self) -> PathBuf {
        self.data_dir.join("blocklist.json")
    }

    pub fn whitelist_file(&self) -> PathBuf {
        self.data_dir.join("whitelist.json")
    }

    pub fn archive_dir(&self) -> PathBuf {
        self.data_dir.join("archive")
    }
}

impl RateLimitConfig {
    /// Get the scan budget
    pub fn scan_budget(&self) -> Duration {
        Duration::from_millis(self.scan_budget_ms)
    }
}

impl Config {
    /// Load configuration: `.env`, optional JSON file, environment, list files.
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let mut config = match std::env::var(CONFIG_FILE_ENV) {
            Ok(path) if !path.trim().is_empty() => Self::from_file(Path::new(path.trim()))?,
            _ => Self::default(),
        };

        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.scoring.load_list_files()?;
        config.validate()?;
        Ok(config)
    }

    /// Read a JSON config file. Missing sections take their defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Unreadable {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| ConfigError::Malformed {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Apply environment-style overrides from `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(v) = get("BIND_ADDR") {
            self.bind_addr = v;
        }
        if let Some(v) = get("DATA_DIR") {
            self.storage.data_dir = PathBuf::from(v);
        }
        if let Some(v) = parse_override(&get, "BLOCK_THRESHOLD")? {
            self.scoring.block_threshold = v;
        }
        if let Some(v) = parse_override(&get, "RATE_LIMIT_MAX")? {
            self.rate_limit.max_per_window = v;
        }
        if let Some(v) = parse_override(&get, "RATE_LIMIT_WINDOW_SECS")? {
            self.rate_limit.window_secs = v;
        }
        if let Some(v) = parse_override(&get, "RATE_LIMIT_DAY_MAX")? {
            self.rate_limit.max_per_day = v;
        }
        if let Some(v) = parse_override(&get, "RETENTION_DAYS")? {
            self.retention.retention_days = v;
        }
        if let Some(v) = get("ADMIN_TOKEN") {
            self.admin.token = Some(v);
        }
        if let Some(v) = get("ALLOWED_REFERER_HOSTS") {
            self.scoring.allowed_referer_hosts = v
                .split(',')
                .map(|h| h.trim().to_lowercase())
                .filter(|h| !h.is_empty())
                .collect();
        }
        if let Some(v) = parse_override(&get, "METRICS_ENABLED")? {
            self.metrics.enabled = v;
        }
        Ok(())
    }

    /// Reject settings that cannot produce a working pipeline.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let s = &self.scoring;
        if s.block_threshold == 0 || s.block_threshold > 100 {
            return Err(invalid("scoring.block_threshold", s.block_threshold));
        }
        if s.min_elapsed_secs > s.max_elapsed_secs {
            return Err(invalid("scoring.min_elapsed_secs", s.min_elapsed_secs));
        }
        if s.min_message_length > s.max_message_length {
            return Err(invalid("scoring.min_message_length", s.min_message_length));
        }
        if !(0.0..=1.0).contains(&s.min_alnum_ratio) {
            return Err(invalid("scoring.min_alnum_ratio", s.min_alnum_ratio));
        }
        if !(0.0..=1.0).contains(&s.max_caps_ratio) {
            return Err(invalid("scoring.max_caps_ratio", s.max_caps_ratio));
        }
        if s.honeypot_field.trim().is_empty() {
            return Err(ConfigError::Missing("scoring.honeypot_field"));
        }
        if s.message_field.trim().is_empty() {
            return Err(ConfigError::Missing("scoring.message_field"));
        }

        let r = &self.rate_limit;
        if r.window_secs == 0 || r.window_secs > MAX_WINDOW_SECS {
            return Err(invalid("rate_limit.window_secs", r.window_secs));
        }
        if r.max_per_window == 0 {
            return Err(invalid("rate_limit.max_per_window", r.max_per_window));
        }
        if r.max_per_day == 0 {
            return Err(invalid("rate_limit.max_per_day", r.max_per_day));
        }

        let days = self.retention.retention_days;
        if !(1..=90).contains(&days) {
            return Err(invalid("retention.retention_days", days));
        }
        if self.retention.purge_after_days < days {
            return Err(invalid("retention.purge_after_days", self.retention.purge_after_days));
        }

        let reserved = ["/submit", "/health", "/healthz"];
        if self.metrics.enabled
            && (!self.metrics.path.starts_with('/')
                || reserved.contains(&self.metrics.path.as_str())
                || self.metrics.path.starts_with("/admin"))
        {
            return Err(invalid("metrics.path", &self.metrics.path));
        }

        if self.storage.data_dir.as_os_str().is_empty() {
            return Err(ConfigError::Missing("storage.data_dir"));
        }
        Ok(())
    }
}

impl ScoringConfig {
    /// Append entries from the configured list files, one per line.
    pub fn load_list_files(&mut self) -> Result<(), ConfigError> {
        if let Some(path) = &self.keyword_file {
            self.keywords.extend(read_list(path)?);
        }
        if let Some(path) = &self.pattern_file {
            self.patterns.extend(read_list(path)?);
        }
        if let Some(path) = &self.disposable_domain_file {
            self.disposable_domains.extend(read_list(path)?);
        }
        Ok(())
    }
}

/// Read a list file: one entry per line, blank lines and `#` comments skipped.
pub fn read_list(path: &Path) -> Result<Vec<String>, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Unreadable {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(raw
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect())
}

fn parse_override<T, G>(get: &G, key: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => raw
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue { key, value: raw }),
        None => Ok(None),
    }
}

fn invalid(key: &'static str, value: impl ToString) -> ConfigError {
    ConfigError::InvalidValue {
        key,
        value: value.to_string(),
    }
}
