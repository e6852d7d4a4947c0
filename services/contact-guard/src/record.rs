// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Persisted record shapes: submission decisions, security events and the
//! anonymization audit trail.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha3::{Digest, Sha3_256};
use std::collections::BTreeMap;

/// Current on-disk layout of [`SubmissionRecord`].
pub const SCHEMA_VERSION: u32 = 1;

/// Audit action recorded by the retention sweep.
pub const AUTO_ANONYMIZATION: &str = "auto_anonymization";

/// Longest value kept for a logged identifying field.
const MAX_LOGGED_FIELD_CHARS: usize = 254;

/// Submitted form fields, keyed by field name.
pub type FormFields = BTreeMap<String, String>;

/// Outcome of a submission decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Allowed,
    Blocked,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Allowed => "allowed",
            Self::Blocked => "blocked",
        }
    }
}

/// Prior submissions observed from one address.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateCounts {
    pub window_count: u32,
    pub day_count: u32,
}

/// One decision as written to the submission journal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionRecord {
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,

    pub timestamp: DateTime<Utc>,

    #[serde(alias = "ip")]
    pub address: String,

    #[serde(default)]
    pub fingerprint: String,

    #[serde(default)]
    pub form_fields: FormFields,

    #[serde(default, alias = "spamScore")]
    pub risk_score: u32,

    #[serde(default, alias = "spamReasons")]
    pub reasons: Vec<String>,

    /// Absent on legacy lines, which carry a `blocked` flag instead.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decision: Option<Decision>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_counts: Option<RateCounts>,

    #[serde(default)]
    pub anonymized: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anonymized_at: Option<DateTime<Utc>>,

    /// Keys this version does not know about, kept across rewrites.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn default_schema_version() -> u32 {
    SCHEMA_VERSION
}

impl SubmissionRecord {
    pub fn new(
        timestamp: DateTime<Utc>,
        address: impl Into<String>,
        fingerprint: impl Into<String>,
        form_fields: FormFields,
        risk_score: u32,
        reasons: Vec<String>,
        decision: Decision,
    ) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            timestamp,
            address: address.into(),
            fingerprint: fingerprint.into(),
            form_fields,
            risk_score,
            reasons,
            decision: Some(decision),
            rate_counts: None,
            anonymized: false,
            anonymized_at: None,
            extra: Map::new(),
        }
    }

    pub fn with_rate_counts(mut self, counts: RateCounts) -> Self {
        self.rate_counts = Some(counts);
        self
    }

    /// The recorded decision, falling back to the legacy `blocked` flag.
    pub fn decision(&self) -> Decision {
        match self.decision {
            Some(decision) => decision,
            None => match self.extra.get("blocked").and_then(Value::as_bool) {
                Some(true) => Decision::Blocked,
                _ => Decision::Allowed,
            },
        }
    }

    pub fn is_blocked(&self) -> bool {
        self.decision() == Decision::Blocked
    }
}

/// Stable, non-reversible client fingerprint.
///
/// First 16 hex characters of SHA3-256 over `user_agent|accept_language`.
pub fn fingerprint(user_agent: &str, accept_language: &str) -> String {
    let digest = Sha3_256::digest(format!("{user_agent}|{accept_language}").as_bytes());
    let mut hex = hex::encode(digest);
    hex.truncate(16);
    hex
}

/// Reduce submitted fields to what may be journaled.
///
/// Identifying fields listed in `logged_fields` are kept (bounded), the
/// message is cut to `message_chars` characters with a trailing `...`, and
/// everything else is dropped.
pub fn redact_form(
    fields: &FormFields,
    logged_fields: &[String],
    message_field: &str,
    message_chars: usize,
) -> FormFields {
    let mut out = FormFields::new();

    for name in logged_fields {
        if let Some(value) = fields.get(name) {
            out.insert(name.clone(), truncate_chars(value, MAX_LOGGED_FIELD_CHARS));
        }
    }

    if let Some(message) = fields.get(message_field) {
        let redacted = if message.chars().count() > message_chars {
            format!("{}...", truncate_chars(message, message_chars))
        } else {
            message.clone()
        };
        out.insert(message_field.to_string(), redacted);
    }

    out
}

fn truncate_chars(value: &str, max: usize) -> String {
    value.chars().take(max).collect()
}

/// A line of the security log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityEvent {
    pub timestamp: DateTime<Utc>,

    #[serde(flatten)]
    pub kind: SecurityEventKind,
}

impl SecurityEvent {
    pub fn new(timestamp: DateTime<Utc>, kind: SecurityEventKind) -> Self {
        Self { timestamp, kind }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum SecurityEventKind {
    /// Carries no address; the submission record has it.
    SubmissionBlocked {
        risk_score: u32,
        reasons: Vec<String>,
        fingerprint: String,
    },
    BlocklistAdded {
        target: String,
        reason: Option<String>,
        expires_at: Option<DateTime<Utc>>,
    },
    BlocklistRemoved {
        target: String,
    },
    WhitelistAdded {
        target: String,
        note: Option<String>,
    },
    WhitelistRemoved {
        target: String,
    },
    BlocklistExpired {
        count: usize,
    },
    RetentionSweep {
        anonymized: usize,
        scanned: usize,
    },
    AnonymizedPurged {
        purged: usize,
    },
}

/// One anonymized address in the audit trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    pub timestamp: DateTime<Utc>,
    pub original_timestamp: DateTime<Utc>,
    pub original_address_hash: String,
    pub anonymized_address: String,
    pub action: String,
    pub retention_days: u32,
}
