// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: Apache-2.0

//! Attack simulation patterns for security testing.
//!
//! Submissions are replayed on a virtual clock, `interval_secs` apart, so
//! hour-long attacks run in milliseconds.

use super::generators;
use contact_guard::record::FormFields;

/// What each simulated submission carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Payload {
    Clean,
    Honeypot,
    /// Message with the first n spam keywords
    Keywords(usize),
    /// Disposable address, keywords and too many links
    Bot,
    /// Posted the instant the form was rendered
    TooFast,
}

impl Payload {
    pub fn form(&self) -> FormFields {
        match self {
            Self::Clean | Self::TooFast => generators::clean_form(),
            Self::Honeypot => generators::honeypot_form(),
            Self::Keywords(n) => generators::keyword_form(*n),
            Self::Bot => generators::bot_form(),
        }
    }
}

/// Attack pattern configuration.
#[derive(Debug, Clone)]
pub struct AttackConfig {
    /// Total number of submissions to send
    pub total_submissions: usize,
    /// Virtual seconds between submissions
    pub interval_secs: i64,
    /// Number of unique IPs to rotate through
    pub unique_ips: usize,
    pub payload: Payload,
}

impl Default for AttackConfig {
    fn default() -> Self {
        Self {
            total_submissions: 50,
            interval_secs: 60,
            unique_ips: 1,
            payload: Payload::Clean,
        }
    }
}

/// Predefined attack patterns.
impl AttackConfig {
    /// One address posting clean messages every 30 seconds.
    pub fn single_ip_flood() -> Self {
        Self {
            total_submissions: 30,
            interval_secs: 30,
            ..Default::default()
        }
    }

    /// Many addresses, each below the rate limit, posting keyword spam.
    pub fn distributed_spam() -> Self {
        Self {
            total_submissions: 200,
            interval_secs: 5,
            unique_ips: 50,
            payload: Payload::Keywords(6),
        }
    }

    /// A form-filling bot that fills every field, including the hidden one.
    pub fn honeypot_bot() -> Self {
        Self {
            total_submissions: 40,
            interval_secs: 600,
            unique_ips: 20,
            payload: Payload::Honeypot,
        }
    }

    /// Scripted posts with no render delay.
    pub fn fast_bot() -> Self {
        Self {
            total_submissions: 40,
            interval_secs: 600,
            unique_ips: 40,
            payload: Payload::TooFast,
        }
    }

    /// Link spam from a small pool.
    pub fn link_spam() -> Self {
        Self {
            total_submissions: 30,
            interval_secs: 900,
            unique_ips: 3,
            payload: Payload::Bot,
        }
    }

    /// Slow drip - stay under both rate limits.
    pub fn slow_drip() -> Self {
        Self {
            total_submissions: 16,
            interval_secs: 15 * 60,
            unique_ips: 1,
            payload: Payload::Clean,
        }
    }
}

/// Expected outcomes for an attack pattern.
pub struct AttackExpectations {
    /// Maximum ratio of submissions that may be accepted
    pub max_allowed_ratio: f64,
    /// Reason every blocked submission should carry, if any
    pub expected_reason: Option<&'static str>,
    /// Description of expected behavior
    pub description: &'static str,
}

impl AttackConfig {
    /// Get expected outcomes for this attack pattern.
    pub fn expectations(&self) -> AttackExpectations {
        match self.payload {
            Payload::Honeypot => AttackExpectations {
                max_allowed_ratio: 0.0,
                expected_reason: Some("honeypot_filled"),
                description: "Every honeypot submission should be blocked",
            },
            Payload::TooFast => AttackExpectations {
                max_allowed_ratio: 0.0,
                expected_reason: Some("submitted_too_fast"),
                description: "Every instant submission should be blocked",
            },
            Payload::Keywords(n) if n >= 6 => AttackExpectations {
                max_allowed_ratio: 0.0,
                expected_reason: Some("spam_keywords"),
                description: "Keyword-heavy messages should be blocked",
            },
            Payload::Bot => AttackExpectations {
                max_allowed_ratio: 0.0,
                expected_reason: Some("disposable_email"),
                description: "Bot payloads should be blocked",
            },
            _ => AttackExpectations {
                max_allowed_ratio: 1.0,
                expected_reason: None,
                description: "Clean traffic is limited by rate only",
            },
        }
    }
}
