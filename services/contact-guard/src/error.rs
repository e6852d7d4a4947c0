// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Error types for the contact guard.

use std::path::PathBuf;
use thiserror::Error;

/// Input that failed syntactic validation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Invalid IP address: {0}")]
    InvalidAddress(String),

    #[error("Invalid CIDR range: {0}")]
    InvalidCidr(String),

    #[error("Invalid prefix length /{prefix} for {target} (max {max})")]
    InvalidPrefix { target: String, prefix: u32, max: u8 },

    #[error("Block duration of {0} days is out of range")]
    InvalidDuration(u32),
}

impl ValidationError {
    /// Stable short code reported to operators and HTTP clients.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidAddress(_) => "invalid_address",
            Self::InvalidCidr(_) => "invalid_cidr",
            Self::InvalidPrefix { .. } => "invalid_prefix",
            Self::InvalidDuration(_) => "invalid_duration",
        }
    }
}

/// Startup configuration problems. Always fatal.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required setting: {0}")]
    Missing(&'static str),

    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: &'static str, value: String },

    #[error("Cannot read {path}: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed config file {path}: {source}")]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid suspicious pattern {pattern:?}: {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

/// Application error types
#[derive(Debug, Error)]
pub enum GuardError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Storage error on {path}: {source}")]
    Storage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Corrupt document {path}: {source}")]
    Serialization {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Metrics registry error: {0}")]
    Metrics(#[from] prometheus::Error),
}

impl GuardError {
    pub(crate) fn storage(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Storage {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn serialization(path: impl Into<PathBuf>, source: serde_json::Error) -> Self {
        Self::Serialization {
            path: path.into(),
            source,
        }
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, GuardError>;
