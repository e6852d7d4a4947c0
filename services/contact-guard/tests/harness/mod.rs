// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: Apache-2.0

//! Test harness for contact guard scenarios and attack simulation.
//!
//! Every guard built here lives in its own temporary data directory.

#![allow(dead_code)]

pub mod attacks;
pub mod generators;
pub mod metrics;

use contact_guard::{Config, ContactGuard};
use tempfile::TempDir;

/// A guard over an isolated data directory.
pub struct TestGuard {
    pub guard: ContactGuard,
    // Dropped after `guard`.
    pub dir: TempDir,
}

/// Open a guard with default settings.
pub fn open_guard() -> TestGuard {
    open_guard_with(|_| {})
}

/// Open a guard after adjusting the default configuration.
pub fn open_guard_with(configure: impl FnOnce(&mut Config)) -> TestGuard {
    let dir = TempDir::new().expect("temp dir");
    let mut config = Config::default();
    config.storage.data_dir = dir.path().to_path_buf();
    configure(&mut config);
    let guard = ContactGuard::open(config).expect("guard opens");
    TestGuard { guard, dir }
}
