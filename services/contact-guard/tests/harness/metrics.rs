// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Metrics collection for attack simulation results.

use contact_guard::Verdict;
use std::collections::HashMap;
use std::time::Duration;

/// Collects metrics during attack simulation.
#[derive(Debug, Default)]
pub struct AttackMetrics {
    allowed: usize,
    blocked: usize,
    /// Count of blocked submissions by reason
    reasons: HashMap<String, usize>,
    /// Count of submissions by address
    submissions_per_ip: HashMap<String, usize>,
    /// Wall-clock latency per decision (microseconds)
    latencies: Vec<u64>,
}

impl AttackMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one verdict.
    pub fn record(&mut self, verdict: &Verdict, ip: &str, latency: Duration) {
        if verdict.allowed {
            self.allowed += 1;
        } else {
            self.blocked += 1;
            for reason in &verdict.reasons {
                *self.reasons.entry(reason.clone()).or_insert(0) += 1;
            }
        }
        *self.submissions_per_ip.entry(ip.to_string()).or_insert(0) += 1;
        self.latencies.push(latency.as_micros() as u64);
    }

    pub fn total(&self) -> usize {
        self.allowed + self.blocked
    }

    pub fn allowed(&self) -> usize {
        self.allowed
    }

    pub fn blocked(&self) -> usize {
        self.blocked
    }

    /// Blocked submissions that carried `reason`.
    pub fn reason_count(&self, reason: &str) -> usize {
        self.reasons.get(reason).copied().unwrap_or(0)
    }

    pub fn allowed_ratio(&self) -> f64 {
        if self.total() == 0 {
            return 0.0;
        }
        self.allowed as f64 / self.total() as f64
    }

    pub fn unique_ips(&self) -> usize {
        self.submissions_per_ip.len()
    }

    /// Get p99 latency in microseconds.
    pub fn p99_latency_us(&self) -> u64 {
        if self.latencies.is_empty() {
            return 0;
        }
        let mut sorted = self.latencies.clone();
        sorted.sort_unstable();
        let idx = (sorted.len() as f64 * 0.99) as usize;
        sorted[idx.min(sorted.len() - 1)]
    }
}

impl std::fmt::Display for AttackMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "=== Attack Metrics Report ===")?;
        writeln!(f, "Submissions:  {}", self.total())?;
        writeln!(f, "Allowed:      {} ({:.1}%)", self.allowed, self.allowed_ratio() * 100.0)?;
        writeln!(f, "Blocked:      {}", self.blocked)?;
        let mut reasons: Vec<_> = self.reasons.iter().collect();
        reasons.sort();
        for (reason, count) in reasons {
            writeln!(f, "  {reason}: {count}")?;
        }
        writeln!(f, "Unique IPs:   {}", self.unique_ips())?;
        writeln!(f, "P99 latency:  {} us", self.p99_latency_us())
    }
}
