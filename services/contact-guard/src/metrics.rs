// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Prometheus metrics for submission decisions.

use crate::record::Decision;
use prometheus::{
    linear_buckets, Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts,
    Registry, TextEncoder,
};

/// Process-local metrics registry.
#[derive(Clone)]
pub struct GuardMetrics {
    registry: Registry,
    decisions: IntCounterVec,
    risk_score: Histogram,
    rate_limit_failopen: IntCounter,
    reasons: IntCounterVec,
}

impl GuardMetrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let decisions = IntCounterVec::new(
            Opts::new("contact_guard_decisions_total", "Submission decisions by outcome"),
            &["decision"],
        )?;
        let risk_score = Histogram::with_opts(
            HistogramOpts::new("contact_guard_risk_score", "Risk score per scored submission")
                .buckets(linear_buckets(10.0, 10.0, 10)?),
        )?;
        let rate_limit_failopen = IntCounter::new(
            "contact_guard_rate_limit_failopen_total",
            "Rate limit checks that failed open",
        )?;
        let reasons = IntCounterVec::new(
            Opts::new("contact_guard_reasons_total", "Fired scoring rules"),
            &["reason"],
        )?;

        registry.register(Box::new(decisions.clone()))?;
        registry.register(Box::new(risk_score.clone()))?;
        registry.register(Box::new(rate_limit_failopen.clone()))?;
        registry.register(Box::new(reasons.clone()))?;

        Ok(Self {
            registry,
            decisions,
            risk_score,
            rate_limit_failopen,
            reasons,
        })
    }

    pub fn observe_decision(&self, decision: Decision, risk_score: u32, reasons: &[String]) {
        self.decisions.with_label_values(&[decision.as_str()]).inc();
        self.risk_score.observe(f64::from(risk_score));
        for reason in reasons {
            self.reasons.with_label_values(&[reason.as_str()]).inc();
        }
    }

    pub fn observe_failopen(&self) {
        self.rate_limit_failopen.inc();
    }

    /// Render in the Prometheus text exposition format.
    pub fn render(&self) -> String {
        let mut buf = Vec::new();
        if let Err(e) = TextEncoder::new().encode(&self.registry.gather(), &mut buf) {
            tracing::warn!(error = %e, "Failed to encode metrics");
        }
        String::from_utf8(buf).unwrap_or_default()
    }
}
