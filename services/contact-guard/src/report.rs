// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Aggregate views over submission records.

use crate::record::SubmissionRecord;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Scores at or above this are listed individually in daily reports.
pub const HIGH_RISK_SCORE: u32 = 50;

/// Length of ranked lists.
const TOP_N: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddressCount {
    pub address: String,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReasonCount {
    pub reason: String,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HighRiskSubmission {
    pub timestamp: DateTime<Utc>,
    pub address: String,
    pub email: Option<String>,
    pub risk_score: u32,
    pub reasons: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyReport {
    pub date: NaiveDate,
    pub total: usize,
    pub allowed: usize,
    pub blocked: usize,
    pub avg_risk_score: f64,
    pub top_addresses: Vec<AddressCount>,
    /// Reasons behind blocked submissions
    pub reason_counts: BTreeMap<String, usize>,
    pub high_risk: Vec<HighRiskSubmission>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Statistics {
    pub days: u32,
    pub total: usize,
    pub allowed: usize,
    pub blocked: usize,
    pub avg_risk_score: f64,
    /// Distinct addresses that are not yet anonymized
    pub unique_addresses: usize,
    pub top_reasons: Vec<ReasonCount>,
    pub top_addresses: Vec<AddressCount>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrendPoint {
    pub date: NaiveDate,
    pub total: usize,
    pub allowed: usize,
    pub blocked: usize,
}

pub fn daily_report(records: &[SubmissionRecord], date: NaiveDate, email_field: &str) -> DailyReport {
    let day: Vec<&SubmissionRecord> = records
        .iter()
        .filter(|r| r.timestamp.date_naive() == date)
        .collect();

    let blocked = day.iter().filter(|r| r.is_blocked()).count();
    let high_risk = day
        .iter()
        .filter(|r| r.risk_score >= HIGH_RISK_SCORE)
        .map(|r| HighRiskSubmission {
            timestamp: r.timestamp,
            address: r.address.clone(),
            email: r.form_fields.get(email_field).cloned(),
            risk_score: r.risk_score,
            reasons: r.reasons.clone(),
        })
        .collect();

    DailyReport {
        date,
        total: day.len(),
        allowed: day.len() - blocked,
        blocked,
        avg_risk_score: average_score(&day),
        top_addresses: top_addresses(day.iter().copied(), false),
        reason_counts: blocked_reasons(&day),
        high_risk,
    }
}

/// Totals over the last `days` days.
pub fn statistics(records: &[SubmissionRecord], days: u32, now: DateTime<Utc>) -> Statistics {
    let cutoff = now - Duration::days(i64::from(days));
    let window: Vec<&SubmissionRecord> = records.iter().filter(|r| r.timestamp >= cutoff).collect();

    let blocked = window.iter().filter(|r| r.is_blocked()).count();
    let ranked_addresses = top_addresses(window.iter().copied(), true);
    let unique_addresses = window
        .iter()
        .filter(|r| !r.anonymized)
        .map(|r| r.address.as_str())
        .collect::<std::collections::HashSet<_>>()
        .len();

    let mut top_reasons: Vec<ReasonCount> = blocked_reasons(&window)
        .into_iter()
        .map(|(reason, count)| ReasonCount { reason, count })
        .collect();
    top_reasons.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.reason.cmp(&b.reason)));
    top_reasons.truncate(TOP_N);

    Statistics {
        days,
        total: window.len(),
        allowed: window.len() - blocked,
        blocked,
        avg_risk_score: average_score(&window),
        unique_addresses,
        top_reasons,
        top_addresses: ranked_addresses,
    }
}

/// One point per day for the last `days` days, oldest first, today included.
pub fn trend(records: &[SubmissionRecord], days: u32, now: DateTime<Utc>) -> Vec<TrendPoint> {
    let today = now.date_naive();
    let mut points: Vec<TrendPoint> = (0..i64::from(days))
        .rev()
        .map(|back| TrendPoint {
            date: today - Duration::days(back),
            total: 0,
            allowed: 0,
            blocked: 0,
        })
        .collect();

    let Some(first) = points.first().map(|p| p.date) else {
        return points;
    };
    for record in records {
        let date = record.timestamp.date_naive();
        if date < first || date > today {
            continue;
        }
        let index = (date - first).num_days() as usize;
        let point = &mut points[index];
        point.total += 1;
        if record.is_blocked() {
            point.blocked += 1;
        } else {
            point.allowed += 1;
        }
    }
    points
}

/// Newest first, optionally hiding anonymized records.
pub fn recent_records(
    records: Vec<SubmissionRecord>,
    limit: usize,
    include_anonymized: bool,
) -> Vec<SubmissionRecord> {
    records
        .into_iter()
        .rev()
        .filter(|r| include_anonymized || !r.anonymized)
        .take(limit)
        .collect()
}

fn average_score(records: &[&SubmissionRecord]) -> f64 {
    if records.is_empty() {
        return 0.0;
    }
    let sum: u64 = records.iter().map(|r| u64::from(r.risk_score)).sum();
    let avg = sum as f64 / records.len() as f64;
    (avg * 100.0).round() / 100.0
}

fn blocked_reasons(records: &[&SubmissionRecord]) -> BTreeMap<String, usize> {
    let mut counts = BTreeMap::new();
    for record in records.iter().filter(|r| r.is_blocked()) {
        if record.reasons.is_empty() {
            *counts.entry("unknown".to_string()).or_insert(0) += 1;
        }
        for reason in &record.reasons {
            *counts.entry(reason.clone()).or_insert(0) += 1;
        }
    }
    counts
}

fn top_addresses<'a>(
    records: impl Iterator<Item = &'a SubmissionRecord>,
    skip_anonymized: bool,
) -> Vec<AddressCount> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for record in records {
        if skip_anonymized && record.anonymized {
            continue;
        }
        *counts.entry(record.address.as_str()).or_insert(0) += 1;
    }

    let mut ranked: Vec<AddressCount> = counts
        .into_iter()
        .map(|(address, count)| AddressCount {
            address: address.to_string(),
            count,
        })
        .collect();
    ranked.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.address.cmp(&b.address)));
    ranked.truncate(TOP_N);
    ranked
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{Decision, FormFields};
    use chrono::TimeZone;

    fn at(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 5, day, hour, 0, 0).unwrap()
    }

    fn record(address: &str, ts: DateTime<Utc>, score: u32, reasons: &[&str]) -> SubmissionRecord {
        let decision = if score >= 30 { Decision::Blocked } else { Decision::Allowed };
        let mut fields = FormFields::new();
        fields.insert("email".into(), format!("{}@example.org", address.replace('.', "-")));
        SubmissionRecord::new(
            ts,
            address,
            "fp",
            fields,
            score,
            reasons.iter().map(|r| r.to_string()).collect(),
            decision,
        )
    }

    fn sample() -> Vec<SubmissionRecord> {
        vec![
            record("192.0.2.1", at(10, 9), 0, &[]),
            record("192.0.2.1", at(10, 10), 60, &["honeypot_filled", "spam_keywords"]),
            record("192.0.2.2", at(10, 11), 30, &["rate_limit_exceeded"]),
            record("192.0.2.3", at(11, 9), 10, &["invalid_referer"]),
        ]
    }

    #[test]
    fn test_daily_report() {
        let report = daily_report(&sample(), NaiveDate::from_ymd_opt(2025, 5, 10).unwrap(), "email");
        assert_eq!(report.total, 3);
        assert_eq!(report.blocked, 2);
        assert_eq!(report.allowed, 1);
        assert_eq!(report.avg_risk_score, 30.0);
        assert_eq!(
            report.top_addresses[0],
            AddressCount {
                address: "192.0.2.1".into(),
                count: 2
            }
        );
        assert_eq!(report.reason_counts.get("honeypot_filled"), Some(&1));
        assert_eq!(report.reason_counts.get("rate_limit_exceeded"), Some(&1));
        assert_eq!(report.high_risk.len(), 1);
        assert_eq!(report.high_risk[0].email.as_deref(), Some("192-0-2-1@example.org"));
    }

    #[test]
    fn test_empty_day() {
        let report = daily_report(&sample(), NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(), "email");
        assert_eq!(report.total, 0);
        assert_eq!(report.avg_risk_score, 0.0);
        assert!(report.top_addresses.is_empty());
    }

    #[test]
    fn test_statistics_window_and_anonymized() {
        let mut records = sample();
        records[0].address = "192.0.2.XXX".into();
        records[0].anonymized = true;

        let stats = statistics(&records, 1, at(11, 12));
        // Only records from the last 24 hours
        assert_eq!(stats.total, 1);

        let stats = statistics(&records, 7, at(11, 12));
        assert_eq!(stats.total, 4);
        assert_eq!(stats.blocked, 2);
        assert_eq!(stats.unique_addresses, 3);
        assert!(stats.top_addresses.iter().all(|a| a.address != "192.0.2.XXX"));
        assert_eq!(stats.avg_risk_score, 25.0);
    }

    #[test]
    fn test_trend_fills_gaps() {
        let points = trend(&sample(), 3, at(11, 23));
        assert_eq!(points.len(), 3);
        assert_eq!(points[0].date, NaiveDate::from_ymd_opt(2025, 5, 9).unwrap());
        assert_eq!(points[0].total, 0);
        assert_eq!(points[1].total, 3);
        assert_eq!(points[1].blocked, 2);
        assert_eq!(points[2].total, 1);
        assert!(trend(&sample(), 0, at(11, 23)).is_empty());
    }

    #[test]
    fn test_recent_records() {
        let mut records = sample();
        records[3].anonymized = true;

        let recent = recent_records(records.clone(), 2, false);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].timestamp, at(10, 11));

        let recent = recent_records(records, 10, true);
        assert_eq!(recent.len(), 4);
        assert_eq!(recent[0].timestamp, at(11, 9));
    }
}
