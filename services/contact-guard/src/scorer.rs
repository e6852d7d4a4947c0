// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Heuristic spam scoring.
//!
//! Scoring is a pure function of the submission, the request context and the
//! compiled configuration. Each rule adds a non-negative number of points;
//! the total is clamped to 100.

use crate::config::ScoringConfig;
use crate::error::ConfigError;
use crate::record::FormFields;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// Highest possible risk score.
pub const MAX_SCORE: u32 = 100;

/// Stable short code for each scoring rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasonCode {
    IpBlocklisted,
    HoneypotFilled,
    MissingTimestamp,
    SubmittedTooFast,
    SubmittedTooSlow,
    RateLimitExceeded,
    MissingRequiredFields,
    DisposableEmail,
    EmailTooLong,
    InvalidEmail,
    SpamKeywords,
    SuspiciousPatterns,
    ExcessiveLinks,
    MessageTooShort,
    MessageTooLong,
    NonAlphanumeric,
    ExcessiveCaps,
    InvalidReferer,
}

impl ReasonCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::IpBlocklisted => "ip_blocklisted",
            Self::HoneypotFilled => "honeypot_filled",
            Self::MissingTimestamp => "missing_timestamp",
            Self::SubmittedTooFast => "submitted_too_fast",
            Self::SubmittedTooSlow => "submitted_too_slow",
            Self::RateLimitExceeded => "rate_limit_exceeded",
            Self::MissingRequiredFields => "missing_required_fields",
            Self::DisposableEmail => "disposable_email",
            Self::EmailTooLong => "email_too_long",
            Self::InvalidEmail => "invalid_email",
            Self::SpamKeywords => "spam_keywords",
            Self::SuspiciousPatterns => "suspicious_patterns",
            Self::ExcessiveLinks => "excessive_links",
            Self::MessageTooShort => "message_too_short",
            Self::MessageTooLong => "message_too_long",
            Self::NonAlphanumeric => "non_alphanumeric",
            Self::ExcessiveCaps => "excessive_caps",
            Self::InvalidReferer => "invalid_referer",
        }
    }
}

impl fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The parts of a request the scorer looks at.
#[derive(Debug, Clone, Copy)]
pub struct Submission<'a> {
    pub fields: &'a FormFields,
    /// Epoch seconds at which the form was rendered
    pub rendered_at: Option<i64>,
    pub referer: Option<&'a str>,
}

/// Facts established outside the scorer.
#[derive(Debug, Clone, Copy)]
pub struct ScoreContext {
    pub now: DateTime<Utc>,
    pub rate_limited: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScoreOutcome {
    pub risk_score: u32,
    /// Fired rules in evaluation order
    pub reasons: Vec<ReasonCode>,
}

impl ScoreOutcome {
    /// The outcome forced by a blocklist match.
    pub fn blocklisted() -> Self {
        Self {
            risk_score: MAX_SCORE,
            reasons: vec![ReasonCode::IpBlocklisted],
        }
    }

    pub fn reason_strings(&self) -> Vec<String> {
        self.reasons.iter().map(|r| r.as_str().to_string()).collect()
    }
}

/// Accumulates points and reasons in rule order.
#[derive(Default)]
struct Tally {
    points: u32,
    reasons: Vec<ReasonCode>,
}

impl Tally {
    fn add(&mut self, reason: ReasonCode, points: u32) {
        self.points = self.points.saturating_add(points);
        self.reasons.push(reason);
    }

    fn finish(self) -> ScoreOutcome {
        ScoreOutcome {
            risk_score: self.points.min(MAX_SCORE),
            reasons: self.reasons,
        }
    }
}

const EMAIL_PATTERN: &str = r"^[A-Za-z0-9.!#$%&'*+/=?^_`{|}~-]+@[A-Za-z0-9](?:[A-Za-z0-9-]{0,61}[A-Za-z0-9])?(?:\.[A-Za-z0-9](?:[A-Za-z0-9-]{0,61}[A-Za-z0-9])?)+$";
const LINK_PATTERN: &str = r"https?://[^\s]+";

/// Spam scorer with keyword, pattern and domain lists compiled once.
#[derive(Debug, Clone)]
pub struct SpamScorer {
    config: ScoringConfig,
    keywords: Vec<String>,
    patterns: Vec<Regex>,
    disposable_domains: HashSet<String>,
    allowed_referer_hosts: HashSet<String>,
    email: Regex,
    link: Regex,
}

impl SpamScorer {
    pub fn new(config: ScoringConfig) -> Result<Self, ConfigError> {
        let mut keywords: Vec<String> = Vec::new();
        for keyword in &config.keywords {
            let keyword = keyword.trim().to_lowercase();
            if !keyword.is_empty() && !keywords.contains(&keyword) {
                keywords.push(keyword);
            }
        }

        let patterns = config
            .patterns
            .iter()
            .map(|p| compile(p))
            .collect::<Result<Vec<_>, _>>()?;

        let disposable_domains = config
            .disposable_domains
            .iter()
            .map(|d| d.trim().to_lowercase())
            .collect();
        let allowed_referer_hosts = config
            .allowed_referer_hosts
            .iter()
            .map(|h| h.trim().to_lowercase())
            .collect();

        Ok(Self {
            keywords,
            patterns,
            disposable_domains,
            allowed_referer_hosts,
            email: compile(EMAIL_PATTERN)?,
            link: compile(LINK_PATTERN)?,
            config,
        })
    }

    /// Whether a score reaches the block threshold.
    pub fn blocks(&self, risk_score: u32) -> bool {
        risk_score >= self.config.block_threshold
    }

    /// Score one submission.
    pub fn score(&self, submission: &Submission<'_>, ctx: &ScoreContext) -> ScoreOutcome {
        let c = &self.config;
        let fields = submission.fields;
        let mut tally = Tally::default();

        if !field(fields, &c.honeypot_field).is_empty() {
            tally.add(ReasonCode::HoneypotFilled, c.honeypot_penalty);
        }

        match submission.rendered_at {
            None => tally.add(ReasonCode::MissingTimestamp, c.missing_timestamp_penalty),
            Some(rendered_at) => {
                // Out-of-range stamps are implausible, same as future ones
                let elapsed = ctx.now.timestamp().checked_sub(rendered_at).unwrap_or(-1);
                if elapsed < 0 || elapsed < c.min_elapsed_secs {
                    tally.add(ReasonCode::SubmittedTooFast, c.too_fast_penalty);
                } else if elapsed > c.max_elapsed_secs {
                    tally.add(ReasonCode::SubmittedTooSlow, c.too_slow_penalty);
                }
            }
        }

        if ctx.rate_limited {
            tally.add(ReasonCode::RateLimitExceeded, c.rate_limit_penalty);
        }

        let missing = c
            .required_fields
            .iter()
            .filter(|name| field(fields, name).is_empty())
            .count() as u32;
        if missing > 0 {
            tally.add(
                ReasonCode::MissingRequiredFields,
                missing.saturating_mul(c.missing_field_penalty),
            );
        }

        if let Some((reason, points)) = self.email_rule(field(fields, &c.email_field)) {
            tally.add(reason, points);
        }

        let message = field(fields, &c.message_field);
        self.content_rules(message, &mut tally);

        if !self.referer_ok(submission.referer) {
            tally.add(ReasonCode::InvalidReferer, c.referer_penalty);
        }

        tally.finish()
    }

    /// Disposable beats too long beats malformed; only one contributes.
    fn email_rule(&self, email: &str) -> Option<(ReasonCode, u32)> {
        let c = &self.config;
        if email.is_empty() {
            return None;
        }

        let domain = email
            .rsplit_once('@')
            .map(|(_, d)| d.to_lowercase())
            .unwrap_or_default();
        if self.disposable_domains.contains(&domain) {
            Some((ReasonCode::DisposableEmail, c.disposable_email_penalty))
        } else if email.chars().count() > c.max_email_length {
            Some((ReasonCode::EmailTooLong, c.email_too_long_penalty))
        } else if !self.email.is_match(email) {
            Some((ReasonCode::InvalidEmail, c.invalid_email_penalty))
        } else {
            None
        }
    }

    fn content_rules(&self, message: &str, tally: &mut Tally) {
        let c = &self.config;

        let lower = message.to_lowercase();
        let keywords = self.keywords.iter().filter(|k| lower.contains(k.as_str())).count() as u32;
        if keywords > 0 {
            tally.add(ReasonCode::SpamKeywords, keywords.saturating_mul(c.keyword_penalty));
        }

        let patterns = self.patterns.iter().filter(|p| p.is_match(message)).count() as u32;
        if patterns > 0 {
            tally.add(ReasonCode::SuspiciousPatterns, patterns.saturating_mul(c.pattern_penalty));
        }

        let links = self.link.find_iter(message).count();
        if links > c.max_links {
            let extra = (links - c.max_links) as u32;
            tally.add(ReasonCode::ExcessiveLinks, extra.saturating_mul(c.link_penalty));
        }

        if message.is_empty() {
            return;
        }

        let length = message.chars().count();
        if length < c.min_message_length {
            tally.add(ReasonCode::MessageTooShort, c.short_message_penalty);
        } else if length > c.max_message_length {
            tally.add(ReasonCode::MessageTooLong, c.long_message_penalty);
        }

        let alnum = message.chars().filter(|ch| ch.is_alphanumeric()).count();
        if (alnum as f64 / length as f64) < c.min_alnum_ratio {
            tally.add(ReasonCode::NonAlphanumeric, c.symbol_penalty);
        }

        let (letters, upper) = message
            .chars()
            .filter(|ch| ch.is_alphabetic())
            .fold((0usize, 0usize), |(l, u), ch| (l + 1, u + usize::from(ch.is_uppercase())));
        if letters >= c.caps_min_letters && (upper as f64 / letters as f64) > c.max_caps_ratio {
            tally.add(ReasonCode::ExcessiveCaps, c.caps_penalty);
        }
    }

    fn referer_ok(&self, referer: Option<&str>) -> bool {
        let Some(referer) = referer.map(str::trim).filter(|r| !r.is_empty()) else {
            return false;
        };
        let Ok(url) = url::Url::parse(referer) else {
            return false;
        };
        let Some(host) = url.host_str() else {
            return false;
        };
        self.allowed_referer_hosts.is_empty()
            || self.allowed_referer_hosts.contains(&host.to_lowercase())
    }
}

fn field<'a>(fields: &'a FormFields, name: &str) -> &'a str {
    fields.get(name).map(|v| v.trim()).unwrap_or("")
}

fn compile(pattern: &str) -> Result<Regex, ConfigError> {
    Regex::new(pattern).map_err(|source| ConfigError::Pattern {
        pattern: pattern.to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
    }

    fn clean_fields() -> FormFields {
        let mut fields = FormFields::new();
        fields.insert("name".into(), "Grace Hopper".into());
        fields.insert("email".into(), "grace@example.org".into());
        fields.insert(
            "message".into(),
            "Hello, I would like to ask about your consulting services.".into(),
        );
        fields
    }

    fn scorer() -> SpamScorer {
        SpamScorer::new(ScoringConfig {
            allowed_referer_hosts: vec!["example.org".into()],
            ..Default::default()
        })
        .unwrap()
    }

    fn score_with(fields: &FormFields, rate_limited: bool) -> ScoreOutcome {
        let submission = Submission {
            fields,
            rendered_at: Some(now().timestamp() - 30),
            referer: Some("https://example.org/contact"),
        };
        scorer().score(&submission, &ScoreContext { now: now(), rate_limited })
    }

    #[test]
    fn test_clean_submission_scores_zero() {
        let outcome = score_with(&clean_fields(), false);
        assert_eq!(outcome.risk_score, 0);
        assert!(outcome.reasons.is_empty());
    }

    #[test]
    fn test_honeypot() {
        let mut fields = clean_fields();
        fields.insert("website".into(), "http://spam.example".into());
        let outcome = score_with(&fields, false);
        assert_eq!(outcome.reasons, vec![ReasonCode::HoneypotFilled]);
        assert_eq!(outcome.risk_score, 50);
        assert!(scorer().blocks(outcome.risk_score));
    }

    #[test]
    fn test_timing_rules() {
        let fields = clean_fields();
        let s = scorer();
        let ctx = ScoreContext { now: now(), rate_limited: false };
        let referer = Some("https://example.org/");

        let missing = s.score(&Submission { fields: &fields, rendered_at: None, referer }, &ctx);
        assert_eq!(missing.reasons, vec![ReasonCode::MissingTimestamp]);
        assert_eq!(missing.risk_score, 15);

        let fast = Submission { fields: &fields, rendered_at: Some(now().timestamp() - 1), referer };
        assert_eq!(s.score(&fast, &ctx).reasons, vec![ReasonCode::SubmittedTooFast]);

        let future = Submission { fields: &fields, rendered_at: Some(now().timestamp() + 60), referer };
        assert_eq!(s.score(&future, &ctx).reasons, vec![ReasonCode::SubmittedTooFast]);

        for extreme in [i64::MIN, i64::MAX] {
            let forged = Submission { fields: &fields, rendered_at: Some(extreme), referer };
            assert_eq!(s.score(&forged, &ctx).reasons, vec![ReasonCode::SubmittedTooFast]);
        }

        let slow = Submission { fields: &fields, rendered_at: Some(now().timestamp() - 7200), referer };
        let outcome = s.score(&slow, &ctx);
        assert_eq!(outcome.reasons, vec![ReasonCode::SubmittedTooSlow]);
        assert_eq!(outcome.risk_score, 10);
    }

    #[test]
    fn test_rate_limit_flag() {
        let outcome = score_with(&clean_fields(), true);
        assert_eq!(outcome.reasons, vec![ReasonCode::RateLimitExceeded]);
        assert_eq!(outcome.risk_score, 30);
    }

    #[test]
    fn test_missing_required_fields_scale() {
        let mut fields = clean_fields();
        fields.remove("name");
        fields.insert("email".into(), "   ".into());
        let outcome = score_with(&fields, false);
        assert_eq!(outcome.reasons, vec![ReasonCode::MissingRequiredFields]);
        assert_eq!(outcome.risk_score, 20);
    }

    #[test]
    fn test_email_rules_are_exclusive() {
        let mut fields = clean_fields();
        fields.insert("email".into(), "someone@Mailinator.com".into());
        assert_eq!(score_with(&fields, false).reasons, vec![ReasonCode::DisposableEmail]);

        fields.insert("email".into(), format!("{}@example.org", "a".repeat(260)));
        let outcome = score_with(&fields, false);
        assert_eq!(outcome.reasons, vec![ReasonCode::EmailTooLong]);
        assert_eq!(outcome.risk_score, 20);

        fields.insert("email".into(), "not-an-email".into());
        let outcome = score_with(&fields, false);
        assert_eq!(outcome.reasons, vec![ReasonCode::InvalidEmail]);
        assert_eq!(outcome.risk_score, 15);
    }

    #[test]
    fn test_keywords_patterns_links() {
        let mut fields = clean_fields();
        fields.insert(
            "message".into(),
            "Congratulations WINNER, you won the lottery! Visit https://a.example/1 \
             https://b.example/2 https://c.example/3 https://d.example/4 https://e.example/5"
                .into(),
        );
        let outcome = score_with(&fields, false);
        assert_eq!(
            outcome.reasons,
            vec![ReasonCode::SpamKeywords, ReasonCode::ExcessiveLinks]
        );
        // 3 keywords x 5 + 2 extra links x 5
        assert_eq!(outcome.risk_score, 25);

        fields.insert("message".into(), "Please run <script>eval(x)</script> now".into());
        let outcome = score_with(&fields, false);
        assert_eq!(outcome.reasons, vec![ReasonCode::SuspiciousPatterns]);
        assert_eq!(outcome.risk_score, 20);
    }

    #[test]
    fn test_message_shape_rules() {
        let mut fields = clean_fields();
        fields.insert("message".into(), "hi there".into());
        assert_eq!(score_with(&fields, false).reasons, vec![ReasonCode::MessageTooShort]);

        fields.insert("message".into(), "word ".repeat(1100));
        assert_eq!(score_with(&fields, false).reasons, vec![ReasonCode::MessageTooLong]);

        fields.insert("message".into(), "!!!! ???? $$$$ %%%% ab".into());
        assert_eq!(score_with(&fields, false).reasons, vec![ReasonCode::NonAlphanumeric]);

        fields.insert("message".into(), "PLEASE CALL ME BACK TODAY about the offer".into());
        assert_eq!(score_with(&fields, false).reasons, vec![ReasonCode::ExcessiveCaps]);

        fields.insert("message".into(), "OK OK OK".into());
        // Short, but too few letters for the caps rule
        assert_eq!(score_with(&fields, false).reasons, vec![ReasonCode::MessageTooShort]);
    }

    #[test]
    fn test_referer() {
        let fields = clean_fields();
        let s = scorer();
        let ctx = ScoreContext { now: now(), rate_limited: false };
        let rendered_at = Some(now().timestamp() - 30);

        for referer in [None, Some(""), Some("not a url"), Some("https://evil.example/")] {
            let outcome = s.score(&Submission { fields: &fields, rendered_at, referer }, &ctx);
            assert_eq!(outcome.reasons, vec![ReasonCode::InvalidReferer], "{referer:?}");
        }

        let open = SpamScorer::new(ScoringConfig::default()).unwrap();
        let outcome = open.score(
            &Submission { fields: &fields, rendered_at, referer: Some("https://anywhere.example/") },
            &ctx,
        );
        assert!(outcome.reasons.is_empty());
    }

    #[test]
    fn test_score_is_clamped() {
        let mut fields = FormFields::new();
        fields.insert("website".into(), "x".into());
        fields.insert("message".into(), "$$$".into());
        let submission = Submission { fields: &fields, rendered_at: None, referer: None };
        let outcome = scorer().score(&submission, &ScoreContext { now: now(), rate_limited: true });
        assert_eq!(outcome.risk_score, MAX_SCORE);
        assert_eq!(outcome.reasons[0], ReasonCode::HoneypotFilled);
    }

    #[test]
    fn test_bad_pattern_is_config_error() {
        let config = ScoringConfig {
            patterns: vec!["(unclosed".into()],
            ..Default::default()
        };
        assert!(matches!(SpamScorer::new(config), Err(ConfigError::Pattern { .. })));
    }

    #[test]
    fn test_reason_codes_serialize_as_strings() {
        assert_eq!(
            serde_json::to_value(ReasonCode::IpBlocklisted).unwrap(),
            serde_json::json!("ip_blocklisted")
        );
        assert_eq!(ScoreOutcome::blocklisted().reason_strings(), vec!["ip_blocklisted"]);
    }
}
