// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: Apache-2.0

//! Test data generators for submission and attack simulation.

use chrono::{DateTime, Utc};
use contact_guard::record::FormFields;
use contact_guard::SubmissionRequest;
use std::net::{IpAddr, Ipv4Addr};

/// Generate a pool of IP addresses for testing.
pub fn generate_ips(count: usize) -> Vec<IpAddr> {
    (0..count)
        .map(|i| {
            // Use 10.x.x.x private range
            let a = ((i >> 16) & 0xFF) as u8;
            let b = ((i >> 8) & 0xFF) as u8;
            let c = (i & 0xFF) as u8;
            IpAddr::V4(Ipv4Addr::new(10, a, b, c))
        })
        .collect()
}

/// A form a human would plausibly send.
pub fn clean_form() -> FormFields {
    let mut fields = FormFields::new();
    fields.insert("name".into(), "Grace Hopper".into());
    fields.insert("email".into(), "grace@example.org".into());
    fields.insert("subject".into(), "Workshop enquiry".into());
    fields.insert(
        "message".into(),
        "Hello, could you send me the dates for the next compiler workshop? Thanks.".into(),
    );
    fields
}

/// A clean form with the honeypot field filled in.
pub fn honeypot_form() -> FormFields {
    let mut fields = clean_form();
    fields.insert("website".into(), "http://spam.example".into());
    fields
}

/// A clean form whose message carries the first `count` default keywords.
pub fn keyword_form(count: usize) -> FormFields {
    const KEYWORDS: [&str; 6] = ["casino", "lottery", "prize", "winner", "buy now", "free money"];
    let mut fields = clean_form();
    let mut message = String::from("Dear friend, this is about your account");
    for keyword in KEYWORDS.iter().take(count) {
        message.push_str(", ");
        message.push_str(keyword);
    }
    message.push('.');
    fields.insert("message".into(), message);
    fields
}

/// Link-stuffed shouting, the classic bot payload.
pub fn bot_form() -> FormFields {
    let mut fields = clean_form();
    fields.insert("email".into(), "bot@mailinator.com".into());
    fields.insert(
        "message".into(),
        "CLICK HERE NOW http://a.example http://b.example http://c.example http://d.example".into(),
    );
    fields
}

/// Build a request that passes the timing and referer rules at `now`.
pub fn request_at(address: &str, form_fields: FormFields, now: DateTime<Utc>) -> SubmissionRequest {
    SubmissionRequest {
        form_fields,
        client_address: address.to_string(),
        user_agent: Some("Mozilla/5.0 (X11; Linux x86_64)".into()),
        accept_language: Some("en-GB,en;q=0.9".into()),
        referer: Some("https://example.org/contact".into()),
        rendered_at_epoch_seconds: Some(now.timestamp() - 45),
    }
}

/// Address inputs that must be rejected before anything is recorded.
pub fn malformed_addresses() -> Vec<&'static str> {
    vec![
        "",
        "   ",
        "not-an-ip",
        "256.1.1.1",
        "1.2.3",
        "1.2.3.4.5",
        "::g",
        "192.168.1.1/24",
    ]
}

/// Malformed blocklist targets, each with the expected error code.
pub fn malformed_targets() -> Vec<(&'static str, &'static str)> {
    vec![
        ("10.0.0.300", "invalid_address"),
        ("10.0.0.0/33", "invalid_prefix"),
        ("2001:db8::/129", "invalid_prefix"),
        ("10.0.0.0/", "invalid_cidr"),
        ("10.0.0.0/abc", "invalid_cidr"),
        ("nonsense", "invalid_address"),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_ips() {
        let ips = generate_ips(256);
        assert_eq!(ips.len(), 256);
        // All should be unique
        let unique: std::collections::HashSet<_> = ips.iter().collect();
        assert_eq!(unique.len(), 256);
    }

    #[test]
    fn test_keyword_form() {
        let form = keyword_form(2);
        assert!(form["message"].contains("casino"));
        assert!(form["message"].contains("lottery"));
        assert!(!form["message"].contains("prize"));
    }
}
