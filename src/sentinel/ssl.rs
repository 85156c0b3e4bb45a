//! SSL certificate change and expiry detection.
//!
//! TLS probes report either an error string with a fixed prefix, or a
//! payload of the form `"issuer-or-cn|YYYY-MM-DD HH:MM:SS ±HHMM TZ"`. The
//! tracker remembers the last good payload per monitor and flags expiring
//! and rotated certificates.

use chrono::{DateTime, Duration, FixedOffset, Utc};

/// Prefix reporters put on TLS handshake failures.
pub const CERT_ERROR_PREFIX: &str = "SSL证书错误：";

/// Transient transport failures that must not page anyone.
const IGNORED_ERROR_SUFFIXES: [&str; 3] = ["timeout", "EOF", "timed out"];

/// Evaluate a TLS probe payload against the cached certificate.
///
/// `cache` holds the last non-error payload for the monitor (empty until the
/// first success) and is primed or replaced in place. Returns the alert text
/// when something is worth notifying about. Unparsable payloads are treated
/// as carrying no certificate information.
pub fn check_certificate(data: &str, cache: &mut String, now: DateTime<Utc>) -> Option<String> {
    if data.starts_with(CERT_ERROR_PREFIX) {
        if IGNORED_ERROR_SUFFIXES.iter().any(|s| data.ends_with(s)) {
            return None;
        }
        return Some(data.to_string());
    }

    let new_cert: Vec<&str> = data.split('|').collect();
    if new_cert.len() < 2 {
        return None;
    }

    // First sighting primes the cache; the same payload is still evaluated
    // below, where fingerprint equality keeps a spurious "changed" from firing.
    if cache.is_empty() {
        *cache = data.to_string();
    }

    let expires_new = parse_expiry(new_cert[1]);

    let mut err_msg = None;
    if let Some(exp) = expires_new {
        if exp < now + Duration::days(7) {
            err_msg = Some(format!(
                "The SSL certificate will expire within seven days. Expiration time: {}",
                exp.format("%Y-%m-%d %H:%M:%S")
            ));
        }
    }

    let old_cert: Vec<&str> = cache.split('|').collect();
    let expires_old = old_cert.get(1).and_then(|s| parse_expiry(s));

    // Rotation needs BOTH the fingerprint and the expiry to differ. A reissue
    // that keeps the expiry is accepted silently.
    if old_cert[0] != new_cert[0] && expires_new != expires_old {
        let msg = format!(
            "SSL certificate changed, old: {}, {} expired; new: {}, {} expired.",
            old_cert[0],
            format_expiry(expires_old),
            new_cert[0],
            format_expiry(expires_new)
        );
        *cache = data.to_string();
        err_msg = Some(msg);
    }

    err_msg
}

/// Parse an expiry of the reference shape `"2099-01-01 00:00:00 +0000 UTC"`.
/// The trailing zone abbreviation is display-only and ignored.
fn parse_expiry(s: &str) -> Option<DateTime<FixedOffset>> {
    let fields: Vec<&str> = s.split_whitespace().collect();
    if fields.len() < 3 {
        return None;
    }
    let stamp = format!("{} {} {}", fields[0], fields[1], fields[2]);
    DateTime::parse_from_str(&stamp, "%Y-%m-%d %H:%M:%S %z").ok()
}

fn format_expiry(t: Option<DateTime<FixedOffset>>) -> String {
    match t {
        Some(t) => t.format("%Y-%m-%d %H:%M:%S").to_string(),
        None => "unknown".to_string(),
    }
}
