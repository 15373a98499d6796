//! Quota Error Parsing
//!
//! Classifies provider rejections into quota classes and extracts wait
//! hints from `Retry-After` headers or error text.

use std::time::Duration;

use reqwest::header::HeaderMap;

use crate::router::exhaustion::QuotaType;

/// Whether a response indicates quota exhaustion. Most providers use HTTP
/// 429, some return 400/403 with a rate-limit message.
pub fn is_quota_error(status: u16, body: &str) -> bool {
    if status == 429 {
        return true;
    }

    let lower = body.to_lowercase();
    lower.contains("rate limit")
        || lower.contains("rate_limit")
        || lower.contains("too many requests")
        || lower.contains("quota exceeded")
        || lower.contains("resource exhausted")
}

/// Infer the rate-limit window class from the error text
pub fn classify_quota(body: &str) -> QuotaType {
    let lower = body.to_lowercase();

    if lower.contains("per minute")
        || lower.contains("per-minute")
        || lower.contains("requests per min")
        || lower.contains("rpm")
        || lower.contains("tpm")
    {
        QuotaType::PerMinute
    } else if lower.contains("per day")
        || lower.contains("per-day")
        || lower.contains("daily")
        || lower.contains("rpd")
    {
        QuotaType::PerDay
    } else if lower.contains("per month")
        || lower.contains("per-month")
        || lower.contains("monthly")
        || lower.contains("billing")
    {
        QuotaType::PerMonth
    } else {
        QuotaType::Unknown
    }
}

/// Extract a wait hint from the `Retry-After` header, accepting plain
/// seconds or duration strings like "1m30s"
pub fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    let value = headers.get("retry-after")?.to_str().ok()?;

    if let Ok(secs) = value.trim().parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    parse_duration_string(value)
}

/// Parse a duration string like "30s", "5m", "1m30s", "2h", or "500ms"
pub fn parse_duration_string(s: &str) -> Option<Duration> {
    let s = s.trim();

    if let Some(stripped) = s.strip_suffix("ms") {
        return stripped.parse::<u64>().ok().map(Duration::from_millis);
    }

    // Compound formats such as "1m30s" or "2h30m".
    if s.contains('h') || (s.contains('m') && s.contains('s')) {
        let mut total_secs = 0u64;
        let mut digits = String::new();

        for c in s.chars() {
            if c.is_ascii_digit() {
                digits.push(c);
            } else if !digits.is_empty() {
                if let Ok(n) = digits.parse::<u64>() {
                    match c {
                        'h' => total_secs += n * 3600,
                        'm' => total_secs += n * 60,
                        's' => total_secs += n,
                        _ => {}
                    }
                }
                digits.clear();
            }
        }

        if total_secs > 0 {
            return Some(Duration::from_secs(total_secs));
        }
    }

    if let Some(stripped) = s.strip_suffix('s') {
        return stripped.parse::<f64>().ok().map(Duration::from_secs_f64);
    }
    if let Some(stripped) = s.strip_suffix('m') {
        return stripped
            .parse::<u64>()
            .ok()
            .map(|mins| Duration::from_secs(mins * 60));
    }
    if let Some(stripped) = s.strip_suffix('h') {
        return stripped
            .parse::<u64>()
            .ok()
            .map(|hours| Duration::from_secs(hours * 3600));
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn test_is_quota_error() {
        assert!(is_quota_error(429, ""));
        assert!(is_quota_error(400, "Rate limit exceeded for gpt-4o"));
        assert!(is_quota_error(403, "Too Many Requests"));
        assert!(is_quota_error(429, "RESOURCE_EXHAUSTED"));
        assert!(!is_quota_error(200, "success"));
        assert!(!is_quota_error(500, "internal error"));
        assert!(!is_quota_error(401, "invalid api key"));
    }

    #[test]
    fn test_classify_quota() {
        assert_eq!(
            classify_quota("Rate limit reached: 10 requests per minute"),
            QuotaType::PerMinute
        );
        assert_eq!(classify_quota("TPM limit exceeded"), QuotaType::PerMinute);
        assert_eq!(
            classify_quota("You have hit your daily quota (RPD)"),
            QuotaType::PerDay
        );
        assert_eq!(
            classify_quota("monthly spending cap reached"),
            QuotaType::PerMonth
        );
        assert_eq!(classify_quota("quota exceeded"), QuotaType::Unknown);
    }

    #[test]
    fn test_parse_retry_after_seconds_and_durations() {
        let mut headers = HeaderMap::new();
        headers.insert("retry-after", HeaderValue::from_static("17"));
        assert_eq!(parse_retry_after(&headers), Some(Duration::from_secs(17)));

        headers.insert("retry-after", HeaderValue::from_static("1m30s"));
        assert_eq!(parse_retry_after(&headers), Some(Duration::from_secs(90)));

        headers.remove("retry-after");
        assert_eq!(parse_retry_after(&headers), None);
    }

    #[test]
    fn test_parse_duration_string() {
        assert_eq!(parse_duration_string("30s"), Some(Duration::from_secs(30)));
        assert_eq!(parse_duration_string("5m"), Some(Duration::from_secs(300)));
        assert_eq!(parse_duration_string("2h"), Some(Duration::from_secs(7200)));
        assert_eq!(
            parse_duration_string("2h30m"),
            Some(Duration::from_secs(9000))
        );
        assert_eq!(
            parse_duration_string("500ms"),
            Some(Duration::from_millis(500))
        );
        assert_eq!(parse_duration_string("garbage"), None);
    }
}
