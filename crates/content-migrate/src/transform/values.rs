//! Scalar casts used by the transformer. None of these fail: unusable input
//! becomes a documented fallback value.

use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::LazyLock;

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use regex::Regex;
use rust_decimal::Decimal;
use serde_json::Value;

static EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9._%+\-]+@[a-z0-9\-]+(\.[a-z0-9\-]+)*\.[a-z]{2,}$").expect("valid regex")
});
static SCHEME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z][a-zA-Z0-9+.\-]*:").expect("valid regex"));

/// Status assigned when a legacy value has no mapping.
pub const FALLBACK_STATUS: &str = "draft";

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y/%m/%d %H:%M:%S",
    "%d.%m.%Y %H:%M:%S",
    "%d.%m.%Y %H:%M",
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%Y %H:%M",
    "%d/%m/%Y %H:%M:%S",
];

const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%Y/%m/%d",
    "%d.%m.%Y",
    "%m/%d/%Y",
    "%d/%m/%Y",
    "%B %d, %Y",
    "%b %d, %Y",
    "%d %B %Y",
    "%d %b %Y",
];

/// Textual form of a scalar; `None` for null, arrays and objects.
pub fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Parse a legacy date representation.
///
/// Accepts unix timestamps (seconds, or milliseconds when larger than 10^11)
/// as numbers or numeric strings, RFC 3339, RFC 2822 and common SQL,
/// European and US layouts. Naive values are taken as UTC.
pub fn parse_datetime(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .and_then(from_timestamp),
        Value::String(s) => parse_datetime_str(s.trim()),
        _ => None,
    }
}

fn from_timestamp(ts: i64) -> Option<DateTime<Utc>> {
    if ts.unsigned_abs() >= 100_000_000_000 {
        Utc.timestamp_millis_opt(ts).single()
    } else {
        Utc.timestamp_opt(ts, 0).single()
    }
}

fn parse_datetime_str(s: &str) -> Option<DateTime<Utc>> {
    if s.is_empty() || s.starts_with("0000-00-00") {
        return None;
    }
    if let Ok(ts) = s.parse::<i64>() {
        return from_timestamp(ts);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(s) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in DATETIME_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }
    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(s, format) {
            return date
                .and_hms_opt(0, 0, 0)
                .map(|naive| Utc.from_utc_datetime(&naive));
        }
    }
    None
}

/// Date cast: RFC 3339 string, falling back to now when unparseable.
pub fn to_date(value: &Value) -> Value {
    if value.is_null() {
        return Value::Null;
    }
    let parsed = parse_datetime(value).unwrap_or_else(Utc::now);
    Value::String(parsed.to_rfc3339_opts(SecondsFormat::Secs, true))
}

/// Status lookup (case-insensitive); unknown values become `draft`.
pub fn to_status(value: &Value, status_map: &BTreeMap<String, String>) -> Value {
    let key = scalar_text(value)
        .map(|s| s.trim().to_lowercase())
        .unwrap_or_default();
    let status = status_map
        .iter()
        .find(|(k, _)| k.to_lowercase() == key)
        .map(|(_, v)| v.as_str())
        .unwrap_or(FALLBACK_STATUS);
    Value::String(status.to_string())
}

/// Price cast: currency symbols and thousands separators dropped; non-numeric becomes null.
pub fn to_price(value: &Value) -> Value {
    let raw = match value {
        Value::Number(n) => n.to_string(),
        Value::String(s) => s
            .chars()
            .filter(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
            .collect(),
        _ => return Value::Null,
    };

    let decimal = Decimal::from_str(&raw).or_else(|_| Decimal::from_scientific(&raw));
    match decimal {
        Ok(d) => serde_json::Number::from_str(&d.normalize().to_string())
            .map(Value::Number)
            .unwrap_or(Value::Null),
        Err(_) => Value::Null,
    }
}

/// Email cast: trimmed and lowercased; invalid addresses become null.
pub fn to_email(value: &Value) -> Value {
    let Some(text) = scalar_text(value) else {
        return Value::Null;
    };
    let email = text.trim().to_lowercase();
    if EMAIL_RE.is_match(&email) {
        Value::String(email)
    } else {
        Value::Null
    }
}

/// URL cast: `https://` injected when no scheme is present.
pub fn to_url(value: &Value) -> Value {
    let Some(text) = scalar_text(value) else {
        return Value::Null;
    };
    let url = text.trim();
    if url.is_empty() {
        return Value::Null;
    }
    if let Some(rest) = url.strip_prefix("//") {
        return Value::String(format!("https://{}", rest));
    }
    if SCHEME_RE.is_match(url) && (url.contains("://") || url.starts_with("mailto:")) {
        return Value::String(url.to_string());
    }
    Value::String(format!("https://{}", url))
}

/// List cast: split on `delimiter`, trimmed, de-duplicated in first-seen order.
pub fn to_list(value: &Value, delimiter: &str) -> Value {
    let items: Vec<String> = match value {
        Value::Array(items) => items.iter().filter_map(scalar_text).collect(),
        Value::Null => Vec::new(),
        other => scalar_text(other)
            .map(|s| s.split(delimiter).map(str::to_string).collect())
            .unwrap_or_default(),
    };

    let mut seen = std::collections::HashSet::new();
    let list: Vec<Value> = items
        .into_iter()
        .map(|item| item.trim().to_string())
        .filter(|item| !item.is_empty())
        .filter(|item| seen.insert(item.clone()))
        .map(Value::String)
        .collect();
    Value::Array(list)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn status_map() -> BTreeMap<String, String> {
        [("1", "published"), ("Published", "published"), ("0", "draft")]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_parse_datetime_layouts() {
        let expected = "2020-03-15T08:30:00Z";
        for input in [
            json!("2020-03-15 08:30:00"),
            json!("2020-03-15T08:30:00Z"),
            json!("15.03.2020 08:30:00"),
            json!("03/15/2020 08:30:00"),
            json!(1584261000),
            json!("1584261000"),
            json!(1584261000000i64),
        ] {
            assert_eq!(to_date(&input), json!(expected), "input {:?}", input);
        }
        assert_eq!(to_date(&json!("2020-03-15")), json!("2020-03-15T00:00:00Z"));
        assert_eq!(to_date(&json!("March 15, 2020")), json!("2020-03-15T00:00:00Z"));
    }

    #[test]
    fn test_malformed_date_falls_back_to_now() {
        let before = Utc::now() - chrono::Duration::seconds(1);
        for input in [json!("not a date"), json!("0000-00-00 00:00:00"), json!(true)] {
            let out = to_date(&input);
            let parsed = DateTime::parse_from_rfc3339(out.as_str().unwrap()).unwrap();
            assert!(parsed >= before);
        }
        assert_eq!(to_date(&Value::Null), Value::Null);
    }

    #[test]
    fn test_extreme_timestamps_degrade() {
        let before = Utc::now() - chrono::Duration::seconds(1);
        for input in [
            json!(i64::MIN),
            json!(i64::MAX),
            json!("-9223372036854775808"),
            json!("9223372036854775807"),
            json!(-1e300),
        ] {
            assert_eq!(parse_datetime(&input), None, "{}", input);
            let out = to_date(&input);
            let parsed = DateTime::parse_from_rfc3339(out.as_str().unwrap()).unwrap();
            assert!(parsed >= before);
        }
        // Millisecond range below zero still parses
        assert_eq!(
            parse_datetime(&json!(-100_000_000_000i64)),
            Utc.timestamp_millis_opt(-100_000_000_000).single()
        );
    }

    #[test]
    fn test_status_lookup() {
        let map = status_map();
        assert_eq!(to_status(&json!(1), &map), json!("published"));
        assert_eq!(to_status(&json!(" PUBLISHED "), &map), json!("published"));
        assert_eq!(to_status(&json!("weird"), &map), json!("draft"));
        assert_eq!(to_status(&Value::Null, &map), json!("draft"));
    }

    #[test]
    fn test_price() {
        assert_eq!(to_price(&json!("$1,299.99")), json!(1299.99));
        assert_eq!(to_price(&json!("19.90 EUR")), json!(19.9));
        assert_eq!(to_price(&json!(42)), json!(42));
        assert_eq!(to_price(&json!("free")), Value::Null);
        assert_eq!(to_price(&json!("1.2.3")), Value::Null);
        assert_eq!(to_price(&json!([1])), Value::Null);
    }

    #[test]
    fn test_email() {
        assert_eq!(to_email(&json!("  John@Example.COM ")), json!("john@example.com"));
        assert_eq!(to_email(&json!("not-an-email")), Value::Null);
        assert_eq!(to_email(&json!("a@b")), Value::Null);
        assert_eq!(to_email(&Value::Null), Value::Null);
    }

    #[test]
    fn test_url() {
        assert_eq!(to_url(&json!("example.com/a")), json!("https://example.com/a"));
        assert_eq!(to_url(&json!("http://example.com")), json!("http://example.com"));
        assert_eq!(to_url(&json!("//cdn.example.com/x")), json!("https://cdn.example.com/x"));
        assert_eq!(to_url(&json!("mailto:a@b.com")), json!("mailto:a@b.com"));
        assert_eq!(to_url(&json!("localhost:8080")), json!("https://localhost:8080"));
        assert_eq!(to_url(&json!("  ")), Value::Null);
    }

    #[test]
    fn test_list() {
        assert_eq!(
            to_list(&json!("news, sport ,news,,  "), ","),
            json!(["news", "sport"])
        );
        assert_eq!(to_list(&json!(["a", " b ", "a", 3]), ","), json!(["a", "b", "3"]));
        assert_eq!(to_list(&json!("a|b"), "|"), json!(["a", "b"]));
        assert_eq!(to_list(&Value::Null, ","), json!([]));
    }
}
