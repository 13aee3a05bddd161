//! Self-contained date formatter bound to the date-fns `format` name.
//!
//! Supports the common pattern tokens lessons use. Unknown letters pass through
//! unchanged and `'quoted'` text is emitted literally.

use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, TimeZone, Timelike, Utc};
use serde_json::Value;

const TOKENS: &[&str] = &[
    "yyyy", "MMMM", "MMM", "EEEE", "EEE", "yy", "MM", "dd", "do", "HH", "hh", "mm", "ss", "M",
    "d", "H", "h", "m", "s", "a",
];

const MONTHS: [&str; 12] = [
    "January",
    "February",
    "March",
    "April",
    "May",
    "June",
    "July",
    "August",
    "September",
    "October",
    "November",
    "December",
];

/// Interpret a date argument: RFC 3339, plain `YYYY-MM-DD`, or epoch milliseconds.
pub fn parse_date(value: &Value) -> Option<NaiveDateTime> {
    match value {
        Value::Number(n) => {
            let millis = n.as_f64()? as i64;
            Utc.timestamp_millis_opt(millis)
                .single()
                .map(|dt| dt.naive_utc())
        }
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.naive_utc())
            .ok()
            .or_else(|| NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S").ok())
            .or_else(|| {
                NaiveDate::parse_from_str(s, "%Y-%m-%d")
                    .ok()
                    .and_then(|d| d.and_hms_opt(0, 0, 0))
            }),
        _ => None,
    }
}

fn ordinal(day: u32) -> String {
    let suffix = match (day % 10, day % 100) {
        (_, 11..=13) => "th",
        (1, _) => "st",
        (2, _) => "nd",
        (3, _) => "rd",
        _ => "th",
    };
    format!("{day}{suffix}")
}

fn render_token(token: &str, dt: &NaiveDateTime) -> String {
    let hour12 = match dt.hour() % 12 {
        0 => 12,
        h => h,
    };
    match token {
        "yyyy" => format!("{:04}", dt.year()),
        "yy" => format!("{:02}", dt.year().rem_euclid(100)),
        "MMMM" => MONTHS[dt.month0() as usize].to_string(),
        "MMM" => MONTHS[dt.month0() as usize][..3].to_string(),
        "MM" => format!("{:02}", dt.month()),
        "M" => dt.month().to_string(),
        "dd" => format!("{:02}", dt.day()),
        "do" => ordinal(dt.day()),
        "d" => dt.day().to_string(),
        "EEEE" => dt.format("%A").to_string(),
        "EEE" => dt.format("%a").to_string(),
        "HH" => format!("{:02}", dt.hour()),
        "H" => dt.hour().to_string(),
        "hh" => format!("{hour12:02}"),
        "h" => hour12.to_string(),
        "mm" => format!("{:02}", dt.minute()),
        "m" => dt.minute().to_string(),
        "ss" => format!("{:02}", dt.second()),
        "s" => dt.second().to_string(),
        "a" => if dt.hour() < 12 { "AM" } else { "PM" }.to_string(),
        _ => token.to_string(),
    }
}

/// Format `dt` with a date-fns style pattern.
pub fn format_date(dt: &NaiveDateTime, pattern: &str) -> String {
    let mut out = String::new();
    let mut rest = pattern;
    while let Some(c) = rest.chars().next() {
        if c == '\'' {
            let body = &rest[1..];
            match body.find('\'') {
                Some(0) => {
                    out.push('\'');
                    rest = &body[1..];
                }
                Some(end) => {
                    out.push_str(&body[..end]);
                    rest = &body[end + 1..];
                }
                None => {
                    out.push_str(body);
                    rest = "";
                }
            }
            continue;
        }
        if let Some(token) = TOKENS.iter().find(|t| rest.starts_with(**t)) {
            out.push_str(&render_token(token, dt));
            rest = &rest[token.len()..];
            continue;
        }
        out.push(c);
        rest = &rest[c.len_utf8()..];
    }
    out
}

/// The `format(date, pattern)` builtin: unparseable dates render as their own text.
pub fn format_value(date: &Value, pattern: &str) -> String {
    match parse_date(date) {
        Some(dt) => format_date(&dt, pattern),
        None => match date {
            Value::String(s) => s.clone(),
            _ => String::new(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 5)
            .unwrap()
            .and_hms_opt(14, 7, 9)
            .unwrap()
    }

    #[test]
    fn formats_common_patterns() {
        let dt = sample();
        assert_eq!(format_date(&dt, "yyyy-MM-dd"), "2024-03-05");
        assert_eq!(format_date(&dt, "MMMM d, yyyy"), "March 5, 2024");
        assert_eq!(format_date(&dt, "MMM do"), "Mar 5th");
        assert_eq!(format_date(&dt, "h:mm a"), "2:07 PM");
        assert_eq!(format_date(&dt, "HH:mm:ss"), "14:07:09");
        assert_eq!(format_date(&dt, "EEEE"), "Tuesday");
    }

    #[test]
    fn quoted_text_is_literal() {
        assert_eq!(format_date(&sample(), "'Day' d"), "Day 5");
        assert_eq!(format_date(&sample(), "h''"), "2'");
    }

    #[test]
    fn parses_supported_inputs() {
        assert!(parse_date(&json!("2024-03-05")).is_some());
        assert!(parse_date(&json!("2024-03-05T14:07:09Z")).is_some());
        assert!(parse_date(&json!(0)).is_some());
        assert!(parse_date(&json!("next tuesday")).is_none());
        assert!(parse_date(&json!(null)).is_none());
    }

    #[test]
    fn invalid_dates_fall_back_to_text() {
        assert_eq!(format_value(&json!("soon"), "yyyy"), "soon");
        assert_eq!(format_value(&json!(true), "yyyy"), "");
    }

    #[test]
    fn ordinals() {
        assert_eq!(ordinal(1), "1st");
        assert_eq!(ordinal(12), "12th");
        assert_eq!(ordinal(22), "22nd");
        assert_eq!(ordinal(23), "23rd");
    }
}
