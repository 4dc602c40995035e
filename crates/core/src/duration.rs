//! Human-readable duration strings ("30s", "5m", "1h30m", "2d", "250ms").

use std::time::Duration;

/// Parse a duration string into a [`Duration`].
///
/// Components: `Xd` (days), `Xh` (hours), `Xm` (minutes), `Xs` (seconds),
/// `Xms` (milliseconds). Components can be combined: "2h30m", "1d12h".
/// A bare number is treated as seconds. Returns `None` for empty or
/// malformed input.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }

    let mut total_ms: u64 = 0;
    let mut num_buf = String::new();
    let mut found_unit = false;
    let mut chars = s.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch.is_ascii_digit() {
            num_buf.push(ch);
            continue;
        }

        let n: u64 = num_buf.parse().ok()?;
        num_buf.clear();
        let unit_ms = match ch {
            'd' => 86_400_000,
            'h' => 3_600_000,
            'm' if chars.peek() == Some(&'s') => {
                chars.next();
                1
            }
            'm' => 60_000,
            's' => 1_000,
            _ => return None,
        };
        total_ms = total_ms.checked_add(n.checked_mul(unit_ms)?)?;
        found_unit = true;
    }

    if !num_buf.is_empty() {
        // "30m15" is ambiguous.
        if found_unit {
            return None;
        }
        let n: u64 = num_buf.parse().ok()?;
        total_ms = n.checked_mul(1_000)?;
    }

    Some(Duration::from_millis(total_ms))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_units() {
        assert_eq!(parse_duration("30s"), Some(Duration::from_secs(30)));
        assert_eq!(parse_duration("5m"), Some(Duration::from_secs(300)));
        assert_eq!(parse_duration("1h"), Some(Duration::from_secs(3_600)));
        assert_eq!(parse_duration("2d"), Some(Duration::from_secs(172_800)));
        assert_eq!(parse_duration("250ms"), Some(Duration::from_millis(250)));
    }

    #[test]
    fn combined_units() {
        assert_eq!(
            parse_duration("1h30m"),
            Some(Duration::from_secs(3_600 + 1_800))
        );
        assert_eq!(
            parse_duration("1d2h3m4s"),
            Some(Duration::from_secs(86_400 + 7_200 + 180 + 4))
        );
        assert_eq!(
            parse_duration("1m500ms"),
            Some(Duration::from_millis(60_500))
        );
    }

    #[test]
    fn bare_number_is_seconds() {
        assert_eq!(parse_duration("90"), Some(Duration::from_secs(90)));
    }

    #[test]
    fn zero_is_valid() {
        assert_eq!(parse_duration("0s"), Some(Duration::ZERO));
    }

    #[test]
    fn rejects_garbage() {
        assert_eq!(parse_duration(""), None);
        assert_eq!(parse_duration("   "), None);
        assert_eq!(parse_duration("abc"), None);
        assert_eq!(parse_duration("5x"), None);
        assert_eq!(parse_duration("30m15"), None);
        assert_eq!(parse_duration("m"), None);
    }
}
