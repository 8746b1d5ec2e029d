//! Duration options for the tick cadence and session timeout.

use std::time::Duration;

/// Shortest accepted tick interval.
pub const MIN_TICK_INTERVAL: Duration = Duration::from_millis(250);

/// Longest accepted tick interval.
pub const MAX_TICK_INTERVAL: Duration = Duration::from_secs(5);

/// Parse a duration from a human-readable string.
///
/// Supports the following suffixes:
/// - `s` or no suffix: seconds
/// - `m`: minutes
/// - `h`: hours
/// - `ms`: milliseconds
///
/// # Examples
/// ```
/// use meeblue_ranger::interval::parse_duration;
/// use std::time::Duration;
///
/// assert_eq!(parse_duration("3s").unwrap(), Duration::from_secs(3));
/// assert_eq!(parse_duration("1m").unwrap(), Duration::from_secs(60));
/// assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
/// ```
pub fn parse_duration(src: &str) -> Result<Duration, String> {
    let src = src.trim();

    if src.is_empty() {
        return Err("empty duration string".to_string());
    }

    let (num, unit_ms) = if let Some(num) = src.strip_suffix("ms") {
        (num, 1)
    } else if let Some(num) = src.strip_suffix('h') {
        (num, 3_600_000)
    } else if let Some(num) = src.strip_suffix('m') {
        (num, 60_000)
    } else if let Some(num) = src.strip_suffix('s') {
        (num, 1000)
    } else {
        (src, 1000)
    };

    let value: u64 = num
        .trim()
        .parse()
        .map_err(|_| format!("invalid duration: {}", src))?;

    value
        .checked_mul(unit_ms)
        .map(Duration::from_millis)
        .ok_or_else(|| format!("duration out of range: {}", src))
}

/// Parse a tick interval, which must lie within
/// [`MIN_TICK_INTERVAL`]..=[`MAX_TICK_INTERVAL`].
///
/// # Examples
/// ```
/// use meeblue_ranger::interval::parse_tick_interval;
/// use std::time::Duration;
///
/// assert_eq!(parse_tick_interval("250ms").unwrap(), Duration::from_millis(250));
/// assert!(parse_tick_interval("10s").is_err());
/// ```
pub fn parse_tick_interval(src: &str) -> Result<Duration, String> {
    let interval = parse_duration(src)?;

    if !(MIN_TICK_INTERVAL..=MAX_TICK_INTERVAL).contains(&interval) {
        return Err(format!(
            "tick interval must be between {}ms and {}ms",
            MIN_TICK_INTERVAL.as_millis(),
            MAX_TICK_INTERVAL.as_millis()
        ));
    }

    Ok(interval)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration_seconds() {
        assert_eq!(parse_duration("3s").unwrap(), Duration::from_secs(3));
        assert_eq!(parse_duration("30s").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_duration("0s").unwrap(), Duration::from_secs(0));
    }

    #[test]
    fn test_parse_duration_minutes_and_hours() {
        assert_eq!(parse_duration("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_duration("2h").unwrap(), Duration::from_secs(7200));
    }

    #[test]
    fn test_parse_duration_milliseconds() {
        assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
    }

    #[test]
    fn test_parse_duration_no_suffix() {
        assert_eq!(parse_duration("10").unwrap(), Duration::from_secs(10));
    }

    #[test]
    fn test_parse_duration_with_whitespace() {
        assert_eq!(parse_duration(" 3s ").unwrap(), Duration::from_secs(3));
        assert_eq!(parse_duration("3 s").unwrap(), Duration::from_secs(3));
    }

    #[test]
    fn test_parse_duration_invalid() {
        assert!(parse_duration("").is_err());
        assert!(parse_duration("abc").is_err());
        assert!(parse_duration("-1s").is_err());
        assert!(parse_duration("18446744073709551615h").is_err());
    }

    #[test]
    fn test_parse_tick_interval_bounds() {
        assert_eq!(
            parse_tick_interval("250ms").unwrap(),
            Duration::from_millis(250)
        );
        assert_eq!(parse_tick_interval("5s").unwrap(), Duration::from_secs(5));
        assert_eq!(parse_tick_interval("1").unwrap(), Duration::from_secs(1));
        assert!(parse_tick_interval("249ms").is_err());
        assert!(parse_tick_interval("5001ms").is_err());
        assert!(parse_tick_interval("1m").is_err());
    }
}
