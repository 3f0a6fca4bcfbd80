//! Duration string parsing for TTL policies
//!
//! Two notations are accepted:
//!
//! - compact unit form: `30s`, `15m`, `12h`, `30d`, `1w`, compounds such as
//!   `1h30m`, and a bare number meaning seconds
//! - an ISO-8601 subset: `P[nW][nD][T[nH][nM][nS]]`, e.g. `P30D`, `PT12H`,
//!   `P1DT2H30M`

use std::time::Duration;

use crate::error::{Error, Result};

const MINUTE: u64 = 60;
const HOUR: u64 = 60 * MINUTE;
const DAY: u64 = 24 * HOUR;
const WEEK: u64 = 7 * DAY;

/// Longest accepted duration: 100 years of 365 days
pub const MAX_DURATION: Duration = Duration::from_secs(100 * 365 * DAY);

/// Parse a TTL duration string. Zero durations and anything longer than
/// [`MAX_DURATION`] are rejected.
pub fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim();
    if s.is_empty() {
        return Err(Error::DurationParse("empty duration string".to_string()));
    }

    let total_secs = if s.starts_with('P') || s.starts_with('p') {
        parse_iso8601(s)?
    } else {
        parse_compact(s)?
    };

    if total_secs == 0 {
        return Err(Error::DurationParse(
            "duration must be greater than 0".to_string(),
        ));
    }
    if total_secs > MAX_DURATION.as_secs() {
        return Err(Error::DurationParse(format!(
            "duration exceeds the {} day maximum: {}",
            MAX_DURATION.as_secs() / DAY,
            s
        )));
    }

    Ok(Duration::from_secs(total_secs))
}

fn parse_number(buf: &str, original: &str) -> Result<u64> {
    buf.parse()
        .map_err(|_| Error::DurationParse(format!("invalid number in duration: {}", original)))
}

fn accumulate(total: u64, num: u64, multiplier: u64, original: &str) -> Result<u64> {
    num.checked_mul(multiplier)
        .and_then(|secs| total.checked_add(secs))
        .ok_or_else(|| Error::DurationParse(format!("duration out of range: {}", original)))
}

fn parse_compact(s: &str) -> Result<u64> {
    let mut total_secs: u64 = 0;
    let mut num_buf = String::new();

    for c in s.chars() {
        if c.is_ascii_digit() {
            num_buf.push(c);
            continue;
        }

        let num = parse_number(&num_buf, s)?;
        num_buf.clear();

        let multiplier = match c {
            'w' | 'W' => WEEK,
            'd' | 'D' => DAY,
            'h' | 'H' => HOUR,
            'm' | 'M' => MINUTE,
            's' | 'S' => 1,
            _ => {
                return Err(Error::DurationParse(format!(
                    "unknown duration unit '{}' in: {}",
                    c, s
                )))
            }
        };

        total_secs = accumulate(total_secs, num, multiplier, s)?;
    }

    // Trailing number without unit is seconds
    if !num_buf.is_empty() {
        total_secs = accumulate(total_secs, parse_number(&num_buf, s)?, 1, s)?;
    }

    Ok(total_secs)
}

fn parse_iso8601(s: &str) -> Result<u64> {
    let body = &s[1..];
    if body.is_empty() {
        return Err(Error::DurationParse(format!(
            "ISO-8601 duration has no components: {}",
            s
        )));
    }

    let mut total_secs: u64 = 0;
    let mut num_buf = String::new();
    let mut in_time = false;
    let mut components = 0;
    let mut time_components = 0;

    for c in body.chars() {
        if c.is_ascii_digit() {
            num_buf.push(c);
            continue;
        }

        if c == 'T' || c == 't' {
            if in_time || !num_buf.is_empty() {
                return Err(Error::DurationParse(format!(
                    "misplaced 'T' in ISO-8601 duration: {}",
                    s
                )));
            }
            in_time = true;
            continue;
        }

        if num_buf.is_empty() {
            return Err(Error::DurationParse(format!(
                "missing number before '{}' in: {}",
                c, s
            )));
        }
        let num = parse_number(&num_buf, s)?;
        num_buf.clear();

        let multiplier = match (in_time, c.to_ascii_uppercase()) {
            (false, 'W') => WEEK,
            (false, 'D') => DAY,
            (true, 'H') => HOUR,
            (true, 'M') => MINUTE,
            (true, 'S') => 1,
            _ => {
                return Err(Error::DurationParse(format!(
                    "unsupported ISO-8601 designator '{}' in: {}",
                    c, s
                )))
            }
        };

        total_secs = accumulate(total_secs, num, multiplier, s)?;
        components += 1;
        if in_time {
            time_components += 1;
        }
    }

    if !num_buf.is_empty() || components == 0 || (in_time && time_components == 0) {
        return Err(Error::DurationParse(format!(
            "incomplete ISO-8601 duration: {}",
            s
        )));
    }

    Ok(total_secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration_units() {
        assert_eq!(parse_duration("45s").unwrap(), Duration::from_secs(45));
        assert_eq!(parse_duration("30m").unwrap(), Duration::from_secs(1800));
        assert_eq!(parse_duration("24h").unwrap(), Duration::from_secs(86400));
        assert_eq!(parse_duration("30d").unwrap(), Duration::from_secs(30 * 86400));
        assert_eq!(parse_duration("1w").unwrap(), Duration::from_secs(604800));
        assert_eq!(parse_duration("1H").unwrap(), Duration::from_secs(3600));
    }

    #[test]
    fn test_parse_duration_combined() {
        assert_eq!(parse_duration("1h30m").unwrap(), Duration::from_secs(5400));
        assert_eq!(parse_duration("1w2d").unwrap(), Duration::from_secs(9 * 86400));
    }

    #[test]
    fn test_parse_duration_raw_seconds() {
        assert_eq!(parse_duration("3600").unwrap(), Duration::from_secs(3600));
        assert_eq!(parse_duration("  90  ").unwrap(), Duration::from_secs(90));
    }

    #[test]
    fn test_parse_iso8601() {
        assert_eq!(parse_duration("P30D").unwrap(), Duration::from_secs(30 * 86400));
        assert_eq!(parse_duration("PT12H").unwrap(), Duration::from_secs(12 * 3600));
        assert_eq!(parse_duration("PT90S").unwrap(), Duration::from_secs(90));
        assert_eq!(
            parse_duration("P1DT2H30M").unwrap(),
            Duration::from_secs(86400 + 2 * 3600 + 30 * 60)
        );
        assert_eq!(parse_duration("P2W").unwrap(), Duration::from_secs(14 * 86400));
    }

    #[test]
    fn test_parse_duration_errors() {
        assert!(parse_duration("").is_err());
        assert!(parse_duration("abc").is_err());
        assert!(parse_duration("10x").is_err());
        assert!(parse_duration("0s").is_err());
        assert!(parse_duration("P").is_err());
        assert!(parse_duration("99999999999999w").is_err());
        assert!(parse_duration("99999999999999999999s").is_err());
        assert!(parse_duration("P99999999999999W").is_err());
        assert!(parse_duration("PT").is_err());
        assert!(parse_duration("P5H").is_err()); // hours need the T section
        assert!(parse_duration("PT5D").is_err());
        assert!(parse_duration("P1DT").is_err());
        assert!(parse_duration("P1D2").is_err());
    }

    #[test]
    fn test_parse_errors_are_config_errors() {
        let err = parse_duration("7y").unwrap_err();
        assert!(err.is_config_error());
    }

    #[test]
    fn test_parse_duration_ceiling() {
        assert_eq!(parse_duration("36500d").unwrap(), MAX_DURATION);
        assert!(parse_duration("36501d").is_err());
        assert!(parse_duration("5300w").is_err());
    }
}
