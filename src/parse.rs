use std::time::Duration;

use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::errors::{AppError, AppResult};

/// A log line split into its timestamp prefix and message. `timestamp` is
/// `None` when the leading token was not RFC 3339; entry shaping substitutes
/// the receive time in that case.
#[derive(Clone, Debug, PartialEq)]
pub struct ParsedLine {
    pub timestamp: Option<OffsetDateTime>,
    pub message: String,
}

/// Split a received chunk into trimmed, non-empty lines.
pub fn split_chunk(chunk: &str) -> impl Iterator<Item = &str> {
    chunk.split('\n').map(str::trim_end).filter(|l| !l.is_empty())
}

/// Split once on the first space; the left token is the timestamp candidate.
/// A line without a parseable timestamp becomes the message wholesale.
pub fn parse_line(line: &str) -> ParsedLine {
    if let Some((head, rest)) = line.split_once(' ') {
        if let Ok(ts) = OffsetDateTime::parse(head, &Rfc3339) {
            return ParsedLine {
                timestamp: Some(ts),
                message: rest.to_string(),
            };
        }
    }

    ParsedLine {
        timestamp: None,
        message: line.to_string(),
    }
}

/// Millisecond instant used for duplicate comparison; missing timestamps
/// collapse to 0 so re-fetched unparseable lines still dedup.
pub fn time_ms(ts: Option<OffsetDateTime>) -> i64 {
    ts.map(|t| (t.unix_timestamp_nanos() / 1_000_000) as i64)
        .unwrap_or(0)
}

/// Parse a since-duration like "10s", "5m", "2h", "1d".
pub fn parse_since(s: &str) -> AppResult<Duration> {
    let s = s.trim();

    let Some(unit) = s.chars().last() else {
        return Err(AppError::Cli("empty duration".to_string()));
    };

    let value: u64 = s[..s.len() - unit.len_utf8()]
        .parse()
        .map_err(|_| AppError::Cli(format!("invalid duration '{s}'")))?;

    let secs = match unit {
        's' => value,
        'm' => value * 60,
        'h' => value * 3_600,
        'd' => value * 86_400,
        _ => return Err(AppError::Cli(format!("invalid duration unit in '{s}'"))),
    };

    Ok(Duration::from_secs(secs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn parses_rfc3339_prefix() {
        let parsed = parse_line("2024-01-01T00:00:05Z m5");
        assert_eq!(parsed.timestamp, Some(datetime!(2024-01-01 00:00:05 UTC)));
        assert_eq!(parsed.message, "m5");
    }

    #[test]
    fn parses_fractional_seconds() {
        let parsed = parse_line("2024-01-15T10:30:00.123456789Z pulled image");
        assert_eq!(parsed.message, "pulled image");
        let ts = parsed.timestamp.expect("timestamp");
        assert_eq!(ts.millisecond(), 123);
    }

    #[test]
    fn unparseable_prefix_keeps_whole_line() {
        let parsed = parse_line("hello world");
        assert_eq!(parsed.timestamp, None);
        assert_eq!(parsed.message, "hello world");
    }

    #[test]
    fn line_without_space_is_message() {
        let parsed = parse_line("panic!");
        assert_eq!(parsed.timestamp, None);
        assert_eq!(parsed.message, "panic!");
    }

    #[test]
    fn roundtrips_formatted_timestamps() {
        let ts = datetime!(2024-06-30 23:59:59.5 UTC);
        let line = format!(
            "{} the message",
            ts.format(&time::format_description::well_known::Rfc3339).unwrap()
        );
        let parsed = parse_line(&line);
        assert_eq!(parsed.timestamp, Some(ts));
        assert_eq!(parsed.message, "the message");
    }

    #[test]
    fn split_drops_empty_and_trims_trailing() {
        let lines: Vec<_> = split_chunk("a \r\n\nb\t\nc").collect();
        assert_eq!(lines, vec!["a", "b", "c"]);
    }

    #[test]
    fn missing_timestamp_maps_to_zero_ms() {
        assert_eq!(time_ms(None), 0);
        let ts = datetime!(2024-01-01 00:00:00.250 UTC);
        assert_eq!(time_ms(Some(ts)), ts.unix_timestamp() * 1_000 + 250);
    }

    #[test]
    fn since_accepts_all_units() {
        assert_eq!(parse_since("10s").unwrap(), Duration::from_secs(10));
        assert_eq!(parse_since("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_since("2h").unwrap(), Duration::from_secs(7_200));
        assert_eq!(parse_since("1d").unwrap(), Duration::from_secs(86_400));
    }

    #[test]
    fn since_rejects_garbage() {
        assert!(parse_since("").is_err());
        assert!(parse_since("10x").is_err());
        assert!(parse_since("s").is_err());
        assert!(parse_since("ten seconds").is_err());
    }
}
