// Plain-text log file codec: one formatted line per message, and the
// inverse parse used by the query scan.

use crate::error::LogError;
use crate::levels::{parse_level, LEVEL_NAMES};
use crate::message::{LogEntry, LogMessage};
use chrono::{Local, NaiveDateTime, TimeZone};

/// Fixed on-disk time pattern, rendered in the daemon's local zone.
pub const TIME_FORMAT: &str = "%d-%m-%Y %H:%M:%S";

/// Minimum service column width ("MAIN")
pub const MIN_SERVICE_PAD: usize = 4;
/// Minimum level column width ("DEBUG")
pub const MIN_LEVEL_PAD: usize = 5;

/// Column widths used to align the bracketed fields.
///
/// Computed once at daemon start from the configured service names; the
/// level width is the longest level name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PadWidths {
    pub service: usize,
    pub level: usize,
}

impl PadWidths {
    pub fn from_services<'a, I>(services: I) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        let service = services
            .into_iter()
            .map(|s| s.chars().count())
            .fold(MIN_SERVICE_PAD, usize::max);
        let level = LEVEL_NAMES
            .iter()
            .map(|name| name.len())
            .fold(MIN_LEVEL_PAD, usize::max);
        Self { service, level }
    }
}

impl Default for PadWidths {
    fn default() -> Self {
        Self {
            service: MIN_SERVICE_PAD,
            level: MIN_LEVEL_PAD,
        }
    }
}

/// Format one message as a log file line (without the trailing newline).
///
/// Format: `[SERVICE] DD-MM-YYYY HH:MM:SS [LEVEL] "MESSAGE"`.
/// The message text is written verbatim; embedded quotes are not escaped
/// and embedded newlines produce a multi-line record that only this writer
/// may emit.
pub fn format_message(msg: &LogMessage, pad: &PadWidths) -> String {
    format!(
        "[{:<service_pad$}] {} [{:<level_pad$}] \"{}\"",
        msg.service,
        msg.timestamp.format(TIME_FORMAT),
        msg.level.as_str(),
        msg.message,
        service_pad = pad.service,
        level_pad = pad.level,
    )
}

/// Parse a log file line back into an entry.
///
/// Walks the line skeleton: first `]` closes the service, the fixed-width
/// time follows, the next `[...]` holds the level, and the message sits
/// between the first `"` after the level and the last `"` on the line.
/// That last-quote rule means a message whose final character is `"` does
/// not survive a round trip; this matches the writer, which never escapes.
pub fn parse_line(line: &str) -> Result<LogEntry, LogError> {
    if line.len() < 10 {
        return Err(LogError::MalformedLine("line too short".to_string()));
    }
    if !line.starts_with('[') {
        return Err(LogError::MalformedLine(
            "missing opening service bracket".to_string(),
        ));
    }

    let service_end = line
        .find(']')
        .ok_or_else(|| LogError::MalformedLine("missing service bracket".to_string()))?;
    let service = line[1..service_end].trim();
    if service.is_empty() {
        return Err(LogError::MalformedLine("empty service".to_string()));
    }

    let remaining = line[service_end + 1..].trim();

    let level_start = remaining
        .find('[')
        .ok_or_else(|| LogError::MalformedLine("missing level bracket".to_string()))?;

    let time_str = remaining[..level_start].trim();
    let naive = NaiveDateTime::parse_from_str(time_str, TIME_FORMAT)
        .map_err(|e| LogError::MalformedLine(format!("bad timestamp '{}': {}", time_str, e)))?;
    let timestamp = Local
        .from_local_datetime(&naive)
        .earliest()
        .ok_or_else(|| LogError::MalformedLine("nonexistent local time".to_string()))?;

    let level_end = remaining[level_start..]
        .find(']')
        .map(|i| i + level_start)
        .ok_or_else(|| LogError::MalformedLine("unterminated level bracket".to_string()))?;
    let level_str = remaining[level_start + 1..level_end].trim();
    let level = parse_level(level_str)
        .map_err(|_| LogError::MalformedLine(format!("unknown level: {}", level_str)))?;

    let message_start = remaining[level_end..]
        .find('"')
        .map(|i| i + level_end)
        .ok_or_else(|| LogError::MalformedLine("missing message quote".to_string()))?;
    let message_end = remaining
        .rfind('"')
        .ok_or_else(|| LogError::MalformedLine("missing message quote".to_string()))?;
    if message_end <= message_start {
        return Err(LogError::MalformedLine(
            "unterminated message".to_string(),
        ));
    }

    Ok(LogEntry {
        service: service.to_string(),
        level,
        message: remaining[message_start + 1..message_end].to_string(),
        timestamp,
        raw: line.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::levels::LogLevel;
    use chrono::TimeZone;

    fn message(service: &str, level: LogLevel, text: &str) -> LogMessage {
        LogMessage {
            service: service.to_string(),
            level,
            message: text.to_string(),
            timestamp: Local.with_ymd_and_hms(2024, 1, 15, 14, 30, 23).unwrap(),
            client_id: String::new(),
        }
    }

    #[test]
    fn test_format_exact_line() {
        let msg = message("API", LogLevel::Info, "hello");
        let line = format_message(&msg, &PadWidths::default());
        assert_eq!(line, r#"[API ] 15-01-2024 14:30:23 [INFO ] "hello""#);
    }

    #[test]
    fn test_format_wide_service_column() {
        let pad = PadWidths::from_services(["DNS", "GATEWAY"]);
        assert_eq!(pad.service, 7);
        assert_eq!(pad.level, 5);

        let msg = message("DNS", LogLevel::Warn, "slow upstream");
        let line = format_message(&msg, &pad);
        assert_eq!(line, r#"[DNS    ] 15-01-2024 14:30:23 [WARN ] "slow upstream""#);
    }

    #[test]
    fn test_roundtrip() {
        let msg = message("API", LogLevel::Info, "hello");
        let line = format_message(&msg, &PadWidths::default());
        let entry = parse_line(&line).unwrap();

        assert_eq!(entry.service, "API");
        assert_eq!(entry.level, LogLevel::Info);
        assert_eq!(entry.message, "hello");
        assert_eq!(entry.timestamp, msg.timestamp);
        assert_eq!(entry.raw, line);
    }

    #[test]
    fn test_roundtrip_embedded_quote() {
        // A quote inside the message survives as long as it is not the
        // final character: the parser delimits on the last quote.
        let msg = message("API", LogLevel::Error, r#"bad value "x" rejected"#);
        let line = format_message(&msg, &PadWidths::default());
        let entry = parse_line(&line).unwrap();
        assert_eq!(entry.message, r#"bad value "x" rejected"#);
    }

    #[test]
    fn test_parse_rejects_malformed_lines() {
        for line in [
            "",
            "short",
            "no brackets here at all",
            r#"[] 15-01-2024 14:30:23 [INFO ] "empty service""#,
            r#"[API ] not-a-date [INFO ] "bad time""#,
            r#"[API ] 15-01-2024 14:30:23 [NOISE] "bad level""#,
            r#"[API ] 15-01-2024 14:30:23 [INFO ] no quotes"#,
            r#"[API ] 15-01-2024 14:30:23 "level missing""#,
        ] {
            assert!(
                matches!(parse_line(line), Err(LogError::MalformedLine(_))),
                "expected rejection for: {}",
                line
            );
        }
    }

    #[test]
    fn test_parse_multiline_continuation_fails() {
        // The writer may emit a record spanning lines; the scanner sees the
        // continuation on its own and must skip it.
        let msg = message("API", LogLevel::Info, "first\nsecond");
        let record = format_message(&msg, &PadWidths::default());
        let mut lines = record.lines();

        assert!(parse_line(lines.next().unwrap()).is_err());
        assert!(parse_line(lines.next().unwrap()).is_err());
    }

    #[test]
    fn test_parse_tolerates_extra_padding() {
        let entry =
            parse_line(r#"[DB      ]   15-01-2024 14:30:23   [ERROR  ] "disk full""#).unwrap();
        assert_eq!(entry.service, "DB");
        assert_eq!(entry.level, LogLevel::Error);
        assert_eq!(entry.message, "disk full");
    }
}
