// Log levels with numeric ordering for fast comparison

use crate::error::LogError;
use serde::de::{self, Deserialize, Deserializer};
use serde::ser::{Serialize, Serializer};

/// Log severity levels (0-5, higher is more severe)
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LogLevel {
    /// Verbose diagnostics
    Debug = 0,
    /// Normal operational messages
    Info = 1,
    /// Something unexpected but recoverable
    Warn = 2,
    /// Operation failed
    Error = 3,
    /// Unrecoverable failure in the reporting process
    Fatal = 4,
    /// Application panic
    Panic = 5,
}

/// Level names, indexed by numeric value
pub(crate) const LEVEL_NAMES: [&str; 6] = ["DEBUG", "INFO", "WARN", "ERROR", "FATAL", "PANIC"];

impl LogLevel {
    /// Get level as u8 (0-5)
    #[inline]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Get level name as static string
    pub const fn as_str(self) -> &'static str {
        match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
            LogLevel::Fatal => "FATAL",
            LogLevel::Panic => "PANIC",
        }
    }

    /// Create from u8 value (returns None if out of range)
    ///
    /// The `Deserialize` impl goes through this, so a decoded `LogLevel`
    /// is always within range; no later validity check is needed.
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(LogLevel::Debug),
            1 => Some(LogLevel::Info),
            2 => Some(LogLevel::Warn),
            3 => Some(LogLevel::Error),
            4 => Some(LogLevel::Fatal),
            5 => Some(LogLevel::Panic),
            _ => None,
        }
    }
}

/// Parse a level name. Case-insensitive, surrounding whitespace ignored.
pub fn parse_level(s: &str) -> Result<LogLevel, LogError> {
    match s.trim().to_ascii_uppercase().as_str() {
        "DEBUG" => Ok(LogLevel::Debug),
        "INFO" => Ok(LogLevel::Info),
        "WARN" => Ok(LogLevel::Warn),
        "ERROR" => Ok(LogLevel::Error),
        "FATAL" => Ok(LogLevel::Fatal),
        "PANIC" => Ok(LogLevel::Panic),
        other => Err(LogError::InvalidMessage(format!(
            "unknown log level: {}",
            other
        ))),
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// Levels travel as integers on the wire, matching the file daemon protocol.

impl Serialize for LogLevel {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(*self as u8)
    }
}

impl<'de> Deserialize<'de> for LogLevel {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = u8::deserialize(deserializer)?;
        LogLevel::from_u8(value)
            .ok_or_else(|| de::Error::custom(format!("log level out of range: {}", value)))
    }
}
