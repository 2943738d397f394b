use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

/// A decoded row as returned by [`crate::TableTransport::query`].
pub type Row = Map<String, Value>;

/// Key/value metadata attached to a log call.
pub type Metadata = Map<String, Value>;

/// Severity ordering used for the transport threshold. Lower is more severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Http,
    Verbose,
    Debug,
    Silly,
}

impl LogLevel {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Http => "http",
            LogLevel::Verbose => "verbose",
            LogLevel::Debug => "debug",
            LogLevel::Silly => "silly",
        }
    }

    /// Whether a record logged at `level` passes this threshold.
    ///
    /// Level names outside the known set are always allowed.
    #[must_use]
    pub fn allows(self, level: &str) -> bool {
        level.parse::<LogLevel>().map_or(true, |l| l <= self)
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "error" => Ok(LogLevel::Error),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "info" => Ok(LogLevel::Info),
            "http" => Ok(LogLevel::Http),
            "verbose" => Ok(LogLevel::Verbose),
            "debug" => Ok(LogLevel::Debug),
            "silly" | "trace" => Ok(LogLevel::Silly),
            other => Err(format!("unknown log level '{other}'")),
        }
    }
}

impl From<tracing::Level> for LogLevel {
    fn from(level: tracing::Level) -> Self {
        if level == tracing::Level::ERROR {
            LogLevel::Error
        } else if level == tracing::Level::WARN {
            LogLevel::Warn
        } else if level == tracing::Level::INFO {
            LogLevel::Info
        } else if level == tracing::Level::DEBUG {
            LogLevel::Debug
        } else {
            LogLevel::Silly
        }
    }
}

/// A single log call, captured at the time it was made.
#[derive(Debug, Clone, PartialEq)]
pub struct LogRecord {
    pub level: String,
    pub message: String,
    pub metadata: Metadata,
    pub timestamp: DateTime<Utc>,
    pub hostname: String,
    pub pid: u32,
}

impl LogRecord {
    #[must_use]
    pub fn new(level: impl Into<String>, message: impl Into<String>, metadata: Metadata) -> Self {
        Self {
            level: level.into(),
            message: message.into(),
            metadata,
            timestamp: Utc::now(),
            hostname: local_hostname(),
            pid: std::process::id(),
        }
    }
}

/// Host name as reported by the OS; never empty.
///
/// Falls back to `HOSTNAME`/`COMPUTERNAME`, then `localhost`.
#[must_use]
pub fn local_hostname() -> String {
    static HOSTNAME: once_cell::sync::Lazy<String> = once_cell::sync::Lazy::new(|| {
        hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .into_iter()
            .chain(
                ["HOSTNAME", "COMPUTERNAME"]
                    .iter()
                    .filter_map(|name| std::env::var(name).ok()),
            )
            .map(|h| h.trim().to_string())
            .find(|h| !h.is_empty())
            .unwrap_or_else(|| "localhost".to_string())
    });
    HOSTNAME.clone()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryOrder {
    #[default]
    Asc,
    Desc,
}

/// Options accepted by [`crate::TableTransport::query`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryOptions {
    /// Columns to return. `None` (or an empty list) returns every column.
    pub fields: Option<Vec<String>>,
    pub limit: Option<usize>,
    /// Inclusive lower bound on `createdDateTime`.
    pub from: Option<DateTime<Utc>>,
    /// Exclusive upper bound on `createdDateTime`.
    pub until: Option<DateTime<Utc>>,
    pub order: QueryOrder,
}

impl QueryOptions {
    #[must_use]
    pub fn with_fields<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            fields: Some(fields.into_iter().map(Into::into).collect()),
            ..Self::default()
        }
    }

    /// Requested projection, with an empty list treated as "all fields".
    #[must_use]
    pub fn projection(&self) -> Option<&[String]> {
        self.fields.as_deref().filter(|f| !f.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_ordering_and_threshold() {
        assert!(LogLevel::Error < LogLevel::Info);
        assert!(LogLevel::Info.allows("error"));
        assert!(LogLevel::Info.allows("INFO"));
        assert!(!LogLevel::Info.allows("debug"));
        assert!(LogLevel::Silly.allows("debug"));
        assert!(LogLevel::Error.allows("audit"));
    }

    #[test]
    fn test_level_from_tracing() {
        assert_eq!(LogLevel::from(tracing::Level::TRACE), LogLevel::Silly);
        assert_eq!(LogLevel::from(tracing::Level::WARN), LogLevel::Warn);
        assert_eq!("warning".parse::<LogLevel>(), Ok(LogLevel::Warn));
        assert!("loud".parse::<LogLevel>().is_err());
    }

    #[test]
    fn test_record_captures_host_and_pid() {
        let record = LogRecord::new("info", "hello", Metadata::new());
        assert!(!record.hostname.is_empty());
        assert_eq!(record.pid, std::process::id());
    }

    #[test]
    fn test_hostname_matches_os() {
        let os = hostname::get().unwrap().into_string().unwrap();
        if !os.trim().is_empty() {
            assert_eq!(local_hostname(), os.trim());
        }
    }

    #[test]
    fn test_empty_projection_means_all_fields() {
        assert!(QueryOptions::with_fields(Vec::<String>::new()).projection().is_none());
        assert_eq!(
            QueryOptions::with_fields(["msg"]).projection(),
            Some(&["msg".to_string()][..])
        );
    }
}
