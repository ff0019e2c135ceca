use anyhow::{anyhow, Result};
use std::str::FromStr;
use tracing_subscriber::EnvFilter;

/// A validated `tracing-subscriber` filter directive, e.g. `mesh_policy=debug,warn`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogFilter(String);

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum LogFormat {
    Plain,
    Json,
}

#[derive(Debug, thiserror::Error)]
#[error("invalid log format: {0} (expected `plain` or `json`)")]
pub struct InvalidLogFormat(String);

// === impl LogFilter ===

impl FromStr for LogFilter {
    type Err = tracing_subscriber::filter::ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EnvFilter::try_new(s)?;
        Ok(Self(s.to_string()))
    }
}

// === impl LogFormat ===

impl LogFormat {
    /// Installs the global subscriber. Logs are written to stderr so that command output on
    /// stdout stays machine-readable.
    pub fn try_init(self, filter: &LogFilter) -> Result<()> {
        let filter = EnvFilter::try_new(&filter.0)?;
        let builder = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr);
        match self {
            Self::Plain => builder.try_init(),
            Self::Json => builder.json().try_init(),
        }
        .map_err(|error| anyhow!(error))
    }
}

impl FromStr for LogFormat {
    type Err = InvalidLogFormat;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "plain" => Ok(Self::Plain),
            "json" => Ok(Self::Json),
            _ => Err(InvalidLogFormat(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_filters() {
        assert!("mesh_policy=info,warn".parse::<LogFilter>().is_ok());
        assert!("debug".parse::<LogFilter>().is_ok());
        assert!("mesh_policy=loud".parse::<LogFilter>().is_err());
    }

    #[test]
    fn parses_formats() {
        assert_eq!("plain".parse::<LogFormat>().unwrap(), LogFormat::Plain);
        assert_eq!("JSON".parse::<LogFormat>().unwrap(), LogFormat::Json);
        let err = "yaml".parse::<LogFormat>().unwrap_err();
        assert_eq!(
            err.to_string(),
            "invalid log format: yaml (expected `plain` or `json`)"
        );
    }
}
