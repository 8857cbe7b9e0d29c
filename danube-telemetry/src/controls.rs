//! Discrete choices offered by the polling and span selectors.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::duration::{parse_duration, parse_interval};
use crate::errors::ParseError;

/// Refresh interval selector.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PollOption {
    Off,
    Every15s,
    Every30s,
    Every1m,
    Every5m,
    Every15m,
}

impl PollOption {
    pub const ALL: [PollOption; 6] = [
        PollOption::Off,
        PollOption::Every15s,
        PollOption::Every30s,
        PollOption::Every1m,
        PollOption::Every5m,
        PollOption::Every15m,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PollOption::Off => "0",
            PollOption::Every15s => "15s",
            PollOption::Every30s => "30s",
            PollOption::Every1m => "1m",
            PollOption::Every5m => "5m",
            PollOption::Every15m => "15m",
        }
    }

    pub fn interval(&self) -> Duration {
        parse_interval(self.as_str()).unwrap_or(Duration::ZERO)
    }
}

impl fmt::Display for PollOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PollOption::Off => f.write_str("off"),
            other => f.write_str(other.as_str()),
        }
    }
}

impl FromStr for PollOption {
    type Err = ParseError;

    /// Accepts any spelling of a listed interval, e.g. `60s` selects `1m`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let interval = parse_interval(s)?;
        PollOption::ALL
            .into_iter()
            .find(|opt| opt.interval() == interval)
            .ok_or_else(|| ParseError::NotOffered(s.trim().to_string()))
    }
}

/// Visible time window selector.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SpanOption(&'static str);

impl SpanOption {
    pub const ALL: [SpanOption; 11] = [
        SpanOption("5m"),
        SpanOption("15m"),
        SpanOption("30m"),
        SpanOption("1h"),
        SpanOption("2h"),
        SpanOption("6h"),
        SpanOption("12h"),
        SpanOption("1d"),
        SpanOption("2d"),
        SpanOption("1w"),
        SpanOption("2w"),
    ];

    /// Span selected when a view mounts.
    pub const DEFAULT: SpanOption = SpanOption("30m");

    pub fn as_str(&self) -> &'static str {
        self.0
    }

    pub fn span(&self) -> Duration {
        parse_duration(self.0).unwrap_or(Duration::ZERO)
    }
}

impl fmt::Display for SpanOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

impl FromStr for SpanOption {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let span = parse_duration(s)?;
        SpanOption::ALL
            .into_iter()
            .find(|opt| opt.span() == span)
            .ok_or_else(|| ParseError::NotOffered(s.trim().to_string()))
    }
}
