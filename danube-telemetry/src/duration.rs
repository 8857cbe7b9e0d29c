//! Duration strings in the Prometheus style: `30s`, `1h30m`, `2w`.
//!
//! A duration is a run of `<integer><unit>` tokens with no separator. Every token
//! contributes `integer * unit` and the tokens are summed, so `90m` and `1h30m`
//! denote the same span.

use std::time::Duration;

use crate::errors::ParseError;

const MILLISECOND: u64 = 1;
const SECOND: u64 = 1000 * MILLISECOND;
const MINUTE: u64 = 60 * SECOND;
const HOUR: u64 = 60 * MINUTE;
const DAY: u64 = 24 * HOUR;
const WEEK: u64 = 7 * DAY;
const YEAR: u64 = 365 * DAY;

fn unit_millis(unit: &str) -> Option<u64> {
    match unit {
        "ms" => Some(MILLISECOND),
        "s" => Some(SECOND),
        "m" => Some(MINUTE),
        "h" => Some(HOUR),
        "d" => Some(DAY),
        "w" => Some(WEEK),
        "y" => Some(YEAR),
        _ => None,
    }
}

/// Parse a duration string into a millisecond-precision `Duration`.
///
/// Units are case-sensitive and fractions are rejected. Surrounding whitespace is ignored.
pub fn parse_duration(text: &str) -> Result<Duration, ParseError> {
    let text = text.trim();
    if text.is_empty() {
        return Err(ParseError::Empty);
    }

    let mut total: u64 = 0;
    let mut chars = text.char_indices().peekable();

    while let Some(&(token_start, c)) = chars.peek() {
        if c == '-' {
            return Err(ParseError::Negative);
        }
        if !c.is_ascii_digit() {
            if c.is_ascii_alphabetic() {
                return Err(ParseError::MissingNumber(token_start));
            }
            return Err(ParseError::UnexpectedChar(c));
        }

        let mut value: u64 = 0;
        while let Some(digit) = chars.peek().and_then(|&(_, d)| d.to_digit(10)) {
            value = value
                .checked_mul(10)
                .and_then(|v| v.checked_add(u64::from(digit)))
                .ok_or(ParseError::Overflow)?;
            chars.next();
        }

        let unit_start = chars.peek().map_or(text.len(), |&(i, _)| i);
        while chars.next_if(|&(_, u)| u.is_ascii_alphabetic()).is_some() {}
        let unit_end = chars.peek().map_or(text.len(), |&(i, _)| i);

        if unit_start == unit_end {
            return Err(match chars.peek() {
                None => ParseError::MissingUnit(text[token_start..unit_start].to_string()),
                Some(&(_, '-')) => ParseError::Negative,
                Some(&(_, other)) => ParseError::UnexpectedChar(other),
            });
        }

        let unit = &text[unit_start..unit_end];
        let factor = unit_millis(unit).ok_or_else(|| ParseError::UnknownUnit(unit.to_string()))?;
        total = value
            .checked_mul(factor)
            .and_then(|v| total.checked_add(v))
            .ok_or(ParseError::Overflow)?;
    }

    Ok(Duration::from_millis(total))
}

/// Parse a polling interval. `0` and `off` disable polling, anything else is a duration.
pub fn parse_interval(text: &str) -> Result<Duration, ParseError> {
    match text.trim() {
        "0" | "off" | "Off" => Ok(Duration::ZERO),
        other => parse_duration(other),
    }
}
