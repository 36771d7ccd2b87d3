//! Line classifier and sample parser
//!
//! Every framed line falls into one of four classes:
//!
//! - **Device lost**: contains `connection lost to device` anywhere. Checked
//!   first, on the raw text, so it wins over any tokenisation.
//! - **Sample**: first token is one of the six data tags. The second token
//!   is the timestamp, the rest are values (three integers for Accel, one
//!   float otherwise). The server formats floats with the host locale, so a
//!   comma decimal separator is normalised to a dot.
//! - **Ack**: a response whose last token starts with `OK`.
//! - **Other**: anything else (negative responses, unknown tags such as
//!   `E4_Battery` or `E4_Tag`). Ignored by the dispatcher.
//!
//! A tagged line that fails to parse yields `Error::MalformedSample`; the
//! caller drops that line only.

use super::channel::ChannelKind;
use crate::error::{Error, Result};
use std::fmt;

/// Out-of-band notice sent when the wristband drops its radio link
pub const DEVICE_LOST_NOTICE: &str = "connection lost to device";

/// One value in a sink row
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Field {
    Int(i64),
    Float(f64),
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Field::Int(v) => write!(f, "{}", v),
            // Debug formatting keeps the fractional part ("1.0", not "1")
            Field::Float(v) => write!(f, "{:?}", v),
        }
    }
}

/// Parsed data record
///
/// `values.len()` always equals `channel.arity()`.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub channel: ChannelKind,
    pub timestamp: f64,
    pub values: Vec<Field>,
}

impl Sample {
    /// Sink row: `[timestamp, values...]`
    pub fn row(&self) -> Vec<Field> {
        let mut row = Vec::with_capacity(self.values.len() + 1);
        row.push(Field::Float(self.timestamp));
        row.extend_from_slice(&self.values);
        row
    }
}

/// Classification of one framed line
#[derive(Debug, Clone, PartialEq)]
pub enum Line {
    Sample(Sample),
    DeviceLost,
    Ack(String),
    Other(String),
}

/// Classify a line, parsing it when it carries a data tag
pub fn parse_line(line: &str) -> Result<Line> {
    if line.contains(DEVICE_LOST_NOTICE) {
        return Ok(Line::DeviceLost);
    }

    let mut tokens = line.split_whitespace();
    let Some(first) = tokens.next() else {
        return Ok(Line::Other(String::new()));
    };

    if let Some(channel) = ChannelKind::from_tag(first) {
        return parse_sample(channel, tokens, line).map(Line::Sample);
    }

    if is_ack(line) {
        Ok(Line::Ack(line.to_string()))
    } else {
        Ok(Line::Other(line.to_string()))
    }
}

/// True when the last whitespace-delimited token starts with `OK`
pub fn is_ack(response: &str) -> bool {
    response
        .split_whitespace()
        .last()
        .is_some_and(|token| token.starts_with("OK"))
}

fn parse_sample<'a>(
    channel: ChannelKind,
    tokens: impl Iterator<Item = &'a str>,
    line: &str,
) -> Result<Sample> {
    let malformed = |reason: String| Error::MalformedSample {
        channel,
        line: line.to_string(),
        reason,
    };

    let fields: Vec<&str> = tokens.collect();
    if fields.len() != channel.arity() + 1 {
        return Err(malformed(format!(
            "expected {} fields after tag, got {}",
            channel.arity() + 1,
            fields.len()
        )));
    }

    let timestamp = parse_float(fields[0])
        .ok_or_else(|| malformed(format!("bad timestamp '{}'", fields[0])))?;

    let values = fields[1..]
        .iter()
        .map(|raw| {
            let value = match channel {
                ChannelKind::Accel => parse_int(raw).map(Field::Int),
                _ => parse_float(raw).map(Field::Float),
            };
            value.ok_or_else(|| malformed(format!("bad value '{}'", raw)))
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(Sample {
        channel,
        timestamp,
        values,
    })
}

fn parse_float(raw: &str) -> Option<f64> {
    raw.replace(',', ".").parse::<f64>().ok()
}

fn parse_int(raw: &str) -> Option<i64> {
    raw.parse::<i64>().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(line: &str) -> Sample {
        match parse_line(line).unwrap() {
            Line::Sample(s) => s,
            other => panic!("expected sample, got {:?}", other),
        }
    }

    #[test]
    fn test_accel_line() {
        let s = sample("E4_Acc 123345627,8912 51 -2 -10");
        assert_eq!(s.channel, ChannelKind::Accel);
        assert_eq!(s.timestamp, 123345627.8912);
        assert_eq!(s.values, vec![Field::Int(51), Field::Int(-2), Field::Int(-10)]);
    }

    #[test]
    fn test_single_value_channels() {
        let cases = [
            ("E4_Bvp 1,0 0,5", ChannelKind::Bvp, 0.5),
            ("E4_Gsr 2.0 0.123", ChannelKind::Gsr, 0.123),
            ("E4_Ibi 3.0 0,8125", ChannelKind::Ibi, 0.8125),
            ("E4_Hr 3.0 73.8", ChannelKind::HeartRate, 73.8),
            ("E4_Temperature 4.5 31,27", ChannelKind::Temperature, 31.27),
        ];
        for (line, channel, value) in cases {
            let s = sample(line);
            assert_eq!(s.channel, channel, "{}", line);
            assert_eq!(s.values, vec![Field::Float(value)], "{}", line);
        }
    }

    #[test]
    fn test_arity_always_matches_channel() {
        for channel in ChannelKind::ALL {
            let values = vec!["7"; channel.arity()].join(" ");
            let s = sample(&format!("{} 1.5 {}", channel.tag(), values));
            assert_eq!(s.values.len(), channel.arity());
        }
    }

    #[test]
    fn test_wrong_arity_is_malformed() {
        for line in ["E4_Acc 1.0 10 20", "E4_Bvp 1.0", "E4_Gsr 1.0 0.1 0.2", "E4_Hr"] {
            assert!(
                matches!(parse_line(line), Err(Error::MalformedSample { .. })),
                "{}",
                line
            );
        }
    }

    #[test]
    fn test_bad_numbers_are_malformed() {
        let err = parse_line("E4_Gsr notanumber").unwrap_err();
        assert!(matches!(
            err,
            Error::MalformedSample {
                channel: ChannelKind::Gsr,
                ..
            }
        ));
        assert!(parse_line("E4_Gsr 1.0 abc").is_err());
        // Accel values must be integers
        assert!(parse_line("E4_Acc 1.0 1.5 2 3").is_err());
    }

    #[test]
    fn test_device_lost_notice_anywhere() {
        assert_eq!(
            parse_line("connection lost to device").unwrap(),
            Line::DeviceLost
        );
        assert_eq!(
            parse_line("R device_connect ERR connection lost to device A02DE7").unwrap(),
            Line::DeviceLost
        );
        assert_eq!(
            parse_line("E4_Acc connection lost to device").unwrap(),
            Line::DeviceLost
        );
    }

    #[test]
    fn test_ack_and_other() {
        assert_eq!(
            parse_line("R device_subscribe acc OK").unwrap(),
            Line::Ack("R device_subscribe acc OK".into())
        );
        assert!(matches!(
            parse_line("R device_subscribe acc ERR bad stream").unwrap(),
            Line::Other(_)
        ));
        assert!(matches!(
            parse_line("E4_Battery 1.0 0.9").unwrap(),
            Line::Other(_)
        ));
        assert_eq!(parse_line("   ").unwrap(), Line::Other(String::new()));
    }

    #[test]
    fn test_is_ack() {
        assert!(is_ack("R device_connect OK"));
        assert!(is_ack("R pause ON OK\r"));
        assert!(is_ack("OKAY"));
        assert!(!is_ack("R device_connect ERR OK-ish later"));
        assert!(!is_ack("OK then ERR"));
        assert!(!is_ack(""));
    }

    #[test]
    fn test_row_layout() {
        let s = sample("E4_Acc 1.0 10 20 30");
        let row: Vec<String> = s.row().iter().map(ToString::to_string).collect();
        assert_eq!(row, vec!["1.0", "10", "20", "30"]);

        let s = sample("E4_Bvp 1,0 0.5");
        let row: Vec<String> = s.row().iter().map(ToString::to_string).collect();
        assert_eq!(row, vec!["1.0", "0.5"]);
    }
}
