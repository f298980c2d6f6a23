//!
//! # Duration
//!
//! Durations are exchanged with Tempo in the Go `time.Duration` string form
//! (`48h0m0s`, `1m30s`, `500ms`). The same form is used on the wire of the custom
//! resource so both sides always agree on the textual value.
//!
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid duration '{value}': {reason}")]
pub struct DurationParseError {
    value: String,
    reason: String,
}

/// Duration which formats like Go's `time.Duration::String`
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GoDuration(Duration);

impl GoDuration {
    pub const ZERO: GoDuration = GoDuration(Duration::ZERO);

    pub const fn from_secs(secs: u64) -> Self {
        Self(Duration::from_secs(secs))
    }

    pub const fn from_hours(hours: u64) -> Self {
        Self(Duration::from_secs(hours * 3600))
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    pub fn as_duration(&self) -> Duration {
        self.0
    }
}

impl From<Duration> for GoDuration {
    fn from(duration: Duration) -> Self {
        Self(duration)
    }
}

impl fmt::Display for GoDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let nanos = self.0.as_nanos();
        if nanos == 0 {
            return f.write_str("0s");
        }

        // below one second Go switches to the largest fitting sub-second unit
        if nanos < 1_000_000_000 {
            let (unit, scale) = if nanos < 1_000 {
                ("ns", 1)
            } else if nanos < 1_000_000 {
                ("µs", 1_000)
            } else {
                ("ms", 1_000_000)
            };
            write_fraction(f, nanos / scale, nanos % scale, scale)?;
            return f.write_str(unit);
        }

        let total_secs = self.0.as_secs();
        let hours = total_secs / 3600;
        let minutes = (total_secs % 3600) / 60;
        let secs = total_secs % 60;

        if hours > 0 {
            write!(f, "{hours}h")?;
        }
        if hours > 0 || minutes > 0 {
            write!(f, "{minutes}m")?;
        }
        write_fraction(
            f,
            secs as u128,
            self.0.subsec_nanos() as u128,
            1_000_000_000,
        )?;
        f.write_str("s")
    }
}

fn write_fraction(f: &mut fmt::Formatter<'_>, whole: u128, frac: u128, scale: u128) -> fmt::Result {
    write!(f, "{whole}")?;
    if frac == 0 {
        return Ok(());
    }
    let width = scale.ilog10() as usize;
    let digits = format!("{frac:0width$}");
    write!(f, ".{}", digits.trim_end_matches('0'))
}

impl FromStr for GoDuration {
    type Err = DurationParseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        if trimmed.is_empty() || trimmed == "0" {
            return Ok(Self::ZERO);
        }

        // humantime does not know the micro sign Go emits
        let normalized = trimmed.replace("µs", "us");
        humantime::parse_duration(&normalized)
            .map(Self)
            .map_err(|err| DurationParseError {
                value: value.to_owned(),
                reason: err.to_string(),
            })
    }
}

impl Serialize for GoDuration {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for GoDuration {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod test {

    use std::time::Duration;

    use super::GoDuration;

    #[test]
    fn test_go_format() {
        assert_eq!(GoDuration::from_hours(48).to_string(), "48h0m0s");
        assert_eq!(GoDuration::from_secs(90).to_string(), "1m30s");
        assert_eq!(GoDuration::from_secs(3605).to_string(), "1h0m5s");
        assert_eq!(GoDuration::from_secs(8).to_string(), "8s");
        assert_eq!(GoDuration::ZERO.to_string(), "0s");
        assert_eq!(
            GoDuration::from(Duration::from_millis(500)).to_string(),
            "500ms"
        );
        assert_eq!(
            GoDuration::from(Duration::from_millis(1500)).to_string(),
            "1.5s"
        );
        assert_eq!(
            GoDuration::from(Duration::from_micros(1500)).to_string(),
            "1.5ms"
        );
    }

    #[test]
    fn test_parse() {
        assert_eq!("48h".parse::<GoDuration>(), Ok(GoDuration::from_hours(48)));
        assert_eq!(
            "48h0m0s".parse::<GoDuration>(),
            Ok(GoDuration::from_hours(48))
        );
        assert_eq!("1m30s".parse::<GoDuration>(), Ok(GoDuration::from_secs(90)));
        assert_eq!("0".parse::<GoDuration>(), Ok(GoDuration::ZERO));
        assert!("forever".parse::<GoDuration>().is_err());
    }

    #[test]
    fn test_serde() {
        let value: GoDuration = serde_json::from_str("\"72h\"").expect("parse");
        assert_eq!(value, GoDuration::from_hours(72));
        assert_eq!(
            serde_json::to_string(&value).expect("serialize"),
            "\"72h0m0s\""
        );
    }
}
