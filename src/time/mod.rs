//! Canonical timeframe model (spec §3, component C1).
//!
//! Timestamps throughout the core are UTC-naive 64-bit epoch milliseconds;
//! nothing here ever consults the local clock or a timezone database.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use strum_macros::EnumIter;

use crate::error::ConfigError;

/// One of the eleven timeframes the core understands. Closed set: anything
/// else fails to parse rather than being silently accepted.
///
/// Serializes as its short string (`"1m"`, `"1h"`, ...) so it round-trips
/// through `IdeaCard` JSON and participates in canonical hashing the same
/// way a human would write it in a config file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, EnumIter)]
pub enum Timeframe {
    M1,
    M3,
    M5,
    M15,
    M30,
    H1,
    H2,
    H4,
    H6,
    H12,
    D1,
}

impl Timeframe {
    /// Bar duration in milliseconds.
    pub const fn duration_ms(self) -> i64 {
        match self {
            Timeframe::M1 => 60_000,
            Timeframe::M3 => 3 * 60_000,
            Timeframe::M5 => 5 * 60_000,
            Timeframe::M15 => 15 * 60_000,
            Timeframe::M30 => 30 * 60_000,
            Timeframe::H1 => 3_600_000,
            Timeframe::H2 => 2 * 3_600_000,
            Timeframe::H4 => 4 * 3_600_000,
            Timeframe::H6 => 6 * 3_600_000,
            Timeframe::H12 => 12 * 3_600_000,
            Timeframe::D1 => 86_400_000,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Timeframe::M1 => "1m",
            Timeframe::M3 => "3m",
            Timeframe::M5 => "5m",
            Timeframe::M15 => "15m",
            Timeframe::M30 => "30m",
            Timeframe::H1 => "1h",
            Timeframe::H2 => "2h",
            Timeframe::H4 => "4h",
            Timeframe::H6 => "6h",
            Timeframe::H12 => "12h",
            Timeframe::D1 => "1d",
        }
    }

    /// `ts_close = ts_open + duration(tf)`.
    pub fn close_of(self, ts_open: i64) -> i64 {
        ts_open + self.duration_ms()
    }

    /// Smallest `ts_close` of a bar of this timeframe that is `>= ts`.
    /// Used for HTF/MTF forward-fill alignment (spec §4.4).
    pub fn ceil_to_close(self, ts: i64) -> i64 {
        let d = self.duration_ms();
        let rem = ts.rem_euclid(d);
        if rem == 0 { ts } else { ts + (d - rem) }
    }

    /// Human-readable duration, for logs only (never for hashed content).
    pub fn humantime(self) -> String {
        humantime::format_duration(std::time::Duration::from_millis(self.duration_ms() as u64))
            .to_string()
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Timeframe {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "1m" => Timeframe::M1,
            "3m" => Timeframe::M3,
            "5m" => Timeframe::M5,
            "15m" => Timeframe::M15,
            "30m" => Timeframe::M30,
            "1h" => Timeframe::H1,
            "2h" => Timeframe::H2,
            "4h" => Timeframe::H4,
            "6h" => Timeframe::H6,
            "12h" => Timeframe::H12,
            "1d" => Timeframe::D1,
            other => return Err(ConfigError::UnsupportedMode(format!("unknown timeframe '{other}'"))),
        })
    }
}

impl Serialize for Timeframe {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Timeframe {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Timeframe::from_str(&s).map_err(serde::de::Error::custom)
    }
}

/// The role a timeframe plays within an `IdeaCard` (spec §3, §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TfRole {
    Exec,
    MedTf,
    HighTf,
}

impl fmt::Display for TfRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TfRole::Exec => write!(f, "exec"),
            TfRole::MedTf => write!(f, "med_tf"),
            TfRole::HighTf => write!(f, "high_tf"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_string() {
        for (s, tf) in [
            ("1m", Timeframe::M1),
            ("15m", Timeframe::M15),
            ("1h", Timeframe::H1),
            ("1d", Timeframe::D1),
        ] {
            assert_eq!(Timeframe::from_str(s).unwrap(), tf);
            assert_eq!(tf.as_str(), s);
        }
    }

    #[test]
    fn rejects_unknown_timeframe() {
        assert!(Timeframe::from_str("7m").is_err());
    }

    #[test]
    fn close_of_adds_duration() {
        assert_eq!(Timeframe::M1.close_of(0), 60_000);
        assert_eq!(Timeframe::H1.close_of(1_000), 3_601_000);
    }

    #[test]
    fn ceil_to_close_aligns_to_grid() {
        assert_eq!(Timeframe::M5.ceil_to_close(0), 0);
        assert_eq!(Timeframe::M5.ceil_to_close(1), 5 * 60_000);
        assert_eq!(Timeframe::H1.ceil_to_close(3_600_000), 3_600_000);
        assert_eq!(Timeframe::H1.ceil_to_close(3_600_001), 2 * 3_600_000);
    }
}
