use serde::{Deserialize, Serialize};

use crate::time::Timeframe;

/// One completed OHLCV candle (spec §3). Immutable once loaded: nothing in
/// this crate ever mutates a `Bar` after the feed store is built.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub ts_open: i64,
    pub ts_close: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Bar {
    /// Constructs a bar from a timeframe and open timestamp, deriving
    /// `ts_close` and checking the OHLC invariants of spec §3.
    pub fn new(
        tf: Timeframe,
        ts_open: i64,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: f64,
    ) -> Result<Self, String> {
        let ts_close = tf.close_of(ts_open);
        let bar = Bar {
            ts_open,
            ts_close,
            open,
            high,
            low,
            close,
            volume,
        };
        bar.validate()?;
        Ok(bar)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.high < self.open.max(self.close) {
            return Err(format!(
                "high {} < max(open,close) = {}",
                self.high,
                self.open.max(self.close)
            ));
        }
        if self.low > self.open.min(self.close) {
            return Err(format!(
                "low {} > min(open,close) = {}",
                self.low,
                self.open.min(self.close)
            ));
        }
        if self.volume < 0.0 {
            return Err(format!("volume {} < 0", self.volume));
        }
        if self.ts_close <= self.ts_open {
            return Err(format!(
                "ts_close {} <= ts_open {}",
                self.ts_close, self.ts_open
            ));
        }
        Ok(())
    }

    pub fn hlc3(&self) -> f64 {
        (self.high + self.low + self.close) / 3.0
    }

    pub fn ohlc4(&self) -> f64 {
        (self.open + self.high + self.low + self.close) / 4.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_high_below_body() {
        assert!(Bar::new(Timeframe::M1, 0, 10.0, 9.0, 8.0, 10.0, 1.0).is_err());
    }

    #[test]
    fn rejects_low_above_body() {
        assert!(Bar::new(Timeframe::M1, 0, 10.0, 11.0, 10.5, 10.0, 1.0).is_err());
    }

    #[test]
    fn rejects_negative_volume() {
        assert!(Bar::new(Timeframe::M1, 0, 10.0, 11.0, 9.0, 10.0, -1.0).is_err());
    }

    #[test]
    fn accepts_valid_bar_and_derives_close() {
        let bar = Bar::new(Timeframe::M5, 1_000, 10.0, 12.0, 9.0, 11.0, 5.0).unwrap();
        assert_eq!(bar.ts_close, 1_000 + 5 * 60_000);
    }
}
