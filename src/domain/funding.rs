use serde::{Deserialize, Serialize};

/// A single funding settlement (spec §3). Applied within `(prev_ts, ts_close]`
/// of the bar whose window it falls in.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FundingEvent {
    pub ts: i64,
    pub rate: f64,
    pub interval_hours: u8,
}
