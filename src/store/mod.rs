//! Read-only OHLCV/funding store interface (spec §2 C2, §6 "OHLCV/Funding
//! store (consumed)"). The core never fabricates rows and never mutates the
//! store; it performs bounded reads at construction and none during the hot
//! loop (spec §5, "Shared resources").

mod memory;

pub use memory::InMemoryStore;

use crate::domain::{Bar, FundingEvent, Symbol};
use crate::time::Timeframe;

/// A narrow query surface over historical OHLCV and funding data. An
/// implementation backed by a remote ingestion service, a local parquet
/// lake, or (as here) an in-memory vector all satisfy the same contract:
/// ascending order by `ts_open`, empty (not fabricated) results for missing
/// ranges, normalized-uppercase symbols.
pub trait OhlcvStore {
    /// Ordered ascending by `ts_open`. `start_ms`/`end_ms` are inclusive
    /// bounds; `None` means unbounded on that side.
    fn get_ohlcv(
        &self,
        symbol: &Symbol,
        tf: Timeframe,
        start_ms: Option<i64>,
        end_ms: Option<i64>,
    ) -> Vec<Bar>;

    /// Ordered ascending by `ts`.
    fn get_funding(&self, symbol: &Symbol, start_ms: i64, end_ms: i64) -> Vec<FundingEvent>;
}
