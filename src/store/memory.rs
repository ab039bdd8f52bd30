use std::collections::HashMap;

use crate::domain::{Bar, FundingEvent, Symbol};
use crate::time::Timeframe;

use super::OhlcvStore;

/// An in-memory `OhlcvStore` used by the engine's own construction path when
/// the caller already has bars in hand, and by tests. Bars and funding
/// events are kept pre-sorted by timestamp so reads are a binary search
/// rather than a scan, mirroring the feed store's own lookup discipline
/// (see `feed_store`).
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    bars: HashMap<(Symbol, Timeframe), Vec<Bar>>,
    funding: HashMap<Symbol, Vec<FundingEvent>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts bars for `(symbol, tf)`, sorting by `ts_open`. Does not
    /// deduplicate or fill gaps: the store never fabricates rows.
    pub fn with_bars(mut self, symbol: Symbol, tf: Timeframe, mut bars: Vec<Bar>) -> Self {
        bars.sort_by_key(|b| b.ts_open);
        self.bars.insert((symbol, tf), bars);
        self
    }

    pub fn with_funding(mut self, symbol: Symbol, mut events: Vec<FundingEvent>) -> Self {
        events.sort_by_key(|e| e.ts);
        self.funding.insert(symbol, events);
        self
    }
}

impl OhlcvStore for InMemoryStore {
    fn get_ohlcv(
        &self,
        symbol: &Symbol,
        tf: Timeframe,
        start_ms: Option<i64>,
        end_ms: Option<i64>,
    ) -> Vec<Bar> {
        let Some(bars) = self.bars.get(&(symbol.clone(), tf)) else {
            return Vec::new();
        };
        bars.iter()
            .filter(|b| start_ms.is_none_or(|s| b.ts_open >= s))
            .filter(|b| end_ms.is_none_or(|e| b.ts_open <= e))
            .copied()
            .collect()
    }

    fn get_funding(&self, symbol: &Symbol, start_ms: i64, end_ms: i64) -> Vec<FundingEvent> {
        let Some(events) = self.funding.get(symbol) else {
            return Vec::new();
        };
        events
            .iter()
            .filter(|e| e.ts >= start_ms && e.ts <= end_ms)
            .copied()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bar(ts_open: i64) -> Bar {
        Bar::new(Timeframe::M1, ts_open, 1.0, 1.0, 1.0, 1.0, 1.0).unwrap()
    }

    #[test]
    fn missing_symbol_returns_empty_not_fabricated() {
        let store = InMemoryStore::new();
        let sym = Symbol::parse("BTCUSDT").unwrap();
        assert!(store.get_ohlcv(&sym, Timeframe::M1, None, None).is_empty());
    }

    #[test]
    fn filters_by_bound_and_sorts_on_insert() {
        let sym = Symbol::parse("BTCUSDT").unwrap();
        let store = InMemoryStore::new().with_bars(
            sym.clone(),
            Timeframe::M1,
            vec![bar(120_000), bar(0), bar(60_000)],
        );
        let got = store.get_ohlcv(&sym, Timeframe::M1, Some(60_000), None);
        assert_eq!(got.iter().map(|b| b.ts_open).collect::<Vec<_>>(), vec![60_000, 120_000]);
    }
}
