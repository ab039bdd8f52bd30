//! Feed store (spec §2 C6): an immutable, struct-of-arrays view of one
//! timeframe's bars plus its realized indicator columns, built once before
//! the simulation loop starts and read-only for the rest of the run. Lookup
//! is `O(log n)` by timestamp (binary search on the sorted close array) or
//! `O(1)` by bar index, never a linear scan over OHLCV+indicator columns.

use std::collections::BTreeMap;

use crate::domain::Bar;
use crate::error::{BacktestError, FeaturePipelineError};
use crate::feature_frame::{self, FeatureArrays, IndicatorMetadata};
use crate::idea_card::FeatureSpec;
use crate::time::Timeframe;

/// One timeframe's bars and indicators, aligned by row index.
#[derive(Debug, Clone)]
pub struct FeedStore {
    tf: Timeframe,
    bars: Vec<Bar>,
    close_ts: Vec<i64>,
    features: FeatureArrays,
    indicator_metadata: BTreeMap<String, IndicatorMetadata>,
}

impl FeedStore {
    /// Builds the store by running the feature-frame builder (`feature_frame`)
    /// over `bars` and `specs`, then indexing the result.
    pub fn build(tf: Timeframe, bars: Vec<Bar>, specs: &[FeatureSpec]) -> Result<Self, BacktestError> {
        let (features, indicator_metadata) = feature_frame::build(&bars, specs)?;
        let close_ts = bars.iter().map(|b| b.ts_close).collect();
        Ok(FeedStore {
            tf,
            bars,
            close_ts,
            features,
            indicator_metadata,
        })
    }

    pub fn tf(&self) -> Timeframe {
        self.tf
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn bar(&self, idx: usize) -> Option<&Bar> {
        self.bars.get(idx)
    }

    pub fn bars(&self) -> &[Bar] {
        &self.bars
    }

    /// Strict indicator accessor: `Err` if the key was never declared, `Err`
    /// if the value at `idx` is still `NaN` (spec §4.3, "strict accessor").
    /// Used by the rule evaluator, which must never silently trade on
    /// warmup noise.
    pub fn get_indicator_strict(&self, key: &str, idx: usize) -> Result<f64, FeaturePipelineError> {
        let column = self
            .features
            .get(key)
            .ok_or_else(|| FeaturePipelineError::IndicatorNotDeclared(key.to_string()))?;
        let value = column
            .get(idx)
            .copied()
            .ok_or_else(|| FeaturePipelineError::IndicatorNotDeclared(key.to_string()))?;
        if value.is_nan() {
            return Err(FeaturePipelineError::IndicatorNan {
                key: key.to_string(),
                index: idx,
            });
        }
        Ok(value)
    }

    /// Permissive indicator accessor: `None` on any failure mode (unknown
    /// key, out of range, still-NaN). Used by diagnostics/artifact code
    /// that should degrade gracefully rather than abort a run.
    pub fn get_indicator(&self, key: &str, idx: usize) -> Option<f64> {
        self.features
            .get(key)
            .and_then(|c| c.get(idx))
            .copied()
            .filter(|v| !v.is_nan())
    }

    pub fn indicator_keys(&self) -> impl Iterator<Item = &str> {
        self.features.keys()
    }

    pub fn indicator_metadata(&self) -> &BTreeMap<String, IndicatorMetadata> {
        &self.indicator_metadata
    }

    pub fn max_warmup_bars(&self) -> usize {
        self.indicator_metadata
            .values()
            .map(|m| m.declared_warmup_bars)
            .max()
            .unwrap_or(0)
    }

    /// Observed `first_valid_idx` across every canonical column this store
    /// carries, i.e. the earliest row index at which every declared
    /// indicator is guaranteed non-NaN.
    pub fn first_fully_valid_idx(&self) -> usize {
        self.indicator_metadata
            .values()
            .flat_map(|m| m.first_valid_idx.values())
            .map(|idx| idx.map(|i| i + 1).unwrap_or(self.bars.len()))
            .max()
            .unwrap_or(0)
    }

    /// Index of the last bar whose `ts_close <= ts`, or `None` if every bar
    /// closes after `ts` (spec §4.4, HTF/MTF forward-fill alignment).
    pub fn last_closed_idx_at_or_before(&self, ts: i64) -> Option<usize> {
        let pos = self.close_ts.partition_point(|&c| c <= ts);
        if pos == 0 {
            None
        } else {
            Some(pos - 1)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{IndicatorType, InputSource, ParamValue};
    use std::collections::BTreeMap as Map;

    fn bar(i: i64, close: f64) -> Bar {
        Bar::new(Timeframe::M15, i * 900_000, close, close + 1.0, close - 1.0, close, 10.0).unwrap()
    }

    fn sma_spec(period: i64) -> FeatureSpec {
        let mut params = Map::new();
        params.insert("period".to_string(), ParamValue::Int(period));
        FeatureSpec {
            indicator_type: IndicatorType::Sma,
            output_key: "sma".to_string(),
            params,
            input_source: InputSource::Close,
            input_indicator_key: None,
        }
    }

    #[test]
    fn strict_accessor_errors_on_nan_during_warmup() {
        let bars: Vec<Bar> = (0..5).map(|i| bar(i, 100.0 + i as f64)).collect();
        let store = FeedStore::build(Timeframe::M15, bars, &[sma_spec(3)]).unwrap();
        assert!(store.get_indicator_strict("sma", 0).is_err());
        assert!(store.get_indicator_strict("sma", 4).is_ok());
    }

    #[test]
    fn permissive_accessor_returns_none_instead_of_erroring() {
        let bars: Vec<Bar> = (0..5).map(|i| bar(i, 100.0 + i as f64)).collect();
        let store = FeedStore::build(Timeframe::M15, bars, &[sma_spec(3)]).unwrap();
        assert_eq!(store.get_indicator("sma", 0), None);
        assert!(store.get_indicator("sma", 4).is_some());
        assert_eq!(store.get_indicator("does_not_exist", 4), None);
    }

    #[test]
    fn last_closed_idx_finds_floor_by_binary_search() {
        let bars: Vec<Bar> = (0..5).map(|i| bar(i, 100.0 + i as f64)).collect();
        let store = FeedStore::build(Timeframe::M15, bars, &[]).unwrap();
        assert_eq!(store.last_closed_idx_at_or_before(900_000 + 1), Some(0));
        assert_eq!(store.last_closed_idx_at_or_before(-1), None);
        assert_eq!(store.last_closed_idx_at_or_before(i64::MAX), Some(4));
    }
}
