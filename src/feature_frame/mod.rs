//! Feature Frame Builder (spec §2 C5, §4.1, §4.2): turns a timeframe's bars
//! plus its declared `FeatureSpec`s into fully-realized indicator arrays,
//! one `Vec<f64>` per canonical output column, aligned 1:1 with the bars.
//!
//! Indicator math itself lives in `compute`; this module is the topological
//! scheduler, the canonicalization/collision guard, and the warmup/validity
//! bookkeeping the feed store (`feed_store`) is built from.

mod compute;

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::domain::Bar;
use crate::error::FeaturePipelineError;
use crate::idea_card::FeatureSpec;
use crate::registry::{self, IndicatorType, InputSource};

/// Realized indicator columns, keyed by canonical output key. Row `i`
/// corresponds to `bars[i]`.
#[derive(Debug, Clone, Default)]
pub struct FeatureArrays {
    columns: BTreeMap<String, Vec<f64>>,
}

impl FeatureArrays {
    pub fn get(&self, key: &str) -> Option<&[f64]> {
        self.columns.get(key).map(Vec::as_slice)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.columns.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.columns.values().next().map(Vec::len).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

/// Per-indicator bookkeeping the feed store and preflight checks need:
/// how many bars it took to warm up, and where its canonical columns
/// actually first became non-NaN (which can exceed the declared warmup
/// for chained indicators).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndicatorMetadata {
    pub feature_spec_id: String,
    pub indicator_type: String,
    pub output_key: String,
    pub canonical_keys: Vec<String>,
    pub declared_warmup_bars: usize,
    pub first_valid_idx: BTreeMap<String, Option<usize>>,
    pub sparse: bool,
}

/// Builds every declared indicator for one timeframe's bars.
///
/// Specs are scheduled in dependency order so a spec whose `input_source`
/// is `Indicator` always runs after the spec producing that column (spec
/// §3, "chained indicators"). Cyclic or missing chains are a config error
/// that should have been caught at `IdeaCard::compile` time already; this
/// function still guards against it defensively.
pub fn build(
    bars: &[Bar],
    specs: &[FeatureSpec],
) -> Result<(FeatureArrays, BTreeMap<String, IndicatorMetadata>), FeaturePipelineError> {
    let ordered = topological_order(specs)?;

    let mut arrays = FeatureArrays::default();
    let mut metadata = BTreeMap::new();
    let mut produced_by: BTreeMap<String, String> = BTreeMap::new();

    for spec in ordered {
        let canonical_keys = spec.canonical_output_keys();

        for key in &canonical_keys {
            if let Some(prev_spec_id) = produced_by.get(key) {
                if *prev_spec_id != spec.feature_spec_id() {
                    return Err(FeaturePipelineError::CanonicalCollision {
                        column: key.clone(),
                        first_spec: prev_spec_id.clone(),
                        second_spec: spec.feature_spec_id(),
                    });
                }
            }
        }

        let outputs = compute_one(bars, spec, &arrays)?;

        if outputs.len() != canonical_keys.len() {
            return Err(FeaturePipelineError::MissingDeclaredOutputs {
                indicator_type: spec.indicator_type.to_string(),
                output_key: spec.output_key.clone(),
                missing: canonical_keys
                    .iter()
                    .skip(outputs.len())
                    .cloned()
                    .collect(),
            });
        }

        let sparse = registry::is_sparse(spec.indicator_type);
        let mut first_valid_idx = BTreeMap::new();

        for (key, mut column) in canonical_keys.iter().cloned().zip(outputs.into_iter()) {
            if column.len() != bars.len() {
                return Err(FeaturePipelineError::FeatureLengthMismatch {
                    key: key.clone(),
                    expected: bars.len(),
                    actual: column.len(),
                });
            }

            let first_valid = column.iter().position(|v| !v.is_nan());
            if sparse {
                forward_fill(&mut column);
            }
            first_valid_idx.insert(key.clone(), first_valid);

            produced_by.insert(key.clone(), spec.feature_spec_id());
            arrays.columns.insert(key, column);
        }

        metadata.insert(
            spec.output_key.clone(),
            IndicatorMetadata {
                feature_spec_id: spec.feature_spec_id(),
                indicator_type: spec.indicator_type.to_string(),
                output_key: spec.output_key.clone(),
                canonical_keys,
                declared_warmup_bars: spec.warmup_bars(),
                first_valid_idx,
                sparse,
            },
        );
    }

    Ok((arrays, metadata))
}

/// Replaces each `NaN` with the last non-`NaN` value seen so far (spec
/// §4.1, §9: sparse/structural indicators are forward-filled so snapshot
/// lookups stay O(1) instead of having to search backward for validity).
fn forward_fill(column: &mut [f64]) {
    let mut last = f64::NAN;
    for v in column.iter_mut() {
        if v.is_nan() {
            *v = last;
        } else {
            last = *v;
        }
    }
}

fn compute_one(
    bars: &[Bar],
    spec: &FeatureSpec,
    arrays: &FeatureArrays,
) -> Result<Vec<Vec<f64>>, FeaturePipelineError> {
    use IndicatorType::*;

    let series = || resolve_series(bars, spec, arrays);

    Ok(match spec.indicator_type {
        Sma => compute::sma(&series()?, &spec.params),
        Ema => compute::ema(&series()?, &spec.params),
        Rsi => compute::rsi(&series()?, &spec.params),
        Atr => compute::atr(bars, &spec.params),
        BollingerBands => compute::bollinger_bands(&series()?, &spec.params),
        Macd => compute::macd(&series()?, &spec.params),
        Donchian => compute::donchian(bars, &spec.params),
    })
}

/// Resolves the single input series an indicator reads, either a raw OHLCV
/// derivative or a previously-computed indicator column.
fn resolve_series(
    bars: &[Bar],
    spec: &FeatureSpec,
    arrays: &FeatureArrays,
) -> Result<Vec<f64>, FeaturePipelineError> {
    Ok(match spec.input_source {
        InputSource::Close => bars.iter().map(|b| b.close).collect(),
        InputSource::Open => bars.iter().map(|b| b.open).collect(),
        InputSource::High => bars.iter().map(|b| b.high).collect(),
        InputSource::Low => bars.iter().map(|b| b.low).collect(),
        InputSource::Volume => bars.iter().map(|b| b.volume).collect(),
        InputSource::Hlc3 => bars.iter().map(Bar::hlc3).collect(),
        InputSource::Ohlc4 => bars.iter().map(Bar::ohlc4).collect(),
        InputSource::Indicator => {
            let key = spec
                .input_indicator_key
                .as_deref()
                .expect("validated at FeatureSpec::validate");
            arrays
                .get(key)
                .map(<[f64]>::to_vec)
                .ok_or_else(|| FeaturePipelineError::IndicatorNotDeclared(key.to_string()))?
        }
    })
}

/// Kahn's algorithm over the "produces canonical key" / "consumes
/// `input_indicator_key`" dependency graph. Specs with no chained input
/// have no in-edges and come out first; a spec chained off another comes
/// out only once its dependency has already been emitted.
fn topological_order(specs: &[FeatureSpec]) -> Result<Vec<&FeatureSpec>, FeaturePipelineError> {
    let mut remaining: Vec<&FeatureSpec> = specs.iter().collect();
    let mut ordered = Vec::with_capacity(specs.len());
    let mut emitted_keys: HashSet<String> = HashSet::new();

    while !remaining.is_empty() {
        let mut progressed = false;
        let mut next_remaining = Vec::with_capacity(remaining.len());

        for spec in remaining {
            let ready = match &spec.input_indicator_key {
                Some(key) => emitted_keys.contains(key),
                None => true,
            };
            if ready {
                for key in spec.canonical_output_keys() {
                    emitted_keys.insert(key);
                }
                ordered.push(spec);
                progressed = true;
            } else {
                next_remaining.push(spec);
            }
        }

        if !progressed {
            let key = next_remaining[0]
                .input_indicator_key
                .clone()
                .unwrap_or_default();
            return Err(FeaturePipelineError::IndicatorNotDeclared(key));
        }
        remaining = next_remaining;
    }

    Ok(ordered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ParamValue;
    use crate::time::Timeframe;

    fn bar(i: i64, close: f64) -> Bar {
        Bar::new(Timeframe::M15, i * 900_000, close, close + 1.0, close - 1.0, close, 10.0).unwrap()
    }

    fn sma_spec(output_key: &str, period: i64, input: Option<&str>) -> FeatureSpec {
        let mut params = BTreeMap::new();
        params.insert("period".to_string(), ParamValue::Int(period));
        FeatureSpec {
            indicator_type: IndicatorType::Sma,
            output_key: output_key.to_string(),
            params,
            input_source: match input {
                Some(_) => InputSource::Indicator,
                None => InputSource::Close,
            },
            input_indicator_key: input.map(str::to_string),
        }
    }

    #[test]
    fn builds_single_indicator_aligned_to_bars() {
        let bars: Vec<Bar> = (0..10).map(|i| bar(i, 100.0 + i as f64)).collect();
        let specs = vec![sma_spec("sma_3", 3, None)];
        let (arrays, meta) = build(&bars, &specs).unwrap();
        let sma = arrays.get("sma_3").unwrap();
        assert_eq!(sma.len(), bars.len());
        assert!(sma[0].is_nan());
        assert!(!sma[9].is_nan());
        assert_eq!(meta["sma_3"].declared_warmup_bars, 3);
    }

    #[test]
    fn chained_indicator_runs_after_its_dependency() {
        let bars: Vec<Bar> = (0..10).map(|i| bar(i, 100.0 + i as f64)).collect();
        let specs = vec![
            sma_spec("sma_of_sma", 2, Some("sma_3")),
            sma_spec("sma_3", 3, None),
        ];
        let (arrays, _meta) = build(&bars, &specs).unwrap();
        assert!(arrays.get("sma_of_sma").is_some());
        assert!(arrays.get("sma_3").is_some());
    }

    #[test]
    fn missing_chain_dependency_is_an_error() {
        let bars: Vec<Bar> = (0..5).map(|i| bar(i, 100.0 + i as f64)).collect();
        let specs = vec![sma_spec("sma_of_ghost", 2, Some("does_not_exist"))];
        assert!(build(&bars, &specs).is_err());
    }

    #[test]
    fn forward_fill_carries_last_value_through_gaps() {
        let mut column = vec![f64::NAN, f64::NAN, 1.0, f64::NAN, 2.0];
        forward_fill(&mut column);
        assert!(column[0].is_nan());
        assert!(column[1].is_nan());
        assert_eq!(column[3], 1.0);
        assert_eq!(column[4], 2.0);
    }
}
