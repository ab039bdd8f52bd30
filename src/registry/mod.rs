//! Indicator registry (spec §4.1, component C4): the single source of truth
//! for supported indicator types, their inputs, parameters, outputs, and
//! warmup formula. Unknown types and invalid params fail loud here rather
//! than silently falling back, so the feature-frame builder (`feature_frame`)
//! never has to guess what a spec means.

mod builtin;
mod params;

pub use params::{ParamValue, Params};

use std::collections::BTreeMap;
use std::sync::OnceLock;

use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

use crate::error::ConfigError;

/// The closed set of indicator types the registry knows how to compute.
/// New types are added here and nowhere else (spec §9, "Registry as single
/// source of truth").
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum IndicatorType {
    Sma,
    Ema,
    Rsi,
    Atr,
    BollingerBands,
    Macd,
    Donchian,
}

/// Which raw series (or chained indicator) an indicator consumes as input.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputSource {
    Close,
    Open,
    High,
    Low,
    Volume,
    Hlc3,
    Ohlc4,
    /// Chains off another indicator's output, named by `input_indicator_key`.
    Indicator,
}

impl InputSource {
    /// Indicators that need the full OHLC range rather than a single series
    /// (e.g. ATR, Donchian) declare this as one of their `required_inputs`
    /// alongside `Close`; this helper flags the "needs high+low" shape.
    pub fn is_ohlc_range(&self) -> bool {
        matches!(self, InputSource::High | InputSource::Low)
    }
}

/// How many output columns an indicator spec expands into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputShape {
    /// `base` is the one and only canonical column.
    Single,
    /// `base_<suffix>` for each listed suffix.
    Multi(&'static [&'static str]),
}

/// A declared parameter: name, whether it's required, and a validator over
/// the raw `ParamValue` supplied by the `IdeaCard`.
pub struct ParamDecl {
    pub name: &'static str,
    pub required: bool,
    pub validate: fn(&ParamValue) -> Result<(), String>,
}

/// One row of the registry table.
pub struct RegistryEntry {
    pub indicator_type: IndicatorType,
    pub required_inputs: &'static [InputSource],
    pub params: &'static [ParamDecl],
    pub outputs: OutputShape,
    /// Structure-like features (e.g. a Donchian channel recomputed only at
    /// breakouts) produce values at sparse indices and are forward-filled
    /// at compute time so snapshot access stays O(1) (spec §4.1, §9).
    pub sparse: bool,
    pub warmup: fn(&Params) -> usize,
}

fn table() -> &'static [RegistryEntry] {
    static TABLE: OnceLock<Vec<RegistryEntry>> = OnceLock::new();
    TABLE.get_or_init(builtin::entries).as_slice()
}

/// Looks up the registry entry for `indicator_type`, or `None` if unknown.
pub fn lookup(indicator_type: IndicatorType) -> Option<&'static RegistryEntry> {
    table().iter().find(|e| e.indicator_type == indicator_type)
}

/// Validates params against the declared `ParamDecl`s for `indicator_type`.
/// Unknown type is reported by the caller (the registry itself only knows
/// about `IndicatorType` members, so "unknown" here means the closed enum
/// could not parse — see `IndicatorType::from_str` via `strum`).
pub fn validate_params(indicator_type: IndicatorType, params: &Params) -> Result<(), ConfigError> {
    let entry = lookup(indicator_type).expect("IndicatorType is a closed enum covered by the table");

    for decl in entry.params {
        match params.get(decl.name) {
            Some(value) => (decl.validate)(value).map_err(|reason| ConfigError::InvalidIndicatorParams {
                indicator_type: indicator_type.to_string(),
                reason: format!("param '{}': {reason}", decl.name),
            })?,
            None if decl.required => {
                return Err(ConfigError::InvalidIndicatorParams {
                    indicator_type: indicator_type.to_string(),
                    reason: format!("missing required param '{}'", decl.name),
                });
            }
            None => {}
        }
    }

    let known: BTreeMap<&str, ()> = entry.params.iter().map(|d| (d.name, ())).collect();
    for key in params.keys() {
        if !known.contains_key(key.as_str()) {
            return Err(ConfigError::InvalidIndicatorParams {
                indicator_type: indicator_type.to_string(),
                reason: format!("unknown param '{key}'"),
            });
        }
    }

    Ok(())
}

/// Enumerates the canonical output column keys for a base `output_key`
/// (spec §4.1 canonicalization contract): single-output indicators produce
/// `base`, multi-output indicators produce `base_<suffix>` per suffix.
pub fn canonical_output_keys(indicator_type: IndicatorType, output_key: &str) -> Vec<String> {
    let entry = lookup(indicator_type).expect("IndicatorType is a closed enum covered by the table");
    match entry.outputs {
        OutputShape::Single => vec![output_key.to_string()],
        OutputShape::Multi(suffixes) => suffixes
            .iter()
            .map(|suffix| format!("{output_key}_{suffix}"))
            .collect(),
    }
}

pub fn warmup_bars(indicator_type: IndicatorType, params: &Params) -> usize {
    let entry = lookup(indicator_type).expect("IndicatorType is a closed enum covered by the table");
    (entry.warmup)(params)
}

pub fn required_inputs(indicator_type: IndicatorType) -> &'static [InputSource] {
    lookup(indicator_type)
        .map(|e| e.required_inputs)
        .unwrap_or(&[])
}

pub fn is_sparse(indicator_type: IndicatorType) -> bool {
    lookup(indicator_type).map(|e| e.sparse).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_indicator_type_has_exactly_one_table_row() {
        // Hard-codes the closed set intentionally so this fails loudly if a
        // variant is added to `IndicatorType` without a matching table row.
        for ty in [
            IndicatorType::Sma,
            IndicatorType::Ema,
            IndicatorType::Rsi,
            IndicatorType::Atr,
            IndicatorType::BollingerBands,
            IndicatorType::Macd,
            IndicatorType::Donchian,
        ] {
            assert!(lookup(ty).is_some(), "missing registry row for {ty:?}");
        }
    }

    #[test]
    fn sma_outputs_are_single_column() {
        assert_eq!(
            canonical_output_keys(IndicatorType::Sma, "sma_20"),
            vec!["sma_20".to_string()]
        );
    }

    #[test]
    fn bollinger_outputs_are_three_columns() {
        let keys = canonical_output_keys(IndicatorType::BollingerBands, "bb");
        assert_eq!(keys, vec!["bb_upper", "bb_mid", "bb_lower"]);
    }
}
