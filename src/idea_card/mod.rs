//! The IdeaCard & FeatureSpec model (spec §2 C3, §3, §6): the declarative
//! strategy specification the whole engine is built from. An `IdeaCard` is
//! frozen once `compile`d — nothing downstream ever mutates it, a
//! freeze-then-hash pattern that makes `idea_hash` stable for the life of
//! the run.

mod account;
mod canonical;
mod feature_spec;
mod fees;
mod risk;
mod rules;
mod stops;
mod tf_config;

pub use account::{AccountConfig, MarginModeConfig, MarkSource};
pub use canonical::{hash_value, short_hash};
pub use feature_spec::{FeatureSpec, FeatureSpecSource};
pub use fees::{FeeMode, FeesConfig};
pub use risk::{RiskConfig, StopLossConfig, TakeProfitConfig};
pub use rules::{Comparator, FeatureRef, Operand, RuleExpr, Rules};
pub use stops::{SimConfig, StopsConfig};
pub use tf_config::{TfConfig, TfConfigSource};

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::domain::Symbol;
use crate::error::ConfigError;
use crate::time::TfRole;

/// The root strategy specification (spec §3, §6). Deserialize with
/// `serde_json`, then call `compile` — nothing in this crate accepts an
/// uncompiled `IdeaCard`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdeaCardSource {
    pub id: String,
    pub symbol: String,
    pub tf_configs: TfConfigsSource,
    #[serde(default)]
    pub rules: Rules,
    pub risk: RiskConfig,
    pub account: AccountConfig,
    #[serde(default)]
    pub margin_mode: MarginModeConfig,
    #[serde(default)]
    pub fees: FeesConfig,
    pub stops: StopsConfig,
    #[serde(default)]
    pub sim: SimConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TfConfigs {
    pub exec: TfConfig,
    pub med_tf: Option<TfConfig>,
    pub high_tf: Option<TfConfig>,
}

impl TfConfigs {
    pub fn get(&self, role: TfRole) -> Option<&TfConfig> {
        match role {
            TfRole::Exec => Some(&self.exec),
            TfRole::MedTf => self.med_tf.as_ref(),
            TfRole::HighTf => self.high_tf.as_ref(),
        }
    }
}

/// Wire-format counterpart of `TfConfigs` (see `FeatureSpecSource`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TfConfigsSource {
    pub exec: TfConfigSource,
    pub med_tf: Option<TfConfigSource>,
    pub high_tf: Option<TfConfigSource>,
}

impl TfConfigsSource {
    pub fn compile(self) -> Result<TfConfigs, ConfigError> {
        Ok(TfConfigs {
            exec: self.exec.compile()?,
            med_tf: self.med_tf.map(TfConfigSource::compile).transpose()?,
            high_tf: self.high_tf.map(TfConfigSource::compile).transpose()?,
        })
    }
}

/// A compiled, frozen `IdeaCard`. Every validation in spec §4.5/§4.6/§7 that
/// is "fatal to the run" has already run by the time one of these exists.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdeaCard {
    pub id: String,
    pub symbol: Symbol,
    pub tf_configs: TfConfigs,
    pub rules: Rules,
    pub risk: RiskConfig,
    pub account: AccountConfig,
    pub margin_mode: MarginModeConfig,
    pub fees: FeesConfig,
    pub stops: StopsConfig,
    pub sim: SimConfig,
}

impl IdeaCard {
    /// Validates and freezes a source document into a compiled `IdeaCard`.
    /// Every hard lock of spec §4.5 and every "no silent defaults" rule of
    /// §4.6 is enforced here, before any data is ever fetched (spec §8,
    /// scenario 1: "load fails with INVALID_SYMBOL; no data is fetched").
    pub fn compile(source: IdeaCardSource) -> Result<Self, ConfigError> {
        let symbol = Symbol::parse(&source.symbol)?;
        source.margin_mode.validate()?;
        source.account.validate()?;
        source.fees.validate()?;
        source.risk.validate()?;

        let tf_configs = source.tf_configs.compile()?;

        for tf_config in [
            Some(&tf_configs.exec),
            tf_configs.med_tf.as_ref(),
            tf_configs.high_tf.as_ref(),
        ]
        .into_iter()
        .flatten()
        {
            for spec in &tf_config.feature_specs {
                spec.validate()?;
            }
        }

        validate_feature_spec_ids_unique_per_tf(&tf_configs)?;

        Ok(IdeaCard {
            id: source.id,
            symbol,
            tf_configs,
            rules: source.rules,
            risk: source.risk,
            account: source.account,
            margin_mode: source.margin_mode,
            fees: source.fees,
            stops: source.stops,
            sim: source.sim,
        })
    }

    /// Deterministic hash of the compiled `IdeaCard` (spec §4.7, `idea_hash`).
    pub fn idea_hash(&self) -> String {
        hash_value(self).expect("IdeaCard always serializes")
    }
}

/// Two feature specs in the same TF role must not produce the same
/// canonical output key (that is `CANONICAL_COLLISION`, spec §4.1) unless
/// they are literally the same spec. This is a load-time sanity check;
/// the authoritative collision detector lives in `feature_frame`, which
/// runs against the realized arrays rather than the declared specs.
fn validate_feature_spec_ids_unique_per_tf(tf_configs: &TfConfigs) -> Result<(), ConfigError> {
    for tf_config in [
        Some(&tf_configs.exec),
        tf_configs.med_tf.as_ref(),
        tf_configs.high_tf.as_ref(),
    ]
    .into_iter()
    .flatten()
    {
        let mut seen: BTreeMap<String, &FeatureSpec> = BTreeMap::new();
        for spec in &tf_config.feature_specs {
            for key in spec.canonical_output_keys() {
                if let Some(prev) = seen.insert(key.clone(), spec) {
                    if prev.feature_spec_id() != spec.feature_spec_id() {
                        return Err(ConfigError::RuleCompileError(format!(
                            "canonical output '{key}' is produced by two different feature specs"
                        )));
                    }
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{InputSource, ParamValue};
    use crate::time::Timeframe;

    fn minimal_card(symbol: &str, margin_mode: MarginModeConfig) -> IdeaCardSource {
        let mut params = BTreeMap::new();
        params.insert("period".to_string(), ParamValue::Int(14));
        let atr_spec = FeatureSpecSource {
            indicator_type: "atr".to_string(),
            output_key: "atr_14".to_string(),
            params,
            input_source: InputSource::Close,
            input_indicator_key: None,
        };
        IdeaCardSource {
            id: "demo".to_string(),
            symbol: symbol.to_string(),
            tf_configs: TfConfigsSource {
                exec: TfConfigSource {
                    tf: Timeframe::M15,
                    feature_specs: vec![atr_spec],
                    warmup_bars: None,
                    delay_bars: 0,
                },
                med_tf: None,
                high_tf: None,
            },
            rules: Rules::default(),
            risk: RiskConfig {
                sl: StopLossConfig {
                    atr_key: "atr_14".to_string(),
                    atr_mult: 1.5,
                },
                tp: TakeProfitConfig { r_multiple: 2.0 },
                risk_per_trade_pct: 1.0,
            },
            account: AccountConfig {
                initial_equity_usdt: 10_000.0,
                max_leverage: 10.0,
                initial_margin_rate: None,
                maintenance_margin_rate: 0.005,
                taker_fee_rate: 0.0006,
                include_est_close_fee_in_entry_gate: false,
                mark_source: MarkSource::Close,
            },
            margin_mode,
            fees: FeesConfig::default(),
            stops: StopsConfig {
                equity_floor_usdt: 100.0,
                starvation_bars: 500,
                latch_entries_on_liquidation: true,
            },
            sim: SimConfig::default(),
        }
    }

    #[test]
    fn rejects_non_usdt_symbol_before_touching_data() {
        let src = minimal_card("BTCUSD", MarginModeConfig::default());
        let err = IdeaCard::compile(src).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidSymbol(_)));
    }

    #[test]
    fn rejects_an_unknown_indicator_type_with_the_offending_value() {
        let mut src = minimal_card("BTCUSDT", MarginModeConfig::default());
        src.tf_configs.exec.feature_specs[0].indicator_type = "not_a_real_indicator".to_string();
        let err = IdeaCard::compile(src).unwrap_err();
        assert_eq!(err, ConfigError::UnsupportedIndicatorType("not_a_real_indicator".to_string()));
    }

    #[test]
    fn rejects_cross_margin_mode() {
        let src = minimal_card(
            "BTCUSDT",
            MarginModeConfig {
                margin_mode: "cross".to_string(),
                ..Default::default()
            },
        );
        assert!(matches!(
            IdeaCard::compile(src),
            Err(ConfigError::UnsupportedMode(_))
        ));
    }

    #[test]
    fn compiles_valid_card_and_hashes_deterministically() {
        let src1 = minimal_card("BTCUSDT", MarginModeConfig::default());
        let src2 = minimal_card("BTCUSDT", MarginModeConfig::default());
        let card1 = IdeaCard::compile(src1).unwrap();
        let card2 = IdeaCard::compile(src2).unwrap();
        assert_eq!(card1.idea_hash(), card2.idea_hash());
        assert_eq!(card1.idea_hash().len(), 16);
    }
}
