use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::registry::{self, IndicatorType, InputSource, Params};

use super::canonical::short_hash;

/// A declarative indicator request (spec §3). Validated against the
/// registry at `IdeaCard` load time; never constructed in a way that
/// bypasses that validation outside of this module.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureSpec {
    pub indicator_type: IndicatorType,
    pub output_key: String,
    pub params: Params,
    pub input_source: InputSource,
    pub input_indicator_key: Option<String>,
}

/// Wire-format counterpart of `FeatureSpec`: `indicator_type` is a raw
/// string here, not the closed `IndicatorType` enum, so a value the
/// registry doesn't recognize survives deserialization and reaches
/// `IdeaCard::compile`, which raises `ConfigError::UnsupportedIndicatorType`
/// naming the offending value instead of failing mid-`serde_json` parse.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureSpecSource {
    pub indicator_type: String,
    pub output_key: String,
    pub params: Params,
    pub input_source: InputSource,
    pub input_indicator_key: Option<String>,
}

impl FeatureSpecSource {
    pub fn compile(self) -> Result<FeatureSpec, ConfigError> {
        let indicator_type = self
            .indicator_type
            .parse::<IndicatorType>()
            .map_err(|_| ConfigError::UnsupportedIndicatorType(self.indicator_type))?;
        Ok(FeatureSpec {
            indicator_type,
            output_key: self.output_key,
            params: self.params,
            input_source: self.input_source,
            input_indicator_key: self.input_indicator_key,
        })
    }
}

impl FeatureSpec {
    pub fn validate(&self) -> Result<(), ConfigError> {
        registry::validate_params(self.indicator_type, &self.params)?;

        if self.input_source == InputSource::Indicator && self.input_indicator_key.is_none() {
            return Err(ConfigError::InvalidIndicatorParams {
                indicator_type: self.indicator_type.to_string(),
                reason: "input_source = indicator requires input_indicator_key".to_string(),
            });
        }
        if self.input_source != InputSource::Indicator && self.input_indicator_key.is_some() {
            return Err(ConfigError::InvalidIndicatorParams {
                indicator_type: self.indicator_type.to_string(),
                reason: "input_indicator_key is only valid when input_source = indicator"
                    .to_string(),
            });
        }
        Ok(())
    }

    /// TF-independent deterministic id identifying this indicator's
    /// semantics: `(indicator_type, canonicalized params, input_source)`.
    /// Multi-output expansions of the same spec share this id; `indicator_key`
    /// (the canonical output column name) is what distinguishes outputs.
    pub fn feature_spec_id(&self) -> String {
        #[derive(Serialize)]
        struct Identity<'a> {
            indicator_type: IndicatorType,
            params: &'a Params,
            input_source: &'a InputSource,
            input_indicator_key: &'a Option<String>,
        }
        let identity = Identity {
            indicator_type: self.indicator_type,
            params: &self.params,
            input_source: &self.input_source,
            input_indicator_key: &self.input_indicator_key,
        };
        let json = serde_json::to_string(&identity).expect("FeatureSpec identity always serializes");
        // spec.md §3 defines this id as a 12-char hash, distinct from the
        // 16-hex rule governing idea_hash/trades_hash/equity_hash/run_hash.
        short_hash(json.as_bytes())[..12].to_string()
    }

    pub fn canonical_output_keys(&self) -> Vec<String> {
        registry::canonical_output_keys(self.indicator_type, &self.output_key)
    }

    pub fn warmup_bars(&self) -> usize {
        registry::warmup_bars(self.indicator_type, &self.params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ParamValue;
    use std::collections::BTreeMap;

    fn sma(period: i64) -> FeatureSpec {
        let mut params = BTreeMap::new();
        params.insert("period".to_string(), ParamValue::Int(period));
        FeatureSpec {
            indicator_type: IndicatorType::Sma,
            output_key: "sma_fast".to_string(),
            params,
            input_source: InputSource::Close,
            input_indicator_key: None,
        }
    }

    #[test]
    fn feature_spec_id_is_stable_and_tf_independent() {
        let a = sma(20);
        let b = sma(20);
        assert_eq!(a.feature_spec_id(), b.feature_spec_id());
        assert_eq!(a.feature_spec_id().len(), 12);
    }

    #[test]
    fn feature_spec_id_differs_on_param_change() {
        assert_ne!(sma(20).feature_spec_id(), sma(21).feature_spec_id());
    }

    #[test]
    fn source_compiles_a_known_indicator_type() {
        let mut params = BTreeMap::new();
        params.insert("period".to_string(), ParamValue::Int(20));
        let source = FeatureSpecSource {
            indicator_type: "sma".to_string(),
            output_key: "sma_fast".to_string(),
            params,
            input_source: InputSource::Close,
            input_indicator_key: None,
        };
        assert_eq!(source.compile().unwrap().indicator_type, IndicatorType::Sma);
    }

    #[test]
    fn source_rejects_an_unknown_indicator_type() {
        let source = FeatureSpecSource {
            indicator_type: "made_up_indicator".to_string(),
            output_key: "x".to_string(),
            params: BTreeMap::new(),
            input_source: InputSource::Close,
            input_indicator_key: None,
        };
        assert_eq!(
            source.compile().unwrap_err(),
            ConfigError::UnsupportedIndicatorType("made_up_indicator".to_string())
        );
    }

    #[test]
    fn rejects_indicator_input_without_key() {
        let mut spec = sma(20);
        spec.input_source = InputSource::Indicator;
        assert!(spec.validate().is_err());
    }
}
