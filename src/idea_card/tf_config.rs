use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::time::Timeframe;

use super::feature_spec::{FeatureSpec, FeatureSpecSource};

/// Configuration for one timeframe role within an `IdeaCard` (spec §3, §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TfConfig {
    pub tf: Timeframe,
    pub feature_specs: Vec<FeatureSpec>,
    /// Explicit warmup override; if absent the engine derives it from the
    /// registry's per-spec warmup formula (spec §4.6 step 1).
    pub warmup_bars: Option<usize>,
    /// Additional leading bars skipped after warmup so only fully closed
    /// candles are ever evaluated (spec GLOSSARY, "Delay bars").
    #[serde(default)]
    pub delay_bars: usize,
}

impl TfConfig {
    pub fn max_warmup_bars(&self) -> usize {
        let from_specs = self
            .feature_specs
            .iter()
            .map(FeatureSpec::warmup_bars)
            .max()
            .unwrap_or(0);
        self.warmup_bars.unwrap_or(0).max(from_specs)
    }
}

/// Wire-format counterpart of `TfConfig` (see `FeatureSpecSource`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TfConfigSource {
    pub tf: Timeframe,
    pub feature_specs: Vec<FeatureSpecSource>,
    pub warmup_bars: Option<usize>,
    #[serde(default)]
    pub delay_bars: usize,
}

impl TfConfigSource {
    pub fn compile(self) -> Result<TfConfig, ConfigError> {
        let feature_specs = self
            .feature_specs
            .into_iter()
            .map(FeatureSpecSource::compile)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(TfConfig {
            tf: self.tf,
            feature_specs,
            warmup_bars: self.warmup_bars,
            delay_bars: self.delay_bars,
        })
    }
}
