use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Stop-loss model: `sl = entry -/+ atr_mult * ATR(atr_key)` (sign depends
/// on trade side, resolved by the risk sizing code in `engine`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StopLossConfig {
    pub atr_key: String,
    pub atr_mult: f64,
}

/// Take-profit model: `tp = entry +/- r_multiple * |entry - sl|`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TakeProfitConfig {
    pub r_multiple: f64,
}

/// Risk sizing model (spec §6). No silent defaults: an `IdeaCard` missing
/// any of these fields is rejected at load (spec §4.6, "Signal sizing").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskConfig {
    pub sl: StopLossConfig,
    pub tp: TakeProfitConfig,
    pub risk_per_trade_pct: f64,
}

impl RiskConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=100.0).contains(&self.risk_per_trade_pct) || self.risk_per_trade_pct <= 0.0 {
            return Err(ConfigError::RuleCompileError(format!(
                "risk_per_trade_pct must be in (0, 100], got {}",
                self.risk_per_trade_pct
            )));
        }
        if self.sl.atr_mult <= 0.0 {
            return Err(ConfigError::RuleCompileError(format!(
                "sl.atr_mult must be > 0, got {}",
                self.sl.atr_mult
            )));
        }
        if self.tp.r_multiple <= 0.0 {
            return Err(ConfigError::RuleCompileError(format!(
                "tp.r_multiple must be > 0, got {}",
                self.tp.r_multiple
            )));
        }
        Ok(())
    }
}
