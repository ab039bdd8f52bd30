use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Where the exchange derives `mark_price` from. Locked to `Close` in this
/// version (spec §4.5, §8 "Mark-source lock"; Open Question #2 in spec §9).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarkSource {
    Close,
    Mid,
    Last,
}

/// Account-level ledger configuration (spec §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountConfig {
    pub initial_equity_usdt: f64,
    pub max_leverage: f64,
    /// `None` means `initial_margin_rate = 1 / max_leverage` (spec §6).
    #[serde(default)]
    pub initial_margin_rate: Option<f64>,
    #[serde(default = "default_maintenance_margin_rate")]
    pub maintenance_margin_rate: f64,
    #[serde(default = "default_taker_fee_rate")]
    pub taker_fee_rate: f64,
    #[serde(default)]
    pub include_est_close_fee_in_entry_gate: bool,
    #[serde(default = "default_mark_source")]
    pub mark_source: MarkSource,
}

fn default_maintenance_margin_rate() -> f64 {
    0.005
}

fn default_taker_fee_rate() -> f64 {
    0.0006
}

fn default_mark_source() -> MarkSource {
    MarkSource::Close
}

impl AccountConfig {
    pub fn initial_margin_rate(&self) -> f64 {
        self.initial_margin_rate
            .unwrap_or(1.0 / self.max_leverage)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.mark_source != MarkSource::Close {
            return Err(ConfigError::UnsupportedMode(format!(
                "mark_source must be 'close' in this version, got {:?}",
                self.mark_source
            )));
        }
        if self.max_leverage <= 0.0 {
            return Err(ConfigError::UnsupportedMode(format!(
                "max_leverage must be > 0, got {}",
                self.max_leverage
            )));
        }
        if self.initial_equity_usdt <= 0.0 {
            return Err(ConfigError::UnsupportedMode(format!(
                "initial_equity_usdt must be > 0, got {}",
                self.initial_equity_usdt
            )));
        }
        Ok(())
    }
}

/// The locked margin/position-mode/instrument parameters spec §4.5 requires
/// be rejected at init if violated. An `IdeaCard` never sets these to
/// anything but the supported value today; the fields exist so a future
/// extension can widen them without a breaking schema change, exactly like
/// `mark_source`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarginModeConfig {
    #[serde(default = "default_margin_mode")]
    pub margin_mode: String,
    #[serde(default = "default_position_mode")]
    pub position_mode: String,
    #[serde(default = "default_instrument")]
    pub instrument: String,
}

fn default_margin_mode() -> String {
    "isolated".to_string()
}

fn default_position_mode() -> String {
    "one_way".to_string()
}

fn default_instrument() -> String {
    "linear_perp".to_string()
}

impl Default for MarginModeConfig {
    fn default() -> Self {
        Self {
            margin_mode: default_margin_mode(),
            position_mode: default_position_mode(),
            instrument: default_instrument(),
        }
    }
}

impl MarginModeConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.margin_mode != "isolated" {
            return Err(ConfigError::UnsupportedMode(format!(
                "margin_mode '{}' unsupported; only 'isolated' is allowed",
                self.margin_mode
            )));
        }
        if self.position_mode != "one_way" {
            return Err(ConfigError::UnsupportedMode(format!(
                "position_mode '{}' unsupported; only 'one_way' is allowed",
                self.position_mode
            )));
        }
        if self.instrument != "linear_perp" {
            return Err(ConfigError::UnsupportedMode(format!(
                "instrument '{}' unsupported; only 'linear_perp' is allowed",
                self.instrument
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_cross_margin() {
        let cfg = MarginModeConfig {
            margin_mode: "cross".to_string(),
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_non_close_mark_source() {
        let cfg = AccountConfig {
            initial_equity_usdt: 1000.0,
            max_leverage: 10.0,
            initial_margin_rate: None,
            maintenance_margin_rate: 0.005,
            taker_fee_rate: 0.0006,
            include_est_close_fee_in_entry_gate: false,
            mark_source: MarkSource::Mid,
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn imr_defaults_to_inverse_leverage() {
        let cfg = AccountConfig {
            initial_equity_usdt: 1000.0,
            max_leverage: 10.0,
            initial_margin_rate: None,
            maintenance_margin_rate: 0.005,
            taker_fee_rate: 0.0006,
            include_est_close_fee_in_entry_gate: false,
            mark_source: MarkSource::Close,
        };
        assert_eq!(cfg.initial_margin_rate(), 0.1);
    }
}
