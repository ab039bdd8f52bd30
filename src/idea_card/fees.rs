use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Fee model selector (spec §4.5). `TakerOnly` is the only supported value
/// today; both entry and exit fills are charged `notional * taker_fee_rate`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeeMode {
    TakerOnly,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeesConfig {
    #[serde(default = "default_fee_mode")]
    pub fee_mode: FeeMode,
}

fn default_fee_mode() -> FeeMode {
    FeeMode::TakerOnly
}

impl Default for FeesConfig {
    fn default() -> Self {
        Self {
            fee_mode: default_fee_mode(),
        }
    }
}

impl FeesConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self.fee_mode {
            FeeMode::TakerOnly => Ok(()),
        }
    }
}
