use serde::{Deserialize, Serialize};

/// Engine-level stop thresholds (spec §6, §4.6 step 3.d).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StopsConfig {
    pub equity_floor_usdt: f64,
    pub starvation_bars: u32,
    /// Open Question #1 (spec §9): whether liquidation latches entries off
    /// for the rest of the run. Defaults to `true`, overridable per
    /// `IdeaCard`.
    #[serde(default = "default_latch")]
    pub latch_entries_on_liquidation: bool,
}

fn default_latch() -> bool {
    true
}

/// Toggles for optional simulation behavior (spec §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimConfig {
    #[serde(default = "default_true")]
    pub funding_enabled: bool,
}

fn default_true() -> bool {
    true
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            funding_enabled: true,
        }
    }
}
