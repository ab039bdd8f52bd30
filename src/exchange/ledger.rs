use serde::{Deserialize, Serialize};

/// Account-level ledger state (spec §3 "Ledger state"). Every field is
/// re-derived from `cash_balance_usdt` and the current position's
/// unrealized PnL each time `mark_to_market` runs, so the four identities
/// of spec §8 ("Ledger identities") hold by construction rather than by
/// separately-maintained bookkeeping.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Ledger {
    pub cash_balance_usdt: f64,
    pub unrealized_pnl_usdt: f64,
    pub equity_usdt: f64,
    pub used_margin_usdt: f64,
    pub free_margin_usdt: f64,
    pub available_balance_usdt: f64,
}

impl Ledger {
    pub fn new(initial_equity_usdt: f64) -> Self {
        Self {
            cash_balance_usdt: initial_equity_usdt,
            unrealized_pnl_usdt: 0.0,
            equity_usdt: initial_equity_usdt,
            used_margin_usdt: 0.0,
            free_margin_usdt: initial_equity_usdt,
            available_balance_usdt: initial_equity_usdt,
        }
    }

    pub fn apply_cash_delta(&mut self, delta: f64) {
        self.cash_balance_usdt += delta;
    }

    /// Recomputes every derived field from `cash_balance_usdt` and the
    /// position's unrealized PnL (spec §8, ledger identities):
    /// `equity = cash + unrealized`, `free = equity - used`,
    /// `available = max(0, free)`, `used = notional * imr` when positioned.
    pub fn mark_to_market(&mut self, unrealized_pnl_usdt: f64, used_margin_usdt: f64) {
        self.unrealized_pnl_usdt = unrealized_pnl_usdt;
        self.equity_usdt = self.cash_balance_usdt + self.unrealized_pnl_usdt;
        self.used_margin_usdt = used_margin_usdt;
        self.free_margin_usdt = self.equity_usdt - self.used_margin_usdt;
        self.available_balance_usdt = self.free_margin_usdt.max(0.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flat_ledger_has_full_equity_available() {
        let ledger = Ledger::new(1_000.0);
        assert_eq!(ledger.equity_usdt, 1_000.0);
        assert_eq!(ledger.available_balance_usdt, 1_000.0);
    }

    #[test]
    fn mark_to_market_holds_spec_identities() {
        let mut ledger = Ledger::new(1_000.0);
        ledger.mark_to_market(50.0, 200.0);
        assert_eq!(ledger.equity_usdt, ledger.cash_balance_usdt + ledger.unrealized_pnl_usdt);
        assert_eq!(ledger.free_margin_usdt, ledger.equity_usdt - ledger.used_margin_usdt);
        assert_eq!(ledger.available_balance_usdt, ledger.free_margin_usdt.max(0.0));
    }

    #[test]
    fn available_floors_at_zero_when_free_is_negative() {
        let mut ledger = Ledger::new(100.0);
        ledger.mark_to_market(-50.0, 100.0);
        assert!(ledger.free_margin_usdt < 0.0);
        assert_eq!(ledger.available_balance_usdt, 0.0);
    }
}
