//! Risk-based position sizing (spec §4.6, "Signal sizing"): an ATR stop
//! distance converts a fixed fraction of equity into a notional order size
//! and an SL/TP price pair.

use crate::error::FeaturePipelineError;
use crate::exchange::Side;
use crate::idea_card::RiskConfig;
use crate::snapshot::RuntimeSnapshotView;
use crate::time::TfRole;

/// The sized order this bar's signal should submit: notional in USDT plus
/// the SL/TP levels to attach to it.
#[derive(Debug, Clone, Copy)]
pub struct SizedOrder {
    pub size_usdt: f64,
    pub sl: f64,
    pub tp: f64,
}

/// Converts `risk` into a concrete order given the current exec-TF close
/// as the reference price for sizing (the actual fill may differ once
/// slippage and the next bar's open are known; sizing always works off the
/// signal bar's close, matching the ATR reading the rule itself used).
pub fn size_order(
    risk: &RiskConfig,
    snapshot: &RuntimeSnapshotView,
    equity_usdt: f64,
    side: Side,
) -> Result<SizedOrder, FeaturePipelineError> {
    let reference_price = snapshot
        .bar(TfRole::Exec)
        .map(|b| b.close)
        .unwrap_or(snapshot.mark_price());
    let atr = snapshot.get_feature_strict(&risk.sl.atr_key, TfRole::Exec, 0)?;
    let stop_distance = risk.sl.atr_mult * atr;

    let (sl, tp) = match side {
        Side::Long => (
            reference_price - stop_distance,
            reference_price + risk.tp.r_multiple * stop_distance,
        ),
        Side::Short => (
            reference_price + stop_distance,
            reference_price - risk.tp.r_multiple * stop_distance,
        ),
    };

    let risk_amount_usdt = equity_usdt * risk.risk_per_trade_pct / 100.0;
    let size_units = if stop_distance > 0.0 {
        risk_amount_usdt / stop_distance
    } else {
        0.0
    };
    let size_usdt = size_units * reference_price;

    Ok(SizedOrder { size_usdt, sl, tp })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Bar;
    use crate::feed_store::FeedStore;
    use crate::idea_card::{FeatureSpec, StopLossConfig, TakeProfitConfig};
    use crate::registry::{IndicatorType, InputSource, ParamValue};
    use crate::time::Timeframe;
    use std::collections::BTreeMap;

    fn bar(i: i64, high: f64, low: f64, close: f64) -> Bar {
        Bar::new(Timeframe::M15, i * 900_000, close, high, low, close, 10.0).unwrap()
    }

    fn atr_spec() -> FeatureSpec {
        let mut params = BTreeMap::new();
        params.insert("period".to_string(), ParamValue::Int(2));
        FeatureSpec {
            indicator_type: IndicatorType::Atr,
            output_key: "atr_2".to_string(),
            params,
            input_source: InputSource::Close,
            input_indicator_key: None,
        }
    }

    #[test]
    fn long_stop_sits_below_reference_price() {
        let bars: Vec<Bar> = (0..6).map(|i| bar(i, 102.0, 98.0, 100.0)).collect();
        let store = FeedStore::build(Timeframe::M15, bars, &[atr_spec()]).unwrap();
        let snapshot = RuntimeSnapshotView::new(&store, None, None, 5, 100.0);

        let risk = RiskConfig {
            sl: StopLossConfig {
                atr_key: "atr_2".to_string(),
                atr_mult: 1.0,
            },
            tp: TakeProfitConfig { r_multiple: 2.0 },
            risk_per_trade_pct: 1.0,
        };

        let order = size_order(&risk, &snapshot, 10_000.0, Side::Long).unwrap();
        assert!(order.sl < 100.0);
        assert!(order.tp > 100.0);
        assert!(order.size_usdt > 0.0);
    }

    #[test]
    fn short_stop_sits_above_reference_price() {
        let bars: Vec<Bar> = (0..6).map(|i| bar(i, 102.0, 98.0, 100.0)).collect();
        let store = FeedStore::build(Timeframe::M15, bars, &[atr_spec()]).unwrap();
        let snapshot = RuntimeSnapshotView::new(&store, None, None, 5, 100.0);

        let risk = RiskConfig {
            sl: StopLossConfig {
                atr_key: "atr_2".to_string(),
                atr_mult: 1.0,
            },
            tp: TakeProfitConfig { r_multiple: 2.0 },
            risk_per_trade_pct: 1.0,
        };

        let order = size_order(&risk, &snapshot, 10_000.0, Side::Short).unwrap();
        assert!(order.sl > 100.0);
        assert!(order.tp < 100.0);
    }
}
