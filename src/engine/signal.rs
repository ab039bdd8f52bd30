//! Rule-expression evaluation (spec §6, "Boolean expression trees over
//! feature keys and operators"). Pure function over a `RuntimeSnapshotView`:
//! no state, no side effects, so the same snapshot always evaluates to the
//! same boolean (spec §8, determinism).

use crate::error::FeaturePipelineError;
use crate::idea_card::{Comparator, Operand, RuleExpr};
use crate::snapshot::RuntimeSnapshotView;

pub fn evaluate(expr: &RuleExpr, snapshot: &RuntimeSnapshotView) -> Result<bool, FeaturePipelineError> {
    match expr {
        RuleExpr::Compare { left, comparator, right } => eval_compare(left, *comparator, right, snapshot),
        RuleExpr::And(exprs) => {
            for e in exprs {
                if !evaluate(e, snapshot)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        RuleExpr::Or(exprs) => {
            for e in exprs {
                if evaluate(e, snapshot)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        RuleExpr::Not(inner) => Ok(!evaluate(inner, snapshot)?),
    }
}

fn eval_compare(
    left: &Operand,
    comparator: Comparator,
    right: &Operand,
    snapshot: &RuntimeSnapshotView,
) -> Result<bool, FeaturePipelineError> {
    match comparator {
        Comparator::CrossAbove | Comparator::CrossBelow => {
            let l0 = resolve_at(left, snapshot, 0)?;
            let r0 = resolve_at(right, snapshot, 0)?;
            let l1 = resolve_at(left, snapshot, 1)?;
            let r1 = resolve_at(right, snapshot, 1)?;
            Ok(match comparator {
                Comparator::CrossAbove => l1 <= r1 && l0 > r0,
                Comparator::CrossBelow => l1 >= r1 && l0 < r0,
                _ => unreachable!(),
            })
        }
        _ => {
            let l = resolve_at(left, snapshot, 0)?;
            let r = resolve_at(right, snapshot, 0)?;
            Ok(match comparator {
                Comparator::Gt => l > r,
                Comparator::Lt => l < r,
                Comparator::Ge => l >= r,
                Comparator::Le => l <= r,
                Comparator::Eq => l == r,
                Comparator::CrossAbove | Comparator::CrossBelow => unreachable!("handled above"),
            })
        }
    }
}

/// Resolves an operand `extra_offset` bars further back than its own
/// declared `offset` (used by `cross_above`/`cross_below` to read both the
/// current and prior bar's values).
fn resolve_at(
    operand: &Operand,
    snapshot: &RuntimeSnapshotView,
    extra_offset: usize,
) -> Result<f64, FeaturePipelineError> {
    match operand {
        Operand::Literal(v) => Ok(*v),
        Operand::Feature(r) => snapshot.get_feature_strict(&r.key, r.tf_role, r.offset + extra_offset),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Bar;
    use crate::feed_store::FeedStore;
    use crate::idea_card::FeatureRef;
    use crate::registry::{IndicatorType, InputSource, ParamValue};
    use crate::time::{TfRole, Timeframe};
    use std::collections::BTreeMap;

    fn bar(i: i64, close: f64) -> Bar {
        Bar::new(Timeframe::M15, i * 900_000, close, close + 1.0, close - 1.0, close, 10.0).unwrap()
    }

    fn sma_spec(output_key: &str, period: i64) -> crate::idea_card::FeatureSpec {
        let mut params = BTreeMap::new();
        params.insert("period".to_string(), ParamValue::Int(period));
        crate::idea_card::FeatureSpec {
            indicator_type: IndicatorType::Sma,
            output_key: output_key.to_string(),
            params,
            input_source: InputSource::Close,
            input_indicator_key: None,
        }
    }

    #[test]
    fn cross_above_detects_transition() {
        let closes = [10.0, 10.0, 10.0, 20.0, 20.0, 20.0, 20.0, 20.0];
        let bars: Vec<Bar> = closes.iter().enumerate().map(|(i, &c)| bar(i as i64, c)).collect();
        let store = FeedStore::build(Timeframe::M15, bars, &[sma_spec("sma_fast", 2), sma_spec("sma_slow", 4)]).unwrap();

        let expr = RuleExpr::Compare {
            left: Operand::Feature(FeatureRef {
                key: "sma_fast".to_string(),
                tf_role: TfRole::Exec,
                offset: 0,
            }),
            comparator: Comparator::CrossAbove,
            right: Operand::Feature(FeatureRef {
                key: "sma_slow".to_string(),
                tf_role: TfRole::Exec,
                offset: 0,
            }),
        };

        let snap_mid = RuntimeSnapshotView::new(&store, None, None, 5, 20.0);
        assert!(evaluate(&expr, &snap_mid).unwrap());

        let snap_late = RuntimeSnapshotView::new(&store, None, None, 7, 20.0);
        assert!(!evaluate(&expr, &snap_late).unwrap());
    }

    #[test]
    fn and_short_circuits_on_first_false() {
        let expr = RuleExpr::And(vec![
            RuleExpr::Compare {
                left: Operand::Literal(1.0),
                comparator: Comparator::Gt,
                right: Operand::Literal(2.0),
            },
            RuleExpr::Compare {
                left: Operand::Feature(FeatureRef {
                    key: "nonexistent".to_string(),
                    tf_role: TfRole::Exec,
                    offset: 0,
                }),
                comparator: Comparator::Gt,
                right: Operand::Literal(0.0),
            },
        ]);
        let bars: Vec<Bar> = (0..3).map(|i| bar(i, 10.0)).collect();
        let store = FeedStore::build(Timeframe::M15, bars, &[]).unwrap();
        let snap = RuntimeSnapshotView::new(&store, None, None, 1, 10.0);
        assert_eq!(evaluate(&expr, &snap).unwrap(), false);
    }
}
