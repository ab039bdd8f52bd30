//! Runtime snapshot view (spec §2 C7, §4.4): a cheap, per-bar façade over
//! one or more `FeedStore`s that the strategy evaluator and risk sizing
//! code read from. Never copies data — it holds indices into feed stores
//! it borrows, a "holds ranges, not copies" discipline applied across
//! three timeframe roles instead of a single stream.

use std::collections::BTreeMap;

use crate::domain::Bar;
use crate::error::FeaturePipelineError;
use crate::feed_store::FeedStore;
use crate::time::TfRole;

/// Bounded last-N history for one timeframe role: bars and feature columns,
/// trimmed to `max_len` on every push (spec §4.4 "History windows", §5
/// "bounded history deques (maxlen = configured window)").
#[derive(Debug, Clone)]
pub struct HistoryWindow {
    max_len: usize,
    bars: Vec<Bar>,
    features: BTreeMap<String, Vec<f64>>,
}

impl HistoryWindow {
    pub fn new(max_len: usize) -> Self {
        Self {
            max_len,
            bars: Vec::with_capacity(max_len),
            features: BTreeMap::new(),
        }
    }

    /// Appends one bar step; drops the oldest entry once `max_len` is
    /// exceeded. `features` need not cover every declared key — columns
    /// only grow for keys actually pushed.
    pub fn push(&mut self, bar: Bar, features: &BTreeMap<String, f64>) {
        self.bars.push(bar);
        if self.bars.len() > self.max_len {
            self.bars.remove(0);
        }
        for (key, value) in features {
            let column = self.features.entry(key.clone()).or_default();
            column.push(*value);
            if column.len() > self.max_len {
                column.remove(0);
            }
        }
    }

    /// Oldest-first. Length is `min(bars seen so far, max_len)`.
    pub fn bars(&self) -> &[Bar] {
        &self.bars
    }

    pub fn feature(&self, key: &str) -> &[f64] {
        self.features.get(key).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// One `HistoryWindow` per configured timeframe role. Owned by the engine
/// across a whole run, built before the warmup phase and pushed to at every
/// bar step (warmup and simulation alike) so history is already populated
/// by `sim_start_idx` (spec §4.6 step 2).
#[derive(Debug, Clone, Default)]
pub struct HistoryWindows {
    windows: BTreeMap<TfRole, HistoryWindow>,
}

impl HistoryWindows {
    pub fn new(roles: &[TfRole], max_len: usize) -> Self {
        Self {
            windows: roles.iter().map(|&role| (role, HistoryWindow::new(max_len))).collect(),
        }
    }

    pub fn push(&mut self, role: TfRole, bar: Bar, features: &BTreeMap<String, f64>) {
        if let Some(window) = self.windows.get_mut(&role) {
            window.push(bar, features);
        }
    }

    pub fn get(&self, role: TfRole) -> Option<&HistoryWindow> {
        self.windows.get(&role)
    }
}

/// Per-role indices and staleness flags for one bar step.
#[derive(Debug, Clone, Copy, Default)]
struct RoleCursor {
    idx: Option<usize>,
    advanced_this_step: bool,
}

/// A borrowed, short-lived view over the exec/med_tf/high_tf feed stores at
/// one point in simulated time (spec §4.4). Constructed fresh every bar by
/// the engine; never stored across bars.
pub struct RuntimeSnapshotView<'a> {
    stores: BTreeMap<TfRole, &'a FeedStore>,
    cursors: BTreeMap<TfRole, RoleCursor>,
    mark_price: f64,
    history: Option<&'a HistoryWindows>,
}

impl<'a> RuntimeSnapshotView<'a> {
    pub fn new(
        exec: &'a FeedStore,
        med_tf: Option<&'a FeedStore>,
        high_tf: Option<&'a FeedStore>,
        exec_idx: usize,
        mark_price: f64,
    ) -> Self {
        let mut stores = BTreeMap::new();
        stores.insert(TfRole::Exec, exec);
        if let Some(s) = med_tf {
            stores.insert(TfRole::MedTf, s);
        }
        if let Some(s) = high_tf {
            stores.insert(TfRole::HighTf, s);
        }

        let mut cursors = BTreeMap::new();
        cursors.insert(
            TfRole::Exec,
            RoleCursor {
                idx: Some(exec_idx),
                advanced_this_step: true,
            },
        );

        Self {
            stores,
            cursors,
            mark_price,
            history: None,
        }
    }

    /// Attaches the engine's running history windows so `history_bars`/
    /// `history_feature` resolve. Optional: a snapshot with no history
    /// attached just reports empty windows for every role.
    pub fn with_history(mut self, history: &'a HistoryWindows) -> Self {
        self.history = Some(history);
        self
    }

    /// Advances (or leaves unadvanced) the `med_tf`/`high_tf` cursor per the
    /// forward-fill rule of spec §4.4: the HTF/MTF index only moves once the
    /// exec bar's close reaches or passes the next higher-TF bar's close.
    pub fn advance_role(&mut self, role: TfRole, exec_bar_ts_close: i64) {
        let Some(&store) = self.stores.get(&role) else {
            return;
        };
        let new_idx = store.last_closed_idx_at_or_before(exec_bar_ts_close);
        let prev_idx = self.cursors.get(&role).and_then(|c| c.idx);
        self.cursors.insert(
            role,
            RoleCursor {
                idx: new_idx,
                advanced_this_step: new_idx != prev_idx,
            },
        );
    }

    fn idx_for(&self, role: TfRole) -> Option<usize> {
        self.cursors.get(&role).and_then(|c| c.idx)
    }

    pub fn exec_idx(&self) -> usize {
        self.idx_for(TfRole::Exec).expect("exec index always set")
    }

    /// Current index into `role`'s feed store, if that role is configured
    /// and has reached a valid bar yet.
    pub fn current_idx(&self, role: TfRole) -> Option<usize> {
        self.idx_for(role)
    }

    /// `true` iff `role`'s index did not move during this bar step (spec
    /// §4.4, "staleness").
    pub fn staleness(&self, role: TfRole) -> bool {
        !self
            .cursors
            .get(&role)
            .map(|c| c.advanced_this_step)
            .unwrap_or(false)
    }

    pub fn mark_price(&self) -> f64 {
        self.mark_price
    }

    pub fn bar(&self, role: TfRole) -> Option<&Bar> {
        let idx = self.idx_for(role)?;
        self.stores.get(&role)?.bar(idx)
    }

    /// Permissive feature accessor: returns `None` if the role isn't
    /// configured, the index is out of range (before the role's history
    /// begins), or the value is still NaN.
    pub fn get_feature(&self, key: &str, role: TfRole, offset: usize) -> Option<f64> {
        let idx = self.idx_for(role)?;
        let idx = idx.checked_sub(offset)?;
        self.stores.get(&role)?.get_indicator(key, idx)
    }

    /// Strict feature accessor (spec §4.4): `INDICATOR_NOT_DECLARED` if the
    /// role lacks `key` entirely, `INDICATOR_NAN` if present but still in
    /// warmup at the requested offset.
    pub fn get_feature_strict(
        &self,
        key: &str,
        role: TfRole,
        offset: usize,
    ) -> Result<f64, FeaturePipelineError> {
        let store = self
            .stores
            .get(&role)
            .ok_or_else(|| FeaturePipelineError::IndicatorNotDeclared(key.to_string()))?;
        let idx = self
            .idx_for(role)
            .and_then(|i| i.checked_sub(offset))
            .ok_or_else(|| FeaturePipelineError::IndicatorNotDeclared(key.to_string()))?;
        store.get_indicator_strict(key, idx)
    }

    /// Last-N bars pushed for `role`, oldest first (spec §4.4 "History
    /// windows"). Empty if `role` isn't configured or no history is
    /// attached to this snapshot.
    pub fn history_bars(&self, role: TfRole) -> &[Bar] {
        self.history.and_then(|h| h.get(role)).map(HistoryWindow::bars).unwrap_or(&[])
    }

    /// Last-N values of `key` pushed for `role`, oldest first.
    pub fn history_feature(&self, role: TfRole, key: &str) -> &[f64] {
        self.history
            .and_then(|h| h.get(role))
            .map(|w| w.feature(key))
            .unwrap_or(&[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Bar;
    use crate::idea_card::FeatureSpec;
    use crate::registry::{IndicatorType, InputSource, ParamValue};
    use crate::time::Timeframe;
    use std::collections::BTreeMap as Map;

    fn bar(tf: Timeframe, i: i64, close: f64) -> Bar {
        Bar::new(
            tf,
            i * tf.duration_ms(),
            close,
            close + 1.0,
            close - 1.0,
            close,
            10.0,
        )
        .unwrap()
    }

    fn sma_spec(period: i64) -> FeatureSpec {
        let mut params = Map::new();
        params.insert("period".to_string(), ParamValue::Int(period));
        FeatureSpec {
            indicator_type: IndicatorType::Sma,
            output_key: "sma".to_string(),
            params,
            input_source: InputSource::Close,
            input_indicator_key: None,
        }
    }

    #[test]
    fn forward_fills_higher_tf_between_closes() {
        let exec_bars: Vec<Bar> = (0..8).map(|i| bar(Timeframe::M15, i, 100.0)).collect();
        let htf_bars: Vec<Bar> = (0..2).map(|i| bar(Timeframe::H1, i, 200.0 + i as f64)).collect();
        let exec_store = FeedStore::build(Timeframe::M15, exec_bars, &[sma_spec(2)]).unwrap();
        let htf_store = FeedStore::build(Timeframe::H1, htf_bars, &[]).unwrap();

        let mut snap = RuntimeSnapshotView::new(&exec_store, None, Some(&htf_store), 3, 100.0);
        let exec_close = exec_store.bar(3).unwrap().ts_close;
        snap.advance_role(TfRole::HighTf, exec_close);
        assert_eq!(snap.bar(TfRole::HighTf).unwrap().close, 200.0);
        assert!(!snap.staleness(TfRole::HighTf));

        let mut snap2 = RuntimeSnapshotView::new(&exec_store, None, Some(&htf_store), 4, 100.0);
        snap2.advance_role(TfRole::HighTf, exec_store.bar(4).unwrap().ts_close);
        assert_eq!(snap2.bar(TfRole::HighTf).unwrap().close, 200.0);
    }

    #[test]
    fn strict_accessor_reports_nan_during_warmup() {
        let bars: Vec<Bar> = (0..5).map(|i| bar(Timeframe::M15, i, 100.0 + i as f64)).collect();
        let store = FeedStore::build(Timeframe::M15, bars, &[sma_spec(3)]).unwrap();
        let snap = RuntimeSnapshotView::new(&store, None, None, 0, 100.0);
        assert!(snap.get_feature_strict("sma", TfRole::Exec, 0).is_err());
        assert!(snap.get_feature("sma", TfRole::Exec, 0).is_none());
    }

    #[test]
    fn history_window_trims_to_max_len() {
        let mut window = HistoryWindow::new(3);
        let mut features = Map::new();
        for i in 0..5i64 {
            features.insert("sma".to_string(), i as f64);
            window.push(bar(Timeframe::M15, i, 100.0 + i as f64), &features);
        }
        assert_eq!(window.bars().len(), 3);
        assert_eq!(window.bars()[0].close, 102.0);
        assert_eq!(window.feature("sma"), &[2.0, 3.0, 4.0]);
        assert_eq!(window.feature("missing"), &[] as &[f64]);
    }

    #[test]
    fn snapshot_reports_empty_history_until_attached() {
        let bars: Vec<Bar> = (0..3).map(|i| bar(Timeframe::M15, i, 100.0)).collect();
        let store = FeedStore::build(Timeframe::M15, bars, &[]).unwrap();
        let snap = RuntimeSnapshotView::new(&store, None, None, 2, 100.0);
        assert!(snap.history_bars(TfRole::Exec).is_empty());

        let mut history = HistoryWindows::new(&[TfRole::Exec], 2);
        history.push(TfRole::Exec, *store.bar(1).unwrap(), &Map::new());
        history.push(TfRole::Exec, *store.bar(2).unwrap(), &Map::new());
        let snap = snap.with_history(&history);
        assert_eq!(snap.history_bars(TfRole::Exec).len(), 2);
        assert_eq!(snap.history_bars(TfRole::Exec)[1].close, 100.0);
        assert!(snap.history_bars(TfRole::MedTf).is_empty());
    }
}
