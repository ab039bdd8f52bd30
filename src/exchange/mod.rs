//! Simulated isolated-margin USDT-perpetual exchange (spec §2 C8, §4.5).
//! Owns the ledger, the order book, and at most one open position; the
//! per-bar processing pipeline in `process_bar` is fixed-order and never
//! reordered by configuration (spec §5, "Ordering guarantees").

mod ledger;
mod order;
mod position;
mod trade;
mod types;

pub use ledger::Ledger;
pub use order::{Cancelled, Filled, Order, OrderBook, OrderRecord, OrderState, Pending, Rejected};
pub use position::Position;
pub use trade::Trade;
pub use types::{ExitReason, OrderType, Side};

use serde::{Deserialize, Serialize};

use crate::domain::{FundingEvent, IdCounters, OrderId};
use crate::error::ExchangeError;

/// Exchange-level configuration resolved from a compiled `IdeaCard`'s
/// `account`/`fees`/`stops` sections (spec §6). Deterministic: no RNG-based
/// slippage — `slippage_bps` is a fixed, signed adjustment applied the same
/// way every run, since a probabilistic fill model would be incompatible
/// with the bit-reproducibility requirement of spec §8.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ExchangeConfig {
    pub initial_margin_rate: f64,
    pub maintenance_margin_rate: f64,
    pub taker_fee_rate: f64,
    pub include_est_close_fee_in_entry_gate: bool,
    pub slippage_bps: f64,
    pub order_book_capacity: usize,
    pub latch_entries_on_liquidation: bool,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            initial_margin_rate: 0.1,
            maintenance_margin_rate: 0.005,
            taker_fee_rate: 0.0006,
            include_est_close_fee_in_entry_gate: false,
            slippage_bps: 0.0,
            order_book_capacity: 100,
            latch_entries_on_liquidation: true,
        }
    }
}

/// Rejection counters the engine surfaces in the run's metrics report
/// (spec §4.5 step 9, "Counters update").
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct RejectionCounts {
    pub insufficient_margin: u32,
    pub duplicate_pending_order: u32,
    pub order_book_full: u32,
    pub entries_disabled: u32,
    pub position_already_open: u32,
}

/// What `process_bar` did this bar: closed trades (at most one entry and
/// one exit per bar under the one-position model, but TP/SL-then-reentry
/// is possible so the vector isn't capped at one), whether a liquidation
/// fired, and the funding applied.
#[derive(Debug, Clone, Default)]
pub struct StepOutcome {
    pub mark_price: f64,
    pub closed_trades: Vec<Trade>,
    pub liquidated: bool,
    pub funding_pnl_usdt: f64,
    pub funding_events_applied: usize,
    pub fills: usize,
}

pub struct SimulatedExchange {
    config: ExchangeConfig,
    ledger: Ledger,
    position: Option<Position>,
    order_book: OrderBook,
    ids: IdCounters,
    entries_disabled: bool,
    last_rejection: Option<ExchangeError>,
    rejection_counts: RejectionCounts,
    total_fills: u32,
}

impl SimulatedExchange {
    pub fn new(config: ExchangeConfig, initial_equity_usdt: f64) -> Self {
        Self {
            order_book: OrderBook::new(config.order_book_capacity),
            config,
            ledger: Ledger::new(initial_equity_usdt),
            position: None,
            ids: IdCounters::new(),
            entries_disabled: false,
            last_rejection: None,
            rejection_counts: RejectionCounts::default(),
            total_fills: 0,
        }
    }

    pub fn ledger(&self) -> Ledger {
        self.ledger
    }

    pub fn position(&self) -> Option<&Position> {
        self.position.as_ref()
    }

    pub fn entries_disabled(&self) -> bool {
        self.entries_disabled
    }

    pub fn last_rejection(&self) -> Option<&ExchangeError> {
        self.last_rejection.as_ref()
    }

    pub fn rejection_counts(&self) -> RejectionCounts {
        self.rejection_counts
    }

    pub fn total_fills(&self) -> u32 {
        self.total_fills
    }

    pub fn maintenance_margin_rate(&self) -> f64 {
        self.config.maintenance_margin_rate
    }

    /// Validates guard conditions and enqueues a pending order (spec §4.5,
    /// "Order operations contract"). Returns `None` on guard failure with
    /// `last_rejection` set; the caller never learns the would-be
    /// `order_id` in that case since none was allocated.
    #[allow(clippy::too_many_arguments)]
    pub fn submit_order(
        &mut self,
        order_type: OrderType,
        side: Side,
        size_usdt: f64,
        limit_price: Option<f64>,
        stop_price: Option<f64>,
        sl: Option<f64>,
        tp: Option<f64>,
        reduce_only: bool,
        ts: i64,
    ) -> Option<OrderId> {
        if !reduce_only && self.entries_disabled {
            self.reject(ExchangeError::EntriesDisabled);
            self.rejection_counts.entries_disabled += 1;
            return None;
        }
        if !reduce_only && self.position.is_some() {
            self.rejection_counts.position_already_open += 1;
            return None;
        }
        if !reduce_only && self.order_book.has_pending_non_reduce_only(side) {
            self.reject(ExchangeError::DuplicatePendingOrder);
            self.rejection_counts.duplicate_pending_order += 1;
            return None;
        }
        if self.order_book.is_full() {
            self.reject(ExchangeError::OrderBookFull {
                capacity: self.config.order_book_capacity,
            });
            self.rejection_counts.order_book_full += 1;
            return None;
        }

        let order_id = self.ids.next_order_id();
        self.order_book.push(Order {
            order_id,
            order_type,
            side,
            size_usdt,
            limit_price,
            stop_price,
            sl,
            tp,
            reduce_only,
            submitted_ts: ts,
            state: Pending,
        });
        Some(order_id)
    }

    pub fn cancel_order(&mut self, order_id: OrderId, ts: i64) -> bool {
        self.order_book.cancel_order(order_id, ts)
    }

    pub fn cancel_all(&mut self, ts: i64) {
        self.order_book.cancel_all(ts);
    }

    /// Unconditionally exits the current position (spec §4.5, "Order
    /// operations contract"). Used by the engine at end-of-data and on
    /// stop-condition triggers.
    pub fn force_close(
        &mut self,
        price: f64,
        ts: i64,
        bar_index: usize,
        reason: ExitReason,
    ) -> Option<Trade> {
        let position = self.position.take()?;
        let trade = self.close_position(position, price, ts, bar_index, reason);
        self.ledger.mark_to_market(0.0, 0.0);
        Some(trade)
    }

    fn close_position(
        &mut self,
        position: Position,
        exit_price: f64,
        exit_ts: i64,
        exit_bar_idx: usize,
        reason: ExitReason,
    ) -> Trade {
        let exit_fee = exit_price * position.size_units * self.config.taker_fee_rate;
        let trade_id = self.ids.next_trade_id();
        let trade = position.close(trade_id, exit_price, exit_ts, exit_bar_idx, reason, exit_fee);
        self.ledger.apply_cash_delta(trade.gross_pnl - exit_fee);
        trade
    }

    fn reject(&mut self, err: ExchangeError) {
        self.last_rejection = Some(err);
    }

    /// The fixed nine-step per-bar pipeline of spec §4.5. `prev_bar` is part
    /// of the contract (funding-window derivation happens in the engine,
    /// which passes only the events already filtered to this bar) and is
    /// accepted here for interface parity even though this mark-source
    /// model (`close`-only) doesn't need it directly.
    pub fn process_bar(
        &mut self,
        bar: &crate::domain::Bar,
        _prev_bar: Option<&crate::domain::Bar>,
        bar_index: usize,
        funding_events: &[FundingEvent],
    ) -> StepOutcome {
        let mut closed_trades = Vec::new();
        let mut fills = 0usize;

        // 1. Prices — mark_source is locked to close (spec §4.5 step 1).
        let mark_price = bar.close;

        // 2. Funding.
        let mut funding_pnl = 0.0;
        if let Some(position) = &self.position {
            for event in funding_events {
                funding_pnl += -position.side.sign() * event.rate * position.notional_entry;
            }
            if funding_pnl != 0.0 {
                self.ledger.apply_cash_delta(funding_pnl);
            }
        }

        // 3. Intrabar TP/SL, SL-first tie-break (spec §4.5 step 3).
        if let Some(position) = &mut self.position {
            position.track_excursion(bar.high, bar.low);
        }
        if let Some(position) = &self.position {
            let sl_hit = position.sl.is_some_and(|sl| match position.side {
                Side::Long => bar.low <= sl,
                Side::Short => bar.high >= sl,
            });
            let tp_hit = position.tp.is_some_and(|tp| match position.side {
                Side::Long => bar.high >= tp,
                Side::Short => bar.low <= tp,
            });
            if sl_hit || tp_hit {
                let (exit_price, reason) = if sl_hit {
                    (position.sl.expect("checked above"), ExitReason::Sl)
                } else {
                    (position.tp.expect("checked above"), ExitReason::Tp)
                };
                let position = self.position.take().expect("matched Some above");
                let trade = self.close_position(position, exit_price, bar.ts_close, bar_index, reason);
                closed_trades.push(trade);
            }
        }

        // 4-6. Fills, entry gate, duplicate/guard checks.
        let pending = self.order_book.take_pending();
        for order in pending {
            if !order.triggers_in_bar(bar.open, bar.high, bar.low) {
                self.order_book.push(order);
                continue;
            }

            let raw_price = order.fill_reference_price(bar.open);
            let fill_price = raw_price * (1.0 + order.side.sign() * self.config.slippage_bps / 10_000.0);

            if order.reduce_only {
                fills += 1;
                if let Some(position) = self.position.take() {
                    let trade = self.close_position(position, fill_price, bar.ts_close, bar_index, ExitReason::Signal);
                    closed_trades.push(trade);
                    self.order_book
                        .record_terminal(OrderRecord::Filled(order.fill(fill_price, bar.ts_open)));
                } else {
                    self.order_book.record_terminal(OrderRecord::Rejected(
                        order.reject("no position to reduce".to_string(), bar.ts_open),
                    ));
                }
                continue;
            }

            if self.position.is_some() {
                self.rejection_counts.position_already_open += 1;
                self.order_book.record_terminal(OrderRecord::Rejected(
                    order.reject("position already open".to_string(), bar.ts_open),
                ));
                continue;
            }
            if self.entries_disabled {
                self.reject(ExchangeError::EntriesDisabled);
                self.rejection_counts.entries_disabled += 1;
                self.order_book.record_terminal(OrderRecord::Rejected(
                    order.reject("entries disabled".to_string(), bar.ts_open),
                ));
                continue;
            }

            let size_units = order.size_usdt / fill_price;
            let notional = fill_price * size_units;
            let position_im = notional * self.config.initial_margin_rate;
            let est_open_fee = notional * self.config.taker_fee_rate;
            let est_close_fee = if self.config.include_est_close_fee_in_entry_gate {
                notional * self.config.taker_fee_rate
            } else {
                0.0
            };
            let required = position_im + est_open_fee + est_close_fee;

            if self.ledger.available_balance_usdt < required {
                self.reject(ExchangeError::InsufficientMargin {
                    required_usdt: required,
                    available_usdt: self.ledger.available_balance_usdt,
                });
                self.rejection_counts.insufficient_margin += 1;
                self.order_book.record_terminal(OrderRecord::Rejected(
                    order.reject("insufficient margin".to_string(), bar.ts_open),
                ));
                continue;
            }

            fills += 1;
            self.total_fills += 1;
            self.ledger.apply_cash_delta(-est_open_fee);
            let position_id = self.ids.next_position_id();
            self.position = Some(Position::open(
                position_id,
                order.side,
                fill_price,
                size_units,
                est_open_fee,
                order.sl,
                order.tp,
                bar.ts_open,
                bar_index,
            ));
            self.order_book
                .record_terminal(OrderRecord::Filled(order.fill(fill_price, bar.ts_open)));
        }

        // 7. Mark-to-market.
        let (unrealized, used) = match &self.position {
            Some(position) => (
                position.unrealized_pnl(mark_price),
                position.used_margin(self.config.initial_margin_rate),
            ),
            None => (0.0, 0.0),
        };
        self.ledger.mark_to_market(unrealized, used);

        // 8. Liquidation check.
        let mut liquidated = false;
        if let Some(position) = &self.position {
            let maintenance_margin = position.notional_entry * self.config.maintenance_margin_rate;
            if self.ledger.equity_usdt <= maintenance_margin {
                let position = self.position.take().expect("matched Some above");
                let trade = self.close_position(position, mark_price, bar.ts_close, bar_index, ExitReason::Liquidation);
                closed_trades.push(trade);
                liquidated = true;
                self.reject(ExchangeError::Liquidation {
                    price: mark_price,
                    bar_index,
                });
                if self.config.latch_entries_on_liquidation {
                    self.entries_disabled = true;
                }
                self.ledger.mark_to_market(0.0, 0.0);
            }
        }

        // 9. Counters update happens incrementally above as events occur.

        StepOutcome {
            mark_price,
            closed_trades,
            liquidated,
            funding_pnl_usdt: funding_pnl,
            funding_events_applied: funding_events.len(),
            fills,
        }
    }
}
