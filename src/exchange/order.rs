//! Order typestate (spec §4.5, "State machine for Order"): a
//! generic-over-phase pattern where the order's data never changes shape
//! across its lifecycle, only which phase-marker type it carries, so a
//! `FilledOrder` can't accidentally be re-submitted and a `PendingOrder`
//! can't be read as if it already had a fill price.

use serde::{Deserialize, Serialize};

use crate::domain::OrderId;

use super::types::{OrderType, Side};

pub trait OrderState: std::fmt::Debug + Clone {}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pending;
impl OrderState for Pending {}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Filled {
    pub fill_price: f64,
    pub filled_ts: i64,
}
impl OrderState for Filled {}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cancelled {
    pub cancelled_ts: i64,
}
impl OrderState for Cancelled {}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rejected {
    pub reason: String,
    pub rejected_ts: i64,
}
impl OrderState for Rejected {}

/// The order's invariant fields, identical across every phase of its life.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order<S: OrderState> {
    pub order_id: OrderId,
    pub order_type: OrderType,
    pub side: Side,
    pub size_usdt: f64,
    pub limit_price: Option<f64>,
    pub stop_price: Option<f64>,
    pub sl: Option<f64>,
    pub tp: Option<f64>,
    pub reduce_only: bool,
    pub submitted_ts: i64,
    pub state: S,
}

impl Order<Pending> {
    pub fn fill(self, fill_price: f64, filled_ts: i64) -> Order<Filled> {
        Order {
            order_id: self.order_id,
            order_type: self.order_type,
            side: self.side,
            size_usdt: self.size_usdt,
            limit_price: self.limit_price,
            stop_price: self.stop_price,
            sl: self.sl,
            tp: self.tp,
            reduce_only: self.reduce_only,
            submitted_ts: self.submitted_ts,
            state: Filled {
                fill_price,
                filled_ts,
            },
        }
    }

    pub fn cancel(self, cancelled_ts: i64) -> Order<Cancelled> {
        Order {
            order_id: self.order_id,
            order_type: self.order_type,
            side: self.side,
            size_usdt: self.size_usdt,
            limit_price: self.limit_price,
            stop_price: self.stop_price,
            sl: self.sl,
            tp: self.tp,
            reduce_only: self.reduce_only,
            submitted_ts: self.submitted_ts,
            state: Cancelled { cancelled_ts },
        }
    }

    pub fn reject(self, reason: String, rejected_ts: i64) -> Order<Rejected> {
        Order {
            order_id: self.order_id,
            order_type: self.order_type,
            side: self.side,
            size_usdt: self.size_usdt,
            limit_price: self.limit_price,
            stop_price: self.stop_price,
            sl: self.sl,
            tp: self.tp,
            reduce_only: self.reduce_only,
            submitted_ts: self.submitted_ts,
            state: Rejected {
                reason,
                rejected_ts,
            },
        }
    }

    /// Would `bar.open` already satisfy this order's trigger? MARKET always
    /// fills; LIMIT/STOP variants check against the bar's open relative to
    /// their trigger price.
    pub fn triggers_at_open(&self, open: f64) -> bool {
        match self.order_type {
            OrderType::Market => true,
            OrderType::Limit => self
                .limit_price
                .is_some_and(|lp| match self.side {
                    Side::Long => open <= lp,
                    Side::Short => open >= lp,
                }),
            OrderType::StopMarket | OrderType::StopLimit => self
                .stop_price
                .is_some_and(|sp| match self.side {
                    Side::Long => open >= sp,
                    Side::Short => open <= sp,
                }),
        }
    }

    /// Does this order's trigger hold anywhere in the bar, not just at
    /// `open` (spec §4.5 step 4, "fill at limit price when traversed during
    /// the bar")? A LIMIT/STOP_MARKET/STOP_LIMIT order whose level sits
    /// between `open` and the bar's extreme would be silently re-queued by
    /// `triggers_at_open` alone even though the market actually reached it.
    pub fn triggers_in_bar(&self, open: f64, high: f64, low: f64) -> bool {
        if self.triggers_at_open(open) {
            return true;
        }
        match self.order_type {
            OrderType::Market => true,
            OrderType::Limit => self
                .limit_price
                .is_some_and(|lp| match self.side {
                    Side::Long => low <= lp,
                    Side::Short => high >= lp,
                }),
            OrderType::StopMarket | OrderType::StopLimit => self
                .stop_price
                .is_some_and(|sp| match self.side {
                    Side::Long => high >= sp,
                    Side::Short => low <= sp,
                }),
        }
    }

    /// Fill price for an order that passed `triggers_in_bar`: `open` when
    /// the trigger already held there, otherwise the order's own limit/stop
    /// level — a traversal fill goes no further than the level it crossed.
    pub fn fill_reference_price(&self, open: f64) -> f64 {
        if self.triggers_at_open(open) {
            return match self.order_type {
                OrderType::Market | OrderType::StopMarket => open,
                OrderType::Limit | OrderType::StopLimit => self.limit_price.unwrap_or(open),
            };
        }
        match self.order_type {
            OrderType::Market => open,
            OrderType::Limit => self.limit_price.unwrap_or(open),
            OrderType::StopMarket => self.stop_price.unwrap_or(open),
            OrderType::StopLimit => self.limit_price.unwrap_or(open),
        }
    }
}

/// The storage wrapper used by `OrderBook`: which phase an order is
/// currently in, as a plain enum over the typestate-wrapped order.
#[derive(Debug, Clone)]
pub enum OrderRecord {
    Pending(Order<Pending>),
    Filled(Order<Filled>),
    Cancelled(Order<Cancelled>),
    Rejected(Order<Rejected>),
}

impl OrderRecord {
    pub fn order_id(&self) -> OrderId {
        match self {
            OrderRecord::Pending(o) => o.order_id,
            OrderRecord::Filled(o) => o.order_id,
            OrderRecord::Cancelled(o) => o.order_id,
            OrderRecord::Rejected(o) => o.order_id,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, OrderRecord::Pending(_))
    }
}

/// The order book: a capacity-bounded queue of pending orders plus their
/// terminal history for the run (spec §4.5, "OrderBook (bounded capacity,
/// default 100)").
#[derive(Debug, Clone)]
pub struct OrderBook {
    capacity: usize,
    records: Vec<OrderRecord>,
}

impl OrderBook {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            records: Vec::new(),
        }
    }

    pub fn pending_count(&self) -> usize {
        self.records.iter().filter(|r| r.is_pending()).count()
    }

    pub fn has_pending_non_reduce_only(&self, side: Side) -> bool {
        self.records.iter().any(|r| match r {
            OrderRecord::Pending(o) => !o.reduce_only && o.side == side,
            _ => false,
        })
    }

    pub fn is_full(&self) -> bool {
        self.pending_count() >= self.capacity
    }

    pub fn push(&mut self, order: Order<Pending>) {
        self.records.push(OrderRecord::Pending(order));
    }

    /// Drains every pending order out for the engine to resolve against the
    /// current bar (spec §4.5 step 4, "Fills"), leaving the book empty of
    /// pending entries until new ones are submitted.
    pub fn take_pending(&mut self) -> Vec<Order<Pending>> {
        let mut pending = Vec::new();
        let mut remaining = Vec::with_capacity(self.records.len());
        for record in self.records.drain(..) {
            match record {
                OrderRecord::Pending(o) => pending.push(o),
                other => remaining.push(other),
            }
        }
        self.records = remaining;
        pending
    }

    pub fn record_terminal(&mut self, record: OrderRecord) {
        self.records.push(record);
    }

    /// `O(n)` cancel of one pending order by id (spec §4.5, order operations
    /// contract).
    pub fn cancel_order(&mut self, order_id: OrderId, cancelled_ts: i64) -> bool {
        let Some(pos) = self.records.iter().position(|r| {
            r.order_id() == order_id && r.is_pending()
        }) else {
            return false;
        };
        let record = self.records.remove(pos);
        if let OrderRecord::Pending(o) = record {
            self.records.push(OrderRecord::Cancelled(o.cancel(cancelled_ts)));
            true
        } else {
            false
        }
    }

    /// `O(n)` cancel-all (spec §4.5, order operations contract).
    pub fn cancel_all(&mut self, cancelled_ts: i64) {
        let pending_ids: Vec<OrderId> = self
            .records
            .iter()
            .filter(|r| r.is_pending())
            .map(|r| r.order_id())
            .collect();
        for id in pending_ids {
            self.cancel_order(id, cancelled_ts);
        }
    }
}
