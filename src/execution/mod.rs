//! Simulated order execution (C5): holds [`OrderEvent`]s until the next bar becomes visible (or,
//! in same-bar mode, matches them immediately), then turns each into a [`FillEvent`] by
//! validating, price-limiting, slipping, normalizing and costing it against that bar, mirroring
//! `ExecutionHandler._execute_order`'s seven steps.

pub mod error;

use std::collections::VecDeque;

pub use error::ExecutionError;

use crate::data::handler::DataHandler;
use crate::event::{FillEvent, OrderEvent};
use crate::instrument::InstrumentRegistry;
use crate::market_rule::{Direction, MarketRuleOps, SlippageContext};
use crate::portfolio::Portfolio;

/// Matches queued [`OrderEvent`]s against the next available bar for their symbol, applying the
/// [`MarketRule`](crate::market_rule::MarketRule) registered for that symbol's instrument to
/// decide whether the order is valid and what it costs to fill.
#[derive(Debug)]
pub struct ExecutionHandler {
    pending: VecDeque<OrderEvent>,
    /// `true` (the default, no-look-ahead) mode queues orders for the next tick's bar; `false`
    /// matches them against the bar that produced the signal that generated them.
    fill_on_next_bar: bool,
    /// Probability, in `[0, 1]`, that an order is rejected before validation regardless of rule
    /// outcome. Disabled (`0.0`) by default (§4.5).
    rejection_rate: f64,
}

impl ExecutionHandler {
    pub fn new() -> Self {
        Self {
            pending: VecDeque::new(),
            fill_on_next_bar: true,
            rejection_rate: 0.0,
        }
    }

    pub fn with_fill_on_next_bar(mut self, fill_on_next_bar: bool) -> Self {
        self.fill_on_next_bar = fill_on_next_bar;
        self
    }

    pub fn with_rejection_rate(mut self, rejection_rate: f64) -> Self {
        self.rejection_rate = rejection_rate;
        self
    }

    pub fn fill_on_next_bar(&self) -> bool {
        self.fill_on_next_bar
    }

    pub fn has_pending_orders(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Handles a freshly-generated [`OrderEvent`] (§4.5 "On Order"): queues it if running in
    /// next-bar mode, or matches it immediately against the current tick and returns its
    /// [`FillEvent`] (if the symbol has a visible bar to match against).
    pub fn handle_order(
        &mut self,
        order: OrderEvent,
        data: &DataHandler,
        registry: &InstrumentRegistry,
        portfolio: &Portfolio,
    ) -> Result<Option<FillEvent>, ExecutionError> {
        if self.fill_on_next_bar {
            self.pending.push_back(order);
            Ok(None)
        } else {
            Ok(self.try_match(order, data, registry, portfolio)?.0)
        }
    }

    /// Attempts to fill every pending order against `data`'s current tick, in enqueue order
    /// (§4.5 "drain the queue ... in enqueue order"). Orders whose symbol has no bar yet (or an
    /// invalidated one) stay queued for a later tick, in their original relative order.
    pub fn process_pending_orders(
        &mut self,
        data: &DataHandler,
        registry: &InstrumentRegistry,
        portfolio: &Portfolio,
    ) -> Result<Vec<FillEvent>, ExecutionError> {
        let mut fills = Vec::with_capacity(self.pending.len());
        let mut still_pending = VecDeque::new();

        while let Some(order) = self.pending.pop_front() {
            match self.try_match(order, data, registry, portfolio)? {
                (Some(fill), _) => fills.push(fill),
                (None, Some(order)) => still_pending.push_back(order),
                (None, None) => unreachable!("try_match always returns the order back when it produces no fill"),
            }
        }

        self.pending = still_pending;
        Ok(fills)
    }

    /// Returns `(Some(fill), None)` on a match, `(None, Some(order))` when the symbol has no
    /// visible bar yet (the order is handed back so the caller can requeue it).
    fn try_match(
        &self,
        order: OrderEvent,
        data: &DataHandler,
        registry: &InstrumentRegistry,
        portfolio: &Portfolio,
    ) -> Result<(Option<FillEvent>, Option<OrderEvent>), ExecutionError> {
        match data.latest(&order.symbol).filter(|bar| bar.ohlcv.is_some()) {
            Some(bar) => {
                let instrument = registry.get(&order.symbol)?;
                let previous_close = data.latest_n(&order.symbol, 2).first().and_then(|b| b.close());
                let rejected_by_chance = self.rejection_rate > 0.0 && rand::random::<f64>() < self.rejection_rate;
                let current_position = portfolio.get_holding(&order.symbol).map(|h| h.quantity).unwrap_or(0);
                Ok((
                    Some(execute_order(
                        order,
                        bar,
                        previous_close,
                        instrument.market_rule().ops(),
                        rejected_by_chance,
                        current_position,
                    )),
                    None,
                ))
            }
            None => Ok((None, Some(order))),
        }
    }
}

impl Default for ExecutionHandler {
    fn default() -> Self {
        Self::new()
    }
}

/// The §4.5 seven-step `_execute_order`: normalize quantity, validate, price-limit, slip,
/// normalize price, cost, build the fill. A rejection short-circuits after validation with a
/// zero-commission, zero-price fill so the portfolio can observe it without touching holdings.
fn execute_order(
    order: OrderEvent,
    bar: &crate::bar::Bar,
    previous_close: Option<f64>,
    rule: &dyn MarketRuleOps,
    rejected_by_chance: bool,
    current_position: i64,
) -> FillEvent {
    let exchange = rule.market_name();
    let rejected = |reason: &str| {
        tracing::warn!(symbol = %order.symbol, reason, "order rejected");
        FillEvent {
            symbol: order.symbol.clone(),
            exchange: exchange.to_string(),
            quantity: order.quantity,
            direction: order.direction,
            fill_price: 0.0,
            datetime: bar.timestamp,
            rejected: true,
            commission: 0.0,
        }
    };

    if rejected_by_chance {
        return rejected("randomly rejected per configured rejection_rate");
    }

    let quantity = rule.normalize_quantity(order.quantity);
    if quantity == 0 {
        return rejected("quantity normalizes to zero lots");
    }

    if let Err(reason) = rule.validate_order(&order.symbol, quantity, order.direction, bar.timestamp, current_position) {
        return rejected(&reason);
    }

    let open = bar.open().or_else(|| bar.close()).expect("bar filtered for Some(ohlcv) above");
    let high = bar.high().expect("bar filtered for Some(ohlcv) above");
    let low = bar.low().expect("bar filtered for Some(ohlcv) above");
    let volume = bar.volume().expect("bar filtered for Some(ohlcv) above");

    let limited = rule.normalize_price(rule.apply_price_limit(&order.symbol, open, previous_close.unwrap_or(open), order.direction));

    let slipped = rule.calculate_slippage(SlippageContext {
        quantity: quantity as f64,
        price: limited,
        direction: order.direction,
        bar_volume: volume,
        bar_high: high,
        bar_low: low,
    });

    let final_price = rule.normalize_price(slipped);
    let commission = rule.calculate_commission(quantity, final_price, order.direction);

    tracing::debug!(symbol = %order.symbol, %exchange, quantity, price = final_price, commission, "order filled");

    FillEvent {
        symbol: order.symbol,
        exchange: exchange.to_string(),
        quantity,
        direction: order.direction,
        fill_price: final_price,
        datetime: bar.timestamp,
        rejected: false,
        commission,
    }
}
