//! Weighted-average-cost position ledger (C6): turns advisory [`SignalEvent`]s into sized,
//! margin-checked [`OrderEvent`]s, folds [`FillEvent`]s into per-symbol [`Holding`]s (cash,
//! margin, T+N availability, realized P&L), and marks open positions to market each tick.
//! Grounded in `portfolio.py`'s `process_signal_event`/`process_fill_event` pair, generalized
//! from its four hand-written `if`/`elif` fill cases into the open/add/reduce/flip split
//! documented below.

pub mod error;

use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, Utc};
pub use error::PortfolioError;

use crate::data::handler::DataHandler;
use crate::event::{FillEvent, OrderEvent, SignalEvent, SignalType};
use crate::instrument::InstrumentRegistry;
use crate::market_rule::{Direction, MarketRuleOps};

/// A pending T+N settlement leg: `quantity` shares/contracts (signed, same sign as the position
/// direction) become sellable/coverable on `settle_date`.
#[derive(Clone, Copy, PartialEq, Debug)]
pub struct PendingSettlement {
    pub quantity: i64,
    pub settle_date: NaiveDate,
}

/// Weighted-average-cost position in one symbol. `quantity` is signed: positive is long,
/// negative is short, zero is flat. `available` carries the same sign and satisfies
/// `0 <= |available| <= |quantity|`; the gap is shares/contracts still awaiting settlement.
/// `last_settle_price` tracks the price a futures position was last marked to for daily
/// settlement (§4.6); it is `None` for cash equities and for futures that have never been
/// marked yet.
#[derive(Clone, Copy, PartialEq, Debug, Default)]
pub struct Holding {
    pub quantity: i64,
    pub avg_cost: f64,
    pub available: i64,
    pub realized_pnl: f64,
    pub last_settle_price: Option<f64>,
}

impl Holding {
    fn is_flat(&self) -> bool {
        self.quantity == 0
    }
}

/// One symbol's contribution to a [`HoldingSnapshot`] (§3 "per-symbol market_value and
/// unrealized_pnl").
#[derive(Clone, Copy, PartialEq, Debug)]
pub struct PositionSnapshot {
    pub quantity: i64,
    pub market_value: f64,
    pub unrealized_pnl: f64,
}

/// Portfolio state captured at one [`crate::event::MarketEvent`] boundary (§3), sufficient on its
/// own to reconstruct an equity curve: `total` is cash plus every open position's market value.
#[derive(Clone, PartialEq, Debug)]
pub struct HoldingSnapshot {
    pub time: DateTime<Utc>,
    pub cash: f64,
    pub total: f64,
    pub positions: HashMap<String, PositionSnapshot>,
}

/// Cash ledger plus per-symbol [`Holding`]s, their in-flight [`PendingSettlement`]s and the
/// margin currently posted against each open position (C6).
#[derive(Clone, Debug)]
pub struct Portfolio {
    cash: f64,
    holdings: HashMap<String, Holding>,
    pending: HashMap<String, Vec<PendingSettlement>>,
    margin_used: HashMap<String, f64>,
    snapshots: Vec<HoldingSnapshot>,
}

impl Portfolio {
    pub fn new(initial_cash: f64) -> Self {
        Self {
            cash: initial_cash,
            holdings: HashMap::new(),
            pending: HashMap::new(),
            margin_used: HashMap::new(),
            snapshots: Vec::new(),
        }
    }

    pub fn cash(&self) -> f64 {
        self.cash
    }

    pub fn get_holding(&self, symbol: &str) -> Option<&Holding> {
        self.holdings.get(symbol)
    }

    pub fn margin_used(&self, symbol: &str) -> f64 {
        self.margin_used.get(symbol).copied().unwrap_or(0.0)
    }

    /// The sequence of [`HoldingSnapshot`]s recorded by [`Self::update_timeindex`] so far, in
    /// tick order; sufficient to reconstruct the equity curve (§6 "Outputs").
    pub fn snapshots(&self) -> &[HoldingSnapshot] {
        &self.snapshots
    }

    /// `process_signal_event` (§4.6): interprets an advisory signal as a sized, directional,
    /// margin-and-availability-checked order. `Long`/`Short` open or add to a position of
    /// `strength` shares; `Exit` fully closes whatever position is currently held and is a no-op
    /// when flat. Requires `data` (for the latest close, to price the margin check) and
    /// `registry` (for the symbol's instrument, to price the margin check and read its contract
    /// multiplier).
    pub fn process_signal_event(
        &self,
        signal: &SignalEvent,
        data: &DataHandler,
        registry: &InstrumentRegistry,
    ) -> Result<Option<OrderEvent>, PortfolioError> {
        let direction = match signal.signal_type {
            SignalType::Long => Direction::Buy,
            SignalType::Short => Direction::Sell,
            SignalType::Exit => {
                let Some(holding) = self.holdings.get(&signal.symbol) else {
                    return Ok(None);
                };
                if holding.is_flat() {
                    return Ok(None);
                }
                if holding.quantity > 0 {
                    Direction::Sell
                } else {
                    Direction::Buy
                }
            }
        };

        let instrument = registry.get(&signal.symbol)?;
        let rule = instrument.market_rule().ops();

        let raw_quantity = match signal.signal_type {
            SignalType::Exit => self.holdings[&signal.symbol].quantity.unsigned_abs(),
            _ => signal.strength as u64,
        };

        let quantity = rule.normalize_quantity(raw_quantity);
        if quantity == 0 {
            return Ok(None);
        }

        let existing = self.holdings.get(&signal.symbol).copied().unwrap_or_default();

        // Availability guard (§8 "Availability"): the portion of the order that closes the
        // existing position (opposite direction to its current sign) may not exceed settled,
        // available size. A flip's excess over that closing leg is a fresh open and only needs
        // margin, not settlement, so it's excluded here (the Flip law decomposes it the same way:
        // reduce by exactly the existing size, then open the remainder).
        if is_reducing(existing.quantity, direction) {
            let closing_qty = quantity.min(existing.quantity.unsigned_abs());
            if closing_qty > existing.available.unsigned_abs() {
                return Ok(None);
            }
        }

        // Margin guard (§4.6 "Compute required margin at the latest close"): only applies to
        // opening/adding exposure, not to a reduction/exit that frees margin rather than using it.
        if !is_reducing(existing.quantity, direction) {
            let Some(close) = data.latest(&signal.symbol).and_then(|bar| bar.close()) else {
                return Ok(None);
            };
            let required_margin = rule.calculate_margin(quantity, close, instrument.contract_multiplier(), instrument.margin_rate());
            if required_margin > self.cash {
                return Ok(None);
            }
        }

        Ok(Some(OrderEvent {
            symbol: signal.symbol.clone(),
            quantity,
            direction,
            datetime: signal.datetime,
        }))
    }

    /// `process_fill_event` (§4.6): folds a settled trade into its symbol's [`Holding`], always
    /// debiting cash by the trade's commission, then dispatching to the open/add/reduce/flip case
    /// that matches the position's sign transition, which also drives the matching margin
    /// debit/release. A `rejected` fill is a no-op. `today` schedules the resulting
    /// [`PendingSettlement`] at `settlement_days` out.
    pub fn process_fill_event(&mut self, fill: &FillEvent, registry: &InstrumentRegistry, today: NaiveDate) -> Result<(), PortfolioError> {
        if fill.rejected {
            return Ok(());
        }

        let instrument = registry.get(&fill.symbol)?;
        let rule = instrument.market_rule().ops();
        let multiplier = instrument.contract_multiplier();
        let settlement_days = rule.settlement_days();

        self.cash -= fill.commission;

        let signed_qty = fill.quantity as i64 * fill.direction.sign() as i64;
        let commission_per_share = fill.commission / fill.quantity as f64;
        let settle_date = add_days(today, settlement_days);
        let margin_used_before = self.margin_used(&fill.symbol);

        let holding = self.holdings.entry(fill.symbol.clone()).or_default();

        // Tracks the signed quantity (if any) newly opened by this fill, so a `PendingSettlement`
        // is only scheduled for shares/contracts actually acquired, not ones given up.
        let mut newly_opened: Option<i64> = None;
        let mut margin_delta = 0.0;

        if holding.is_flat() {
            // OPEN: commission folds into the cost basis; margin is posted fresh.
            holding.quantity = signed_qty;
            holding.avg_cost = fill.fill_price + commission_per_share;
            holding.available = 0;
            holding.last_settle_price = Some(fill.fill_price);
            newly_opened = Some(signed_qty);
            margin_delta = rule.calculate_margin(fill.quantity, fill.fill_price, multiplier, instrument.margin_rate());
        } else if same_sign(holding.quantity, signed_qty) {
            // ADD: weighted-average the existing and incoming (commission-inclusive) cost bases;
            // margin for the added leg is posted on top of what's already held.
            let old_abs = holding.quantity.unsigned_abs() as f64;
            let add_abs = signed_qty.unsigned_abs() as f64;
            let incoming_cost = fill.fill_price + commission_per_share;
            holding.avg_cost = (holding.avg_cost * old_abs + incoming_cost * add_abs) / (old_abs + add_abs);
            holding.quantity += signed_qty;
            holding.last_settle_price = Some(fill.fill_price);
            newly_opened = Some(signed_qty);
            margin_delta = rule.calculate_margin(fill.quantity, fill.fill_price, multiplier, instrument.margin_rate());
        } else {
            let existing_abs = holding.quantity.unsigned_abs();
            let trade_abs = signed_qty.unsigned_abs();
            let closing_sign = holding.quantity.signum() as f64;

            if trade_abs <= existing_abs {
                // REDUCE: commission comes straight off realized P&L rather than the cost basis,
                // since there's no remaining position leg left for it to inflate. Margin is
                // released in proportion to the fraction of the position being closed.
                let realized = (fill.fill_price - holding.avg_cost) * closing_sign * trade_abs as f64 * multiplier - fill.commission;
                holding.realized_pnl += realized;
                holding.quantity += signed_qty;
                holding.available = shrink_toward_zero(holding.available, trade_abs);
                let release_ratio = trade_abs as f64 / existing_abs as f64;
                margin_delta = -(margin_used_before * release_ratio);
                if holding.is_flat() {
                    holding.avg_cost = 0.0;
                    holding.available = 0;
                    holding.last_settle_price = None;
                }
            } else {
                // FLIP: the whole existing position closes (releasing all its margin and
                // realizing P&L net of the full commission), then a fresh position opens in the
                // other direction at `fill_price` with freshly posted margin.
                let realized = (fill.fill_price - holding.avg_cost) * closing_sign * existing_abs as f64 * multiplier - fill.commission;
                holding.realized_pnl += realized;
                let new_qty = holding.quantity + signed_qty;
                holding.quantity = new_qty;
                holding.avg_cost = fill.fill_price;
                holding.available = 0;
                holding.last_settle_price = Some(fill.fill_price);
                newly_opened = Some(new_qty);
                let new_margin = rule.calculate_margin(new_qty.unsigned_abs(), fill.fill_price, multiplier, instrument.margin_rate());
                margin_delta = new_margin - margin_used_before;
            }
        }

        let new_margin_used = (margin_used_before + margin_delta).max(0.0);
        self.cash -= margin_delta;
        if new_margin_used <= f64::EPSILON {
            self.margin_used.remove(&fill.symbol);
        } else {
            self.margin_used.insert(fill.symbol.clone(), new_margin_used);
        }

        if let Some(opened_qty) = newly_opened {
            if settlement_days == 0 {
                // T+0 markets (§3 "available == quantity for T+0 markets after every fill"):
                // settle immediately rather than waiting for a same-day `settle_pending` call.
                if let Some(holding) = self.holdings.get_mut(&fill.symbol) {
                    holding.available += opened_qty;
                }
            } else {
                self.pending.entry(fill.symbol.clone()).or_default().push(PendingSettlement {
                    quantity: opened_qty,
                    settle_date,
                });
            }
        }

        Ok(())
    }

    /// Matures any [`PendingSettlement`] whose `settle_date` has arrived, folding its quantity
    /// into the holding's `available` count.
    pub fn settle_pending(&mut self, today: NaiveDate) {
        for (symbol, entries) in self.pending.iter_mut() {
            let (matured, still_pending): (Vec<_>, Vec<_>) =
                entries.drain(..).partition(|entry| entry.settle_date <= today);
            *entries = still_pending;

            if let Some(holding) = self.holdings.get_mut(symbol) {
                for entry in matured {
                    holding.available += entry.quantity;
                }
            }
        }
    }

    /// `update_timeindex` (§4.6): matures any settlements due by `today`, then marks every
    /// non-flat holding to `data`'s current close. Futures (`registry`-resolved
    /// [`Instrument::is_future`](crate::instrument::Instrument::is_future)) are additionally
    /// marked-to-market daily, realizing the move since `last_settle_price` straight into cash.
    /// Returns and records the resulting [`HoldingSnapshot`]; symbols absent from the tick keep
    /// their last-known valuation untouched.
    pub fn update_timeindex(
        &mut self,
        data: &DataHandler,
        registry: &InstrumentRegistry,
        time: DateTime<Utc>,
        today: NaiveDate,
    ) -> Result<HoldingSnapshot, PortfolioError> {
        self.settle_pending(today);

        let mut positions = HashMap::new();
        let mut total = self.cash;

        let symbols: Vec<String> = self.holdings.keys().cloned().collect();
        for symbol in symbols {
            let is_flat = self.holdings[&symbol].is_flat();
            if is_flat {
                continue;
            }
            let Some(close) = data.latest(&symbol).and_then(|bar| bar.close()) else {
                continue;
            };
            let instrument = registry.get(&symbol)?;
            let multiplier = instrument.contract_multiplier();

            let holding = self.holdings.get_mut(&symbol).expect("symbol came from holdings.keys()");

            let baseline = if instrument.is_future() {
                let settle_base = holding.last_settle_price.unwrap_or(holding.avg_cost);
                let mtm = (close - settle_base) * holding.quantity as f64 * multiplier;
                self.cash += mtm;
                total += mtm;
                holding.last_settle_price = Some(close);
                close
            } else {
                holding.avg_cost
            };

            let market_value = holding.quantity as f64 * close * multiplier;
            let unrealized_pnl = (close - baseline) * holding.quantity as f64 * multiplier;
            total += market_value;

            positions.insert(
                symbol,
                PositionSnapshot {
                    quantity: holding.quantity,
                    market_value,
                    unrealized_pnl,
                },
            );
        }

        let snapshot = HoldingSnapshot {
            time,
            cash: self.cash,
            total,
            positions,
        };
        self.snapshots.push(snapshot.clone());
        Ok(snapshot)
    }
}

fn same_sign(a: i64, b: i64) -> bool {
    a.signum() == b.signum()
}

/// True when trading `direction` would shrink `existing_qty` toward zero (a SELL against a long
/// position, or a BUY against a short one). Flat positions are never "reducing".
fn is_reducing(existing_qty: i64, direction: Direction) -> bool {
    if existing_qty == 0 {
        return false;
    }
    let direction_sign: i64 = match direction {
        Direction::Buy => 1,
        Direction::Sell => -1,
    };
    existing_qty.signum() != direction_sign
}

fn shrink_toward_zero(available: i64, by: u64) -> i64 {
    let sign = available.signum();
    let remaining = available.unsigned_abs().saturating_sub(by);
    sign * remaining as i64
}

fn add_days(date: NaiveDate, days: u32) -> NaiveDate {
    date + chrono::Duration::days(days as i64)
}
