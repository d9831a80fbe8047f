//! The tagged union of events that flow through the [`Engine`](crate::engine::Engine)'s
//! queue: `Market -> Signal -> Order -> Fill`, in that production order (§3, §5).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::market_rule::Direction;

/// Advisory signal kind a [`Strategy`](crate::strategy::Strategy) may emit after observing a
/// [`MarketEvent`]. `Exit` closes whatever position is currently held, regardless of side.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Serialize, Deserialize)]
pub enum SignalType {
    Long,
    Short,
    Exit,
}

/// Emitted once per tick for the set of symbols that advanced at the current
/// [`DataHandler`](crate::data::handler::DataHandler) cursor index.
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
pub struct MarketEvent {
    pub datetime: DateTime<Utc>,
    pub symbols: Vec<String>,
}

/// Advisory signal sent from a [`Strategy`](crate::strategy::Strategy) to the
/// [`Portfolio`](crate::portfolio::Portfolio) for interpretation; the portfolio, not the
/// strategy, decides whether and how much to trade.
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
pub struct SignalEvent {
    pub symbol: String,
    pub datetime: DateTime<Utc>,
    pub signal_type: SignalType,
    /// Requested size before lot normalization; the portfolio treats this as raw share/contract
    /// count, matching the source's `int(signal_strength)` usage.
    pub strength: f64,
}

/// A sized, directional instruction to trade, produced by the portfolio and consumed by the
/// [`ExecutionHandler`](crate::execution::ExecutionHandler).
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
pub struct OrderEvent {
    pub symbol: String,
    pub quantity: u64,
    pub direction: Direction,
    pub datetime: DateTime<Utc>,
}

/// The settled execution of an [`OrderEvent`], carrying the price the execution handler
/// determined and the commission charged. A `rejected` fill carries no commission and is
/// ignored by the portfolio.
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
pub struct FillEvent {
    pub symbol: String,
    pub exchange: String,
    pub quantity: u64,
    pub direction: Direction,
    pub fill_price: f64,
    pub datetime: DateTime<Utc>,
    pub rejected: bool,
    pub commission: f64,
}

/// Tagged union dispatched by the [`Engine`](crate::engine::Engine)'s event queue.
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
pub enum Event {
    Market(MarketEvent),
    Signal(SignalEvent),
    Order(OrderEvent),
    Fill(FillEvent),
}

impl From<MarketEvent> for Event {
    fn from(value: MarketEvent) -> Self {
        Event::Market(value)
    }
}

impl From<SignalEvent> for Event {
    fn from(value: SignalEvent) -> Self {
        Event::Signal(value)
    }
}

impl From<OrderEvent> for Event {
    fn from(value: OrderEvent) -> Self {
        Event::Order(value)
    }
}

impl From<FillEvent> for Event {
    fn from(value: FillEvent) -> Self {
        Event::Fill(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_convert_each_concrete_event_into_the_tagged_union() {
        let market = MarketEvent {
            datetime: Utc::now(),
            symbols: vec!["AAPL".to_string()],
        };
        assert!(matches!(Event::from(market), Event::Market(_)));

        let signal = SignalEvent {
            symbol: "AAPL".to_string(),
            datetime: Utc::now(),
            signal_type: SignalType::Long,
            strength: 100.0,
        };
        assert!(matches!(Event::from(signal), Event::Signal(_)));
    }
}
