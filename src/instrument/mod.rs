//! Tradable instruments and the registry that maps a ticker symbol to its static contract
//! metadata. Closed `Stock`/`Future` sum type rather than an open class hierarchy, matching the
//! project's general preference for enums over inheritance (see DESIGN.md's Open Question notes).

pub mod error;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

pub use error::InstrumentError;

use crate::market_rule::MarketRule;

/// Cash equity: no leverage, no contract multiplier, no expiry. Carries the [`MarketRule`] its
/// orders are validated and costed against, matching §3's "Instrument variants: Stock { symbol,
/// market_rule, currency }".
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
pub struct Stock {
    pub symbol: String,
    pub currency: String,
    pub market_rule: MarketRule,
}

/// Futures contract: carries a margin rate and a notional multiplier on top of the same
/// [`MarketRule`]/currency shape as [`Stock`], and expires.
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
pub struct Future {
    pub symbol: String,
    pub currency: String,
    pub market_rule: MarketRule,
    pub contract_multiplier: f64,
    pub margin_rate: f64,
    pub expiry: chrono::DateTime<chrono::Utc>,
}

/// A tradable instrument. Dispatch on variant rather than a trait object since the set of
/// instrument kinds is closed and each carries a distinct shape of static data.
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
pub enum Instrument {
    Stock(Stock),
    Future(Future),
}

impl Instrument {
    pub fn symbol(&self) -> &str {
        match self {
            Instrument::Stock(s) => &s.symbol,
            Instrument::Future(f) => &f.symbol,
        }
    }

    pub fn currency(&self) -> &str {
        match self {
            Instrument::Stock(s) => &s.currency,
            Instrument::Future(f) => &f.currency,
        }
    }

    /// The [`MarketRule`] this instrument's orders are validated, priced and costed against.
    pub fn market_rule(&self) -> &MarketRule {
        match self {
            Instrument::Stock(s) => &s.market_rule,
            Instrument::Future(f) => &f.market_rule,
        }
    }

    /// Notional multiplier applied on top of `quantity * price` when sizing margin. `1.0` for
    /// cash equities, contract-specific for futures.
    pub fn contract_multiplier(&self) -> f64 {
        match self {
            Instrument::Stock(_) => 1.0,
            Instrument::Future(f) => f.contract_multiplier,
        }
    }

    pub fn margin_rate(&self) -> f64 {
        match self {
            Instrument::Stock(_) => 1.0,
            Instrument::Future(f) => f.margin_rate,
        }
    }

    pub fn expiry(&self) -> Option<chrono::DateTime<chrono::Utc>> {
        match self {
            Instrument::Stock(_) => None,
            Instrument::Future(f) => Some(f.expiry),
        }
    }

    pub fn is_future(&self) -> bool {
        matches!(self, Instrument::Future(_))
    }
}

/// Insertion-only lookup from ticker symbol to [`Instrument`], populated once at configuration
/// time and read by every component that needs to resolve a symbol's static contract metadata.
/// Backed by an [`IndexMap`] rather than a `HashMap` so the [`Engine`](crate::engine::Engine)'s
/// expiration sweep can enumerate instruments in a deterministic, insertion order (§4.4).
#[derive(Clone, Default, Debug)]
pub struct InstrumentRegistry {
    instruments: IndexMap<String, Instrument>,
}

impl InstrumentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `instrument`, replacing any prior registration under the same symbol.
    pub fn register(&mut self, instrument: Instrument) {
        self.instruments.insert(instrument.symbol().to_string(), instrument);
    }

    pub fn get(&self, symbol: &str) -> Result<&Instrument, InstrumentError> {
        self.instruments
            .get(symbol)
            .ok_or_else(|| InstrumentError::UnknownSymbol(symbol.to_string()))
    }

    pub fn contains(&self, symbol: &str) -> bool {
        self.instruments.contains_key(symbol)
    }

    pub fn len(&self) -> usize {
        self.instruments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instruments.is_empty()
    }

    /// Iterates every registered instrument in insertion order, used by the engine's expiration
    /// sweep to find futures whose `expiry` has passed the current tick.
    pub fn iter(&self) -> impl Iterator<Item = &Instrument> {
        self.instruments.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market_rule::{ChinaARule, MarketRule};
    use chrono::Utc;

    fn stock(symbol: &str) -> Instrument {
        Instrument::Stock(Stock {
            symbol: symbol.to_string(),
            currency: "CNY".to_string(),
            market_rule: MarketRule::ChinaA(ChinaARule::default()),
        })
    }

    #[test]
    fn should_resolve_registered_symbol() {
        let mut registry = InstrumentRegistry::new();
        registry.register(stock("600519"));

        let resolved = registry.get("600519").unwrap();
        assert_eq!(resolved.symbol(), "600519");
    }

    #[test]
    fn should_error_on_unknown_symbol() {
        let registry = InstrumentRegistry::new();
        assert!(matches!(
            registry.get("000001"),
            Err(InstrumentError::UnknownSymbol(_))
        ));
    }

    #[test]
    fn should_apply_future_contract_multiplier_and_margin_rate() {
        let future = Instrument::Future(Future {
            symbol: "IF2409".to_string(),
            currency: "CNY".to_string(),
            market_rule: MarketRule::ChinaA(ChinaARule::default()),
            contract_multiplier: 300.0,
            margin_rate: 0.12,
            expiry: Utc::now(),
        });
        assert_eq!(future.contract_multiplier(), 300.0);
        assert_eq!(future.margin_rate(), 0.12);
        assert!(future.is_future());
        assert!(future.expiry().is_some());
    }

    #[test]
    fn should_treat_stock_as_unlevered_with_no_expiry() {
        let equity = stock("AAPL");
        assert_eq!(equity.contract_multiplier(), 1.0);
        assert_eq!(equity.margin_rate(), 1.0);
        assert!(equity.expiry().is_none());
    }

    #[test]
    fn should_expose_currency_and_market_rule() {
        let equity = stock("600519");
        assert_eq!(equity.currency(), "CNY");
        assert!(matches!(equity.market_rule(), MarketRule::ChinaA(_)));
    }
}
