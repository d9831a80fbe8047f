//! Per-market trading rules: validation, price limits, tick/lot normalization, slippage,
//! commission, margin, trading-hours and settlement cadence. [`MarketRule`] is a closed sum type
//! over the four supported markets rather than an open inheritance hierarchy — the Python source
//! this module is grounded in (`market_rules.py`) instead exposes a `MarketRulesFactory` that
//! registers arbitrary subclasses at runtime; that registration hook isn't reproducible under a
//! closed enum and is dropped (see DESIGN.md).

pub mod china_a;
pub mod crypto;
pub mod error;
pub mod hk_stock;
pub mod us_stock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use china_a::ChinaARule;
pub use crypto::CryptoRule;
pub use error::MarketRuleError;
pub use hk_stock::HkStockRule;
pub use us_stock::UsStockRule;

/// Trade direction used throughout order validation, commission and slippage calculations.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Serialize, Deserialize)]
pub enum Direction {
    Buy,
    Sell,
}

impl Direction {
    pub fn sign(&self) -> f64 {
        match self {
            Direction::Buy => 1.0,
            Direction::Sell => -1.0,
        }
    }
}

/// Slippage model selector carried on every [`MarketRule`] variant.
#[derive(Copy, Clone, PartialEq, Debug, Serialize, Deserialize)]
pub enum SlippageModel {
    None,
    Fixed { bps: f64 },
    VolumeBased { factor: f64 },
    SpreadBased,
}

/// Inputs to [`MarketRule::calculate_slippage`], gathered from the executing bar.
#[derive(Copy, Clone, Debug)]
pub struct SlippageContext {
    pub quantity: f64,
    pub price: f64,
    pub direction: Direction,
    pub bar_volume: f64,
    pub bar_high: f64,
    pub bar_low: f64,
}

/// The maximum slippage magnitude the volume-based model may apply, expressed as a fraction of
/// price. Grounded in `market_rules.py`'s `min(slippage_pct, 0.01)` cap.
pub const MAX_VOLUME_SLIPPAGE_PCT: f64 = 0.01;

/// Capability set exposed by every market variant (§4.3).
pub trait MarketRuleOps {
    fn market_name(&self) -> &'static str;
    fn lot_size(&self) -> u64;
    fn price_tick(&self) -> f64;
    fn allow_short(&self) -> bool;
    fn settlement_days(&self) -> u32;
    fn slippage_model(&self) -> SlippageModel;

    /// Checks lot multiples, trading hours, and short-selling permission. `current_position` is
    /// the signed quantity already held (positive long, negative short, zero flat), used to tell
    /// a closing/reducing sell apart from one that would open or deepen a short.
    fn validate_order(
        &self,
        symbol: &str,
        quantity: u64,
        direction: Direction,
        current_time: DateTime<Utc>,
        current_position: i64,
    ) -> Result<(), String>;

    /// Weekday + session windows in the rule's timezone; crypto is always open.
    fn is_trading_time(&self, dt: DateTime<Utc>) -> bool;

    /// Clamps `price` to `[prev_close * (1 - L), prev_close * (1 + L)]`.
    fn apply_price_limit(&self, symbol: &str, price: f64, prev_close: f64, direction: Direction) -> f64;

    /// `trade_value * commission_rate` lower-bounded by `min_commission`, plus stamp duty,
    /// transfer fee and any market-specific trading fee.
    fn calculate_commission(&self, quantity: u64, price: f64, direction: Direction) -> f64;

    /// Cash equities: notional (`contract_multiplier = 1`, `margin_rate = 1`). Futures: `notional
    /// * multiplier * margin_rate`. One formula serves both since a cash equity's multiplier and
    /// margin rate are fixed at `1.0` (see [`Instrument::contract_multiplier`](crate::instrument::Instrument::contract_multiplier)
    /// and [`Instrument::margin_rate`](crate::instrument::Instrument::margin_rate)).
    fn calculate_margin(&self, quantity: u64, price: f64, contract_multiplier: f64, margin_rate: f64) -> f64 {
        quantity as f64 * price * contract_multiplier * margin_rate
    }

    /// `floor(q / lot) * lot`.
    fn normalize_quantity(&self, quantity: u64) -> u64 {
        (quantity / self.lot_size()) * self.lot_size()
    }

    /// `true` when a `Sell` of `quantity` against `current_position` would leave the position net
    /// negative while this market's [`allow_short`](Self::allow_short) is `false`. A sell that
    /// only closes or reduces an existing long is never a violation, regardless of
    /// `allow_short`.
    fn violates_short_selling(&self, current_position: i64, quantity: u64, direction: Direction) -> bool {
        if self.allow_short() || direction != Direction::Sell {
            return false;
        }
        current_position - quantity as i64 < 0
    }

    /// `round(p / tick) * tick`.
    fn normalize_price(&self, price: f64) -> f64 {
        let tick = self.price_tick();
        (price / tick).round() * tick
    }

    /// Volume-based: `s = factor * sqrt(order_volume_pct) * spread_pct`, clamped to 1%.
    /// Spread-based: `s = 0.5 * spread_pct`. Fixed: `bps / 10000`. None: unchanged.
    fn calculate_slippage(&self, ctx: SlippageContext) -> f64 {
        if ctx.price <= 0.0 {
            return ctx.price;
        }
        let slippage_pct = match self.slippage_model() {
            SlippageModel::None => 0.0,
            SlippageModel::Fixed { bps } => bps / 10_000.0,
            SlippageModel::VolumeBased { factor } => {
                let order_volume_pct = if ctx.bar_volume > 0.0 {
                    ctx.quantity / ctx.bar_volume
                } else {
                    0.0
                };
                let pct = if ctx.bar_volume <= 0.0 {
                    0.001
                } else {
                    let spread_pct = (ctx.bar_high - ctx.bar_low) / ctx.price;
                    factor * order_volume_pct.sqrt() * spread_pct
                };
                pct.min(MAX_VOLUME_SLIPPAGE_PCT)
            }
            SlippageModel::SpreadBased => {
                let spread_pct = (ctx.bar_high - ctx.bar_low) / ctx.price;
                spread_pct * 0.5
            }
        };

        match ctx.direction {
            Direction::Buy => ctx.price * (1.0 + slippage_pct),
            Direction::Sell => ctx.price * (1.0 - slippage_pct),
        }
    }
}

/// Closed sum type over the four supported markets. Dispatch to the contained variant's
/// [`MarketRuleOps`] implementation via [`MarketRule::ops`].
#[derive(Copy, Clone, PartialEq, Debug, Serialize, Deserialize)]
pub enum MarketRule {
    ChinaA(ChinaARule),
    UsStock(UsStockRule),
    HkStock(HkStockRule),
    Crypto(CryptoRule),
}

impl MarketRule {
    pub fn ops(&self) -> &dyn MarketRuleOps {
        match self {
            MarketRule::ChinaA(rule) => rule,
            MarketRule::UsStock(rule) => rule,
            MarketRule::HkStock(rule) => rule,
            MarketRule::Crypto(rule) => rule,
        }
    }

    /// Maps a configuration `market_type` string to a [`MarketRule`] variant with its default
    /// parameters, mirroring `MarketRulesFactory.create_rules`'s exhaustive string dispatch.
    pub fn from_market_type(market_type: &str) -> Result<Self, MarketRuleError> {
        match market_type.to_lowercase().as_str() {
            "china_a" => Ok(MarketRule::ChinaA(ChinaARule::default())),
            "us_stock" | "stock" => Ok(MarketRule::UsStock(UsStockRule::default())),
            "hk_stock" => Ok(MarketRule::HkStock(HkStockRule::default())),
            "crypto" => Ok(MarketRule::Crypto(CryptoRule::default())),
            _ => Err(MarketRuleError::UnsupportedMarketType),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_construct_rule_from_known_market_type_strings() {
        assert!(matches!(
            MarketRule::from_market_type("china_a").unwrap(),
            MarketRule::ChinaA(_)
        ));
        assert!(matches!(
            MarketRule::from_market_type("US_STOCK").unwrap(),
            MarketRule::UsStock(_)
        ));
        assert!(matches!(
            MarketRule::from_market_type("stock").unwrap(),
            MarketRule::UsStock(_)
        ));
        assert!(matches!(
            MarketRule::from_market_type("hk_stock").unwrap(),
            MarketRule::HkStock(_)
        ));
        assert!(matches!(
            MarketRule::from_market_type("crypto").unwrap(),
            MarketRule::Crypto(_)
        ));
    }

    #[test]
    fn should_reject_unknown_market_type_string() {
        assert!(matches!(
            MarketRule::from_market_type("moon_market"),
            Err(MarketRuleError::UnsupportedMarketType)
        ));
    }

    #[test]
    fn should_normalize_quantity_down_to_lot_multiple() {
        let rule = ChinaARule::default();
        assert_eq!(rule.normalize_quantity(150), 100);
        assert_eq!(rule.normalize_quantity(250), 200);
        assert_eq!(rule.normalize_quantity(50), 0);
    }

    #[test]
    fn should_flag_short_selling_only_when_disallowed_and_net_negative() {
        let china_a = ChinaARule::default();
        assert!(china_a.violates_short_selling(0, 100, Direction::Sell));
        assert!(china_a.violates_short_selling(50, 100, Direction::Sell));
        assert!(!china_a.violates_short_selling(100, 100, Direction::Sell));
        assert!(!china_a.violates_short_selling(0, 100, Direction::Buy));

        let us_stock = UsStockRule::default();
        assert!(!us_stock.violates_short_selling(0, 100, Direction::Sell));
    }

    #[test]
    fn should_normalize_price_to_nearest_tick() {
        let rule = UsStockRule::default();
        assert_eq!(rule.normalize_price(100.063_2), 100.06);
    }

    #[test]
    fn should_cap_volume_based_slippage_at_one_percent() {
        let rule = ChinaARule::default();
        let ctx = SlippageContext {
            quantity: 1_000_000.0,
            price: 100.0,
            direction: Direction::Buy,
            bar_volume: 1.0,
            bar_high: 150.0,
            bar_low: 50.0,
        };
        let adjusted = rule.calculate_slippage(ctx);
        assert!((adjusted - 101.0).abs() < 1e-9);
    }
}
