use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Direction, MarketRuleOps, SlippageModel};

/// Crypto spot/perpetual markets: trades around the clock, no lot rounding, no price limit,
/// immediate (T+0) settlement, short selling permitted. Constants taken verbatim from
/// `CryptoRules.__init__`.
#[derive(Copy, Clone, PartialEq, Debug, Serialize, Deserialize)]
pub struct CryptoRule {
    pub commission_rate: f64,
    pub lot_size: u64,
    pub slippage_factor: f64,
}

impl Default for CryptoRule {
    fn default() -> Self {
        Self {
            commission_rate: 0.001,
            lot_size: 1,
            slippage_factor: 0.20,
        }
    }
}

impl MarketRuleOps for CryptoRule {
    fn market_name(&self) -> &'static str {
        "crypto"
    }

    fn lot_size(&self) -> u64 {
        self.lot_size
    }

    fn price_tick(&self) -> f64 {
        0.01
    }

    fn allow_short(&self) -> bool {
        true
    }

    fn settlement_days(&self) -> u32 {
        0
    }

    fn slippage_model(&self) -> SlippageModel {
        SlippageModel::VolumeBased {
            factor: self.slippage_factor,
        }
    }

    fn validate_order(
        &self,
        _symbol: &str,
        quantity: u64,
        direction: Direction,
        _current_time: DateTime<Utc>,
        current_position: i64,
    ) -> Result<(), String> {
        if self.violates_short_selling(current_position, quantity, direction) {
            return Err("short selling is not permitted for this instrument".to_string());
        }
        Ok(())
    }

    fn is_trading_time(&self, _dt: DateTime<Utc>) -> bool {
        true
    }

    fn apply_price_limit(&self, _symbol: &str, price: f64, _prev_close: f64, _direction: Direction) -> f64 {
        price
    }

    fn calculate_commission(&self, quantity: u64, price: f64, _direction: Direction) -> f64 {
        quantity as f64 * price * self.commission_rate
    }

}
