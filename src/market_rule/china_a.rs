use chrono::{DateTime, Datelike, TimeZone, Timelike, Utc, Weekday};
use serde::{Deserialize, Serialize};

use super::{Direction, MarketRuleOps, SlippageModel};

/// Mainland China A-share rules: T+1 settlement, 10% daily price limit on the main board (5% for
/// ST/\*ST names, 20% for STAR Market/ChiNext), no short selling, stamp duty on sells only.
/// Constants are taken verbatim from `ChinaAShareRules.__init__`.
#[derive(Copy, Clone, PartialEq, Debug, Serialize, Deserialize)]
pub struct ChinaARule {
    pub commission_rate: f64,
    pub min_commission: f64,
    pub stamp_duty_rate: f64,
    pub transfer_fee_rate: f64,
    pub lot_size: u64,
    pub slippage_factor: f64,
}

impl Default for ChinaARule {
    fn default() -> Self {
        Self {
            commission_rate: 0.0003,
            min_commission: 5.0,
            stamp_duty_rate: 0.001,
            transfer_fee_rate: 0.00002,
            lot_size: 100,
            slippage_factor: 0.15,
        }
    }
}

impl ChinaARule {
    /// 5% for ST/\*ST names, 20% for the STAR Market (`688`) and ChiNext (`300`) boards, 10%
    /// otherwise.
    fn price_limit_pct(&self, symbol: &str) -> f64 {
        let upper = symbol.to_uppercase();
        if upper.contains("ST") {
            0.05
        } else if symbol.starts_with("688") || symbol.starts_with("300") {
            0.20
        } else {
            0.10
        }
    }
}

impl MarketRuleOps for ChinaARule {
    fn market_name(&self) -> &'static str {
        "china_a"
    }

    fn lot_size(&self) -> u64 {
        self.lot_size
    }

    fn price_tick(&self) -> f64 {
        0.01
    }

    fn allow_short(&self) -> bool {
        false
    }

    fn settlement_days(&self) -> u32 {
        1
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
        current_time: DateTime<Utc>,
        current_position: i64,
    ) -> Result<(), String> {
        if self.violates_short_selling(current_position, quantity, direction) {
            return Err("short selling is not permitted in the China A-share market".to_string());
        }
        if quantity % self.lot_size != 0 {
            return Err(format!(
                "quantity {quantity} is not a multiple of the China A-share lot size {}",
                self.lot_size
            ));
        }
        if !self.is_trading_time(current_time) {
            return Err("order submitted outside China A-share trading hours".to_string());
        }
        Ok(())
    }

    fn is_trading_time(&self, dt: DateTime<Utc>) -> bool {
        let shanghai = dt.with_timezone(&chrono_tz::Asia::Shanghai);
        if matches!(shanghai.weekday(), Weekday::Sat | Weekday::Sun) {
            return false;
        }
        let minutes = shanghai.hour() * 60 + shanghai.minute();
        let morning = (9 * 60 + 30)..=(11 * 60 + 30);
        let afternoon = (13 * 60)..=(15 * 60);
        morning.contains(&minutes) || afternoon.contains(&minutes)
    }

    fn apply_price_limit(&self, symbol: &str, price: f64, prev_close: f64, _direction: Direction) -> f64 {
        let limit = self.price_limit_pct(symbol);
        let upper = prev_close * (1.0 + limit);
        let lower = prev_close * (1.0 - limit);
        price.clamp(lower, upper)
    }

    fn calculate_commission(&self, quantity: u64, price: f64, direction: Direction) -> f64 {
        let trade_value = quantity as f64 * price;
        let commission = (trade_value * self.commission_rate).max(self.min_commission);
        let stamp_duty = if direction == Direction::Sell {
            trade_value * self.stamp_duty_rate
        } else {
            0.0
        };
        let transfer_fee = trade_value * self.transfer_fee_rate;
        commission + stamp_duty + transfer_fee
    }

}
