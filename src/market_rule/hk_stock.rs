use chrono::{DateTime, Datelike, TimeZone, Timelike, Utc, Weekday};
use serde::{Deserialize, Serialize};

use super::{Direction, MarketRuleOps, SlippageModel};

/// Hong Kong equities: stamp duty charged on both legs (unlike China A), an additional trading
/// fee, morning/afternoon sessions, T+2 settlement. Constants taken verbatim from
/// `HKStockRules.__init__`.
#[derive(Copy, Clone, PartialEq, Debug, Serialize, Deserialize)]
pub struct HkStockRule {
    pub commission_rate: f64,
    pub min_commission: f64,
    pub stamp_duty_rate: f64,
    pub transfer_fee_rate: f64,
    pub trading_fee_rate: f64,
    pub lot_size: u64,
    pub slippage_factor: f64,
}

impl Default for HkStockRule {
    fn default() -> Self {
        Self {
            commission_rate: 0.0025,
            min_commission: 100.0,
            stamp_duty_rate: 0.0013,
            transfer_fee_rate: 0.00002,
            trading_fee_rate: 0.00005,
            lot_size: 100,
            slippage_factor: 0.10,
        }
    }
}

impl MarketRuleOps for HkStockRule {
    fn market_name(&self) -> &'static str {
        "hk_stock"
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
        2
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
            return Err("short selling is not permitted in the Hong Kong market".to_string());
        }
        if quantity % self.lot_size != 0 {
            return Err(format!(
                "quantity {quantity} is not a multiple of the HK board lot {}",
                self.lot_size
            ));
        }
        if !self.is_trading_time(current_time) {
            return Err("order submitted outside Hong Kong trading hours".to_string());
        }
        Ok(())
    }

    fn is_trading_time(&self, dt: DateTime<Utc>) -> bool {
        let hk = dt.with_timezone(&chrono_tz::Asia::Hong_Kong);
        if matches!(hk.weekday(), Weekday::Sat | Weekday::Sun) {
            return false;
        }
        let minutes = hk.hour() * 60 + hk.minute();
        let morning = (9 * 60 + 30)..=(12 * 60);
        let afternoon = (13 * 60)..=(16 * 60);
        morning.contains(&minutes) || afternoon.contains(&minutes)
    }

    fn apply_price_limit(&self, _symbol: &str, price: f64, _prev_close: f64, _direction: Direction) -> f64 {
        price
    }

    fn calculate_commission(&self, quantity: u64, price: f64, _direction: Direction) -> f64 {
        let trade_value = quantity as f64 * price;
        let commission = (trade_value * self.commission_rate).max(self.min_commission);
        let stamp_duty = trade_value * self.stamp_duty_rate;
        let transfer_fee = trade_value * self.transfer_fee_rate;
        let trading_fee = trade_value * self.trading_fee_rate;
        commission + stamp_duty + transfer_fee + trading_fee
    }

}
