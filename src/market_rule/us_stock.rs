use chrono::{DateTime, Datelike, Timelike, Utc, Weekday};
use serde::{Deserialize, Serialize};

use super::{Direction, MarketRuleOps, SlippageModel};

/// US equities: commission-free, no daily price limit, short selling permitted, T+2 settlement.
/// Constants taken verbatim from `USStockRules.__init__`.
#[derive(Copy, Clone, PartialEq, Debug, Serialize, Deserialize)]
pub struct UsStockRule {
    pub commission_rate: f64,
    pub min_commission: f64,
    pub lot_size: u64,
    pub slippage_factor: f64,
}

impl Default for UsStockRule {
    fn default() -> Self {
        Self {
            commission_rate: 0.0,
            min_commission: 0.0,
            lot_size: 1,
            slippage_factor: 0.05,
        }
    }
}

impl MarketRuleOps for UsStockRule {
    fn market_name(&self) -> &'static str {
        "us_stock"
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
            return Err("short selling is not permitted for this instrument".to_string());
        }
        if !self.is_trading_time(current_time) {
            return Err("order submitted outside US equity trading hours".to_string());
        }
        Ok(())
    }

    fn is_trading_time(&self, dt: DateTime<Utc>) -> bool {
        let new_york = dt.with_timezone(&chrono_tz::America::New_York);
        if matches!(new_york.weekday(), Weekday::Sat | Weekday::Sun) {
            return false;
        }
        let minutes = new_york.hour() * 60 + new_york.minute();
        ((9 * 60 + 30)..(16 * 60)).contains(&minutes)
    }

    fn apply_price_limit(&self, _symbol: &str, price: f64, _prev_close: f64, _direction: Direction) -> f64 {
        price
    }

    fn calculate_commission(&self, quantity: u64, price: f64, _direction: Direction) -> f64 {
        let trade_value = quantity as f64 * price;
        (trade_value * self.commission_rate).max(self.min_commission)
    }

}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn should_charge_zero_commission() {
        let rule = UsStockRule::default();
        assert_eq!(rule.calculate_commission(100, 50.0, Direction::Buy), 0.0);
    }

    #[test]
    fn should_not_clamp_price_to_any_daily_limit() {
        let rule = UsStockRule::default();
        assert_eq!(rule.apply_price_limit("AAPL", 500.0, 100.0, Direction::Buy), 500.0);
    }

    #[test]
    fn should_allow_single_share_lots() {
        let rule = UsStockRule::default();
        assert_eq!(rule.normalize_quantity(137), 137);
    }

    #[test]
    fn should_recognise_regular_session_hours() {
        let rule = UsStockRule::default();
        let during = Utc.with_ymd_and_hms(2024, 6, 3, 15, 0, 0).unwrap();
        let before_open = Utc.with_ymd_and_hms(2024, 6, 3, 12, 0, 0).unwrap();
        assert!(rule.is_trading_time(during));
        assert!(!rule.is_trading_time(before_open));
    }
}
