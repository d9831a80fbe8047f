//! A fast/slow simple-moving-average crossover strategy, wired end to end through the full
//! fetch-replay stack: a CSV-backed `FixtureSource` feeds a `DataLoader`, whose replayed bars
//! drive an `Engine` over a `Portfolio` and `ExecutionHandler`. Kept outside `src/` as a
//! demonstration, matching the core's stance that concrete strategies are a downstream concern.
//!
//! Run with `cargo run --example moving_average_crossover`.

use std::collections::HashMap;
use std::time::Duration;

use chrono::NaiveDate;

use marketreplay::bar::{Bar, Frequency, FrequencyUnit};
use marketreplay::data::cache::{DataLoader, FixtureSource, InMemoryCacheStore};
use marketreplay::data::handler::DataHandler;
use marketreplay::engine::Engine;
use marketreplay::event::{MarketEvent, SignalEvent, SignalType};
use marketreplay::execution::ExecutionHandler;
use marketreplay::instrument::{Instrument, InstrumentRegistry, Stock};
use marketreplay::market_rule::us_stock::UsStockRule;
use marketreplay::market_rule::MarketRule;
use marketreplay::portfolio::Portfolio;
use marketreplay::strategy::Strategy;

/// Crosses a short and a long simple moving average of closing price. A Long signal fires the
/// tick the fast average first climbs above the slow one; an Exit fires the tick it first drops
/// back below. Flat otherwise, matching a textbook dual-SMA crossover.
struct MovingAverageCrossover {
    fast_window: usize,
    slow_window: usize,
    fast_above_slow: HashMap<String, bool>,
}

impl MovingAverageCrossover {
    fn new(fast_window: usize, slow_window: usize) -> Self {
        Self {
            fast_window,
            slow_window,
            fast_above_slow: HashMap::new(),
        }
    }

    fn sma(data: &DataHandler, symbol: &str, window: usize) -> Option<f64> {
        let bars = data.latest_n(symbol, window);
        if bars.len() < window {
            return None;
        }
        let sum: f64 = bars.iter().filter_map(|bar| bar.close()).sum();
        Some(sum / window as f64)
    }
}

impl Strategy for MovingAverageCrossover {
    fn calculate_signal(&mut self, market: &MarketEvent, symbol: &str, data: &DataHandler) -> Option<SignalEvent> {
        let fast = Self::sma(data, symbol, self.fast_window)?;
        let slow = Self::sma(data, symbol, self.slow_window)?;
        let crossed_above = fast > slow;

        let previous = self.fast_above_slow.insert(symbol.to_string(), crossed_above);
        let signal_type = match previous {
            Some(was_above) if was_above != crossed_above => {
                if crossed_above {
                    SignalType::Long
                } else {
                    SignalType::Exit
                }
            }
            _ => return None,
        };

        Some(SignalEvent {
            symbol: symbol.to_string(),
            datetime: market.datetime,
            signal_type,
            strength: 100.0,
        })
    }
}

fn main() {
    tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::from_default_env()).init();

    let frequency = Frequency::new(1, FrequencyUnit::Day);
    let csv_path = format!("{}/demos/data/aapl_daily.csv", env!("CARGO_MANIFEST_DIR"));

    let source = FixtureSource::from_csv("stock", vec![frequency], Duration::from_millis(0), &csv_path)
        .expect("failed to load the bundled AAPL fixture");

    let mut loader = DataLoader::new(InMemoryCacheStore::new()).register_source(Box::new(source));
    let localized = loader
        .get_historical_data(
            &["AAPL".to_string()],
            NaiveDate::from_ymd_opt(2024, 1, 2).unwrap().and_hms_opt(0, 0, 0).unwrap(),
            NaiveDate::from_ymd_opt(2024, 2, 1).unwrap().and_hms_opt(0, 0, 0).unwrap(),
            frequency,
            chrono_tz::UTC,
            "stock",
        )
        .expect("gap-aware replay of the fixture failed");

    let bars: Vec<Bar> = localized.into_iter().map(|row| row.bar).collect();
    println!("loaded {} daily AAPL bars via the gap-aware cache", bars.len());

    let mut registry = InstrumentRegistry::new();
    registry.register(Instrument::Stock(Stock {
        symbol: "AAPL".to_string(),
        currency: "USD".to_string(),
        market_rule: MarketRule::UsStock(UsStockRule::default()),
    }));

    let data = DataHandler::new(vec!["AAPL".to_string()], bars);

    let mut engine = Engine::builder()
        .data(data)
        .strategy(MovingAverageCrossover::new(5, 20))
        .portfolio(Portfolio::new(100_000.0))
        .execution(ExecutionHandler::new())
        .registry(registry)
        .build()
        .expect("engine builder missing a required collaborator");

    engine.run().expect("engine run failed");

    let portfolio = engine.portfolio();
    let holding = portfolio.get_holding("AAPL");
    println!("final AAPL holding: {holding:?}");
    println!("equity curve length: {}", portfolio.snapshots().len());
    if let Some(last) = portfolio.snapshots().last() {
        println!("final snapshot: {last:?}");
    }
}
