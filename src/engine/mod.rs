//! The discrete-event driver (C7): owns the FIFO event queue and ticks the whole system forward
//! one bar index at a time, in the fixed dispatch order of §4.7 — `Market -> pending fills ->
//! expirations -> mark-to-market -> signals -> orders -> same-bar fills`. Grounded in
//! `Trader::run`'s drain-the-queue trading loop, generalized from its per-market `Trader` to a
//! single engine that owns the whole instrument universe, and from its stack-order `VecDeque`
//! (`push_back`/`pop_back`) to strict FIFO (`push_back`/`pop_front`) per §5's ordering guarantee.

pub mod error;

use std::collections::{HashSet, VecDeque};

pub use error::EngineError;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::data::handler::DataHandler;
use crate::event::{Event, MarketEvent, OrderEvent};
use crate::execution::ExecutionHandler;
use crate::instrument::InstrumentRegistry;
use crate::market_rule::Direction;
use crate::portfolio::Portfolio;
use crate::strategy::Strategy;

/// Drives a [`DataHandler`] to completion through a [`Strategy`], [`Portfolio`] and
/// [`ExecutionHandler`] sharing one [`InstrumentRegistry`] (C7). Construct via [`EngineBuilder`].
pub struct Engine<S: Strategy> {
    engine_id: Uuid,
    queue: VecDeque<Event>,
    data: DataHandler,
    strategy: S,
    portfolio: Portfolio,
    execution: ExecutionHandler,
    registry: InstrumentRegistry,
    expired_symbols: HashSet<String>,
}

impl<S: Strategy> Engine<S> {
    pub fn builder() -> EngineBuilder<S> {
        EngineBuilder::new()
    }

    pub fn portfolio(&self) -> &Portfolio {
        &self.portfolio
    }

    /// Runs the engine to completion: advances the [`DataHandler`] tick by tick, enqueuing and
    /// fully draining a `Market` event at each step, until no symbol has a further bar.
    pub fn run(&mut self) -> Result<(), EngineError> {
        info_run_start(self.engine_id);

        while self.data.advance() {
            let symbols = self.data.symbols_at_current_tick();
            if symbols.is_empty() {
                continue;
            }
            let datetime = symbols
                .iter()
                .find_map(|symbol| self.data.latest(symbol))
                .map(|bar| bar.timestamp)
                .unwrap_or_else(Utc::now);

            tracing::info!(engine_id = %self.engine_id, %datetime, symbols = ?symbols, "processing market tick");

            self.queue.push_back(Event::Market(MarketEvent { datetime, symbols }));
            self.drain_queue(datetime)?;
        }

        tracing::info!(engine_id = %self.engine_id, "engine run complete");
        Ok(())
    }

    fn drain_queue(&mut self, tick_datetime: DateTime<Utc>) -> Result<(), EngineError> {
        let today = tick_datetime.date_naive();

        while let Some(event) = self.queue.pop_front() {
            match event {
                Event::Market(market) => {
                    for fill in self.execution.process_pending_orders(&self.data, &self.registry, &self.portfolio)? {
                        self.queue.push_back(Event::Fill(fill));
                    }

                    for order in self.sweep_expirations(tick_datetime) {
                        self.queue.push_back(Event::Order(order));
                    }

                    self.portfolio
                        .update_timeindex(&self.data, &self.registry, market.datetime, today)?;

                    for symbol in &market.symbols {
                        if let Some(signal) = self.strategy.calculate_signal(&market, symbol, &self.data) {
                            self.queue.push_back(Event::Signal(signal));
                        }
                    }
                }

                Event::Signal(signal) => {
                    if let Some(order) = self.portfolio.process_signal_event(&signal, &self.data, &self.registry)? {
                        self.queue.push_back(Event::Order(order));
                    }
                }

                Event::Order(order) => {
                    if let Some(fill) = self.execution.handle_order(order, &self.data, &self.registry, &self.portfolio)? {
                        self.queue.push_back(Event::Fill(fill));
                    }
                }

                Event::Fill(fill) => {
                    self.portfolio.process_fill_event(&fill, &self.registry, today)?;
                }
            }
        }

        Ok(())
    }

    /// For every registered instrument whose expiry has passed and hasn't already been swept,
    /// emits a closing [`OrderEvent`] if a nonzero position is still held, then marks the symbol
    /// expired regardless — an expired symbol is never re-armed (§4.7).
    fn sweep_expirations(&mut self, tick_datetime: DateTime<Utc>) -> Vec<OrderEvent> {
        let mut orders = Vec::new();

        let due: Vec<String> = self
            .registry
            .iter()
            .filter(|instrument| {
                !self.expired_symbols.contains(instrument.symbol())
                    && instrument.expiry().is_some_and(|expiry| tick_datetime >= expiry)
            })
            .map(|instrument| instrument.symbol().to_string())
            .collect();

        for symbol in due {
            if let Some(holding) = self.portfolio.get_holding(&symbol) {
                if holding.quantity != 0 {
                    let direction = if holding.quantity > 0 { Direction::Sell } else { Direction::Buy };
                    tracing::debug!(%symbol, quantity = holding.quantity, "forced close on contract expiry");
                    orders.push(OrderEvent {
                        symbol: symbol.clone(),
                        quantity: holding.quantity.unsigned_abs(),
                        direction,
                        datetime: tick_datetime,
                    });
                }
            }
            self.expired_symbols.insert(symbol);
        }

        orders
    }
}

fn info_run_start(engine_id: Uuid) {
    tracing::info!(%engine_id, "engine run starting");
}

/// Lego-style builder for [`Engine`] (mirrors `TraderLego`/`TraderBuilder`'s pattern of gathering
/// required collaborators before `build()` validates completeness).
pub struct EngineBuilder<S: Strategy> {
    engine_id: Option<Uuid>,
    data: Option<DataHandler>,
    strategy: Option<S>,
    portfolio: Option<Portfolio>,
    execution: Option<ExecutionHandler>,
    registry: Option<InstrumentRegistry>,
}

impl<S: Strategy> EngineBuilder<S> {
    fn new() -> Self {
        Self {
            engine_id: None,
            data: None,
            strategy: None,
            portfolio: None,
            execution: None,
            registry: None,
        }
    }

    pub fn engine_id(mut self, engine_id: Uuid) -> Self {
        self.engine_id = Some(engine_id);
        self
    }

    pub fn data(mut self, data: DataHandler) -> Self {
        self.data = Some(data);
        self
    }

    pub fn strategy(mut self, strategy: S) -> Self {
        self.strategy = Some(strategy);
        self
    }

    pub fn portfolio(mut self, portfolio: Portfolio) -> Self {
        self.portfolio = Some(portfolio);
        self
    }

    pub fn execution(mut self, execution: ExecutionHandler) -> Self {
        self.execution = Some(execution);
        self
    }

    pub fn registry(mut self, registry: InstrumentRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn build(self) -> Result<Engine<S>, EngineError> {
        Ok(Engine {
            engine_id: self.engine_id.unwrap_or_else(Uuid::new_v4),
            queue: VecDeque::new(),
            data: self.data.ok_or(EngineError::BuilderIncomplete)?,
            strategy: self.strategy.ok_or(EngineError::BuilderIncomplete)?,
            portfolio: self.portfolio.ok_or(EngineError::BuilderIncomplete)?,
            execution: self.execution.ok_or(EngineError::BuilderIncomplete)?,
            registry: self.registry.ok_or(EngineError::BuilderIncomplete)?,
            expired_symbols: HashSet::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bar::{Bar, Frequency, FrequencyUnit, Ohlcv};
    use crate::event::{SignalEvent, SignalType};
    use crate::instrument::{Future, Instrument, Stock};
    use crate::market_rule::china_a::ChinaARule;
    use crate::market_rule::us_stock::UsStockRule;
    use crate::market_rule::MarketRule;
    use chrono::TimeZone;

    fn bar(ticker: &str, day: i64, close: f64) -> Bar {
        Bar {
            ticker: ticker.to_string(),
            timestamp: Utc.timestamp_opt(day * 86_400 + 14 * 3_600 + 30 * 60, 0).unwrap(),
            frequency: Frequency::new(1, FrequencyUnit::Day),
            ohlcv: Some(Ohlcv { open: close, high: close + 1.0, low: close - 1.0, close, volume: 10_000.0 }),
            source: "stock".to_string(),
            created_at: Utc::now(),
        }
    }

    /// 14:30 UTC is 9:30am US Eastern (`bar`'s fixture hour), but 10:30pm in Shanghai — well
    /// outside China A-share trading hours. China-market fixtures use 02:00 UTC (10:00 Shanghai)
    /// instead so orders survive `ChinaARule::validate_order`'s trading-hours check.
    fn china_bar(ticker: &str, day: i64, close: f64) -> Bar {
        Bar {
            ticker: ticker.to_string(),
            timestamp: Utc.timestamp_opt(day * 86_400 + 2 * 3_600, 0).unwrap(),
            frequency: Frequency::new(1, FrequencyUnit::Day),
            ohlcv: Some(Ohlcv { open: close, high: close + 1.0, low: close - 1.0, close, volume: 10_000.0 }),
            source: "stock".to_string(),
            created_at: Utc::now(),
        }
    }

    /// Buys once on the first tick it sees a symbol, then never signals again.
    struct BuyOnceStrategy {
        bought: HashSet<String>,
    }

    impl Strategy for BuyOnceStrategy {
        fn calculate_signal(&mut self, market: &MarketEvent, symbol: &str, _data: &DataHandler) -> Option<SignalEvent> {
            if self.bought.contains(symbol) {
                return None;
            }
            self.bought.insert(symbol.to_string());
            Some(SignalEvent {
                symbol: symbol.to_string(),
                datetime: market.datetime,
                signal_type: SignalType::Long,
                strength: 100.0,
            })
        }
    }

    #[test]
    fn should_open_a_position_and_mark_it_to_market_across_ticks() {
        let mut registry = InstrumentRegistry::new();
        registry.register(Instrument::Stock(Stock {
            symbol: "AAPL".to_string(),
            currency: "USD".to_string(),
            market_rule: MarketRule::UsStock(UsStockRule::default()),
        }));

        let data = DataHandler::new(
            vec!["AAPL".to_string()],
            vec![bar("AAPL", 0, 100.0), bar("AAPL", 1, 105.0), bar("AAPL", 2, 110.0)],
        );

        let mut engine = Engine::builder()
            .data(data)
            .strategy(BuyOnceStrategy { bought: HashSet::new() })
            .portfolio(Portfolio::new(1_000_000.0))
            .execution(ExecutionHandler::new())
            .registry(registry)
            .build()
            .unwrap();

        engine.run().unwrap();

        let holding = engine.portfolio().get_holding("AAPL").unwrap();
        assert_eq!(holding.quantity, 100);
        assert!(engine.portfolio().snapshots().len() >= 2);
    }

    #[test]
    fn should_force_close_an_expired_future_without_rearming_it() {
        let mut registry = InstrumentRegistry::new();
        registry.register(Instrument::Future(Future {
            symbol: "IF2409".to_string(),
            currency: "CNY".to_string(),
            market_rule: MarketRule::ChinaA(ChinaARule::default()),
            contract_multiplier: 10.0,
            margin_rate: 1.0,
            // Day offsets 4-6 land on Mon-Wed (epoch day 0 is a Thursday) so every tick here
            // clears `ChinaARule::is_trading_time`'s weekend check.
            expiry: Utc.timestamp_opt(5 * 86_400 + 2 * 3_600, 0).unwrap(),
        }));

        let data = DataHandler::new(
            vec!["IF2409".to_string()],
            vec![china_bar("IF2409", 4, 50.0), china_bar("IF2409", 5, 52.0), china_bar("IF2409", 6, 53.0)],
        );

        let mut engine = Engine::builder()
            .data(data)
            .strategy(BuyOnceStrategy { bought: HashSet::new() })
            .portfolio(Portfolio::new(1_000_000.0))
            .execution(ExecutionHandler::new().with_fill_on_next_bar(false))
            .registry(registry)
            .build()
            .unwrap();

        engine.run().unwrap();

        let holding = engine.portfolio().get_holding("IF2409").unwrap();
        assert_eq!(holding.quantity, 0);
    }
}
