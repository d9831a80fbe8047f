//! Replays a pre-loaded set of per-symbol bar series in lockstep, by index rather than by
//! calendar time (§4.2). Symbols missing a bar at a given index are simply absent from that
//! tick; this mirrors the source `DataHandler`'s `_bar_index`-keyed visibility windows, including
//! its "stale if not refreshed this tick" quirk for single-bar lookups.

use std::collections::HashMap;

use crate::bar::Bar;

/// Single-symbol, ascending-by-time bar series plus the growing window of bars that have become
/// visible to the rest of the engine as `advance()` is called.
#[derive(Clone, Debug, Default)]
struct SymbolSeries {
    all: Vec<Bar>,
    visible: Vec<Bar>,
}

/// Lockstep replay cursor over every symbol's historical bars (C2). Construct once per backtest
/// run from a fully-loaded dataset; the [`Engine`](crate::engine::Engine) drives it tick by tick.
#[derive(Clone, Debug, Default)]
pub struct DataHandler {
    series: HashMap<String, SymbolSeries>,
    symbols: Vec<String>,
    cursor: usize,
}

impl DataHandler {
    /// Builds a handler from `bars`, grouped by [`Bar::ticker`] and sorted ascending by
    /// timestamp. `symbols` fixes iteration order for [`Self::symbols`] and the per-tick
    /// [`MarketEvent`](crate::event::MarketEvent) symbol list.
    pub fn new(symbols: Vec<String>, bars: Vec<Bar>) -> Self {
        let mut series: HashMap<String, SymbolSeries> = symbols
            .iter()
            .map(|symbol| (symbol.clone(), SymbolSeries::default()))
            .collect();

        for bar in bars {
            series.entry(bar.ticker.clone()).or_default().all.push(bar);
        }

        for s in series.values_mut() {
            s.all.sort_by_key(|bar| bar.timestamp);
        }

        Self {
            series,
            symbols,
            cursor: 0,
        }
    }

    pub fn symbols(&self) -> &[String] {
        &self.symbols
    }

    /// Advances the cursor by one index, appending to each symbol's visible window the bar (if
    /// any) sitting at the new index. Returns `true` iff at least one symbol had a bar there;
    /// the engine stops its main loop on the first `false`.
    pub fn advance(&mut self) -> bool {
        let mut has_data = false;
        for symbol in &self.symbols {
            if let Some(series) = self.series.get_mut(symbol) {
                if let Some(bar) = series.all.get(self.cursor) {
                    series.visible.push(bar.clone());
                    has_data = true;
                }
            }
        }
        if has_data {
            self.cursor += 1;
        }
        has_data
    }

    /// Symbols that received a fresh bar at the index just advanced to, in [`Self::symbols`]
    /// order. Backs the [`MarketEvent`](crate::event::MarketEvent) the engine emits per tick.
    pub fn symbols_at_current_tick(&self) -> Vec<String> {
        self.symbols
            .iter()
            .filter(|symbol| {
                self.series
                    .get(*symbol)
                    .map(|s| s.visible.len() == self.cursor)
                    .unwrap_or(false)
            })
            .cloned()
            .collect()
    }

    /// The most recent bar for `symbol`, or `None` if `symbol` was not refreshed on the tick just
    /// advanced to (its visible window is shorter than the cursor). This intentionally does not
    /// fall back to a stale older bar — a caller wanting history regardless of freshness should
    /// use [`Self::latest_n`].
    pub fn latest(&self, symbol: &str) -> Option<&Bar> {
        let series = self.series.get(symbol)?;
        if series.visible.len() == self.cursor {
            series.visible.last()
        } else {
            None
        }
    }

    /// The last `n` visible bars for `symbol`, oldest first, or an empty slice if fewer than `n`
    /// bars have become visible yet. Unlike [`Self::latest`], this does not require the symbol to
    /// have been refreshed on the current tick.
    pub fn latest_n(&self, symbol: &str, n: usize) -> &[Bar] {
        match self.series.get(symbol) {
            Some(series) if series.visible.len() >= n => {
                let start = series.visible.len() - n;
                &series.visible[start..]
            }
            _ => &[],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bar::{Frequency, FrequencyUnit, Ohlcv};
    use chrono::{TimeZone, Utc};

    fn bar(ticker: &str, day: i64, close: f64) -> Bar {
        Bar {
            ticker: ticker.to_string(),
            timestamp: Utc.timestamp_opt(day * 86_400, 0).unwrap(),
            frequency: Frequency::new(1, FrequencyUnit::Day),
            ohlcv: Some(Ohlcv { open: close, high: close, low: close, close, volume: 1.0 }),
            source: "stock".to_string(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn should_advance_until_all_series_are_exhausted() {
        let bars = vec![bar("AAPL", 0, 1.0), bar("AAPL", 1, 2.0)];
        let mut handler = DataHandler::new(vec!["AAPL".to_string()], bars);

        assert!(handler.advance());
        assert!(handler.advance());
        assert!(!handler.advance());
    }

    #[test]
    fn should_report_latest_only_when_symbol_refreshed_this_tick() {
        let bars = vec![bar("AAPL", 0, 1.0), bar("MSFT", 0, 10.0), bar("MSFT", 1, 11.0)];
        let mut handler = DataHandler::new(vec!["AAPL".to_string(), "MSFT".to_string()], bars);

        handler.advance();
        assert_eq!(handler.latest("AAPL").and_then(|b| b.close()), Some(1.0));
        assert_eq!(handler.latest("MSFT").and_then(|b| b.close()), Some(10.0));

        // Second tick: only MSFT has a bar, so AAPL is stale and must report None.
        handler.advance();
        assert_eq!(handler.latest("AAPL"), None);
        assert_eq!(handler.latest("MSFT").and_then(|b| b.close()), Some(11.0));
    }

    #[test]
    fn should_return_empty_slice_when_fewer_than_n_bars_are_visible() {
        let bars = vec![bar("AAPL", 0, 1.0)];
        let mut handler = DataHandler::new(vec!["AAPL".to_string()], bars);

        handler.advance();
        assert!(handler.latest_n("AAPL", 2).is_empty());
        assert_eq!(handler.latest_n("AAPL", 1).len(), 1);
    }

    #[test]
    fn should_return_strict_n_slice_regardless_of_current_tick_freshness() {
        let bars = vec![bar("AAPL", 0, 1.0), bar("AAPL", 1, 2.0), bar("MSFT", 0, 10.0)];
        let mut handler = DataHandler::new(vec!["AAPL".to_string(), "MSFT".to_string()], bars);

        handler.advance();
        handler.advance();

        // MSFT wasn't refreshed on tick 2 but still has 1 visible bar from tick 1.
        assert_eq!(handler.latest_n("MSFT", 1).len(), 1);
        assert!(handler.latest_n("MSFT", 2).is_empty());
        assert_eq!(handler.latest_n("AAPL", 2).len(), 2);
    }

    #[test]
    fn should_list_symbols_refreshed_at_current_tick() {
        let bars = vec![bar("AAPL", 0, 1.0), bar("MSFT", 1, 10.0)];
        let mut handler = DataHandler::new(vec!["AAPL".to_string(), "MSFT".to_string()], bars);

        handler.advance();
        assert_eq!(handler.symbols_at_current_tick(), vec!["AAPL".to_string()]);

        handler.advance();
        assert_eq!(handler.symbols_at_current_tick(), vec!["MSFT".to_string()]);
    }
}
