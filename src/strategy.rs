//! The [`Strategy`] interface an external collaborator implements to analyse
//! [`MarketEvent`]s and advise the [`Portfolio`](crate::portfolio::Portfolio) via
//! [`SignalEvent`]s (§6). The engine only consumes this contract; concrete strategies (moving
//! average crossover, etc.) are outside the core, matching the source's pluggable
//! `strategies/` package.

use crate::data::handler::DataHandler;
use crate::event::{MarketEvent, SignalEvent};

/// May generate an advisory [`SignalEvent`] per symbol carried by an incoming [`MarketEvent`].
/// Implementations are given read access to the [`DataHandler`] so they can inspect historical
/// windows (moving averages, indicators, etc.) without the engine needing to know their shape.
pub trait Strategy {
    /// Analyses `market` (with `data` available for historical lookups) and optionally returns
    /// one advisory signal. A strategy wanting to signal on multiple symbols within the same
    /// tick is called once per symbol by the [`Engine`](crate::engine::Engine).
    fn calculate_signal(&mut self, market: &MarketEvent, symbol: &str, data: &DataHandler) -> Option<SignalEvent>;
}
