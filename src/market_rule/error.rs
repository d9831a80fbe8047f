use thiserror::Error;

/// All errors generated in the `market_rule` module.
#[derive(Error, Copy, Clone, Debug)]
pub enum MarketRuleError {
    #[error("Failed to build struct due to incomplete attributes provided")]
    BuilderIncomplete,

    #[error("unsupported market type requested from MarketRuleFactory")]
    UnsupportedMarketType,
}
