use thiserror::Error;

use crate::data::error::DataError;
use crate::execution::ExecutionError;
use crate::instrument::InstrumentError;
use crate::portfolio::PortfolioError;

/// All errors generated by the [`Engine`](super::Engine), either its own or bubbled up from a
/// component it drives. Mirrors the reference corpus's `BarterError`/`EngineError` composition:
/// per-module errors convert in via `#[from]` rather than the engine inventing its own variants
/// for failures that already have a precise home.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Failed to build struct due to incomplete attributes provided")]
    BuilderIncomplete,

    #[error(transparent)]
    Data(#[from] DataError),

    #[error(transparent)]
    Instrument(#[from] InstrumentError),

    #[error(transparent)]
    Execution(#[from] ExecutionError),

    #[error(transparent)]
    Portfolio(#[from] PortfolioError),
}
