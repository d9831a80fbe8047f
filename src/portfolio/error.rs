use thiserror::Error;

use crate::instrument::InstrumentError;

/// All errors generated in the `portfolio` module.
#[derive(Error, Debug)]
pub enum PortfolioError {
    #[error("Failed to build struct due to incomplete attributes provided")]
    BuilderIncomplete,

    #[error("no holding is tracked for symbol {0}")]
    UnknownSymbol(String),

    #[error("no instrument is registered for the fill/signal's symbol")]
    UnknownInstrument(#[from] InstrumentError),
}
