use thiserror::Error;

use crate::instrument::InstrumentError;

/// All errors generated in the `execution` module.
#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error("Failed to build struct due to incomplete attributes provided")]
    BuilderIncomplete,

    #[error("no instrument is registered for the order's symbol")]
    UnknownInstrument(#[from] InstrumentError),
}
