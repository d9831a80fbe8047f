use thiserror::Error;

/// All errors generated in the `instrument` module.
#[derive(Error, Debug)]
pub enum InstrumentError {
    #[error("no instrument registered for symbol {0}")]
    UnknownSymbol(String),
}
