use thiserror::Error;

/// All errors generated in the `data` module.
#[derive(Error, Debug)]
pub enum DataError {
    #[error("Failed to build struct due to incomplete attributes provided")]
    BuilderIncomplete,

    #[error("data iterator is exhausted, no further MarketEvents can be generated")]
    DataIteratorEmpty,

    #[error("frequency string '{0}' is not in the supported alphabet")]
    UnsupportedFrequency(String),

    #[error("requested range start {start} is after end {end}")]
    InvalidRange {
        start: chrono::DateTime<chrono::Utc>,
        end: chrono::DateTime<chrono::Utc>,
    },

    #[error("failed to read bar data from CSV source")]
    Csv(#[from] csv::Error),

    #[error("upstream fetch failed for ticker {ticker}: {reason}")]
    UpstreamFetch { ticker: String, reason: String },

    #[error("no bars are cached for ticker {0} at the requested frequency")]
    NoBarsCached(String),
}
