//! Historical bar acquisition and replay: a gap-aware [`cache::DataLoader`] that fetches,
//! aggregates and persists OHLCV bars, and a [`handler::DataHandler`] that replays a loaded
//! dataset to the engine tick by tick (§4.1, §4.2).

pub mod cache;
pub mod error;
pub mod handler;

pub use cache::{CacheStore, DataLoader, InMemoryCacheStore, LocalizedBar, UpstreamSource};
pub use error::DataError;
pub use handler::DataHandler;
