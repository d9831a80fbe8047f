//! Per-run configuration (§6, §10): the symbol universe, replay window, frequency, timezone,
//! upstream source and initial capital a caller wires up before constructing a
//! [`DataLoader`](crate::data::cache::DataLoader), [`InstrumentRegistry`] and
//! [`Engine`](crate::engine::Engine). Deserializable via `serde` so a caller can load it from
//! whatever front door they choose; no CLI argument parsing lives in this core.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::bar::Frequency;
use crate::market_rule::{MarketRule, MarketRuleError};

/// All errors generated validating a [`Config`].
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to build struct due to incomplete attributes provided")]
    BuilderIncomplete,

    #[error("start_time {start} is after end_time {end}")]
    InvalidRange { start: DateTime<Utc>, end: DateTime<Utc> },

    #[error("frequency string '{0}' is not in the supported alphabet")]
    UnsupportedFrequency(String),

    #[error("timezone string '{0}' is not a recognised IANA timezone")]
    UnknownTimezone(String),

    #[error("no symbols configured for this run")]
    EmptySymbols,

    #[error(transparent)]
    MarketRule(#[from] MarketRuleError),
}

/// Run-level configuration (§6 "Configuration"). Carries the replay window and symbol universe,
/// the market this run trades under, and the simulated-execution knobs (`rejection_rate`,
/// `fill_on_next_bar`) that parameterize the [`ExecutionHandler`](crate::execution::ExecutionHandler).
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
pub struct Config {
    pub symbols: Vec<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub frequency: String,
    pub timezone: String,
    pub source: String,
    pub initial_capital: f64,
    pub market_type: String,
    #[serde(default)]
    pub rejection_rate: f64,
    #[serde(default = "default_fill_on_next_bar")]
    pub fill_on_next_bar: bool,
}

fn default_fill_on_next_bar() -> bool {
    true
}

impl Config {
    /// Validates the cross-field invariants a deserialized [`Config`] doesn't enforce on its own:
    /// a non-empty symbol universe, `start_time <= end_time`, a frequency in the supported
    /// alphabet, a recognised timezone, and a resolvable `market_type`.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.symbols.is_empty() {
            return Err(ConfigError::EmptySymbols);
        }
        if self.start_time > self.end_time {
            return Err(ConfigError::InvalidRange { start: self.start_time, end: self.end_time });
        }
        if Frequency::parse(&self.frequency).is_none() {
            return Err(ConfigError::UnsupportedFrequency(self.frequency.clone()));
        }
        if chrono_tz::Tz::from_str(&self.timezone).is_err() {
            return Err(ConfigError::UnknownTimezone(self.timezone.clone()));
        }
        MarketRule::from_market_type(&self.market_type)?;
        Ok(())
    }

    /// The [`MarketRule`] this run's `market_type` resolves to, assuming [`Self::validate`] has
    /// already succeeded.
    pub fn market_rule(&self) -> Result<MarketRule, ConfigError> {
        Ok(MarketRule::from_market_type(&self.market_type)?)
    }

    pub fn parsed_frequency(&self) -> Result<Frequency, ConfigError> {
        Frequency::parse(&self.frequency).ok_or_else(|| ConfigError::UnsupportedFrequency(self.frequency.clone()))
    }
}
