use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Canonical seconds-per-unit table used for gap arithmetic and upstream interval comparison.
/// Month is treated as 30 days and week as 7 days, matching the source data loader's convention.
pub const SECONDS_PER_MINUTE: i64 = 60;
pub const SECONDS_PER_HOUR: i64 = 3_600;
pub const SECONDS_PER_DAY: i64 = 86_400;
pub const SECONDS_PER_WEEK: i64 = 604_800;
pub const SECONDS_PER_MONTH: i64 = 2_592_000;

/// Symbolic bar duration (e.g. `1m`, `5m`, `1h`, `1d`, `1w`, `1M`), carried as a parsed
/// (count, unit) pair rather than a free-form string so that [`Frequency::as_seconds`] is total.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Serialize, Deserialize)]
pub struct Frequency {
    count: u32,
    unit: FrequencyUnit,
}

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Serialize, Deserialize)]
pub enum FrequencyUnit {
    Minute,
    Hour,
    Day,
    Week,
    Month,
}

impl Frequency {
    pub const fn new(count: u32, unit: FrequencyUnit) -> Self {
        Self { count, unit }
    }

    /// Parses the frequency alphabet `{1m,3m,5m,...,1h,...,1d,3d,1w,1M}`.
    ///
    /// Returns `None` for any string outside the supported alphabet; callers surface this as
    /// [`crate::data::error::CacheError::UnsupportedFrequency`].
    pub fn parse(raw: &str) -> Option<Self> {
        let (digits, unit_str) = raw.split_at(
            raw.find(|c: char| !c.is_ascii_digit())?,
        );
        let count: u32 = digits.parse().ok()?;
        let unit = match unit_str {
            "m" => FrequencyUnit::Minute,
            "h" => FrequencyUnit::Hour,
            "d" => FrequencyUnit::Day,
            "w" => FrequencyUnit::Week,
            "M" => FrequencyUnit::Month,
            _ => return None,
        };
        if count == 0 {
            return None;
        }
        Some(Self { count, unit })
    }

    /// Returns the number of seconds this [`Frequency`] spans, used for gap-discovery arithmetic
    /// and for comparing against upstream-supported intervals.
    pub fn as_seconds(&self) -> i64 {
        let unit_seconds = match self.unit {
            FrequencyUnit::Minute => SECONDS_PER_MINUTE,
            FrequencyUnit::Hour => SECONDS_PER_HOUR,
            FrequencyUnit::Day => SECONDS_PER_DAY,
            FrequencyUnit::Week => SECONDS_PER_WEEK,
            FrequencyUnit::Month => SECONDS_PER_MONTH,
        };
        i64::from(self.count) * unit_seconds
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn unit(&self) -> FrequencyUnit {
        self.unit
    }
}

impl std::fmt::Display for Frequency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let unit = match self.unit {
            FrequencyUnit::Minute => "m",
            FrequencyUnit::Hour => "h",
            FrequencyUnit::Day => "d",
            FrequencyUnit::Week => "w",
            FrequencyUnit::Month => "M",
        };
        write!(f, "{}{}", self.count, unit)
    }
}

/// OHLCV payload of a [`Bar`]. Kept as a single optional block (rather than five independently
/// nullable fields) so that invalidation always clears the whole candle at once, matching the
/// source loader's `_invalidate_data` behaviour.
#[derive(Copy, Clone, PartialEq, Debug, Serialize, Deserialize)]
pub struct Ohlcv {
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Ohlcv {
    /// Validates the §3 OHLCV invariants: all positive, `low <= open/close <= high`, `low <=
    /// high`, `volume >= 0`.
    pub fn is_valid(&self) -> bool {
        self.open > 0.0
            && self.high > 0.0
            && self.low > 0.0
            && self.close > 0.0
            && self.volume >= 0.0
            && self.low <= self.high
            && self.low <= self.open
            && self.open <= self.high
            && self.low <= self.close
            && self.close <= self.high
    }
}

/// One OHLCV candle at a given [`Frequency`], or an invalidated time-index placeholder when
/// `ohlcv` is `None`.
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
pub struct Bar {
    pub ticker: String,
    pub timestamp: DateTime<Utc>,
    pub frequency: Frequency,
    pub ohlcv: Option<Ohlcv>,
    pub source: String,
    pub created_at: DateTime<Utc>,
}

impl Bar {
    /// Returns the close price used as the execution handler's fallback fill basis and the
    /// portfolio's mark-to-market reference. `None` for an invalidated bar.
    pub fn close(&self) -> Option<f64> {
        self.ohlcv.map(|o| o.close)
    }

    pub fn open(&self) -> Option<f64> {
        self.ohlcv.map(|o| o.open)
    }

    pub fn high(&self) -> Option<f64> {
        self.ohlcv.map(|o| o.high)
    }

    pub fn low(&self) -> Option<f64> {
        self.ohlcv.map(|o| o.low)
    }

    pub fn volume(&self) -> Option<f64> {
        self.ohlcv.map(|o| o.volume)
    }

    /// Clears the OHLCV payload, turning this [`Bar`] into an invalidated placeholder retained at
    /// its original timestamp. Mirrors `_invalidate_data` in the source loader.
    pub fn invalidate(&mut self) {
        self.ohlcv = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_ohlcv() -> Ohlcv {
        Ohlcv {
            open: 20.0,
            high: 25.0,
            low: 15.0,
            close: 21.0,
            volume: 7_500.0,
        }
    }

    #[test]
    fn should_accept_valid_ohlcv_records() {
        let valid_records = vec![
            Ohlcv { open: 20.0, high: 25.0, low: 15.0, close: 21.0, volume: 7_500.0 },
            Ohlcv { open: 10.0, high: 10.0, low: 10.0, close: 10.0, volume: 0.0 },
        ];
        for record in valid_records {
            assert!(record.is_valid());
        }
    }

    #[test]
    fn should_reject_invalid_ohlcv_records() {
        let invalid_records = vec![
            Ohlcv { open: -1.0, ..valid_ohlcv() },
            Ohlcv { high: -1.0, ..valid_ohlcv() },
            Ohlcv { low: -1.0, ..valid_ohlcv() },
            Ohlcv { close: -1.0, volume: -7_500.0, ..valid_ohlcv() },
            Ohlcv { volume: -1.0, ..valid_ohlcv() },
            Ohlcv { open: 14.9, ..valid_ohlcv() },
            Ohlcv { open: 25.1, ..valid_ohlcv() },
            Ohlcv { close: 14.9, ..valid_ohlcv() },
            Ohlcv { close: 25.1, ..valid_ohlcv() },
            Ohlcv { high: 15.0, low: 25.0, ..valid_ohlcv() },
        ];
        for record in invalid_records {
            assert!(!record.is_valid());
        }
    }

    #[test]
    fn should_invalidate_bar_clearing_whole_ohlcv() {
        let mut bar = Bar {
            ticker: "AAPL".into(),
            timestamp: Utc::now(),
            frequency: Frequency::new(1, FrequencyUnit::Day),
            ohlcv: Some(valid_ohlcv()),
            source: "stock".into(),
            created_at: Utc::now(),
        };

        bar.invalidate();

        assert!(bar.ohlcv.is_none());
        assert_eq!(bar.close(), None);
    }

    #[test]
    fn should_parse_supported_frequency_alphabet() {
        let cases = [
            ("1m", 60),
            ("3m", 180),
            ("5m", 300),
            ("15m", 900),
            ("30m", 1_800),
            ("1h", 3_600),
            ("2h", 7_200),
            ("4h", 14_400),
            ("6h", 21_600),
            ("8h", 28_800),
            ("12h", 43_200),
            ("1d", 86_400),
            ("3d", 259_200),
            ("1w", 604_800),
            ("1M", 2_592_000),
        ];
        for (raw, expected_seconds) in cases {
            let frequency = Frequency::parse(raw).unwrap_or_else(|| panic!("failed to parse {raw}"));
            assert_eq!(frequency.as_seconds(), expected_seconds);
            assert_eq!(frequency.to_string(), raw);
        }
    }

    #[test]
    fn should_reject_unsupported_frequency_string() {
        assert!(Frequency::parse("banana").is_none());
        assert!(Frequency::parse("0m").is_none());
        assert!(Frequency::parse("").is_none());
    }
}
