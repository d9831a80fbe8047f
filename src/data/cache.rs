//! Gap-aware historical data cache: fetch-aggregate-store against a pluggable upstream source
//! and a pluggable persistent store, with per-source rate limiting and OHLCV validation (§4.1).
//!
//! The concrete upstream HTTP clients (stock, crypto) are deliberately out of scope (§1); this
//! module defines the [`UpstreamSource`] contract they would implement and ships an in-memory
//! [`FixtureSource`] test double so the gap-discovery/aggregation/validation pipeline is
//! exercisable without a live network dependency. Likewise [`CacheStore`] is the persistence
//! contract (§6); [`InMemoryCacheStore`] is the reference implementation, with a real on-disk
//! store (sqlite/postgres/etc.) left as an external integration point.

use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::bar::{Bar, Frequency, Ohlcv};
use crate::data::error::DataError;

/// A [`Bar`] read back from the cache, annotated with the local-time string callers requested
/// (§4.1 step 7). The canonical [`Bar`] itself stays UTC-only; formatting only happens here, at
/// the I/O boundary (§9).
#[derive(Clone, PartialEq, Debug)]
pub struct LocalizedBar {
    pub bar: Bar,
    pub datetime_local: String,
}

/// Persistence contract for the `historical_data(ticker, timestamp, frequency, ...)` table
/// (§6). Writes must be idempotent (ignore-on-conflict on the `(ticker, timestamp, frequency)`
/// primary key).
pub trait CacheStore {
    /// Ascending timestamps already cached for `ticker`/`frequency` within `[start, end]`.
    fn existing_timestamps(&self, ticker: &str, frequency: Frequency, start: i64, end: i64) -> Vec<i64>;

    /// Inserts `bars`, silently skipping any whose primary key already exists.
    fn insert_ignore_conflict(&mut self, bars: &[Bar]);

    /// Ascending bars cached for `ticker`/`frequency` within the closed range `[start, end]`.
    fn read_range(&self, ticker: &str, frequency: Frequency, start: i64, end: i64) -> Vec<Bar>;
}

/// Reference [`CacheStore`] backed by a `BTreeMap`, keyed exactly like the §6 primary key so
/// range reads and idempotent inserts fall out of the map's own ordering.
#[derive(Default, Debug, Clone)]
pub struct InMemoryCacheStore {
    rows: BTreeMap<(String, Frequency, i64), Bar>,
}

impl InMemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

impl CacheStore for InMemoryCacheStore {
    fn existing_timestamps(&self, ticker: &str, frequency: Frequency, start: i64, end: i64) -> Vec<i64> {
        self.rows
            .range((ticker.to_string(), frequency, start)..=(ticker.to_string(), frequency, end))
            .map(|((_, _, ts), _)| *ts)
            .collect()
    }

    fn insert_ignore_conflict(&mut self, bars: &[Bar]) {
        for bar in bars {
            let key = (bar.ticker.clone(), bar.frequency, bar.timestamp.timestamp());
            self.rows.entry(key).or_insert_with(|| bar.clone());
        }
    }

    fn read_range(&self, ticker: &str, frequency: Frequency, start: i64, end: i64) -> Vec<Bar> {
        self.rows
            .range((ticker.to_string(), frequency, start)..=(ticker.to_string(), frequency, end))
            .map(|(_, bar)| bar.clone())
            .collect()
    }
}

/// External collaborator that serves raw OHLCV rows for one upstream data source (`stock` or
/// `crypto`). Out of scope per §1; implementors wrap whatever HTTP client the deployment uses.
pub trait UpstreamSource: std::fmt::Debug {
    /// Source name as carried on [`Bar::source`] (e.g. `"stock"`, `"crypto"`).
    fn name(&self) -> &'static str;

    /// Frequencies this source can serve directly, without aggregation.
    fn supported_intervals(&self) -> &'static [Frequency];

    /// Minimum delay this source requires between outbound requests.
    fn min_request_interval(&self) -> Duration;

    /// Fetches raw OHLCV rows for `ticker` within `[start, end]` at `interval`. A `None` return
    /// (rather than `Err`) signals "no data", which the loader treats identically to an error:
    /// logged and folded into an empty range (§4.1 "Failure semantics").
    fn fetch(
        &self,
        ticker: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        interval: Frequency,
    ) -> Result<Vec<Bar>, DataError>;
}

/// In-memory [`UpstreamSource`] test double that serves pre-seeded bars. Used by the crate's
/// own tests and the illustrative demo in place of a real stock/crypto HTTP client.
#[derive(Debug, Default)]
pub struct FixtureSource {
    name: &'static str,
    supported: Vec<Frequency>,
    min_interval: Duration,
    bars: Vec<Bar>,
}

impl FixtureSource {
    pub fn new(name: &'static str, supported: Vec<Frequency>, min_interval: Duration, bars: Vec<Bar>) -> Self {
        Self {
            name,
            supported,
            min_interval,
            bars,
        }
    }
}

impl FixtureSource {
    /// Loads a fixture's bars from a CSV file, mirroring `HistoricDataHandler::new`'s
    /// drip-feed-from-disk construction: the whole file is read and parsed eagerly, and
    /// [`fetch`](UpstreamSource::fetch) then serves ranges out of the in-memory result the same
    /// way it serves a hand-built [`FixtureSource`].
    pub fn from_csv(
        name: &'static str,
        supported: Vec<Frequency>,
        min_interval: Duration,
        file_path: &str,
    ) -> Result<Self, DataError> {
        Ok(Self::new(name, supported, min_interval, load_csv_bars(file_path)?))
    }
}

impl UpstreamSource for FixtureSource {
    fn name(&self) -> &'static str {
        self.name
    }

    fn supported_intervals(&self) -> &'static [Frequency] {
        // Leaked once per fixture construction; acceptable for a test double with a small,
        // bounded lifetime (one per DataLoader instance).
        Box::leak(self.supported.clone().into_boxed_slice())
    }

    fn min_request_interval(&self) -> Duration {
        self.min_interval
    }

    fn fetch(
        &self,
        ticker: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        interval: Frequency,
    ) -> Result<Vec<Bar>, DataError> {
        Ok(self
            .bars
            .iter()
            .filter(|b| b.ticker == ticker && b.frequency == interval && b.timestamp >= start && b.timestamp <= end)
            .cloned()
            .collect())
    }
}

/// Sleeps out the remainder of a source's minimum inter-request delay, matching
/// `DataLoader._apply_rate_limit`'s per-instance (not process-wide) bookkeeping (§9).
#[derive(Debug, Default)]
struct RateLimiter {
    last_request: Option<Instant>,
}

impl RateLimiter {
    fn throttle(&mut self, delay: Duration) {
        if let Some(last) = self.last_request {
            let elapsed = last.elapsed();
            if elapsed < delay {
                std::thread::sleep(delay - elapsed);
            }
        }
        self.last_request = Some(Instant::now());
    }
}

/// Gap-aware fetch/aggregate/store/replay loader (C1). Owns its [`CacheStore`], its
/// [`UpstreamSource`]s (keyed by name) and its own rate-limit bookkeeping.
#[derive(Debug)]
pub struct DataLoader<S: CacheStore> {
    store: S,
    sources: HashMap<&'static str, Box<dyn UpstreamSource>>,
    limiters: HashMap<&'static str, RateLimiter>,
    price_jump_threshold: f64,
}

impl<S: CacheStore> DataLoader<S> {
    pub const DEFAULT_PRICE_JUMP_THRESHOLD: f64 = 0.5;

    pub fn new(store: S) -> Self {
        Self {
            store,
            sources: HashMap::new(),
            limiters: HashMap::new(),
            price_jump_threshold: Self::DEFAULT_PRICE_JUMP_THRESHOLD,
        }
    }

    pub fn with_price_jump_threshold(mut self, threshold: f64) -> Self {
        self.price_jump_threshold = threshold;
        self
    }

    pub fn register_source(mut self, source: Box<dyn UpstreamSource>) -> Self {
        self.sources.insert(source.name(), source);
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// `get_historical_data` (§4.1): fetches, aggregates, validates, stores and replays bars for
    /// every ticker in `tickers`, over the inclusive local-time window `[start_local, end_local]`
    /// in `tz`, at `frequency`.
    pub fn get_historical_data(
        &mut self,
        tickers: &[String],
        start_local: NaiveDateTime,
        end_local: NaiveDateTime,
        frequency: Frequency,
        tz: Tz,
        source: &str,
    ) -> Result<Vec<LocalizedBar>, DataError> {
        let start_utc = local_to_utc(tz, start_local);
        let end_utc = local_to_utc(tz, end_local);

        if start_utc > end_utc {
            return Err(DataError::InvalidRange {
                start: start_utc,
                end: end_utc,
            });
        }

        let step = frequency.as_seconds();
        let s = start_utc.timestamp();
        let e = end_utc.timestamp();

        let mut out = Vec::new();
        for ticker in tickers {
            let existing = self.store.existing_timestamps(ticker, frequency, s, e);
            let gaps = missing_ranges(&existing, s, e, step);

            for (gap_start, gap_end) in gaps {
                self.fill_gap(ticker, source, frequency, gap_start, gap_end)?;
            }

            let rows = self.store.read_range(ticker, frequency, s, e);
            info!(ticker = %ticker, count = rows.len(), %frequency, "replayed cached bars");
            for bar in rows {
                let local_dt = tz.from_utc_datetime(&bar.timestamp.naive_utc());
                out.push(LocalizedBar {
                    datetime_local: local_dt.format("%Y-%m-%d %H:%M:%S %Z").to_string(),
                    bar,
                });
            }
        }

        Ok(out)
    }

    fn fill_gap(
        &mut self,
        ticker: &str,
        source: &str,
        frequency: Frequency,
        gap_start: i64,
        gap_end: i64,
    ) -> Result<(), DataError> {
        let upstream = self
            .sources
            .get(source)
            .ok_or_else(|| DataError::UnsupportedFrequency(format!("unknown upstream source '{source}'")))?;

        let (fetch_interval, aggregate_count) =
            best_upstream_interval(frequency, upstream.supported_intervals())
                .ok_or_else(|| DataError::UnsupportedFrequency(frequency.to_string()))?;

        let limiter = self.limiters.entry(upstream.name()).or_default();
        limiter.throttle(upstream.min_request_interval());

        let start = Utc.timestamp_opt(gap_start, 0).single().unwrap_or(Utc::now());
        let end = Utc.timestamp_opt(gap_end, 0).single().unwrap_or(start);

        let raw = match upstream.fetch(ticker, start, end, fetch_interval) {
            Ok(bars) => bars,
            Err(err) => {
                warn!(ticker = %ticker, source, error = %err, "upstream fetch failed, treating as empty range");
                Vec::new()
            }
        };

        let mut bars = if aggregate_count > 1 {
            aggregate_bars(&raw, aggregate_count as usize, frequency)
        } else {
            raw
        };

        validate_batch(&mut bars, self.price_jump_threshold);
        debug!(ticker = %ticker, fetched = bars.len(), "storing freshly fetched bars");
        self.store.insert_ignore_conflict(&bars);

        Ok(())
    }
}

/// One row of the on-disk CSV bar format: RFC 3339 timestamp, frequency in the `{1m,...,1M}`
/// alphabet, and the five OHLCV columns, in that order. Column headers match the field names.
#[derive(Debug, Deserialize)]
struct CsvBarRow {
    ticker: String,
    timestamp: String,
    frequency: String,
    source: String,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    volume: f64,
}

/// Reads bars out of a CSV file at `file_path`, matching `load_csv_bars`'s reader setup
/// (headered, comma-delimited) but deserializing into [`CsvBarRow`] first so the timestamp and
/// frequency columns can be parsed into their typed forms rather than relied on to already match
/// [`Bar`]'s own (de)serialization.
pub fn load_csv_bars(file_path: &str) -> Result<Vec<Bar>, DataError> {
    let mut reader = csv::ReaderBuilder::new().has_headers(true).delimiter(b',').from_path(file_path)?;

    let mut bars = Vec::with_capacity(reader.records().size_hint().0);
    for result in reader.deserialize() {
        let row: CsvBarRow = result?;
        let timestamp = DateTime::parse_from_rfc3339(&row.timestamp)
            .map_err(|_| DataError::UpstreamFetch {
                ticker: row.ticker.clone(),
                reason: format!("unparseable timestamp '{}'", row.timestamp),
            })?
            .with_timezone(&Utc);
        let frequency = Frequency::parse(&row.frequency).ok_or_else(|| DataError::UnsupportedFrequency(row.frequency.clone()))?;

        bars.push(Bar {
            ticker: row.ticker,
            timestamp,
            frequency,
            ohlcv: Some(Ohlcv {
                open: row.open,
                high: row.high,
                low: row.low,
                close: row.close,
                volume: row.volume,
            }),
            source: row.source,
            created_at: Utc::now(),
        });
    }

    Ok(bars)
}

fn local_to_utc(tz: Tz, naive: NaiveDateTime) -> DateTime<Utc> {
    match tz.from_local_datetime(&naive) {
        chrono::LocalResult::Single(dt) => dt.with_timezone(&Utc),
        chrono::LocalResult::Ambiguous(earliest, _) => earliest.with_timezone(&Utc),
        chrono::LocalResult::None => Utc.from_utc_datetime(&naive),
    }
}

/// §4.1 step 3: tiles `[start, end]` into the caller's existing timestamps plus the gaps
/// between/around them, at `step` spacing.
pub fn missing_ranges(existing: &[i64], start: i64, end: i64, step: i64) -> Vec<(i64, i64)> {
    if existing.is_empty() {
        return vec![(start, end)];
    }

    let mut gaps = Vec::new();
    if existing[0] > start {
        gaps.push((start, existing[0] - step));
    }
    for pair in existing.windows(2) {
        let gap = pair[1] - pair[0];
        if gap > step {
            gaps.push((pair[0] + step, pair[1] - step));
        }
    }
    if *existing.last().unwrap() < end {
        gaps.push((existing.last().unwrap() + step, end));
    }
    gaps
}

/// §4.1 step 4 / §11: the largest upstream-supported interval strictly below `target` that
/// evenly divides it, paired with the aggregation count. Returns `(target, 1)` if `target`
/// itself is directly servable.
pub fn best_upstream_interval(target: Frequency, supported: &[Frequency]) -> Option<(Frequency, u32)> {
    if supported.contains(&target) {
        return Some((target, 1));
    }

    let target_secs = target.as_seconds();
    let mut best: Option<Frequency> = None;
    for &candidate in supported {
        let candidate_secs = candidate.as_seconds();
        if candidate_secs < target_secs && target_secs % candidate_secs == 0 {
            let improves = best.map(|b| candidate_secs > b.as_seconds()).unwrap_or(true);
            if improves {
                best = Some(candidate);
            }
        }
    }

    best.map(|b| (b, (target_secs / b.as_seconds()) as u32))
}

/// §4.1 step 4: aggregates adjacent groups of `n` bars into one at `target_frequency`. Trailing
/// partial groups are discarded.
pub fn aggregate_bars(bars: &[Bar], n: usize, target_frequency: Frequency) -> Vec<Bar> {
    if n == 0 {
        return Vec::new();
    }

    bars.chunks(n)
        .filter(|group| group.len() == n)
        .filter_map(|group| {
            let first = group.first()?;
            let last = group.last()?;
            let first_ohlcv = first.ohlcv?;
            let last_ohlcv = last.ohlcv?;

            let high = group.iter().filter_map(|b| b.ohlcv.map(|o| o.high)).fold(f64::MIN, f64::max);
            let low = group.iter().filter_map(|b| b.ohlcv.map(|o| o.low)).fold(f64::MAX, f64::min);
            let volume: f64 = group.iter().filter_map(|b| b.ohlcv.map(|o| o.volume)).sum();

            Some(Bar {
                ticker: first.ticker.clone(),
                timestamp: first.timestamp,
                frequency: target_frequency,
                ohlcv: Some(Ohlcv {
                    open: first_ohlcv.open,
                    high,
                    low,
                    close: last_ohlcv.close,
                    volume,
                }),
                source: first.source.clone(),
                created_at: first.created_at,
            })
        })
        .collect()
}

/// §4.1 "Validation": invalidates bars that violate the OHLCV invariants and logs a warning on
/// any overnight/inter-bar price jump beyond `threshold`.
pub fn validate_batch(bars: &mut [Bar], threshold: f64) {
    let mut prev_close: Option<f64> = None;

    for bar in bars.iter_mut() {
        if let Some(ohlcv) = bar.ohlcv {
            if !ohlcv.is_valid() {
                warn!(ticker = %bar.ticker, timestamp = %bar.timestamp, "invalidating bar failing OHLCV invariants");
                bar.invalidate();
            }
        }

        if let (Some(prev), Some(ohlcv)) = (prev_close, bar.ohlcv) {
            let change = (ohlcv.open - prev).abs() / prev;
            if change > threshold {
                warn!(
                    ticker = %bar.ticker,
                    timestamp = %bar.timestamp,
                    prev_close = prev,
                    open = ohlcv.open,
                    change_pct = change * 100.0,
                    "price jump detected"
                );
            }
        }

        if let Some(ohlcv) = bar.ohlcv {
            prev_close = Some(ohlcv.close);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bar::FrequencyUnit;

    fn bar(ticker: &str, ts: i64, frequency: Frequency, ohlcv: Ohlcv) -> Bar {
        Bar {
            ticker: ticker.to_string(),
            timestamp: Utc.timestamp_opt(ts, 0).unwrap(),
            frequency,
            ohlcv: Some(ohlcv),
            source: "stock".to_string(),
            created_at: Utc::now(),
        }
    }

    fn ohlcv(open: f64, high: f64, low: f64, close: f64, volume: f64) -> Ohlcv {
        Ohlcv { open, high, low, close, volume }
    }

    #[test]
    fn should_tile_missing_ranges_around_existing_timestamps() {
        let existing = [100, 200, 400];
        let gaps = missing_ranges(&existing, 0, 600, 100);
        assert_eq!(gaps, vec![(0, 0), (300, 300), (500, 600)]);
    }

    #[test]
    fn should_return_single_range_when_nothing_cached() {
        let gaps = missing_ranges(&[], 0, 600, 100);
        assert_eq!(gaps, vec![(0, 600)]);
    }

    #[test]
    fn should_select_exact_interval_when_directly_supported() {
        let one_hour = Frequency::new(1, FrequencyUnit::Hour);
        let supported = [Frequency::new(1, FrequencyUnit::Minute), one_hour];
        assert_eq!(best_upstream_interval(one_hour, &supported), Some((one_hour, 1)));
    }

    #[test]
    fn should_select_largest_dividing_interval_when_not_directly_supported() {
        let one_hour = Frequency::new(1, FrequencyUnit::Hour);
        let supported = [
            Frequency::new(1, FrequencyUnit::Minute),
            Frequency::new(15, FrequencyUnit::Minute),
            Frequency::new(30, FrequencyUnit::Minute),
        ];
        let (chosen, count) = best_upstream_interval(one_hour, &supported).unwrap();
        assert_eq!(chosen, Frequency::new(30, FrequencyUnit::Minute));
        assert_eq!(count, 2);
    }

    #[test]
    fn should_report_no_interval_when_nothing_divides_evenly() {
        let one_hour = Frequency::new(1, FrequencyUnit::Hour);
        let supported = [Frequency::new(13, FrequencyUnit::Minute)];
        assert_eq!(best_upstream_interval(one_hour, &supported), None);
    }

    #[test]
    fn should_aggregate_n_bars_dropping_trailing_partial_group() {
        let freq = Frequency::new(1, FrequencyUnit::Minute);
        let out_freq = Frequency::new(5, FrequencyUnit::Minute);
        let bars: Vec<Bar> = (0..12)
            .map(|i| bar("AAPL", i * 60, freq, ohlcv(100.0 + i as f64, 101.0 + i as f64, 99.0, 100.5, 10.0)))
            .collect();

        let aggregated = aggregate_bars(&bars, 5, out_freq);

        assert_eq!(aggregated.len(), 2);
        assert_eq!(aggregated[0].open(), Some(100.0));
        assert_eq!(aggregated[0].close(), Some(bars[4].ohlcv.unwrap().close));
        assert_eq!(aggregated[0].volume(), Some(50.0));
    }

    #[test]
    fn should_invalidate_bar_violating_ohlcv_invariants() {
        let mut bars = vec![bar("AAPL", 0, Frequency::new(1, FrequencyUnit::Day), ohlcv(10.0, 5.0, 20.0, 10.0, 1.0))];
        validate_batch(&mut bars, 0.5);
        assert!(bars[0].ohlcv.is_none());
    }

    #[test]
    fn should_store_and_read_back_idempotently() {
        let mut store = InMemoryCacheStore::new();
        let freq = Frequency::new(1, FrequencyUnit::Day);
        let bars = vec![bar("AAPL", 0, freq, ohlcv(10.0, 11.0, 9.0, 10.5, 100.0))];

        store.insert_ignore_conflict(&bars);
        store.insert_ignore_conflict(&bars);

        assert_eq!(store.len(), 1);
        assert_eq!(store.read_range("AAPL", freq, 0, 0).len(), 1);
    }

    #[test]
    fn should_replay_cached_bars_with_localized_datetime() {
        let mut store = InMemoryCacheStore::new();
        let freq = Frequency::new(1, FrequencyUnit::Day);
        store.insert_ignore_conflict(&[bar("AAPL", 0, freq, ohlcv(10.0, 11.0, 9.0, 10.5, 100.0))]);

        let mut loader = DataLoader::new(store);
        let rows = loader
            .get_historical_data(
                &["AAPL".to_string()],
                Utc.timestamp_opt(0, 0).unwrap().naive_utc(),
                Utc.timestamp_opt(0, 0).unwrap().naive_utc(),
                freq,
                chrono_tz::UTC,
                "stock",
            )
            .unwrap();

        assert_eq!(rows.len(), 1);
        assert!(rows[0].datetime_local.starts_with("1970-01-01"));
    }

    #[test]
    fn should_reject_inverted_range() {
        let mut loader = DataLoader::new(InMemoryCacheStore::new());
        let freq = Frequency::new(1, FrequencyUnit::Day);
        let result = loader.get_historical_data(
            &["AAPL".to_string()],
            Utc.timestamp_opt(1_000, 0).unwrap().naive_utc(),
            Utc.timestamp_opt(0, 0).unwrap().naive_utc(),
            freq,
            chrono_tz::UTC,
            "stock",
        );
        assert!(matches!(result, Err(DataError::InvalidRange { .. })));
    }

    #[test]
    fn should_load_bars_from_a_csv_fixture() {
        let path = std::env::temp_dir().join("marketreplay_test_should_load_bars_from_a_csv_fixture.csv");
        std::fs::write(
            &path,
            "ticker,timestamp,frequency,source,open,high,low,close,volume\n\
             AAPL,1970-01-01T00:00:00Z,1d,stock,10.0,11.0,9.0,10.5,100.0\n\
             AAPL,1970-01-02T00:00:00Z,1d,stock,10.5,12.0,10.0,11.5,120.0\n",
        )
        .unwrap();

        let bars = load_csv_bars(path.to_str().unwrap()).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(bars.len(), 2);
        assert_eq!(bars[0].ticker, "AAPL");
        assert_eq!(bars[0].frequency, Frequency::new(1, FrequencyUnit::Day));
        assert_eq!(bars[0].close(), Some(10.5));
        assert_eq!(bars[1].open(), Some(10.5));
    }

    #[test]
    fn should_fail_on_an_unparseable_frequency_column() {
        let path = std::env::temp_dir().join("marketreplay_test_should_fail_on_an_unparseable_frequency_column.csv");
        std::fs::write(
            &path,
            "ticker,timestamp,frequency,source,open,high,low,close,volume\n\
             AAPL,1970-01-01T00:00:00Z,banana,stock,10.0,11.0,9.0,10.5,100.0\n",
        )
        .unwrap();

        let result = load_csv_bars(path.to_str().unwrap());
        std::fs::remove_file(&path).ok();

        assert!(matches!(result, Err(DataError::UnsupportedFrequency(_))));
    }
}
