use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tokio::time::{timeout, Instant};
use tracing::{debug, info, warn};

use common::{Candle, CandleBackingStore, CandleSeries, Error, MarketDataGateway, Result, Timeframe};

/// Tunables for caching, deduplication and I/O bounds.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// How long a memoised latest candle is served without a store read.
    pub memo_ttl: Duration,
    /// Identical writes of the same candle inside this window are skipped.
    pub dedup_window: Duration,
    /// Dedup map size that triggers garbage collection.
    pub dedup_capacity: usize,
    /// Maximum age of a cached or stored price for `latest_price` to use it.
    /// A closed candle's price dates from its close; a candle written while
    /// still forming dates from the moment it was written.
    pub store_price_max_age: chrono::Duration,
    /// Upper bound on every gateway call and backing store operation.
    pub io_timeout: Duration,
    /// Smallest backfill request.
    pub min_backfill: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            memo_ttl: Duration::from_secs(5 * 60),
            dedup_window: Duration::from_secs(60),
            dedup_capacity: 1000,
            store_price_max_age: chrono::Duration::minutes(10),
            io_timeout: Duration::from_secs(10),
            min_backfill: 100,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PriceSource {
    Memo,
    Store,
    Live,
}

impl std::fmt::Display for PriceSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PriceSource::Memo => write!(f, "memo"),
            PriceSource::Store => write!(f, "store"),
            PriceSource::Live => write!(f, "live"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LatestPrice {
    pub price: f64,
    pub candle: Candle,
    pub source: PriceSource,
}

struct MemoEntry {
    candle: Candle,
    cached_at: Instant,
}

struct DedupEntry {
    candle: Candle,
    written_at: Instant,
}

/// `(symbol, timeframe, open_time in whole minutes)`
type DedupKey = (String, Timeframe, i64);

/// `(symbol, timeframe, open_time)` of a candle written before it closed.
type ProvisionalKey = (String, Timeframe, DateTime<Utc>);

/// Keeps a freshness-bounded window of candles per `(symbol, timeframe)`.
///
/// Reads go to the backing store; the gateway is only called when a partition
/// is short or stale. Cache state is advisory: losing it costs extra I/O, never
/// correctness, because every write is an idempotent upsert on the natural key.
///
/// Backfills only store closed candles. Candles written while still forming
/// (the live price, the single-candle fallback) are remembered as provisional
/// with the time they were observed, so a snapshot is never mistaken for the
/// final candle once its period ends.
pub struct CandleStore {
    backing: Arc<dyn CandleBackingStore>,
    gateway: Arc<dyn MarketDataGateway>,
    config: StoreConfig,
    memo: Mutex<HashMap<(String, Timeframe), MemoEntry>>,
    dedup: Mutex<HashMap<DedupKey, DedupEntry>>,
    provisional: Mutex<HashMap<ProvisionalKey, DateTime<Utc>>>,
}

impl CandleStore {
    pub fn new(
        backing: Arc<dyn CandleBackingStore>,
        gateway: Arc<dyn MarketDataGateway>,
        config: StoreConfig,
    ) -> Self {
        Self {
            backing,
            gateway,
            config,
            memo: Mutex::new(HashMap::new()),
            dedup: Mutex::new(HashMap::new()),
            provisional: Mutex::new(HashMap::new()),
        }
    }

    /// Up to `count` most recent candles, oldest first. A store failure yields
    /// an empty series.
    pub async fn get_recent(&self, symbol: &str, timeframe: Timeframe, count: usize) -> CandleSeries {
        match self
            .bounded("candle query", self.backing.query(symbol, timeframe, Some(count)))
            .await
            .and_then(|r| r)
        {
            Ok(candles) => {
                let series = CandleSeries::new(symbol, timeframe, candles);
                if let Some(last) = series.last() {
                    self.remember(last).await;
                }
                series
            }
            Err(e) => {
                warn!(%symbol, %timeframe, error = %e, "Failed to read candles");
                CandleSeries::empty(symbol, timeframe)
            }
        }
    }

    /// Up to `count` most recent candles that had closed by `now`, oldest first.
    pub async fn get_closed(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        count: usize,
        now: DateTime<Utc>,
    ) -> CandleSeries {
        // At most one candle per partition can still be forming.
        let mut series = self.get_recent(symbol, timeframe, count + 1).await;
        series.candles.retain(|c| c.close_time() <= now);
        series.truncate_front(count);
        series
    }

    pub async fn ensure_fresh(&self, symbol: &str, timeframe: Timeframe, required: usize) -> bool {
        self.ensure_fresh_at(symbol, timeframe, required, Utc::now()).await
    }

    /// True when at least `required` closed candles are stored and the newest
    /// closed within the timeframe's freshness window of `now`.
    ///
    /// The gateway is asked for a backfill unless the stored data already
    /// holds the final candle of the period that most recently ended. After
    /// the backfill the freshness window alone decides, so an upstream that
    /// lags by a candle still yields a reading.
    pub async fn ensure_fresh_at(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        required: usize,
        now: DateTime<Utc>,
    ) -> bool {
        let existing = self.get_closed(symbol, timeframe, required, now).await;
        if is_sufficient(&existing, required, now) && self.is_up_to_date(&existing, now).await {
            return true;
        }

        let limit = (required * 2).max(self.config.min_backfill);
        debug!(
            %symbol,
            %timeframe,
            have = existing.len(),
            required,
            limit,
            "Partition short or stale, backfilling"
        );

        let fetched = match timeout(
            self.config.io_timeout,
            self.gateway.historical(symbol, timeframe, limit),
        )
        .await
        {
            Ok(candles) => candles,
            Err(_) => {
                warn!(%symbol, %timeframe, "Historical fetch timed out");
                return false;
            }
        };

        if fetched.is_empty() {
            self.store_current_fallback(symbol, timeframe, now).await;
        } else {
            let (mut stored, mut forming) = (0usize, 0usize);
            for candle in fetched {
                if candle.close_time() > now {
                    forming += 1;
                    continue;
                }
                let candle = Candle {
                    symbol: symbol.to_string(),
                    timeframe,
                    ..candle
                };
                match self.upsert_at(&candle, now).await {
                    Ok(()) => stored += 1,
                    Err(e) => warn!(%symbol, %timeframe, error = %e, "Failed to store candle"),
                }
            }
            debug!(%symbol, %timeframe, stored, forming, "Backfill stored");
        }

        let refreshed = self.get_closed(symbol, timeframe, required, now).await;
        let fresh = is_sufficient(&refreshed, required, now);
        if !fresh {
            warn!(
                %symbol,
                %timeframe,
                have = refreshed.len(),
                required,
                "Insufficient or stale data after backfill"
            );
        }
        fresh
    }

    /// Store the live candle as the current period's candle when history is unavailable.
    async fn store_current_fallback(&self, symbol: &str, timeframe: Timeframe, now: DateTime<Utc>) {
        let live = match timeout(self.config.io_timeout, self.gateway.current(symbol)).await {
            Ok(Some(candle)) => candle,
            Ok(None) => {
                warn!(%symbol, %timeframe, "No historical or current data available");
                return;
            }
            Err(_) => {
                warn!(%symbol, %timeframe, "Current price fetch timed out");
                return;
            }
        };
        let candle = Candle {
            symbol: symbol.to_string(),
            timeframe,
            open_time: timeframe.period_start(now),
            volume: 0.0,
            ..live
        };
        info!(%symbol, %timeframe, close = candle.close, "Stored single live candle as fallback");
        if let Err(e) = self.upsert_at(&candle, now).await {
            warn!(%symbol, %timeframe, error = %e, "Failed to store fallback candle");
        }
    }

    /// Idempotent write keyed by `(symbol, timeframe, open_time)`.
    ///
    /// An identical candle written inside the dedup window is acknowledged
    /// without touching the backing store.
    pub async fn upsert(&self, candle: &Candle) -> Result<()> {
        self.upsert_at(candle, Utc::now()).await
    }

    /// `upsert` observed at `now`: a candle that has not closed by `now` is
    /// recorded as provisional until a closed copy replaces it.
    pub async fn upsert_at(&self, candle: &Candle, now: DateTime<Utc>) -> Result<()> {
        self.observe(candle, now).await;

        let key: DedupKey = (
            candle.symbol.clone(),
            candle.timeframe,
            candle.open_time.timestamp().div_euclid(60),
        );
        let now = Instant::now();

        {
            let dedup = self.dedup.lock().await;
            if let Some(entry) = dedup.get(&key) {
                if now.duration_since(entry.written_at) < self.config.dedup_window
                    && entry.candle == *candle
                {
                    debug!(symbol = %candle.symbol, timeframe = %candle.timeframe, "Duplicate write skipped");
                    return Ok(());
                }
            }
        }

        self.bounded("candle upsert", self.backing.upsert(candle)).await??;

        let mut dedup = self.dedup.lock().await;
        dedup.insert(
            key,
            DedupEntry {
                candle: candle.clone(),
                written_at: now,
            },
        );
        if dedup.len() > self.config.dedup_capacity {
            let horizon = self.config.dedup_window * 2;
            let before = dedup.len();
            dedup.retain(|_, e| now.duration_since(e.written_at) <= horizon);
            debug!(before, after = dedup.len(), "Dedup map collected");
        }
        drop(dedup);

        self.remember(candle).await;
        Ok(())
    }

    /// Newest candle for the partition, served from the memo while it is young.
    pub async fn latest(&self, symbol: &str, timeframe: Timeframe) -> Option<Candle> {
        self.latest_with_source(symbol, timeframe)
            .await
            .map(|(candle, _)| candle)
    }

    async fn latest_with_source(
        &self,
        symbol: &str,
        timeframe: Timeframe,
    ) -> Option<(Candle, PriceSource)> {
        if let Some(candle) = self.memoised(symbol, timeframe).await {
            return Some((candle, PriceSource::Memo));
        }
        self.get_recent(symbol, timeframe, 1)
            .await
            .candles
            .pop()
            .map(|c| (c, PriceSource::Store))
    }

    pub async fn latest_price(&self, symbol: &str, timeframe: Timeframe) -> Option<LatestPrice> {
        self.latest_price_at(symbol, timeframe, Utc::now()).await
    }

    /// Memo, then the store, then a live fetch that is stored on the way out.
    /// A memo or stored candle is only used while its price is younger than
    /// `store_price_max_age`. `None` when every source is unavailable.
    pub async fn latest_price_at(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        now: DateTime<Utc>,
    ) -> Option<LatestPrice> {
        if let Some((candle, source)) = self.latest_with_source(symbol, timeframe).await {
            let age = self.price_age(&candle, now).await;
            if age.is_some_and(|age| age <= self.config.store_price_max_age) {
                return Some(LatestPrice {
                    price: candle.close,
                    candle,
                    source,
                });
            }
            debug!(%symbol, %timeframe, %source, "Cached price too old, fetching live");
        }

        let live = match timeout(self.config.io_timeout, self.gateway.current(symbol)).await {
            Ok(Some(candle)) => candle,
            Ok(None) => {
                debug!(%symbol, "Live price unavailable");
                return None;
            }
            Err(_) => {
                warn!(%symbol, "Live price fetch timed out");
                return None;
            }
        };
        let live = Candle {
            symbol: symbol.to_string(),
            ..live
        };
        if let Err(e) = self.upsert_at(&live, now).await {
            warn!(%symbol, error = %e, "Failed to store live candle");
        }
        Some(LatestPrice {
            price: live.close,
            candle: live,
            source: PriceSource::Live,
        })
    }

    /// Delete candles opening more than `retention` ago. Returns rows removed.
    pub async fn prune_older_than(&self, retention: chrono::Duration) -> Result<u64> {
        self.prune_before(Utc::now() - retention).await
    }

    pub async fn prune_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let removed = self
            .bounded("candle prune", self.backing.delete_before(cutoff))
            .await??;
        self.memo
            .lock()
            .await
            .retain(|_, e| e.candle.open_time >= cutoff);
        self.dedup
            .lock()
            .await
            .retain(|_, e| e.candle.open_time >= cutoff);
        self.provisional
            .lock()
            .await
            .retain(|(_, _, open_time), _| *open_time >= cutoff);
        info!(removed, %cutoff, "Pruned old candles");
        Ok(removed)
    }

    async fn memoised(&self, symbol: &str, timeframe: Timeframe) -> Option<Candle> {
        let memo = self.memo.lock().await;
        memo.get(&(symbol.to_string(), timeframe))
            .filter(|e| e.cached_at.elapsed() < self.config.memo_ttl)
            .map(|e| e.candle.clone())
    }

    async fn remember(&self, candle: &Candle) {
        let mut memo = self.memo.lock().await;
        let key = (candle.symbol.clone(), candle.timeframe);
        let newer = memo
            .get(&key)
            .map_or(true, |e| candle.open_time >= e.candle.open_time);
        if newer {
            memo.insert(
                key,
                MemoEntry {
                    candle: candle.clone(),
                    cached_at: Instant::now(),
                },
            );
        }
    }

    async fn observe(&self, candle: &Candle, now: DateTime<Utc>) {
        let key = (candle.symbol.clone(), candle.timeframe, candle.open_time);
        let mut provisional = self.provisional.lock().await;
        if candle.close_time() > now {
            provisional.insert(key, now);
        } else {
            provisional.remove(&key);
        }
    }

    async fn observed_at(&self, candle: &Candle) -> Option<DateTime<Utc>> {
        let key = (candle.symbol.clone(), candle.timeframe, candle.open_time);
        self.provisional.lock().await.get(&key).copied()
    }

    /// Whether the newest closed candle is the final one of the period that
    /// ended most recently.
    async fn is_up_to_date(&self, series: &CandleSeries, now: DateTime<Utc>) -> bool {
        match series.last() {
            Some(last) => {
                last.close_time() >= series.timeframe.period_start(now)
                    && self.observed_at(last).await.is_none()
            }
            None => true,
        }
    }

    /// How old the candle's close price is at `now`. `None` when the candle is
    /// still forming and was not written by this store, so its age is unknown.
    async fn price_age(&self, candle: &Candle, now: DateTime<Utc>) -> Option<chrono::Duration> {
        if let Some(observed) = self.observed_at(candle).await {
            return Some(now - observed);
        }
        let close_time = candle.close_time();
        (close_time <= now).then(|| now - close_time)
    }

    async fn bounded<T>(&self, what: &str, fut: impl Future<Output = T>) -> Result<T> {
        timeout(self.config.io_timeout, fut)
            .await
            .map_err(|_| Error::Timeout(format!("{what} exceeded {:?}", self.config.io_timeout)))
    }

    #[cfg(test)]
    async fn dedup_len(&self) -> usize {
        self.dedup.lock().await.len()
    }
}

fn is_sufficient(series: &CandleSeries, required: usize, now: DateTime<Utc>) -> bool {
    if series.len() < required {
        return false;
    }
    match series.last() {
        Some(last) => now - last.close_time() <= series.timeframe.freshness_window(),
        None => required == 0,
    }
}
