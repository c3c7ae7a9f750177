use async_trait::async_trait;

use crate::{Candle, Timeframe};

/// Source of OHLCV rows for a symbol.
///
/// Implementations swallow their own failures: an unreachable venue, a bad
/// payload or a timeout yields an empty `Vec` / `None` and a log line, never an
/// error into the caller.
#[async_trait]
pub trait MarketDataGateway: Send + Sync {
    /// Up to `limit` historical candles. Ordering is not guaranteed; callers sort.
    async fn historical(&self, symbol: &str, timeframe: Timeframe, limit: usize) -> Vec<Candle>;

    /// The latest candle for `symbol`. Volume may be zero when the venue omits it.
    async fn current(&self, symbol: &str) -> Option<Candle>;
}
