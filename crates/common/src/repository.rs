use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{AlertDefinition, Candle, PriceAlert, Result, Timeframe};

/// Durable candle storage keyed by `(symbol, timeframe, open_time)`.
#[async_trait]
pub trait CandleBackingStore: Send + Sync {
    /// Newest `limit` candles (all when `None`), returned oldest first.
    async fn query(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        limit: Option<usize>,
    ) -> Result<Vec<Candle>>;

    /// Insert or overwrite the candle at its natural key.
    async fn upsert(&self, candle: &Candle) -> Result<()>;

    /// Delete candles opening before `cutoff`. Returns the number removed.
    async fn delete_before(&self, cutoff: DateTime<Utc>) -> Result<u64>;
}

/// Read access to alert definitions, owned by an external store.
#[async_trait]
pub trait AlertRepository: Send + Sync {
    async fn list_enabled(&self) -> Result<Vec<AlertDefinition>>;

    /// Record when an alert last fired. Does not disable the alert.
    async fn mark_triggered(&self, id: &str, at: DateTime<Utc>) -> Result<()>;
}

/// One-shot price and ratio alerts.
#[async_trait]
pub trait PriceAlertRepository: Send + Sync {
    /// Alerts that have not fired yet.
    async fn list_pending(&self) -> Result<Vec<PriceAlert>>;

    /// Record the firing; the alert is no longer pending afterwards.
    async fn mark_fired(&self, id: &str, at: DateTime<Utc>) -> Result<()>;
}
