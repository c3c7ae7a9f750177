use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use common::{Candle, CandleBackingStore, Result, Timeframe};

type Partition = BTreeMap<DateTime<Utc>, Candle>;

/// Process-local backing store. Used by tests and when no database is wanted.
#[derive(Default)]
pub struct MemoryCandleStore {
    partitions: RwLock<HashMap<(String, Timeframe), Partition>>,
    /// Number of `upsert` calls that reached the store.
    writes: AtomicUsize,
}

impl MemoryCandleStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl CandleBackingStore for MemoryCandleStore {
    async fn query(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        limit: Option<usize>,
    ) -> Result<Vec<Candle>> {
        let partitions = self.partitions.read().await;
        let Some(partition) = partitions.get(&(symbol.to_string(), timeframe)) else {
            return Ok(Vec::new());
        };
        let skip = limit.map_or(0, |n| partition.len().saturating_sub(n));
        Ok(partition.values().skip(skip).cloned().collect())
    }

    async fn upsert(&self, candle: &Candle) -> Result<()> {
        self.writes.fetch_add(1, Ordering::Relaxed);
        self.partitions
            .write()
            .await
            .entry((candle.symbol.clone(), candle.timeframe))
            .or_default()
            .insert(candle.open_time, candle.clone());
        Ok(())
    }

    async fn delete_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let mut partitions = self.partitions.write().await;
        let mut removed = 0u64;
        for partition in partitions.values_mut() {
            let kept = partition.split_off(&cutoff);
            removed += partition.len() as u64;
            *partition = kept;
        }
        partitions.retain(|_, p| !p.is_empty());
        Ok(removed)
    }
}
