//! Candle cache and durable storage.

pub mod candle_store;
pub mod memory;
pub mod sqlite;

pub use candle_store::{CandleStore, LatestPrice, PriceSource, StoreConfig};
pub use memory::MemoryCandleStore;
pub use sqlite::{connect, SqliteAlertRepository, SqliteCandleStore, MIGRATOR};
