pub mod config;
pub mod error;
pub mod gateway;
pub mod notify;
pub mod repository;
pub mod timeframe;
pub mod types;

pub use config::Config;
pub use error::{Error, Result};
pub use gateway::MarketDataGateway;
pub use notify::{LoggingSink, NotificationSink};
pub use repository::{AlertRepository, CandleBackingStore, PriceAlertRepository};
pub use timeframe::Timeframe;
pub use types::*;
