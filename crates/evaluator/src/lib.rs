pub mod config;
pub mod evaluator;
pub mod message;
pub mod price;
pub mod runner;
pub mod schedule;
pub mod transition;

pub use config::{AlertFile, AlertFileConfig};
pub use evaluator::AlertEvaluator;
pub use message::{format_notification, format_price_notification, format_ratio_notification};
pub use price::{PriceAlertEvaluator, PriceDecision};
pub use runner::{AlertRunner, PassSummary};
pub use schedule::SchedulingGate;
pub use transition::classify;
