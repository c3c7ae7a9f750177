pub mod engine;
pub mod rsi;

pub use engine::{reading_from_series, IndicatorEngine};
pub use rsi::{calculate, RsiIndicator, RsiState};
