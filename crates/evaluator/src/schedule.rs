use chrono::{DateTime, Utc};

use common::Timeframe;

/// Decides whether a timeframe is worth recomputing right now.
///
/// RSI on a closed candle cannot move between boundaries, so evaluation runs
/// only in the first minutes after each boundary. Timeframes of five minutes
/// or less, and `1M`, are always due.
#[derive(Debug, Clone, Copy)]
pub struct SchedulingGate {
    /// Minutes after a boundary during which the timeframe is due.
    pub window_minutes: i64,
}

impl Default for SchedulingGate {
    fn default() -> Self {
        Self { window_minutes: 5 }
    }
}

impl SchedulingGate {
    pub fn should_evaluate(&self, timeframe: Timeframe, now: DateTime<Utc>) -> bool {
        let Some(minutes) = timeframe.minutes() else {
            return true;
        };
        if minutes <= 5 {
            return true;
        }
        let minutes_since_epoch = now.timestamp().div_euclid(60);
        minutes_since_epoch.rem_euclid(minutes) <= self.window_minutes
    }
}
