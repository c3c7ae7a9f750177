use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, Duration, Months, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::Error;

const SECS_PER_DAY: i64 = 86_400;
/// 1969-12-29 was a Monday; weekly candles open on Monday 00:00 UTC.
const WEEK_ANCHOR_SECS: i64 = -3 * SECS_PER_DAY;

/// Candle bucket width. Labels follow the exchange convention (`1M` is one month).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Timeframe {
    #[serde(rename = "1m")]
    Min1,
    #[serde(rename = "3m")]
    Min3,
    #[serde(rename = "5m")]
    Min5,
    #[serde(rename = "15m")]
    Min15,
    #[serde(rename = "30m")]
    Min30,
    #[serde(rename = "1h")]
    Hour1,
    #[serde(rename = "2h")]
    Hour2,
    #[serde(rename = "4h")]
    Hour4,
    #[serde(rename = "6h")]
    Hour6,
    #[serde(rename = "8h")]
    Hour8,
    #[serde(rename = "12h")]
    Hour12,
    #[serde(rename = "1d")]
    Day1,
    #[serde(rename = "3d")]
    Day3,
    #[serde(rename = "1w")]
    Week1,
    #[serde(rename = "1M")]
    Month1,
}

impl Timeframe {
    pub const ALL: [Timeframe; 15] = [
        Timeframe::Min1,
        Timeframe::Min3,
        Timeframe::Min5,
        Timeframe::Min15,
        Timeframe::Min30,
        Timeframe::Hour1,
        Timeframe::Hour2,
        Timeframe::Hour4,
        Timeframe::Hour6,
        Timeframe::Hour8,
        Timeframe::Hour12,
        Timeframe::Day1,
        Timeframe::Day3,
        Timeframe::Week1,
        Timeframe::Month1,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Timeframe::Min1 => "1m",
            Timeframe::Min3 => "3m",
            Timeframe::Min5 => "5m",
            Timeframe::Min15 => "15m",
            Timeframe::Min30 => "30m",
            Timeframe::Hour1 => "1h",
            Timeframe::Hour2 => "2h",
            Timeframe::Hour4 => "4h",
            Timeframe::Hour6 => "6h",
            Timeframe::Hour8 => "8h",
            Timeframe::Hour12 => "12h",
            Timeframe::Day1 => "1d",
            Timeframe::Day3 => "3d",
            Timeframe::Week1 => "1w",
            Timeframe::Month1 => "1M",
        }
    }

    /// Fixed width in minutes. `None` for `1M`, whose width depends on the calendar.
    pub fn minutes(&self) -> Option<i64> {
        let minutes = match self {
            Timeframe::Min1 => 1,
            Timeframe::Min3 => 3,
            Timeframe::Min5 => 5,
            Timeframe::Min15 => 15,
            Timeframe::Min30 => 30,
            Timeframe::Hour1 => 60,
            Timeframe::Hour2 => 120,
            Timeframe::Hour4 => 240,
            Timeframe::Hour6 => 360,
            Timeframe::Hour8 => 480,
            Timeframe::Hour12 => 720,
            Timeframe::Day1 => 1_440,
            Timeframe::Day3 => 4_320,
            Timeframe::Week1 => 10_080,
            Timeframe::Month1 => return None,
        };
        Some(minutes)
    }

    /// Nominal period length. `1M` is approximated as 30 days.
    pub fn duration(&self) -> Duration {
        Duration::minutes(self.minutes().unwrap_or(30 * 1_440))
    }

    /// Maximum tolerated age of the newest candle's close before the
    /// partition counts as stale.
    pub fn freshness_window(&self) -> Duration {
        match self {
            Timeframe::Min1 => Duration::minutes(5),
            Timeframe::Min5 => Duration::minutes(15),
            Timeframe::Min15 => Duration::minutes(30),
            Timeframe::Hour1 => Duration::hours(2),
            Timeframe::Hour4 => Duration::hours(6),
            Timeframe::Day1 => Duration::hours(25),
            _ => Duration::hours(1),
        }
    }

    /// Start of the period containing `ts`.
    ///
    /// Intraday and daily buckets sit on the epoch grid, weekly buckets open on
    /// Monday and monthly buckets on the first of the month.
    pub fn period_start(&self, ts: DateTime<Utc>) -> DateTime<Utc> {
        let secs = ts.timestamp();
        let aligned = match self {
            Timeframe::Month1 => {
                return Utc
                    .with_ymd_and_hms(ts.year(), ts.month(), 1, 0, 0, 0)
                    .single()
                    .unwrap_or(ts);
            }
            Timeframe::Week1 => {
                let week = 7 * SECS_PER_DAY;
                (secs - WEEK_ANCHOR_SECS).div_euclid(week) * week + WEEK_ANCHOR_SECS
            }
            _ => {
                let width = self.duration().num_seconds();
                secs.div_euclid(width) * width
            }
        };
        DateTime::from_timestamp(aligned, 0).unwrap_or(ts)
    }

    /// Close time of the candle opening at `open_time`.
    pub fn close_time(&self, open_time: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            Timeframe::Month1 => open_time
                .checked_add_months(Months::new(1))
                .unwrap_or(open_time + self.duration()),
            _ => open_time + self.duration(),
        }
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Timeframe {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Timeframe::ALL
            .iter()
            .copied()
            .find(|tf| tf.as_str() == s)
            .ok_or_else(|| {
                let valid: Vec<&str> = Timeframe::ALL.iter().map(|tf| tf.as_str()).collect();
                Error::InvalidConfig(format!(
                    "invalid timeframe '{s}'. Valid options: {}",
                    valid.join(", ")
                ))
            })
    }
}
