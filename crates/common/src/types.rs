use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Error, Result, Timeframe};

/// One OHLCV bucket. `open_time` sits on the timeframe's period boundary and is
/// the natural key within a `(symbol, timeframe)` partition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub open_time: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Candle {
    pub fn close_time(&self) -> DateTime<Utc> {
        self.timeframe.close_time(self.open_time)
    }
}

/// Candles for one `(symbol, timeframe)`, ascending by `open_time`. May contain gaps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandleSeries {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub candles: Vec<Candle>,
}

impl CandleSeries {
    /// Build a series from candles in any order. Later duplicates of the same
    /// `open_time` replace earlier ones.
    pub fn new(symbol: impl Into<String>, timeframe: Timeframe, mut candles: Vec<Candle>) -> Self {
        candles.sort_by_key(|c| c.open_time);
        let mut deduped: Vec<Candle> = Vec::with_capacity(candles.len());
        for candle in candles {
            match deduped.last_mut() {
                Some(last) if last.open_time == candle.open_time => *last = candle,
                _ => deduped.push(candle),
            }
        }
        Self {
            symbol: symbol.into(),
            timeframe,
            candles: deduped,
        }
    }

    pub fn empty(symbol: impl Into<String>, timeframe: Timeframe) -> Self {
        Self::new(symbol, timeframe, Vec::new())
    }

    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }

    pub fn last(&self) -> Option<&Candle> {
        self.candles.last()
    }

    /// Closing prices, oldest first.
    pub fn closes(&self) -> Vec<f64> {
        self.candles.iter().map(|c| c.close).collect()
    }

    /// Keep only the newest `count` candles.
    pub fn truncate_front(&mut self, count: usize) {
        let excess = self.candles.len().saturating_sub(count);
        self.candles.drain(..excess);
    }
}

// ─── Alert definitions ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum IndicatorType {
    #[default]
    Rsi,
}

impl std::fmt::Display for IndicatorType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IndicatorType::Rsi => write!(f, "rsi"),
        }
    }
}

impl std::str::FromStr for IndicatorType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "rsi" => Ok(IndicatorType::Rsi),
            other => Err(Error::InvalidConfig(format!(
                "currently only 'rsi' indicator type is supported, got '{other}'"
            ))),
        }
    }
}

/// RSI alert parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RsiConfig {
    pub period: usize,
    pub overbought_level: f64,
    pub oversold_level: f64,
    pub timeframe: Timeframe,
}

impl Default for RsiConfig {
    fn default() -> Self {
        Self {
            period: 14,
            overbought_level: 70.0,
            oversold_level: 30.0,
            timeframe: Timeframe::Min5,
        }
    }
}

impl RsiConfig {
    /// Checked once when a definition is created or imported; the evaluator
    /// assumes every definition it sees has passed this.
    pub fn validate(&self) -> Result<()> {
        if self.period < 2 {
            return Err(Error::InvalidConfig("period must be an integer >= 2".into()));
        }
        if !(self.overbought_level > 0.0 && self.overbought_level <= 100.0) {
            return Err(Error::InvalidConfig(format!(
                "overbought level must be in (0, 100], got {}",
                self.overbought_level
            )));
        }
        if !(self.oversold_level >= 0.0 && self.oversold_level < 100.0) {
            return Err(Error::InvalidConfig(format!(
                "oversold level must be in [0, 100), got {}",
                self.oversold_level
            )));
        }
        if self.oversold_level >= self.overbought_level {
            return Err(Error::InvalidConfig(
                "oversold level must be less than overbought level".into(),
            ));
        }
        Ok(())
    }

    /// Candles requested per evaluation: the minimum plus a stability buffer.
    pub fn required_candles(&self) -> usize {
        self.period + 20
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertDefinition {
    pub id: String,
    pub symbol: String,
    pub indicator_type: IndicatorType,
    pub config: RsiConfig,
    pub enabled: bool,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_triggered_at: Option<DateTime<Utc>>,
}

// ─── Price alerts ────────────────────────────────────────────────────────────

/// Comparison between an alert level and a 5-minute candle's range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PriceOperator {
    /// The candle's high went above the level.
    #[serde(rename = ">")]
    Above,
    /// The candle's low went below the level.
    #[serde(rename = "<")]
    Below,
    /// The level lies inside the candle's range.
    #[serde(rename = "=")]
    Touches,
}

impl PriceOperator {
    pub fn as_str(&self) -> &'static str {
        match self {
            PriceOperator::Above => ">",
            PriceOperator::Below => "<",
            PriceOperator::Touches => "=",
        }
    }
}

impl std::fmt::Display for PriceOperator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PriceOperator {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            ">" => Ok(PriceOperator::Above),
            "<" => Ok(PriceOperator::Below),
            "=" => Ok(PriceOperator::Touches),
            other => Err(Error::InvalidConfig(format!(
                "operator must be one of '>', '<', '=', got '{other}'"
            ))),
        }
    }
}

/// What a price alert watches: one symbol, or the ratio of two.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum PriceTarget {
    Single { symbol: String },
    Ratio { symbol1: String, symbol2: String },
}

impl std::fmt::Display for PriceTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PriceTarget::Single { symbol } => f.write_str(symbol),
            PriceTarget::Ratio { symbol1, symbol2 } => write!(f, "{symbol1}/{symbol2}"),
        }
    }
}

/// A one-shot price level alert. Once `triggered_at` is set it no longer fires.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceAlert {
    pub id: String,
    pub target: PriceTarget,
    pub operator: PriceOperator,
    pub price: f64,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub triggered_at: Option<DateTime<Utc>>,
}

impl PriceAlert {
    pub fn validate(&self) -> Result<()> {
        if !(self.price.is_finite() && self.price > 0.0) {
            return Err(Error::InvalidConfig(format!(
                "price must be a positive number, got {}",
                self.price
            )));
        }
        match &self.target {
            PriceTarget::Single { symbol } if symbol.trim().is_empty() => {
                Err(Error::InvalidConfig("symbol is required".into()))
            }
            PriceTarget::Ratio { symbol1, symbol2 } => {
                if symbol1.trim().is_empty() || symbol2.trim().is_empty() {
                    return Err(Error::InvalidConfig(
                        "ratio alerts need both symbol1 and symbol2".into(),
                    ));
                }
                if symbol1.eq_ignore_ascii_case(symbol2) {
                    return Err(Error::InvalidConfig(format!(
                        "ratio of {symbol1} to itself is always 1"
                    )));
                }
                if self.operator == PriceOperator::Touches {
                    return Err(Error::InvalidConfig(
                        "ratio alerts support only '>' and '<'".into(),
                    ));
                }
                Ok(())
            }
            PriceTarget::Single { .. } => Ok(()),
        }
    }
}

// ─── Readings and decisions ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Rising,
    Falling,
    Neutral,
}

impl Trend {
    /// More than one point up is rising, more than one point down is falling.
    pub fn between(previous: Option<f64>, value: f64) -> Self {
        match previous.map(|p| value - p) {
            Some(diff) if diff > 1.0 => Trend::Rising,
            Some(diff) if diff < -1.0 => Trend::Falling,
            _ => Trend::Neutral,
        }
    }
}

impl std::fmt::Display for Trend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Trend::Rising => write!(f, "rising"),
            Trend::Falling => write!(f, "falling"),
            Trend::Neutral => write!(f, "neutral"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Zone {
    Overbought,
    Neutral,
    Oversold,
}

impl Zone {
    pub fn classify(value: f64, overbought_level: f64, oversold_level: f64) -> Self {
        if value >= overbought_level {
            Zone::Overbought
        } else if value <= oversold_level {
            Zone::Oversold
        } else {
            Zone::Neutral
        }
    }
}

impl std::fmt::Display for Zone {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Zone::Overbought => write!(f, "overbought"),
            Zone::Neutral => write!(f, "neutral"),
            Zone::Oversold => write!(f, "oversold"),
        }
    }
}

/// RSI value for the newest candle and the one before it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndicatorReading {
    pub value: f64,
    /// `None` when the series holds fewer than `period + 2` closes.
    pub previous_value: Option<f64>,
    pub trend: Trend,
    pub zone: Zone,
    pub close_time: Option<DateTime<Utc>>,
    pub previous_close_time: Option<DateTime<Utc>>,
    pub last_close: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionKind {
    None,
    CrossoverOverbought,
    CrossoverOversold,
    ExitOverbought,
    ExitOversold,
}

impl TransitionKind {
    pub fn is_trigger(&self) -> bool {
        !matches!(self, TransitionKind::None)
    }
}

impl std::fmt::Display for TransitionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TransitionKind::None => "none",
            TransitionKind::CrossoverOverbought => "crossover_overbought",
            TransitionKind::CrossoverOversold => "crossover_oversold",
            TransitionKind::ExitOverbought => "exit_overbought",
            TransitionKind::ExitOversold => "exit_oversold",
        };
        f.write_str(s)
    }
}

/// Outcome of evaluating one alert definition in one pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionDecision {
    pub alert_id: String,
    pub symbol: String,
    pub timeframe: Timeframe,
    pub triggered: bool,
    pub kind: TransitionKind,
    pub reading: Option<IndicatorReading>,
    /// Whether the notification sink accepted the message. Always false when
    /// not triggered.
    pub notified: bool,
}

impl TransitionDecision {
    pub fn untriggered(definition: &AlertDefinition) -> Self {
        Self {
            alert_id: definition.id.clone(),
            symbol: definition.symbol.clone(),
            timeframe: definition.config.timeframe,
            triggered: false,
            kind: TransitionKind::None,
            reading: None,
            notified: false,
        }
    }

    pub fn from_reading(
        definition: &AlertDefinition,
        kind: TransitionKind,
        reading: IndicatorReading,
    ) -> Self {
        Self {
            triggered: kind.is_trigger(),
            kind,
            reading: Some(reading),
            ..Self::untriggered(definition)
        }
    }
}
