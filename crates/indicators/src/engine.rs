use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use common::{CandleSeries, IndicatorReading, RsiConfig, Trend, Zone};
use store::CandleStore;

use crate::RsiState;

/// Produces RSI readings for a `(symbol, timeframe)` partition, refreshing the
/// candle cache first.
#[derive(Clone)]
pub struct IndicatorEngine {
    store: Arc<CandleStore>,
}

impl IndicatorEngine {
    pub fn new(store: Arc<CandleStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<CandleStore> {
        &self.store
    }

    /// Current and previous RSI for `symbol` at `config.timeframe`, over
    /// candles that had closed by `now`.
    ///
    /// `None` when the partition cannot be made fresh or holds fewer than
    /// `period + 1` closes.
    pub async fn reading(
        &self,
        symbol: &str,
        config: &RsiConfig,
        now: DateTime<Utc>,
    ) -> Option<IndicatorReading> {
        let timeframe = config.timeframe;
        let required = config.required_candles();

        if !self.store.ensure_fresh_at(symbol, timeframe, required, now).await {
            debug!(%symbol, %timeframe, required, "No fresh data, skipping reading");
            return None;
        }

        let series = self.store.get_closed(symbol, timeframe, required, now).await;
        let Some(reading) = reading_from_series(&series, config) else {
            warn!(
                %symbol,
                %timeframe,
                candles = series.len(),
                period = config.period,
                "Insufficient data for RSI"
            );
            return None;
        };

        info!(
            %symbol,
            %timeframe,
            value = format_args!("{:.2}", reading.value),
            previous = ?reading.previous_value.map(|v| (v * 100.0).round() / 100.0),
            zone = %reading.zone,
            trend = %reading.trend,
            overbought = config.overbought_level,
            oversold = config.oversold_level,
            "RSI reading"
        );
        Some(reading)
    }
}

/// Reading over the closes of `series`, oldest first.
///
/// The previous value is the RSI with the newest close left out, so it needs
/// `period + 2` closes; with exactly `period + 1` it is `None`.
pub fn reading_from_series(series: &CandleSeries, config: &RsiConfig) -> Option<IndicatorReading> {
    let closes = series.closes();
    let (&last_close, head) = closes.split_last()?;
    if closes.iter().any(|c| !c.is_finite()) {
        return None;
    }

    let mut state = RsiState::from_closes(config.period, head);
    let previous_value = state.value();
    let value = state.push(last_close)?;

    let newest = series.last()?;
    let previous_close_time = previous_value
        .and_then(|_| series.candles.len().checked_sub(2))
        .map(|i| series.candles[i].close_time());

    Some(IndicatorReading {
        value,
        previous_value,
        trend: Trend::between(previous_value, value),
        zone: Zone::classify(value, config.overbought_level, config.oversold_level),
        close_time: Some(newest.close_time()),
        previous_close_time,
        last_close,
    })
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use common::{Candle, Timeframe};

    use super::*;
    use crate::calculate;

    fn series(closes: &[f64]) -> CandleSeries {
        let candles = closes
            .iter()
            .enumerate()
            .map(|(i, &close)| Candle {
                symbol: "BTC".into(),
                timeframe: Timeframe::Hour1,
                open_time: DateTime::from_timestamp(0, 0).unwrap() + Duration::hours(i as i64),
                open: close,
                high: close,
                low: close,
                close,
                volume: 1.0,
            })
            .collect();
        CandleSeries::new("BTC", Timeframe::Hour1, candles)
    }

    fn config(period: usize) -> RsiConfig {
        RsiConfig {
            period,
            timeframe: Timeframe::Hour1,
            ..RsiConfig::default()
        }
    }

    #[test]
    fn previous_value_is_rsi_without_newest_close() {
        let closes: Vec<f64> = (0..25).map(|i| 100.0 + ((i * 13) % 7) as f64 - 3.0).collect();
        let reading = reading_from_series(&series(&closes), &config(14)).unwrap();

        let value = calculate(&closes, 14).unwrap();
        let previous = calculate(&closes[..closes.len() - 1], 14).unwrap();
        assert!((reading.value - value).abs() < 1e-9);
        assert!((reading.previous_value.unwrap() - previous).abs() < 1e-9);
        assert_eq!(reading.last_close, *closes.last().unwrap());
    }

    #[test]
    fn exactly_period_plus_one_has_no_previous() {
        let closes: Vec<f64> = (0..15).map(|i| 100.0 + i as f64).collect();
        let reading = reading_from_series(&series(&closes), &config(14)).unwrap();
        assert_eq!(reading.value, 100.0);
        assert_eq!(reading.previous_value, None);
        assert_eq!(reading.previous_close_time, None);
        assert_eq!(reading.trend, Trend::Neutral);
        assert_eq!(reading.zone, Zone::Overbought);
    }

    #[test]
    fn too_short_series_has_no_reading() {
        let closes = vec![100.0; 14];
        assert!(reading_from_series(&series(&closes), &config(14)).is_none());
        assert!(reading_from_series(&series(&[]), &config(14)).is_none());
    }

    #[test]
    fn sharp_drop_reads_falling() {
        let mut closes = vec![100.0];
        for i in 0..20 {
            let step = if i % 2 == 0 { 1.0 } else { -0.5 };
            closes.push(closes.last().unwrap() + step);
        }
        closes.push(closes.last().unwrap() - 5.0);

        let reading = reading_from_series(&series(&closes), &config(14)).unwrap();
        assert!(reading.previous_value.unwrap() > reading.value + 1.0);
        assert_eq!(reading.trend, Trend::Falling);
        assert_eq!(reading.zone, Zone::Neutral);
    }

    #[test]
    fn steady_decline_reads_oversold() {
        let closes: Vec<f64> = (0..30).map(|i| 200.0 - i as f64 * 2.0).collect();
        let reading = reading_from_series(&series(&closes), &config(14)).unwrap();
        assert_eq!(reading.value, 0.0);
        assert_eq!(reading.zone, Zone::Oversold);
    }

    #[test]
    fn close_times_come_from_last_two_candles() {
        let closes: Vec<f64> = (0..20).map(|i| 100.0 + i as f64).collect();
        let s = series(&closes);
        let reading = reading_from_series(&s, &config(14)).unwrap();
        assert_eq!(reading.close_time, Some(s.candles[19].close_time()));
        assert_eq!(reading.previous_close_time, Some(s.candles[18].close_time()));
    }
}
