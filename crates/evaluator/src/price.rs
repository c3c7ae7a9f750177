use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures_util::stream::{self, StreamExt};
use futures_util::FutureExt;
use tracing::{debug, info, warn};

use common::{Candle, NotificationSink, PriceAlert, PriceOperator, PriceTarget, Timeframe};
use store::CandleStore;

use crate::{format_price_notification, format_ratio_notification};

/// Outcome of checking one price alert in one pass.
#[derive(Debug, Clone, PartialEq)]
pub struct PriceDecision {
    pub alert_id: String,
    pub triggered: bool,
    pub notified: bool,
    /// Close price, or close-to-close ratio, seen this pass.
    pub observed: Option<f64>,
}

impl PriceDecision {
    fn untriggered(alert: &PriceAlert, observed: Option<f64>) -> Self {
        Self {
            alert_id: alert.id.clone(),
            triggered: false,
            notified: false,
            observed,
        }
    }
}

/// Whether the candle's range satisfies `operator` against `level`.
pub fn candle_meets(candle: &Candle, operator: PriceOperator, level: f64) -> bool {
    match operator {
        PriceOperator::Above => candle.high > level,
        PriceOperator::Below => candle.low < level,
        PriceOperator::Touches => candle.low <= level && level <= candle.high,
    }
}

/// Ratio check on the most extreme combination of the two ranges:
/// `high1 / low2` for `>`, `low1 / high2` for `<`. A zero divisor never fires.
pub fn ratio_meets(numerator: &Candle, denominator: &Candle, operator: PriceOperator, level: f64) -> bool {
    match operator {
        PriceOperator::Above => denominator.low != 0.0 && numerator.high / denominator.low > level,
        PriceOperator::Below => denominator.high != 0.0 && numerator.low / denominator.high < level,
        PriceOperator::Touches => false,
    }
}

/// Checks one-shot price and ratio alerts against the latest 5-minute candle
/// of each symbol.
#[derive(Clone)]
pub struct PriceAlertEvaluator {
    store: Arc<CandleStore>,
    sink: Arc<dyn NotificationSink>,
    concurrency: usize,
}

impl PriceAlertEvaluator {
    pub fn new(store: Arc<CandleStore>, sink: Arc<dyn NotificationSink>) -> Self {
        Self {
            store,
            sink,
            concurrency: 4,
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// One decision per alert that has not fired yet, in input order.
    pub async fn evaluate_batch(&self, alerts: &[PriceAlert], now: DateTime<Utc>) -> Vec<PriceDecision> {
        stream::iter(alerts.iter().filter(|a| a.triggered_at.is_none()))
            .map(|alert| self.evaluate(alert, now))
            .buffered(self.concurrency)
            .collect::<Vec<_>>()
            .boxed()
            .await
    }

    async fn evaluate(&self, alert: &PriceAlert, now: DateTime<Utc>) -> PriceDecision {
        let (observed, text) = match &alert.target {
            PriceTarget::Single { symbol } => {
                let Some(candle) = self.candle(symbol, now).await else {
                    return PriceDecision::untriggered(alert, None);
                };
                let text = candle_meets(&candle, alert.operator, alert.price)
                    .then(|| format_price_notification(alert, symbol, &candle));
                (Some(candle.close), text)
            }
            PriceTarget::Ratio { symbol1, symbol2 } => {
                let (first, second) = tokio::join!(self.candle(symbol1, now), self.candle(symbol2, now));
                let (Some(first), Some(second)) = (first, second) else {
                    return PriceDecision::untriggered(alert, None);
                };
                let ratio = (second.close != 0.0).then(|| first.close / second.close);
                if let Some(ratio) = ratio {
                    info!(
                        %symbol1,
                        %symbol2,
                        ratio = format_args!("{ratio:.4}"),
                        "Ratio observed"
                    );
                }
                let text = ratio_meets(&first, &second, alert.operator, alert.price).then(|| {
                    format_ratio_notification(alert, (symbol1.as_str(), &first), (symbol2.as_str(), &second))
                });
                (ratio, text)
            }
        };

        let Some(text) = text else {
            debug!(alert_id = %alert.id, subject = %alert.target, ?observed, "Price condition not met");
            return PriceDecision::untriggered(alert, observed);
        };

        info!(
            alert_id = %alert.id,
            subject = %alert.target,
            operator = %alert.operator,
            level = alert.price,
            ?observed,
            "Price alert triggered"
        );
        let notified = match self.sink.send(&text).await {
            Ok(()) => true,
            Err(e) => {
                warn!(alert_id = %alert.id, error = %e, "Failed to deliver price alert");
                false
            }
        };
        PriceDecision {
            alert_id: alert.id.clone(),
            triggered: true,
            notified,
            observed,
        }
    }

    async fn candle(&self, symbol: &str, now: DateTime<Utc>) -> Option<Candle> {
        let price = self.store.latest_price_at(symbol, Timeframe::Min5, now).await;
        if price.is_none() {
            debug!(%symbol, "No price available");
        }
        price.map(|p| p.candle)
    }
}
