use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures_util::stream::{self, StreamExt};
use futures_util::FutureExt;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use common::{AlertDefinition, NotificationSink, Timeframe, TransitionDecision, TransitionKind};
use indicators::IndicatorEngine;

use crate::{classify, format_notification, SchedulingGate};

/// Alerts sharing one `(symbol, timeframe)` partition, tagged with their
/// position in the input batch.
type Partition = Vec<(usize, AlertDefinition)>;

/// Transition kind and candle close time of an edge already reported.
type Edge = (TransitionKind, Option<DateTime<Utc>>);

/// Turns alert definitions into fire-once trigger decisions.
///
/// Partitions are evaluated concurrently, bounded by `concurrency`. Alerts
/// within a partition run one after another so the first one's backfill
/// serves the rest. Every alert runs in its own task: a panic costs that alert
/// its decision and nothing else.
///
/// An edge is reported once per process: re-evaluating the same candle data
/// in a later pass finds the same edge and does not trigger again.
#[derive(Clone)]
pub struct AlertEvaluator {
    engine: IndicatorEngine,
    sink: Arc<dyn NotificationSink>,
    gate: SchedulingGate,
    concurrency: usize,
    reported: Arc<Mutex<HashMap<String, Edge>>>,
}

impl AlertEvaluator {
    pub fn new(engine: IndicatorEngine, sink: Arc<dyn NotificationSink>) -> Self {
        Self {
            engine,
            sink,
            gate: SchedulingGate::default(),
            concurrency: 4,
            reported: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_gate(mut self, gate: SchedulingGate) -> Self {
        self.gate = gate;
        self
    }

    /// Evaluate every enabled definition whose timeframe is due at `now`.
    ///
    /// Returns one decision per evaluated definition, in input order. Disabled
    /// definitions and those in timeframes that are not due produce nothing.
    pub async fn evaluate_batch(
        &self,
        definitions: &[AlertDefinition],
        now: DateTime<Utc>,
    ) -> Vec<TransitionDecision> {
        let mut by_timeframe: BTreeMap<Timeframe, Vec<(usize, &AlertDefinition)>> = BTreeMap::new();
        for (idx, definition) in definitions.iter().enumerate().filter(|(_, d)| d.enabled) {
            by_timeframe
                .entry(definition.config.timeframe)
                .or_default()
                .push((idx, definition));
        }

        let mut partitions: BTreeMap<(String, Timeframe), Partition> = BTreeMap::new();
        for (timeframe, group) in by_timeframe {
            if !self.gate.should_evaluate(timeframe, now) {
                debug!(%timeframe, alerts = group.len(), "Timeframe not due, skipping");
                continue;
            }
            for (idx, definition) in group {
                partitions
                    .entry((definition.symbol.clone(), timeframe))
                    .or_default()
                    .push((idx, definition.clone()));
            }
        }

        let mut decisions: Vec<(usize, TransitionDecision)> = stream::iter(partitions.into_values())
            .map(|partition| self.evaluate_partition(partition, now))
            .buffer_unordered(self.concurrency)
            .collect::<Vec<_>>()
            .boxed()
            .await
            .into_iter()
            .flatten()
            .collect();

        decisions.sort_by_key(|(idx, _)| *idx);
        decisions.into_iter().map(|(_, d)| d).collect()
    }

    async fn evaluate_partition(
        &self,
        partition: Partition,
        now: DateTime<Utc>,
    ) -> Vec<(usize, TransitionDecision)> {
        let mut decisions = Vec::with_capacity(partition.len());
        for (idx, definition) in partition {
            let task = tokio::spawn(self.clone().evaluate_alert(definition.clone(), now));
            let decision = match task.await {
                Ok(decision) => decision,
                Err(e) => {
                    error!(
                        alert_id = %definition.id,
                        symbol = %definition.symbol,
                        error = %e,
                        "Alert evaluation aborted"
                    );
                    TransitionDecision::untriggered(&definition)
                }
            };
            decisions.push((idx, decision));
        }
        decisions
    }

    async fn evaluate_alert(self, definition: AlertDefinition, now: DateTime<Utc>) -> TransitionDecision {
        let config = &definition.config;
        let Some(reading) = self.engine.reading(&definition.symbol, config, now).await else {
            return TransitionDecision::untriggered(&definition);
        };

        let kind = classify(
            reading.previous_value,
            reading.value,
            config.overbought_level,
            config.oversold_level,
        );
        if !kind.is_trigger() {
            debug!(
                alert_id = %definition.id,
                symbol = %definition.symbol,
                value = reading.value,
                zone = %reading.zone,
                "No transition"
            );
            return TransitionDecision::from_reading(&definition, kind, reading);
        }

        let edge = (kind, reading.close_time);
        {
            let mut reported = self.reported.lock().await;
            if reported.get(&definition.id) == Some(&edge) {
                debug!(
                    alert_id = %definition.id,
                    symbol = %definition.symbol,
                    kind = %kind,
                    "Edge already reported"
                );
                return TransitionDecision {
                    triggered: false,
                    ..TransitionDecision::from_reading(&definition, kind, reading)
                };
            }
            reported.insert(definition.id.clone(), edge);
        }

        info!(
            alert_id = %definition.id,
            symbol = %definition.symbol,
            timeframe = %config.timeframe,
            kind = %kind,
            value = reading.value,
            previous = ?reading.previous_value,
            "RSI alert triggered"
        );

        let price = self
            .engine
            .store()
            .latest_price_at(&definition.symbol, config.timeframe, now)
            .await;
        let text = format_notification(&definition, kind, &reading, price.as_ref());

        let mut decision = TransitionDecision::from_reading(&definition, kind, reading);
        match self.sink.send(&text).await {
            Ok(()) => decision.notified = true,
            Err(e) => warn!(
                alert_id = %definition.id,
                symbol = %definition.symbol,
                error = %e,
                "Failed to deliver alert notification"
            ),
        }
        decision
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use chrono::{Duration, TimeZone};

    use common::{
        Candle, CandleBackingStore, Error, IndicatorType, MarketDataGateway, Result, RsiConfig,
        Zone,
    };
    use store::{CandleStore, MemoryCandleStore, StoreConfig};

    use super::*;

    struct EmptyGateway;

    #[async_trait]
    impl MarketDataGateway for EmptyGateway {
        async fn historical(&self, symbol: &str, _tf: Timeframe, _limit: usize) -> Vec<Candle> {
            if symbol == "BOOM" {
                panic!("venue exploded");
            }
            Vec::new()
        }

        async fn current(&self, _symbol: &str) -> Option<Candle> {
            None
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        sent: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl NotificationSink for RecordingSink {
        async fn send(&self, text: &str) -> Result<()> {
            self.sent.lock().unwrap().push(text.to_string());
            Ok(())
        }
    }

    struct FailingSink;

    #[async_trait]
    impl NotificationSink for FailingSink {
        async fn send(&self, _text: &str) -> Result<()> {
            Err(Error::Notification("chat unreachable".into()))
        }
    }

    /// 10:03 UTC, three minutes past an hourly boundary.
    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 10, 3, 0).unwrap()
    }

    /// 33 closes zig-zagging by one point, then a final move of `last_step`.
    fn zigzag_then(last_step: f64) -> Vec<f64> {
        let mut closes = vec![100.0];
        for i in 0..32 {
            closes.push(closes[i] + if i % 2 == 0 { 1.0 } else { -1.0 });
        }
        closes.push(closes[32] + last_step);
        closes
    }

    /// Closed hourly candles, the newest ending at the 10:00 boundary.
    async fn seed(backing: &MemoryCandleStore, symbol: &str, closes: &[f64]) {
        let last_open = Timeframe::Hour1.period_start(now()) - Duration::hours(1);
        let n = closes.len() as i64;
        for (i, &close) in closes.iter().enumerate() {
            backing
                .upsert(&Candle {
                    symbol: symbol.into(),
                    timeframe: Timeframe::Hour1,
                    open_time: last_open - Duration::hours(n - 1 - i as i64),
                    open: close,
                    high: close,
                    low: close,
                    close,
                    volume: 1.0,
                })
                .await
                .unwrap();
        }
    }

    fn definition(id: &str, symbol: &str, timeframe: Timeframe) -> AlertDefinition {
        AlertDefinition {
            id: id.into(),
            symbol: symbol.into(),
            indicator_type: IndicatorType::Rsi,
            config: RsiConfig {
                timeframe,
                ..RsiConfig::default()
            },
            enabled: true,
            description: format!("{symbol} test"),
            last_triggered_at: None,
        }
    }

    fn evaluator(backing: Arc<MemoryCandleStore>, sink: Arc<dyn NotificationSink>) -> AlertEvaluator {
        let store = CandleStore::new(backing, Arc::new(EmptyGateway), StoreConfig::default());
        AlertEvaluator::new(IndicatorEngine::new(Arc::new(store)), sink).with_concurrency(2)
    }

    #[tokio::test]
    async fn crossover_triggers_and_notifies() {
        let backing = Arc::new(MemoryCandleStore::new());
        seed(&backing, "BTC", &zigzag_then(12.0)).await;
        let sink = Arc::new(RecordingSink::default());
        let evaluator = evaluator(backing, sink.clone());

        let decisions = evaluator
            .evaluate_batch(&[definition("a", "BTC", Timeframe::Hour1)], now())
            .await;

        assert_eq!(decisions.len(), 1);
        assert!(decisions[0].triggered);
        assert!(decisions[0].notified);
        assert_eq!(decisions[0].kind, TransitionKind::CrossoverOverbought);
        let sent = sink.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].starts_with("🔔 RSI Alert for BTC!"));
        assert!(sent[0].contains("Description: BTC test"));
        let reading = decisions[0].reading.as_ref().unwrap();
        assert_eq!(reading.close_time, Some(Timeframe::Hour1.period_start(now())));
    }

    #[tokio::test]
    async fn same_edge_is_reported_once() {
        let backing = Arc::new(MemoryCandleStore::new());
        seed(&backing, "BTC", &zigzag_then(12.0)).await;
        let sink = Arc::new(RecordingSink::default());
        let evaluator = evaluator(backing.clone(), sink.clone());
        let batch = [definition("a", "BTC", Timeframe::Hour1)];

        let first = evaluator.evaluate_batch(&batch, now()).await;
        let second = evaluator.evaluate_batch(&batch, now() + Duration::minutes(1)).await;
        assert!(first[0].triggered);
        assert!(!second[0].triggered);
        assert_eq!(second[0].kind, TransitionKind::CrossoverOverbought);
        assert_eq!(sink.sent.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn drop_into_oversold_triggers() {
        let backing = Arc::new(MemoryCandleStore::new());
        seed(&backing, "ETH", &zigzag_then(-12.0)).await;
        let evaluator = evaluator(backing, Arc::new(RecordingSink::default()));

        let decisions = evaluator
            .evaluate_batch(&[definition("e", "ETH", Timeframe::Hour1)], now())
            .await;
        assert_eq!(decisions[0].kind, TransitionKind::CrossoverOversold);
    }

    #[tokio::test]
    async fn sustained_overbought_does_not_trigger() {
        let backing = Arc::new(MemoryCandleStore::new());
        let rising: Vec<f64> = (0..34).map(|i| 100.0 + i as f64).collect();
        seed(&backing, "SOL", &rising).await;
        let sink = Arc::new(RecordingSink::default());
        let evaluator = evaluator(backing, sink.clone());

        let decisions = evaluator
            .evaluate_batch(&[definition("s", "SOL", Timeframe::Hour1)], now())
            .await;
        assert!(!decisions[0].triggered);
        assert_eq!(decisions[0].kind, TransitionKind::None);
        assert_eq!(decisions[0].reading.as_ref().unwrap().value, 100.0);
        assert!(sink.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn sink_failure_keeps_trigger() {
        let backing = Arc::new(MemoryCandleStore::new());
        seed(&backing, "BTC", &zigzag_then(12.0)).await;
        let evaluator = evaluator(backing, Arc::new(FailingSink));

        let decisions = evaluator
            .evaluate_batch(&[definition("a", "BTC", Timeframe::Hour1)], now())
            .await;
        assert!(decisions[0].triggered);
        assert!(!decisions[0].notified);
    }

    #[tokio::test]
    async fn missing_data_is_untriggered_and_batch_continues() {
        let backing = Arc::new(MemoryCandleStore::new());
        seed(&backing, "BTC", &zigzag_then(12.0)).await;
        let evaluator = evaluator(backing, Arc::new(RecordingSink::default()));

        let batch = [
            definition("ghost", "GHOST", Timeframe::Hour1),
            definition("boom", "BOOM", Timeframe::Hour1),
            definition("btc", "BTC", Timeframe::Hour1),
        ];
        let decisions = evaluator.evaluate_batch(&batch, now()).await;

        let ids: Vec<&str> = decisions.iter().map(|d| d.alert_id.as_str()).collect();
        assert_eq!(ids, vec!["ghost", "boom", "btc"]);
        assert!(!decisions[0].triggered && decisions[0].reading.is_none());
        assert!(!decisions[1].triggered && decisions[1].reading.is_none());
        assert!(decisions[2].triggered);
    }

    #[tokio::test]
    async fn disabled_and_not_due_alerts_are_skipped() {
        let backing = Arc::new(MemoryCandleStore::new());
        seed(&backing, "BTC", &zigzag_then(12.0)).await;
        let evaluator = evaluator(backing, Arc::new(RecordingSink::default()));

        let mut disabled = definition("off", "BTC", Timeframe::Hour1);
        disabled.enabled = false;
        // 10:03 is 123 minutes into the 4h bucket.
        let not_due = definition("4h", "BTC", Timeframe::Hour4);

        let decisions = evaluator.evaluate_batch(&[disabled, not_due], now()).await;
        assert!(decisions.is_empty());
    }

    #[tokio::test]
    async fn alerts_on_one_partition_share_the_reading() {
        let backing = Arc::new(MemoryCandleStore::new());
        seed(&backing, "BTC", &zigzag_then(12.0)).await;
        let sink = Arc::new(RecordingSink::default());
        let evaluator = evaluator(backing, sink.clone());

        let mut strict = definition("strict", "BTC", Timeframe::Hour1);
        strict.config.overbought_level = 90.0;
        let loose = definition("loose", "BTC", Timeframe::Hour1);

        let decisions = evaluator.evaluate_batch(&[strict, loose], now()).await;
        let (a, b) = (
            decisions[0].reading.as_ref().unwrap(),
            decisions[1].reading.as_ref().unwrap(),
        );
        assert_eq!(a.value, b.value);
        assert_eq!(a.previous_value, b.previous_value);
        assert_eq!(a.close_time, b.close_time);
        // Zones follow each alert's own levels.
        assert_eq!(a.zone, Zone::Neutral);
        assert_eq!(b.zone, Zone::Overbought);
        assert!(!decisions[0].triggered);
        assert!(decisions[1].triggered);
        assert_eq!(sink.sent.lock().unwrap().len(), 1);
    }
}
