use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{error, info, warn};

use common::{AlertRepository, PriceAlertRepository};
use store::CandleStore;

use crate::{AlertEvaluator, PriceAlertEvaluator};

const PRUNE_EVERY: Duration = Duration::from_secs(24 * 60 * 60);

/// Counts from one evaluation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassSummary {
    pub loaded: usize,
    pub evaluated: usize,
    pub triggered: usize,
    pub notified: usize,
    pub price_checked: usize,
    pub price_triggered: usize,
}

struct PricePath {
    evaluator: PriceAlertEvaluator,
    repository: Arc<dyn PriceAlertRepository>,
}

/// Drives `AlertEvaluator` on a fixed interval until shutdown.
pub struct AlertRunner {
    evaluator: AlertEvaluator,
    repository: Arc<dyn AlertRepository>,
    store: Arc<CandleStore>,
    poll_interval: Duration,
    retention: chrono::Duration,
    prices: Option<PricePath>,
}

impl AlertRunner {
    pub fn new(
        evaluator: AlertEvaluator,
        repository: Arc<dyn AlertRepository>,
        store: Arc<CandleStore>,
        poll_interval: Duration,
        retention: chrono::Duration,
    ) -> Self {
        Self {
            evaluator,
            repository,
            store,
            poll_interval,
            retention,
            prices: None,
        }
    }

    /// Also check pending price and ratio alerts on every pass.
    pub fn with_price_alerts(
        mut self,
        evaluator: PriceAlertEvaluator,
        repository: Arc<dyn PriceAlertRepository>,
    ) -> Self {
        self.prices = Some(PricePath {
            evaluator,
            repository,
        });
        self
    }

    /// Run passes until `shutdown` flips to `true` or its sender is dropped.
    /// The first pass runs immediately.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_secs = self.poll_interval.as_secs(),
            retention_days = self.retention.num_days(),
            "AlertRunner running"
        );
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut last_prune: Option<Instant> = None;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.run_pass(Utc::now()).await;
                    if last_prune.map_or(true, |t| t.elapsed() >= PRUNE_EVERY) {
                        self.prune().await;
                        last_prune = Some(Instant::now());
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("AlertRunner shutting down");
                        return;
                    }
                }
            }
        }
    }

    /// One pass: price alerts, then enabled indicator definitions. Triggers
    /// are recorded in their repositories.
    pub async fn run_pass(&self, now: DateTime<Utc>) -> PassSummary {
        let mut summary = PassSummary::default();
        if let Some(prices) = &self.prices {
            self.price_pass(prices, now, &mut summary).await;
        }
        self.indicator_pass(now, &mut summary).await;

        info!(
            loaded = summary.loaded,
            evaluated = summary.evaluated,
            triggered = summary.triggered,
            notified = summary.notified,
            price_checked = summary.price_checked,
            price_triggered = summary.price_triggered,
            "Evaluation pass complete"
        );
        summary
    }

    async fn indicator_pass(&self, now: DateTime<Utc>, summary: &mut PassSummary) {
        let definitions = match self.repository.list_enabled().await {
            Ok(defs) => defs,
            Err(e) => {
                error!(error = %e, "Failed to load alert definitions");
                return;
            }
        };

        let decisions = self.evaluator.evaluate_batch(&definitions, now).await;
        summary.loaded = definitions.len();
        summary.evaluated = decisions.len();
        for decision in decisions.iter().filter(|d| d.triggered) {
            summary.triggered += 1;
            if decision.notified {
                summary.notified += 1;
            }
            if let Err(e) = self.repository.mark_triggered(&decision.alert_id, now).await {
                warn!(alert_id = %decision.alert_id, error = %e, "Failed to record trigger");
            }
        }
    }

    async fn price_pass(&self, prices: &PricePath, now: DateTime<Utc>, summary: &mut PassSummary) {
        let alerts = match prices.repository.list_pending().await {
            Ok(alerts) => alerts,
            Err(e) => {
                error!(error = %e, "Failed to load price alerts");
                return;
            }
        };

        let decisions = prices.evaluator.evaluate_batch(&alerts, now).await;
        summary.price_checked = decisions.len();
        // Fired alerts are retired even when delivery failed.
        for decision in decisions.iter().filter(|d| d.triggered) {
            summary.price_triggered += 1;
            if decision.notified {
                summary.notified += 1;
            }
            if let Err(e) = prices.repository.mark_fired(&decision.alert_id, now).await {
                warn!(alert_id = %decision.alert_id, error = %e, "Failed to retire price alert");
            }
        }
    }

    async fn prune(&self) {
        if let Err(e) = self.store.prune_older_than(self.retention).await {
            warn!(error = %e, "Candle retention prune failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use chrono::{Duration as ChronoDuration, TimeZone};

    use common::{
        AlertDefinition, Candle, CandleBackingStore, IndicatorType, MarketDataGateway,
        NotificationSink, PriceAlert, PriceOperator, PriceTarget, Result, RsiConfig, Timeframe,
    };
    use indicators::IndicatorEngine;
    use store::{MemoryCandleStore, StoreConfig};

    use super::*;

    /// No history; a live BTC candle trading between 99 and 101.
    struct NoGateway;

    #[async_trait]
    impl MarketDataGateway for NoGateway {
        async fn historical(&self, _s: &str, _tf: Timeframe, _limit: usize) -> Vec<Candle> {
            Vec::new()
        }

        async fn current(&self, symbol: &str) -> Option<Candle> {
            (symbol == "BTC").then(|| Candle {
                symbol: "BTC".into(),
                timeframe: Timeframe::Min5,
                open_time: Timeframe::Min5.period_start(now()),
                open: 100.0,
                high: 101.0,
                low: 99.0,
                close: 100.0,
                volume: 1.0,
            })
        }
    }

    #[derive(Default)]
    struct MemoryPriceRepository {
        alerts: Mutex<Vec<PriceAlert>>,
    }

    #[async_trait]
    impl PriceAlertRepository for MemoryPriceRepository {
        async fn list_pending(&self) -> Result<Vec<PriceAlert>> {
            let alerts = self.alerts.lock().unwrap();
            Ok(alerts.iter().filter(|a| a.triggered_at.is_none()).cloned().collect())
        }

        async fn mark_fired(&self, id: &str, at: DateTime<Utc>) -> Result<()> {
            let mut alerts = self.alerts.lock().unwrap();
            if let Some(alert) = alerts.iter_mut().find(|a| a.id == id) {
                alert.triggered_at = Some(at);
            }
            Ok(())
        }
    }

    struct SilentSink;

    #[async_trait]
    impl NotificationSink for SilentSink {
        async fn send(&self, _text: &str) -> Result<()> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct MemoryRepository {
        definitions: Vec<AlertDefinition>,
        marked: Mutex<Vec<(String, DateTime<Utc>)>>,
        loads: Mutex<usize>,
    }

    #[async_trait]
    impl AlertRepository for MemoryRepository {
        async fn list_enabled(&self) -> Result<Vec<AlertDefinition>> {
            *self.loads.lock().unwrap() += 1;
            Ok(self.definitions.iter().filter(|d| d.enabled).cloned().collect())
        }

        async fn mark_triggered(&self, id: &str, at: DateTime<Utc>) -> Result<()> {
            self.marked.lock().unwrap().push((id.to_string(), at));
            Ok(())
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 10, 3, 0).unwrap()
    }

    async fn seeded_backing() -> Arc<MemoryCandleStore> {
        let backing = Arc::new(MemoryCandleStore::new());
        let mut closes = vec![100.0];
        for i in 0..32 {
            closes.push(closes[i] + if i % 2 == 0 { 1.0 } else { -1.0 });
        }
        closes.push(closes[32] + 12.0);
        let last_open = Timeframe::Hour1.period_start(now()) - ChronoDuration::hours(1);
        for (i, &close) in closes.iter().enumerate() {
            backing
                .upsert(&Candle {
                    symbol: "BTC".into(),
                    timeframe: Timeframe::Hour1,
                    open_time: last_open - ChronoDuration::hours(33 - i as i64),
                    open: close,
                    high: close,
                    low: close,
                    close,
                    volume: 1.0,
                })
                .await
                .unwrap();
        }
        backing
    }

    fn runner(backing: Arc<MemoryCandleStore>, repository: Arc<MemoryRepository>) -> AlertRunner {
        let store = Arc::new(CandleStore::new(backing, Arc::new(NoGateway), StoreConfig::default()));
        let evaluator = AlertEvaluator::new(IndicatorEngine::new(store.clone()), Arc::new(SilentSink));
        AlertRunner::new(
            evaluator,
            repository,
            store,
            Duration::from_secs(60),
            ChronoDuration::days(30),
        )
    }

    fn definition(id: &str, enabled: bool) -> AlertDefinition {
        AlertDefinition {
            id: id.into(),
            symbol: "BTC".into(),
            indicator_type: IndicatorType::Rsi,
            config: RsiConfig {
                timeframe: Timeframe::Hour1,
                ..RsiConfig::default()
            },
            enabled,
            description: String::new(),
            last_triggered_at: None,
        }
    }

    #[tokio::test]
    async fn pass_marks_triggered_alerts() {
        let repository = Arc::new(MemoryRepository {
            definitions: vec![definition("on", true), definition("off", false)],
            ..Default::default()
        });
        let runner = runner(seeded_backing().await, repository.clone());

        let summary = runner.run_pass(now()).await;
        assert_eq!(
            summary,
            PassSummary {
                loaded: 1,
                evaluated: 1,
                triggered: 1,
                notified: 1,
                ..PassSummary::default()
            }
        );
        assert_eq!(*repository.marked.lock().unwrap(), vec![("on".to_string(), now())]);
    }

    #[tokio::test]
    async fn price_alerts_fire_once_across_passes() {
        let prices = Arc::new(MemoryPriceRepository {
            alerts: Mutex::new(vec![
                PriceAlert {
                    id: "dip".into(),
                    target: PriceTarget::Single { symbol: "BTC".into() },
                    operator: PriceOperator::Below,
                    price: 99.5,
                    description: String::new(),
                    triggered_at: None,
                },
                PriceAlert {
                    id: "moon".into(),
                    target: PriceTarget::Single { symbol: "BTC".into() },
                    operator: PriceOperator::Above,
                    price: 200.0,
                    description: String::new(),
                    triggered_at: None,
                },
            ]),
        });
        let mut runner = runner(Arc::new(MemoryCandleStore::new()), Arc::new(MemoryRepository::default()));
        let evaluator = PriceAlertEvaluator::new(runner.store.clone(), Arc::new(SilentSink));
        runner = runner.with_price_alerts(evaluator, prices.clone());

        let first = runner.run_pass(now()).await;
        assert_eq!((first.price_checked, first.price_triggered, first.notified), (2, 1, 1));
        let fired: Vec<Option<DateTime<Utc>>> = prices
            .alerts
            .lock()
            .unwrap()
            .iter()
            .map(|a| a.triggered_at)
            .collect();
        assert_eq!(fired, vec![Some(now()), None]);

        let second = runner.run_pass(now() + ChronoDuration::minutes(1)).await;
        assert_eq!((second.price_checked, second.price_triggered), (1, 0));
    }

    #[tokio::test(start_paused = true)]
    async fn run_stops_on_shutdown() {
        let repository = Arc::new(MemoryRepository::default());
        let runner = runner(Arc::new(MemoryCandleStore::new()), repository.clone());
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(runner.run(rx));
        tokio::time::sleep(Duration::from_secs(150)).await;
        tx.send(true).unwrap();
        handle.await.unwrap();

        // Immediate first tick plus ticks at 60s and 120s.
        assert_eq!(*repository.loads.lock().unwrap(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn run_stops_when_sender_dropped() {
        let runner = runner(Arc::new(MemoryCandleStore::new()), Arc::new(MemoryRepository::default()));
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(runner.run(rx));
        drop(tx);
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("runner did not stop")
            .unwrap();
    }
}
