use std::sync::Arc;

use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use common::{Config, LoggingSink, NotificationSink};
use evaluator::{AlertEvaluator, AlertFileConfig, AlertRunner, PriceAlertEvaluator};
use gateway::RoutingGateway;
use indicators::IndicatorEngine;
use store::{CandleStore, SqliteAlertRepository, SqliteCandleStore, StoreConfig};
use telegram_notify::TelegramSink;

#[tokio::main]
async fn main() {
    // ── Logging ──────────────────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(
            "info".parse().unwrap_or_else(|e| panic!("Invalid log directive: {e}")),
        ))
        .init();

    // ── Config ────────────────────────────────────────────────────────────────
    let cfg = Config::from_env();
    info!(
        poll_secs = cfg.poll_interval.as_secs(),
        workers = cfg.worker_concurrency,
        telegram = cfg.telegram_enabled,
        "RSI Sentinel starting"
    );

    // ── Database ──────────────────────────────────────────────────────────────
    let db = store::connect(&cfg.database_url)
        .await
        .unwrap_or_else(|e| panic!("Failed to open database: {e}"));
    let alerts = Arc::new(SqliteAlertRepository::new(db.clone()));

    // ── Alert definitions file ────────────────────────────────────────────────
    if let Some(path) = &cfg.alerts_config_path {
        let file = AlertFileConfig::load(path)
            .unwrap_or_else(|e| panic!("Failed to load alert definitions: {e}"));
        for definition in &file.indicators {
            alerts
                .upsert(definition)
                .await
                .unwrap_or_else(|e| panic!("Failed to import alert '{}': {e}", definition.id));
        }
        for alert in &file.prices {
            alerts
                .upsert_price_alert(alert)
                .await
                .unwrap_or_else(|e| panic!("Failed to import price alert '{}': {e}", alert.id));
        }
        info!(
            indicators = file.indicators.len(),
            prices = file.prices.len(),
            %path,
            "Alert definitions imported"
        );
    }

    // ── Market data ───────────────────────────────────────────────────────────
    let gateway = RoutingGateway::public(
        &cfg.quote_asset,
        cfg.gateway_timeout,
        cfg.kucoin_symbols.clone(),
    )
    .unwrap_or_else(|e| panic!("Failed to build market data gateway: {e}"));
    let candle_store = Arc::new(CandleStore::new(
        Arc::new(SqliteCandleStore::new(db.clone())),
        Arc::new(gateway),
        StoreConfig {
            io_timeout: cfg.gateway_timeout,
            ..StoreConfig::default()
        },
    ));

    // ── Notifications ─────────────────────────────────────────────────────────
    let sink: Arc<dyn NotificationSink> = if cfg.telegram_enabled {
        Arc::new(TelegramSink::new(cfg.telegram_token.clone(), &cfg.telegram_chat_ids))
    } else {
        warn!("Telegram disabled; alerts will only be logged");
        Arc::new(LoggingSink)
    };

    // ── Evaluator & runner ────────────────────────────────────────────────────
    let price_evaluator = PriceAlertEvaluator::new(candle_store.clone(), sink.clone())
        .with_concurrency(cfg.worker_concurrency);
    let evaluator = AlertEvaluator::new(IndicatorEngine::new(candle_store.clone()), sink)
        .with_concurrency(cfg.worker_concurrency);
    let runner = AlertRunner::new(
        evaluator,
        alerts.clone(),
        candle_store,
        cfg.poll_interval,
        chrono::Duration::days(cfg.candle_retention_days),
    )
    .with_price_alerts(price_evaluator, alerts);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let runner_handle = tokio::spawn(runner.run(shutdown_rx));

    info!("All subsystems started. Waiting for shutdown signal.");
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
    }
    info!("Shutdown signal received. Stopping.");
    let _ = shutdown_tx.send(true);
    if let Err(e) = runner_handle.await {
        warn!(error = %e, "Runner task ended abnormally");
    }
    db.close().await;
    info!("Exiting.");
}
