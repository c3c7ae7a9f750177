use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::migrate::Migrator;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use tracing::{info, warn};

use common::{
    AlertDefinition, AlertRepository, Candle, CandleBackingStore, Error, IndicatorType, PriceAlert,
    PriceAlertRepository, PriceOperator, PriceTarget, Result, RsiConfig, Timeframe,
};

pub static MIGRATOR: Migrator = sqlx::migrate!("../../migrations");

/// Open (creating if missing) the SQLite database at `url` and run migrations.
pub async fn connect(url: &str) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
    // Each in-memory connection is its own database.
    let max_connections = if url.contains(":memory:") { 1 } else { 5 };
    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect_with(options)
        .await?;
    MIGRATOR.run(&pool).await?;
    info!(%url, "Database ready");
    Ok(pool)
}

// ─── Candles ─────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct SqliteCandleStore {
    pool: SqlitePool,
}

impl SqliteCandleStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CandleBackingStore for SqliteCandleStore {
    async fn query(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        limit: Option<usize>,
    ) -> Result<Vec<Candle>> {
        // LIMIT -1 is unbounded in SQLite.
        let limit = limit.map(|n| n as i64).unwrap_or(-1);
        let rows = sqlx::query(
            r#"
            SELECT open_time, open, high, low, close, volume
            FROM candles
            WHERE symbol = ?1 AND timeframe = ?2
            ORDER BY open_time DESC
            LIMIT ?3
            "#,
        )
        .bind(symbol)
        .bind(timeframe.as_str())
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        let mut candles = rows
            .iter()
            .map(|row| candle_from_row(symbol, timeframe, row))
            .collect::<Result<Vec<_>>>()?;
        candles.reverse();
        Ok(candles)
    }

    async fn upsert(&self, candle: &Candle) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO candles (symbol, timeframe, open_time, open, high, low, close, volume, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            ON CONFLICT(symbol, timeframe, open_time) DO UPDATE SET
                open = excluded.open,
                high = excluded.high,
                low = excluded.low,
                close = excluded.close,
                volume = excluded.volume,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&candle.symbol)
        .bind(candle.timeframe.as_str())
        .bind(candle.open_time.timestamp())
        .bind(candle.open)
        .bind(candle.high)
        .bind(candle.low)
        .bind(candle.close)
        .bind(candle.volume)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM candles WHERE open_time < ?1")
            .bind(cutoff.timestamp())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

fn candle_from_row(symbol: &str, timeframe: Timeframe, row: &SqliteRow) -> Result<Candle> {
    let secs: i64 = row.try_get("open_time")?;
    let open_time = DateTime::from_timestamp(secs, 0)
        .ok_or_else(|| Error::Other(format!("stored open_time out of range: {secs}")))?;
    Ok(Candle {
        symbol: symbol.to_string(),
        timeframe,
        open_time,
        open: row.try_get("open")?,
        high: row.try_get("high")?,
        low: row.try_get("low")?,
        close: row.try_get("close")?,
        volume: row.try_get("volume")?,
    })
}

// ─── Alerts ──────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct SqliteAlertRepository {
    pool: SqlitePool,
}

impl SqliteAlertRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert or replace a definition. The trigger timestamp and creation time
    /// of an existing row are kept.
    pub async fn upsert(&self, definition: &AlertDefinition) -> Result<()> {
        definition.config.validate()?;
        sqlx::query(
            r#"
            INSERT INTO alerts (id, symbol, indicator_type, period, overbought_level,
                                oversold_level, timeframe, enabled, description, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            ON CONFLICT(id) DO UPDATE SET
                symbol = excluded.symbol,
                indicator_type = excluded.indicator_type,
                period = excluded.period,
                overbought_level = excluded.overbought_level,
                oversold_level = excluded.oversold_level,
                timeframe = excluded.timeframe,
                enabled = excluded.enabled,
                description = excluded.description
            "#,
        )
        .bind(&definition.id)
        .bind(definition.symbol.to_uppercase())
        .bind(definition.indicator_type.to_string())
        .bind(definition.config.period as i64)
        .bind(definition.config.overbought_level)
        .bind(definition.config.oversold_level)
        .bind(definition.config.timeframe.as_str())
        .bind(definition.enabled)
        .bind(&definition.description)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl AlertRepository for SqliteAlertRepository {
    async fn list_enabled(&self) -> Result<Vec<AlertDefinition>> {
        let rows = sqlx::query(
            r#"
            SELECT id, symbol, indicator_type, period, overbought_level, oversold_level,
                   timeframe, enabled, description, last_triggered_at
            FROM alerts
            WHERE enabled = 1
            ORDER BY created_at, id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut definitions = Vec::with_capacity(rows.len());
        for row in &rows {
            match alert_from_row(row) {
                Ok(def) => definitions.push(def),
                Err(e) => {
                    let id: String = row.try_get("id").unwrap_or_default();
                    warn!(alert_id = %id, error = %e, "Skipping unreadable alert definition");
                }
            }
        }
        Ok(definitions)
    }

    async fn mark_triggered(&self, id: &str, at: DateTime<Utc>) -> Result<()> {
        let result = sqlx::query("UPDATE alerts SET last_triggered_at = ?1 WHERE id = ?2")
            .bind(at.to_rfc3339())
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            warn!(alert_id = %id, "mark_triggered: no such alert");
        }
        Ok(())
    }
}

impl SqliteAlertRepository {
    /// Insert or replace a price alert. An existing row keeps its creation
    /// time and, once fired, stays fired.
    pub async fn upsert_price_alert(&self, alert: &PriceAlert) -> Result<()> {
        alert.validate()?;
        let (alert_type, symbol, symbol2) = match &alert.target {
            PriceTarget::Single { symbol } => ("single", symbol.to_uppercase(), None),
            PriceTarget::Ratio { symbol1, symbol2 } => {
                ("ratio", symbol1.to_uppercase(), Some(symbol2.to_uppercase()))
            }
        };
        sqlx::query(
            r#"
            INSERT INTO price_alerts (id, alert_type, symbol, symbol2, operator, price,
                                      description, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            ON CONFLICT(id) DO UPDATE SET
                alert_type = excluded.alert_type,
                symbol = excluded.symbol,
                symbol2 = excluded.symbol2,
                operator = excluded.operator,
                price = excluded.price,
                description = excluded.description
            "#,
        )
        .bind(&alert.id)
        .bind(alert_type)
        .bind(symbol)
        .bind(symbol2)
        .bind(alert.operator.as_str())
        .bind(alert.price)
        .bind(&alert.description)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl PriceAlertRepository for SqliteAlertRepository {
    async fn list_pending(&self) -> Result<Vec<PriceAlert>> {
        let rows = sqlx::query(
            r#"
            SELECT id, alert_type, symbol, symbol2, operator, price, description, triggered_at
            FROM price_alerts
            WHERE triggered_at IS NULL
            ORDER BY created_at, id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut alerts = Vec::with_capacity(rows.len());
        for row in &rows {
            match price_alert_from_row(row) {
                Ok(alert) => alerts.push(alert),
                Err(e) => {
                    let id: String = row.try_get("id").unwrap_or_default();
                    warn!(alert_id = %id, error = %e, "Skipping unreadable price alert");
                }
            }
        }
        Ok(alerts)
    }

    async fn mark_fired(&self, id: &str, at: DateTime<Utc>) -> Result<()> {
        let result = sqlx::query(
            "UPDATE price_alerts SET triggered_at = ?1 WHERE id = ?2 AND triggered_at IS NULL",
        )
        .bind(at.to_rfc3339())
        .bind(id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            warn!(alert_id = %id, "mark_fired: no pending price alert");
        }
        Ok(())
    }
}

fn price_alert_from_row(row: &SqliteRow) -> Result<PriceAlert> {
    let alert_type: String = row.try_get("alert_type")?;
    let symbol: String = row.try_get("symbol")?;
    let symbol2: Option<String> = row.try_get("symbol2")?;
    let operator: String = row.try_get("operator")?;

    let target = match (alert_type.as_str(), symbol2) {
        ("single", _) => PriceTarget::Single { symbol },
        ("ratio", Some(symbol2)) => PriceTarget::Ratio {
            symbol1: symbol,
            symbol2,
        },
        ("ratio", None) => {
            return Err(Error::InvalidConfig("ratio alert without symbol2".into()));
        }
        (other, _) => {
            return Err(Error::InvalidConfig(format!("unknown price alert type '{other}'")));
        }
    };

    let alert = PriceAlert {
        id: row.try_get("id")?,
        target,
        operator: PriceOperator::from_str(&operator)?,
        price: row.try_get("price")?,
        description: row.try_get("description")?,
        triggered_at: parse_timestamp(row.try_get("triggered_at")?, "triggered_at")?,
    };
    alert.validate()?;
    Ok(alert)
}

fn parse_timestamp(raw: Option<String>, column: &str) -> Result<Option<DateTime<Utc>>> {
    raw.map(|s| {
        DateTime::parse_from_rfc3339(&s)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|e| Error::Other(format!("bad {column} '{s}': {e}")))
    })
    .transpose()
}

fn alert_from_row(row: &SqliteRow) -> Result<AlertDefinition> {
    let indicator_type: String = row.try_get("indicator_type")?;
    let timeframe: String = row.try_get("timeframe")?;
    let period: i64 = row.try_get("period")?;
    let last_triggered_at: Option<String> = row.try_get("last_triggered_at")?;

    let config = RsiConfig {
        period: usize::try_from(period)
            .map_err(|_| Error::InvalidConfig(format!("negative period {period}")))?,
        overbought_level: row.try_get("overbought_level")?,
        oversold_level: row.try_get("oversold_level")?,
        timeframe: Timeframe::from_str(&timeframe)?,
    };
    config.validate()?;

    let last_triggered_at = parse_timestamp(last_triggered_at, "last_triggered_at")?;

    Ok(AlertDefinition {
        id: row.try_get("id")?,
        symbol: row.try_get("symbol")?,
        indicator_type: IndicatorType::from_str(&indicator_type)?,
        config,
        enabled: row.try_get("enabled")?,
        description: row.try_get("description")?,
        last_triggered_at,
    })
}
