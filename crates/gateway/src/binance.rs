use std::time::Duration;

use async_trait::async_trait;
use chrono::DateTime;
use reqwest::Client;
use serde_json::Value;
use tracing::{debug, warn};
use url::Url;

use common::{Candle, Error, MarketDataGateway, Result, Timeframe};

use crate::{http_client, parse_price};

const BASE_URL: &str = "https://api.binance.com";
/// Binance caps a single klines request at 1000 rows.
const MAX_LIMIT: usize = 1000;

/// Public Binance spot klines client. No API key required.
pub struct BinanceGateway {
    http: Client,
    base_url: String,
    quote_asset: String,
}

impl BinanceGateway {
    pub fn new(quote_asset: impl Into<String>, timeout: Duration) -> Result<Self> {
        Ok(Self {
            http: http_client(timeout)?,
            base_url: BASE_URL.to_string(),
            quote_asset: quote_asset.into(),
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn pair(&self, symbol: &str) -> String {
        format!("{}{}", symbol.to_uppercase(), self.quote_asset)
    }

    /// Most recent `limit` klines, oldest first.
    pub async fn fetch_klines(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        limit: usize,
    ) -> Result<Vec<Candle>> {
        let limit = limit.clamp(1, MAX_LIMIT).to_string();
        let url = Url::parse_with_params(
            &format!("{}/api/v3/klines", self.base_url),
            &[
                ("symbol", self.pair(symbol).as_str()),
                ("interval", timeframe.as_str()),
                ("limit", limit.as_str()),
            ],
        )
        .map_err(|e| Error::Gateway(e.to_string()))?;

        debug!(%symbol, %timeframe, %limit, "Fetching Binance klines");
        let resp = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;

        let status = resp.status();
        let body = resp.text().await.map_err(|e| Error::Http(e.to_string()))?;

        if !status.is_success() {
            return Err(Error::Gateway(format!("HTTP {status}: {body}")));
        }
        parse_klines(symbol, timeframe, &body)
    }
}

#[async_trait]
impl MarketDataGateway for BinanceGateway {
    async fn historical(&self, symbol: &str, timeframe: Timeframe, limit: usize) -> Vec<Candle> {
        match self.fetch_klines(symbol, timeframe, limit).await {
            Ok(candles) => candles,
            Err(e) => {
                warn!(%symbol, %timeframe, error = %e, "Binance historical fetch failed");
                Vec::new()
            }
        }
    }

    /// The still-forming 5m candle stands in for the live price.
    async fn current(&self, symbol: &str) -> Option<Candle> {
        match self.fetch_klines(symbol, Timeframe::Min5, 1).await {
            Ok(mut candles) => candles.pop(),
            Err(e) => {
                warn!(%symbol, error = %e, "Binance current price fetch failed");
                None
            }
        }
    }
}

/// Parse a klines body: an array of
/// `[openTime ms, open, high, low, close, volume, closeTime, ...]` rows with
/// prices as strings.
pub fn parse_klines(symbol: &str, timeframe: Timeframe, body: &str) -> Result<Vec<Candle>> {
    let rows: Vec<Vec<Value>> = serde_json::from_str(body)?;
    let mut candles = rows
        .iter()
        .map(|row| parse_row(symbol, timeframe, row))
        .collect::<Result<Vec<_>>>()?;
    candles.sort_by_key(|c| c.open_time);
    Ok(candles)
}

fn parse_row(symbol: &str, timeframe: Timeframe, row: &[Value]) -> Result<Candle> {
    if row.len() < 6 {
        return Err(Error::Gateway(format!(
            "kline row has {} fields, expected at least 6",
            row.len()
        )));
    }
    let open_ms = row[0]
        .as_i64()
        .ok_or_else(|| Error::Gateway(format!("kline open time is not an integer: {}", row[0])))?;
    let open_time = DateTime::from_timestamp_millis(open_ms)
        .ok_or_else(|| Error::Gateway(format!("kline open time out of range: {open_ms}")))?;

    let field = |idx: usize, name: &str| -> Result<f64> {
        match &row[idx] {
            Value::String(s) => parse_price(s, name),
            Value::Number(n) => n
                .as_f64()
                .ok_or_else(|| Error::Gateway(format!("invalid {name}: {n}"))),
            other => Err(Error::Gateway(format!("invalid {name}: {other}"))),
        }
    };

    Ok(Candle {
        symbol: symbol.to_uppercase(),
        timeframe,
        open_time,
        open: field(1, "open")?,
        high: field(2, "high")?,
        low: field(3, "low")?,
        close: field(4, "close")?,
        volume: field(5, "volume")?,
    })
}
