use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, warn};
use url::Url;

use common::{Candle, Error, MarketDataGateway, Result, Timeframe};

use crate::{http_client, parse_price};

const BASE_URL: &str = "https://api.kucoin.com";
const SUCCESS_CODE: &str = "200000";
/// KuCoin returns at most 1500 candles per request.
const MAX_LIMIT: usize = 1500;

/// Public KuCoin spot candles client, used for symbols not listed on Binance.
pub struct KucoinGateway {
    http: Client,
    base_url: String,
    quote_asset: String,
}

impl KucoinGateway {
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
        format!("{}-{}", symbol.to_uppercase(), self.quote_asset)
    }

    /// Candles covering the last `limit` periods up to `now`, oldest first.
    pub async fn fetch_candles(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        limit: usize,
        now: DateTime<Utc>,
    ) -> Result<Vec<Candle>> {
        let kind = candle_type(timeframe).ok_or_else(|| {
            Error::Gateway(format!("KuCoin does not serve {timeframe} candles"))
        })?;
        let limit = limit.clamp(1, MAX_LIMIT);
        let start = now - timeframe.duration() * limit as i32;

        let url = Url::parse_with_params(
            &format!("{}/api/v1/market/candles", self.base_url),
            &[
                ("type", kind.to_string()),
                ("symbol", self.pair(symbol)),
                ("startAt", start.timestamp().to_string()),
                ("endAt", now.timestamp().to_string()),
            ],
        )
        .map_err(|e| Error::Gateway(e.to_string()))?;

        debug!(%symbol, %timeframe, limit, "Fetching KuCoin candles");
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
        let mut candles = parse_candles(symbol, timeframe, &body)?;
        let excess = candles.len().saturating_sub(limit);
        candles.drain(..excess);
        Ok(candles)
    }
}

#[async_trait]
impl MarketDataGateway for KucoinGateway {
    async fn historical(&self, symbol: &str, timeframe: Timeframe, limit: usize) -> Vec<Candle> {
        match self.fetch_candles(symbol, timeframe, limit, Utc::now()).await {
            Ok(candles) => candles,
            Err(e) => {
                warn!(%symbol, %timeframe, error = %e, "KuCoin historical fetch failed");
                Vec::new()
            }
        }
    }

    async fn current(&self, symbol: &str) -> Option<Candle> {
        match self.fetch_candles(symbol, Timeframe::Min5, 1, Utc::now()).await {
            Ok(mut candles) => candles.pop(),
            Err(e) => {
                warn!(%symbol, error = %e, "KuCoin current price fetch failed");
                None
            }
        }
    }
}

/// KuCoin interval name for a timeframe. `3d` and `1M` are not offered.
pub fn candle_type(timeframe: Timeframe) -> Option<&'static str> {
    let kind = match timeframe {
        Timeframe::Min1 => "1min",
        Timeframe::Min3 => "3min",
        Timeframe::Min5 => "5min",
        Timeframe::Min15 => "15min",
        Timeframe::Min30 => "30min",
        Timeframe::Hour1 => "1hour",
        Timeframe::Hour2 => "2hour",
        Timeframe::Hour4 => "4hour",
        Timeframe::Hour6 => "6hour",
        Timeframe::Hour8 => "8hour",
        Timeframe::Hour12 => "12hour",
        Timeframe::Day1 => "1day",
        Timeframe::Week1 => "1week",
        Timeframe::Day3 | Timeframe::Month1 => return None,
    };
    Some(kind)
}

/// Parse a candles response. Rows arrive newest first as
/// `[time s, open, close, high, low, volume, turnover]`; the result is oldest first.
pub fn parse_candles(symbol: &str, timeframe: Timeframe, body: &str) -> Result<Vec<Candle>> {
    let resp: CandlesResponse = serde_json::from_str(body)?;
    if resp.code != SUCCESS_CODE {
        return Err(Error::Gateway(format!(
            "KuCoin error {}: {}",
            resp.code,
            resp.msg.unwrap_or_default()
        )));
    }

    let mut candles = resp
        .data
        .iter()
        .map(|row| parse_row(symbol, timeframe, row))
        .collect::<Result<Vec<_>>>()?;
    candles.sort_by_key(|c| c.open_time);
    Ok(candles)
}

fn parse_row(symbol: &str, timeframe: Timeframe, row: &[String]) -> Result<Candle> {
    if row.len() < 6 {
        return Err(Error::Gateway(format!(
            "candle row has {} fields, expected at least 6",
            row.len()
        )));
    }
    let secs: i64 = row[0]
        .parse()
        .map_err(|e| Error::Gateway(format!("invalid candle time '{}': {e}", row[0])))?;
    let open_time = DateTime::from_timestamp(secs, 0)
        .ok_or_else(|| Error::Gateway(format!("candle time out of range: {secs}")))?;

    Ok(Candle {
        symbol: symbol.to_uppercase(),
        timeframe,
        open_time,
        open: parse_price(&row[1], "open")?,
        close: parse_price(&row[2], "close")?,
        high: parse_price(&row[3], "high")?,
        low: parse_price(&row[4], "low")?,
        volume: parse_price(&row[5], "volume")?,
    })
}

// ─── Response types ───────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct CandlesResponse {
    code: String,
    #[serde(default)]
    msg: Option<String>,
    #[serde(default)]
    data: Vec<Vec<String>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_newest_first_rows_into_ascending_candles() {
        let body = r#"{"code":"200000","data":[
            ["1704067500","1.20","1.25","1.30","1.18","1000","1250"],
            ["1704067200","1.10","1.20","1.22","1.05","800","920"]
        ]}"#;
        let candles = parse_candles("akt", Timeframe::Min5, body).unwrap();
        assert_eq!(candles.len(), 2);
        assert_eq!(candles[0].open_time.timestamp(), 1_704_067_200);
        assert_eq!(candles[0].open, 1.10);
        assert_eq!(candles[0].close, 1.20);
        assert_eq!(candles[0].high, 1.22);
        assert_eq!(candles[0].low, 1.05);
        assert_eq!(candles[1].close, 1.25);
        assert_eq!(candles[1].symbol, "AKT");
    }

    #[test]
    fn non_success_code_is_an_error() {
        let body = r#"{"code":"400100","msg":"This pair is not provided at present"}"#;
        let err = parse_candles("NOPE", Timeframe::Hour1, body).unwrap_err();
        assert!(err.to_string().contains("400100"));
    }

    #[test]
    fn unsupported_timeframes_have_no_type() {
        assert_eq!(candle_type(Timeframe::Hour1), Some("1hour"));
        assert_eq!(candle_type(Timeframe::Week1), Some("1week"));
        assert_eq!(candle_type(Timeframe::Day3), None);
        assert_eq!(candle_type(Timeframe::Month1), None);
    }

    #[test]
    fn pair_is_dash_separated() {
        let gw = KucoinGateway::new("USDT", Duration::from_secs(1)).unwrap();
        assert_eq!(gw.pair("kcs"), "KCS-USDT");
    }
}
