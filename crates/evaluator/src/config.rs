use std::path::Path;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use common::{
    AlertDefinition, Error, IndicatorType, PriceAlert, PriceOperator, PriceTarget, Result,
    RsiConfig,
};

/// Alert definitions file (TOML), imported into the repository at startup.
///
/// Example `config/alerts.toml`:
/// ```toml
/// [[alert]]
/// symbol = "BTC"
/// description = "BTC hourly RSI"
///
/// [alert.config]
/// period = 14
/// overbought_level = 70.0
/// oversold_level = 30.0
/// timeframe = "1h"
///
/// [[price_alert]]
/// symbol = "BTC"
/// operator = ">"
/// price = 100000
///
/// [[price_alert]]
/// symbol1 = "ETH"
/// symbol2 = "BTC"
/// operator = "<"
/// price = 0.03
/// ```
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AlertFileConfig {
    #[serde(rename = "alert", default)]
    pub alerts: Vec<AlertEntry>,
    #[serde(rename = "price_alert", default)]
    pub price_alerts: Vec<PriceAlertEntry>,
}

/// Validated contents of an alerts file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AlertFile {
    pub indicators: Vec<AlertDefinition>,
    pub prices: Vec<PriceAlert>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AlertEntry {
    /// Stable id. A random one is assigned when omitted.
    #[serde(default)]
    pub id: Option<String>,
    pub symbol: String,
    #[serde(default = "default_indicator_type")]
    pub indicator_type: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Missing fields take the RSI defaults (14 / 70 / 30 / 5m).
    #[serde(default)]
    pub config: RsiConfig,
}

/// A price level on one symbol (`symbol`) or on a ratio (`symbol1`/`symbol2`).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PriceAlertEntry {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub symbol: Option<String>,
    #[serde(default)]
    pub symbol1: Option<String>,
    #[serde(default)]
    pub symbol2: Option<String>,
    pub operator: String,
    pub price: f64,
    #[serde(default)]
    pub description: Option<String>,
}

fn default_indicator_type() -> String {
    "rsi".to_string()
}

fn default_enabled() -> bool {
    true
}

impl AlertFileConfig {
    /// Read, parse and validate the file at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<AlertFile> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("failed to read alerts file '{}': {e}", path.display()))
        })?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<AlertFile> {
        let file: AlertFileConfig = toml::from_str(content)
            .map_err(|e| Error::Config(format!("failed to parse alerts file: {e}")))?;
        file.into_definitions()
    }

    /// Validate every entry. The first invalid entry fails the whole file.
    pub fn into_definitions(self) -> Result<AlertFile> {
        let indicators = self
            .alerts
            .into_iter()
            .enumerate()
            .map(|(n, entry)| {
                let label = format!("alert #{} ({})", n + 1, entry.symbol);
                entry.into_definition().map_err(|e| with_label(e, &label))
            })
            .collect::<Result<Vec<_>>>()?;
        let prices = self
            .price_alerts
            .into_iter()
            .enumerate()
            .map(|(n, entry)| {
                let label = format!("price_alert #{}", n + 1);
                entry.into_price_alert().map_err(|e| with_label(e, &label))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(AlertFile { indicators, prices })
    }
}

fn with_label(error: Error, label: &str) -> Error {
    match error {
        Error::InvalidConfig(msg) => Error::InvalidConfig(format!("{label}: {msg}")),
        other => other,
    }
}

fn normalized(symbol: Option<String>) -> Option<String> {
    symbol
        .map(|s| s.trim().to_uppercase())
        .filter(|s| !s.is_empty())
}

impl PriceAlertEntry {
    pub fn into_price_alert(self) -> Result<PriceAlert> {
        let target = match (
            normalized(self.symbol),
            normalized(self.symbol1),
            normalized(self.symbol2),
        ) {
            (None, Some(symbol1), Some(symbol2)) => PriceTarget::Ratio { symbol1, symbol2 },
            (Some(symbol), None, None) => PriceTarget::Single { symbol },
            _ => {
                return Err(Error::InvalidConfig(
                    "set either symbol, or both symbol1 and symbol2".into(),
                ))
            }
        };
        let operator: PriceOperator = self.operator.parse()?;

        let description = self
            .description
            .filter(|d| !d.trim().is_empty())
            .unwrap_or_else(|| format!("{target} price alert"));

        let alert = PriceAlert {
            id: self.id.unwrap_or_else(|| Uuid::new_v4().to_string()),
            target,
            operator,
            price: self.price,
            description,
            triggered_at: None,
        };
        alert.validate()?;
        Ok(alert)
    }
}

impl AlertEntry {
    pub fn into_definition(self) -> Result<AlertDefinition> {
        let symbol = self.symbol.trim().to_uppercase();
        if symbol.is_empty() {
            return Err(Error::InvalidConfig("symbol is required".into()));
        }
        let indicator_type: IndicatorType = self.indicator_type.parse()?;
        self.config.validate()?;

        let description = self
            .description
            .filter(|d| !d.trim().is_empty())
            .unwrap_or_else(|| format!("{symbol} RSI threshold monitoring alert"));

        Ok(AlertDefinition {
            id: self.id.unwrap_or_else(|| Uuid::new_v4().to_string()),
            symbol,
            indicator_type,
            config: self.config,
            enabled: self.enabled,
            description,
            last_triggered_at: None,
        })
    }
}
