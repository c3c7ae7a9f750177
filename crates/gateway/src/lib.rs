//! Market data gateways backed by public exchange REST endpoints.

pub mod binance;
pub mod kucoin;
pub mod routing;

pub use binance::BinanceGateway;
pub use kucoin::KucoinGateway;
pub use routing::{RoutingGateway, Venue};

use std::time::Duration;

use reqwest::Client;

use common::{Error, Result};

fn http_client(timeout: Duration) -> Result<Client> {
    Client::builder()
        .use_rustls_tls()
        .timeout(timeout)
        .build()
        .map_err(|e| Error::Http(e.to_string()))
}

fn parse_price(raw: &str, field: &str) -> Result<f64> {
    raw.parse::<f64>()
        .map_err(|e| Error::Gateway(format!("invalid {field} '{raw}': {e}")))
}
