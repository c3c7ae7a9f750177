use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;

use common::{Candle, MarketDataGateway, Result, Timeframe};

use crate::{BinanceGateway, KucoinGateway};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Venue {
    Binance,
    Kucoin,
}

/// Sends each symbol to the venue that lists it: the configured KuCoin symbols
/// go to KuCoin, everything else to Binance.
pub struct RoutingGateway {
    binance: BinanceGateway,
    kucoin: KucoinGateway,
    kucoin_symbols: HashSet<String>,
}

impl RoutingGateway {
    pub fn new(
        binance: BinanceGateway,
        kucoin: KucoinGateway,
        kucoin_symbols: impl IntoIterator<Item = String>,
    ) -> Self {
        Self {
            binance,
            kucoin,
            kucoin_symbols: kucoin_symbols
                .into_iter()
                .map(|s| s.to_uppercase())
                .collect(),
        }
    }

    /// Both venues with the default public endpoints.
    pub fn public(
        quote_asset: &str,
        timeout: Duration,
        kucoin_symbols: impl IntoIterator<Item = String>,
    ) -> Result<Self> {
        Ok(Self::new(
            BinanceGateway::new(quote_asset, timeout)?,
            KucoinGateway::new(quote_asset, timeout)?,
            kucoin_symbols,
        ))
    }

    pub fn venue_for(&self, symbol: &str) -> Venue {
        if self.kucoin_symbols.contains(&symbol.to_uppercase()) {
            Venue::Kucoin
        } else {
            Venue::Binance
        }
    }

    fn route(&self, symbol: &str) -> &dyn MarketDataGateway {
        match self.venue_for(symbol) {
            Venue::Binance => &self.binance,
            Venue::Kucoin => &self.kucoin,
        }
    }
}

#[async_trait]
impl MarketDataGateway for RoutingGateway {
    async fn historical(&self, symbol: &str, timeframe: Timeframe, limit: usize) -> Vec<Candle> {
        self.route(symbol).historical(symbol, timeframe, limit).await
    }

    async fn current(&self, symbol: &str) -> Option<Candle> {
        self.route(symbol).current(symbol).await
    }
}
