use common::{AlertDefinition, Candle, IndicatorReading, PriceAlert, TransitionKind};
use store::LatestPrice;

/// Human-readable trigger message.
pub fn format_notification(
    definition: &AlertDefinition,
    kind: TransitionKind,
    reading: &IndicatorReading,
    price: Option<&LatestPrice>,
) -> String {
    let config = &definition.config;
    let value = reading.value;

    let headline = match kind {
        TransitionKind::CrossoverOverbought => format!(
            "🔺 RSI crossed above overbought level ({}): {value:.2}",
            config.overbought_level
        ),
        TransitionKind::CrossoverOversold => format!(
            "🔻 RSI crossed below oversold level ({}): {value:.2}",
            config.oversold_level
        ),
        TransitionKind::ExitOverbought => format!("🔄 RSI exited overbought zone: {value:.2}"),
        TransitionKind::ExitOversold => format!("🔄 RSI exited oversold zone: {value:.2}"),
        TransitionKind::None => format!("RSI: {value:.2}"),
    };

    let previous = reading
        .previous_value
        .map(|v| format!("{v:.2}"))
        .unwrap_or_else(|| "n/a".to_string());

    let mut lines = vec![
        format!("🔔 RSI Alert for {}!", definition.symbol),
        headline,
        format!("Previous RSI: {previous}"),
        format!("Trend: {}", reading.trend.to_string().to_uppercase()),
        format!("Zone: {}", reading.zone.to_string().to_uppercase()),
        format!("Timeframe: {}", config.timeframe),
    ];
    if let Some(p) = price {
        lines.push(format!("Price: {} ({})", p.price, p.source));
    }
    if !definition.description.is_empty() {
        lines.push(format!("Description: {}", definition.description));
    }
    lines.join("\n")
}

/// Trigger message for a single-symbol price alert, over its 5-minute candle.
pub fn format_price_notification(alert: &PriceAlert, symbol: &str, candle: &Candle) -> String {
    let mut lines = vec![
        format!("🚨 Alert for {symbol}!"),
        format!("Current price: ${:.2}", candle.close),
        format!("Price range in last 5 min: ${:.2}-${:.2}", candle.low, candle.high),
        format!("Alert condition: ${} {}", alert.price, alert.operator),
    ];
    if !alert.description.is_empty() {
        lines.push(format!("Description: {}", alert.description));
    }
    lines.join("\n")
}

/// Trigger message for a ratio alert. The headline ratio uses closes.
pub fn format_ratio_notification(
    alert: &PriceAlert,
    (symbol1, candle1): (&str, &Candle),
    (symbol2, candle2): (&str, &Candle),
) -> String {
    let ratio = if candle2.close != 0.0 {
        candle1.close / candle2.close
    } else {
        0.0
    };
    let range = |symbol: &str, c: &Candle| {
        format!("{symbol}: ${:.2} (Range: ${:.2}-${:.2})", c.close, c.low, c.high)
    };
    let mut lines = vec![
        format!("🚨 Ratio Alert for {symbol1}/{symbol2}!"),
        format!("Current ratio: {ratio:.4}"),
        format!("Alert condition: {} {}", alert.price, alert.operator),
        "Current prices:".to_string(),
        range(symbol1, candle1),
        range(symbol2, candle2),
    ];
    if !alert.description.is_empty() {
        lines.push(format!("Description: {}", alert.description));
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use chrono::DateTime;
    use common::{IndicatorType, PriceOperator, PriceTarget, RsiConfig, Timeframe, Trend, Zone};
    use store::PriceSource;

    use super::*;

    fn definition() -> AlertDefinition {
        AlertDefinition {
            id: "a1".into(),
            symbol: "BTC".into(),
            indicator_type: IndicatorType::Rsi,
            config: RsiConfig {
                timeframe: Timeframe::Hour4,
                ..RsiConfig::default()
            },
            enabled: true,
            description: "BTC swing alert".into(),
            last_triggered_at: None,
        }
    }

    fn reading(value: f64, previous: Option<f64>) -> IndicatorReading {
        IndicatorReading {
            value,
            previous_value: previous,
            trend: Trend::between(previous, value),
            zone: Zone::classify(value, 70.0, 30.0),
            close_time: None,
            previous_close_time: None,
            last_close: 42_000.0,
        }
    }

    #[test]
    fn crossover_message_names_level_and_context() {
        let text = format_notification(
            &definition(),
            TransitionKind::CrossoverOverbought,
            &reading(72.346, Some(65.1)),
            None,
        );
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "🔔 RSI Alert for BTC!");
        assert_eq!(lines[1], "🔺 RSI crossed above overbought level (70): 72.35");
        assert_eq!(lines[2], "Previous RSI: 65.10");
        assert_eq!(lines[3], "Trend: RISING");
        assert_eq!(lines[4], "Zone: OVERBOUGHT");
        assert_eq!(lines[5], "Timeframe: 4h");
        assert_eq!(lines[6], "Description: BTC swing alert");
    }

    #[test]
    fn exit_message_includes_price_when_known() {
        let price = LatestPrice {
            price: 41_950.5,
            candle: Candle {
                symbol: "BTC".into(),
                timeframe: Timeframe::Hour4,
                open_time: DateTime::from_timestamp(0, 0).unwrap(),
                open: 1.0,
                high: 1.0,
                low: 1.0,
                close: 41_950.5,
                volume: 0.0,
            },
            source: PriceSource::Memo,
        };
        let text = format_notification(
            &definition(),
            TransitionKind::ExitOversold,
            &reading(31.0, Some(28.0)),
            Some(&price),
        );
        assert!(text.contains("🔄 RSI exited oversold zone: 31.00"));
        assert!(text.contains("Price: 41950.5 (memo)"));
    }

    fn five_minute(symbol: &str, low: f64, high: f64, close: f64) -> Candle {
        Candle {
            symbol: symbol.into(),
            timeframe: Timeframe::Min5,
            open_time: DateTime::from_timestamp(0, 0).unwrap(),
            open: close,
            high,
            low,
            close,
            volume: 0.0,
        }
    }

    fn price_alert(target: PriceTarget, operator: PriceOperator, price: f64) -> PriceAlert {
        PriceAlert {
            id: "p".into(),
            target,
            operator,
            price,
            description: "breakout".into(),
            triggered_at: None,
        }
    }

    #[test]
    fn price_message_shows_range_and_condition() {
        let alert = price_alert(
            PriceTarget::Single { symbol: "BTC".into() },
            PriceOperator::Above,
            50_000.0,
        );
        let text = format_price_notification(&alert, "BTC", &five_minute("BTC", 49_900.0, 50_120.5, 50_010.0));
        assert_eq!(
            text,
            "🚨 Alert for BTC!\n\
             Current price: $50010.00\n\
             Price range in last 5 min: $49900.00-$50120.50\n\
             Alert condition: $50000 >\n\
             Description: breakout"
        );
    }

    #[test]
    fn ratio_message_lists_both_legs() {
        let alert = price_alert(
            PriceTarget::Ratio {
                symbol1: "ETH".into(),
                symbol2: "BTC".into(),
            },
            PriceOperator::Below,
            0.05,
        );
        let eth = five_minute("ETH", 2_390.0, 2_410.0, 2_400.0);
        let btc = five_minute("BTC", 49_000.0, 51_000.0, 50_000.0);
        let text = format_ratio_notification(&alert, ("ETH", &eth), ("BTC", &btc));
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "🚨 Ratio Alert for ETH/BTC!");
        assert_eq!(lines[1], "Current ratio: 0.0480");
        assert_eq!(lines[2], "Alert condition: 0.05 <");
        assert_eq!(lines[4], "ETH: $2400.00 (Range: $2390.00-$2410.00)");
        assert_eq!(lines[5], "BTC: $50000.00 (Range: $49000.00-$51000.00)");
        assert_eq!(lines[6], "Description: breakout");
    }
}
