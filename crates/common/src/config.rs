use std::time::Duration;

/// All configuration loaded from environment variables at startup.
/// Missing required variables cause an immediate panic with a clear message.
#[derive(Debug, Clone)]
pub struct Config {
    // Database
    pub database_url: String,

    // Telegram
    pub telegram_enabled: bool,
    pub telegram_token: String,
    pub telegram_chat_ids: Vec<i64>,

    // Alert definitions imported at startup
    pub alerts_config_path: Option<String>,

    // Scheduling
    pub poll_interval: Duration,
    pub worker_concurrency: usize,

    // Market data
    pub gateway_timeout: Duration,
    pub kucoin_symbols: Vec<String>,
    pub quote_asset: String,

    // Candle retention
    pub candle_retention_days: i64,
}

impl Config {
    /// Load all configuration from environment variables.
    /// Loads `.env` if present. Panics on any missing required variable.
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv(); // ignore error if .env not present

        let telegram_enabled = optional_env("TELEGRAM_ENABLED")
            .map(|v| v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);

        let (telegram_token, telegram_chat_ids) = if telegram_enabled {
            let ids = parse_chat_ids(&required_env("TELEGRAM_CHAT_IDS"));
            (required_env("TELEGRAM_TOKEN"), ids)
        } else {
            (String::new(), Vec::new())
        };

        Config {
            database_url: required_env("DATABASE_URL"),
            telegram_enabled,
            telegram_token,
            telegram_chat_ids,
            alerts_config_path: optional_env("ALERTS_CONFIG_PATH"),
            poll_interval: Duration::from_secs(parsed_env("POLL_INTERVAL_SECONDS", 60)),
            worker_concurrency: parsed_env("WORKER_CONCURRENCY", 4usize).max(1),
            gateway_timeout: Duration::from_secs(parsed_env("GATEWAY_TIMEOUT_SECONDS", 10)),
            kucoin_symbols: optional_env("KUCOIN_SYMBOLS")
                .map(|v| split_list(&v))
                .unwrap_or_else(|| split_list("AKT,KCS,DYM,VIRTUAL")),
            quote_asset: optional_env("QUOTE_ASSET")
                .map(|v| v.trim().to_uppercase())
                .unwrap_or_else(|| "USDT".to_string()),
            candle_retention_days: parsed_env("CANDLE_RETENTION_DAYS", 30),
        }
    }
}

fn parse_chat_ids(raw: &str) -> Vec<i64> {
    raw.split(',')
        .filter(|s| !s.trim().is_empty())
        .map(|s| {
            s.trim().parse::<i64>().unwrap_or_else(|_| {
                panic!("TELEGRAM_CHAT_IDS contains non-numeric ID: '{}'", s.trim())
            })
        })
        .collect()
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_uppercase())
        .filter(|s| !s.is_empty())
        .collect()
}

fn required_env(key: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| {
        panic!("Required environment variable '{key}' is not set. Check your .env file.")
    })
}

fn optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

fn parsed_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    match optional_env(key) {
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            panic!("Environment variable '{key}' has an invalid value: '{raw}'")
        }),
        None => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_ids_parse_and_skip_blanks() {
        assert_eq!(parse_chat_ids("12, -345,,"), vec![12, -345]);
    }

    #[test]
    #[should_panic(expected = "non-numeric")]
    fn chat_ids_reject_garbage() {
        parse_chat_ids("12,abc");
    }

    #[test]
    fn symbol_lists_are_upper_cased() {
        assert_eq!(split_list(" akt,Kcs , "), vec!["AKT", "KCS"]);
    }
}
