use serde::Deserialize;
use skyledger_catalog::search::DEFAULT_MAX_RESULTS;
use skyledger_catalog::DEFAULT_LOGO_REF;
use skyledger_core::{Address, Amount};
use skyledger_order::LedgerSettings;
use std::collections::HashMap;
use std::env;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub auth: AuthConfig,
    pub ledger: LedgerConfig,
    #[serde(default)]
    pub payments: PaymentsConfig,
    pub rate_limit: RateLimitConfig,
    pub database: Option<DatabaseConfig>,
    pub redis: Option<RedisConfig>,
    pub kafka: Option<KafkaConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AuthConfig {
    pub jwt_secret: String,
    pub jwt_expiration_seconds: u64,
    /// Serve `/v1/auth/token` for any subject. Development only.
    #[serde(default)]
    pub issue_tokens: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LedgerConfig {
    pub admin: String,
    #[serde(default = "default_max_search_results")]
    pub max_search_results: usize,
    #[serde(default = "default_logo_ref")]
    pub default_logo_ref: String,
}

fn default_max_search_results() -> usize {
    DEFAULT_MAX_RESULTS
}

fn default_logo_ref() -> String {
    DEFAULT_LOGO_REF.to_string()
}

impl LedgerConfig {
    pub fn admin(&self) -> Address {
        Address::new(self.admin.clone())
    }

    pub fn settings(&self) -> LedgerSettings {
        LedgerSettings {
            max_search_results: self.max_search_results,
            default_logo_ref: self.default_logo_ref.clone(),
        }
    }
}

/// Seed balances for the in-process rail, keyed by address.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct PaymentsConfig {
    #[serde(default)]
    pub opening_balances: HashMap<String, u64>,
}

impl PaymentsConfig {
    pub fn balances(&self) -> impl Iterator<Item = (Address, Amount)> + '_ {
        self.opening_balances
            .iter()
            .map(|(address, amount)| (Address::new(address.clone()), Amount::from(*amount)))
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RateLimitConfig {
    pub requests: i64,
    pub window_seconds: i64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RedisConfig {
    pub url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct KafkaConfig {
    pub brokers: String,
    #[serde(default = "default_topic")]
    pub topic: String,
}

fn default_topic() -> String {
    "skyledger.events".to_string()
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = config::Config::builder()
            .add_source(config::File::with_name("config/default"))
            // Optional per-environment overrides
            .add_source(config::File::with_name(&format!("config/{}", run_mode)).required(false))
            // Not checked in
            .add_source(config::File::with_name("config/local").required(false))
            // e.g. SKYLEDGER__SERVER__PORT=8080
            .add_source(config::Environment::with_prefix("SKYLEDGER").separator("__"))
            .build()?;

        s.try_deserialize()
    }

    pub fn from_toml(source: &str) -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(config::File::from_str(source, config::FileFormat::Toml))
            .build()?
            .try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
        [server]
        port = 3000

        [auth]
        jwt_secret = "secret"
        jwt_expiration_seconds = 3600

        [ledger]
        admin = "0xadmin"

        [rate_limit]
        requests = 100
        window_seconds = 60
    "#;

    #[test]
    fn test_optional_sections_default() {
        let config = Config::from_toml(MINIMAL).unwrap();

        assert_eq!(config.server.port, 3000);
        assert!(!config.auth.issue_tokens);
        assert_eq!(config.ledger.admin(), Address::new("0xadmin"));
        assert_eq!(config.ledger.settings().max_search_results, DEFAULT_MAX_RESULTS);
        assert_eq!(config.ledger.default_logo_ref, DEFAULT_LOGO_REF);
        assert!(config.payments.opening_balances.is_empty());
        assert!(config.database.is_none());
        assert!(config.redis.is_none());
        assert!(config.kafka.is_none());
    }

    #[test]
    fn test_opening_balances_and_kafka() {
        let source = format!(
            "{}\n[payments.opening_balances]\n\"0xbuyer\" = 5000\n\n[kafka]\nbrokers = \"localhost:9092\"\n",
            MINIMAL
        );
        let config = Config::from_toml(&source).unwrap();

        let balances: Vec<(Address, Amount)> = config.payments.balances().collect();
        assert_eq!(balances, vec![(Address::new("0xbuyer"), 5000)]);
        let kafka = config.kafka.unwrap();
        assert_eq!(kafka.brokers, "localhost:9092");
        assert_eq!(kafka.topic, "skyledger.events");
    }

    #[test]
    fn test_checked_in_defaults_do_not_issue_tokens() {
        let config = Config::from_toml(include_str!("../../config/default.toml")).unwrap();

        assert!(!config.auth.issue_tokens);
        assert!(config.database.is_none());
    }
}
