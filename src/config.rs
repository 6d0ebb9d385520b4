use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use crate::db::store::DEFAULT_SNAPSHOT_RETENTION;
use crate::valuation::engine::ValuationEngine;
use crate::valuation::gauge::GaugeConfig;
use crate::valuation::metrics::DEFAULT_REFERENCE_MULTIPLE;
use crate::valuation::tier::TierTable;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub valuation: ValuationConfig,
    #[serde(default)]
    pub gauge: GaugeConfig,
    pub fundamentals: FundamentalsConfig,
    pub market_data: MarketDataConfig,
    pub rate_limit: RateLimitConfig,
    pub alerts: AlertsConfig,
    pub assistant: AssistantConfig,
    pub monitoring: MonitoringConfig,
    pub dashboard: DashboardConfig,
    pub database: DatabaseConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ValuationConfig {
    #[serde(default = "default_reference_multiple")]
    pub reference_multiple: f64,
    /// Validated while deserializing; a malformed table fails the whole load.
    #[serde(default)]
    pub tiers: TierTable,
}

fn default_reference_multiple() -> f64 {
    DEFAULT_REFERENCE_MULTIPLE
}

#[derive(Debug, Clone, Deserialize)]
pub struct FundamentalsConfig {
    /// Snapshot used until the first successful live fetch (billions).
    pub fallback_revenue: f64,
    pub fallback_shares: f64,
    pub fallback_as_of: String,
    pub min_revenue: f64,
    pub max_revenue: f64,
    pub min_shares: f64,
    pub max_shares: f64,
    pub refresh_interval_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MarketDataConfig {
    pub symbol: String,
    pub base_url: String,
    pub request_timeout_seconds: u64,
    pub poll_interval_seconds: u64,
    pub max_retries: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    pub requests_per_second: u32,
    pub burst_size: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AlertsConfig {
    pub enabled: bool,
    pub price_threshold_high: Option<f64>,
    pub price_threshold_low: Option<f64>,
    pub valuation_alerts: bool,
    pub large_movement_alerts: bool,
    pub large_movement_threshold_pct: f64,
    pub daily_digest: bool,
    /// UTC hour after which the digest is sent, once per day.
    pub daily_digest_hour: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AssistantConfig {
    pub enabled: bool,
    pub api_url: String,
    pub model: String,
    pub max_tokens: u32,
    pub request_timeout_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MonitoringConfig {
    pub log_level: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DashboardConfig {
    pub enabled: bool,
    pub bind: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub path: String,
    /// Snapshots kept per symbol; older rows are pruned on insert.
    #[serde(default = "default_snapshot_retention")]
    pub snapshot_retention: u32,
}

fn default_snapshot_retention() -> u32 {
    DEFAULT_SNAPSHOT_RETENTION
}

impl DatabaseConfig {
    pub fn url(&self) -> String {
        format!("sqlite:{}", self.path)
    }
}

/// Secrets loaded exclusively from environment variables.
/// Not serializable, not stored in config files.
pub struct Secrets {
    pub assistant_api_key: Option<String>,
    pub alert_webhook_url: Option<String>,
}

impl Secrets {
    pub fn from_env() -> Self {
        Self {
            assistant_api_key: non_empty_var("ASSISTANT_API_KEY"),
            alert_webhook_url: non_empty_var("ALERT_WEBHOOK_URL"),
        }
    }

    pub fn none() -> Self {
        Self {
            assistant_api_key: None,
            alert_webhook_url: None,
        }
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|value| !value.trim().is_empty())
}

impl AppConfig {
    /// Load configuration from config/default.toml, overlaying environment variables for secrets.
    pub fn load() -> Result<(Self, Secrets)> {
        Self::load_from(Path::new("config/default.toml"))
    }

    pub fn load_from(config_path: &Path) -> Result<(Self, Secrets)> {
        dotenvy::dotenv().ok();

        let contents = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let config = Self::from_toml_str(&contents)
            .with_context(|| format!("Invalid config file: {}", config_path.display()))?;

        let secrets = Secrets::from_env();

        Ok((config, secrets))
    }

    /// Parse and validate. The tier table is checked during deserialization.
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(contents).context("Failed to parse config")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.engine()?;

        let f = &self.fundamentals;
        if !(f.min_revenue > 0.0 && f.min_revenue < f.max_revenue) {
            bail!(
                "fundamentals revenue range [{}, {}] is invalid",
                f.min_revenue,
                f.max_revenue
            );
        }
        if !(f.min_shares > 0.0 && f.min_shares < f.max_shares) {
            bail!(
                "fundamentals shares range [{}, {}] is invalid",
                f.min_shares,
                f.max_shares
            );
        }
        if !(f.fallback_revenue > 0.0 && f.fallback_shares > 0.0) {
            bail!("fallback fundamentals must be positive");
        }

        if let (Some(low), Some(high)) = (
            self.alerts.price_threshold_low,
            self.alerts.price_threshold_high,
        ) {
            if low >= high {
                bail!("alert price_threshold_low ({low}) must be below price_threshold_high ({high})");
            }
        }
        if self.alerts.daily_digest_hour > 23 {
            bail!("alert daily_digest_hour must be 0-23");
        }
        if self.market_data.poll_interval_seconds == 0 {
            bail!("market_data poll_interval_seconds must be positive");
        }

        Ok(())
    }

    pub fn engine(&self) -> Result<ValuationEngine> {
        ValuationEngine::new(
            self.valuation.tiers.clone(),
            self.valuation.reference_multiple,
            self.gauge.clone(),
        )
        .context("Invalid valuation configuration")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn default_toml() -> &'static str {
        include_str!("../config/default.toml")
    }

    #[test]
    fn test_parse_default_config() {
        let config = AppConfig::from_toml_str(default_toml()).expect("should parse");
        assert_eq!(config.market_data.symbol, "TSLA");
        assert_eq!(config.valuation.reference_multiple, 9.5);
        assert_eq!(config.valuation.tiers, TierTable::reference());
        assert_eq!(config.gauge, GaugeConfig::default());
        assert_eq!(config.fundamentals.fallback_revenue, 97.0);
        assert_eq!(config.fundamentals.fallback_shares, 3.19);
        assert_eq!(config.alerts.large_movement_threshold_pct, 10.0);
        assert_eq!(config.database.snapshot_retention, 1440);
    }

    #[test]
    fn test_snapshot_retention_defaults_when_omitted() {
        let trimmed = default_toml().replacen("snapshot_retention = 1440\n", "", 1);
        assert!(!trimmed.contains("snapshot_retention"));
        let config = AppConfig::from_toml_str(&trimmed).unwrap();
        assert_eq!(config.database.snapshot_retention, DEFAULT_SNAPSHOT_RETENTION);
    }

    #[test]
    fn test_malformed_tier_table_fails_load() {
        let broken = default_toml().replacen("min_multiple = 7.0", "min_multiple = 8.0", 1);
        let err = AppConfig::from_toml_str(&broken).unwrap_err();
        assert!(format!("{err:#}").contains("gap"), "{err:#}");
    }

    #[test]
    fn test_bad_reference_multiple_fails_load() {
        let broken = default_toml().replacen("reference_multiple = 9.5", "reference_multiple = 0.0", 1);
        assert!(AppConfig::from_toml_str(&broken).is_err());
    }

    #[test]
    fn test_inverted_alert_thresholds_fail_load() {
        let broken = default_toml()
            .replacen("# price_threshold_high = 500.0", "price_threshold_high = 100.0", 1)
            .replacen("# price_threshold_low = 150.0", "price_threshold_low = 200.0", 1);
        assert!(AppConfig::from_toml_str(&broken).is_err());
    }

    #[test]
    fn test_database_url() {
        let db = DatabaseConfig {
            path: "test.db".to_string(),
            snapshot_retention: default_snapshot_retention(),
        };
        assert_eq!(db.url(), "sqlite:test.db");
    }
}
