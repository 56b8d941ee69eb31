use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::path::Path;
use thiserror::Error;
use tracing::{error, info};
use validator::{Validate, ValidationError, ValidationErrors};

/// Default values for configuration
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const DEFAULT_PORT: u16 = 8080;
const CONFIG_DIR: &str = "config";
const DEFAULT_SETTINGS_CACHE_TTL_SECS: u64 = 60;
const DEFAULT_RECOVERY_MAX_ATTEMPTS: u32 = 20;
const DEFAULT_RECOVERY_INTERVAL_MS: u64 = 2_000;
const DEFAULT_RETRY_MAX_ATTEMPTS: u32 = 3;
const DEFAULT_RETRY_INITIAL_DELAY_MS: u64 = 200;
const DEFAULT_RETRY_MAX_DELAY_MS: u64 = 5_000;
const DEFAULT_RETRY_BACKOFF_MULTIPLIER: f64 = 2.0;
const DEFAULT_WEBHOOK_TOLERANCE_SECS: u64 = 300;

/// Retry policy for outbound payment-provider calls. Only errors the
/// payments layer marks retryable are retried.
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetryConfig {
    #[serde(default = "default_retry_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_retry_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_retry_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_retry_backoff_multiplier")]
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_RETRY_MAX_ATTEMPTS,
            initial_delay_ms: DEFAULT_RETRY_INITIAL_DELAY_MS,
            max_delay_ms: DEFAULT_RETRY_MAX_DELAY_MS,
            backoff_multiplier: DEFAULT_RETRY_BACKOFF_MULTIPLIER,
        }
    }
}

/// PayPal gateway credentials and environment.
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PayPalConfig {
    pub client_id: String,
    pub client_secret: String,
    /// "sandbox" or "production"
    #[serde(default = "default_paypal_environment")]
    pub environment: String,
    /// Webhook id registered with PayPal; required for signature verification.
    #[serde(default)]
    pub webhook_id: Option<String>,
    #[serde(default)]
    pub webhook_url: Option<String>,
    #[serde(default = "default_paypal_currencies")]
    pub supported_currencies: Vec<String>,
}

/// Payment orchestration configuration.
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PaymentsConfig {
    /// Provider used when neither an explicit id nor a currency match
    /// selects one. Must name a configured provider.
    #[serde(default = "default_payment_provider")]
    pub default_provider: String,
    #[serde(default = "default_currency")]
    pub default_currency: String,
    /// Optional shared secret for generic HMAC webhook verification at the
    /// HTTP boundary (in addition to provider-level verification).
    #[serde(default)]
    pub webhook_secret: Option<String>,
    #[serde(default = "default_webhook_tolerance_secs")]
    pub webhook_tolerance_secs: u64,
    /// Bounded polling used when a client-side capture call fails but the
    /// provider webhook may still complete the payment.
    #[serde(default = "default_recovery_max_attempts")]
    pub recovery_max_attempts: u32,
    #[serde(default = "default_recovery_interval_ms")]
    pub recovery_interval_ms: u64,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub paypal: Option<PayPalConfig>,
}

impl Default for PaymentsConfig {
    fn default() -> Self {
        Self {
            default_provider: default_payment_provider(),
            default_currency: default_currency(),
            webhook_secret: None,
            webhook_tolerance_secs: DEFAULT_WEBHOOK_TOLERANCE_SECS,
            recovery_max_attempts: DEFAULT_RECOVERY_MAX_ATTEMPTS,
            recovery_interval_ms: DEFAULT_RECOVERY_INTERVAL_MS,
            retry: RetryConfig::default(),
            paypal: None,
        }
    }
}

/// Application configuration structure with validation
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Database connection URL
    pub database_url: String,

    /// Server host address
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Application environment
    pub environment: String,

    /// Logging level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log in JSON format (structured logging)
    #[serde(default)]
    pub log_json: bool,

    /// Whether to bootstrap the schema on startup (sqlite / development)
    #[serde(default)]
    pub auto_migrate: bool,

    /// CORS: comma-separated list of allowed origins
    #[serde(default)]
    pub cors_allowed_origins: Option<String>,

    /// TTL for cached store settings reads
    #[serde(default = "default_settings_cache_ttl_secs")]
    pub settings_cache_ttl_secs: u64,

    /// Payment orchestration configuration
    #[serde(default)]
    pub payments: PaymentsConfig,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}
fn default_settings_cache_ttl_secs() -> u64 {
    DEFAULT_SETTINGS_CACHE_TTL_SECS
}
fn default_payment_provider() -> String {
    "paypal".to_string()
}
fn default_currency() -> String {
    "USD".to_string()
}
fn default_paypal_environment() -> String {
    "sandbox".to_string()
}
fn default_paypal_currencies() -> Vec<String> {
    vec!["USD".to_string(), "EUR".to_string(), "GBP".to_string()]
}
fn default_webhook_tolerance_secs() -> u64 {
    DEFAULT_WEBHOOK_TOLERANCE_SECS
}
fn default_recovery_max_attempts() -> u32 {
    DEFAULT_RECOVERY_MAX_ATTEMPTS
}
fn default_recovery_interval_ms() -> u64 {
    DEFAULT_RECOVERY_INTERVAL_MS
}
fn default_retry_max_attempts() -> u32 {
    DEFAULT_RETRY_MAX_ATTEMPTS
}
fn default_retry_initial_delay_ms() -> u64 {
    DEFAULT_RETRY_INITIAL_DELAY_MS
}
fn default_retry_max_delay_ms() -> u64 {
    DEFAULT_RETRY_MAX_DELAY_MS
}
fn default_retry_backoff_multiplier() -> f64 {
    DEFAULT_RETRY_BACKOFF_MULTIPLIER
}

impl AppConfig {
    pub fn log_level(&self) -> &str {
        &self.log_level
    }

    pub fn is_development(&self) -> bool {
        self.environment.eq_ignore_ascii_case("development")
    }

    /// Constraints the `Validate` derive cannot express.
    pub fn validate_additional_constraints(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();

        if self.payments.default_provider.trim().is_empty() {
            errors.add(
                "payments.default_provider",
                ValidationError::new("default payment provider must not be empty"),
            );
        }

        if let Some(paypal) = &self.payments.paypal {
            if !matches!(paypal.environment.as_str(), "sandbox" | "production") {
                errors.add(
                    "payments.paypal.environment",
                    ValidationError::new("paypal environment must be sandbox or production"),
                );
            }
            if paypal.client_id.trim().is_empty() || paypal.client_secret.trim().is_empty() {
                errors.add(
                    "payments.paypal.client_id",
                    ValidationError::new("paypal credentials must not be empty"),
                );
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

#[derive(Debug, Error)]
pub enum AppConfigError {
    #[error("configuration load error: {0}")]
    Load(#[from] ConfigError),
    #[error("configuration validation error: {0}")]
    Validation(ValidationErrors),
}

/// Initializes tracing using the provided log level as the default filter
pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default_directive = format!("storefront_api={},tower_http=debug", level);
    let filter_directive = env::var("RUST_LOG")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(default_directive);

    if json {
        let _ = fmt()
            .with_env_filter(EnvFilter::new(filter_directive))
            .json()
            .try_init();
    } else {
        let _ = fmt()
            .with_env_filter(EnvFilter::new(filter_directive))
            .try_init();
    }
}

/// Loads application configuration
///
/// Layers configuration sources in this order:
/// 1. Default config (config/default.toml)
/// 2. Environment-specific config (config/{env}.toml)
/// 3. Environment variables (APP__*)
pub fn load_config() -> Result<AppConfig, AppConfigError> {
    let run_env = env::var("RUN_ENV")
        .or_else(|_| env::var("APP_ENV"))
        .unwrap_or_else(|_| DEFAULT_ENV.to_string());
    info!("Loading configuration for environment: {}", run_env);

    if !Path::new(CONFIG_DIR).exists() {
        info!(
            "Config directory '{}' not found; relying on built-in defaults and environment variables",
            CONFIG_DIR
        );
    }

    let builder = Config::builder()
        .set_default("database_url", "sqlite://storefront.db?mode=rwc")?
        .set_default("host", "0.0.0.0")?
        .set_default("port", DEFAULT_PORT)?
        .set_default("environment", DEFAULT_ENV)?
        .set_default("log_level", DEFAULT_LOG_LEVEL)?
        .set_default("log_json", false)?
        .add_source(File::with_name(&format!("{}/default", CONFIG_DIR)).required(false))
        .add_source(File::with_name(&format!("{}/{}", CONFIG_DIR, run_env)).required(false));

    let config = builder
        .add_source(Environment::with_prefix("APP").separator("__"))
        .build()?;

    let app_config: AppConfig = config.try_deserialize()?;

    app_config.validate().map_err(|e| {
        error!("Configuration validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    app_config.validate_additional_constraints().map_err(|e| {
        error!("Configuration validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    info!("Configuration loaded successfully");
    Ok(app_config)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> AppConfig {
        AppConfig {
            database_url: "sqlite::memory:".into(),
            host: "127.0.0.1".into(),
            port: DEFAULT_PORT,
            environment: "development".into(),
            log_level: DEFAULT_LOG_LEVEL.into(),
            log_json: false,
            auto_migrate: true,
            cors_allowed_origins: None,
            settings_cache_ttl_secs: DEFAULT_SETTINGS_CACHE_TTL_SECS,
            payments: PaymentsConfig::default(),
        }
    }

    #[test]
    fn default_payments_config_is_valid() {
        let cfg = base_config();
        assert!(cfg.validate_additional_constraints().is_ok());
        assert_eq!(cfg.payments.default_provider, "paypal");
        assert_eq!(cfg.payments.recovery_max_attempts, 20);
    }

    #[test]
    fn empty_default_provider_is_rejected() {
        let mut cfg = base_config();
        cfg.payments.default_provider = "".into();
        assert!(cfg.validate_additional_constraints().is_err());
    }

    #[test]
    fn bad_paypal_environment_is_rejected() {
        let mut cfg = base_config();
        cfg.payments.paypal = Some(PayPalConfig {
            client_id: "id".into(),
            client_secret: "secret".into(),
            environment: "staging".into(),
            webhook_id: None,
            webhook_url: None,
            supported_currencies: default_paypal_currencies(),
        });
        assert!(cfg.validate_additional_constraints().is_err());
    }
}
