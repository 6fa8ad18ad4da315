use crate::models::Currency;
use rust_decimal::Decimal;
use secrecy::Secret;
use serde::Deserialize;
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct LedgerConfig {
    #[serde(flatten)]
    pub common: core_config::Config,
    pub service_name: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    pub default_currency: Currency,
    pub database: DatabaseConfig,
    pub collection: CollectionConfig,
    pub gateway: GatewayConfig,
    pub notification: NotificationConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: Secret<String>,
    pub max_connections: u32,
    pub min_connections: u32,
}

/// Reminder cadence and late-fee policy.
#[derive(Debug, Clone, Deserialize)]
pub struct CollectionConfig {
    pub enabled: bool,
    pub interval: Duration,
    pub days_before_due: i64,
    /// Days past due on which an overdue reminder goes out.
    pub overdue_ladder: Vec<u32>,
    pub due_soon_suppression: Duration,
    pub overdue_suppression: Duration,
    /// Percent of the outstanding balance; zero disables late fees.
    pub late_fee_percent: Decimal,
    pub late_fee_cap: Decimal,
    pub grace_period_days: i64,
    /// Invoices this many days past due are moved to overdue in bulk.
    pub overdue_threshold_days: i64,
    pub dispatch_timeout: Duration,
    pub max_concurrent_checks: usize,
}

impl Default for CollectionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: Duration::from_secs(3600),
            days_before_due: 3,
            overdue_ladder: vec![1, 7, 14, 30],
            due_soon_suppression: Duration::from_secs(24 * 3600),
            overdue_suppression: Duration::from_secs(2 * 24 * 3600),
            late_fee_percent: Decimal::ZERO,
            late_fee_cap: Decimal::new(5000, 0),
            grace_period_days: 3,
            overdue_threshold_days: 60,
            dispatch_timeout: Duration::from_secs(10),
            max_concurrent_checks: 8,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    pub api_url: String,
    pub secret_key: Secret<String>,
    /// When set, webhook bodies must carry a valid HMAC-SHA256 signature.
    pub webhook_secret: Option<Secret<String>>,
    pub callback_url: String,
    pub timeout: Duration,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NotificationConfig {
    /// Notices are logged instead of delivered when unset.
    pub endpoint: Option<String>,
    pub timeout: Duration,
}

impl LedgerConfig {
    pub fn load() -> Result<Self, AppError> {
        let common = core_config::Config::load()?;
        let is_prod = env::var("ENVIRONMENT").unwrap_or_else(|_| "dev".to_string()) == "prod";
        let defaults = CollectionConfig::default();

        Ok(LedgerConfig {
            common,
            service_name: get_env("SERVICE_NAME", Some("invoice-ledger"), false)?,
            log_level: get_env("LOG_LEVEL", Some("info"), false)?,
            otlp_endpoint: env::var("OTLP_ENDPOINT").ok(),
            default_currency: {
                let code = get_env("DEFAULT_CURRENCY", Some("KES"), false)?;
                Currency::parse(&code).ok_or_else(|| {
                    AppError::ConfigError(anyhow::anyhow!("Unsupported DEFAULT_CURRENCY: {}", code))
                })?
            },
            database: DatabaseConfig {
                url: Secret::new(get_env(
                    "DATABASE_URL",
                    Some("postgres://localhost:5432/invoice_ledger"),
                    is_prod,
                )?),
                max_connections: parse_env("DATABASE_MAX_CONNECTIONS", 10)?,
                min_connections: parse_env("DATABASE_MIN_CONNECTIONS", 1)?,
            },
            collection: CollectionConfig {
                enabled: parse_env("COLLECTION_ENABLED", defaults.enabled)?,
                interval: positive_secs(
                    "COLLECTION_INTERVAL_SECS",
                    parse_env("COLLECTION_INTERVAL_SECS", defaults.interval.as_secs())?,
                )?,
                days_before_due: parse_env("REMINDER_DAYS_BEFORE_DUE", defaults.days_before_due)?,
                overdue_ladder: match env::var("REMINDER_OVERDUE_LADDER") {
                    Ok(raw) => parse_ladder(&raw)?,
                    Err(_) => defaults.overdue_ladder,
                },
                due_soon_suppression: defaults.due_soon_suppression,
                overdue_suppression: defaults.overdue_suppression,
                late_fee_percent: parse_env("LATE_FEE_PERCENT", defaults.late_fee_percent)?,
                late_fee_cap: parse_env("LATE_FEE_CAP", defaults.late_fee_cap)?,
                grace_period_days: parse_env("LATE_FEE_GRACE_DAYS", defaults.grace_period_days)?,
                overdue_threshold_days: parse_env(
                    "OVERDUE_THRESHOLD_DAYS",
                    defaults.overdue_threshold_days,
                )?,
                dispatch_timeout: Duration::from_secs(parse_env(
                    "NOTICE_DISPATCH_TIMEOUT_SECS",
                    defaults.dispatch_timeout.as_secs(),
                )?),
                max_concurrent_checks: parse_env(
                    "COLLECTION_MAX_CONCURRENCY",
                    defaults.max_concurrent_checks,
                )?,
            },
            gateway: GatewayConfig {
                api_url: get_env("INTASEND_API_URL", Some("https://sandbox.intasend.com"), is_prod)?,
                secret_key: Secret::new(get_env("INTASEND_SECRET_KEY", Some(""), is_prod)?),
                webhook_secret: env::var("INTASEND_WEBHOOK_SECRET")
                    .ok()
                    .filter(|s| !s.is_empty())
                    .map(Secret::new),
                callback_url: get_env(
                    "INTASEND_CALLBACK_URL",
                    Some("http://localhost:8080/webhooks/intasend"),
                    is_prod,
                )?,
                timeout: Duration::from_secs(parse_env("INTASEND_TIMEOUT_SECS", 30)?),
            },
            notification: NotificationConfig {
                endpoint: env::var("NOTIFICATION_ENDPOINT").ok().filter(|s| !s.is_empty()),
                timeout: Duration::from_secs(parse_env("NOTIFICATION_TIMEOUT_SECS", 10)?),
            },
        })
    }
}

fn get_env(key: &str, default: Option<&str>, is_prod: bool) -> Result<String, AppError> {
    match env::var(key) {
        Ok(val) => Ok(val),
        Err(_) => {
            if is_prod {
                Err(AppError::ConfigError(anyhow::anyhow!(
                    "{} is required in production but not set",
                    key
                )))
            } else if let Some(def) = default {
                Ok(def.to_string())
            } else {
                Err(AppError::ConfigError(anyhow::anyhow!(
                    "{} is required but not set",
                    key
                )))
            }
        }
    }
}

fn parse_env<T>(key: &str, default: T) -> Result<T, AppError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| AppError::ConfigError(anyhow::anyhow!("Invalid {}: {}", key, e))),
        Err(_) => Ok(default),
    }
}

/// A duration of `secs` seconds; zero is rejected.
pub fn positive_secs(key: &str, secs: u64) -> Result<Duration, AppError> {
    if secs == 0 {
        return Err(AppError::ConfigError(anyhow::anyhow!(
            "{} must be greater than zero",
            key
        )));
    }
    Ok(Duration::from_secs(secs))
}

/// Parse a comma-separated list of day offsets, e.g. "1,7,14,30".
pub fn parse_ladder(raw: &str) -> Result<Vec<u32>, AppError> {
    let mut ladder = raw
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<u32>().map_err(|e| {
                AppError::ConfigError(anyhow::anyhow!("Invalid overdue ladder entry '{}': {}", s, e))
            })
        })
        .collect::<Result<Vec<_>, _>>()?;
    ladder.sort_unstable();
    ladder.dedup();
    Ok(ladder)
}
