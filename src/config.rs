// config.rs
use std::str::FromStr;

use bigdecimal::BigDecimal;

use crate::utils::money::{fits_scale, RATE_SCALE};

/// Business knobs for the ledger. Every value can be overridden from the environment.
#[derive(Debug, Clone)]
pub struct LedgerPolicy {
    pub currency: String,
    pub minimum_payment_amount: BigDecimal,
    pub high_value_threshold: BigDecimal,
    pub risk_block_threshold: f64,
    pub velocity_window_hours: i64,
    pub velocity_limit: i64,
    pub platform_fee_rate: BigDecimal,
    pub auto_release_days: i64,
    pub auto_release_interval_secs: u64,
    pub withdrawal_min: BigDecimal,
    pub withdrawal_max: BigDecimal,
    pub withdrawal_fee_rate: BigDecimal,
}

fn fraction(numerator: i64, denominator: i64) -> BigDecimal {
    BigDecimal::from(numerator) / BigDecimal::from(denominator)
}

impl Default for LedgerPolicy {
    fn default() -> Self {
        Self {
            currency: "ARS".to_string(),
            minimum_payment_amount: BigDecimal::from(100),
            high_value_threshold: BigDecimal::from(100_000),
            risk_block_threshold: 0.75,
            velocity_window_hours: 24,
            velocity_limit: 10,
            platform_fee_rate: fraction(10, 100),
            auto_release_days: 14,
            auto_release_interval_secs: 3600,
            withdrawal_min: BigDecimal::from(1_000),
            withdrawal_max: BigDecimal::from(500_000),
            withdrawal_fee_rate: fraction(1, 100),
        }
    }
}

impl LedgerPolicy {
    pub fn from_env() -> Self {
        let defaults = LedgerPolicy::default();
        LedgerPolicy {
            currency: env_or("LEDGER_CURRENCY", defaults.currency),
            minimum_payment_amount: env_or("MINIMUM_PAYMENT_AMOUNT", defaults.minimum_payment_amount),
            high_value_threshold: env_or("HIGH_VALUE_THRESHOLD", defaults.high_value_threshold),
            risk_block_threshold: env_or("RISK_BLOCK_THRESHOLD", defaults.risk_block_threshold),
            velocity_window_hours: env_or("VELOCITY_WINDOW_HOURS", defaults.velocity_window_hours),
            velocity_limit: env_or("VELOCITY_LIMIT", defaults.velocity_limit),
            platform_fee_rate: rate_or("PLATFORM_FEE_RATE", defaults.platform_fee_rate),
            auto_release_days: env_or("ESCROW_AUTO_RELEASE_DAYS", defaults.auto_release_days),
            auto_release_interval_secs: env_or("ESCROW_AUTO_RELEASE_INTERVAL_SECS", defaults.auto_release_interval_secs),
            withdrawal_min: env_or("WITHDRAWAL_MIN_AMOUNT", defaults.withdrawal_min),
            withdrawal_max: env_or("WITHDRAWAL_MAX_AMOUNT", defaults.withdrawal_max),
            withdrawal_fee_rate: rate_or("WITHDRAWAL_FEE_RATE", defaults.withdrawal_fee_rate),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub jwt_secret: String,
    pub jwt_maxage: i64,
    pub port: u16,
    // MercadoPago
    pub mercadopago_access_token: String,
    pub mercadopago_base_url: String,
    pub mercadopago_notification_url: Option<String>,
    pub webhook_secret: String,
    pub gateway_timeout_secs: u64,
    pub ledger: LedgerPolicy,
}

impl Config {
    pub fn init() -> Config {
        let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
        let jwt_secret = std::env::var("JWT_SECRET_KEY").expect("JWT_SECRET_KEY must be set");
        let webhook_secret = std::env::var("MERCADOPAGO_WEBHOOK_SECRET")
            .expect("MERCADOPAGO_WEBHOOK_SECRET must be set");

        let mercadopago_access_token = std::env::var("MERCADOPAGO_ACCESS_TOKEN")
            .unwrap_or_else(|_| "TEST-access-token".to_string());
        let mercadopago_base_url = std::env::var("MERCADOPAGO_BASE_URL")
            .unwrap_or_else(|_| "https://api.mercadopago.com".to_string());
        let mercadopago_notification_url = std::env::var("MERCADOPAGO_NOTIFICATION_URL").ok();

        Config {
            database_url,
            jwt_secret,
            jwt_maxage: env_or("JWT_MAXAGE", 60),
            port: env_or("PORT", 8000),
            mercadopago_access_token,
            mercadopago_base_url,
            mercadopago_notification_url,
            webhook_secret,
            gateway_timeout_secs: env_or("GATEWAY_TIMEOUT_SECS", 10),
            ledger: LedgerPolicy::from_env(),
        }
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!("Ignoring unparsable {}={:?}, using default", key, raw);
            default
        }),
        Err(_) => default,
    }
}

/// Fee rates must lie in [0, 1) with at most four decimals.
fn rate_or(key: &str, default: BigDecimal) -> BigDecimal {
    let value = env_or(key, default.clone());
    bounded_rate(key, value, default)
}

fn bounded_rate(key: &str, value: BigDecimal, default: BigDecimal) -> BigDecimal {
    if value >= BigDecimal::from(0) && value < BigDecimal::from(1) && fits_scale(&value, RATE_SCALE) {
        return value;
    }
    tracing::warn!("Ignoring out of range {}={}, using {}", key, value, default);
    default
}

#[cfg(test)]
impl Config {
    pub fn test_config() -> Config {
        Config {
            database_url: "postgres://localhost/laburar_test".to_string(),
            jwt_secret: "test-jwt-secret".to_string(),
            jwt_maxage: 60,
            port: 0,
            mercadopago_access_token: "TEST-access-token".to_string(),
            mercadopago_base_url: "http://127.0.0.1:9".to_string(),
            mercadopago_notification_url: None,
            webhook_secret: "test-webhook-secret".to_string(),
            gateway_timeout_secs: 1,
            ledger: LedgerPolicy::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(value: &str) -> BigDecimal {
        BigDecimal::from_str(value).unwrap()
    }

    #[test]
    fn fee_rates_outside_unit_interval_fall_back() {
        let default = dec("0.10");
        assert_eq!(bounded_rate("PLATFORM_FEE_RATE", dec("0.15"), default.clone()), dec("0.15"));
        assert_eq!(bounded_rate("PLATFORM_FEE_RATE", dec("0"), default.clone()), dec("0"));
        assert_eq!(bounded_rate("PLATFORM_FEE_RATE", dec("1"), default.clone()), default);
        assert_eq!(bounded_rate("PLATFORM_FEE_RATE", dec("1.5"), default.clone()), default);
        assert_eq!(bounded_rate("WITHDRAWAL_FEE_RATE", dec("-0.01"), default.clone()), default);
        assert_eq!(bounded_rate("WITHDRAWAL_FEE_RATE", dec("0.123456"), default.clone()), default);
    }

    #[test]
    fn default_policy_rates_are_valid() {
        let policy = LedgerPolicy::default();
        for rate in [&policy.platform_fee_rate, &policy.withdrawal_fee_rate] {
            assert_eq!(bounded_rate("RATE", rate.clone(), dec("0")), *rate);
        }
    }
}
