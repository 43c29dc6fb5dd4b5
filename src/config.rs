use std::{env, net::IpAddr, str::FromStr};

use anyhow::Context;

use secrecy::Secret;

use crate::domain::pricing::PricingPolicy;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub host: String,
    pub port: u16,
    pub redis_url: Option<String>,
    pub rate_limit_timeout_ms: u64,
    /// Peers whose `X-Forwarded-For`/`X-Real-IP` headers are believed.
    pub trusted_proxies: Vec<IpAddr>,
    pub guest_cart_ttl_hours: i64,
    pub pricing: PricingPolicy,
    pub paytr: PaytrConfig,
}

/// Merchant credentials and endpoints for the PayTR gateway.
///
/// Credentials are optional so the service can boot without them; payment
/// initiation reports `CONFIG_ERROR` until they are provided.
#[derive(Debug, Clone)]
pub struct PaytrConfig {
    pub merchant_id: Option<String>,
    pub merchant_key: Option<Secret<String>>,
    pub merchant_salt: Option<Secret<String>>,
    pub api_url: String,
    pub redirect_base_url: String,
    pub ok_url: String,
    pub fail_url: String,
    pub test_mode: bool,
    pub timeout_secs: u64,
    pub session_minutes: i64,
    pub currency: String,
}

impl Default for PaytrConfig {
    fn default() -> Self {
        Self {
            merchant_id: None,
            merchant_key: None,
            merchant_salt: None,
            api_url: "https://www.paytr.com/odeme/api/get-token".to_string(),
            redirect_base_url: "https://www.paytr.com/odeme/guvenli".to_string(),
            ok_url: "http://localhost:3000/checkout/success".to_string(),
            fail_url: "http://localhost:3000/checkout/failed".to_string(),
            test_mode: true,
            timeout_secs: 15,
            session_minutes: 30,
            currency: "TL".to_string(),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = env::var("DATABASE_URL")?;
        let host = env::var("APP_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = parse_var("APP_PORT", 3000);
        let redis_url = env::var("REDIS_URL").ok().filter(|url| !url.is_empty());
        let trusted_proxies = parse_ip_list(&env::var("TRUSTED_PROXIES").unwrap_or_default())
            .context("TRUSTED_PROXIES must be a comma-separated list of IP addresses")?;

        let defaults = PricingPolicy::default();
        let pricing = PricingPolicy {
            tax_rate: parse_var("TAX_RATE", defaults.tax_rate),
            delivery_fee: parse_var("DELIVERY_FEE", defaults.delivery_fee),
            free_delivery_threshold: parse_var(
                "FREE_DELIVERY_THRESHOLD",
                defaults.free_delivery_threshold,
            ),
        };

        let paytr_defaults = PaytrConfig::default();
        let paytr = PaytrConfig {
            merchant_id: env::var("PAYTR_MERCHANT_ID").ok().filter(|v| !v.is_empty()),
            merchant_key: env::var("PAYTR_MERCHANT_KEY")
                .ok()
                .filter(|v| !v.is_empty())
                .map(Secret::new),
            merchant_salt: env::var("PAYTR_MERCHANT_SALT")
                .ok()
                .filter(|v| !v.is_empty())
                .map(Secret::new),
            api_url: env::var("PAYTR_API_URL").unwrap_or(paytr_defaults.api_url),
            redirect_base_url: env::var("PAYTR_REDIRECT_URL")
                .unwrap_or(paytr_defaults.redirect_base_url),
            ok_url: env::var("PAYTR_OK_URL").unwrap_or(paytr_defaults.ok_url),
            fail_url: env::var("PAYTR_FAIL_URL").unwrap_or(paytr_defaults.fail_url),
            test_mode: parse_var("PAYTR_TEST_MODE", paytr_defaults.test_mode),
            timeout_secs: parse_var("PAYTR_TIMEOUT_SECS", paytr_defaults.timeout_secs),
            session_minutes: parse_var("PAYMENT_SESSION_MINUTES", paytr_defaults.session_minutes),
            currency: env::var("PAYTR_CURRENCY").unwrap_or(paytr_defaults.currency),
        };

        Ok(Self {
            port,
            database_url,
            host,
            redis_url,
            rate_limit_timeout_ms: parse_var("RATE_LIMIT_TIMEOUT_MS", 50),
            trusted_proxies,
            guest_cart_ttl_hours: parse_var("GUEST_CART_TTL_HOURS", 72),
            pricing,
            paytr,
        })
    }
}

fn parse_var<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

fn parse_ip_list(raw: &str) -> anyhow::Result<Vec<IpAddr>> {
    raw.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(|item| {
            item.parse::<IpAddr>()
                .with_context(|| format!("invalid address {item:?}"))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn proxy_list_is_parsed() {
        let proxies = parse_ip_list(" 10.0.0.1, ::1 ,").unwrap();
        assert_eq!(
            proxies,
            vec!["10.0.0.1".parse::<IpAddr>().unwrap(), "::1".parse().unwrap()]
        );
        assert!(parse_ip_list("").unwrap().is_empty());
        assert!(parse_ip_list("10.0.0.1,proxy.local").is_err());
    }
}
