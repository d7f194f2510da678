use config::{Config, ConfigError, File};
use rust_decimal::Decimal;
use serde::Deserialize;

/// Payment gateway credentials and endpoints.
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    pub base_url: String,
    pub consumer_key: String,
    pub consumer_secret: String,
    pub shortcode: String,
    pub passkey: String,
    pub callback_url: String,
    /// Country dial prefix used to normalize subscriber numbers.
    pub country_prefix: String,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Flat interest rate applied to every loan, e.g. `0.15`.
    pub interest_rate: Decimal,
    pub gateway: GatewayConfig,
}

impl AppConfig {
    /// Defaults, overridden by an optional config file, overridden by
    /// `UMOJA_*` environment variables.
    pub fn load(path: Option<&str>) -> Result<AppConfig, ConfigError> {
        let mut builder = Config::builder()
            .set_default("interest_rate", "0.15")?
            .set_default("gateway.base_url", "https://sandbox.safaricom.co.ke")?
            .set_default("gateway.consumer_key", "")?
            .set_default("gateway.consumer_secret", "")?
            .set_default("gateway.shortcode", "174379")?
            .set_default("gateway.passkey", "")?
            .set_default(
                "gateway.callback_url",
                "https://api.umojaloans.com/api/v1/mpesa/callback",
            )?
            .set_default("gateway.country_prefix", "254")?
            .set_default("gateway.timeout_secs", 30)?;

        if let Some(path) = path {
            builder = builder.add_source(File::with_name(path));
        }

        builder
            .add_source(config::Environment::with_prefix("UMOJA").separator("__"))
            .build()?
            .try_deserialize()
    }
}
