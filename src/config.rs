// src/config.rs
use dotenvy::dotenv;
use rust_decimal::Decimal;
use std::env;
use std::str::FromStr;

use crate::{
    errors::{DispatchError, DispatchResult},
    models::payment::ProviderTag,
    services::{gateways::GatewayRegistry, ride_service::PricingPolicy},
    utils::{
        fare::{FarePrecision, Tariff},
        geo::ServiceRegion,
    },
};

/// Where ride and pool events travel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrokerBackend {
    /// Single instance, in-process channels
    Memory,
    /// Redis pub/sub, shared across instances
    Redis,
}

impl FromStr for BrokerBackend {
    type Err = DispatchError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "memory" | "in-process" => Ok(BrokerBackend::Memory),
            "redis" => Ok(BrokerBackend::Redis),
            other => Err(DispatchError::Configuration(format!("Invalid BROKER_BACKEND: {}", other))),
        }
    }
}

/// Where rides, payments, wallets and the ledger are kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    /// Lost on restart; tests and throwaway demos
    Memory,
    /// Written through to redis on every commit and reloaded at startup
    Redis,
}

impl FromStr for StorageBackend {
    type Err = DispatchError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(StorageBackend::Memory),
            "redis" => Ok(StorageBackend::Redis),
            other => Err(DispatchError::Configuration(format!("Invalid STORAGE_BACKEND: {}", other))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server_host: String,
    pub server_port: u16,
    pub broker_backend: BrokerBackend,
    pub storage_backend: StorageBackend,
    pub redis_url: String,
    pub payment_provider: ProviderTag,
    pub commission_rate: Decimal,
    pub fare_precision: FarePrecision,
    pub default_tariff: Tariff,
    pub service_region: ServiceRegion,
    pub spoof_speed_limit_kmh: f64,
    pub allowed_origins: Vec<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server_host: "0.0.0.0".to_string(),
            server_port: 3000,
            broker_backend: BrokerBackend::Memory,
            storage_backend: StorageBackend::Memory,
            redis_url: "redis://127.0.0.1/".to_string(),
            payment_provider: ProviderTag::demo(),
            commission_rate: Decimal::ZERO,
            fare_precision: FarePrecision::default(),
            default_tariff: Tariff::default(),
            service_region: ServiceRegion::default(),
            spoof_speed_limit_kmh: 150.0,
            allowed_origins: vec!["*".to_string()],
        }
    }
}

impl AppConfig {
    /// Reads `.env` when present, then the process environment. Unset keys keep their
    /// defaults, except storage which is durable unless `STORAGE_BACKEND=memory`.
    pub fn from_env() -> DispatchResult<Self> {
        dotenv().ok();
        let defaults = Self::default();

        let server_host = env::var("SERVER_HOST").unwrap_or(defaults.server_host);
        let server_port = parse_var("SERVER_PORT", defaults.server_port)?;
        let broker_backend = parse_var("BROKER_BACKEND", defaults.broker_backend)?;
        let storage_backend = parse_var("STORAGE_BACKEND", StorageBackend::Redis)?;
        let redis_url = env::var("REDIS_URL").unwrap_or(defaults.redis_url);
        let payment_provider = env::var("PAYMENT_PROVIDER")
            .map(|name| ProviderTag::new(&name))
            .unwrap_or(defaults.payment_provider);
        check_callback_provider(&payment_provider, &GatewayRegistry::with_defaults())?;

        let commission_rate: Decimal = parse_var("COMMISSION_RATE", defaults.commission_rate)?;
        if commission_rate < Decimal::ZERO || commission_rate > Decimal::ONE {
            return Err(DispatchError::Configuration(format!(
                "COMMISSION_RATE must be between 0 and 1, got {}",
                commission_rate
            )));
        }

        let fare_precision = match env::var("FARE_PRECISION") {
            Ok(value) => FarePrecision::parse(&value)?,
            Err(_) => defaults.fare_precision,
        };
        let default_tariff = Tariff {
            base_fare: parse_var("DEFAULT_BASE_FARE", defaults.default_tariff.base_fare)?,
            per_km_rate: parse_var("DEFAULT_PER_KM_RATE", defaults.default_tariff.per_km_rate)?,
            per_minute_rate: parse_var("DEFAULT_PER_MINUTE_RATE", defaults.default_tariff.per_minute_rate)?,
        };
        let service_region = match env::var("SERVICE_REGION") {
            Ok(value) => ServiceRegion::parse(&value)?,
            Err(_) => defaults.service_region,
        };

        let spoof_speed_limit_kmh: f64 = parse_var("SPOOF_SPEED_LIMIT_KMH", defaults.spoof_speed_limit_kmh)?;
        if !(spoof_speed_limit_kmh > 0.0) {
            return Err(DispatchError::Configuration(
                "SPOOF_SPEED_LIMIT_KMH must be positive".to_string(),
            ));
        }

        let allowed_origins = env::var("ALLOWED_ORIGINS")
            .map(|value| {
                value
                    .split(',')
                    .map(|origin| origin.trim().to_string())
                    .filter(|origin| !origin.is_empty())
                    .collect()
            })
            .unwrap_or(defaults.allowed_origins);

        tracing::info!(
            "Configuration loaded: broker={:?}, storage={:?}, provider={}, region={:?}",
            broker_backend,
            storage_backend,
            payment_provider,
            service_region
        );

        Ok(Self {
            server_host,
            server_port,
            broker_backend,
            storage_backend,
            redis_url,
            payment_provider,
            commission_rate,
            fare_precision,
            default_tariff,
            service_region,
            spoof_speed_limit_kmh,
            allowed_origins,
        })
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server_host, self.server_port)
    }

    pub fn pricing(&self) -> PricingPolicy {
        PricingPolicy {
            default_tariff: self.default_tariff.clone(),
            precision: self.fare_precision,
            region: self.service_region,
        }
    }
}

/// The provider behind `/payments/callback` must exist and must report through callbacks.
pub fn check_callback_provider(provider: &ProviderTag, registry: &GatewayRegistry) -> DispatchResult<()> {
    let providers = registry.providers();
    if provider.is_cash() || !providers.iter().any(|name| name == provider.as_str()) {
        return Err(DispatchError::Configuration(format!(
            "PAYMENT_PROVIDER must be a callback provider ({}), got {}",
            providers
                .iter()
                .filter(|name| name.as_str() != ProviderTag::CASH)
                .cloned()
                .collect::<Vec<_>>()
                .join(", "),
            provider
        )));
    }
    Ok(())
}

fn parse_var<T>(name: &str, default: T) -> DispatchResult<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| DispatchError::Configuration(format!("Invalid {}: {}", name, e))),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.bind_address(), "0.0.0.0:3000");
        assert_eq!(config.broker_backend, BrokerBackend::Memory);
        assert!(config.payment_provider.as_str() == ProviderTag::DEMO);

        let pricing = config.pricing();
        assert_eq!(pricing.default_tariff.per_km_rate, dec!(10));
        assert_eq!(pricing.region, ServiceRegion::BANGLADESH);
    }

    #[test]
    fn test_broker_backend_parsing() {
        assert_eq!("Redis".parse::<BrokerBackend>().unwrap(), BrokerBackend::Redis);
        assert_eq!("memory".parse::<BrokerBackend>().unwrap(), BrokerBackend::Memory);
        assert!(matches!(
            "kafka".parse::<BrokerBackend>(),
            Err(DispatchError::Configuration(_))
        ));
    }

    #[test]
    fn test_storage_backend_parsing() {
        assert_eq!("REDIS".parse::<StorageBackend>().unwrap(), StorageBackend::Redis);
        assert_eq!("memory".parse::<StorageBackend>().unwrap(), StorageBackend::Memory);
        assert!("postgres".parse::<StorageBackend>().is_err());
    }

    #[test]
    fn test_callback_provider_must_be_registered() {
        let registry = GatewayRegistry::with_defaults();
        assert!(check_callback_provider(&ProviderTag::demo(), &registry).is_ok());
        assert!(check_callback_provider(&ProviderTag::new("demo"), &registry).is_ok());
        assert!(matches!(
            check_callback_provider(&ProviderTag::new("bkash"), &registry),
            Err(DispatchError::Configuration(_))
        ));
        // Cash has no callbacks to verify
        assert!(matches!(
            check_callback_provider(&ProviderTag::new("cash"), &registry),
            Err(DispatchError::Configuration(_))
        ));
    }

    #[test]
    fn test_parse_var_falls_back_when_unset() {
        let port: u16 = parse_var("SPARROW_DISPATCH_TEST_UNSET_PORT", 8080).unwrap();
        assert_eq!(port, 8080);
    }
}
