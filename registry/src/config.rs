//! Registry-side configuration resolution.
//!
//! Mirrors `mcp_mesh_core::config`'s ENV > param > default priority, scoped
//! to the keys only the registry binary needs.

use std::env;

use tracing::debug;

/// Registry configuration keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryConfigKey {
    Host,
    Port,
    DatabaseUrl,
    DefaultTimeoutThreshold,
    DefaultEvictionThreshold,
    HealthCheckInterval,
}

impl RegistryConfigKey {
    pub fn env_var(&self) -> &'static str {
        match self {
            Self::Host => "HOST",
            Self::Port => "PORT",
            Self::DatabaseUrl => "DATABASE_URL",
            Self::DefaultTimeoutThreshold => "DEFAULT_TIMEOUT_THRESHOLD",
            Self::DefaultEvictionThreshold => "DEFAULT_EVICTION_THRESHOLD",
            Self::HealthCheckInterval => "HEALTH_CHECK_INTERVAL",
        }
    }

    pub fn default_value(&self) -> &'static str {
        match self {
            Self::Host => "0.0.0.0",
            Self::Port => "8000",
            Self::DatabaseUrl => "sqlite://mesh.db",
            Self::DefaultTimeoutThreshold => "20",
            Self::DefaultEvictionThreshold => "60",
            Self::HealthCheckInterval => "10",
        }
    }
}

/// Resolve a string config value with priority ENV > default.
pub fn resolve(key: RegistryConfigKey) -> String {
    let env_var = key.env_var();
    match env::var(env_var) {
        Ok(value) if !value.is_empty() => {
            debug!("registry config '{}' resolved from ENV", env_var);
            value
        }
        _ => {
            debug!("registry config '{}' resolved from default", env_var);
            key.default_value().to_string()
        }
    }
}

/// Resolve an integer config value with priority ENV > default.
pub fn resolve_int(key: RegistryConfigKey) -> u64 {
    resolve(key)
        .parse()
        .unwrap_or_else(|_| key.default_value().parse().unwrap_or(0))
}

/// Full set of registry settings resolved once at startup.
#[derive(Debug, Clone)]
pub struct RegistrySettings {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    pub default_timeout_threshold_s: u64,
    pub default_eviction_threshold_s: u64,
    pub health_check_interval_s: u64,
}

impl RegistrySettings {
    pub fn from_env() -> Self {
        Self {
            host: resolve(RegistryConfigKey::Host),
            port: resolve_int(RegistryConfigKey::Port) as u16,
            database_url: resolve(RegistryConfigKey::DatabaseUrl),
            default_timeout_threshold_s: resolve_int(RegistryConfigKey::DefaultTimeoutThreshold),
            default_eviction_threshold_s: resolve_int(RegistryConfigKey::DefaultEvictionThreshold),
            health_check_interval_s: resolve_int(RegistryConfigKey::HealthCheckInterval),
        }
    }
}
