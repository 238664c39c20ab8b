//! Elevation provider configuration.

use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;

pub const DEFAULT_PROVIDER_URL: &str = "https://api.open-meteo.com/v1/elevation";

/// Settings handed to [`OpenMeteoElevation`](crate::OpenMeteoElevation).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ElevationConfig {
    pub provider_url: String,
    /// Sent as `apikey` when set
    pub api_key: Option<String>,
    pub max_points_per_request: usize,
    pub request_timeout_s: u64,
    pub cache_ttl_s: u64,
    /// Extra attempts after a transient failure
    pub retries: u32,
    pub retry_backoff_ms: u64,
}

impl Default for ElevationConfig {
    fn default() -> Self {
        Self {
            provider_url: DEFAULT_PROVIDER_URL.to_string(),
            api_key: None,
            max_points_per_request: 100,
            request_timeout_s: 10,
            cache_ttl_s: 3600,
            retries: 2,
            retry_backoff_ms: 250,
        }
    }
}

impl ElevationConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from `ELEVATION_*` keys. Missing or unparsable values keep
    /// their defaults.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        Self {
            provider_url: lookup("ELEVATION_PROVIDER_URL")
                .filter(|url| !url.trim().is_empty())
                .unwrap_or(defaults.provider_url),
            api_key: lookup("ELEVATION_API_KEY").filter(|key| !key.trim().is_empty()),
            max_points_per_request: parsed(&lookup, "ELEVATION_MAX_POINTS")
                .filter(|&n: &usize| n > 0)
                .unwrap_or(defaults.max_points_per_request),
            request_timeout_s: parsed(&lookup, "ELEVATION_TIMEOUT_S")
                .unwrap_or(defaults.request_timeout_s),
            cache_ttl_s: parsed(&lookup, "ELEVATION_CACHE_TTL_S").unwrap_or(defaults.cache_ttl_s),
            retries: parsed(&lookup, "ELEVATION_RETRIES").unwrap_or(defaults.retries),
            retry_backoff_ms: parsed(&lookup, "ELEVATION_RETRY_BACKOFF_MS")
                .unwrap_or(defaults.retry_backoff_ms),
        }
    }
}

fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    lookup(key).and_then(|value| value.trim().parse().ok())
}
