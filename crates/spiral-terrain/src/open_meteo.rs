//! Open-Meteo compatible elevation source.
//!
//! `GET {provider_url}?latitude=a,b&longitude=c,d[&apikey=k]` answered by
//! `{"elevation": [..]}` in meters above sea level.

use crate::backoff::Backoff;
use crate::config::ElevationConfig;
use dashmap::DashMap;
use reqwest::blocking::Client;
use reqwest::StatusCode;
use serde::Deserialize;
use spiral_core::{ElevationError, ElevationSource, GeoPoint};
use std::collections::{HashMap, HashSet};
use std::thread;
use std::time::{Duration, Instant};

/// Coordinates rounded to 1e-5 degrees, about a meter.
type CacheKey = (i64, i64);

fn cache_key(point: GeoPoint) -> CacheKey {
    (
        (point.latitude * 1e5).round() as i64,
        (point.longitude * 1e5).round() as i64,
    )
}

#[derive(Debug, Clone, Copy)]
struct CacheEntry {
    fetched_at: Instant,
    elevation_m: f64,
}

#[derive(Debug, Deserialize)]
struct OpenMeteoElevationResponse {
    elevation: Option<Vec<Option<f64>>>,
}

pub struct OpenMeteoElevation {
    client: Client,
    config: ElevationConfig,
    cache: DashMap<CacheKey, CacheEntry>,
}

impl OpenMeteoElevation {
    pub fn new(config: ElevationConfig) -> Result<Self, ElevationError> {
        if config.provider_url.trim().is_empty() {
            return Err(ElevationError::Unavailable(
                "elevation provider URL is empty".to_string(),
            ));
        }
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_s.max(1)))
            .build()
            .map_err(|err| ElevationError::Unavailable(err.to_string()))?;
        Ok(Self {
            client,
            config,
            cache: DashMap::new(),
        })
    }

    pub fn config(&self) -> &ElevationConfig {
        &self.config
    }

    /// Points currently held in the response cache, fresh or stale.
    pub fn cached_points(&self) -> usize {
        self.cache.len()
    }

    /// Resolve every point from the cache or `fetch`, which is called
    /// with deduplicated uncached points in chunks of the batch size.
    /// Entries up to twice the TTL old stand in for a chunk that fails.
    fn sample_with<F>(&self, points: &[GeoPoint], mut fetch: F) -> Result<Vec<f64>, ElevationError>
    where
        F: FnMut(&[GeoPoint]) -> Result<Vec<f64>, ElevationError>,
    {
        let ttl = Duration::from_secs(self.config.cache_ttl_s);
        let mut resolved: HashMap<CacheKey, f64> = HashMap::new();
        let mut stale: HashMap<CacheKey, f64> = HashMap::new();
        let mut queued: HashSet<CacheKey> = HashSet::new();
        let mut missing: Vec<GeoPoint> = Vec::new();

        for point in points {
            let key = cache_key(*point);
            if resolved.contains_key(&key) || queued.contains(&key) {
                continue;
            }
            let cached = self.cache.get(&key).map(|entry| *entry);
            match cached {
                Some(entry) if entry.fetched_at.elapsed() <= ttl => {
                    resolved.insert(key, entry.elevation_m);
                }
                cached => {
                    if let Some(entry) = cached
                        .filter(|entry| entry.fetched_at.elapsed() <= ttl.saturating_mul(2))
                    {
                        stale.insert(key, entry.elevation_m);
                    }
                    queued.insert(key);
                    missing.push(*point);
                }
            }
        }

        for chunk in missing.chunks(self.max_batch_size()) {
            match fetch(chunk).and_then(|values| check_count(chunk.len(), values)) {
                Ok(values) => {
                    let now = Instant::now();
                    for (point, elevation_m) in chunk.iter().zip(values) {
                        let key = cache_key(*point);
                        self.cache.insert(
                            key,
                            CacheEntry {
                                fetched_at: now,
                                elevation_m,
                            },
                        );
                        resolved.insert(key, elevation_m);
                    }
                }
                Err(err) if chunk.iter().all(|p| stale.contains_key(&cache_key(*p))) => {
                    tracing::warn!(
                        points = chunk.len(),
                        error = %err,
                        "elevation fetch failed, using stale cache"
                    );
                    for point in chunk {
                        let key = cache_key(*point);
                        if let Some(&elevation_m) = stale.get(&key) {
                            resolved.insert(key, elevation_m);
                        }
                    }
                }
                Err(err) => return Err(err),
            }
        }

        points
            .iter()
            .map(|point| {
                resolved.get(&cache_key(*point)).copied().ok_or_else(|| {
                    ElevationError::InvalidResponse(format!(
                        "no elevation resolved for ({:.6}, {:.6})",
                        point.latitude, point.longitude
                    ))
                })
            })
            .collect()
    }

    fn fetch_with_retries(&self, points: &[GeoPoint]) -> Result<Vec<f64>, ElevationError> {
        let base = Duration::from_millis(self.config.retry_backoff_ms);
        let mut backoff = Backoff::new(base, base.saturating_mul(8));
        let mut attempt = 0;
        loop {
            match self.fetch_chunk(points) {
                Ok(values) => return Ok(values),
                Err(err) if is_transient(&err) && attempt < self.config.retries => {
                    attempt += 1;
                    let delay = backoff.next_delay();
                    tracing::warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "elevation request failed, retrying"
                    );
                    thread::sleep(delay);
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn fetch_chunk(&self, points: &[GeoPoint]) -> Result<Vec<f64>, ElevationError> {
        let latitudes: Vec<f64> = points.iter().map(|p| p.latitude).collect();
        let longitudes: Vec<f64> = points.iter().map(|p| p.longitude).collect();
        let url = build_provider_url(
            &self.config.provider_url,
            &join_params(&latitudes),
            &join_params(&longitudes),
            self.config.api_key.as_deref(),
        );
        tracing::debug!(points = points.len(), "requesting elevations");

        let response = self
            .client
            .get(url)
            .send()
            .map_err(|err| ElevationError::Unavailable(err.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let message = format!("elevation provider HTTP {status}");
            return Err(
                if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
                    ElevationError::Unavailable(message)
                } else {
                    ElevationError::InvalidResponse(message)
                },
            );
        }
        let body = response
            .text()
            .map_err(|err| ElevationError::Unavailable(err.to_string()))?;
        parse_elevations(&body, points.len())
    }
}

impl ElevationSource for OpenMeteoElevation {
    fn sample(&self, points: &[GeoPoint]) -> Result<Vec<f64>, ElevationError> {
        self.sample_with(points, |chunk| self.fetch_with_retries(chunk))
    }

    fn max_batch_size(&self) -> usize {
        self.config.max_points_per_request.max(1)
    }
}

/// Network failures, 5xx and 429 are worth another attempt.
fn is_transient(err: &ElevationError) -> bool {
    matches!(err, ElevationError::Unavailable(_))
}

fn check_count(expected: usize, values: Vec<f64>) -> Result<Vec<f64>, ElevationError> {
    if values.len() == expected {
        Ok(values)
    } else {
        Err(ElevationError::SampleCountMismatch {
            expected,
            actual: values.len(),
        })
    }
}

fn parse_elevations(body: &str, expected: usize) -> Result<Vec<f64>, ElevationError> {
    let payload: OpenMeteoElevationResponse = serde_json::from_str(body)
        .map_err(|err| ElevationError::InvalidResponse(err.to_string()))?;
    let values = payload.elevation.ok_or_else(|| {
        ElevationError::InvalidResponse("response has no elevation field".to_string())
    })?;
    if values.len() != expected {
        return Err(ElevationError::SampleCountMismatch {
            expected,
            actual: values.len(),
        });
    }
    values
        .into_iter()
        .enumerate()
        .map(|(index, value)| match value {
            Some(elevation) if elevation.is_finite() => Ok(elevation),
            _ => Err(ElevationError::InvalidResponse(format!(
                "missing elevation at index {index}"
            ))),
        })
        .collect()
}

fn join_params(values: &[f64]) -> String {
    values
        .iter()
        .map(|value| format!("{value:.6}"))
        .collect::<Vec<_>>()
        .join(",")
}

fn build_provider_url(base: &str, latitudes: &str, longitudes: &str, api_key: Option<&str>) -> String {
    let separator = if base.contains('?') { "&" } else { "?" };
    let mut url = format!("{base}{separator}latitude={latitudes}&longitude={longitudes}");
    if let Some(key) = api_key {
        url.push_str("&apikey=");
        url.push_str(key);
    }
    url
}
