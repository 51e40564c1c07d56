// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! Terrain elevation lookup
//!
//! Requests go through one shared [`RateLimiter`] so concurrent workers never
//! hit the service faster than the configured spacing.

use crate::config::ElevationConfig;
use crate::error::{ExportError, Result};
use serde::Deserialize;
use std::ops::Range;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::debug;

const USER_AGENT: &str = concat!("citykml/", env!("CARGO_PKG_VERSION"));

/// Source of ground elevations
pub trait ElevationService: Send + Sync {
    /// Elevations for `(lat, lon)` positions, in input order.
    fn elevations(&self, positions: &[(f64, f64)]) -> Result<Vec<f64>>;
}

/// Serializes calls and enforces a minimum spacing between them
#[derive(Debug)]
pub struct RateLimiter {
    min_interval: Duration,
    last_call: Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_call: Mutex::new(None),
        }
    }

    /// Run `call` while holding the limiter, sleeping first if the previous
    /// call finished less than the minimum interval ago.
    pub fn run<T>(&self, call: impl FnOnce() -> T) -> T {
        let mut last = self
            .last_call
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(previous) = *last {
            let elapsed = previous.elapsed();
            if elapsed < self.min_interval {
                std::thread::sleep(self.min_interval - elapsed);
            }
        }
        let result = call();
        *last = Some(Instant::now());
        result
    }
}

#[derive(Debug, Deserialize)]
struct ElevationResponse {
    status: String,
    #[serde(default)]
    results: Vec<ElevationResult>,
    #[serde(default)]
    error_message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ElevationResult {
    elevation: f64,
}

/// Blocking HTTP client for a Google-style elevation API
pub struct HttpElevationService {
    client: reqwest::blocking::Client,
    endpoint: String,
    api_key: Option<String>,
    batch_size: usize,
    max_url_length: usize,
    limiter: Arc<RateLimiter>,
}

impl HttpElevationService {
    pub fn new(config: &ElevationConfig, limiter: Arc<RateLimiter>) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()?;
        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            api_key: config.api_key.clone(),
            batch_size: config.batch_size.max(1),
            max_url_length: config.max_url_length,
            limiter,
        })
    }

    fn request(&self, locations: &[String]) -> Result<Vec<f64>> {
        let joined = locations.join("|");
        let mut query = vec![("locations", joined.as_str())];
        if let Some(key) = &self.api_key {
            query.push(("key", key.as_str()));
        }

        let response: ElevationResponse = self.limiter.run(|| {
            self.client
                .get(&self.endpoint)
                .query(&query)
                .send()
                .and_then(|r| r.error_for_status())
                .and_then(|r| r.json())
        })?;

        if response.status != "OK" {
            return Err(ExportError::Elevation(format!(
                "service answered {}: {}",
                response.status,
                response.error_message.unwrap_or_default()
            )));
        }
        if response.results.len() != locations.len() {
            return Err(ExportError::Elevation(format!(
                "asked for {} elevations, got {}",
                locations.len(),
                response.results.len()
            )));
        }
        Ok(response.results.into_iter().map(|r| r.elevation).collect())
    }
}

impl ElevationService for HttpElevationService {
    fn elevations(&self, positions: &[(f64, f64)]) -> Result<Vec<f64>> {
        let locations: Vec<String> = positions
            .iter()
            .map(|(lat, lon)| format!("{:.6},{:.6}", lat, lon))
            .collect();
        let key_len = self.api_key.as_ref().map(|k| k.len() + 5).unwrap_or(0);
        let base_len = self.endpoint.len() + "?locations=".len() + key_len;

        let mut elevations = Vec::with_capacity(positions.len());
        for range in split_batches(&locations, self.batch_size, self.max_url_length, base_len) {
            debug!(count = range.len(), "Requesting elevations");
            elevations.extend(self.request(&locations[range])?);
        }
        Ok(elevations)
    }
}

/// Split locations into batches of at most `max_points` whose encoded URL
/// stays below `max_url_length`. A batch always holds at least one location.
pub fn split_batches(
    locations: &[String],
    max_points: usize,
    max_url_length: usize,
    base_len: usize,
) -> Vec<Range<usize>> {
    let mut batches = Vec::new();
    let mut start = 0;
    let mut length = base_len;

    for (i, location) in locations.iter().enumerate() {
        // ',' and '|' are percent-encoded to three characters each
        let encoded = location.len() + 2 * location.matches(',').count();
        let separator = if i > start { 3 } else { 0 };
        let full = i - start >= max_points.max(1);
        if i > start && (full || length + separator + encoded > max_url_length) {
            batches.push(start..i);
            start = i;
            length = base_len + encoded;
        } else {
            length += separator + encoded;
        }
    }
    if start < locations.len() {
        batches.push(start..locations.len());
    }
    batches
}
