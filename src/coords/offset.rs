// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! Vertical offset resolution

use super::crs::Projection;
use super::elevation::ElevationService;
use crate::config::{AltitudeConfig, OffsetMode};
use crate::db::FeatureStore;
use chrono::{DateTime, SecondsFormat, Utc};
use dashmap::DashMap;
use nalgebra::Point3;
use std::sync::Arc;
use tracing::{debug, warn};

/// Mode tag written for offsets computed from the elevation service
pub const SERVICE_MODE_TAG: &str = "auto";

/// Generic attribute holding the cached offset of one LOD.
pub fn offset_attribute_name(lod: u8) -> String {
    format!("GE_LoD{}_zOffset", lod)
}

/// Offset persisted as `"<mode>|<offset>|<timestamp>"`
#[derive(Debug, Clone, PartialEq)]
pub struct CachedOffset {
    pub mode: String,
    pub offset: f64,
    pub timestamp: DateTime<Utc>,
}

impl CachedOffset {
    pub fn new(mode: impl Into<String>, offset: f64) -> Self {
        Self {
            mode: mode.into(),
            offset,
            timestamp: Utc::now(),
        }
    }

    pub fn to_attribute_value(&self) -> String {
        format!(
            "{}|{}|{}",
            self.mode,
            self.offset,
            self.timestamp.to_rfc3339_opts(SecondsFormat::Secs, true)
        )
    }

    /// Parse a persisted value. The timestamp is optional on read.
    pub fn parse(value: &str) -> Option<Self> {
        let mut parts = value.splitn(3, '|');
        let mode = parts.next()?.trim();
        let offset = parts.next()?.trim().parse::<f64>().ok()?;
        if !offset.is_finite() {
            return None;
        }
        let timestamp = parts
            .next()
            .and_then(|t| DateTime::parse_from_rfc3339(t.trim()).ok())
            .map(|t| t.with_timezone(&Utc))
            .unwrap_or_default();
        Some(Self {
            mode: mode.to_string(),
            offset,
            timestamp,
        })
    }
}

/// Resolves the vertical offset of an object at one LOD
pub struct OffsetResolver {
    mode: OffsetMode,
    constant: f64,
    call_service: bool,
    service: Option<Arc<dyn ElevationService>>,
    projection: Arc<Projection>,
    memory: DashMap<(i64, u8), f64>,
}

impl OffsetResolver {
    pub fn new(
        config: &AltitudeConfig,
        projection: Arc<Projection>,
        service: Option<Arc<dyn ElevationService>>,
    ) -> Self {
        Self {
            mode: config.offset,
            constant: config.constant_offset,
            call_service: config.call_elevation_service,
            service,
            projection,
            memory: DashMap::new(),
        }
    }

    pub fn mode(&self) -> OffsetMode {
        self.mode
    }

    /// Offset to add to every height of the object.
    ///
    /// Never fails: store and service errors degrade to `0.0` with a warning.
    pub fn resolve(
        &self,
        store: &dyn FeatureStore,
        feature_id: i64,
        lod: u8,
        candidates: &[Point3<f64>],
    ) -> f64 {
        match self.mode {
            OffsetMode::None => 0.0,
            OffsetMode::Constant => self.constant,
            OffsetMode::BottomZero => bottom_zero(candidates),
            OffsetMode::GenericAttribute => self.cached_or_lookup(store, feature_id, lod, candidates),
        }
    }

    fn cached_or_lookup(
        &self,
        store: &dyn FeatureStore,
        feature_id: i64,
        lod: u8,
        candidates: &[Point3<f64>],
    ) -> f64 {
        if let Some(offset) = self.memory.get(&(feature_id, lod)) {
            return *offset;
        }

        let attribute = offset_attribute_name(lod);
        match store.generic_attribute(feature_id, &attribute) {
            Ok(Some(value)) => match CachedOffset::parse(&value) {
                Some(cached) => {
                    self.memory.insert((feature_id, lod), cached.offset);
                    return cached.offset;
                }
                None => warn!(feature_id, lod, value, "Malformed cached offset, ignoring"),
            },
            Ok(None) => {}
            Err(err) => {
                warn!(feature_id, lod, error = %err, "Reading cached offset failed");
            }
        }

        if !self.call_service || candidates.is_empty() {
            return 0.0;
        }
        let Some(service) = &self.service else {
            return 0.0;
        };

        let offset = match self.lookup(service.as_ref(), candidates) {
            Ok(offset) => offset,
            Err(err) => {
                warn!(feature_id, lod, error = %err, "Elevation lookup failed, using zero offset");
                return 0.0;
            }
        };

        let cached = CachedOffset::new(SERVICE_MODE_TAG, offset);
        if let Err(err) = store.set_generic_attribute(feature_id, &attribute, &cached.to_attribute_value()) {
            warn!(feature_id, lod, error = %err, "Persisting offset failed");
        }
        self.memory.insert((feature_id, lod), offset);
        debug!(feature_id, lod, offset, "Resolved offset from elevation service");
        offset
    }

    /// Minimum candidate height minus the minimum terrain height reported for
    /// the candidates' positions.
    fn lookup(&self, service: &dyn ElevationService, candidates: &[Point3<f64>]) -> crate::Result<f64> {
        let mut positions = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            let p = self.projection.project(candidate)?;
            positions.push((p.y, p.x));
        }
        let elevations = service.elevations(&positions)?;
        let min_service = elevations.iter().copied().fold(f64::INFINITY, f64::min);
        if !min_service.is_finite() {
            return Err(crate::ExportError::Elevation(
                "service returned no usable elevation".to_string(),
            ));
        }
        Ok(min_height(candidates) - min_service)
    }
}

fn min_height(points: &[Point3<f64>]) -> f64 {
    points.iter().map(|p| p.z).fold(f64::INFINITY, f64::min)
}

/// Offset that moves the lowest candidate to height zero.
pub fn bottom_zero(candidates: &[Point3<f64>]) -> f64 {
    if candidates.is_empty() {
        return 0.0;
    }
    0.0 - min_height(candidates)
}
