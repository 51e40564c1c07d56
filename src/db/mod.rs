// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! Relational store access
//!
//! The pipeline only sees the narrow [`FeatureStore`] interface. Every
//! concurrent unit owns its own store obtained from a [`StoreConnector`].

mod payload;
pub mod queries;
mod sqlite;

pub use payload::{GeometryPayload, ImplicitPlacement};
pub use sqlite::{SqliteConnector, SqliteStore};

use crate::error::Result;
use crate::geometry::{Envelope, ImplicitTransform, Material};
use crate::model::{FeatureCategory, SurfaceType};

/// A city object as listed by the store
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureRecord {
    pub id: i64,
    pub gmlid: String,
    pub class_id: i32,
    /// Envelope in the source CRS
    pub envelope: Option<Envelope>,
    pub name: Option<String>,
    pub description: Option<String>,
}

impl FeatureRecord {
    pub fn category(&self) -> Option<FeatureCategory> {
        FeatureCategory::from_class_id(self.class_id)
    }
}

/// One surface geometry row
#[derive(Debug, Clone, PartialEq)]
pub struct GeometryRow {
    pub id: i64,
    pub feature_id: i64,
    /// Root of the geometry tree the row belongs to; appearances are fetched per root
    pub root_id: i64,
    pub lod: u8,
    pub surface_type: SurfaceType,
    pub payload: GeometryPayload,
    pub implicit: Option<ImplicitTransform>,
}

impl GeometryRow {
    /// Payload in world coordinates, with any implicit placement applied.
    pub fn world_payload(&self) -> GeometryPayload {
        match &self.implicit {
            Some(transform) => self.payload.transformed(transform),
            None => self.payload.clone(),
        }
    }
}

/// Appearance attached to one surface geometry
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AppearanceRow {
    pub surface_id: i64,
    pub theme: Option<String>,
    pub texture_uri: Option<String>,
    /// Texture coordinates per ring, matching the polygon rings
    pub tex_coords: Option<Vec<Vec<[f64; 2]>>>,
    pub material: Option<Material>,
}

/// Which boundary surfaces a geometry query returns
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeometrySelection {
    /// Only surfaces typed as ground
    Ground,
    All,
}

/// Narrow read/write interface over the city model database
pub trait FeatureStore: Send {
    /// Features of the given classes whose envelope intersects `bbox` in XY.
    fn features_in_envelope(&self, bbox: &Envelope, class_ids: &[i32]) -> Result<Vec<FeatureRecord>>;

    fn feature_by_gmlid(&self, gmlid: &str) -> Result<Option<FeatureRecord>>;

    fn feature(&self, id: i64) -> Result<Option<FeatureRecord>>;

    /// Union of the envelopes of all features of the given classes.
    fn extent(&self, class_ids: &[i32]) -> Result<Option<Envelope>>;

    fn group_members(&self, group_id: i64) -> Result<Vec<FeatureRecord>>;

    /// Geometry rows of a feature at exactly one LOD.
    fn geometry_rows(&self, feature_id: i64, lod: u8, selection: GeometrySelection) -> Result<Vec<GeometryRow>>;

    fn appearance_rows(&self, root_id: i64, theme: Option<&str>) -> Result<Vec<AppearanceRow>>;

    fn texture_blob(&self, uri: &str) -> Result<Option<Vec<u8>>>;

    fn generic_attribute(&self, feature_id: i64, name: &str) -> Result<Option<String>>;

    fn set_generic_attribute(&self, feature_id: i64, name: &str, value: &str) -> Result<()>;

    fn generic_attributes(&self, feature_id: i64) -> Result<Vec<(String, String)>>;
}

/// Opens one store per concurrent unit
pub trait StoreConnector: Send + Sync {
    fn connect(&self) -> Result<Box<dyn FeatureStore>>;
}
