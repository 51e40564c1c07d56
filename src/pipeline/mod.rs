// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! Two-stage export pipeline
//!
//! A splitter thread enumerates work items into a bounded queue, compute
//! workers turn them into [`ExportBundle`]s and writer threads serialize the
//! bundles.

mod exporter;
mod splitter;
mod tiling;
mod worker;

pub use exporter::{ExportSummary, Exporter, ProgressEvent};
pub use splitter::{SplitStats, WorkSplitter};
pub use tiling::{Tile, TileKey, TilingPlan};
pub use worker::{ComputeWorker, WorkerShared};

use crate::config::AltitudeMode;
use crate::db::FeatureRecord;
use crate::geometry::{Envelope, MeshBundle};
use crate::model::{DisplayForm, FeatureCategory, LodRequest, SurfaceType};
use crate::texture::TextureImage;
use nalgebra::Point3;

/// One (feature, display form) pair to export
#[derive(Debug, Clone, PartialEq)]
pub struct WorkItem {
    pub feature: FeatureRecord,
    pub category: FeatureCategory,
    pub form: DisplayForm,
    pub lod: LodRequest,
    pub tile: TileKey,
    /// Envelope projected to WGS84
    pub wgs84_envelope: Option<Envelope>,
}

impl WorkItem {
    pub fn id(&self) -> i64 {
        self.feature.id
    }

    pub fn gmlid(&self) -> &str {
        &self.feature.gmlid
    }
}

/// A polygon in `(lon, lat, height)` ready for KML
#[derive(Debug, Clone, PartialEq)]
pub struct KmlPolygon {
    pub surface_type: SurfaceType,
    pub rings: Vec<Vec<Point3<f64>>>,
}

/// Mesh placed at a WGS84 location
#[derive(Debug, Clone)]
pub struct ModelContent {
    /// Positions are metres relative to the mesh origin
    pub mesh: MeshBundle,
    /// `(lon, lat, height)` of the mesh origin, offset applied
    pub location: Point3<f64>,
    pub textures: Vec<(String, TextureImage)>,
}

/// Rendered geometry of one work item
#[derive(Debug, Clone)]
pub enum BundleContent {
    Polygons {
        polygons: Vec<KmlPolygon>,
        /// Points and curves in `(lon, lat, height)`
        lines: Vec<Vec<Point3<f64>>>,
        /// Extrusion height above ground for the extruded form
        extrude: Option<f64>,
    },
    Model(ModelContent),
}

/// Everything a writer needs for one exported object
#[derive(Debug, Clone)]
pub struct ExportBundle {
    pub item: WorkItem,
    /// LOD the geometry was taken from
    pub lod: u8,
    pub offset: f64,
    pub altitude_mode: AltitudeMode,
    pub content: BundleContent,
    /// Generic attributes for the balloon
    pub attributes: Vec<(String, String)>,
}

impl ExportBundle {
    /// File-system friendly object name.
    pub fn object_name(&self) -> String {
        let name: String = self
            .item
            .gmlid()
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
            .collect();
        if name.is_empty() {
            format!("object_{}", self.item.id())
        } else {
            name
        }
    }
}
