// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! Per-category geometry readers
//!
//! Every reader walks the same LOD fallback ladder and feeds the rows it
//! settles on into an [`ExportContext`]. Readers are looked up through
//! [`ReaderRegistry`] by (category, display form).

mod group;
mod ladder;
mod registry;
mod thematic;

pub use crate::model::{DisplayForm, FeatureCategory, LodRequest, SurfaceType};
pub use group::GroupReader;
pub use ladder::resolve_ladder;
pub use registry::ReaderRegistry;
pub use thematic::{assemble_rows, ThematicReader};

use crate::db::{FeatureRecord, FeatureStore, GeometryRow};
use crate::error::Result;
use crate::geometry::ExportContext;

impl FeatureCategory {
    /// Lowest LOD the fallback ladder may reach for a display form.
    pub fn min_lod(&self, form: DisplayForm) -> u8 {
        match (self, form.is_footprint_based()) {
            (FeatureCategory::Building | FeatureCategory::Transportation, true) => 0,
            _ => 1,
        }
    }

    /// Whether features of this category may reference prototype geometry.
    pub fn supports_implicit_geometry(&self) -> bool {
        matches!(self, FeatureCategory::Vegetation | FeatureCategory::Furniture)
    }
}

/// Outcome of the LOD fallback ladder
#[derive(Debug, Clone, PartialEq)]
pub enum LodResolution {
    Resolved {
        /// LOD the rows were taken from
        lod: u8,
        /// Rows in world coordinates
        rows: Vec<GeometryRow>,
        /// Rings already face upwards (synthesized footprint unions)
        reversed_rings: bool,
    },
    /// No LOD between the requested one and the minimum had geometry
    Unavailable,
}

impl LodResolution {
    pub fn lod(&self) -> Option<u8> {
        match self {
            LodResolution::Resolved { lod, .. } => Some(*lod),
            LodResolution::Unavailable => None,
        }
    }

    pub fn rows(&self) -> &[GeometryRow] {
        match self {
            LodResolution::Resolved { rows, .. } => rows,
            LodResolution::Unavailable => &[],
        }
    }

    pub fn reversed_rings(&self) -> bool {
        matches!(self, LodResolution::Resolved { reversed_rings: true, .. })
    }
}

/// How rows turn into surfaces
#[derive(Debug, Clone, Default)]
pub struct AssembleOptions {
    /// Fetch appearance rows and texture images
    pub appearance: bool,
    /// Appearance theme to select, any theme when unset
    pub theme: Option<String>,
}

/// Counts reported by [`GeometryReader::assemble`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AssembleReport {
    pub surfaces: usize,
    pub skipped: usize,
    /// Points and curves that cannot become surfaces, in world coordinates
    pub other_geometries: Vec<Vec<nalgebra::Point3<f64>>>,
}

/// Reader protocol shared by every category
pub trait GeometryReader: Send + Sync {
    fn category(&self) -> FeatureCategory;

    /// Walk down from the requested LOD until some geometry is found.
    fn resolve_geometry_at_lod(
        &self,
        store: &dyn FeatureStore,
        feature: &FeatureRecord,
        lod: LodRequest,
        form: DisplayForm,
    ) -> Result<LodResolution>;

    /// Feed resolved rows into an export context.
    fn assemble(
        &self,
        store: &dyn FeatureStore,
        resolution: &LodResolution,
        ctx: &mut ExportContext,
        options: &AssembleOptions,
    ) -> Result<AssembleReport>;
}
