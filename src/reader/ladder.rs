// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! LOD fallback ladder

use super::{DisplayForm, FeatureCategory, LodRequest, LodResolution};
use crate::db::{FeatureStore, GeometryPayload, GeometryRow, GeometrySelection};
use crate::error::Result;
use crate::geometry::{union_footprint, PolygonRings};
use crate::model::SurfaceType;
use tracing::{debug, warn};

/// Resolve the geometry of one feature, starting at the requested LOD and
/// stepping down to the category's minimum for `form`.
///
/// Footprint-based forms prefer explicit ground surfaces and otherwise fall
/// back to the 2D union of every polygon at that LOD.
pub fn resolve_ladder(
    store: &dyn FeatureStore,
    feature_id: i64,
    category: FeatureCategory,
    lod: LodRequest,
    form: DisplayForm,
) -> Result<LodResolution> {
    let min = category.min_lod(form);
    let start = lod.start();
    if start < min {
        return Ok(LodResolution::Unavailable);
    }

    for level in (min..=start).rev() {
        if form.is_footprint_based() {
            let ground = polygons_only(place_rows(
                store.geometry_rows(feature_id, level, GeometrySelection::Ground)?,
                category,
            ));
            if !ground.is_empty() {
                return Ok(LodResolution::Resolved {
                    lod: level,
                    rows: ground,
                    reversed_rings: false,
                });
            }

            let all = polygons_only(place_rows(
                store.geometry_rows(feature_id, level, GeometrySelection::All)?,
                category,
            ));
            let union = footprint_rows(feature_id, level, &all);
            if !union.is_empty() {
                debug!(feature_id, lod = level, "Using footprint union, no ground surface");
                return Ok(LodResolution::Resolved {
                    lod: level,
                    rows: union,
                    reversed_rings: true,
                });
            }
        } else {
            let rows = place_rows(
                store.geometry_rows(feature_id, level, GeometrySelection::All)?,
                category,
            );
            if !rows.is_empty() {
                return Ok(LodResolution::Resolved {
                    lod: level,
                    rows,
                    reversed_rings: false,
                });
            }
        }
        debug!(feature_id, lod = level, form = %form, "No geometry at LOD");
    }

    Ok(LodResolution::Unavailable)
}

/// Apply implicit placements so every row is in world coordinates.
fn place_rows(rows: Vec<GeometryRow>, category: FeatureCategory) -> Vec<GeometryRow> {
    rows.into_iter()
        .map(|mut row| {
            if let Some(transform) = row.implicit.take() {
                if category.supports_implicit_geometry() {
                    row.payload = row.payload.transformed(&transform);
                } else {
                    warn!(
                        geometry = row.id,
                        category = %category,
                        "Ignoring implicit placement on a category without prototypes"
                    );
                }
            }
            row
        })
        .collect()
}

fn polygons_only(rows: Vec<GeometryRow>) -> Vec<GeometryRow> {
    rows.into_iter().filter(|row| row.payload.is_polygon()).collect()
}

fn footprint_rows(feature_id: i64, lod: u8, rows: &[GeometryRow]) -> Vec<GeometryRow> {
    let Some(root_id) = rows.first().map(|row| row.root_id) else {
        return Vec::new();
    };
    let polygons: Vec<PolygonRings> = rows.iter().filter_map(|row| row.payload.rings()).collect();

    union_footprint(&polygons)
        .into_iter()
        .enumerate()
        .map(|(i, rings)| GeometryRow {
            id: -(i as i64) - 1,
            feature_id,
            root_id,
            lod,
            surface_type: SurfaceType::Ground,
            payload: GeometryPayload::polygon(
                rings
                    .iter()
                    .map(|ring| ring.iter().map(|p| [p.x, p.y, p.z]).collect())
                    .collect(),
            ),
            implicit: None,
        })
        .collect()
}
