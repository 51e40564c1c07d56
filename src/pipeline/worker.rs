// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! Compute stage: geometry, textures, projection

use super::{BundleContent, ExportBundle, KmlPolygon, ModelContent, WorkItem};
use crate::config::{ExportConfig, TextureConfig};
use crate::coords::{OffsetResolver, Projection};
use crate::db::FeatureStore;
use crate::error::{ExportError, Result};
use crate::geometry::{AssemblerOptions, BatchKind, ExportContext, MeshAssembler};
use crate::model::{DisplayForm, SurfaceType};
use crate::reader::{AssembleOptions, LodResolution, ReaderRegistry};
use crate::texture::{crop_surface_textures, AtlasBuilder, AtlasOptions};
use ahash::{AHashMap, AHashSet};
use nalgebra::Point3;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// State shared read-only by every compute worker
pub struct WorkerShared {
    pub config: Arc<ExportConfig>,
    pub registry: ReaderRegistry,
    pub projection: Arc<Projection>,
    pub offsets: OffsetResolver,
}

impl WorkerShared {
    pub fn new(
        config: Arc<ExportConfig>,
        projection: Arc<Projection>,
        offsets: OffsetResolver,
    ) -> Self {
        let registry = ReaderRegistry::standard(config.collada.merge_group_members);
        Self {
            config,
            registry,
            projection,
            offsets,
        }
    }
}

fn atlas_options(config: &TextureConfig) -> AtlasOptions {
    AtlasOptions {
        algorithm: config.algorithm,
        power_of_two: config.power_of_two,
        scale_factor: config.scale_factor,
        max_size: config.max_atlas_size,
        crop: config.crop,
        jpeg_atlases: config.jpeg_atlases,
    }
}

/// One compute worker with its own store connection
pub struct ComputeWorker<'a> {
    store: Box<dyn FeatureStore>,
    shared: &'a WorkerShared,
}

impl<'a> ComputeWorker<'a> {
    pub fn new(store: Box<dyn FeatureStore>, shared: &'a WorkerShared) -> Self {
        Self { store, shared }
    }

    /// Turn one work item into a bundle. `Ok(None)` means the object has
    /// nothing to render.
    pub fn process(&self, item: WorkItem) -> Result<Option<ExportBundle>> {
        let store = self.store.as_ref();
        let config = &self.shared.config;
        let reader = self
            .shared
            .registry
            .get(item.category, item.form)
            .ok_or_else(|| {
                ExportError::Geometry(format!("no reader for {} {}", item.category, item.form))
            })?;

        let resolution = reader.resolve_geometry_at_lod(store, &item.feature, item.lod, item.form)?;
        let Some(lod) = resolution.lod() else {
            info!(
                gmlid = %item.gmlid(),
                form = %item.form,
                "No geometry at any permitted LOD, skipping"
            );
            return Ok(None);
        };

        let options = AssembleOptions {
            appearance: item.form == DisplayForm::Collada && config.texture.enabled,
            theme: config.database.appearance_theme.clone(),
        };
        let mut ctx = ExportContext::new(item.gmlid(), item.id());
        let report = reader.assemble(store, &resolution, &mut ctx, &options)?;
        if ctx.is_empty() && report.other_geometries.is_empty() {
            info!(gmlid = %item.gmlid(), lod, "No usable surfaces, skipping");
            return Ok(None);
        }
        debug!(
            gmlid = %item.gmlid(),
            lod,
            surfaces = report.surfaces,
            skipped = report.skipped,
            vertices = ctx.vertices().len(),
            "Assembled object"
        );

        let candidates = if ctx.is_empty() {
            lowest_of(report.other_geometries.iter().flatten())
        } else {
            ctx.lowest_points()
        };
        let offset = self.shared.offsets.resolve(store, item.id(), lod, &candidates);

        let content = match item.form {
            DisplayForm::Collada => match self.model(&mut ctx, offset)? {
                Some(model) => BundleContent::Model(model),
                None => {
                    info!(gmlid = %item.gmlid(), "Mesh has no triangles, skipping");
                    return Ok(None);
                }
            },
            form => {
                let extrude = (form == DisplayForm::Extruded).then(|| {
                    item.feature
                        .envelope
                        .map(|envelope| envelope.size().z.max(0.0))
                        .unwrap_or(0.0)
                });
                BundleContent::Polygons {
                    polygons: self.polygons(&ctx, &resolution, form, offset)?,
                    lines: report
                        .other_geometries
                        .iter()
                        .map(|line| self.project_all(line.iter(), offset))
                        .collect::<Result<_>>()?,
                    extrude,
                }
            }
        };

        let attributes = if config.balloon.enabled {
            store.generic_attributes(item.id()).unwrap_or_else(|err| {
                warn!(gmlid = %item.gmlid(), error = %err, "Reading attributes failed");
                Vec::new()
            })
        } else {
            Vec::new()
        };

        Ok(Some(ExportBundle {
            item,
            lod,
            offset,
            altitude_mode: config.altitude.mode,
            content,
            attributes,
        }))
    }

    fn project_all<'p>(
        &self,
        points: impl Iterator<Item = &'p Point3<f64>>,
        offset: f64,
    ) -> Result<Vec<Point3<f64>>> {
        points
            .map(|point| {
                let mut projected = self.shared.projection.project(point)?;
                projected.z += offset;
                Ok(projected)
            })
            .collect()
    }

    fn polygons(
        &self,
        ctx: &ExportContext,
        resolution: &LodResolution,
        form: DisplayForm,
        offset: f64,
    ) -> Result<Vec<KmlPolygon>> {
        let surface_types: AHashMap<i64, SurfaceType> = resolution
            .rows()
            .iter()
            .map(|row| (row.id, row.surface_type))
            .collect();
        // ground surfaces face down; footprints are drawn from above
        let reverse = form.is_footprint_based() && !resolution.reversed_rings();

        let mut polygons = Vec::with_capacity(ctx.surfaces().len());
        for surface in ctx.surfaces() {
            let mut rings = Vec::with_capacity(surface.ring_count());
            for ring in surface.rings() {
                let positions = ring
                    .iter()
                    .filter_map(|&id| ctx.vertex(id))
                    .map(|v| &v.position);
                let mut points = self.project_all(positions, offset)?;
                if reverse {
                    points.reverse();
                }
                rings.push(points);
            }
            polygons.push(KmlPolygon {
                surface_type: surface_types.get(&surface.id).copied().unwrap_or(SurfaceType::Other),
                rings,
            });
        }
        Ok(polygons)
    }

    fn model(&self, ctx: &mut ExportContext, offset: f64) -> Result<Option<ModelContent>> {
        let config = &self.shared.config;
        if config.texture.enabled {
            if config.texture.atlas {
                let report = AtlasBuilder::new(atlas_options(&config.texture)).build(ctx);
                debug!(
                    object = ctx.name(),
                    cropped = report.cropped_surfaces,
                    packed = report.packed_images,
                    atlases = report.atlases,
                    "Texture atlas pass"
                );
            } else if config.texture.crop {
                crop_surface_textures(ctx);
            }
        }

        let mesh = MeshAssembler::new(AssemblerOptions {
            ignore_surface_orientation: config.collada.ignore_surface_orientation,
        })
        .assemble(ctx);
        if mesh.is_empty() {
            return Ok(None);
        }

        let mut location = self.shared.projection.project(&mesh.origin)?;
        location.z += offset;

        let used: AHashSet<&str> = mesh
            .batches
            .iter()
            .filter_map(|batch| match &batch.kind {
                BatchKind::Textured { texture } => Some(texture.as_str()),
                BatchKind::Material(_) => None,
            })
            .collect();
        let mut textures: Vec<_> = ctx
            .textures()
            .iter()
            .filter(|(name, _)| used.contains(name.as_str()))
            .map(|(name, image)| (name.clone(), image.clone()))
            .collect();
        textures.sort_by(|a, b| a.0.cmp(&b.0));

        Ok(Some(ModelContent {
            mesh,
            location,
            textures,
        }))
    }
}

fn lowest_of<'p>(points: impl Iterator<Item = &'p Point3<f64>>) -> Vec<Point3<f64>> {
    let points: Vec<Point3<f64>> = points.copied().collect();
    let min = points.iter().map(|p| p.z).fold(f64::INFINITY, f64::min);
    points.into_iter().filter(|p| p.z == min).collect()
}
