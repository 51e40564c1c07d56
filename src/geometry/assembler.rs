// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! Consolidation of an export context into shared mesh buffers

use super::context::ExportContext;
use super::dedup::VertexId;
use super::surface::{Material, Surface};
use super::triangulation::{polygon_normal, repair_winding, triangle_normal, triangulate_rings};
use ahash::AHashMap;
use nalgebra::{Point3, Vector3};
use tracing::{debug, warn};

/// Mesh assembly options
#[derive(Debug, Clone, Copy, Default)]
pub struct AssemblerOptions {
    /// Keep earcut's triangle order instead of following the exterior ring
    pub ignore_surface_orientation: bool,
}

/// What a batch is drawn with
#[derive(Debug, Clone, PartialEq)]
pub enum BatchKind {
    Textured { texture: String },
    Material(Material),
}

/// One triangle corner referencing the shared buffers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TriangleCorner {
    pub position: u32,
    pub normal: u32,
    pub tex_coord: Option<u32>,
}

/// Triangles sharing one material or texture
#[derive(Debug, Clone)]
pub struct MeshBatch {
    pub name: String,
    pub kind: BatchKind,
    /// Three corners per triangle
    pub corners: Vec<TriangleCorner>,
}

impl MeshBatch {
    pub fn triangle_count(&self) -> usize {
        self.corners.len() / 3
    }

    pub fn is_textured(&self) -> bool {
        matches!(self.kind, BatchKind::Textured { .. })
    }
}

/// Consolidated mesh of one export context
#[derive(Debug, Clone, Default)]
pub struct MeshBundle {
    /// Lowest point of the context; positions are relative to it
    pub origin: Point3<f64>,
    pub positions: Vec<[f64; 3]>,
    pub normals: Vec<[f64; 3]>,
    pub tex_coords: Vec<[f64; 2]>,
    /// Textured batches first, then material batches
    pub batches: Vec<MeshBatch>,
}

impl MeshBundle {
    pub fn triangle_count(&self) -> usize {
        self.batches.iter().map(MeshBatch::triangle_count).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }
}

struct BatchBuilder {
    batch: MeshBatch,
    tex_coord_index: AHashMap<(u64, u64), u32>,
}

/// Triangulated surface in global vertex ids, normals per corner
struct SurfaceTriangles {
    corners: Vec<VertexId>,
    normals: Vec<Vector3<f64>>,
}

/// Turns export contexts into [`MeshBundle`]s
#[derive(Debug, Clone, Copy, Default)]
pub struct MeshAssembler {
    options: AssemblerOptions,
}

impl MeshAssembler {
    pub fn new(options: AssemblerOptions) -> Self {
        Self { options }
    }

    pub fn assemble(&self, ctx: &ExportContext) -> MeshBundle {
        let origin = ctx.origin();
        let mut bundle = MeshBundle {
            origin,
            positions: ctx
                .vertices()
                .iter()
                .map(|v| {
                    let d = v.position - origin;
                    [d.x, d.y, d.z]
                })
                .collect(),
            ..MeshBundle::default()
        };

        let mut builders: Vec<BatchBuilder> = Vec::new();
        let mut by_name: AHashMap<String, usize> = AHashMap::new();

        for surface in ctx.surfaces() {
            let triangles = match self.triangulate_surface(ctx, surface, &origin) {
                Ok(Some(triangles)) => triangles,
                Ok(None) => continue,
                Err(err) => {
                    warn!(surface = surface.id, error = %err, "Skipping surface");
                    continue;
                }
            };

            let kind = batch_kind(ctx, surface);
            let name = match &kind {
                BatchKind::Textured { texture } => texture.clone(),
                BatchKind::Material(material) => material.batch_name(),
            };
            let slot = *by_name.entry(name.clone()).or_insert_with(|| {
                builders.push(BatchBuilder {
                    batch: MeshBatch {
                        name,
                        kind: kind.clone(),
                        corners: Vec::new(),
                    },
                    tex_coord_index: AHashMap::new(),
                });
                builders.len() - 1
            });
            let builder = &mut builders[slot];
            let textured = builder.batch.is_textured();

            for (corner, normal) in triangles.corners.iter().zip(&triangles.normals) {
                let normal_index = bundle.normals.len() as u32;
                bundle.normals.push([normal.x, normal.y, normal.z]);

                let tex_coord = if textured {
                    let uv = ctx
                        .vertex(*corner)
                        .and_then(|v| v.tex_coord(surface.id))
                        .unwrap_or([0.0, 0.0]);
                    let key = (uv[0].to_bits(), uv[1].to_bits());
                    let index = *builder.tex_coord_index.entry(key).or_insert_with(|| {
                        bundle.tex_coords.push(uv);
                        (bundle.tex_coords.len() - 1) as u32
                    });
                    Some(index)
                } else {
                    None
                };

                builder.batch.corners.push(TriangleCorner {
                    position: *corner,
                    normal: normal_index,
                    tex_coord,
                });
            }
        }

        let (textured, untextured): (Vec<_>, Vec<_>) = builders
            .into_iter()
            .map(|b| b.batch)
            .filter(|b| !b.corners.is_empty())
            .partition(MeshBatch::is_textured);
        bundle.batches = textured.into_iter().chain(untextured).collect();
        bundle
    }

    fn triangulate_surface(
        &self,
        ctx: &ExportContext,
        surface: &Surface,
        origin: &Point3<f64>,
    ) -> crate::Result<Option<SurfaceTriangles>> {
        let exterior_len = surface.exterior_len();
        if exterior_len < 3 {
            return Ok(None);
        }

        let points: Vec<Point3<f64>> = surface
            .vertex_ids
            .iter()
            .filter_map(|&id| ctx.vertex(id))
            .map(|v| Point3::from(v.position - origin))
            .collect();
        if points.len() != surface.vertex_ids.len() {
            return Ok(None);
        }

        let Some(surface_normal) = polygon_normal(&points[..exterior_len]) else {
            debug!(surface = surface.id, "Degenerate surface skipped");
            return Ok(None);
        };

        let mut local = triangulate_rings(&points, &surface.hole_offsets())?;

        let mut normals: Vec<Vector3<f64>> = Vec::with_capacity(local.len());
        for triangle in local.chunks_exact(3) {
            let n = triangle_normal(&points[triangle[0]], &points[triangle[1]], &points[triangle[2]])
                .unwrap_or(surface_normal);
            normals.extend([n, n, n]);
        }

        if !self.options.ignore_surface_orientation && repair_winding(&mut local, exterior_len) {
            normals.reverse();
            for n in normals.iter_mut() {
                *n = -*n;
            }
        }

        let mut corners = Vec::with_capacity(local.len());
        let mut kept_normals = Vec::with_capacity(local.len());
        for (triangle, tri_normals) in local.chunks_exact(3).zip(normals.chunks_exact(3)) {
            let a = surface.vertex_ids[triangle[0]];
            let b = surface.vertex_ids[triangle[1]];
            let c = surface.vertex_ids[triangle[2]];
            if a == b || b == c || a == c {
                continue;
            }
            corners.extend([a, b, c]);
            kept_normals.extend_from_slice(tri_normals);
        }

        if corners.is_empty() {
            return Ok(None);
        }
        Ok(Some(SurfaceTriangles {
            corners,
            normals: kept_normals,
        }))
    }
}

fn batch_kind(ctx: &ExportContext, surface: &Surface) -> BatchKind {
    if let Some(texture) = surface.appearance.texture_uri() {
        let has_image = ctx.texture(texture).is_some();
        let has_coords = surface
            .unique_vertex_ids()
            .iter()
            .all(|&id| ctx.vertex(id).and_then(|v| v.tex_coord(surface.id)).is_some());
        if has_image && has_coords {
            return BatchKind::Textured {
                texture: texture.to_string(),
            };
        }
    }
    BatchKind::Material(surface.appearance.material().copied().unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::SurfaceAppearance;

    fn quad(z: f64) -> Vec<Point3<f64>> {
        vec![
            Point3::new(0.0, 0.0, z),
            Point3::new(1.0, 0.0, z),
            Point3::new(1.0, 1.0, z),
            Point3::new(0.0, 1.0, z),
        ]
    }

    #[test]
    fn test_positions_are_origin_relative() {
        let mut ctx = ExportContext::new("obj", 1);
        ctx.add_surface(1, &[quad(10.0)], None, SurfaceAppearance::None).unwrap();
        let bundle = MeshAssembler::default().assemble(&ctx);

        assert_eq!(bundle.origin.z, 10.0);
        assert!(bundle.positions.iter().all(|p| p[2] == 0.0));
        assert_eq!(bundle.triangle_count(), 2);
        assert_eq!(bundle.normals.len(), 6);
    }

    #[test]
    fn test_default_material_batch() {
        let mut ctx = ExportContext::new("obj", 1);
        ctx.add_surface(1, &[quad(0.0)], None, SurfaceAppearance::None).unwrap();
        ctx.add_surface(2, &[quad(1.0)], None, SurfaceAppearance::None).unwrap();
        let bundle = MeshAssembler::default().assemble(&ctx);

        assert_eq!(bundle.batches.len(), 1);
        assert_eq!(bundle.batches[0].name, Material::default().batch_name());
        assert!(bundle.tex_coords.is_empty());
    }

    #[test]
    fn test_normals_follow_exterior_ring() {
        let mut ctx = ExportContext::new("obj", 1);
        let mut ring = quad(0.0);
        ctx.add_surface(1, &[ring.clone()], None, SurfaceAppearance::None).unwrap();
        ring.reverse();
        let mut flipped = ExportContext::new("obj", 1);
        flipped.add_surface(1, &[ring], None, SurfaceAppearance::None).unwrap();

        let up = MeshAssembler::default().assemble(&ctx);
        let down = MeshAssembler::default().assemble(&flipped);
        assert!(up.normals.iter().all(|n| n[2] > 0.99));
        assert!(down.normals.iter().all(|n| n[2] < -0.99));
    }
}
