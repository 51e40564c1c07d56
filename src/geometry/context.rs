// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! Per-object accumulation of vertices, surfaces and textures

use super::dedup::{CoordinateTree, VertexId, DEFAULT_TOLERANCE};
use super::surface::{Surface, SurfaceAppearance, SurfaceId};
use crate::error::{ExportError, Result};
use crate::texture::{sanitize_file_name, TextureImage};
use ahash::AHashMap;
use nalgebra::Point3;
use tracing::{debug, warn};

/// Deduplicated vertex
#[derive(Debug, Clone, PartialEq)]
pub struct Vertex {
    pub id: VertexId,
    pub position: Point3<f64>,
    tex_coords: Vec<(SurfaceId, [f64; 2])>,
}

impl Vertex {
    fn new(id: VertexId, position: Point3<f64>) -> Self {
        Self {
            id,
            position,
            tex_coords: Vec::new(),
        }
    }

    /// Texture coordinate this vertex carries on `surface`.
    pub fn tex_coord(&self, surface: SurfaceId) -> Option<[f64; 2]> {
        self.tex_coords
            .iter()
            .find(|(id, _)| *id == surface)
            .map(|(_, uv)| *uv)
    }

    pub fn set_tex_coord(&mut self, surface: SurfaceId, uv: [f64; 2]) {
        match self.tex_coords.iter_mut().find(|(id, _)| *id == surface) {
            Some(entry) => entry.1 = uv,
            None => self.tex_coords.push((surface, uv)),
        }
    }

    pub fn tex_coords(&self) -> &[(SurfaceId, [f64; 2])] {
        &self.tex_coords
    }
}

/// Everything gathered for one exported object (or a merged group)
///
/// Vertex ids are insertion indices into [`ExportContext::vertices`], so buffers
/// built from a context come out in a deterministic order.
#[derive(Debug, Clone)]
pub struct ExportContext {
    name: String,
    tolerance: f64,
    tree: CoordinateTree,
    vertices: Vec<Vertex>,
    surfaces: Vec<Surface>,
    surface_index: AHashMap<SurfaceId, usize>,
    textures: AHashMap<String, TextureImage>,
    texture_sources: AHashMap<String, String>,
    origin: Option<Point3<f64>>,
    lowest: Vec<VertexId>,
    id_range: Option<(i64, i64)>,
    next_synthetic_id: SurfaceId,
}

impl ExportContext {
    pub fn new(name: impl Into<String>, feature_id: i64) -> Self {
        Self::with_tolerance(name, feature_id, DEFAULT_TOLERANCE)
    }

    pub fn with_tolerance(name: impl Into<String>, feature_id: i64, tolerance: f64) -> Self {
        Self {
            name: name.into(),
            tolerance,
            tree: CoordinateTree::new(tolerance),
            vertices: Vec::new(),
            surfaces: Vec::new(),
            surface_index: AHashMap::new(),
            textures: AHashMap::new(),
            texture_sources: AHashMap::new(),
            origin: None,
            lowest: Vec::new(),
            id_range: Some((feature_id, feature_id)),
            next_synthetic_id: -1,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn vertices(&self) -> &[Vertex] {
        &self.vertices
    }

    pub fn vertex(&self, id: VertexId) -> Option<&Vertex> {
        self.vertices.get(id as usize)
    }

    pub fn surfaces(&self) -> &[Surface] {
        &self.surfaces
    }

    pub fn surface(&self, id: SurfaceId) -> Option<&Surface> {
        self.surface_index.get(&id).map(|&index| &self.surfaces[index])
    }

    pub fn is_empty(&self) -> bool {
        self.surfaces.is_empty()
    }

    /// Lowest vertex seen so far, or the coordinate origin for an empty context.
    pub fn origin(&self) -> Point3<f64> {
        self.origin.unwrap_or_else(Point3::origin)
    }

    /// Vertices whose height equals the lowest height within tolerance.
    pub fn lowest_points(&self) -> Vec<Point3<f64>> {
        self.lowest
            .iter()
            .filter_map(|&id| self.vertex(id))
            .map(|vertex| vertex.position)
            .collect()
    }

    /// Smallest and largest feature id folded into this context.
    pub fn id_range(&self) -> Option<(i64, i64)> {
        self.id_range
    }

    /// Insert a point, returning the id of an existing vertex within tolerance
    /// when there is one.
    pub fn add_vertex(&mut self, position: Point3<f64>) -> VertexId {
        let next_id = self.vertices.len() as VertexId;
        let (id, created) = self.tree.get_or_insert(&position, next_id);
        if created {
            self.vertices.push(Vertex::new(id, position));
            self.track_lowest(id, &position);
        }
        id
    }

    fn track_lowest(&mut self, id: VertexId, position: &Point3<f64>) {
        match self.origin {
            Some(origin) if position.z < origin.z - self.tolerance => {
                self.origin = Some(*position);
                self.lowest.clear();
                self.lowest.push(id);
            }
            Some(origin) if (position.z - origin.z).abs() <= self.tolerance => {
                self.lowest.push(id);
            }
            Some(_) => {}
            None => {
                self.origin = Some(*position);
                self.lowest.push(id);
            }
        }
    }

    fn take_surface_id(&mut self, requested: SurfaceId) -> SurfaceId {
        if !self.surface_index.contains_key(&requested) {
            return requested;
        }
        while self.surface_index.contains_key(&self.next_synthetic_id) {
            self.next_synthetic_id -= 1;
        }
        let id = self.next_synthetic_id;
        self.next_synthetic_id -= 1;
        id
    }

    /// Add a polygon with holes.
    ///
    /// A repeated closing point is dropped from every ring. Hole rings with
    /// fewer than three points are ignored; a short exterior ring is an error.
    /// Texture coordinates, when given, must match the rings point for point,
    /// otherwise the surface falls back to its untextured appearance.
    pub fn add_surface(
        &mut self,
        id: SurfaceId,
        rings: &[Vec<Point3<f64>>],
        tex_coords: Option<&[Vec<[f64; 2]>]>,
        appearance: SurfaceAppearance,
    ) -> Result<SurfaceId> {
        let mut appearance = appearance;
        let mut use_tex_coords = match (&appearance, tex_coords) {
            (SurfaceAppearance::Texture { .. }, Some(coords)) => Some(coords),
            _ => None,
        };
        if appearance.texture_uri().is_some()
            && !tex_coords_match(rings, use_tex_coords, self.tolerance)
        {
            warn!(surface = id, "Texture coordinates do not match rings, dropping texture");
            appearance = appearance.without_texture();
            use_tex_coords = None;
        }

        let mut kept: Vec<(&[Point3<f64>], Option<&[[f64; 2]]>)> = Vec::with_capacity(rings.len());
        for (index, ring) in rings.iter().enumerate() {
            let len = open_ring_len(ring, self.tolerance);
            if len < 3 {
                if index == 0 {
                    return Err(ExportError::Geometry(format!(
                        "surface {} has an exterior ring with {} points",
                        id, len
                    )));
                }
                debug!(surface = id, ring = index, "Skipping degenerate hole ring");
                continue;
            }
            let coords = use_tex_coords.map(|coords| &coords[index][..len]);
            kept.push((&ring[..len], coords));
        }

        let surface_id = self.take_surface_id(id);
        let mut ring_sizes = Vec::with_capacity(kept.len());
        let mut vertex_ids = Vec::new();
        for (ring, coords) in kept {
            ring_sizes.push(ring.len());
            for (i, point) in ring.iter().enumerate() {
                let vertex_id = self.add_vertex(*point);
                if let Some(coords) = coords {
                    self.vertices[vertex_id as usize].set_tex_coord(surface_id, coords[i]);
                }
                vertex_ids.push(vertex_id);
            }
        }

        self.surface_index.insert(surface_id, self.surfaces.len());
        self.surfaces.push(Surface {
            id: surface_id,
            ring_sizes,
            vertex_ids,
            appearance,
        });
        Ok(surface_id)
    }

    // ---- textures ----

    pub fn textures(&self) -> &AHashMap<String, TextureImage> {
        &self.textures
    }

    pub fn texture(&self, name: &str) -> Option<&TextureImage> {
        self.textures.get(name)
    }

    /// Canonical name already assigned to a source URI.
    pub fn canonical_texture(&self, source_uri: &str) -> Option<&str> {
        self.texture_sources.get(source_uri).map(String::as_str)
    }

    /// Register the image behind a source URI and return its canonical name.
    ///
    /// A URI seen before keeps its first image.
    pub fn register_texture(&mut self, source_uri: &str, image: TextureImage) -> String {
        if let Some(existing) = self.texture_sources.get(source_uri) {
            return existing.clone();
        }
        let name = self.allocate_texture_name(&sanitize_file_name(source_uri));
        self.textures.insert(name.clone(), image);
        self.texture_sources
            .insert(source_uri.to_string(), name.clone());
        name
    }

    /// Store a generated image under a free name derived from `hint`.
    pub fn insert_generated_texture(&mut self, hint: &str, image: TextureImage) -> String {
        let name = self.allocate_texture_name(hint);
        self.textures.insert(name.clone(), image);
        name
    }

    pub fn remove_texture(&mut self, name: &str) -> Option<TextureImage> {
        self.textures.remove(name)
    }

    /// Drop images no surface references any more.
    pub fn retain_referenced_textures(&mut self) {
        let referenced: ahash::AHashSet<String> = self
            .surfaces
            .iter()
            .filter_map(|surface| surface.appearance.texture_uri())
            .map(str::to_string)
            .collect();
        self.textures.retain(|name, _| referenced.contains(name));
        self.texture_sources
            .retain(|_, name| referenced.contains(name));
    }

    fn allocate_texture_name(&self, hint: &str) -> String {
        if !self.textures.contains_key(hint) {
            return hint.to_string();
        }
        let (stem, extension) = match hint.rfind('.') {
            Some(dot) if dot > 0 => (&hint[..dot], &hint[dot..]),
            _ => (hint, ""),
        };
        let mut counter = 1;
        loop {
            let candidate = format!("{}_{}{}", stem, counter, extension);
            if !self.textures.contains_key(&candidate) {
                return candidate;
            }
            counter += 1;
        }
    }

    /// Texture coordinates of a surface, one per distinct vertex.
    pub fn surface_tex_coords(&self, surface: &Surface) -> Vec<(VertexId, Option<[f64; 2]>)> {
        surface
            .unique_vertex_ids()
            .into_iter()
            .map(|id| (id, self.vertex(id).and_then(|v| v.tex_coord(surface.id))))
            .collect()
    }

    /// Point a textured surface at another image and replace its coordinates.
    pub fn retexture_surface(
        &mut self,
        surface_id: SurfaceId,
        texture: &str,
        tex_coords: &[(VertexId, [f64; 2])],
    ) {
        let Some(&index) = self.surface_index.get(&surface_id) else {
            return;
        };
        if let SurfaceAppearance::Texture { uri, .. } = &mut self.surfaces[index].appearance {
            *uri = texture.to_string();
        }
        for (vertex_id, uv) in tex_coords {
            if let Some(vertex) = self.vertices.get_mut(*vertex_id as usize) {
                vertex.set_tex_coord(surface_id, *uv);
            }
        }
    }

    /// Fold another context into this one.
    ///
    /// Vertices are re-inserted through this context's tree, colliding surface
    /// ids are replaced by synthesized ones and textures are re-keyed so no two
    /// source images share a name.
    pub fn merge(&mut self, other: ExportContext) {
        let ExportContext {
            vertices,
            surfaces,
            textures,
            texture_sources,
            id_range,
            ..
        } = other;

        let mut other_textures = textures;
        let mut renamed: AHashMap<String, String> = AHashMap::new();
        for (source, canonical) in texture_sources {
            let target = match self.texture_sources.get(&source) {
                Some(existing) => {
                    other_textures.remove(&canonical);
                    existing.clone()
                }
                None => {
                    let name = self.allocate_texture_name(&canonical);
                    if let Some(image) = other_textures.remove(&canonical) {
                        self.textures.insert(name.clone(), image);
                    }
                    self.texture_sources.insert(source, name.clone());
                    name
                }
            };
            renamed.insert(canonical, target);
        }
        for (canonical, image) in other_textures {
            let name = self.allocate_texture_name(&canonical);
            self.textures.insert(name.clone(), image);
            renamed.insert(canonical, name);
        }

        let id_map: Vec<VertexId> = vertices
            .iter()
            .map(|vertex| self.add_vertex(vertex.position))
            .collect();

        for mut surface in surfaces {
            let old_id = surface.id;
            let new_id = self.take_surface_id(old_id);
            for old_vertex in surface.unique_vertex_ids() {
                let Some(uv) = vertices
                    .get(old_vertex as usize)
                    .and_then(|v| v.tex_coord(old_id))
                else {
                    continue;
                };
                let target = id_map[old_vertex as usize];
                self.vertices[target as usize].set_tex_coord(new_id, uv);
            }
            for vertex_id in surface.vertex_ids.iter_mut() {
                *vertex_id = id_map[*vertex_id as usize];
            }
            if let SurfaceAppearance::Texture { uri, .. } = &mut surface.appearance {
                if let Some(name) = renamed.get(uri.as_str()) {
                    *uri = name.clone();
                }
            }
            surface.id = new_id;
            self.surface_index.insert(new_id, self.surfaces.len());
            self.surfaces.push(surface);
        }

        self.id_range = match (self.id_range, id_range) {
            (Some((a_min, a_max)), Some((b_min, b_max))) => {
                Some((a_min.min(b_min), a_max.max(b_max)))
            }
            (a, b) => a.or(b),
        };
    }
}

/// Ring length without a closing point that repeats the first one.
fn open_ring_len(ring: &[Point3<f64>], tolerance: f64) -> usize {
    let len = ring.len();
    if len > 1 {
        let first = &ring[0];
        let last = &ring[len - 1];
        let closed = (first.x - last.x).abs() <= tolerance
            && (first.y - last.y).abs() <= tolerance
            && (first.z - last.z).abs() <= tolerance;
        if closed {
            return len - 1;
        }
    }
    len
}

fn tex_coords_match(
    rings: &[Vec<Point3<f64>>],
    coords: Option<&[Vec<[f64; 2]>]>,
    tolerance: f64,
) -> bool {
    let Some(coords) = coords else {
        return false;
    };
    coords.len() == rings.len()
        && rings
            .iter()
            .zip(coords)
            .all(|(ring, uv)| uv.len() >= open_ring_len(ring, tolerance))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square(z: f64) -> Vec<Point3<f64>> {
        vec![
            Point3::new(0.0, 0.0, z),
            Point3::new(1.0, 0.0, z),
            Point3::new(1.0, 1.0, z),
            Point3::new(0.0, 1.0, z),
            Point3::new(0.0, 0.0, z),
        ]
    }

    #[test]
    fn test_closing_point_is_stripped() {
        let mut ctx = ExportContext::new("obj", 1);
        let id = ctx.add_surface(10, &[square(0.0)], None, SurfaceAppearance::None).unwrap();
        let surface = ctx.surface(id).unwrap();
        assert_eq!(surface.ring_sizes, vec![4]);
        assert_eq!(ctx.vertices().len(), 4);
    }

    #[test]
    fn test_short_exterior_is_rejected() {
        let mut ctx = ExportContext::new("obj", 1);
        let ring = vec![Point3::new(0.0, 0.0, 0.0), Point3::new(1.0, 0.0, 0.0)];
        assert!(ctx.add_surface(1, &[ring], None, SurfaceAppearance::None).is_err());
    }

    #[test]
    fn test_duplicate_surface_id_is_resynthesized() {
        let mut ctx = ExportContext::new("obj", 1);
        let a = ctx.add_surface(7, &[square(0.0)], None, SurfaceAppearance::None).unwrap();
        let b = ctx.add_surface(7, &[square(1.0)], None, SurfaceAppearance::None).unwrap();
        assert_eq!(a, 7);
        assert!(b < 0);
    }

    #[test]
    fn test_lowest_points_follow_minimum() {
        let mut ctx = ExportContext::new("obj", 1);
        ctx.add_surface(1, &[square(5.0)], None, SurfaceAppearance::None).unwrap();
        assert_eq!(ctx.lowest_points().len(), 4);
        ctx.add_surface(2, &[square(2.0)], None, SurfaceAppearance::None).unwrap();
        assert_eq!(ctx.origin().z, 2.0);
        assert_eq!(ctx.lowest_points().len(), 4);
        assert!(ctx.lowest_points().iter().all(|p| p.z == 2.0));
    }

    #[test]
    fn test_mismatched_tex_coords_drop_texture() {
        let mut ctx = ExportContext::new("obj", 1);
        let appearance = SurfaceAppearance::Texture {
            uri: "a.png".into(),
            fallback: None,
        };
        let coords = vec![vec![[0.0, 0.0], [1.0, 0.0]]];
        let id = ctx
            .add_surface(1, &[square(0.0)], Some(&coords), appearance)
            .unwrap();
        assert_eq!(ctx.surface(id).unwrap().appearance, SurfaceAppearance::None);
    }

    #[test]
    fn test_merge_reinserts_and_rekeys() {
        let mut a = ExportContext::new("a", 1);
        a.add_surface(1, &[square(0.0)], None, SurfaceAppearance::None).unwrap();
        let mut b = ExportContext::new("b", 9);
        b.add_surface(1, &[square(0.0)], None, SurfaceAppearance::None).unwrap();
        b.add_surface(2, &[square(3.0)], None, SurfaceAppearance::None).unwrap();

        a.merge(b);
        assert_eq!(a.vertices().len(), 8);
        assert_eq!(a.surfaces().len(), 3);
        assert_eq!(a.id_range(), Some((1, 9)));
        let ids: Vec<_> = a.surfaces().iter().map(|s| s.id).collect();
        assert_eq!(ids[0], 1);
        assert!(ids[1] < 0);
        assert_eq!(ids[2], 2);
        assert_eq!(a.surfaces()[1].vertex_ids, a.surfaces()[0].vertex_ids);
    }

    #[test]
    fn test_merge_renames_colliding_textures() {
        let image = || TextureImage::from_image(image::RgbaImage::new(1, 1));
        let mut a = ExportContext::new("a", 1);
        let name_a = a.register_texture("x/wall.png", image());
        let mut b = ExportContext::new("b", 2);
        let name_b = b.register_texture("y/wall.png", image());
        let appearance = SurfaceAppearance::Texture {
            uri: name_b.clone(),
            fallback: None,
        };
        let coords = vec![vec![[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0], [0.0, 0.0]]];
        b.add_surface(5, &[square(0.0)], Some(&coords), appearance).unwrap();

        a.merge(b);
        assert_eq!(name_a, "wall.png");
        assert_eq!(a.textures().len(), 2);
        let merged = a.surface(5).unwrap();
        assert_eq!(merged.appearance.texture_uri(), Some("wall_1.png"));
        let vertex = a.vertex(merged.vertex_ids[2]).unwrap();
        assert_eq!(vertex.tex_coord(5), Some([1.0, 1.0]));
    }
}
