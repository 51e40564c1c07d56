// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! Surfaces and their appearance

use super::dedup::VertexId;
use serde::{Deserialize, Serialize};

/// Database geometry id, or a negative synthesized id after a merge
pub type SurfaceId = i64;

/// Phong-style material
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Material {
    pub ambient_intensity: f64,
    pub diffuse: [f64; 3],
    pub emissive: [f64; 3],
    pub specular: [f64; 3],
    pub shininess: f64,
    pub transparency: f64,
}

impl Default for Material {
    fn default() -> Self {
        Self {
            ambient_intensity: 0.2,
            diffuse: [0.8, 0.8, 0.8],
            emissive: [0.0, 0.0, 0.0],
            specular: [1.0, 1.0, 1.0],
            shininess: 0.2,
            transparency: 0.0,
        }
    }
}

impl Material {
    /// Deterministic batch name derived from the quantized material values.
    ///
    /// Materials that quantize to the same bytes share a batch.
    pub fn batch_name(&self) -> String {
        let mut name = String::from("mat_");
        let channels = std::iter::once(self.ambient_intensity)
            .chain(self.diffuse)
            .chain(self.emissive)
            .chain(self.specular)
            .chain([self.shininess, self.transparency]);
        for channel in channels {
            name.push_str(&format!("{:02x}", quantize(channel)));
        }
        name
    }

    /// Diffuse colour and opacity as RGBA in `[0, 1]`.
    pub fn rgba(&self) -> [f64; 4] {
        [
            self.diffuse[0],
            self.diffuse[1],
            self.diffuse[2],
            1.0 - self.transparency.clamp(0.0, 1.0),
        ]
    }
}

fn quantize(value: f64) -> u8 {
    (value.clamp(0.0, 1.0) * 255.0).round() as u8
}

/// Appearance attached to a surface
#[derive(Debug, Clone, PartialEq, Default)]
pub enum SurfaceAppearance {
    #[default]
    None,
    Material(Material),
    Texture {
        uri: String,
        fallback: Option<Material>,
    },
}

impl SurfaceAppearance {
    pub fn texture_uri(&self) -> Option<&str> {
        match self {
            SurfaceAppearance::Texture { uri, .. } => Some(uri),
            _ => None,
        }
    }

    /// Material to use when the surface is rendered untextured.
    pub fn material(&self) -> Option<&Material> {
        match self {
            SurfaceAppearance::Material(material) => Some(material),
            SurfaceAppearance::Texture { fallback, .. } => fallback.as_ref(),
            SurfaceAppearance::None => None,
        }
    }

    /// Drop the texture, keeping its fallback material if any.
    pub fn without_texture(&self) -> Self {
        match self.material() {
            Some(material) => SurfaceAppearance::Material(*material),
            None => SurfaceAppearance::None,
        }
    }
}

/// A planar polygon with holes, expressed as vertex ids
#[derive(Debug, Clone, PartialEq)]
pub struct Surface {
    pub id: SurfaceId,
    /// Vertex count per ring, exterior first
    pub ring_sizes: Vec<usize>,
    /// Vertex ids of all rings, concatenated in ring order
    pub vertex_ids: Vec<VertexId>,
    pub appearance: SurfaceAppearance,
}

impl Surface {
    pub fn ring_count(&self) -> usize {
        self.ring_sizes.len()
    }

    pub fn exterior_len(&self) -> usize {
        self.ring_sizes.first().copied().unwrap_or(0)
    }

    /// Vertex ids per ring.
    pub fn rings(&self) -> impl Iterator<Item = &[VertexId]> {
        let mut offset = 0;
        self.ring_sizes.iter().map(move |&size| {
            let ring = &self.vertex_ids[offset..offset + size];
            offset += size;
            ring
        })
    }

    /// Start offsets of the hole rings within `vertex_ids`.
    pub fn hole_offsets(&self) -> Vec<usize> {
        let mut offsets = Vec::with_capacity(self.ring_sizes.len().saturating_sub(1));
        let mut offset = 0;
        for (i, size) in self.ring_sizes.iter().enumerate() {
            if i > 0 {
                offsets.push(offset);
            }
            offset += size;
        }
        offsets
    }

    /// Vertex ids in first-occurrence order without repeats.
    pub fn unique_vertex_ids(&self) -> Vec<VertexId> {
        let mut seen = ahash::AHashSet::with_capacity(self.vertex_ids.len());
        self.vertex_ids
            .iter()
            .copied()
            .filter(|id| seen.insert(*id))
            .collect()
    }
}
