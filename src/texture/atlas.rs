// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! Texture atlas construction and UV remapping

use super::crop::crop_surface_textures;
use super::packer::{pack, PackerOptions, PackingAlgorithm};
use super::TextureImage;
use crate::geometry::{ExportContext, SurfaceId, VertexId};
use ahash::{AHashMap, AHashSet};
use image::imageops::{self, FilterType};
use image::RgbaImage;
use tracing::debug;

#[derive(Debug, Clone, Copy)]
pub struct AtlasOptions {
    pub algorithm: PackingAlgorithm,
    pub power_of_two: bool,
    /// Image scale in `(0, 1]` applied before packing
    pub scale_factor: f64,
    pub max_size: u32,
    /// Crop each surface's image to the area it samples before packing
    pub crop: bool,
    /// Encode atlases as JPEG when no packed texel is translucent
    pub jpeg_atlases: bool,
}

impl Default for AtlasOptions {
    fn default() -> Self {
        Self {
            algorithm: PackingAlgorithm::Shelf,
            power_of_two: false,
            scale_factor: 1.0,
            max_size: 2048,
            crop: true,
            jpeg_atlases: false,
        }
    }
}

/// What an atlas pass did to a context
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AtlasReport {
    pub cropped_surfaces: usize,
    pub packed_images: usize,
    pub atlases: usize,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AtlasBuilder {
    options: AtlasOptions,
}

fn in_unit_square(uv: &[f64; 2]) -> bool {
    (0.0..=1.0).contains(&uv[0]) && (0.0..=1.0).contains(&uv[1])
}

impl AtlasBuilder {
    pub fn new(options: AtlasOptions) -> Self {
        Self { options }
    }

    /// Crop and pack the context's decoded images, rewriting texture
    /// coordinates so every surface samples the same texels as before.
    ///
    /// Contexts with fewer than two decoded images are left alone, apart from
    /// the crop pass.
    pub fn build(&self, ctx: &mut ExportContext) -> AtlasReport {
        let mut report = AtlasReport::default();
        let decoded = ctx.textures().values().filter(|t| t.is_decoded()).count();
        if decoded < 2 {
            return report;
        }

        if self.options.crop {
            report.cropped_surfaces = crop_surface_textures(ctx);
        }

        // Images referenced by a surface with wrapping coordinates stay standalone.
        let mut users: AHashMap<String, Vec<(SurfaceId, Vec<(VertexId, [f64; 2])>)>> =
            AHashMap::new();
        let mut excluded: AHashSet<String> = AHashSet::new();
        for surface in ctx.surfaces() {
            let Some(texture) = surface.appearance.texture_uri() else {
                continue;
            };
            if !ctx.texture(texture).is_some_and(TextureImage::is_decoded) {
                continue;
            }
            let coords: Option<Vec<(VertexId, [f64; 2])>> = ctx
                .surface_tex_coords(surface)
                .into_iter()
                .map(|(id, uv)| uv.map(|uv| (id, uv)))
                .collect();
            match coords {
                Some(coords) if coords.iter().all(|(_, uv)| in_unit_square(uv)) => {
                    users
                        .entry(texture.to_string())
                        .or_default()
                        .push((surface.id, coords));
                }
                _ => {
                    excluded.insert(texture.to_string());
                }
            }
        }

        let mut names: Vec<String> = users
            .keys()
            .filter(|name| !excluded.contains(*name))
            .cloned()
            .collect();
        names.sort();
        if names.len() < 2 {
            debug!(object = ctx.name(), "Fewer than two packable images, no atlas");
            return report;
        }

        let mut images: Vec<RgbaImage> = Vec::with_capacity(names.len());
        for name in &names {
            let Some(image) = ctx.texture(name).and_then(TextureImage::image) else {
                continue;
            };
            images.push(self.scaled(image));
        }
        if images.len() != names.len() {
            return report;
        }

        let sizes: Vec<(u32, u32)> = images.iter().map(|i| i.dimensions()).collect();
        let packed = pack(
            &sizes,
            &PackerOptions {
                algorithm: self.options.algorithm,
                power_of_two: self.options.power_of_two,
                max_size: self.options.max_size,
            },
        );

        let mut canvases: Vec<RgbaImage> = packed
            .atlases
            .iter()
            .map(|&(w, h)| RgbaImage::new(w, h))
            .collect();
        for (image, placement) in images.iter().zip(&packed.placements) {
            imageops::replace(
                &mut canvases[placement.atlas],
                image,
                placement.x as i64,
                placement.y as i64,
            );
        }

        let opaque: Vec<bool> = (0..canvases.len())
            .map(|atlas| {
                images
                    .iter()
                    .zip(&packed.placements)
                    .filter(|(_, p)| p.atlas == atlas)
                    .all(|(image, _)| image.pixels().all(|px| px.0[3] == 255))
            })
            .collect();

        let mut atlas_names = Vec::with_capacity(canvases.len());
        for (index, canvas) in canvases.into_iter().enumerate() {
            let extension = if self.options.jpeg_atlases && opaque[index] {
                "jpg"
            } else {
                "png"
            };
            let hint = format!("{}_atlas_{}.{}", sanitize_stem(ctx.name()), index, extension);
            atlas_names.push(ctx.insert_generated_texture(&hint, TextureImage::from_image(canvas)));
        }

        for (name, placement) in names.iter().zip(&packed.placements) {
            let (atlas_w, atlas_h) = packed.atlases[placement.atlas];
            let (atlas_w, atlas_h) = (atlas_w as f64, atlas_h as f64);
            let (x, y) = (placement.x as f64, placement.y as f64);
            let (w, h) = (placement.width as f64, placement.height as f64);

            for (surface, coords) in users.get(name).into_iter().flatten() {
                let remapped: Vec<(VertexId, [f64; 2])> = coords
                    .iter()
                    .map(|(id, [u, v])| {
                        let u2 = (x + u * w) / atlas_w;
                        let v2 = 1.0 - (y + (1.0 - v) * h) / atlas_h;
                        (*id, [u2, v2])
                    })
                    .collect();
                ctx.retexture_surface(*surface, &atlas_names[placement.atlas], &remapped);
            }
            ctx.remove_texture(name);
        }
        ctx.retain_referenced_textures();

        report.packed_images = names.len();
        report.atlases = atlas_names.len();
        report
    }

    fn scaled(&self, image: &RgbaImage) -> RgbaImage {
        let scale = self.options.scale_factor;
        if !(scale > 0.0 && scale < 1.0) {
            return image.clone();
        }
        let (w, h) = image.dimensions();
        let nw = ((w as f64 * scale).round() as u32).max(1);
        let nh = ((h as f64 * scale).round() as u32).max(1);
        imageops::resize(image, nw, nh, FilterType::Triangle)
    }
}

fn sanitize_stem(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::SurfaceAppearance;
    use nalgebra::Point3;

    fn textured_triangle(ctx: &mut ExportContext, id: i64, z: f64, texture: &str, uv: [[f64; 2]; 3]) {
        let ring = vec![
            Point3::new(0.0, 0.0, z),
            Point3::new(1.0, 0.0, z),
            Point3::new(1.0, 1.0, z),
        ];
        ctx.add_surface(
            id,
            &[ring],
            Some(&[uv.to_vec()]),
            SurfaceAppearance::Texture {
                uri: texture.to_string(),
                fallback: None,
            },
        )
        .unwrap();
    }

    #[test]
    fn test_single_image_is_left_alone() {
        let mut ctx = ExportContext::new("obj", 1);
        let a = ctx.register_texture("a.png", TextureImage::from_image(RgbaImage::new(4, 4)));
        textured_triangle(&mut ctx, 1, 0.0, &a, [[0.0, 0.0], [1.0, 0.0], [1.0, 1.0]]);

        let report = AtlasBuilder::default().build(&mut ctx);
        assert_eq!(report, AtlasReport::default());
        assert!(ctx.texture("a.png").is_some());
    }

    #[test]
    fn test_two_images_share_one_atlas() {
        let mut ctx = ExportContext::new("obj", 1);
        let a = ctx.register_texture("a.png", TextureImage::from_image(RgbaImage::new(4, 4)));
        let b = ctx.register_texture("b.png", TextureImage::from_image(RgbaImage::new(8, 2)));
        textured_triangle(&mut ctx, 1, 0.0, &a, [[0.0, 0.0], [1.0, 0.0], [1.0, 1.0]]);
        textured_triangle(&mut ctx, 2, 1.0, &b, [[0.0, 0.0], [1.0, 0.0], [1.0, 1.0]]);

        let report = AtlasBuilder::new(AtlasOptions {
            crop: false,
            ..AtlasOptions::default()
        })
        .build(&mut ctx);
        assert_eq!(report.packed_images, 2);
        assert_eq!(report.atlases, 1);
        assert_eq!(ctx.textures().len(), 1);
        let atlas = ctx.surface(1).unwrap().appearance.texture_uri().unwrap().to_string();
        assert_eq!(ctx.surface(2).unwrap().appearance.texture_uri(), Some(atlas.as_str()));
        assert!(atlas.starts_with("obj_atlas_0"));
    }

    #[test]
    fn test_wrapping_surface_keeps_its_image() {
        let mut ctx = ExportContext::new("obj", 1);
        let a = ctx.register_texture("a.png", TextureImage::from_image(RgbaImage::new(4, 4)));
        let b = ctx.register_texture("b.png", TextureImage::from_image(RgbaImage::new(4, 4)));
        let c = ctx.register_texture("c.png", TextureImage::from_image(RgbaImage::new(4, 4)));
        textured_triangle(&mut ctx, 1, 0.0, &a, [[0.0, 0.0], [1.0, 0.0], [1.0, 1.0]]);
        textured_triangle(&mut ctx, 2, 1.0, &b, [[0.0, 0.0], [1.0, 0.0], [1.0, 1.0]]);
        textured_triangle(&mut ctx, 3, 2.0, &c, [[0.0, 0.0], [3.0, 0.0], [3.0, 2.0]]);

        AtlasBuilder::default().build(&mut ctx);
        assert_eq!(ctx.surface(3).unwrap().appearance.texture_uri(), Some("c.png"));
        assert_eq!(ctx.textures().len(), 2);
    }
}
