// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! Per-surface texture cropping

use super::TextureImage;
use crate::geometry::{ExportContext, SurfaceId, VertexId};
use image::{imageops, RgbaImage};
use rayon::prelude::*;
use std::path::Path;
use tracing::warn;

struct CropJob {
    surface: SurfaceId,
    texture: String,
    coords: Vec<(VertexId, [f64; 2])>,
}

struct CropResult {
    surface: SurfaceId,
    hint: String,
    image: RgbaImage,
    coords: Vec<(VertexId, [f64; 2])>,
}

/// Pixel window `(x, y, width, height)` covering a UV range.
///
/// UV space has its origin bottom-left, rasters top-left. Window starts are
/// rounded down and ends up, so the window never cuts into sampled texels.
pub(crate) fn crop_window(
    min_uv: [f64; 2],
    max_uv: [f64; 2],
    width: u32,
    height: u32,
) -> (u32, u32, u32, u32) {
    let w = width as f64;
    let h = height as f64;

    let mut x0 = (min_uv[0] * w).floor().clamp(0.0, w) as u32;
    let mut x1 = (max_uv[0] * w).ceil().clamp(0.0, w) as u32;
    let mut y0 = ((1.0 - max_uv[1]) * h).floor().clamp(0.0, h) as u32;
    let mut y1 = ((1.0 - min_uv[1]) * h).ceil().clamp(0.0, h) as u32;

    if x1 <= x0 {
        x0 = x0.min(width.saturating_sub(1));
        x1 = x0 + 1;
    }
    if y1 <= y0 {
        y0 = y0.min(height.saturating_sub(1));
        y1 = y0 + 1;
    }
    (x0, y0, x1 - x0, y1 - y0)
}

fn uv_bounds(coords: &[(VertexId, [f64; 2])]) -> ([f64; 2], [f64; 2]) {
    let mut min = [f64::INFINITY; 2];
    let mut max = [f64::NEG_INFINITY; 2];
    for (_, uv) in coords {
        for k in 0..2 {
            min[k] = min[k].min(uv[k]);
            max[k] = max[k].max(uv[k]);
        }
    }
    (min, max)
}

fn run_job(job: &CropJob, image: &RgbaImage) -> CropResult {
    let (width, height) = image.dimensions();
    let (min, max) = uv_bounds(&job.coords);
    let (x0, y0, cw, ch) = crop_window(min, max, width, height);
    let cropped = imageops::crop_imm(image, x0, y0, cw, ch).to_image();

    let w = width as f64;
    let h = height as f64;
    let row_end = (y0 + ch) as f64;
    let coords = job
        .coords
        .iter()
        .map(|(id, [u, v])| {
            let u2 = (u * w - x0 as f64) / cw as f64;
            let v2 = (v * h - (h - row_end)) / ch as f64;
            (*id, [u2, v2])
        })
        .collect();

    let stem = Path::new(&job.texture)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("texture");
    CropResult {
        surface: job.surface,
        hint: format!("{}_s{}.png", stem, job.surface.unsigned_abs()),
        image: cropped,
        coords,
    }
}

/// Replace every textured surface's image with the part it actually samples.
///
/// Surfaces with texture coordinates outside `[0, 1]` keep their image.
/// Images no longer referenced afterwards are dropped. Returns the number of
/// surfaces cropped.
pub fn crop_surface_textures(ctx: &mut ExportContext) -> usize {
    let mut jobs = Vec::new();
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
        let Some(coords) = coords else {
            continue;
        };
        if coords
            .iter()
            .any(|(_, uv)| !(0.0..=1.0).contains(&uv[0]) || !(0.0..=1.0).contains(&uv[1]))
        {
            warn!(
                surface = surface.id,
                texture, "Texture coordinates outside [0, 1], skipping crop"
            );
            continue;
        }
        jobs.push(CropJob {
            surface: surface.id,
            texture: texture.to_string(),
            coords,
        });
    }

    let results: Vec<CropResult> = {
        let shared: &ExportContext = ctx;
        jobs.par_iter()
            .filter_map(|job| {
                let image = shared.texture(&job.texture)?.image()?;
                Some(run_job(job, image))
            })
            .collect()
    };

    let cropped = results.len();
    for result in results {
        let name = ctx.insert_generated_texture(&result.hint, TextureImage::from_image(result.image));
        ctx.retexture_surface(result.surface, &name, &result.coords);
    }
    if cropped > 0 {
        ctx.retain_referenced_textures();
    }
    cropped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::SurfaceAppearance;
    use approx::assert_relative_eq;
    use nalgebra::Point3;

    #[test]
    fn test_crop_window_rounds_outward() {
        // u in [0.1, 0.55] over 10 px -> columns 1..6
        // v in [0.25, 0.5] over 8 px -> rows 4..6
        let (x, y, w, h) = crop_window([0.1, 0.25], [0.55, 0.5], 10, 8);
        assert_eq!((x, y, w, h), (1, 4, 5, 2));
    }

    #[test]
    fn test_crop_window_never_empty() {
        let (_, _, w, h) = crop_window([1.0, 0.0], [1.0, 0.0], 4, 4);
        assert_eq!((w, h), (1, 1));
    }

    #[test]
    fn test_crop_rewrites_coordinates() {
        let mut ctx = ExportContext::new("obj", 1);
        let mut image = RgbaImage::new(8, 8);
        image.put_pixel(2, 5, image::Rgba([255, 0, 0, 255]));
        let name = ctx.register_texture("wall.png", TextureImage::from_image(image));
        let ring = vec![
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(1.0, 1.0, 0.0),
        ];
        let coords = vec![vec![[0.25, 0.25], [0.5, 0.25], [0.5, 0.5]]];
        let id = ctx
            .add_surface(
                1,
                &[ring],
                Some(&coords),
                SurfaceAppearance::Texture {
                    uri: name,
                    fallback: None,
                },
            )
            .unwrap();

        assert_eq!(crop_surface_textures(&mut ctx), 1);
        let surface = ctx.surface(id).unwrap();
        let texture = surface.appearance.texture_uri().unwrap();
        assert_eq!(ctx.textures().len(), 1);
        assert_eq!(ctx.texture(texture).unwrap().dimensions(), Some((2, 2)));

        let first = ctx.vertex(surface.vertex_ids[0]).unwrap().tex_coord(id).unwrap();
        assert_relative_eq!(first[0], 0.0, epsilon = 1e-12);
        assert_relative_eq!(first[1], 0.0, epsilon = 1e-12);
        // The red texel at (2, 5) is the bottom-left texel of the crop.
        let cropped = ctx.texture(texture).unwrap().image().unwrap();
        assert_eq!(cropped.get_pixel(0, 1).0, [255, 0, 0, 255]);
    }
}
