// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! Cropping and atlas packing must keep every vertex on the same texel

use anyhow::Result;
use citykml::geometry::{ExportContext, SurfaceAppearance, SurfaceId, VertexId};
use citykml::texture::{AtlasBuilder, AtlasOptions, PackingAlgorithm, TextureImage};
use image::{Rgba, RgbaImage};
use nalgebra::Point3;

/// Every texel stores its own coordinates and the image tag.
fn coded_image(width: u32, height: u32, tag: u8) -> RgbaImage {
    RgbaImage::from_fn(width, height, |x, y| Rgba([x as u8, y as u8, tag, 255]))
}

/// Nearest texel for a UV with the origin at the bottom left.
fn sample(image: &RgbaImage, uv: [f64; 2]) -> Rgba<u8> {
    let (w, h) = image.dimensions();
    let x = ((uv[0] * w as f64).floor() as i64).clamp(0, w as i64 - 1) as u32;
    let y = (((1.0 - uv[1]) * h as f64).floor() as i64).clamp(0, h as i64 - 1) as u32;
    *image.get_pixel(x, y)
}

struct Sampled {
    surface: SurfaceId,
    vertex: VertexId,
    texel: Rgba<u8>,
}

fn add_textured_quad(ctx: &mut ExportContext, id: SurfaceId, z: f64, texture: &str, uv: [[f64; 2]; 4]) -> Result<()> {
    let ring = vec![
        Point3::new(0.0, 0.0, z),
        Point3::new(4.0, 0.0, z),
        Point3::new(4.0, 3.0, z),
        Point3::new(0.0, 3.0, z),
    ];
    ctx.add_surface(
        id,
        &[ring],
        Some(&[uv.to_vec()]),
        SurfaceAppearance::Texture {
            uri: texture.to_string(),
            fallback: None,
        },
    )?;
    Ok(())
}

fn sample_all(ctx: &ExportContext) -> Vec<Sampled> {
    let mut samples = Vec::new();
    for surface in ctx.surfaces() {
        let image = surface
            .appearance
            .texture_uri()
            .and_then(|uri| ctx.texture(uri))
            .and_then(TextureImage::image)
            .expect("surface image");
        for &vertex in &surface.vertex_ids {
            let uv = ctx.vertex(vertex).and_then(|v| v.tex_coord(surface.id)).expect("uv");
            samples.push(Sampled {
                surface: surface.id,
                vertex,
                texel: sample(image, uv),
            });
        }
    }
    samples
}

fn roundtrip(algorithm: PackingAlgorithm, power_of_two: bool) -> Result<()> {
    let mut ctx = ExportContext::new("house", 1);
    let a = ctx.register_texture("facade.png", TextureImage::from_image(coded_image(40, 30, 1)));
    let b = ctx.register_texture("roof.png", TextureImage::from_image(coded_image(25, 50, 2)));
    let c = ctx.register_texture("door.png", TextureImage::from_image(coded_image(16, 16, 3)));

    // UVs avoid texel edges so nearest sampling is unambiguous.
    add_textured_quad(&mut ctx, 10, 0.0, &a, [[0.21, 0.13], [0.69, 0.13], [0.69, 0.77], [0.21, 0.77]])?;
    add_textured_quad(&mut ctx, 11, 5.0, &b, [[0.05, 0.51], [0.93, 0.51], [0.93, 0.97], [0.05, 0.97]])?;
    add_textured_quad(&mut ctx, 12, 9.0, &c, [[0.53, 0.03], [0.97, 0.03], [0.97, 0.47], [0.53, 0.47]])?;
    // Same image sampled by a second surface with a different window.
    add_textured_quad(&mut ctx, 13, 12.0, &a, [[0.02, 0.02], [0.33, 0.02], [0.33, 0.27], [0.02, 0.27]])?;

    let before = sample_all(&ctx);

    let report = AtlasBuilder::new(AtlasOptions {
        algorithm,
        power_of_two,
        crop: true,
        ..AtlasOptions::default()
    })
    .build(&mut ctx);
    println!("{:?}: {:?}", algorithm, report);
    assert_eq!(report.cropped_surfaces, 4);
    assert_eq!(report.packed_images, 4);
    assert!(report.atlases >= 1);

    let after = sample_all(&ctx);
    assert_eq!(before.len(), after.len());
    for (original, packed) in before.iter().zip(&after) {
        assert_eq!((original.surface, original.vertex), (packed.surface, packed.vertex));
        let [x0, y0, tag0, _] = original.texel.0;
        let [x1, y1, tag1, _] = packed.texel.0;
        assert_eq!(tag0, tag1, "surface {} sampled another image", original.surface);
        assert!(
            x0.abs_diff(x1) <= 1 && y0.abs_diff(y1) <= 1,
            "surface {} vertex {}: texel ({}, {}) became ({}, {})",
            original.surface,
            original.vertex,
            x0,
            y0,
            x1,
            y1
        );
    }

    for surface in ctx.surfaces() {
        let uri = surface.appearance.texture_uri().expect("still textured");
        assert!(uri.starts_with("house_atlas_"), "{} not packed", uri);
    }
    Ok(())
}

#[test]
fn test_shelf_atlas_keeps_texels() -> Result<()> {
    roundtrip(PackingAlgorithm::Shelf, false)
}

#[test]
fn test_guillotine_atlas_keeps_texels() -> Result<()> {
    roundtrip(PackingAlgorithm::Guillotine, false)
}

#[test]
fn test_power_of_two_atlas_keeps_texels() -> Result<()> {
    roundtrip(PackingAlgorithm::Shelf, true)
}
