// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! Reader for ordinary thematic features

use super::{
    resolve_ladder, AssembleOptions, AssembleReport, DisplayForm, FeatureCategory,
    GeometryReader, LodRequest, LodResolution,
};
use crate::db::{AppearanceRow, FeatureRecord, FeatureStore, GeometryRow};
use crate::error::Result;
use crate::geometry::{ExportContext, SurfaceAppearance};
use crate::texture::TextureImage;
use ahash::AHashMap;
use tracing::{debug, warn};

/// Buildings, bridges, tunnels, vegetation, transportation and furniture
#[derive(Debug, Clone, Copy)]
pub struct ThematicReader {
    category: FeatureCategory,
}

impl ThematicReader {
    pub fn new(category: FeatureCategory) -> Self {
        Self { category }
    }
}

impl GeometryReader for ThematicReader {
    fn category(&self) -> FeatureCategory {
        self.category
    }

    fn resolve_geometry_at_lod(
        &self,
        store: &dyn FeatureStore,
        feature: &FeatureRecord,
        lod: LodRequest,
        form: DisplayForm,
    ) -> Result<LodResolution> {
        resolve_ladder(store, feature.id, self.category, lod, form)
    }

    fn assemble(
        &self,
        store: &dyn FeatureStore,
        resolution: &LodResolution,
        ctx: &mut ExportContext,
        options: &AssembleOptions,
    ) -> Result<AssembleReport> {
        assemble_rows(store, resolution.rows(), ctx, options)
    }
}

/// Add polygon rows as surfaces, attaching materials and textures when
/// `options.appearance` is set. Bad surfaces are skipped and counted.
pub fn assemble_rows(
    store: &dyn FeatureStore,
    rows: &[GeometryRow],
    ctx: &mut ExportContext,
    options: &AssembleOptions,
) -> Result<AssembleReport> {
    let appearances = if options.appearance {
        load_appearances(store, rows, options.theme.as_deref())?
    } else {
        AHashMap::new()
    };

    let mut report = AssembleReport::default();
    for row in rows {
        let Some(rings) = row.payload.rings() else {
            report.other_geometries.push(row.payload.points());
            continue;
        };

        let (appearance, tex_coords) = match appearances.get(&row.id) {
            Some(found) => resolve_appearance(store, ctx, found),
            None => (SurfaceAppearance::None, None),
        };

        match ctx.add_surface(row.id, &rings, tex_coords.as_deref(), appearance) {
            Ok(_) => report.surfaces += 1,
            Err(err) => {
                warn!(geometry = row.id, error = %err, "Skipping surface");
                report.skipped += 1;
            }
        }
    }
    Ok(report)
}

fn load_appearances(
    store: &dyn FeatureStore,
    rows: &[GeometryRow],
    theme: Option<&str>,
) -> Result<AHashMap<i64, AppearanceRow>> {
    let mut roots: Vec<i64> = rows.iter().map(|row| row.root_id).collect();
    roots.sort_unstable();
    roots.dedup();

    let mut by_surface = AHashMap::new();
    for root in roots {
        for appearance in store.appearance_rows(root, theme)? {
            // first row per surface wins
            by_surface.entry(appearance.surface_id).or_insert(appearance);
        }
    }
    Ok(by_surface)
}

fn resolve_appearance(
    store: &dyn FeatureStore,
    ctx: &mut ExportContext,
    row: &AppearanceRow,
) -> (SurfaceAppearance, Option<Vec<Vec<[f64; 2]>>>) {
    let fallback = row.material;
    let Some(uri) = row.texture_uri.as_deref() else {
        return match fallback {
            Some(material) => (SurfaceAppearance::Material(material), None),
            None => (SurfaceAppearance::None, None),
        };
    };

    let untextured = || match fallback {
        Some(material) => SurfaceAppearance::Material(material),
        None => SurfaceAppearance::None,
    };

    let existing = ctx.canonical_texture(uri).map(str::to_string);
    let canonical = match existing {
        Some(name) => name,
        None => match store.texture_blob(uri) {
            Ok(Some(bytes)) => ctx.register_texture(uri, TextureImage::decode(bytes, uri)),
            Ok(None) => {
                debug!(uri, "Texture image missing, using material");
                return (untextured(), None);
            }
            Err(err) => {
                warn!(uri, error = %err, "Reading texture failed, using material");
                return (untextured(), None);
            }
        },
    };

    (
        SurfaceAppearance::Texture {
            uri: canonical,
            fallback,
        },
        row.tex_coords.clone(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{GeometryPayload, SqliteStore};
    use crate::geometry::Material;
    use crate::model::SurfaceType;
    use image::{ImageFormat, Rgba, RgbaImage};
    use std::io::Cursor;

    fn png_bytes() -> Vec<u8> {
        let image = RgbaImage::from_pixel(4, 4, Rgba([10, 20, 30, 255]));
        let mut bytes = Vec::new();
        image
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .unwrap();
        bytes
    }

    fn setup() -> (SqliteStore, Vec<GeometryRow>) {
        let store = SqliteStore::open_in_memory().unwrap();
        store.create_schema().unwrap();
        store
            .insert_feature(&FeatureRecord {
                id: 1,
                gmlid: "B1".into(),
                class_id: 26,
                envelope: None,
                name: None,
                description: None,
            })
            .unwrap();
        let mut rows = Vec::new();
        for (id, x) in [(10, 0.0), (11, 5.0)] {
            let row = GeometryRow {
                id,
                feature_id: 1,
                root_id: 99,
                lod: 2,
                surface_type: SurfaceType::Wall,
                payload: GeometryPayload::polygon(vec![vec![
                    [x, 0.0, 0.0],
                    [x + 1.0, 0.0, 0.0],
                    [x + 1.0, 0.0, 1.0],
                    [x, 0.0, 1.0],
                ]]),
                implicit: None,
            };
            store.insert_geometry(&row).unwrap();
            rows.push(row);
        }
        (store, rows)
    }

    #[test]
    fn test_textures_are_shared_per_uri() {
        let (store, rows) = setup();
        store.insert_texture("facade.png", &png_bytes()).unwrap();
        for id in [10, 11] {
            store
                .insert_appearance(&AppearanceRow {
                    surface_id: id,
                    theme: None,
                    texture_uri: Some("facade.png".into()),
                    tex_coords: Some(vec![vec![[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0]]]),
                    material: None,
                })
                .unwrap();
        }

        let mut ctx = ExportContext::new("B1", 1);
        let options = AssembleOptions {
            appearance: true,
            theme: None,
        };
        let report = assemble_rows(&store, &rows, &mut ctx, &options).unwrap();
        assert_eq!(report.surfaces, 2);
        assert_eq!(ctx.textures().len(), 1);
        assert!(ctx.surfaces().iter().all(|s| s.appearance.texture_uri() == Some("facade.png")));
    }

    #[test]
    fn test_missing_texture_falls_back_to_material() {
        let (store, rows) = setup();
        let material = Material {
            diffuse: [1.0, 0.0, 0.0],
            ..Material::default()
        };
        store
            .insert_appearance(&AppearanceRow {
                surface_id: 10,
                theme: None,
                texture_uri: Some("gone.png".into()),
                tex_coords: None,
                material: Some(material),
            })
            .unwrap();

        let mut ctx = ExportContext::new("B1", 1);
        let options = AssembleOptions {
            appearance: true,
            theme: None,
        };
        assemble_rows(&store, &rows, &mut ctx, &options).unwrap();
        assert_eq!(ctx.surface(10).unwrap().appearance, SurfaceAppearance::Material(material));
        assert_eq!(ctx.surface(11).unwrap().appearance, SurfaceAppearance::None);
    }

    #[test]
    fn test_points_are_reported_not_added() {
        let (store, mut rows) = setup();
        rows.push(GeometryRow {
            id: 12,
            feature_id: 1,
            root_id: 99,
            lod: 2,
            surface_type: SurfaceType::Other,
            payload: GeometryPayload::Point {
                coordinates: [1.0, 2.0, 3.0],
            },
            implicit: None,
        });
        let mut ctx = ExportContext::new("B1", 1);
        let report = assemble_rows(&store, &rows, &mut ctx, &AssembleOptions::default()).unwrap();
        assert_eq!(report.surfaces, 2);
        assert_eq!(report.other_geometries.len(), 1);
    }
}
