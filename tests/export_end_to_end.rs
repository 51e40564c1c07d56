// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! Full exports from a SQLite database into a temporary directory

use anyhow::Result;
use citykml::db::{AppearanceRow, FeatureRecord, GeometryPayload, GeometryRow};
use citykml::geometry::Envelope;
use citykml::model::SurfaceType;
use citykml::{DisplayForm, ExportConfig, Exporter, ProgressEvent, SqliteConnector, SqliteStore};
use image::{ImageFormat, Rgba, RgbaImage};
use nalgebra::Point3;
use std::io::Cursor;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

const ALL_FORMS: [DisplayForm; 4] = [
    DisplayForm::Footprint,
    DisplayForm::Extruded,
    DisplayForm::Geometry,
    DisplayForm::Collada,
];

fn png_bytes() -> Result<Vec<u8>> {
    let image = RgbaImage::from_fn(8, 8, |x, y| Rgba([x as u8 * 30, y as u8 * 30, 90, 255]));
    let mut bytes = Vec::new();
    image.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)?;
    Ok(bytes)
}

/// Box building with corners (x, y) and (x + d, y + d) between z0 and z1.
fn box_rows(feature_id: i64, first_row: i64, lod: u8, x: f64, y: f64, z0: f64, z1: f64) -> Vec<GeometryRow> {
    let d = 0.0002;
    let corners = [[x, y], [x + d, y], [x + d, y + d], [x, y + d]];
    let mut rings: Vec<(SurfaceType, Vec<[f64; 3]>)> = Vec::new();
    // ground faces down, roof faces up
    rings.push((
        SurfaceType::Ground,
        corners.iter().rev().map(|c| [c[0], c[1], z0]).collect(),
    ));
    rings.push((SurfaceType::Roof, corners.iter().map(|c| [c[0], c[1], z1]).collect()));
    for i in 0..4 {
        let a = corners[i];
        let b = corners[(i + 1) % 4];
        rings.push((
            SurfaceType::Wall,
            vec![[a[0], a[1], z0], [b[0], b[1], z0], [b[0], b[1], z1], [a[0], a[1], z1]],
        ));
    }

    rings
        .into_iter()
        .enumerate()
        .map(|(i, (surface_type, ring))| GeometryRow {
            id: first_row + i as i64,
            feature_id,
            root_id: feature_id * 1000,
            lod,
            surface_type,
            payload: GeometryPayload::polygon(vec![ring]),
            implicit: None,
        })
        .collect()
}

fn building(id: i64, x: f64, y: f64) -> FeatureRecord {
    FeatureRecord {
        id,
        gmlid: format!("BLDG_{id}"),
        class_id: 26,
        envelope: Some(Envelope::new(
            Point3::new(x, y, 34.0),
            Point3::new(x + 0.0002, y + 0.0002, 48.0),
        )),
        name: Some(format!("House {id}")),
        description: None,
    }
}

/// Two buildings: one at LOD 2 with a textured wall, one only at LOD 1.
fn seed_database(path: &Path) -> Result<()> {
    let store = SqliteStore::open(path)?;
    store.create_schema()?;

    store.insert_feature(&building(1, 13.4000, 52.5000))?;
    let rows = box_rows(1, 100, 2, 13.4000, 52.5000, 34.0, 48.0);
    for row in &rows {
        store.insert_geometry(row)?;
    }
    store.insert_texture("facade.png", &png_bytes()?)?;
    store.insert_appearance(&AppearanceRow {
        surface_id: rows[2].id,
        theme: None,
        texture_uri: Some("facade.png".into()),
        tex_coords: Some(vec![vec![[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0]]]),
        material: None,
    })?;

    store.insert_feature(&building(2, 13.4010, 52.5010))?;
    for row in box_rows(2, 200, 1, 13.4010, 52.5010, 35.0, 41.0) {
        store.insert_geometry(&row)?;
    }
    Ok(())
}

fn config_for(dir: &TempDir) -> Result<ExportConfig> {
    let db = dir.path().join("city.sqlite");
    seed_database(&db)?;
    let mut config = ExportConfig::default();
    config.database.path = db;
    config.output.directory = dir.path().join("out");
    config.selection.forms = ALL_FORMS.to_vec();
    Ok(config)
}

#[test]
fn test_export_writes_every_form() -> Result<()> {
    let dir = TempDir::new()?;
    let config = config_for(&dir)?;
    let connector = Arc::new(SqliteConnector::new(config.database.path.clone()));

    let exported = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&exported);
    let exporter = Exporter::new(config, connector)?.on_progress(move |event| {
        if let ProgressEvent::Exported { .. } = event {
            counter.fetch_add(1, Ordering::SeqCst);
        }
    });
    let summary = exporter.run()?;
    println!("{:?}", summary);

    assert_eq!(summary.queued, 8);
    assert_eq!(summary.exported, 8);
    assert_eq!(summary.failed, 0);
    assert_eq!(summary.write_failures, 0);
    assert!(!summary.cancelled);
    assert_eq!(exported.load(Ordering::SeqCst), 8);

    let out = dir.path().join("out");
    for form in ALL_FORMS {
        let document = out.join(format!("citymodel_{}.kml", form));
        assert!(document.exists(), "missing {}", document.display());
        let text = std::fs::read_to_string(&document)?;
        assert!(text.contains("BLDG_1") && text.contains("BLDG_2"), "{form} document lacks a building");
    }

    let master = std::fs::read_to_string(out.join("citymodel.kml"))?;
    for form in ALL_FORMS {
        assert!(master.contains(&format!("citymodel_{}.kml", form)));
    }

    let geometry = std::fs::read_to_string(out.join("citymodel_geometry.kml"))?;
    assert!(geometry.contains("BLDG_1_geometry_roof"));
    assert!(geometry.contains("BLDG_1_geometry_wall"));

    let collada = std::fs::read_to_string(out.join("BLDG_1/BLDG_1.dae"))?;
    assert!(collada.contains("<COLLADA"));
    assert!(collada.contains("<triangles"));
    assert!(out.join("BLDG_2/BLDG_2.dae").exists());

    let metadata: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(out.join("citymodel.json"))?)?;
    let features = metadata["features"].as_array().expect("feature list");
    assert_eq!(features.len(), 8);
    for feature in features {
        let expected_lod = if feature["gmlid"] == "BLDG_1" { 2 } else { 1 };
        assert_eq!(feature["lod"], expected_lod, "{feature}");
    }
    Ok(())
}

#[test]
fn test_export_into_kmz() -> Result<()> {
    let dir = TempDir::new()?;
    let mut config = config_for(&dir)?;
    config.output.kmz = true;
    config.selection.forms = vec![DisplayForm::Collada, DisplayForm::Footprint];

    let summary = citykml::export(config)?;
    assert_eq!(summary.exported, 4);

    let out = dir.path().join("out");
    let kmz = out.join("citymodel.kmz");
    assert!(summary.files.contains(&kmz));
    assert!(!out.join("citymodel_footprint.kml").exists());

    let mut archive = zip::ZipArchive::new(std::fs::File::open(&kmz)?)?;
    let names: Vec<String> = archive.file_names().map(str::to_string).collect();
    assert_eq!(archive.by_index(0)?.name(), "citymodel.kml");
    assert!(names.iter().any(|n| n == "BLDG_1/BLDG_1.dae"), "{names:?}");
    assert!(names.iter().any(|n| n == "citymodel_collada.kml"));
    Ok(())
}

#[test]
fn test_cancelled_export_stops_early() -> Result<()> {
    let dir = TempDir::new()?;
    let config = config_for(&dir)?;
    let connector = Arc::new(SqliteConnector::new(config.database.path.clone()));

    let exporter = Exporter::new(config, connector)?;
    let cancel = exporter.cancel_flag();
    let exporter = exporter.on_progress(move |event| {
        if let ProgressEvent::Queued = event {
            cancel.store(true, Ordering::SeqCst);
        }
    });
    let summary = exporter.run()?;

    assert!(summary.cancelled);
    assert!(summary.queued < 8, "queued {}", summary.queued);
    assert!(summary.exported + summary.skipped + summary.failed <= summary.queued);
    assert!(dir.path().join("out/citymodel.kml").exists());
    Ok(())
}

#[test]
fn test_unknown_ids_export_nothing() -> Result<()> {
    let dir = TempDir::new()?;
    let mut config = config_for(&dir)?;
    config.selection.gmlids = vec!["NOPE".to_string()];

    let summary = citykml::export(config)?;
    assert_eq!(summary.queued, 0);
    assert_eq!(summary.exported, 0);
    Ok(())
}
