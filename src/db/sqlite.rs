// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! SQLite implementation of the feature store

use super::payload::{GeometryPayload, ImplicitPlacement};
use super::queries;
use super::{
    AppearanceRow, FeatureRecord, FeatureStore, GeometryRow, GeometrySelection, StoreConnector,
};
use crate::error::Result;
use crate::geometry::Envelope;
use crate::model::SurfaceType;
use nalgebra::Point3;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

const BUSY_TIMEOUT: Duration = Duration::from_secs(10);

/// A single SQLite connection
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self> {
        Ok(Self {
            conn: Connection::open_in_memory()?,
        })
    }

    /// Create the tables if they do not exist yet.
    pub fn create_schema(&self) -> Result<()> {
        self.conn.execute_batch(queries::SCHEMA)?;
        Ok(())
    }

    pub fn execute_batch(&self, sql: &str) -> Result<()> {
        self.conn.execute_batch(sql)?;
        Ok(())
    }

    pub fn insert_feature(&self, feature: &FeatureRecord) -> Result<()> {
        let (min, max) = match &feature.envelope {
            Some(e) => (Some(e.min), Some(e.max)),
            None => (None, None),
        };
        self.conn.execute(
            queries::INSERT_FEATURE,
            params![
                feature.id,
                feature.gmlid,
                feature.class_id,
                feature.name,
                feature.description,
                min.map(|p| p.x),
                min.map(|p| p.y),
                min.map(|p| p.z),
                max.map(|p| p.x),
                max.map(|p| p.y),
                max.map(|p| p.z),
            ],
        )?;
        Ok(())
    }

    pub fn add_group_member(&self, group_id: i64, member_id: i64) -> Result<()> {
        self.conn
            .execute(queries::INSERT_GROUP_MEMBER, params![group_id, member_id])?;
        Ok(())
    }

    pub fn insert_geometry(&self, row: &GeometryRow) -> Result<()> {
        let implicit = match &row.implicit {
            Some(transform) => Some(serde_json::to_string(&ImplicitPlacement::from_transform(
                transform,
            ))?),
            None => None,
        };
        self.conn.execute(
            queries::INSERT_GEOMETRY,
            params![
                row.id,
                row.feature_id,
                row.root_id,
                row.lod,
                row.surface_type.as_str(),
                row.payload.to_json()?,
                implicit,
            ],
        )?;
        Ok(())
    }

    pub fn insert_appearance(&self, row: &AppearanceRow) -> Result<()> {
        let tex_coords = match &row.tex_coords {
            Some(coords) => Some(serde_json::to_string(coords)?),
            None => None,
        };
        let material = match &row.material {
            Some(material) => Some(serde_json::to_string(material)?),
            None => None,
        };
        self.conn.execute(
            queries::INSERT_APPEARANCE,
            params![row.surface_id, row.theme, row.texture_uri, tex_coords, material],
        )?;
        Ok(())
    }

    pub fn insert_texture(&self, uri: &str, data: &[u8]) -> Result<()> {
        self.conn.execute(queries::INSERT_TEXTURE, params![uri, data])?;
        Ok(())
    }

    fn query_features(&self, sql: &str, params: impl rusqlite::Params) -> Result<Vec<FeatureRecord>> {
        let mut stmt = self.conn.prepare_cached(sql)?;
        let rows = stmt.query_map(params, feature_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }
}

fn feature_from_row(row: &Row<'_>) -> rusqlite::Result<FeatureRecord> {
    let bounds: [Option<f64>; 6] = [
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
        row.get(8)?,
        row.get(9)?,
        row.get(10)?,
    ];
    let envelope = match bounds {
        [Some(x0), Some(y0), z0, Some(x1), Some(y1), z1] => Some(Envelope::new(
            Point3::new(x0, y0, z0.unwrap_or(0.0)),
            Point3::new(x1, y1, z1.unwrap_or(0.0)),
        )),
        _ => None,
    };
    Ok(FeatureRecord {
        id: row.get(0)?,
        gmlid: row.get(1)?,
        class_id: row.get(2)?,
        name: row.get(3)?,
        description: row.get(4)?,
        envelope,
    })
}

fn class_filter(class_ids: &[i32]) -> Result<String> {
    Ok(serde_json::to_string(class_ids)?)
}

struct RawGeometry {
    id: i64,
    feature_id: i64,
    root_id: i64,
    lod: u8,
    surface_type: Option<String>,
    geometry: String,
    implicit: Option<String>,
}

impl RawGeometry {
    fn parse(self) -> Result<GeometryRow> {
        let payload = GeometryPayload::from_json(&self.geometry)?;
        let implicit = match self.implicit.as_deref() {
            Some(text) => Some(ImplicitPlacement::from_json(text)?.to_transform()?),
            None => None,
        };
        Ok(GeometryRow {
            id: self.id,
            feature_id: self.feature_id,
            root_id: self.root_id,
            lod: self.lod,
            surface_type: SurfaceType::parse(self.surface_type.as_deref()),
            payload,
            implicit,
        })
    }
}

impl FeatureStore for SqliteStore {
    fn features_in_envelope(&self, bbox: &Envelope, class_ids: &[i32]) -> Result<Vec<FeatureRecord>> {
        self.query_features(
            &queries::features_in_envelope(),
            params![
                bbox.min.x,
                bbox.min.y,
                bbox.max.x,
                bbox.max.y,
                class_filter(class_ids)?
            ],
        )
    }

    fn feature_by_gmlid(&self, gmlid: &str) -> Result<Option<FeatureRecord>> {
        let mut stmt = self.conn.prepare_cached(&queries::feature_by_gmlid())?;
        Ok(stmt.query_row(params![gmlid], feature_from_row).optional()?)
    }

    fn feature(&self, id: i64) -> Result<Option<FeatureRecord>> {
        let mut stmt = self.conn.prepare_cached(&queries::feature_by_id())?;
        Ok(stmt.query_row(params![id], feature_from_row).optional()?)
    }

    fn extent(&self, class_ids: &[i32]) -> Result<Option<Envelope>> {
        let mut stmt = self.conn.prepare_cached(queries::EXTENT)?;
        let bounds: [Option<f64>; 6] = stmt.query_row(params![class_filter(class_ids)?], |row| {
            Ok([
                row.get(0)?,
                row.get(1)?,
                row.get(2)?,
                row.get(3)?,
                row.get(4)?,
                row.get(5)?,
            ])
        })?;
        Ok(match bounds {
            [Some(x0), Some(y0), z0, Some(x1), Some(y1), z1] => Some(Envelope::new(
                Point3::new(x0, y0, z0.unwrap_or(0.0)),
                Point3::new(x1, y1, z1.unwrap_or(0.0)),
            )),
            _ => None,
        })
    }

    fn group_members(&self, group_id: i64) -> Result<Vec<FeatureRecord>> {
        self.query_features(&queries::group_members(), params![group_id])
    }

    fn geometry_rows(&self, feature_id: i64, lod: u8, selection: GeometrySelection) -> Result<Vec<GeometryRow>> {
        let surface_type = match selection {
            GeometrySelection::Ground => Some(SurfaceType::Ground.as_str()),
            GeometrySelection::All => None,
        };
        let mut stmt = self.conn.prepare_cached(queries::GEOMETRY_AT_LOD)?;
        let raw = stmt
            .query_map(params![feature_id, lod, surface_type], |row| {
                Ok(RawGeometry {
                    id: row.get(0)?,
                    feature_id: row.get(1)?,
                    root_id: row.get(2)?,
                    lod: row.get(3)?,
                    surface_type: row.get(4)?,
                    geometry: row.get(5)?,
                    implicit: row.get(6)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut rows = Vec::with_capacity(raw.len());
        for geometry in raw {
            let id = geometry.id;
            match geometry.parse() {
                Ok(row) => rows.push(row),
                Err(err) => warn!(feature_id, geometry = id, error = %err, "Skipping malformed geometry row"),
            }
        }
        Ok(rows)
    }

    fn appearance_rows(&self, root_id: i64, theme: Option<&str>) -> Result<Vec<AppearanceRow>> {
        let mut stmt = self.conn.prepare_cached(queries::APPEARANCE_FOR_ROOT)?;
        let raw = stmt
            .query_map(params![root_id, theme], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, Option<String>>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, Option<String>>(3)?,
                    row.get::<_, Option<String>>(4)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut rows = Vec::with_capacity(raw.len());
        for (surface_id, theme, texture_uri, tex_coords, material) in raw {
            let tex_coords = match tex_coords.as_deref().map(serde_json::from_str) {
                Some(Ok(coords)) => Some(coords),
                Some(Err(err)) => {
                    warn!(surface = surface_id, error = %err, "Malformed texture coordinates");
                    None
                }
                None => None,
            };
            let material = match material.as_deref().map(serde_json::from_str) {
                Some(Ok(material)) => Some(material),
                Some(Err(err)) => {
                    warn!(surface = surface_id, error = %err, "Malformed material");
                    None
                }
                None => None,
            };
            rows.push(AppearanceRow {
                surface_id,
                theme,
                texture_uri,
                tex_coords,
                material,
            });
        }
        Ok(rows)
    }

    fn texture_blob(&self, uri: &str) -> Result<Option<Vec<u8>>> {
        let mut stmt = self.conn.prepare_cached(queries::TEXTURE_BLOB)?;
        Ok(stmt.query_row(params![uri], |row| row.get(0)).optional()?)
    }

    fn generic_attribute(&self, feature_id: i64, name: &str) -> Result<Option<String>> {
        let mut stmt = self.conn.prepare_cached(queries::GENERIC_ATTRIBUTE)?;
        let value: Option<Option<String>> = stmt
            .query_row(params![feature_id, name], |row| row.get(0))
            .optional()?;
        Ok(value.flatten())
    }

    fn set_generic_attribute(&self, feature_id: i64, name: &str, value: &str) -> Result<()> {
        self.conn
            .execute(queries::UPSERT_GENERIC_ATTRIBUTE, params![feature_id, name, value])?;
        Ok(())
    }

    fn generic_attributes(&self, feature_id: i64) -> Result<Vec<(String, String)>> {
        let mut stmt = self.conn.prepare_cached(queries::GENERIC_ATTRIBUTES)?;
        let rows = stmt.query_map(params![feature_id], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, Option<String>>(1)?))
        })?;
        let mut attributes = Vec::new();
        for row in rows {
            let (name, value) = row?;
            if let Some(value) = value {
                attributes.push((name, value));
            }
        }
        Ok(attributes)
    }
}

/// Opens a fresh connection to one database file per call
#[derive(Debug, Clone)]
pub struct SqliteConnector {
    path: PathBuf,
}

impl SqliteConnector {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl StoreConnector for SqliteConnector {
    fn connect(&self) -> Result<Box<dyn FeatureStore>> {
        Ok(Box::new(SqliteStore::open(&self.path)?))
    }
}
