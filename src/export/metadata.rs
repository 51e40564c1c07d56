// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! JSON index of exported features for web map clients

use crate::error::Result;
use crate::model::DisplayForm;
use crate::pipeline::{ExportBundle, TileKey};
use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use std::path::Path;

/// One exported (feature, form) pair
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeatureEntry {
    pub gmlid: String,
    pub id: i64,
    pub category: String,
    pub form: DisplayForm,
    pub lod: u8,
    pub tile: TileKey,
    /// `[west, south, east, north]` in degrees
    #[serde(skip_serializing_if = "Option::is_none")]
    pub envelope: Option<[f64; 4]>,
    /// Document holding the placemark, relative to the output directory
    pub document: String,
}

impl FeatureEntry {
    pub fn from_bundle(bundle: &ExportBundle, document: String) -> Self {
        Self {
            gmlid: bundle.item.gmlid().to_string(),
            id: bundle.item.id(),
            category: bundle.item.category.as_str().to_string(),
            form: bundle.item.form,
            lod: bundle.lod,
            tile: bundle.item.tile,
            envelope: bundle
                .item
                .wgs84_envelope
                .map(|e| [e.min.x, e.min.y, e.max.x, e.max.y]),
            document,
        }
    }
}

#[derive(Serialize)]
struct MetadataIndex<'a> {
    name: &'a str,
    generator: &'static str,
    created: String,
    rows: u32,
    columns: u32,
    features: &'a [FeatureEntry],
}

/// Write the index sorted by gml id and form.
pub fn write_metadata(path: &Path, name: &str, rows: u32, columns: u32, features: &mut [FeatureEntry]) -> Result<()> {
    features.sort_by(|a, b| (&a.gmlid, a.form.as_str()).cmp(&(&b.gmlid, b.form.as_str())));
    let index = MetadataIndex {
        name,
        generator: concat!("citykml ", env!("CARGO_PKG_VERSION")),
        created: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        rows,
        columns,
        features,
    };
    std::fs::write(path, serde_json::to_string_pretty(&index)?)?;
    Ok(())
}
