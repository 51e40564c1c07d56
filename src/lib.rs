// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! citykml
//!
//! Exports 3D city models from a relational store into tiled KML documents
//! with footprint, extruded, geometry and COLLADA model placemarks.
//! Surfaces are consolidated per object into deduplicated meshes with
//! texture atlases, projected to WGS84 and offset to the terrain.

pub mod config;
pub mod coords;
pub mod db;
pub mod error;
pub mod export;
pub mod geometry;
pub mod model;
pub mod pipeline;
pub mod reader;
pub mod texture;

pub use config::ExportConfig;
pub use db::{FeatureStore, SqliteConnector, SqliteStore, StoreConnector};
pub use error::{ExportError, Result};
pub use model::{DisplayForm, FeatureCategory, LodRequest};
pub use pipeline::{ExportSummary, Exporter, ProgressEvent};

use std::sync::Arc;

/// Run an export against the SQLite database named in the configuration.
pub fn export(config: ExportConfig) -> Result<ExportSummary> {
    let connector = Arc::new(SqliteConnector::new(config.database.path.clone()));
    Exporter::new(config, connector)?.run()
}
