// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! Error types for the export pipeline

use thiserror::Error;

/// Result type for export operations
pub type Result<T> = std::result::Result<T, ExportError>;

/// Errors that can occur while exporting city objects.
///
/// Only `Store` errors raised by the work splitter abort an export. Every
/// other variant is scoped to one surface, object or artifact.
#[derive(Error, Debug)]
pub enum ExportError {
    #[error("Database error: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("Invalid geometry: {0}")]
    Geometry(String),

    #[error("Triangulation failed: {0}")]
    Triangulation(String),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Invalid transform: {0}")]
    Transform(String),

    #[error("Elevation service error: {0}")]
    Elevation(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("Archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Export cancelled")]
    Cancelled,
}

impl From<reqwest::Error> for ExportError {
    fn from(err: reqwest::Error) -> Self {
        ExportError::Elevation(err.to_string())
    }
}
