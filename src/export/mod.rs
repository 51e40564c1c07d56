// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! Output formats and the writer stage
//!
//! KML documents with network links and regions, COLLADA meshes, glTF
//! conversion, balloons, KMZ archives and the JSON metadata index.

pub mod archive;
pub mod balloon;
pub mod collada;
pub mod gltf;
pub mod kml;
pub mod metadata;
mod writer;
pub mod xml;

pub use balloon::{Balloon, BalloonRenderer};
pub use collada::write_collada;
pub use gltf::{converter_from_config, ExternalConverter, GltfConverter, MeshConverter};
pub use metadata::FeatureEntry;
pub use writer::{ExportWriter, TILE_DIR};
