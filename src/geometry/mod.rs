// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! Geometry module - vertex consolidation, triangulation and mesh buffers

mod assembler;
mod bbox;
mod context;
mod dedup;
mod footprint;
mod surface;
mod transform;
pub mod triangulation;

pub use assembler::{
    AssemblerOptions, BatchKind, MeshAssembler, MeshBatch, MeshBundle, TriangleCorner,
};
pub use bbox::Envelope;
pub use context::{ExportContext, Vertex};
pub use dedup::{CoordinateTree, ToleranceMap, VertexId, DEFAULT_TOLERANCE};
pub use footprint::{signed_area, union_footprint, PolygonRings};
pub use surface::{Material, Surface, SurfaceAppearance, SurfaceId};
pub use transform::ImplicitTransform;
