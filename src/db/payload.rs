// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! Geometry payloads stored as JSON

use crate::error::Result;
use crate::geometry::ImplicitTransform;
use nalgebra::Point3;
use serde::{Deserialize, Serialize};

/// Geometry of one row, in the source CRS
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum GeometryPayload {
    /// Exterior ring followed by holes
    Polygon { rings: Vec<Vec<[f64; 3]>> },
    Point { coordinates: [f64; 3] },
    LineString { coordinates: Vec<[f64; 3]> },
}

impl GeometryPayload {
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn polygon(rings: Vec<Vec<[f64; 3]>>) -> Self {
        GeometryPayload::Polygon { rings }
    }

    pub fn is_polygon(&self) -> bool {
        matches!(self, GeometryPayload::Polygon { .. })
    }

    /// Polygon rings as points, `None` for points and curves.
    pub fn rings(&self) -> Option<Vec<Vec<Point3<f64>>>> {
        match self {
            GeometryPayload::Polygon { rings } => Some(
                rings
                    .iter()
                    .map(|ring| ring.iter().map(|c| Point3::from(*c)).collect())
                    .collect(),
            ),
            _ => None,
        }
    }

    /// Every coordinate of the payload.
    pub fn points(&self) -> Vec<Point3<f64>> {
        match self {
            GeometryPayload::Polygon { rings } => {
                rings.iter().flatten().map(|c| Point3::from(*c)).collect()
            }
            GeometryPayload::Point { coordinates } => vec![Point3::from(*coordinates)],
            GeometryPayload::LineString { coordinates } => {
                coordinates.iter().map(|c| Point3::from(*c)).collect()
            }
        }
    }

    /// Place prototype geometry in world coordinates. Mirroring transforms
    /// reverse every ring so polygons keep their facing.
    pub fn transformed(&self, transform: &ImplicitTransform) -> Self {
        let map = |c: &[f64; 3]| -> [f64; 3] {
            let p = transform.apply(&Point3::from(*c));
            [p.x, p.y, p.z]
        };
        match self {
            GeometryPayload::Polygon { rings } => {
                let mirror = transform.is_mirroring();
                let rings = rings
                    .iter()
                    .map(|ring| {
                        let mut mapped: Vec<[f64; 3]> = ring.iter().map(map).collect();
                        if mirror {
                            mapped.reverse();
                        }
                        mapped
                    })
                    .collect();
                GeometryPayload::Polygon { rings }
            }
            GeometryPayload::Point { coordinates } => GeometryPayload::Point {
                coordinates: map(coordinates),
            },
            GeometryPayload::LineString { coordinates } => GeometryPayload::LineString {
                coordinates: coordinates.iter().map(map).collect(),
            },
        }
    }
}

/// Placement of an implicit geometry row as stored in the database
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImplicitPlacement {
    pub reference_point: [f64; 3],
    /// Row-major 4x4 matrix
    pub transform: Vec<f64>,
}

impl ImplicitPlacement {
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn to_transform(&self) -> Result<ImplicitTransform> {
        ImplicitTransform::from_row_major(&self.transform, Point3::from(self.reference_point))
    }

    pub fn from_transform(transform: &ImplicitTransform) -> Self {
        let p = transform.reference_point;
        Self {
            reference_point: [p.x, p.y, p.z],
            // nalgebra stores column-major
            transform: transform.matrix.transpose().as_slice().to_vec(),
        }
    }
}
