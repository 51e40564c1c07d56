// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! Implicit geometry placement

use crate::error::{ExportError, Result};
use nalgebra::{Matrix4, Point3};

/// A prototype geometry placed by a 4x4 matrix and a reference point
#[derive(Debug, Clone, PartialEq)]
pub struct ImplicitTransform {
    pub matrix: Matrix4<f64>,
    pub reference_point: Point3<f64>,
}

impl ImplicitTransform {
    /// Build from 16 row-major matrix values.
    pub fn from_row_major(values: &[f64], reference_point: Point3<f64>) -> Result<Self> {
        if values.len() != 16 {
            return Err(ExportError::Transform(format!(
                "expected 16 matrix values, got {}",
                values.len()
            )));
        }
        if values.iter().any(|v| !v.is_finite()) {
            return Err(ExportError::Transform(
                "matrix contains non-finite values".to_string(),
            ));
        }

        let matrix = Matrix4::from_row_slice(values);
        let last_row = matrix.row(3);
        if last_row[0] != 0.0 || last_row[1] != 0.0 || last_row[2] != 0.0 || last_row[3] == 0.0 {
            return Err(ExportError::Transform(
                "matrix is not an affine transform".to_string(),
            ));
        }

        Ok(Self {
            matrix,
            reference_point,
        })
    }

    /// Map a prototype-local point to world coordinates.
    pub fn apply(&self, point: &Point3<f64>) -> Point3<f64> {
        self.matrix.transform_point(point) + self.reference_point.coords
    }

    /// Whether the matrix mirrors geometry, which flips ring orientation.
    pub fn is_mirroring(&self) -> bool {
        self.matrix.fixed_view::<3, 3>(0, 0).determinant() < 0.0
    }
}
