// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! Polygon triangulation and winding repair
//!
//! Surfaces are projected onto their own plane (Newell normal) and handed to
//! earcutr as polygons with holes.

use crate::error::{ExportError, Result};
use nalgebra::{Point2, Point3, Vector3};

/// Newell normal of a ring, `None` for degenerate rings.
pub fn polygon_normal(points: &[Point3<f64>]) -> Option<Vector3<f64>> {
    if points.len() < 3 {
        return None;
    }

    let mut normal = Vector3::<f64>::zeros();
    for i in 0..points.len() {
        let current = &points[i];
        let next = &points[(i + 1) % points.len()];
        normal.x += (current.y - next.y) * (current.z + next.z);
        normal.y += (current.z - next.z) * (current.x + next.x);
        normal.z += (current.x - next.x) * (current.y + next.y);
    }

    let length = normal.norm();
    if length > 1e-12 {
        Some(normal / length)
    } else {
        None
    }
}

/// Project points onto the plane through `points[0]` with the given normal.
///
/// The basis `(u, v, normal)` is right-handed, so a ring that runs
/// counter-clockwise seen from the normal stays counter-clockwise in 2D.
pub fn project_to_plane(points: &[Point3<f64>], normal: &Vector3<f64>) -> Vec<Point2<f64>> {
    let Some(origin) = points.first() else {
        return Vec::new();
    };

    let reference = if normal.x.abs() <= normal.y.abs() && normal.x.abs() <= normal.z.abs() {
        Vector3::x()
    } else if normal.y.abs() <= normal.z.abs() {
        Vector3::y()
    } else {
        Vector3::z()
    };
    let u_axis = normal.cross(&reference).normalize();
    let v_axis = normal.cross(&u_axis).normalize();

    points
        .iter()
        .map(|p| {
            let d = p - origin;
            Point2::new(d.dot(&u_axis), d.dot(&v_axis))
        })
        .collect()
}

/// Triangulate concatenated rings (exterior first, holes starting at
/// `hole_offsets`). Returned indices address `points`.
pub fn triangulate_rings(points: &[Point3<f64>], hole_offsets: &[usize]) -> Result<Vec<usize>> {
    let exterior_len = hole_offsets.first().copied().unwrap_or(points.len());
    if exterior_len < 3 {
        return Err(ExportError::Triangulation(
            "Need at least 3 points in outer boundary".to_string(),
        ));
    }

    let normal = polygon_normal(&points[..exterior_len])
        .ok_or_else(|| ExportError::Triangulation("Degenerate outer boundary".to_string()))?;

    if exterior_len == 3 && hole_offsets.is_empty() {
        return Ok(vec![0, 1, 2]);
    }

    let projected = project_to_plane(points, &normal);
    let mut flat = Vec::with_capacity(projected.len() * 2);
    for p in &projected {
        flat.push(p.x);
        flat.push(p.y);
    }

    let indices = earcutr::earcut(&flat, hole_offsets, 2)
        .map_err(|e| ExportError::Triangulation(format!("{:?}", e)))?;
    if indices.is_empty() {
        return Err(ExportError::Triangulation(
            "Triangulation produced no triangles".to_string(),
        ));
    }
    Ok(indices)
}

/// Make triangle winding follow the exterior ring's direction.
///
/// Finds the first triangle edge joining two consecutive exterior-ring indices
/// (`|a - b| == 1`, both below `exterior_len`). When that edge runs in
/// decreasing order the whole index buffer is reversed, which flips every
/// triangle. Returns `true` when the buffer was reversed.
pub fn repair_winding(indices: &mut [usize], exterior_len: usize) -> bool {
    for triangle in indices.chunks_exact(3) {
        for k in 0..3 {
            let a = triangle[k];
            let b = triangle[(k + 1) % 3];
            if a < exterior_len && b < exterior_len && a.abs_diff(b) == 1 {
                if a > b {
                    indices.reverse();
                    return true;
                }
                return false;
            }
        }
    }
    false
}

/// Unit face normal of a triangle, `None` when degenerate.
pub fn triangle_normal(a: &Point3<f64>, b: &Point3<f64>, c: &Point3<f64>) -> Option<Vector3<f64>> {
    let n = (b - a).cross(&(c - a));
    let length = n.norm();
    if length > 1e-12 {
        Some(n / length)
    } else {
        None
    }
}

/// Area of a 3D triangle.
pub fn triangle_area(a: &Point3<f64>, b: &Point3<f64>, c: &Point3<f64>) -> f64 {
    (b - a).cross(&(c - a)).norm() / 2.0
}

/// Area of a planar 3D ring via its Newell vector.
pub fn ring_area(points: &[Point3<f64>]) -> f64 {
    let mut sum = Vector3::<f64>::zeros();
    for i in 0..points.len() {
        let current = points[i].coords;
        let next = points[(i + 1) % points.len()].coords;
        sum += current.cross(&next);
    }
    sum.norm() / 2.0
}
