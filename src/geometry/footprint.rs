// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! Planar footprint derived from the union of boundary surfaces
//!
//! Used when an object has no explicit ground surface: every polygon is
//! projected onto the XY plane and the projections are merged with i_overlay.

use i_overlay::core::fill_rule::FillRule;
use i_overlay::core::overlay_rule::OverlayRule;
use i_overlay::float::single::SingleFloatOverlay;
use nalgebra::Point3;

/// Polygon rings in 3D, exterior first
pub type PolygonRings = Vec<Vec<Point3<f64>>>;

/// Minimum projected area for a polygon to take part in the union
const MIN_AREA: f64 = 1e-9;

/// Signed area of a planar ring, positive when counter-clockwise.
pub fn signed_area(contour: &[[f64; 2]]) -> f64 {
    let n = contour.len();
    if n < 3 {
        return 0.0;
    }
    let mut area = 0.0;
    for i in 0..n {
        let j = (i + 1) % n;
        area += contour[i][0] * contour[j][1];
        area -= contour[j][0] * contour[i][1];
    }
    area / 2.0
}

fn oriented(mut contour: Vec<[f64; 2]>, ccw: bool) -> Vec<[f64; 2]> {
    if (signed_area(&contour) > 0.0) != ccw {
        contour.reverse();
    }
    contour
}

fn project(ring: &[Point3<f64>]) -> Vec<[f64; 2]> {
    let mut contour: Vec<[f64; 2]> = ring.iter().map(|p| [p.x, p.y]).collect();
    if contour.len() > 1 && contour.first() == contour.last() {
        contour.pop();
    }
    contour
}

/// Union of the XY projections of `polygons`, placed at the lowest input
/// height. Exteriors come out counter-clockwise seen from above, holes
/// clockwise.
pub fn union_footprint(polygons: &[PolygonRings]) -> Vec<PolygonRings> {
    let mut height = f64::INFINITY;
    let mut paths: Vec<Vec<Vec<[f64; 2]>>> = Vec::new();

    for rings in polygons {
        let Some(exterior) = rings.first() else {
            continue;
        };
        let outer = project(exterior);
        if signed_area(&outer).abs() < MIN_AREA {
            continue;
        }
        for ring in rings {
            for p in ring {
                height = height.min(p.z);
            }
        }
        let mut shape = vec![oriented(outer, true)];
        for hole in rings.iter().skip(1) {
            let contour = project(hole);
            if contour.len() >= 3 {
                shape.push(oriented(contour, false));
            }
        }
        paths.push(shape);
    }

    if paths.is_empty() {
        return Vec::new();
    }

    let subject: Vec<Vec<[f64; 2]>> = paths[0].clone();
    let clip: Vec<Vec<[f64; 2]>> = paths.iter().skip(1).flatten().cloned().collect();
    let shapes = subject.overlay(&clip, OverlayRule::Union, FillRule::NonZero);

    shapes
        .into_iter()
        .filter(|shape| !shape.is_empty())
        .map(|shape| {
            shape
                .into_iter()
                .enumerate()
                .map(|(i, contour)| {
                    oriented(contour, i == 0)
                        .into_iter()
                        .map(|[x, y]| Point3::new(x, y, height))
                        .collect()
                })
                .collect()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn rect(x0: f64, y0: f64, x1: f64, y1: f64, z: f64) -> PolygonRings {
        vec![vec![
            Point3::new(x0, y0, z),
            Point3::new(x1, y0, z),
            Point3::new(x1, y1, z),
            Point3::new(x0, y1, z),
        ]]
    }

    fn area(rings: &PolygonRings) -> f64 {
        rings
            .iter()
            .map(|ring| {
                let contour: Vec<[f64; 2]> = ring.iter().map(|p| [p.x, p.y]).collect();
                signed_area(&contour)
            })
            .sum()
    }

    #[test]
    fn test_overlapping_rectangles_merge() {
        let result = union_footprint(&[rect(0.0, 0.0, 2.0, 2.0, 5.0), rect(1.0, 0.0, 3.0, 2.0, 3.0)]);
        assert_eq!(result.len(), 1);
        assert_relative_eq!(area(&result[0]), 6.0, epsilon = 1e-9);
        assert!(result[0][0].iter().all(|p| p.z == 3.0));
    }

    #[test]
    fn test_vertical_walls_are_ignored() {
        let wall = vec![vec![
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(1.0, 0.0, 1.0),
            Point3::new(0.0, 0.0, 1.0),
        ]];
        assert!(union_footprint(&[wall]).is_empty());
    }

    #[test]
    fn test_disjoint_rectangles_stay_separate() {
        let result = union_footprint(&[rect(0.0, 0.0, 1.0, 1.0, 0.0), rect(5.0, 5.0, 6.0, 6.0, 0.0)]);
        assert_eq!(result.len(), 2);
    }
}
