// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! Vertex consolidation and triangulation properties

use anyhow::Result;
use approx::assert_relative_eq;
use citykml::geometry::triangulation::{repair_winding, ring_area, triangle_area, triangulate_rings};
use citykml::geometry::{
    AssemblerOptions, BatchKind, ExportContext, Material, MeshAssembler, SurfaceAppearance,
    DEFAULT_TOLERANCE,
};
use nalgebra::{Point3, Vector3};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;

/// Offset within the tolerance, reaching up to its boundary.
fn inside(rng: &mut StdRng) -> f64 {
    rng.gen_range(-0.98..0.98) * DEFAULT_TOLERANCE
}

/// Offset past the tolerance, never more than twice it.
fn outside(rng: &mut StdRng) -> f64 {
    let sign = if rng.gen_bool(0.5) { 1.0 } else { -1.0 };
    sign * rng.gen_range(1.05..2.0) * DEFAULT_TOLERANCE
}

fn node_point(node: (i32, i32, i32)) -> Point3<f64> {
    Point3::new(
        1000.0 + node.0 as f64,
        5000.0 + node.1 as f64,
        30.0 + node.2 as f64,
    )
}

#[test]
fn test_dedup_merges_exactly_the_points_within_tolerance() {
    let mut rng = StdRng::seed_from_u64(7);
    let mut ctx = ExportContext::new("dedup", 1);
    let mut ids_by_node: HashMap<(i32, i32, i32), u32> = HashMap::new();

    // Distinct grid nodes are a metre apart.
    for i in 0..6 {
        for j in 0..6 {
            for k in 0..6 {
                let id = ctx.add_vertex(node_point((i, j, k)));
                ids_by_node.insert((i, j, k), id);
            }
        }
    }

    // Every axis stays within tolerance of the node, so nothing new is stored.
    for _ in 0..2000 {
        let node = (rng.gen_range(0..6), rng.gen_range(0..6), rng.gen_range(0..6));
        let point = node_point(node)
            + Vector3::new(inside(&mut rng), inside(&mut rng), inside(&mut rng));
        let id = ctx.add_vertex(point);
        assert_eq!(id, ids_by_node[&node], "node {:?} got a second vertex id", node);
    }
    assert_eq!(ctx.vertices().len(), ids_by_node.len());

    // One axis past the tolerance always yields a vertex of its own, and the
    // same point asked again gets the same id back.
    for _ in 0..500 {
        let node = (rng.gen_range(0..6), rng.gen_range(0..6), rng.gen_range(0..6));
        let mut offset = Vector3::new(inside(&mut rng), inside(&mut rng), inside(&mut rng));
        offset[rng.gen_range(0..3)] = outside(&mut rng);
        let point = node_point(node) + offset;
        let id = ctx.add_vertex(point);
        assert_ne!(id, ids_by_node[&node], "{:?} merged into node {:?}", offset, node);
        assert_eq!(ctx.add_vertex(point), id);
    }

    let distinct: std::collections::HashSet<u32> = ids_by_node.values().copied().collect();
    assert_eq!(distinct.len(), ids_by_node.len());
    println!("{} vertices after 2500 insertions", ctx.vertices().len());
}

#[test]
fn test_points_around_a_shared_node_keep_their_ids() {
    let tol = DEFAULT_TOLERANCE;
    let mut ctx = ExportContext::new("dedup", 1);
    // Creates the Z and Y nodes the points below fall into.
    let anchor = ctx.add_vertex(Point3::new(1001.0, 5000.0, 30.0));

    // Same X, pairwise 1.8 tolerances apart in Y or Z.
    let corners: Vec<Point3<f64>> = [(0.9, 0.9), (0.9, -0.9), (-0.9, 0.9), (-0.9, -0.9)]
        .iter()
        .map(|&(dy, dz)| Point3::new(1000.0, 5000.0 + dy * tol, 30.0 + dz * tol))
        .collect();
    let ids: Vec<u32> = corners.iter().map(|&p| ctx.add_vertex(p)).collect();
    assert_eq!(ids, vec![1, 2, 3, 4]);

    for (point, id) in corners.iter().zip(&ids) {
        assert_eq!(ctx.add_vertex(*point), *id, "{:?} changed id", point);
    }
    assert_eq!(ctx.add_vertex(Point3::new(1001.0, 5000.0, 30.0)), anchor);
    assert_eq!(ctx.vertices().len(), 5);
    for (vertex, point) in ctx.vertices()[1..].iter().zip(&corners) {
        assert_eq!(vertex.position, *point);
    }
}

#[test]
fn test_points_just_outside_tolerance_stay_apart() {
    let mut ctx = ExportContext::new("dedup", 1);
    let a = ctx.add_vertex(Point3::new(10.0, 10.0, 10.0));
    let b = ctx.add_vertex(Point3::new(10.0, 10.0, 10.0 + 3.0 * DEFAULT_TOLERANCE));
    let c = ctx.add_vertex(Point3::new(10.0 + 3.0 * DEFAULT_TOLERANCE, 10.0, 10.0));
    let d = ctx.add_vertex(Point3::new(10.0, 10.0 + 0.5 * DEFAULT_TOLERANCE, 10.0));
    assert_ne!(a, b);
    assert_ne!(a, c);
    assert_ne!(b, c);
    assert_eq!(a, d);
}

#[test]
fn test_position_buffer_follows_first_insertion() -> Result<()> {
    let mut rng = StdRng::seed_from_u64(11);
    let mut ctx = ExportContext::new("order", 1);
    let mut first_seen: Vec<Point3<f64>> = Vec::new();

    for surface in 0..40 {
        let base = Point3::new(
            rng.gen_range(0..5) as f64,
            rng.gen_range(0..5) as f64,
            rng.gen_range(0..3) as f64,
        );
        let ring = vec![
            base,
            base + nalgebra::Vector3::new(1.0, 0.0, 0.0),
            base + nalgebra::Vector3::new(1.0, 1.0, 0.0),
            base + nalgebra::Vector3::new(0.0, 1.0, 0.0),
        ];
        for point in &ring {
            if !first_seen.iter().any(|p| (p - point).norm() < 1e-9) {
                first_seen.push(*point);
            }
        }
        ctx.add_surface(surface, &[ring], None, SurfaceAppearance::None)?;
    }

    let positions: Vec<Point3<f64>> = ctx.vertices().iter().map(|v| v.position).collect();
    assert_eq!(positions, first_seen);

    let mesh = MeshAssembler::new(AssemblerOptions::default()).assemble(&ctx);
    let origin = mesh.origin;
    assert_eq!(mesh.positions.len(), first_seen.len());
    for (emitted, expected) in mesh.positions.iter().zip(&first_seen) {
        assert_relative_eq!(emitted[0] + origin.x, expected.x, epsilon = 1e-9);
        assert_relative_eq!(emitted[1] + origin.y, expected.y, epsilon = 1e-9);
        assert_relative_eq!(emitted[2] + origin.z, expected.z, epsilon = 1e-9);
    }
    Ok(())
}

/// Star-shaped ring on a tilted plane, counter-clockwise in XY.
fn star_ring(rng: &mut StdRng, points: usize, min_radius: f64) -> Vec<Point3<f64>> {
    (0..points)
        .map(|i| {
            let angle = i as f64 / points as f64 * std::f64::consts::TAU;
            let radius = rng.gen_range(min_radius..min_radius * 2.0);
            let x = radius * angle.cos();
            let y = radius * angle.sin();
            Point3::new(x, y, 0.3 * x - 0.2 * y + 12.0)
        })
        .collect()
}

fn square_hole(half: f64, center: (f64, f64)) -> Vec<Point3<f64>> {
    [(-half, -half), (-half, half), (half, half), (half, -half)]
        .iter()
        .map(|(dx, dy)| {
            let x = center.0 + dx;
            let y = center.1 + dy;
            Point3::new(x, y, 0.3 * x - 0.2 * y + 12.0)
        })
        .collect()
}

#[test]
fn test_triangulation_covers_polygon_area() -> Result<()> {
    let mut rng = StdRng::seed_from_u64(3);
    for case in 0..50 {
        let n = rng.gen_range(3..24);
        let exterior = star_ring(&mut rng, n, 10.0);
        let mut points = exterior.clone();
        let mut hole_offsets = Vec::new();
        let mut expected = ring_area(&exterior);

        if case % 2 == 1 {
            let hole = square_hole(2.0, (0.0, 0.0));
            hole_offsets.push(points.len());
            expected -= ring_area(&hole);
            points.extend(hole);
        }

        let indices = triangulate_rings(&points, &hole_offsets)?;
        assert_eq!(indices.len() % 3, 0);
        assert!(indices.iter().all(|&i| i < points.len()), "case {case}: index out of range");

        let covered: f64 = indices
            .chunks_exact(3)
            .map(|t| triangle_area(&points[t[0]], &points[t[1]], &points[t[2]]))
            .sum();
        assert_relative_eq!(covered, expected, max_relative = 1e-9);
    }
    Ok(())
}

#[test]
fn test_repaired_winding_follows_exterior_ring() -> Result<()> {
    let mut rng = StdRng::seed_from_u64(5);
    for case in 0..50 {
        let n = rng.gen_range(4..20);
        let mut exterior = star_ring(&mut rng, n, 10.0);
        if case % 2 == 0 {
            exterior.reverse();
        }
        let exterior_len = exterior.len();
        let mut points = exterior;
        let mut hole_offsets = Vec::new();
        if case % 3 == 0 {
            hole_offsets.push(points.len());
            points.extend(square_hole(1.5, (0.5, -0.5)));
        }

        let mut indices = triangulate_rings(&points, &hole_offsets)?;
        repair_winding(&mut indices, exterior_len);

        let mut boundary_edges = 0;
        for triangle in indices.chunks_exact(3) {
            for k in 0..3 {
                let a = triangle[k];
                let b = triangle[(k + 1) % 3];
                if a < exterior_len && b < exterior_len && a.abs_diff(b) == 1 {
                    boundary_edges += 1;
                    assert!(a < b, "case {case}: reversed boundary edge {a} -> {b}");
                }
            }
        }
        assert!(boundary_edges > 0);
    }
    Ok(())
}

fn square(x0: f64, x1: f64) -> Vec<Point3<f64>> {
    vec![
        Point3::new(x0, 0.0, 0.0),
        Point3::new(x1, 0.0, 0.0),
        Point3::new(x1, 1.0, 0.0),
        Point3::new(x0, 1.0, 0.0),
    ]
}

#[test]
fn test_squares_sharing_an_edge_share_vertices() -> Result<()> {
    let mut ctx = ExportContext::new("pair", 1);
    let red = Material {
        diffuse: [1.0, 0.0, 0.0],
        ..Material::default()
    };
    let blue = Material {
        diffuse: [0.0, 0.0, 1.0],
        ..Material::default()
    };

    let mut right = square(1.0, 2.0);
    // Shared edge repeated within 1e-8 of the left square's corners.
    right[0].x += 1e-8;
    right[3].y -= 1e-8;
    ctx.add_surface(1, &[square(0.0, 1.0)], None, SurfaceAppearance::Material(red))?;
    ctx.add_surface(2, &[right], None, SurfaceAppearance::Material(blue))?;
    assert_eq!(ctx.vertices().len(), 6);

    let mesh = MeshAssembler::new(AssemblerOptions::default()).assemble(&ctx);
    assert_eq!(mesh.positions.len(), 6);
    assert_eq!(mesh.batches.len(), 2);

    let shared = [
        ctx.add_vertex(Point3::new(1.0, 0.0, 0.0)),
        ctx.add_vertex(Point3::new(1.0, 1.0, 0.0)),
    ];
    for batch in &mesh.batches {
        assert_eq!(batch.triangle_count(), 2);
        for id in shared {
            assert!(
                batch.corners.iter().any(|c| c.position == id),
                "batch {} misses shared vertex {}",
                batch.name,
                id
            );
        }
    }
    Ok(())
}

#[test]
fn test_untextured_surface_gets_default_material() -> Result<()> {
    let build = || -> Result<String> {
        let mut ctx = ExportContext::new("plain", 1);
        ctx.add_surface(1, &[square(0.0, 1.0)], None, SurfaceAppearance::None)?;
        let mesh = MeshAssembler::new(AssemblerOptions::default()).assemble(&ctx);
        assert_eq!(mesh.batches.len(), 1);
        let batch = &mesh.batches[0];
        assert_eq!(batch.kind, BatchKind::Material(Material::default()));
        Ok(batch.name.clone())
    };

    let first = build()?;
    assert_eq!(first, build()?);
    assert_eq!(first, Material::default().batch_name());
    Ok(())
}
