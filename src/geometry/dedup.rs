// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! Tolerance-keyed coordinate deduplication
//!
//! A [`ToleranceMap`] is an ordered map over `f64` keys where keys closer than
//! an absolute tolerance are treated as the same key. Three of them nested
//! (Z, then Y, then X) form the [`CoordinateTree`] that maps near-identical
//! points onto one vertex id.

use nalgebra::Point3;
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// Default absolute tolerance for coordinate identity
pub const DEFAULT_TOLERANCE: f64 = 1e-7;

/// Stable vertex identifier, equal to the vertex's insertion index
pub type VertexId = u32;

#[derive(Debug, Clone, Copy)]
struct OrderedKey(f64);

impl PartialEq for OrderedKey {
    fn eq(&self, other: &Self) -> bool {
        self.0.total_cmp(&other.0) == Ordering::Equal
    }
}

impl Eq for OrderedKey {}

impl PartialOrd for OrderedKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for OrderedKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

/// Ordered map whose keys match when within an absolute tolerance
#[derive(Debug, Clone)]
pub struct ToleranceMap<V> {
    tolerance: f64,
    entries: BTreeMap<OrderedKey, V>,
}

impl<V> ToleranceMap<V> {
    pub fn new(tolerance: f64) -> Self {
        Self {
            tolerance: tolerance.abs(),
            entries: BTreeMap::new(),
        }
    }

    pub fn tolerance(&self) -> f64 {
        self.tolerance
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries whose key lies within `radius` of `key`, in key order.
    pub fn within(&self, key: f64, radius: f64) -> impl Iterator<Item = (f64, &V)> {
        self.entries
            .range(OrderedKey(key - radius)..=OrderedKey(key + radius))
            .map(|(k, v)| (k.0, v))
    }

    /// Key of the closest entry within tolerance.
    fn nearest_key(&self, key: f64) -> Option<OrderedKey> {
        self.within(key, self.tolerance)
            .min_by(|a, b| (a.0 - key).abs().total_cmp(&(b.0 - key).abs()))
            .map(|(k, _)| OrderedKey(k))
    }

    /// Value of the closest entry within tolerance.
    pub fn get(&self, key: f64) -> Option<&V> {
        let nearest = self.nearest_key(key)?;
        self.entries.get(&nearest)
    }

    /// Closest entry within tolerance, or a new entry stored under `key`.
    pub fn get_or_insert_with(&mut self, key: f64, default: impl FnOnce() -> V) -> &mut V {
        let slot = self.nearest_key(key).unwrap_or(OrderedKey(key));
        self.entries.entry(slot).or_insert_with(default)
    }

    /// Entry stored under exactly `key`, created with `default` when missing.
    pub fn exact_or_insert_with(&mut self, key: f64, default: impl FnOnce() -> V) -> &mut V {
        self.entries.entry(OrderedKey(key)).or_insert_with(default)
    }

    /// Insert under the exact key, replacing any value stored under it.
    pub fn insert(&mut self, key: f64, value: V) -> Option<V> {
        self.entries.insert(OrderedKey(key), value)
    }

    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.entries.values()
    }
}

#[derive(Debug, Clone, Copy)]
struct Leaf {
    y: f64,
    z: f64,
    id: VertexId,
}

/// Three-level Z → Y → X tolerance tree mapping points to vertex ids
///
/// Upper levels are searched with twice the tolerance because a node's key is
/// the first coordinate that created it; the leaf check then compares the
/// stored point component-wise against the tolerance. Points sharing an exact
/// X inside one Y node are kept side by side in the leaf list.
#[derive(Debug, Clone)]
pub struct CoordinateTree {
    tolerance: f64,
    root: ToleranceMap<ToleranceMap<ToleranceMap<Vec<Leaf>>>>,
    len: usize,
}

impl CoordinateTree {
    pub fn new(tolerance: f64) -> Self {
        Self {
            tolerance: tolerance.abs(),
            root: ToleranceMap::new(tolerance),
            len: 0,
        }
    }

    pub fn tolerance(&self) -> f64 {
        self.tolerance
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Vertex id of a stored point matching `point` within tolerance.
    pub fn find(&self, point: &Point3<f64>) -> Option<VertexId> {
        let tol = self.tolerance;
        for (_, ys) in self.root.within(point.z, 2.0 * tol) {
            for (_, xs) in ys.within(point.y, 2.0 * tol) {
                let hit = xs
                    .within(point.x, tol)
                    .flat_map(|(_, leaves)| leaves.iter())
                    .find(|leaf| {
                        (leaf.y - point.y).abs() <= tol && (leaf.z - point.z).abs() <= tol
                    });
                if let Some(leaf) = hit {
                    return Some(leaf.id);
                }
            }
        }
        None
    }

    /// Return the id of a matching point, or store `point` under `next_id`.
    ///
    /// The boolean is `true` when a new entry was created.
    pub fn get_or_insert(&mut self, point: &Point3<f64>, next_id: VertexId) -> (VertexId, bool) {
        if let Some(id) = self.find(point) {
            return (id, false);
        }

        let tol = self.tolerance;
        let ys = self
            .root
            .get_or_insert_with(point.z, || ToleranceMap::new(tol));
        let xs = ys.get_or_insert_with(point.y, || ToleranceMap::new(tol));
        xs.exact_or_insert_with(point.x, Vec::new).push(Leaf {
            y: point.y,
            z: point.z,
            id: next_id,
        });
        self.len += 1;
        (next_id, true)
    }
}

impl Default for CoordinateTree {
    fn default() -> Self {
        Self::new(DEFAULT_TOLERANCE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tolerance_map_matches_close_keys() {
        let mut map = ToleranceMap::new(0.01);
        map.insert(1.0, "a");
        map.insert(2.0, "b");

        assert_eq!(map.get(1.005), Some(&"a"));
        assert_eq!(map.get(1.02), None);
        assert_eq!(map.get(1.995), Some(&"b"));
    }

    #[test]
    fn test_tolerance_map_get_or_insert_reuses_nearest() {
        let mut map: ToleranceMap<u32> = ToleranceMap::new(0.1);
        *map.get_or_insert_with(5.0, || 0) += 1;
        *map.get_or_insert_with(5.05, || 0) += 1;
        *map.get_or_insert_with(6.0, || 0) += 1;

        assert_eq!(map.len(), 2);
        assert_eq!(map.get(5.0), Some(&2));
    }

    #[test]
    fn test_coordinate_tree_dedups_within_tolerance() {
        let mut tree = CoordinateTree::new(1e-7);
        let (a, created_a) = tree.get_or_insert(&Point3::new(1.0, 2.0, 3.0), 0);
        let (b, created_b) = tree.get_or_insert(&Point3::new(1.0 + 5e-8, 2.0 - 5e-8, 3.0), 1);
        let (c, created_c) = tree.get_or_insert(&Point3::new(1.0, 2.0, 3.0 + 1e-6), 1);

        assert!(created_a);
        assert!(!created_b);
        assert_eq!(a, b);
        assert!(created_c);
        assert_ne!(a, c);
        assert_eq!(tree.len(), 2);
    }

    #[test]
    fn test_coordinate_tree_finds_point_stored_off_node_key() {
        // The second point lands in the z-node created by the first one, the
        // third is within tolerance of the second but not of the node key.
        let tol = 1e-3;
        let mut tree = CoordinateTree::new(tol);
        tree.get_or_insert(&Point3::new(0.0, 0.0, 0.0), 0);
        tree.get_or_insert(&Point3::new(5.0, 0.0, 0.0009), 1);
        let (id, created) = tree.get_or_insert(&Point3::new(5.0, 0.0, 0.0017), 2);

        assert_eq!(id, 1);
        assert!(!created);
    }

    #[test]
    fn test_coordinate_tree_keeps_points_with_equal_x() {
        // B and C share x and the y node but are 1.8 tolerances apart.
        let tol = 1e-7;
        let mut tree = CoordinateTree::new(tol);
        let a = Point3::new(1.0, 0.0, 0.0);
        let b = Point3::new(0.0, 0.9 * tol, 0.0);
        let c = Point3::new(0.0, -0.9 * tol, 0.0);

        assert_eq!(tree.get_or_insert(&a, 0), (0, true));
        assert_eq!(tree.get_or_insert(&b, 1), (1, true));
        assert_eq!(tree.get_or_insert(&c, 2), (2, true));
        assert_eq!(tree.get_or_insert(&b, 3), (1, false));
        assert_eq!(tree.get_or_insert(&c, 3), (2, false));
        assert_eq!(tree.find(&a), Some(0));
        assert_eq!(tree.len(), 3);
    }
}
