// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! Envelope utilities

use nalgebra::{Point3, Vector3};
use serde::{Deserialize, Serialize};

/// Axis-aligned envelope in double precision
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub min: Point3<f64>,
    pub max: Point3<f64>,
}

impl Envelope {
    pub fn new(min: Point3<f64>, max: Point3<f64>) -> Self {
        Self { min, max }
    }

    pub fn empty() -> Self {
        Self {
            min: Point3::new(f64::INFINITY, f64::INFINITY, f64::INFINITY),
            max: Point3::new(f64::NEG_INFINITY, f64::NEG_INFINITY, f64::NEG_INFINITY),
        }
    }

    pub fn from_points<'a>(points: impl IntoIterator<Item = &'a Point3<f64>>) -> Self {
        let mut envelope = Self::empty();
        for point in points {
            envelope.expand_to_include(point);
        }
        envelope
    }

    pub fn is_empty(&self) -> bool {
        self.min.x > self.max.x || self.min.y > self.max.y || self.min.z > self.max.z
    }

    pub fn expand_to_include(&mut self, point: &Point3<f64>) {
        self.min.x = self.min.x.min(point.x);
        self.min.y = self.min.y.min(point.y);
        self.min.z = self.min.z.min(point.z);

        self.max.x = self.max.x.max(point.x);
        self.max.y = self.max.y.max(point.y);
        self.max.z = self.max.z.max(point.z);
    }

    pub fn merge(&mut self, other: &Envelope) {
        if other.is_empty() {
            return;
        }
        self.expand_to_include(&other.min);
        self.expand_to_include(&other.max);
    }

    pub fn center(&self) -> Point3<f64> {
        Point3::new(
            (self.min.x + self.max.x) / 2.0,
            (self.min.y + self.max.y) / 2.0,
            (self.min.z + self.max.z) / 2.0,
        )
    }

    pub fn size(&self) -> Vector3<f64> {
        Vector3::new(
            self.max.x - self.min.x,
            self.max.y - self.min.y,
            self.max.z - self.min.z,
        )
    }

    /// Planar overlap test, borders included.
    pub fn intersects_xy(&self, other: &Envelope) -> bool {
        self.min.x <= other.max.x
            && other.min.x <= self.max.x
            && self.min.y <= other.max.y
            && other.min.y <= self.max.y
    }

    /// Half-open planar containment: `[min, max)` on each axis, with the upper
    /// border included where `close_x` / `close_y` is set.
    pub fn contains_xy_half_open(&self, x: f64, y: f64, close_x: bool, close_y: bool) -> bool {
        let in_x = x >= self.min.x && (x < self.max.x || (close_x && x <= self.max.x));
        let in_y = y >= self.min.y && (y < self.max.y || (close_y && y <= self.max.y));
        in_x && in_y
    }

    /// The four planar corners at the given height, counter-clockwise.
    pub fn corners_xy(&self, z: f64) -> [Point3<f64>; 4] {
        [
            Point3::new(self.min.x, self.min.y, z),
            Point3::new(self.max.x, self.min.y, z),
            Point3::new(self.max.x, self.max.y, z),
            Point3::new(self.min.x, self.max.y, z),
        ]
    }
}

impl Default for Envelope {
    fn default() -> Self {
        Self::empty()
    }
}
