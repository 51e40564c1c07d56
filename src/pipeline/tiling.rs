// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! Spatial tiling of the export extent

use crate::config::{TilingConfig, TilingMode};
use crate::error::{ExportError, Result};
use crate::geometry::Envelope;
use nalgebra::Point3;
use serde::Serialize;
use std::fmt;

/// Row and column of a tile, rows counted from the south edge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize)]
pub struct TileKey {
    pub row: u32,
    pub column: u32,
}

impl TileKey {
    pub fn new(row: u32, column: u32) -> Self {
        Self { row, column }
    }
}

impl fmt::Display for TileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.row, self.column)
    }
}

/// One cell of the tiling grid
#[derive(Debug, Clone, PartialEq)]
pub struct Tile {
    pub key: TileKey,
    /// Cell bounds in the source CRS; `None` accepts every feature
    pub bounds: Option<Envelope>,
    last_row: bool,
    last_column: bool,
}

impl Tile {
    /// Tile without a spatial filter
    pub fn unbounded() -> Self {
        Self {
            key: TileKey::default(),
            bounds: None,
            last_row: true,
            last_column: true,
        }
    }

    /// Whether a feature whose envelope centre is `(x, y)` belongs here.
    ///
    /// Cells are half-open; the upper border only counts on the last row or
    /// column, so every point of the extent lands in exactly one tile.
    pub fn accepts(&self, x: f64, y: f64) -> bool {
        match &self.bounds {
            Some(bounds) => bounds.contains_xy_half_open(x, y, self.last_column, self.last_row),
            None => true,
        }
    }

    pub fn accepts_envelope(&self, envelope: Option<&Envelope>) -> bool {
        match (envelope, &self.bounds) {
            (_, None) => true,
            (Some(envelope), Some(_)) => {
                let centre = envelope.center();
                self.accepts(centre.x, centre.y)
            }
            (None, Some(_)) => false,
        }
    }
}

/// Row-major list of tiles
#[derive(Debug, Clone, PartialEq)]
pub struct TilingPlan {
    pub rows: u32,
    pub columns: u32,
    pub extent: Option<Envelope>,
    tiles: Vec<Tile>,
}

impl TilingPlan {
    /// A single tile without a spatial filter.
    pub fn unbounded() -> Self {
        Self {
            rows: 1,
            columns: 1,
            extent: None,
            tiles: vec![Tile::unbounded()],
        }
    }

    /// Split `extent` into a regular grid.
    pub fn grid(extent: Envelope, rows: u32, columns: u32) -> Result<Self> {
        if rows == 0 || columns == 0 {
            return Err(ExportError::Config("tiling needs at least one row and column".to_string()));
        }
        let size = extent.size();
        if !(size.x >= 0.0 && size.y >= 0.0) {
            return Err(ExportError::Config("tiling extent is empty".to_string()));
        }
        let width = size.x / columns as f64;
        let height = size.y / rows as f64;

        let mut tiles = Vec::with_capacity((rows * columns) as usize);
        for row in 0..rows {
            for column in 0..columns {
                let min_x = extent.min.x + column as f64 * width;
                let min_y = extent.min.y + row as f64 * height;
                // snap the outer border to the extent to avoid rounding gaps
                let max_x = if column + 1 == columns {
                    extent.max.x
                } else {
                    min_x + width
                };
                let max_y = if row + 1 == rows {
                    extent.max.y
                } else {
                    min_y + height
                };
                tiles.push(Tile {
                    key: TileKey::new(row, column),
                    bounds: Some(Envelope::new(
                        Point3::new(min_x, min_y, extent.min.z),
                        Point3::new(max_x, max_y, extent.max.z),
                    )),
                    last_row: row + 1 == rows,
                    last_column: column + 1 == columns,
                });
            }
        }

        Ok(Self {
            rows,
            columns,
            extent: Some(extent),
            tiles,
        })
    }

    /// Plan from configuration. `extent` is the spatial filter, or `None`
    /// for id-list exports without one.
    pub fn from_config(config: &TilingConfig, extent: Option<Envelope>) -> Result<Self> {
        let Some(extent) = extent else {
            return Ok(Self::unbounded());
        };
        match config.mode {
            TilingMode::None => Self::grid(extent, 1, 1),
            TilingMode::Manual => Self::grid(extent, config.rows, config.columns),
            TilingMode::Automatic => {
                let size = extent.size();
                let columns = (size.x / config.tile_size).ceil().max(1.0) as u32;
                let rows = (size.y / config.tile_size).ceil().max(1.0) as u32;
                Self::grid(extent, rows, columns)
            }
        }
    }

    pub fn tiles(&self) -> &[Tile] {
        &self.tiles
    }

    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }

    /// Whether output is split into one document per tile.
    pub fn is_tiled(&self) -> bool {
        self.tiles.len() > 1
    }

    /// Tile accepting a feature envelope.
    pub fn tile_for(&self, envelope: Option<&Envelope>) -> Option<&Tile> {
        self.tiles.iter().find(|tile| tile.accepts_envelope(envelope))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extent() -> Envelope {
        Envelope::new(Point3::new(0.0, 0.0, 0.0), Point3::new(100.0, 50.0, 10.0))
    }

    #[test]
    fn test_grid_layout_is_row_major() {
        let plan = TilingPlan::grid(extent(), 2, 4).unwrap();
        assert_eq!(plan.len(), 8);
        assert_eq!(plan.tiles()[1].key, TileKey::new(0, 1));
        assert_eq!(plan.tiles()[4].key, TileKey::new(1, 0));
        let last = plan.tiles()[7].bounds.unwrap();
        assert_eq!(last.max.x, 100.0);
        assert_eq!(last.min.y, 25.0);
    }

    #[test]
    fn test_every_point_lands_in_one_tile() {
        let plan = TilingPlan::grid(extent(), 2, 2).unwrap();
        let points = [
            (0.0, 0.0),
            (50.0, 25.0),
            (100.0, 50.0),
            (50.0, 50.0),
            (100.0, 0.0),
            (49.999, 24.999),
        ];
        for (x, y) in points {
            let hits = plan.tiles().iter().filter(|t| t.accepts(x, y)).count();
            assert_eq!(hits, 1, "point ({}, {})", x, y);
        }
        assert!(!plan.tiles().iter().any(|t| t.accepts(100.1, 10.0)));
    }

    #[test]
    fn test_automatic_tiling() {
        let config = TilingConfig {
            mode: TilingMode::Automatic,
            tile_size: 30.0,
            ..TilingConfig::default()
        };
        let plan = TilingPlan::from_config(&config, Some(extent())).unwrap();
        assert_eq!((plan.rows, plan.columns), (2, 4));
    }

    #[test]
    fn test_unbounded_accepts_everything() {
        let plan = TilingPlan::from_config(&TilingConfig::default(), None).unwrap();
        assert!(!plan.is_tiled());
        assert!(plan.tiles()[0].accepts_envelope(None));
    }
}
