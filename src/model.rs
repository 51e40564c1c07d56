// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! Feature categories, display forms and level-of-detail requests

use serde::{Deserialize, Serialize};
use std::fmt;

/// Top-level city object categories the exporter knows how to render
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureCategory {
    Building,
    Bridge,
    Tunnel,
    Vegetation,
    Transportation,
    Furniture,
    Group,
}

impl FeatureCategory {
    pub const ALL: [FeatureCategory; 7] = [
        FeatureCategory::Building,
        FeatureCategory::Bridge,
        FeatureCategory::Tunnel,
        FeatureCategory::Vegetation,
        FeatureCategory::Transportation,
        FeatureCategory::Furniture,
        FeatureCategory::Group,
    ];

    /// Map a database object class id to its category.
    pub fn from_class_id(class_id: i32) -> Option<Self> {
        match class_id {
            25 | 26 => Some(FeatureCategory::Building),
            63 | 64 => Some(FeatureCategory::Bridge),
            84 | 85 => Some(FeatureCategory::Tunnel),
            7 | 8 => Some(FeatureCategory::Vegetation),
            42..=46 => Some(FeatureCategory::Transportation),
            21 => Some(FeatureCategory::Furniture),
            23 => Some(FeatureCategory::Group),
            _ => None,
        }
    }

    /// Object class ids belonging to this category.
    pub fn class_ids(&self) -> &'static [i32] {
        match self {
            FeatureCategory::Building => &[25, 26],
            FeatureCategory::Bridge => &[63, 64],
            FeatureCategory::Tunnel => &[84, 85],
            FeatureCategory::Vegetation => &[7, 8],
            FeatureCategory::Transportation => &[42, 43, 44, 45, 46],
            FeatureCategory::Furniture => &[21],
            FeatureCategory::Group => &[23],
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FeatureCategory::Building => "building",
            FeatureCategory::Bridge => "bridge",
            FeatureCategory::Tunnel => "tunnel",
            FeatureCategory::Vegetation => "vegetation",
            FeatureCategory::Transportation => "transportation",
            FeatureCategory::Furniture => "furniture",
            FeatureCategory::Group => "group",
        }
    }
}

impl std::str::FromStr for FeatureCategory {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        FeatureCategory::ALL
            .into_iter()
            .find(|c| c.as_str() == wanted)
            .ok_or_else(|| format!("unknown feature category '{}'", s))
    }
}

impl fmt::Display for FeatureCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rendering style requested for an object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisplayForm {
    Footprint,
    Extruded,
    Geometry,
    Collada,
}

impl DisplayForm {
    pub fn as_str(&self) -> &'static str {
        match self {
            DisplayForm::Footprint => "footprint",
            DisplayForm::Extruded => "extruded",
            DisplayForm::Geometry => "geometry",
            DisplayForm::Collada => "collada",
        }
    }

    /// Forms that render a 2D footprint rather than boundary surfaces.
    pub fn is_footprint_based(&self) -> bool {
        matches!(self, DisplayForm::Footprint | DisplayForm::Extruded)
    }
}

impl std::str::FromStr for DisplayForm {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "footprint" => Ok(DisplayForm::Footprint),
            "extruded" => Ok(DisplayForm::Extruded),
            "geometry" => Ok(DisplayForm::Geometry),
            "collada" => Ok(DisplayForm::Collada),
            other => Err(format!("unknown display form '{}'", other)),
        }
    }
}

impl fmt::Display for DisplayForm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Highest LOD tier in the data model
pub const MAX_LOD: u8 = 4;

/// Requested level of detail
///
/// Written in configuration files as a number (`2`) or as `"best"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "LodSetting", into = "LodSetting")]
pub enum LodRequest {
    /// Exactly this LOD or the next lower one available
    Lod(u8),
    /// Highest LOD available
    Best,
}

impl LodRequest {
    /// LOD the fallback ladder starts from.
    pub fn start(&self) -> u8 {
        match self {
            LodRequest::Lod(lod) => (*lod).min(MAX_LOD),
            LodRequest::Best => MAX_LOD,
        }
    }
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum LodSetting {
    Level(u8),
    Named(String),
}

impl TryFrom<LodSetting> for LodRequest {
    type Error = String;

    fn try_from(value: LodSetting) -> std::result::Result<Self, Self::Error> {
        match value {
            LodSetting::Level(lod) if lod <= MAX_LOD => Ok(LodRequest::Lod(lod)),
            LodSetting::Level(lod) => Err(format!("LOD {} is above {}", lod, MAX_LOD)),
            LodSetting::Named(name) if name.eq_ignore_ascii_case("best") => Ok(LodRequest::Best),
            LodSetting::Named(name) => name
                .parse::<u8>()
                .map_err(|_| format!("invalid LOD '{}'", name))
                .and_then(|lod| LodSetting::Level(lod).try_into()),
        }
    }
}

impl From<LodRequest> for LodSetting {
    fn from(value: LodRequest) -> Self {
        match value {
            LodRequest::Lod(lod) => LodSetting::Level(lod),
            LodRequest::Best => LodSetting::Named("best".to_string()),
        }
    }
}

impl std::str::FromStr for LodRequest {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        LodSetting::Named(s.trim().to_string()).try_into()
    }
}

impl Default for LodRequest {
    fn default() -> Self {
        LodRequest::Lod(2)
    }
}

/// Semantic type of a boundary surface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SurfaceType {
    Roof,
    Wall,
    Ground,
    Closure,
    Other,
}

impl SurfaceType {
    pub fn parse(value: Option<&str>) -> Self {
        match value.map(|v| v.trim().to_ascii_lowercase()).as_deref() {
            Some("roof") => SurfaceType::Roof,
            Some("wall") => SurfaceType::Wall,
            Some("ground") => SurfaceType::Ground,
            Some("closure") => SurfaceType::Closure,
            _ => SurfaceType::Other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SurfaceType::Roof => "roof",
            SurfaceType::Wall => "wall",
            SurfaceType::Ground => "ground",
            SurfaceType::Closure => "closure",
            SurfaceType::Other => "other",
        }
    }
}
