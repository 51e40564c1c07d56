// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! Export configuration

use crate::error::{ExportError, Result as ExportResult};
use crate::model::{DisplayForm, FeatureCategory, LodRequest};
use crate::texture::PackingAlgorithm;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default configuration file name
pub const DEFAULT_CONFIG_FILE: &str = "citykml.toml";

/// Complete export configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    pub database: DatabaseConfig,
    pub selection: SelectionConfig,
    pub output: OutputConfig,
    pub tiling: TilingConfig,
    pub crs: CrsConfig,
    pub altitude: AltitudeConfig,
    pub elevation: ElevationConfig,
    pub texture: TextureConfig,
    pub collada: ColladaConfig,
    pub balloon: BalloonConfig,
    pub pipeline: PipelineConfig,
    pub styles: StylesConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLite database file
    pub path: PathBuf,
    /// Appearance theme to read; all themes when unset
    pub appearance_theme: Option<String>,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("citymodel.sqlite"),
            appearance_theme: None,
        }
    }
}

/// What to export
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectionConfig {
    pub categories: Vec<FeatureCategory>,
    pub forms: Vec<DisplayForm>,
    pub lod: LodRequest,
    /// Explicit gml ids; when non-empty the spatial filter is ignored
    pub gmlids: Vec<String>,
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self {
            categories: vec![FeatureCategory::Building],
            forms: vec![DisplayForm::Collada],
            lod: LodRequest::default(),
            gmlids: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub directory: PathBuf,
    /// Base name of the master document and metadata index
    pub name: String,
    /// Wrap documents and their assets into KMZ archives
    pub kmz: bool,
    /// One folder per object, linked from the tile document
    pub one_file_per_object: bool,
    /// Write the JSON metadata index
    pub write_metadata: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("export"),
            name: "citymodel".to_string(),
            kmz: false,
            one_file_per_object: false,
            write_metadata: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TilingMode {
    #[default]
    None,
    Manual,
    Automatic,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TilingConfig {
    pub mode: TilingMode,
    pub rows: u32,
    pub columns: u32,
    /// Tile edge length in source CRS units for automatic tiling
    pub tile_size: f64,
    /// Spatial filter `[min_x, min_y, max_x, max_y]` in the source CRS
    pub bbox: Option<[f64; 4]>,
}

impl Default for TilingConfig {
    fn default() -> Self {
        Self {
            mode: TilingMode::None,
            rows: 1,
            columns: 1,
            tile_size: 125.0,
            bbox: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrsKind {
    /// Coordinates already are longitude, latitude, height
    #[default]
    Wgs84,
    /// Universal Transverse Mercator on WGS84
    Utm,
}

/// Affine placement of a local engineering grid in the projected CRS
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoReferenceConfig {
    pub eastings: f64,
    pub northings: f64,
    pub orthogonal_height: f64,
    /// Rotation of the local x axis, counter-clockwise from east, in degrees
    #[serde(default)]
    pub rotation: f64,
    #[serde(default = "default_scale")]
    pub scale: f64,
}

fn default_scale() -> f64 {
    1.0
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CrsConfig {
    pub kind: CrsKind,
    pub utm_zone: u8,
    pub utm_north: bool,
    /// Added to reprojected heights (geoid separation and the like)
    pub vertical_shift: f64,
    /// Keep the source Z instead of the reprojected one
    pub use_original_z: bool,
    pub georeference: Option<GeoReferenceConfig>,
}

impl Default for CrsConfig {
    fn default() -> Self {
        Self {
            kind: CrsKind::Wgs84,
            utm_zone: 32,
            utm_north: true,
            vertical_shift: 0.0,
            use_original_z: false,
            georeference: None,
        }
    }
}

/// KML altitude interpretation for geometry and model placemarks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AltitudeMode {
    #[default]
    Absolute,
    RelativeToGround,
    ClampToGround,
}

impl AltitudeMode {
    pub fn as_kml(&self) -> &'static str {
        match self {
            AltitudeMode::Absolute => "absolute",
            AltitudeMode::RelativeToGround => "relativeToGround",
            AltitudeMode::ClampToGround => "clampToGround",
        }
    }
}

/// Vertical offset strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OffsetMode {
    #[default]
    None,
    Constant,
    GenericAttribute,
    BottomZero,
}

impl OffsetMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            OffsetMode::None => "none",
            OffsetMode::Constant => "constant",
            OffsetMode::GenericAttribute => "generic_attribute",
            OffsetMode::BottomZero => "bottom_zero",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AltitudeConfig {
    pub mode: AltitudeMode,
    pub offset: OffsetMode,
    pub constant_offset: f64,
    /// Ask the elevation service when no cached offset exists
    pub call_elevation_service: bool,
}

impl Default for AltitudeConfig {
    fn default() -> Self {
        Self {
            mode: AltitudeMode::Absolute,
            offset: OffsetMode::None,
            constant_offset: 0.0,
            call_elevation_service: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ElevationConfig {
    pub endpoint: String,
    pub api_key: Option<String>,
    /// Locations per request
    pub batch_size: usize,
    pub max_url_length: usize,
    /// Minimum spacing between two requests
    pub min_interval_ms: u64,
    pub timeout_secs: u64,
}

impl Default for ElevationConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://maps.googleapis.com/maps/api/elevation/json".to_string(),
            api_key: None,
            batch_size: 64,
            max_url_length: 2048,
            min_interval_ms: 200,
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TextureConfig {
    /// Read and export appearances
    pub enabled: bool,
    pub atlas: bool,
    pub crop: bool,
    pub algorithm: PackingAlgorithm,
    pub power_of_two: bool,
    pub scale_factor: f64,
    pub max_atlas_size: u32,
    pub jpeg_atlases: bool,
}

impl Default for TextureConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            atlas: true,
            crop: true,
            algorithm: PackingAlgorithm::Shelf,
            power_of_two: false,
            scale_factor: 1.0,
            max_atlas_size: 2048,
            jpeg_atlases: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConverterKind {
    #[default]
    None,
    /// Built-in glTF 2.0 writer
    Gltf,
    /// External program
    External,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConverterConfig {
    pub kind: ConverterKind,
    pub program: Option<PathBuf>,
    /// Arguments; `{input}` and `{output}` are substituted
    pub args: Vec<String>,
    pub output_extension: String,
    /// Remove the COLLADA file after a successful conversion
    pub delete_intermediate: bool,
}

impl Default for ConverterConfig {
    fn default() -> Self {
        Self {
            kind: ConverterKind::None,
            program: None,
            args: vec!["{input}".to_string(), "{output}".to_string()],
            output_extension: "gltf".to_string(),
            delete_intermediate: false,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ColladaConfig {
    pub ignore_surface_orientation: bool,
    /// Merge group members into the group's model
    pub merge_group_members: bool,
    pub converter: ConverterConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BalloonConfig {
    pub enabled: bool,
    /// HTML template; a built-in table is used when unset
    pub template: Option<PathBuf>,
    /// Write balloons to sibling files instead of inlining them
    pub extract_to_files: bool,
}

impl Default for BalloonConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            template: None,
            extract_to_files: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Compute workers; number of CPUs when unset
    pub compute_workers: Option<usize>,
    pub writer_workers: usize,
    /// Capacity of the work and bundle queues
    pub queue_capacity: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            compute_workers: None,
            writer_workers: 2,
            queue_capacity: 128,
        }
    }
}

impl PipelineConfig {
    pub fn compute_workers(&self) -> usize {
        self.compute_workers.unwrap_or_else(num_cpus::get).max(1)
    }
}

/// Colours are KML `aabbggrr` hex strings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PolygonStyle {
    pub fill_color: String,
    pub line_color: String,
    pub line_width: f64,
}

impl Default for PolygonStyle {
    fn default() -> Self {
        Self {
            fill_color: "c8c8c8c8".to_string(),
            line_color: "ff505050".to_string(),
            line_width: 1.0,
        }
    }
}

impl PolygonStyle {
    fn with_fill(fill: &str) -> Self {
        Self {
            fill_color: fill.to_string(),
            ..Self::default()
        }
    }
}

/// Pixel range in which a form's tiles are shown
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct Visibility {
    pub min_lod_pixels: f64,
    pub max_lod_pixels: f64,
}

impl Default for Visibility {
    fn default() -> Self {
        Self {
            min_lod_pixels: 128.0,
            max_lod_pixels: -1.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StylesConfig {
    pub footprint: PolygonStyle,
    pub extruded: PolygonStyle,
    pub roof: PolygonStyle,
    pub wall: PolygonStyle,
    pub ground: PolygonStyle,
    pub footprint_visibility: Visibility,
    pub extruded_visibility: Visibility,
    pub geometry_visibility: Visibility,
    pub collada_visibility: Visibility,
}

impl Default for StylesConfig {
    fn default() -> Self {
        Self {
            footprint: PolygonStyle::with_fill("bfc8c8c8"),
            extruded: PolygonStyle::with_fill("ffc8c8c8"),
            roof: PolygonStyle::with_fill("ff3c3cc8"),
            wall: PolygonStyle::with_fill("ffc8c8c8"),
            ground: PolygonStyle::with_fill("ff2d6e2d"),
            footprint_visibility: Visibility::default(),
            extruded_visibility: Visibility::default(),
            geometry_visibility: Visibility {
                min_lod_pixels: 256.0,
                max_lod_pixels: -1.0,
            },
            collada_visibility: Visibility {
                min_lod_pixels: 512.0,
                max_lod_pixels: -1.0,
            },
        }
    }
}

impl StylesConfig {
    pub fn visibility(&self, form: DisplayForm) -> Visibility {
        match form {
            DisplayForm::Footprint => self.footprint_visibility,
            DisplayForm::Extruded => self.extruded_visibility,
            DisplayForm::Geometry => self.geometry_visibility,
            DisplayForm::Collada => self.collada_visibility,
        }
    }
}

impl ExportConfig {
    /// Load configuration from file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;
        let config: ExportConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path.as_ref()))?;
        Ok(config)
    }

    /// Load configuration with environment variable overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => Self::from_file(DEFAULT_CONFIG_FILE)?,
            None => Self::default(),
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply `CITYKML_*` environment variables
    pub fn apply_env_overrides(&mut self) {
        if let Ok(db) = std::env::var("CITYKML_DB") {
            self.database.path = PathBuf::from(db);
        }

        if let Ok(output) = std::env::var("CITYKML_OUTPUT") {
            self.output.directory = PathBuf::from(output);
        }

        if let Ok(workers) = std::env::var("CITYKML_COMPUTE_WORKERS") {
            self.pipeline.compute_workers = workers.parse().ok();
        }

        if let Ok(workers) = std::env::var("CITYKML_WRITER_WORKERS") {
            if let Ok(workers) = workers.parse() {
                self.pipeline.writer_workers = workers;
            }
        }

        if let Ok(key) = std::env::var("CITYKML_ELEVATION_API_KEY") {
            self.elevation.api_key = Some(key);
        }
    }

    /// Save configuration to file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(path.as_ref(), content)
            .with_context(|| format!("Failed to write config file: {:?}", path.as_ref()))?;
        Ok(())
    }

    /// Reject settings the pipeline cannot run with.
    pub fn validate(&self) -> ExportResult<()> {
        let invalid = |msg: String| Err(ExportError::Config(msg));

        if self.selection.forms.is_empty() {
            return invalid("no display form selected".to_string());
        }
        if self.selection.categories.is_empty() {
            return invalid("no feature category selected".to_string());
        }
        if let Some([min_x, min_y, max_x, max_y]) = self.tiling.bbox {
            if !(min_x < max_x && min_y < max_y) {
                return invalid(format!(
                    "bounding box [{}, {}, {}, {}] is empty",
                    min_x, min_y, max_x, max_y
                ));
            }
        }
        match self.tiling.mode {
            TilingMode::Manual if self.tiling.rows == 0 || self.tiling.columns == 0 => {
                return invalid("manual tiling needs at least one row and column".to_string());
            }
            TilingMode::Automatic if self.tiling.tile_size <= 0.0 => {
                return invalid("automatic tiling needs a positive tile size".to_string());
            }
            TilingMode::Manual | TilingMode::Automatic
                if self.tiling.bbox.is_none() && self.selection.gmlids.is_empty() =>
            {
                return invalid("tiling needs a bounding box".to_string());
            }
            _ => {}
        }
        if self.crs.kind == CrsKind::Utm && !(1..=60).contains(&self.crs.utm_zone) {
            return invalid(format!("UTM zone {} out of range", self.crs.utm_zone));
        }
        if !(self.texture.scale_factor > 0.0 && self.texture.scale_factor <= 1.0) {
            return invalid(format!(
                "texture scale factor {} not in (0, 1]",
                self.texture.scale_factor
            ));
        }
        if self.collada.converter.kind == ConverterKind::External
            && self.collada.converter.program.is_none()
        {
            return invalid("external converter needs a program".to_string());
        }
        if self.pipeline.queue_capacity == 0 {
            return invalid("queue capacity must be positive".to_string());
        }
        Ok(())
    }
}
