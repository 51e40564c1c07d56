// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! Reprojection of source coordinates to WGS84 longitude/latitude

use crate::config::{CrsConfig, CrsKind, GeoReferenceConfig};
use crate::error::{ExportError, Result};
use crate::geometry::Envelope;
use nalgebra::Point3;

/// Conversion from a source CRS to WGS84 `(lon, lat, height)` in degrees
pub trait CrsTransform: Send + Sync {
    fn to_wgs84(&self, point: &Point3<f64>) -> Result<Point3<f64>>;

    fn name(&self) -> String;
}

/// Identity for data already stored in WGS84
#[derive(Debug, Clone, Copy, Default)]
pub struct Wgs84;

impl CrsTransform for Wgs84 {
    fn to_wgs84(&self, point: &Point3<f64>) -> Result<Point3<f64>> {
        if !(-180.0..=180.0).contains(&point.x) || !(-90.0..=90.0).contains(&point.y) {
            return Err(ExportError::Transform(format!(
                "({}, {}) is not a WGS84 position",
                point.x, point.y
            )));
        }
        Ok(*point)
    }

    fn name(&self) -> String {
        "EPSG:4326".to_string()
    }
}

const WGS84_A: f64 = 6_378_137.0;
const WGS84_F: f64 = 1.0 / 298.257_223_563;

/// Transverse Mercator on the WGS84 ellipsoid
#[derive(Debug, Clone, Copy)]
pub struct TransverseMercator {
    /// Central meridian in degrees
    pub central_meridian: f64,
    pub scale_factor: f64,
    pub false_easting: f64,
    pub false_northing: f64,
    zone: Option<(u8, bool)>,
}

impl TransverseMercator {
    /// UTM zone on the northern or southern hemisphere.
    pub fn utm(zone: u8, north: bool) -> Result<Self> {
        if !(1..=60).contains(&zone) {
            return Err(ExportError::Config(format!("UTM zone {} out of range", zone)));
        }
        Ok(Self {
            central_meridian: zone as f64 * 6.0 - 183.0,
            scale_factor: 0.9996,
            false_easting: 500_000.0,
            false_northing: if north { 0.0 } else { 10_000_000.0 },
            zone: Some((zone, north)),
        })
    }

    fn e2() -> f64 {
        WGS84_F * (2.0 - WGS84_F)
    }

    fn meridian_arc(phi: f64) -> f64 {
        let e2 = Self::e2();
        let e4 = e2 * e2;
        let e6 = e4 * e2;
        WGS84_A
            * ((1.0 - e2 / 4.0 - 3.0 * e4 / 64.0 - 5.0 * e6 / 256.0) * phi
                - (3.0 * e2 / 8.0 + 3.0 * e4 / 32.0 + 45.0 * e6 / 1024.0) * (2.0 * phi).sin()
                + (15.0 * e4 / 256.0 + 45.0 * e6 / 1024.0) * (4.0 * phi).sin()
                - (35.0 * e6 / 3072.0) * (6.0 * phi).sin())
    }

    /// Forward projection of `(lon, lat)` in degrees to `(easting, northing)`.
    pub fn project(&self, lon: f64, lat: f64) -> (f64, f64) {
        let e2 = Self::e2();
        let ep2 = e2 / (1.0 - e2);
        let k0 = self.scale_factor;
        let phi = lat.to_radians();
        let (sin_phi, cos_phi) = phi.sin_cos();
        let tan_phi = phi.tan();

        let n = WGS84_A / (1.0 - e2 * sin_phi * sin_phi).sqrt();
        let t = tan_phi * tan_phi;
        let c = ep2 * cos_phi * cos_phi;
        let a = (lon - self.central_meridian).to_radians() * cos_phi;
        let m = Self::meridian_arc(phi);

        let x = k0
            * n
            * (a + (1.0 - t + c) * a.powi(3) / 6.0
                + (5.0 - 18.0 * t + t * t + 72.0 * c - 58.0 * ep2) * a.powi(5) / 120.0);
        let y = k0
            * (m + n
                * tan_phi
                * (a * a / 2.0
                    + (5.0 - t + 9.0 * c + 4.0 * c * c) * a.powi(4) / 24.0
                    + (61.0 - 58.0 * t + t * t + 600.0 * c - 330.0 * ep2) * a.powi(6) / 720.0));

        (x + self.false_easting, y + self.false_northing)
    }

    /// Inverse projection of `(easting, northing)` to `(lon, lat)` in degrees.
    pub fn unproject(&self, easting: f64, northing: f64) -> (f64, f64) {
        let e2 = Self::e2();
        let e4 = e2 * e2;
        let e6 = e4 * e2;
        let ep2 = e2 / (1.0 - e2);
        let k0 = self.scale_factor;

        let x = easting - self.false_easting;
        let y = northing - self.false_northing;

        let m = y / k0;
        let mu = m / (WGS84_A * (1.0 - e2 / 4.0 - 3.0 * e4 / 64.0 - 5.0 * e6 / 256.0));
        let sq = (1.0 - e2).sqrt();
        let e1 = (1.0 - sq) / (1.0 + sq);

        let phi1 = mu
            + (3.0 * e1 / 2.0 - 27.0 * e1.powi(3) / 32.0) * (2.0 * mu).sin()
            + (21.0 * e1 * e1 / 16.0 - 55.0 * e1.powi(4) / 32.0) * (4.0 * mu).sin()
            + (151.0 * e1.powi(3) / 96.0) * (6.0 * mu).sin()
            + (1097.0 * e1.powi(4) / 512.0) * (8.0 * mu).sin();

        let (sin_phi1, cos_phi1) = phi1.sin_cos();
        let tan_phi1 = phi1.tan();
        let c1 = ep2 * cos_phi1 * cos_phi1;
        let t1 = tan_phi1 * tan_phi1;
        let denom = 1.0 - e2 * sin_phi1 * sin_phi1;
        let n1 = WGS84_A / denom.sqrt();
        let r1 = WGS84_A * (1.0 - e2) / denom.powf(1.5);
        let d = x / (n1 * k0);

        let lat = phi1
            - (n1 * tan_phi1 / r1)
                * (d * d / 2.0
                    - (5.0 + 3.0 * t1 + 10.0 * c1 - 4.0 * c1 * c1 - 9.0 * ep2) * d.powi(4) / 24.0
                    + (61.0 + 90.0 * t1 + 298.0 * c1 + 45.0 * t1 * t1 - 252.0 * ep2 - 3.0 * c1 * c1)
                        * d.powi(6)
                        / 720.0);
        let lon = (d - (1.0 + 2.0 * t1 + c1) * d.powi(3) / 6.0
            + (5.0 - 2.0 * c1 + 28.0 * t1 - 3.0 * c1 * c1 + 8.0 * ep2 + 24.0 * t1 * t1) * d.powi(5)
                / 120.0)
            / cos_phi1;

        (self.central_meridian + lon.to_degrees(), lat.to_degrees())
    }
}

impl CrsTransform for TransverseMercator {
    fn to_wgs84(&self, point: &Point3<f64>) -> Result<Point3<f64>> {
        if !point.x.is_finite() || !point.y.is_finite() {
            return Err(ExportError::Transform("non-finite coordinate".to_string()));
        }
        let (lon, lat) = self.unproject(point.x, point.y);
        if !(-90.0..=90.0).contains(&lat) {
            return Err(ExportError::Transform(format!(
                "({}, {}) projects outside the valid latitude range",
                point.x, point.y
            )));
        }
        Ok(Point3::new(lon, lat, point.z))
    }

    fn name(&self) -> String {
        match self.zone {
            Some((zone, true)) => format!("EPSG:{}", 32600 + zone as u32),
            Some((zone, false)) => format!("EPSG:{}", 32700 + zone as u32),
            None => "Transverse Mercator".to_string(),
        }
    }
}

/// Local engineering grid placed in the projected CRS
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoReference {
    pub eastings: f64,
    pub northings: f64,
    pub orthogonal_height: f64,
    pub x_axis_abscissa: f64,
    pub x_axis_ordinate: f64,
    pub scale: f64,
}

impl GeoReference {
    pub fn from_config(config: &GeoReferenceConfig) -> Self {
        let (sin_r, cos_r) = config.rotation.to_radians().sin_cos();
        Self {
            eastings: config.eastings,
            northings: config.northings,
            orthogonal_height: config.orthogonal_height,
            x_axis_abscissa: cos_r,
            x_axis_ordinate: sin_r,
            scale: config.scale,
        }
    }

    /// Transform local coordinates to map coordinates
    pub fn local_to_map(&self, point: &Point3<f64>) -> Point3<f64> {
        let cos_r = self.x_axis_abscissa;
        let sin_r = self.x_axis_ordinate;
        let s = self.scale;

        let e = s * (cos_r * point.x - sin_r * point.y) + self.eastings;
        let n = s * (sin_r * point.x + cos_r * point.y) + self.northings;
        let h = point.z + self.orthogonal_height;

        Point3::new(e, n, h)
    }
}

/// Full source-to-WGS84 projection used by the exporter
pub struct Projection {
    georeference: Option<GeoReference>,
    crs: Box<dyn CrsTransform>,
    vertical_shift: f64,
    use_original_z: bool,
}

impl std::fmt::Debug for Projection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Projection")
            .field("crs", &self.crs.name())
            .field("georeference", &self.georeference)
            .field("vertical_shift", &self.vertical_shift)
            .field("use_original_z", &self.use_original_z)
            .finish()
    }
}

impl Projection {
    pub fn new(crs: Box<dyn CrsTransform>) -> Self {
        Self {
            georeference: None,
            crs,
            vertical_shift: 0.0,
            use_original_z: false,
        }
    }

    pub fn from_config(config: &CrsConfig) -> Result<Self> {
        let crs: Box<dyn CrsTransform> = match config.kind {
            CrsKind::Wgs84 => Box::new(Wgs84),
            CrsKind::Utm => Box::new(TransverseMercator::utm(config.utm_zone, config.utm_north)?),
        };
        Ok(Self {
            georeference: config.georeference.as_ref().map(GeoReference::from_config),
            crs,
            vertical_shift: config.vertical_shift,
            use_original_z: config.use_original_z,
        })
    }

    pub fn with_georeference(mut self, georeference: GeoReference) -> Self {
        self.georeference = Some(georeference);
        self
    }

    pub fn with_vertical_shift(mut self, shift: f64) -> Self {
        self.vertical_shift = shift;
        self
    }

    pub fn with_original_z(mut self, use_original_z: bool) -> Self {
        self.use_original_z = use_original_z;
        self
    }

    pub fn crs_name(&self) -> String {
        self.crs.name()
    }

    /// Project a source point to `(lon, lat, height)`.
    pub fn project(&self, point: &Point3<f64>) -> Result<Point3<f64>> {
        let map = match &self.georeference {
            Some(georeference) => georeference.local_to_map(point),
            None => *point,
        };
        let projected = self.crs.to_wgs84(&map)?;
        let z = if self.use_original_z {
            point.z
        } else {
            projected.z + self.vertical_shift
        };
        Ok(Point3::new(projected.x, projected.y, z))
    }

    /// WGS84 envelope of a source envelope, from its projected corners.
    pub fn project_envelope(&self, envelope: &Envelope) -> Result<Envelope> {
        let mut result = Envelope::empty();
        for z in [envelope.min.z, envelope.max.z] {
            for corner in envelope.corners_xy(z) {
                result.expand_to_include(&self.project(&corner)?);
            }
        }
        Ok(result)
    }
}

impl Default for Projection {
    fn default() -> Self {
        Self::new(Box::new(Wgs84))
    }
}
