// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! KML documents, placemarks and network links

use super::xml::{number, XmlBuilder};
use crate::config::{AltitudeMode, PolygonStyle, StylesConfig, Visibility};
use crate::error::Result;
use crate::geometry::Envelope;
use crate::model::{DisplayForm, SurfaceType};
use crate::pipeline::{BundleContent, ExportBundle, KmlPolygon, ModelContent};
use nalgebra::Point3;

pub const KML_NAMESPACE: &str = "http://www.opengis.net/kml/2.2";

/// Closes a document opened by [`document_header`]
pub const DOCUMENT_FOOTER: &str = "\n</Document>\n</kml>\n";

const SURFACE_ORDER: [SurfaceType; 5] = [
    SurfaceType::Roof,
    SurfaceType::Wall,
    SurfaceType::Ground,
    SurfaceType::Closure,
    SurfaceType::Other,
];

/// Shared style id for a display form and, for the geometry form, a
/// surface type.
pub fn style_id(form: DisplayForm, surface_type: SurfaceType) -> &'static str {
    match form {
        DisplayForm::Footprint => "footprint",
        DisplayForm::Extruded => "extruded",
        DisplayForm::Geometry | DisplayForm::Collada => match surface_type {
            SurfaceType::Roof => "roof",
            SurfaceType::Ground => "ground",
            SurfaceType::Wall | SurfaceType::Closure | SurfaceType::Other => "wall",
        },
    }
}

fn write_style(xml: &mut XmlBuilder, id: &str, style: &PolygonStyle) -> Result<()> {
    xml.start("Style", &[("id", id)])?;
    xml.start("LineStyle", &[])?;
    xml.text("color", &style.line_color)?;
    xml.text("width", &number(style.line_width, 2))?;
    xml.end("LineStyle")?;
    xml.start("PolyStyle", &[])?;
    xml.text("color", &style.fill_color)?;
    xml.end("PolyStyle")?;
    xml.end("Style")?;
    Ok(())
}

fn write_styles(xml: &mut XmlBuilder, form: DisplayForm, styles: &StylesConfig) -> Result<()> {
    match form {
        DisplayForm::Footprint => write_style(xml, "footprint", &styles.footprint),
        DisplayForm::Extruded => write_style(xml, "extruded", &styles.extruded),
        DisplayForm::Geometry => {
            write_style(xml, "roof", &styles.roof)?;
            write_style(xml, "wall", &styles.wall)?;
            write_style(xml, "ground", &styles.ground)
        }
        DisplayForm::Collada => Ok(()),
    }
}

/// Opening part of a document: declaration, name and the form's styles.
/// Placemarks are appended after it and [`DOCUMENT_FOOTER`] closes it.
pub fn document_header(title: &str, form: DisplayForm, styles: &StylesConfig) -> Result<String> {
    let mut xml = XmlBuilder::document()?;
    xml.start("kml", &[("xmlns", KML_NAMESPACE)])?;
    xml.start("Document", &[])?;
    xml.text("name", title)?;
    xml.text("open", "1")?;
    write_styles(&mut xml, form, styles)?;
    Ok(xml.into_string())
}

/// Complete document around already rendered placemarks.
pub fn document(title: &str, form: DisplayForm, styles: &StylesConfig, body: &str) -> Result<String> {
    let mut text = document_header(title, form, styles)?;
    text.push('\n');
    text.push_str(body);
    text.push_str(DOCUMENT_FOOTER);
    Ok(text)
}

fn coordinate(point: &Point3<f64>, with_height: bool) -> String {
    if with_height {
        format!("{},{},{}", number(point.x, 9), number(point.y, 9), number(point.z, 3))
    } else {
        format!("{},{}", number(point.x, 9), number(point.y, 9))
    }
}

/// Ring coordinates, closed as KML requires.
fn ring_coordinates(ring: &[Point3<f64>], height: Option<f64>, with_height: bool) -> String {
    let mut points: Vec<Point3<f64>> = ring.to_vec();
    if let (Some(first), Some(last)) = (points.first().copied(), points.last()) {
        if first != *last {
            points.push(first);
        }
    }
    points
        .iter()
        .map(|p| match height {
            Some(h) => coordinate(&Point3::new(p.x, p.y, h), true),
            None => coordinate(p, with_height),
        })
        .collect::<Vec<_>>()
        .join(" ")
}

struct PolygonLayout<'a> {
    altitude_mode: &'a str,
    extrude: bool,
    /// Fixed height replacing every vertex height
    height: Option<f64>,
    with_height: bool,
}

fn write_polygon(xml: &mut XmlBuilder, polygon: &KmlPolygon, layout: &PolygonLayout<'_>) -> Result<()> {
    let rings: Vec<&Vec<Point3<f64>>> = polygon.rings.iter().filter(|ring| ring.len() >= 3).collect();
    let Some((exterior, holes)) = rings.split_first() else {
        return Ok(());
    };
    xml.start("Polygon", &[])?;
    if layout.extrude {
        xml.text("extrude", "1")?;
    }
    xml.text("altitudeMode", layout.altitude_mode)?;
    xml.start("outerBoundaryIs", &[])?;
    xml.start("LinearRing", &[])?;
    xml.text("coordinates", &ring_coordinates(exterior, layout.height, layout.with_height))?;
    xml.end("LinearRing")?;
    xml.end("outerBoundaryIs")?;
    for hole in holes {
        xml.start("innerBoundaryIs", &[])?;
        xml.start("LinearRing", &[])?;
        xml.text("coordinates", &ring_coordinates(hole, layout.height, layout.with_height))?;
        xml.end("LinearRing")?;
        xml.end("innerBoundaryIs")?;
    }
    xml.end("Polygon")?;
    Ok(())
}

fn write_line(xml: &mut XmlBuilder, line: &[Point3<f64>], altitude_mode: &str) -> Result<()> {
    match line {
        [] => Ok(()),
        [point] => {
            xml.start("Point", &[])?;
            xml.text("altitudeMode", altitude_mode)?;
            xml.text("coordinates", &coordinate(point, true))?;
            xml.end("Point")?;
            Ok(())
        }
        points => {
            xml.start("LineString", &[])?;
            xml.text("altitudeMode", altitude_mode)?;
            let coordinates: Vec<String> = points.iter().map(|p| coordinate(p, true)).collect();
            xml.text("coordinates", &coordinates.join(" "))?;
            xml.end("LineString")?;
            Ok(())
        }
    }
}

fn open_placemark(
    xml: &mut XmlBuilder,
    id: &str,
    name: &str,
    description: Option<&str>,
    style: Option<&str>,
) -> Result<()> {
    xml.start("Placemark", &[("id", id)])?;
    xml.text("name", name)?;
    if let Some(description) = description {
        xml.cdata("description", description)?;
    }
    if let Some(style) = style {
        xml.text("styleUrl", &format!("#{}", style))?;
    }
    Ok(())
}

/// Placemarks of one exported object.
///
/// `model_href` is the link to the mesh file for the COLLADA form.
pub fn placemarks(bundle: &ExportBundle, description: Option<&str>, model_href: Option<&str>) -> Result<String> {
    let mut xml = XmlBuilder::fragment();
    let gmlid = bundle.item.gmlid();
    let form = bundle.item.form;
    let id = format!("{}_{}", bundle.object_name(), form);

    match &bundle.content {
        BundleContent::Model(model) => {
            open_placemark(&mut xml, &id, gmlid, description, None)?;
            write_model(&mut xml, model, bundle.altitude_mode, model_href.unwrap_or_default())?;
            xml.end("Placemark")?;
        }
        BundleContent::Polygons {
            polygons,
            lines,
            extrude,
        } => {
            let layout = match form {
                DisplayForm::Footprint => PolygonLayout {
                    altitude_mode: AltitudeMode::ClampToGround.as_kml(),
                    extrude: false,
                    height: None,
                    with_height: false,
                },
                DisplayForm::Extruded => PolygonLayout {
                    altitude_mode: AltitudeMode::RelativeToGround.as_kml(),
                    extrude: true,
                    height: Some(extrude.unwrap_or(0.0)),
                    with_height: true,
                },
                DisplayForm::Geometry | DisplayForm::Collada => PolygonLayout {
                    altitude_mode: bundle.altitude_mode.as_kml(),
                    extrude: false,
                    height: None,
                    with_height: true,
                },
            };

            if form == DisplayForm::Geometry {
                // one placemark per surface type so each gets its own style
                for surface_type in SURFACE_ORDER {
                    let group: Vec<&KmlPolygon> =
                        polygons.iter().filter(|p| p.surface_type == surface_type).collect();
                    if group.is_empty() {
                        continue;
                    }
                    open_placemark(
                        &mut xml,
                        &format!("{}_{}", id, surface_type.as_str()),
                        gmlid,
                        description,
                        Some(style_id(form, surface_type)),
                    )?;
                    xml.start("MultiGeometry", &[])?;
                    for polygon in group {
                        write_polygon(&mut xml, polygon, &layout)?;
                    }
                    xml.end("MultiGeometry")?;
                    xml.end("Placemark")?;
                }
            } else if !polygons.is_empty() {
                open_placemark(&mut xml, &id, gmlid, description, Some(style_id(form, SurfaceType::Other)))?;
                xml.start("MultiGeometry", &[])?;
                for polygon in polygons {
                    write_polygon(&mut xml, polygon, &layout)?;
                }
                xml.end("MultiGeometry")?;
                xml.end("Placemark")?;
            }

            if !lines.is_empty() {
                open_placemark(&mut xml, &format!("{}_lines", id), gmlid, description, None)?;
                xml.start("MultiGeometry", &[])?;
                for line in lines {
                    write_line(&mut xml, line, bundle.altitude_mode.as_kml())?;
                }
                xml.end("MultiGeometry")?;
                xml.end("Placemark")?;
            }
        }
    }
    Ok(xml.into_string())
}

fn write_model(xml: &mut XmlBuilder, model: &ModelContent, altitude_mode: AltitudeMode, href: &str) -> Result<()> {
    xml.start("Model", &[])?;
    xml.text("altitudeMode", altitude_mode.as_kml())?;
    xml.start("Location", &[])?;
    xml.text("longitude", &number(model.location.x, 9))?;
    xml.text("latitude", &number(model.location.y, 9))?;
    xml.text("altitude", &number(model.location.z, 3))?;
    xml.end("Location")?;
    xml.start("Orientation", &[])?;
    xml.text("heading", "0")?;
    xml.text("tilt", "0")?;
    xml.text("roll", "0")?;
    xml.end("Orientation")?;
    xml.start("Scale", &[])?;
    xml.text("x", "1")?;
    xml.text("y", "1")?;
    xml.text("z", "1")?;
    xml.end("Scale")?;
    xml.start("Link", &[])?;
    xml.text("href", href)?;
    xml.end("Link")?;
    xml.end("Model")?;
    Ok(())
}

fn write_region(xml: &mut XmlBuilder, envelope: &Envelope, visibility: Visibility) -> Result<()> {
    xml.start("Region", &[])?;
    xml.start("LatLonAltBox", &[])?;
    xml.text("north", &number(envelope.max.y, 9))?;
    xml.text("south", &number(envelope.min.y, 9))?;
    xml.text("east", &number(envelope.max.x, 9))?;
    xml.text("west", &number(envelope.min.x, 9))?;
    xml.end("LatLonAltBox")?;
    xml.start("Lod", &[])?;
    xml.text("minLodPixels", &number(visibility.min_lod_pixels, 1))?;
    xml.text("maxLodPixels", &number(visibility.max_lod_pixels, 1))?;
    xml.end("Lod")?;
    xml.end("Region")?;
    Ok(())
}

/// A network link from one document to another
#[derive(Debug, Clone)]
pub struct Link {
    pub name: String,
    pub href: String,
    /// WGS84 bounds; the link only gets a region when both are set
    pub region: Option<(Envelope, Visibility)>,
}

fn write_network_link(xml: &mut XmlBuilder, link: &Link) -> Result<()> {
    xml.start("NetworkLink", &[])?;
    xml.text("name", &link.name)?;
    if let Some((envelope, visibility)) = &link.region {
        write_region(xml, envelope, *visibility)?;
    }
    xml.start("Link", &[])?;
    xml.text("href", &link.href)?;
    if link.region.is_some() {
        xml.text("viewRefreshMode", "onRegion")?;
    }
    xml.end("Link")?;
    xml.end("NetworkLink")?;
    Ok(())
}

/// Network link placemark replacing an object in its tile document.
pub fn network_link(link: &Link) -> Result<String> {
    let mut xml = XmlBuilder::fragment();
    write_network_link(&mut xml, link)?;
    Ok(xml.into_string())
}

/// Root document linking every written document.
pub fn master_document(title: &str, links: &[Link]) -> Result<String> {
    let mut xml = XmlBuilder::document()?;
    xml.start("kml", &[("xmlns", KML_NAMESPACE)])?;
    xml.start("Document", &[])?;
    xml.text("name", title)?;
    xml.text("open", "1")?;
    for link in links {
        write_network_link(&mut xml, link)?;
    }
    xml.end("Document")?;
    xml.end("kml")?;
    Ok(xml.into_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::FeatureRecord;
    use crate::geometry::MeshBundle;
    use crate::model::{FeatureCategory, LodRequest};
    use crate::pipeline::{TileKey, WorkItem};

    fn bundle(form: DisplayForm, content: BundleContent) -> ExportBundle {
        ExportBundle {
            item: WorkItem {
                feature: FeatureRecord {
                    id: 7,
                    gmlid: "BLDG_7".to_string(),
                    class_id: 26,
                    envelope: None,
                    name: None,
                    description: None,
                },
                category: FeatureCategory::Building,
                form,
                lod: LodRequest::Lod(2),
                tile: TileKey::default(),
                wgs84_envelope: None,
            },
            lod: 2,
            offset: 0.0,
            altitude_mode: AltitudeMode::Absolute,
            content,
            attributes: Vec::new(),
        }
    }

    fn square(z: f64, surface_type: SurfaceType) -> KmlPolygon {
        KmlPolygon {
            surface_type,
            rings: vec![vec![
                Point3::new(13.0, 52.0, z),
                Point3::new(13.001, 52.0, z),
                Point3::new(13.001, 52.001, z),
                Point3::new(13.0, 52.001, z),
            ]],
        }
    }

    #[test]
    fn test_footprint_is_clamped_and_closed() {
        let bundle = bundle(
            DisplayForm::Footprint,
            BundleContent::Polygons {
                polygons: vec![square(34.0, SurfaceType::Ground)],
                lines: Vec::new(),
                extrude: None,
            },
        );
        let text = placemarks(&bundle, None, None).unwrap();
        assert!(text.contains("<altitudeMode>clampToGround</altitudeMode>"));
        assert!(text.contains("<styleUrl>#footprint</styleUrl>"));
        assert!(text.contains("<coordinates>13,52 13.001,52 13.001,52.001 13,52.001 13,52</coordinates>"));
    }

    #[test]
    fn test_extruded_uses_height() {
        let bundle = bundle(
            DisplayForm::Extruded,
            BundleContent::Polygons {
                polygons: vec![square(0.0, SurfaceType::Ground)],
                lines: Vec::new(),
                extrude: Some(12.5),
            },
        );
        let text = placemarks(&bundle, Some("<b>hi</b>"), None).unwrap();
        assert!(text.contains("<extrude>1</extrude>"));
        assert!(text.contains("<altitudeMode>relativeToGround</altitudeMode>"));
        assert!(text.contains("13,52,12.5 "));
        assert!(text.contains("<![CDATA[<b>hi</b>]]>"));
    }

    #[test]
    fn test_geometry_splits_by_surface_type() {
        let bundle = bundle(
            DisplayForm::Geometry,
            BundleContent::Polygons {
                polygons: vec![square(10.0, SurfaceType::Roof), square(0.0, SurfaceType::Wall)],
                lines: Vec::new(),
                extrude: None,
            },
        );
        let text = placemarks(&bundle, None, None).unwrap();
        assert_eq!(text.matches("<Placemark").count(), 2);
        assert!(text.contains("#roof"));
        assert!(text.contains("#wall"));
        assert!(text.contains("<altitudeMode>absolute</altitudeMode>"));
    }

    #[test]
    fn test_model_placemark_links_mesh() {
        let model = ModelContent {
            mesh: MeshBundle::default(),
            location: Point3::new(13.4, 52.5, 40.0),
            textures: Vec::new(),
        };
        let bundle = bundle(DisplayForm::Collada, BundleContent::Model(model));
        let text = placemarks(&bundle, None, Some("BLDG_7/BLDG_7.dae")).unwrap();
        assert!(text.contains("<longitude>13.4</longitude>"));
        assert!(text.contains("<href>BLDG_7/BLDG_7.dae</href>"));
    }

    #[test]
    fn test_master_document_regions() {
        let envelope = Envelope::new(Point3::new(13.0, 52.0, 0.0), Point3::new(13.1, 52.1, 0.0));
        let links = vec![
            Link {
                name: "collada 0_0".to_string(),
                href: "tiles/0_0/city_collada.kml".to_string(),
                region: Some((envelope, Visibility::default())),
            },
            Link {
                name: "footprint".to_string(),
                href: "city_footprint.kml".to_string(),
                region: None,
            },
        ];
        let text = master_document("city", &links).unwrap();
        assert_eq!(text.matches("<NetworkLink>").count(), 2);
        assert_eq!(text.matches("<Region>").count(), 1);
        assert!(text.contains("<north>52.1</north>"));
        assert!(text.contains("<minLodPixels>128</minLodPixels>"));
        assert!(text.contains("<viewRefreshMode>onRegion</viewRefreshMode>"));
    }

    #[test]
    fn test_document_is_closed() {
        let text = document("city", DisplayForm::Geometry, &StylesConfig::default(), "").unwrap();
        assert!(text.contains("<Style id=\"roof\">"));
        assert!(text.trim_end().ends_with("</kml>"));
    }
}
