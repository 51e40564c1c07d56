// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! COLLADA 1.4.1 writer for consolidated meshes

use super::xml::{number, number_list, XmlBuilder};
use crate::error::Result;
use crate::geometry::{BatchKind, Material, MeshBatch, MeshBundle};
use chrono::{SecondsFormat, Utc};

const COLLADA_NAMESPACE: &str = "http://www.collada.org/2005/11/COLLADASchema";
const UV_SET: &str = "UVSET0";

/// Serialize a mesh as a `.dae` document. Texture images are referenced by
/// their file names, relative to the document.
pub fn write_collada(mesh: &MeshBundle, name: &str) -> Result<String> {
    let mut xml = XmlBuilder::document()?;
    xml.start("COLLADA", &[("xmlns", COLLADA_NAMESPACE), ("version", "1.4.1")])?;
    write_asset(&mut xml)?;
    write_images(&mut xml, &mesh.batches)?;
    write_materials(&mut xml, &mesh.batches)?;
    write_effects(&mut xml, &mesh.batches)?;
    write_geometry(&mut xml, mesh, name)?;
    write_scene(&mut xml, &mesh.batches, name)?;
    xml.start("scene", &[])?;
    xml.empty("instance_visual_scene", &[("url", "#scene")])?;
    xml.end("scene")?;
    xml.end("COLLADA")?;
    Ok(xml.into_string())
}

fn write_asset(xml: &mut XmlBuilder) -> Result<()> {
    let now = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
    xml.start("asset", &[])?;
    xml.start("contributor", &[])?;
    xml.text("authoring_tool", concat!("citykml ", env!("CARGO_PKG_VERSION")))?;
    xml.end("contributor")?;
    xml.text("created", &now)?;
    xml.text("modified", &now)?;
    xml.empty("unit", &[("name", "meter"), ("meter", "1")])?;
    xml.text("up_axis", "Z_UP")?;
    xml.end("asset")?;
    Ok(())
}

fn textured(batches: &[MeshBatch]) -> impl Iterator<Item = (usize, &str)> {
    batches.iter().enumerate().filter_map(|(i, batch)| match &batch.kind {
        BatchKind::Textured { texture } => Some((i, texture.as_str())),
        BatchKind::Material(_) => None,
    })
}

fn write_images(xml: &mut XmlBuilder, batches: &[MeshBatch]) -> Result<()> {
    if textured(batches).next().is_none() {
        return Ok(());
    }
    xml.start("library_images", &[])?;
    for (i, texture) in textured(batches) {
        let id = format!("image{}", i);
        xml.start("image", &[("id", &id), ("name", texture)])?;
        xml.text("init_from", texture)?;
        xml.end("image")?;
    }
    xml.end("library_images")?;
    Ok(())
}

fn write_materials(xml: &mut XmlBuilder, batches: &[MeshBatch]) -> Result<()> {
    xml.start("library_materials", &[])?;
    for (i, batch) in batches.iter().enumerate() {
        let id = format!("material{}", i);
        let effect = format!("#effect{}", i);
        xml.start("material", &[("id", &id), ("name", &batch.name)])?;
        xml.empty("instance_effect", &[("url", &effect)])?;
        xml.end("material")?;
    }
    xml.end("library_materials")?;
    Ok(())
}

fn color(xml: &mut XmlBuilder, element: &str, rgba: [f64; 4]) -> Result<()> {
    xml.start(element, &[])?;
    xml.text("color", &number_list(rgba, 4))?;
    xml.end(element)?;
    Ok(())
}

fn float(xml: &mut XmlBuilder, element: &str, value: f64) -> Result<()> {
    xml.start(element, &[])?;
    xml.text("float", &number(value, 4))?;
    xml.end(element)?;
    Ok(())
}

fn write_phong(xml: &mut XmlBuilder, material: &Material) -> Result<()> {
    let [r, g, b] = material.diffuse;
    let ambient = material.ambient_intensity;
    xml.start("phong", &[])?;
    color(xml, "emission", [material.emissive[0], material.emissive[1], material.emissive[2], 1.0])?;
    color(xml, "ambient", [r * ambient, g * ambient, b * ambient, 1.0])?;
    color(xml, "diffuse", material.rgba())?;
    color(xml, "specular", [material.specular[0], material.specular[1], material.specular[2], 1.0])?;
    float(xml, "shininess", material.shininess)?;
    float(xml, "transparency", 1.0 - material.transparency.clamp(0.0, 1.0))?;
    xml.end("phong")?;
    Ok(())
}

fn write_effects(xml: &mut XmlBuilder, batches: &[MeshBatch]) -> Result<()> {
    xml.start("library_effects", &[])?;
    for (i, batch) in batches.iter().enumerate() {
        let id = format!("effect{}", i);
        xml.start("effect", &[("id", &id)])?;
        xml.start("profile_COMMON", &[])?;
        match &batch.kind {
            BatchKind::Textured { .. } => {
                let surface = format!("surface{}", i);
                let sampler = format!("sampler{}", i);
                xml.start("newparam", &[("sid", &surface)])?;
                xml.start("surface", &[("type", "2D")])?;
                xml.text("init_from", &format!("image{}", i))?;
                xml.end("surface")?;
                xml.end("newparam")?;
                xml.start("newparam", &[("sid", &sampler)])?;
                xml.start("sampler2D", &[])?;
                xml.text("source", &surface)?;
                xml.end("sampler2D")?;
                xml.end("newparam")?;
                xml.start("technique", &[("sid", "common")])?;
                xml.start("lambert", &[])?;
                xml.start("diffuse", &[])?;
                xml.empty("texture", &[("texture", &sampler), ("texcoord", UV_SET)])?;
                xml.end("diffuse")?;
                xml.end("lambert")?;
                xml.end("technique")?;
            }
            BatchKind::Material(material) => {
                xml.start("technique", &[("sid", "common")])?;
                write_phong(xml, material)?;
                xml.end("technique")?;
            }
        }
        xml.end("profile_COMMON")?;
        xml.end("effect")?;
    }
    xml.end("library_effects")?;
    Ok(())
}

fn write_source(xml: &mut XmlBuilder, id: &str, values: &[f64], params: &[&str]) -> Result<()> {
    let array_id = format!("{}-array", id);
    let stride = params.len();
    let count = values.len().to_string();
    let accessor_count = (values.len() / stride).to_string();
    let array_ref = format!("#{}", array_id);

    xml.start("source", &[("id", id)])?;
    xml.start("float_array", &[("id", &array_id), ("count", &count)])?;
    xml.text_raw(&number_list(values.iter().copied(), 6))?;
    xml.end("float_array")?;
    xml.start("technique_common", &[])?;
    xml.start(
        "accessor",
        &[("source", &array_ref), ("count", &accessor_count), ("stride", &stride.to_string())],
    )?;
    for param in params {
        xml.empty("param", &[("name", param), ("type", "float")])?;
    }
    xml.end("accessor")?;
    xml.end("technique_common")?;
    xml.end("source")?;
    Ok(())
}

fn write_geometry(xml: &mut XmlBuilder, mesh: &MeshBundle, name: &str) -> Result<()> {
    let positions: Vec<f64> = mesh.positions.iter().flatten().copied().collect();
    let normals: Vec<f64> = mesh.normals.iter().flatten().copied().collect();
    let tex_coords: Vec<f64> = mesh.tex_coords.iter().flatten().copied().collect();

    xml.start("library_geometries", &[])?;
    xml.start("geometry", &[("id", "geometry"), ("name", name)])?;
    xml.start("mesh", &[])?;
    write_source(xml, "geometry-positions", &positions, &["X", "Y", "Z"])?;
    write_source(xml, "geometry-normals", &normals, &["X", "Y", "Z"])?;
    if !tex_coords.is_empty() {
        write_source(xml, "geometry-texcoords", &tex_coords, &["S", "T"])?;
    }
    xml.start("vertices", &[("id", "geometry-vertices")])?;
    xml.empty("input", &[("semantic", "POSITION"), ("source", "#geometry-positions")])?;
    xml.end("vertices")?;

    for (i, batch) in mesh.batches.iter().enumerate() {
        let material = format!("material{}", i);
        let count = batch.triangle_count().to_string();
        let uses_uv = batch.is_textured() && !tex_coords.is_empty();
        xml.start("triangles", &[("material", &material), ("count", &count)])?;
        xml.empty(
            "input",
            &[("semantic", "VERTEX"), ("source", "#geometry-vertices"), ("offset", "0")],
        )?;
        xml.empty(
            "input",
            &[("semantic", "NORMAL"), ("source", "#geometry-normals"), ("offset", "1")],
        )?;
        if uses_uv {
            xml.empty(
                "input",
                &[
                    ("semantic", "TEXCOORD"),
                    ("source", "#geometry-texcoords"),
                    ("offset", "2"),
                    ("set", "0"),
                ],
            )?;
        }
        let mut indices = Vec::with_capacity(batch.corners.len() * 3);
        for corner in &batch.corners {
            indices.push(corner.position.to_string());
            indices.push(corner.normal.to_string());
            if uses_uv {
                indices.push(corner.tex_coord.unwrap_or(0).to_string());
            }
        }
        xml.text("p", &indices.join(" "))?;
        xml.end("triangles")?;
    }

    xml.end("mesh")?;
    xml.end("geometry")?;
    xml.end("library_geometries")?;
    Ok(())
}

fn write_scene(xml: &mut XmlBuilder, batches: &[MeshBatch], name: &str) -> Result<()> {
    xml.start("library_visual_scenes", &[])?;
    xml.start("visual_scene", &[("id", "scene")])?;
    xml.start("node", &[("id", "node"), ("name", name)])?;
    xml.start("instance_geometry", &[("url", "#geometry")])?;
    xml.start("bind_material", &[])?;
    xml.start("technique_common", &[])?;
    for (i, batch) in batches.iter().enumerate() {
        let symbol = format!("material{}", i);
        let target = format!("#{}", symbol);
        xml.start("instance_material", &[("symbol", &symbol), ("target", &target)])?;
        if batch.is_textured() {
            xml.empty(
                "bind_vertex_input",
                &[("semantic", UV_SET), ("input_semantic", "TEXCOORD"), ("input_set", "0")],
            )?;
        }
        xml.end("instance_material")?;
    }
    xml.end("technique_common")?;
    xml.end("bind_material")?;
    xml.end("instance_geometry")?;
    xml.end("node")?;
    xml.end("visual_scene")?;
    xml.end("library_visual_scenes")?;
    Ok(())
}
