// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! Runtime mesh conversion: built-in glTF 2.0 writer or an external program

use crate::config::{ConverterConfig, ConverterKind};
use crate::error::{ExportError, Result};
use crate::geometry::{BatchKind, MeshBundle};
use ahash::AHashMap;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::debug;

/// Converts a written COLLADA file into a runtime mesh format
pub trait MeshConverter: Send + Sync {
    /// Convert `dae`, returning the path of the produced file.
    fn convert(&self, dae: &Path, mesh: &MeshBundle) -> Result<PathBuf>;
}

/// Converter selected by configuration, `None` when conversion is off.
pub fn converter_from_config(config: &ConverterConfig) -> Result<Option<Box<dyn MeshConverter>>> {
    match config.kind {
        ConverterKind::None => Ok(None),
        ConverterKind::Gltf => Ok(Some(Box::new(GltfConverter))),
        ConverterKind::External => {
            let program = config
                .program
                .clone()
                .ok_or_else(|| ExportError::Config("external converter needs a program".to_string()))?;
            Ok(Some(Box::new(ExternalConverter {
                program,
                args: config.args.clone(),
                extension: config.output_extension.clone(),
            })))
        }
    }
}

/// Writes `.gltf` files with an embedded base64 buffer next to the mesh
#[derive(Debug, Clone, Copy, Default)]
pub struct GltfConverter;

impl MeshConverter for GltfConverter {
    fn convert(&self, dae: &Path, mesh: &MeshBundle) -> Result<PathBuf> {
        let output = dae.with_extension("gltf");
        let gltf = create_gltf_json(mesh)?;
        std::fs::write(&output, serde_json::to_string_pretty(&gltf)?)?;
        Ok(output)
    }
}

/// Runs a converter program; `{input}` and `{output}` in the arguments are
/// replaced by the file paths
#[derive(Debug, Clone)]
pub struct ExternalConverter {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub extension: String,
}

impl MeshConverter for ExternalConverter {
    fn convert(&self, dae: &Path, _mesh: &MeshBundle) -> Result<PathBuf> {
        let output = dae.with_extension(&self.extension);
        let input = dae.to_string_lossy();
        let target = output.to_string_lossy();
        let args: Vec<String> = self
            .args
            .iter()
            .map(|arg| arg.replace("{input}", &input).replace("{output}", &target))
            .collect();
        debug!(program = %self.program.display(), ?args, "Running mesh converter");

        let result = Command::new(&self.program).args(&args).output()?;
        if !result.status.success() {
            return Err(ExportError::Io(std::io::Error::other(format!(
                "{} exited with {}: {}",
                self.program.display(),
                result.status,
                String::from_utf8_lossy(&result.stderr).trim()
            ))));
        }
        if !output.exists() {
            return Err(ExportError::Io(std::io::Error::other(format!(
                "{} did not produce {}",
                self.program.display(),
                output.display()
            ))));
        }
        Ok(output)
    }
}

/// glTF is Y-up, meshes are Z-up
fn to_y_up(p: [f64; 3]) -> [f32; 3] {
    [p[0] as f32, p[2] as f32, -p[1] as f32]
}

fn extend_vec3(buffer: &mut Vec<u8>, v: [f32; 3]) {
    for c in v {
        buffer.extend_from_slice(&c.to_le_bytes());
    }
}

fn align_to_multiple_of_four(buffer: &mut Vec<u8>) {
    while buffer.len() % 4 != 0 {
        buffer.push(0);
    }
}

fn create_gltf_json(mesh: &MeshBundle) -> Result<Value> {
    // glTF vertices carry one position/normal/uv triple; split shared corners
    let mut vertex_index: AHashMap<(u32, u32, Option<u32>), u32> = AHashMap::new();
    let mut vertices: Vec<(u32, u32, Option<u32>)> = Vec::new();
    let mut batch_indices: Vec<Vec<u32>> = Vec::with_capacity(mesh.batches.len());
    for batch in &mesh.batches {
        let textured = batch.is_textured();
        let mut indices = Vec::with_capacity(batch.corners.len());
        for corner in &batch.corners {
            let key = (corner.position, corner.normal, if textured { corner.tex_coord } else { None });
            let index = *vertex_index.entry(key).or_insert_with(|| {
                vertices.push(key);
                (vertices.len() - 1) as u32
            });
            indices.push(index);
        }
        batch_indices.push(indices);
    }

    let position = |i: u32| mesh.positions.get(i as usize).copied().unwrap_or_default();
    let normal = |i: u32| mesh.normals.get(i as usize).copied().unwrap_or([0.0, 0.0, 1.0]);
    let uv = |i: Option<u32>| {
        i.and_then(|i| mesh.tex_coords.get(i as usize))
            .map(|t| [t[0] as f32, 1.0 - t[1] as f32])
            .unwrap_or([0.0, 0.0])
    };

    let mut buffer_data = Vec::new();

    // Write positions
    let position_offset = buffer_data.len();
    let mut min_pos = [f32::MAX; 3];
    let mut max_pos = [f32::MIN; 3];
    for &(p, _, _) in &vertices {
        let v = to_y_up(position(p));
        for axis in 0..3 {
            min_pos[axis] = min_pos[axis].min(v[axis]);
            max_pos[axis] = max_pos[axis].max(v[axis]);
        }
        extend_vec3(&mut buffer_data, v);
    }
    let position_length = buffer_data.len() - position_offset;

    // Write normals
    let normal_offset = buffer_data.len();
    for &(_, n, _) in &vertices {
        extend_vec3(&mut buffer_data, to_y_up(normal(n)));
    }
    let normal_length = buffer_data.len() - normal_offset;

    // Write texture coordinates
    let has_uv = vertices.iter().any(|v| v.2.is_some());
    let uv_offset = buffer_data.len();
    if has_uv {
        for &(_, _, t) in &vertices {
            for c in uv(t) {
                buffer_data.extend_from_slice(&c.to_le_bytes());
            }
        }
    }
    let uv_length = buffer_data.len() - uv_offset;

    let mut buffer_views = vec![
        json!({ "buffer": 0, "byteOffset": position_offset, "byteLength": position_length, "target": 34962 }),
        json!({ "buffer": 0, "byteOffset": normal_offset, "byteLength": normal_length, "target": 34962 }),
    ];
    let mut accessors = vec![
        json!({
            "bufferView": 0,
            "componentType": 5126,
            "count": vertices.len(),
            "type": "VEC3",
            "min": min_pos,
            "max": max_pos
        }),
        json!({ "bufferView": 1, "componentType": 5126, "count": vertices.len(), "type": "VEC3" }),
    ];
    let uv_accessor = if has_uv {
        buffer_views.push(json!({ "buffer": 0, "byteOffset": uv_offset, "byteLength": uv_length, "target": 34962 }));
        accessors.push(json!({ "bufferView": 2, "componentType": 5126, "count": vertices.len(), "type": "VEC2" }));
        Some(2)
    } else {
        None
    };

    // Write indices, one primitive per batch
    let mut primitives = Vec::new();
    let mut materials = Vec::new();
    let mut images: Vec<Value> = Vec::new();
    let mut textures: Vec<Value> = Vec::new();
    let mut image_slots: AHashMap<&str, usize> = AHashMap::new();
    for (batch, indices) in mesh.batches.iter().zip(&batch_indices) {
        align_to_multiple_of_four(&mut buffer_data);
        let indices_offset = buffer_data.len();
        for index in indices {
            buffer_data.extend_from_slice(&index.to_le_bytes());
        }
        let view = buffer_views.len();
        buffer_views.push(json!({
            "buffer": 0,
            "byteOffset": indices_offset,
            "byteLength": buffer_data.len() - indices_offset,
            "target": 34963
        }));
        let accessor = accessors.len();
        accessors.push(json!({ "bufferView": view, "componentType": 5125, "count": indices.len(), "type": "SCALAR" }));

        let material = match &batch.kind {
            BatchKind::Textured { texture } => {
                let slot = *image_slots.entry(texture.as_str()).or_insert_with(|| {
                    images.push(json!({ "uri": texture }));
                    textures.push(json!({ "source": images.len() - 1, "sampler": 0 }));
                    textures.len() - 1
                });
                json!({
                    "name": batch.name,
                    "pbrMetallicRoughness": {
                        "baseColorTexture": { "index": slot },
                        "metallicFactor": 0.0,
                        "roughnessFactor": 1.0
                    },
                    "doubleSided": true
                })
            }
            BatchKind::Material(material) => {
                let alpha_mode = if material.transparency > 0.0 { "BLEND" } else { "OPAQUE" };
                json!({
                    "name": batch.name,
                    "pbrMetallicRoughness": {
                        "baseColorFactor": material.rgba(),
                        "metallicFactor": 0.0,
                        "roughnessFactor": 1.0
                    },
                    "alphaMode": alpha_mode,
                    "doubleSided": true
                })
            }
        };
        materials.push(material);

        let mut attributes = json!({ "POSITION": 0, "NORMAL": 1 });
        if let (true, Some(uv_accessor)) = (batch.is_textured(), uv_accessor) {
            attributes["TEXCOORD_0"] = json!(uv_accessor);
        }
        primitives.push(json!({
            "attributes": attributes,
            "indices": accessor,
            "material": materials.len() - 1,
            "mode": 4
        }));
    }

    let mut gltf = json!({
        "asset": {
            "generator": concat!("citykml ", env!("CARGO_PKG_VERSION")),
            "version": "2.0"
        },
        "scene": 0,
        "scenes": [{ "nodes": [0] }],
        "nodes": [{ "mesh": 0 }],
        "meshes": [{ "primitives": primitives }],
        "materials": materials,
        "accessors": accessors,
        "bufferViews": buffer_views,
        "buffers": [{
            "byteLength": buffer_data.len(),
            "uri": format!("data:application/octet-stream;base64,{}", STANDARD.encode(&buffer_data))
        }]
    });
    if !images.is_empty() {
        gltf["images"] = json!(images);
        gltf["textures"] = json!(textures);
        gltf["samplers"] = json!([{ "wrapS": 10497, "wrapT": 10497 }]);
    }
    Ok(gltf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{ExportContext, MeshAssembler, SurfaceAppearance};
    use nalgebra::Point3;
    use tempfile::TempDir;

    fn mesh() -> MeshBundle {
        let mut ctx = ExportContext::new("box", 1);
        let ring = vec![
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(2.0, 0.0, 0.0),
            Point3::new(2.0, 2.0, 0.0),
            Point3::new(0.0, 2.0, 0.0),
        ];
        ctx.add_surface(1, &[ring], None, SurfaceAppearance::None).unwrap();
        MeshAssembler::default().assemble(&ctx)
    }

    #[test]
    fn test_gltf_has_embedded_buffer() {
        let gltf = create_gltf_json(&mesh()).unwrap();
        assert_eq!(gltf["asset"]["version"], "2.0");
        let uri = gltf["buffers"][0]["uri"].as_str().unwrap();
        assert!(uri.starts_with("data:application/octet-stream;base64,"));
        let decoded = STANDARD.decode(&uri[uri.find(',').unwrap() + 1..]).unwrap();
        assert_eq!(decoded.len() as u64, gltf["buffers"][0]["byteLength"].as_u64().unwrap());
        assert_eq!(gltf["meshes"][0]["primitives"].as_array().unwrap().len(), 1);
        assert_eq!(gltf["accessors"][2]["count"], 6);
    }

    #[test]
    fn test_positions_are_y_up() {
        let gltf = create_gltf_json(&mesh()).unwrap();
        // the square spans y in the source frame, z in glTF
        let max = &gltf["accessors"][0]["max"];
        let min = &gltf["accessors"][0]["min"];
        assert_eq!(max[1].as_f64().unwrap(), min[1].as_f64().unwrap());
        assert_eq!(max[2].as_f64().unwrap() - min[2].as_f64().unwrap(), 2.0);
    }

    #[test]
    fn test_converter_writes_next_to_mesh() {
        let dir = TempDir::new().unwrap();
        let dae = dir.path().join("box.dae");
        std::fs::write(&dae, "<COLLADA/>").unwrap();
        let output = GltfConverter.convert(&dae, &mesh()).unwrap();
        assert_eq!(output, dir.path().join("box.gltf"));
        assert!(output.exists());
    }

    #[test]
    fn test_external_converter_failure() {
        let converter = ExternalConverter {
            program: PathBuf::from("/nonexistent/converter"),
            args: vec!["{input}".to_string()],
            extension: "glb".to_string(),
        };
        assert!(converter.convert(Path::new("x.dae"), &mesh()).is_err());
    }
}
