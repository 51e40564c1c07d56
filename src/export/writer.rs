// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! Writer stage: documents, meshes, textures and archives

use super::archive::{relative_path, remove_packed, write_kmz};
use super::balloon::BalloonRenderer;
use super::collada::write_collada;
use super::gltf::{converter_from_config, MeshConverter};
use super::kml::{self, Link};
use super::metadata::{write_metadata, FeatureEntry};
use crate::config::{ExportConfig, StylesConfig};
use crate::error::Result;
use crate::geometry::Envelope;
use crate::model::DisplayForm;
use crate::pipeline::{BundleContent, ExportBundle, ModelContent, TileKey, TilingPlan};
use dashmap::DashMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info, warn};

/// Directory below the output root holding tile documents
pub const TILE_DIR: &str = "tiles";

/// One aggregated KML document, opened on its first placemark
struct DocumentSink {
    path: PathBuf,
    title: String,
    form: DisplayForm,
    out: Option<BufWriter<File>>,
    /// WGS84 bounds of the placemarks written so far
    envelope: Option<Envelope>,
    placemarks: usize,
}

impl DocumentSink {
    fn new(path: PathBuf, title: String, form: DisplayForm) -> Self {
        Self {
            path,
            title,
            form,
            out: None,
            envelope: None,
            placemarks: 0,
        }
    }

    fn append(&mut self, fragment: &str, styles: &StylesConfig) -> Result<()> {
        if self.out.is_none() {
            if let Some(parent) = self.path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let mut out = BufWriter::new(File::create(&self.path)?);
            out.write_all(kml::document_header(&self.title, self.form, styles)?.as_bytes())?;
            self.out = Some(out);
        }
        if let Some(out) = self.out.as_mut() {
            out.write_all(b"\n")?;
            out.write_all(fragment.as_bytes())?;
            self.placemarks += 1;
        }
        Ok(())
    }

    fn include(&mut self, envelope: &Envelope) {
        match &mut self.envelope {
            Some(bounds) => bounds.merge(envelope),
            None => self.envelope = Some(*envelope),
        }
    }

    /// Close the document; `None` when nothing was written.
    fn close(&mut self) -> Result<Option<PathBuf>> {
        let Some(mut out) = self.out.take() else {
            return Ok(None);
        };
        out.write_all(kml::DOCUMENT_FOOTER.as_bytes())?;
        out.flush()?;
        Ok(Some(self.path.clone()))
    }
}

/// Serializes bundles. Shared by all writer threads; every document sink is
/// guarded by its own mutex.
pub struct ExportWriter {
    config: Arc<ExportConfig>,
    root: PathBuf,
    tiled: bool,
    rows: u32,
    columns: u32,
    documents: DashMap<(TileKey, DisplayForm), Arc<Mutex<DocumentSink>>>,
    balloons: Option<BalloonRenderer>,
    converter: Option<Box<dyn MeshConverter>>,
    files: Mutex<Vec<PathBuf>>,
    features: Mutex<Vec<FeatureEntry>>,
}

impl ExportWriter {
    pub fn new(config: Arc<ExportConfig>, plan: &TilingPlan) -> Result<Self> {
        let root = config.output.directory.clone();
        std::fs::create_dir_all(&root)?;
        let balloons = BalloonRenderer::from_config(&config.balloon, &root)?;
        let converter = converter_from_config(&config.collada.converter)?;
        Ok(Self {
            root,
            tiled: plan.is_tiled(),
            rows: plan.rows,
            columns: plan.columns,
            documents: DashMap::new(),
            balloons,
            converter,
            files: Mutex::new(Vec::new()),
            features: Mutex::new(Vec::new()),
            config,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn document_dir(&self, tile: TileKey) -> PathBuf {
        if self.tiled {
            self.root.join(TILE_DIR).join(tile.to_string())
        } else {
            self.root.clone()
        }
    }

    /// Relative path from a tile document back to the output root
    fn root_prefix(&self) -> &'static str {
        if self.tiled {
            "../../"
        } else {
            ""
        }
    }

    fn document_path(&self, tile: TileKey, form: DisplayForm) -> PathBuf {
        self.document_dir(tile)
            .join(format!("{}_{}.kml", self.config.output.name, form))
    }

    fn record(&self, path: PathBuf) {
        self.files.lock().unwrap_or_else(PoisonError::into_inner).push(path);
    }

    fn forget(&self, path: &Path) {
        self.files
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|file| file != path);
    }

    /// Serialize one bundle into its tile document.
    pub fn write(&self, bundle: ExportBundle) -> Result<()> {
        let tile = bundle.item.tile;
        let form = bundle.item.form;
        let object = bundle.object_name();
        let dir = self.document_dir(tile);
        let per_object = self.config.output.one_file_per_object;

        let mut prefix = self.root_prefix().to_string();
        if per_object {
            prefix.push_str("../");
        }

        let model_href = match &bundle.content {
            BundleContent::Model(model) => {
                let file = self.write_model(&dir.join(&object), &object, model)?;
                Some(if per_object { file } else { format!("{}/{}", object, file) })
            }
            BundleContent::Polygons { .. } => None,
        };

        let description = match &self.balloons {
            Some(renderer) => {
                let balloon = renderer.balloon(&bundle, &prefix)?;
                if let Some(path) = balloon.written {
                    self.record(path);
                }
                Some(balloon.description)
            }
            None => None,
        };

        let mut fragment = kml::placemarks(&bundle, description.as_deref(), model_href.as_deref())?;
        let document = self.document_path(tile, form);
        let mut placemark_document = document.clone();
        if per_object {
            let file_name = format!("{}_{}.kml", object, form);
            let path = dir.join(&object).join(&file_name);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let text = kml::document(bundle.item.gmlid(), form, &self.config.styles, &fragment)?;
            std::fs::write(&path, text)?;
            self.record(path.clone());
            placemark_document = path;
            fragment = kml::network_link(&Link {
                name: bundle.item.gmlid().to_string(),
                href: format!("{}/{}", object, file_name),
                region: None,
            })?;
        }

        let sink = Arc::clone(
            self.documents
                .entry((tile, form))
                .or_insert_with(|| {
                    let title = format!("{} {} {}", self.config.output.name, form, tile);
                    Arc::new(Mutex::new(DocumentSink::new(document, title, form)))
                })
                .value(),
        );
        {
            let mut sink = sink.lock().unwrap_or_else(PoisonError::into_inner);
            sink.append(&fragment, &self.config.styles)?;
            if let Some(envelope) = &bundle.item.wgs84_envelope {
                sink.include(envelope);
            }
        }

        debug!(gmlid = %bundle.item.gmlid(), form = %form, tile = %tile, lod = bundle.lod, "Object written");
        self.features
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(FeatureEntry::from_bundle(
                &bundle,
                relative_path(&self.root, &placemark_document),
            ));
        Ok(())
    }

    /// Write mesh, textures and the converted mesh into `dir`. Returns the
    /// file name the placemark links to.
    fn write_model(&self, dir: &Path, object: &str, model: &ModelContent) -> Result<String> {
        std::fs::create_dir_all(dir)?;
        for (name, image) in &model.textures {
            let path = dir.join(name);
            std::fs::write(&path, image.to_bytes(name)?)?;
            self.record(path);
        }

        let dae = dir.join(format!("{}.dae", object));
        std::fs::write(&dae, write_collada(&model.mesh, object)?)?;
        self.record(dae.clone());

        let mut linked = dae.clone();
        if let Some(converter) = &self.converter {
            match converter.convert(&dae, &model.mesh) {
                Ok(converted) => {
                    self.record(converted.clone());
                    if self.config.collada.converter.delete_intermediate {
                        std::fs::remove_file(&dae)?;
                        self.forget(&dae);
                        linked = converted;
                    }
                }
                Err(err) => warn!(object, error = %err, "Mesh conversion failed, keeping COLLADA"),
            }
        }
        Ok(linked
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default())
    }

    /// Close every document and write the master document, metadata and
    /// archive. Returns the produced top-level files.
    pub fn finish(self) -> Result<Vec<PathBuf>> {
        let config = &self.config;
        let mut files = self.files.into_inner().unwrap_or_else(PoisonError::into_inner);

        let mut sinks: Vec<_> = self.documents.into_iter().collect();
        sinks.sort_by_key(|(key, _)| *key);

        let mut links = Vec::with_capacity(sinks.len());
        for ((tile, form), sink) in sinks {
            let mut sink = sink.lock().unwrap_or_else(PoisonError::into_inner);
            let placemarks = sink.placemarks;
            let envelope = sink.envelope;
            let Some(path) = sink.close()? else {
                continue;
            };
            debug!(path = %path.display(), placemarks, "Document closed");
            links.push(Link {
                name: if self.tiled {
                    format!("{} {}", form, tile)
                } else {
                    form.to_string()
                },
                href: relative_path(&self.root, &path),
                region: if self.tiled {
                    envelope.map(|e| (e, config.styles.visibility(form)))
                } else {
                    None
                },
            });
            files.push(path);
        }

        let master = self.root.join(format!("{}.kml", config.output.name));
        std::fs::write(&master, kml::master_document(&config.output.name, &links)?)?;
        files.push(master.clone());

        let mut outputs = if config.output.kmz {
            let kmz = self.root.join(format!("{}.kmz", config.output.name));
            write_kmz(&kmz, &self.root, &master, &files)?;
            remove_packed(&self.root, &files);
            vec![kmz]
        } else {
            files
        };

        if config.output.write_metadata {
            let path = self.root.join(format!("{}.json", config.output.name));
            let mut features = self.features.into_inner().unwrap_or_else(PoisonError::into_inner);
            write_metadata(&path, &config.output.name, self.rows, self.columns, &mut features)?;
            outputs.push(path);
        }

        info!(
            directory = %self.root.display(),
            documents = links.len(),
            files = outputs.len(),
            "Output written"
        );
        Ok(outputs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AltitudeMode;
    use crate::db::FeatureRecord;
    use crate::model::{FeatureCategory, LodRequest, SurfaceType};
    use crate::pipeline::{KmlPolygon, WorkItem};
    use nalgebra::Point3;
    use tempfile::TempDir;

    fn bundle(id: i64, tile: TileKey, x: f64) -> ExportBundle {
        let ring = vec![
            Point3::new(x, 52.0, 0.0),
            Point3::new(x + 0.001, 52.0, 0.0),
            Point3::new(x + 0.001, 52.001, 0.0),
        ];
        ExportBundle {
            item: WorkItem {
                feature: FeatureRecord {
                    id,
                    gmlid: format!("BLDG_{}", id),
                    class_id: 26,
                    envelope: None,
                    name: None,
                    description: None,
                },
                category: FeatureCategory::Building,
                form: DisplayForm::Footprint,
                lod: LodRequest::Lod(1),
                tile,
                wgs84_envelope: Some(Envelope::from_points(&ring)),
            },
            lod: 1,
            offset: 0.0,
            altitude_mode: AltitudeMode::ClampToGround,
            content: BundleContent::Polygons {
                polygons: vec![KmlPolygon {
                    surface_type: SurfaceType::Ground,
                    rings: vec![ring],
                }],
                lines: Vec::new(),
                extrude: None,
            },
            attributes: Vec::new(),
        }
    }

    fn config(dir: &Path) -> ExportConfig {
        let mut config = ExportConfig::default();
        config.output.directory = dir.to_path_buf();
        config.output.name = "city".to_string();
        config.balloon.enabled = false;
        config
    }

    fn plan() -> TilingPlan {
        let extent = Envelope::new(Point3::new(0.0, 0.0, 0.0), Point3::new(10.0, 10.0, 0.0));
        TilingPlan::grid(extent, 1, 2).unwrap()
    }

    #[test]
    fn test_tiled_documents_and_master() {
        let dir = TempDir::new().unwrap();
        let writer = ExportWriter::new(Arc::new(config(dir.path())), &plan()).unwrap();
        writer.write(bundle(1, TileKey::new(0, 0), 13.0)).unwrap();
        writer.write(bundle(2, TileKey::new(0, 1), 13.1)).unwrap();
        writer.write(bundle(3, TileKey::new(0, 1), 13.2)).unwrap();
        let outputs = writer.finish().unwrap();

        let tile = dir.path().join("tiles/0_1/city_footprint.kml");
        let text = std::fs::read_to_string(&tile).unwrap();
        assert_eq!(text.matches("<Placemark").count(), 2);
        assert!(text.trim_end().ends_with("</kml>"));

        let master = std::fs::read_to_string(dir.path().join("city.kml")).unwrap();
        assert_eq!(master.matches("<NetworkLink>").count(), 2);
        assert!(master.contains("<href>tiles/0_1/city_footprint.kml</href>"));
        assert!(master.contains("<east>13.201</east>"));
        assert!(outputs.contains(&dir.path().join("city.json")));
    }

    #[test]
    fn test_one_file_per_object_links() {
        let dir = TempDir::new().unwrap();
        let mut config = config(dir.path());
        config.output.one_file_per_object = true;
        let writer = ExportWriter::new(Arc::new(config), &TilingPlan::unbounded()).unwrap();
        writer.write(bundle(1, TileKey::default(), 13.0)).unwrap();
        writer.finish().unwrap();

        let object = dir.path().join("BLDG_1/BLDG_1_footprint.kml");
        assert!(std::fs::read_to_string(object).unwrap().contains("<Placemark"));
        let document = std::fs::read_to_string(dir.path().join("city_footprint.kml")).unwrap();
        assert!(document.contains("<href>BLDG_1/BLDG_1_footprint.kml</href>"));
        assert!(!document.contains("<Placemark"));
    }

    #[test]
    fn test_kmz_packs_everything() {
        let dir = TempDir::new().unwrap();
        let mut config = config(dir.path());
        config.output.kmz = true;
        config.output.write_metadata = false;
        let writer = ExportWriter::new(Arc::new(config), &plan()).unwrap();
        writer.write(bundle(1, TileKey::new(0, 0), 13.0)).unwrap();
        let outputs = writer.finish().unwrap();

        assert_eq!(outputs, vec![dir.path().join("city.kmz")]);
        assert!(!dir.path().join("tiles").exists());
        let archive = zip::ZipArchive::new(File::open(&outputs[0]).unwrap()).unwrap();
        assert_eq!(archive.len(), 2);
    }
}
