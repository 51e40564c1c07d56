// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! KMZ packaging

use crate::error::Result;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;
use zip::write::{ExtendedFileOptions, FileOptions, ZipWriter};
use zip::CompressionMethod;

/// Forward-slash path of `file` relative to `root`.
pub(super) fn relative_path(root: &Path, file: &Path) -> String {
    let relative = file.strip_prefix(root).unwrap_or(file);
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Pack `files` (below `root`) into a KMZ at `path`. `root_document` is
/// stored first, which makes it the document viewers open.
pub fn write_kmz(path: &Path, root: &Path, root_document: &Path, files: &[PathBuf]) -> Result<()> {
    let file = File::create(path)?;
    let mut zip = ZipWriter::new(file);
    let options: FileOptions<ExtendedFileOptions> =
        FileOptions::default().compression_method(CompressionMethod::Deflated);

    let mut entries: Vec<&PathBuf> = files.iter().filter(|f| f.as_path() != root_document).collect();
    entries.sort();
    let root_document = root_document.to_path_buf();
    for file in std::iter::once(&root_document).chain(entries) {
        let name = relative_path(root, file);
        zip.start_file(name.as_str(), options.clone())?;
        zip.write_all(&std::fs::read(file)?)?;
    }
    zip.finish()?;
    debug!(path = %path.display(), entries = files.len(), "KMZ written");
    Ok(())
}

/// Delete packed files and the directories they leave empty below `root`.
pub fn remove_packed(root: &Path, files: &[PathBuf]) {
    for file in files {
        if let Err(err) = std::fs::remove_file(file) {
            warn!(path = %file.display(), error = %err, "Cannot remove packed file");
        }
    }
    for entry in WalkDir::new(root)
        .min_depth(1)
        .contents_first(true)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_dir())
    {
        // only succeeds for empty directories
        let _ = std::fs::remove_dir(entry.path());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use tempfile::TempDir;

    #[test]
    fn test_root_document_comes_first() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        std::fs::create_dir_all(root.join("tiles/0_0")).unwrap();
        let master = root.join("city.kml");
        let tile = root.join("tiles/0_0/city_footprint.kml");
        let texture = root.join("tiles/0_0/a.png");
        for file in [&master, &tile, &texture] {
            std::fs::write(file, b"data").unwrap();
        }
        let files = vec![texture.clone(), tile.clone(), master.clone()];
        let kmz = root.join("city.kmz");
        write_kmz(&kmz, root, &master, &files).unwrap();

        let mut archive = zip::ZipArchive::new(File::open(&kmz).unwrap()).unwrap();
        assert_eq!(archive.len(), 3);
        assert_eq!(archive.by_index(0).unwrap().name(), "city.kml");
        let mut content = String::new();
        archive
            .by_name("tiles/0_0/city_footprint.kml")
            .unwrap()
            .read_to_string(&mut content)
            .unwrap();
        assert_eq!(content, "data");

        remove_packed(root, &files);
        assert!(!root.join("tiles").exists());
        assert!(kmz.exists());
    }
}
