// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! Balloon (placemark description) rendering and extraction

use crate::config::BalloonConfig;
use crate::error::{ExportError, Result};
use crate::pipeline::ExportBundle;
use dashmap::DashSet;
use quick_xml::escape::escape;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Directory below the output root holding extracted balloons
pub const BALLOON_DIR: &str = "balloons";

/// Rendered description of one placemark
#[derive(Debug, Clone, PartialEq)]
pub struct Balloon {
    /// Text for the placemark `description`
    pub description: String,
    /// File written for this call, set once per feature
    pub written: Option<PathBuf>,
}

/// Renders balloons from a template or the built-in attribute table.
///
/// Template placeholders: `{gmlid}`, `{id}`, `{name}`, `{description}`,
/// `{class}`, `{lod}`, `{attributes}` (HTML table) and `{attr:NAME}`.
pub struct BalloonRenderer {
    template: Option<String>,
    extract: bool,
    root: PathBuf,
    extracted: DashSet<String>,
}

impl BalloonRenderer {
    /// `None` when balloons are disabled.
    pub fn from_config(config: &BalloonConfig, root: &Path) -> Result<Option<Self>> {
        if !config.enabled {
            return Ok(None);
        }
        let template = match &config.template {
            Some(path) => Some(std::fs::read_to_string(path).map_err(|err| {
                ExportError::Config(format!("cannot read balloon template {}: {}", path.display(), err))
            })?),
            None => None,
        };
        Ok(Some(Self {
            template,
            extract: config.extract_to_files,
            root: root.to_path_buf(),
            extracted: DashSet::new(),
        }))
    }

    /// Render the HTML for a bundle.
    pub fn html(&self, bundle: &ExportBundle) -> String {
        match &self.template {
            Some(template) => fill_template(template, bundle),
            None => default_balloon(bundle),
        }
    }

    /// Description for a placemark in a document `prefix` levels below the
    /// output root (`""`, `"../"`, ...). Extracted balloons are written once
    /// per feature.
    pub fn balloon(&self, bundle: &ExportBundle, prefix: &str) -> Result<Balloon> {
        if !self.extract {
            return Ok(Balloon {
                description: self.html(bundle),
                written: None,
            });
        }

        let file_name = format!("{}.html", bundle.object_name());
        let mut written = None;
        if self.extracted.insert(bundle.item.gmlid().to_string()) {
            let dir = self.root.join(BALLOON_DIR);
            std::fs::create_dir_all(&dir)?;
            let path = dir.join(&file_name);
            let page = format!(
                "<!DOCTYPE html>\n<html>\n<head><meta charset=\"utf-8\"><title>{}</title></head>\n<body>\n{}\n</body>\n</html>\n",
                escape(bundle.item.gmlid()),
                self.html(bundle)
            );
            std::fs::write(&path, page)?;
            debug!(gmlid = %bundle.item.gmlid(), path = %path.display(), "Balloon extracted");
            written = Some(path);
        }
        Ok(Balloon {
            description: format!(
                "<iframe src=\"{}{}/{}\" width=\"420\" height=\"320\" frameborder=\"0\"></iframe>",
                prefix, BALLOON_DIR, file_name
            ),
            written,
        })
    }
}

fn attribute_table(bundle: &ExportBundle) -> String {
    let mut html = String::from("<table border=\"1\" cellpadding=\"2\">\n");
    for (name, value) in &bundle.attributes {
        html.push_str(&format!("<tr><td>{}</td><td>{}</td></tr>\n", escape(name), escape(value)));
    }
    html.push_str("</table>");
    html
}

fn default_balloon(bundle: &ExportBundle) -> String {
    let feature = &bundle.item.feature;
    let mut html = format!("<h3>{}</h3>\n", escape(feature.name.as_deref().unwrap_or(&feature.gmlid)));
    html.push_str(&format!(
        "<p>{} {} (LOD {})</p>\n",
        bundle.item.category,
        escape(&feature.gmlid),
        bundle.lod
    ));
    if let Some(description) = &feature.description {
        html.push_str(&format!("<p>{}</p>\n", escape(description)));
    }
    if !bundle.attributes.is_empty() {
        html.push_str(&attribute_table(bundle));
    }
    html
}

fn fill_template(template: &str, bundle: &ExportBundle) -> String {
    let feature = &bundle.item.feature;
    let mut html = template
        .replace("{gmlid}", &escape(&feature.gmlid))
        .replace("{id}", &feature.id.to_string())
        .replace("{name}", &escape(feature.name.as_deref().unwrap_or_default()))
        .replace("{description}", &escape(feature.description.as_deref().unwrap_or_default()))
        .replace("{class}", bundle.item.category.as_str())
        .replace("{lod}", &bundle.lod.to_string())
        .replace("{attributes}", &attribute_table(bundle));

    // {attr:NAME}, unknown names render empty
    let mut out = String::with_capacity(html.len());
    while let Some(start) = html.find("{attr:") {
        let Some(len) = html[start..].find('}') else {
            break;
        };
        let name = &html[start + 6..start + len];
        let value = bundle
            .attributes
            .iter()
            .find(|(attr, _)| attr == name)
            .map(|(_, value)| escape(value).into_owned())
            .unwrap_or_default();
        out.push_str(&html[..start]);
        out.push_str(&value);
        html = html[start + len + 1..].to_string();
    }
    out.push_str(&html);
    out
}
