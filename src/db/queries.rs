// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! SQL text used by the SQLite store

pub const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS cityobject (
    id INTEGER PRIMARY KEY,
    gmlid TEXT NOT NULL UNIQUE,
    objectclass_id INTEGER NOT NULL,
    name TEXT,
    description TEXT,
    envelope_xmin REAL,
    envelope_ymin REAL,
    envelope_zmin REAL,
    envelope_xmax REAL,
    envelope_ymax REAL,
    envelope_zmax REAL
);
CREATE INDEX IF NOT EXISTS cityobject_class_idx ON cityobject (objectclass_id);

CREATE TABLE IF NOT EXISTS group_to_cityobject (
    group_id INTEGER NOT NULL REFERENCES cityobject (id),
    cityobject_id INTEGER NOT NULL REFERENCES cityobject (id),
    PRIMARY KEY (group_id, cityobject_id)
);

CREATE TABLE IF NOT EXISTS surface_geometry (
    id INTEGER PRIMARY KEY,
    cityobject_id INTEGER NOT NULL REFERENCES cityobject (id),
    root_id INTEGER NOT NULL,
    lod INTEGER NOT NULL,
    surface_type TEXT,
    geometry TEXT NOT NULL,
    implicit TEXT
);
CREATE INDEX IF NOT EXISTS surface_geometry_lod_idx ON surface_geometry (cityobject_id, lod);
CREATE INDEX IF NOT EXISTS surface_geometry_root_idx ON surface_geometry (root_id);

CREATE TABLE IF NOT EXISTS appearance (
    surface_geometry_id INTEGER NOT NULL REFERENCES surface_geometry (id),
    theme TEXT,
    tex_image_uri TEXT,
    tex_coords TEXT,
    material TEXT
);
CREATE INDEX IF NOT EXISTS appearance_surface_idx ON appearance (surface_geometry_id);

CREATE TABLE IF NOT EXISTS tex_image (
    uri TEXT PRIMARY KEY,
    data BLOB NOT NULL
);

CREATE TABLE IF NOT EXISTS cityobject_genericattrib (
    cityobject_id INTEGER NOT NULL REFERENCES cityobject (id),
    attrname TEXT NOT NULL,
    strval TEXT,
    PRIMARY KEY (cityobject_id, attrname)
);
";

const FEATURE_COLUMNS: &str = "id, gmlid, objectclass_id, name, description, \
     envelope_xmin, envelope_ymin, envelope_zmin, envelope_xmax, envelope_ymax, envelope_zmax";

/// `?1..?4` xmin, ymin, xmax, ymax; `?5` JSON array of class ids
pub fn features_in_envelope() -> String {
    format!(
        "SELECT {} FROM cityobject \
         WHERE objectclass_id IN (SELECT value FROM json_each(?5)) \
         AND envelope_xmax >= ?1 AND envelope_xmin <= ?3 \
         AND envelope_ymax >= ?2 AND envelope_ymin <= ?4 \
         ORDER BY id",
        FEATURE_COLUMNS
    )
}

/// `?1` gml id
pub fn feature_by_gmlid() -> String {
    format!("SELECT {} FROM cityobject WHERE gmlid = ?1", FEATURE_COLUMNS)
}

/// `?1` feature id
pub fn feature_by_id() -> String {
    format!("SELECT {} FROM cityobject WHERE id = ?1", FEATURE_COLUMNS)
}

/// `?1` group id
pub fn group_members() -> String {
    format!(
        "SELECT {} FROM cityobject WHERE id IN \
         (SELECT cityobject_id FROM group_to_cityobject WHERE group_id = ?1) \
         ORDER BY id",
        FEATURE_COLUMNS
    )
}

/// `?1` JSON array of class ids
pub const EXTENT: &str = "SELECT MIN(envelope_xmin), MIN(envelope_ymin), MIN(envelope_zmin), \
     MAX(envelope_xmax), MAX(envelope_ymax), MAX(envelope_zmax) FROM cityobject \
     WHERE objectclass_id IN (SELECT value FROM json_each(?1))";

/// `?1` feature id, `?2` LOD, `?3` surface type filter or NULL
pub const GEOMETRY_AT_LOD: &str = "SELECT id, cityobject_id, root_id, lod, surface_type, geometry, implicit \
     FROM surface_geometry \
     WHERE cityobject_id = ?1 AND lod = ?2 AND (?3 IS NULL OR surface_type = ?3) \
     ORDER BY id";

/// `?1` root id, `?2` theme or NULL
pub const APPEARANCE_FOR_ROOT: &str = "SELECT a.surface_geometry_id, a.theme, a.tex_image_uri, a.tex_coords, a.material \
     FROM appearance a JOIN surface_geometry g ON g.id = a.surface_geometry_id \
     WHERE g.root_id = ?1 AND (?2 IS NULL OR a.theme = ?2) \
     ORDER BY a.surface_geometry_id";

pub const TEXTURE_BLOB: &str = "SELECT data FROM tex_image WHERE uri = ?1";

pub const GENERIC_ATTRIBUTE: &str =
    "SELECT strval FROM cityobject_genericattrib WHERE cityobject_id = ?1 AND attrname = ?2";

pub const GENERIC_ATTRIBUTES: &str =
    "SELECT attrname, strval FROM cityobject_genericattrib WHERE cityobject_id = ?1 ORDER BY attrname";

pub const UPSERT_GENERIC_ATTRIBUTE: &str =
    "INSERT INTO cityobject_genericattrib (cityobject_id, attrname, strval) VALUES (?1, ?2, ?3) \
     ON CONFLICT (cityobject_id, attrname) DO UPDATE SET strval = excluded.strval";

pub const INSERT_FEATURE: &str = "INSERT INTO cityobject (id, gmlid, objectclass_id, name, description, \
     envelope_xmin, envelope_ymin, envelope_zmin, envelope_xmax, envelope_ymax, envelope_zmax) \
     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)";

pub const INSERT_GROUP_MEMBER: &str =
    "INSERT OR IGNORE INTO group_to_cityobject (group_id, cityobject_id) VALUES (?1, ?2)";

pub const INSERT_GEOMETRY: &str = "INSERT INTO surface_geometry (id, cityobject_id, root_id, lod, surface_type, geometry, implicit) \
     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)";

pub const INSERT_APPEARANCE: &str = "INSERT INTO appearance (surface_geometry_id, theme, tex_image_uri, tex_coords, material) \
     VALUES (?1, ?2, ?3, ?4, ?5)";

pub const INSERT_TEXTURE: &str = "INSERT OR REPLACE INTO tex_image (uri, data) VALUES (?1, ?2)";
