// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! Reader for city object groups

use super::{
    assemble_rows, resolve_ladder, AssembleOptions, AssembleReport, DisplayForm,
    FeatureCategory, GeometryReader, LodRequest, LodResolution,
};
use crate::db::{FeatureRecord, FeatureStore, GeometryRow};
use crate::error::Result;
use crate::geometry::ExportContext;
use ahash::AHashSet;
use std::collections::BTreeMap;
use tracing::debug;

/// Groups render their own geometry. With `merge_members` set, a group
/// without geometry of its own renders its members as one merged object.
#[derive(Debug, Clone, Copy)]
pub struct GroupReader {
    merge_members: bool,
}

impl GroupReader {
    pub fn new(merge_members: bool) -> Self {
        Self { merge_members }
    }

    fn resolve_members(
        &self,
        store: &dyn FeatureStore,
        group: &FeatureRecord,
        lod: LodRequest,
        form: DisplayForm,
    ) -> Result<LodResolution> {
        let mut visited = AHashSet::new();
        let mut pending = vec![group.id];
        let mut rows = Vec::new();
        let mut best: Option<u8> = None;

        while let Some(group_id) = pending.pop() {
            if !visited.insert(group_id) {
                continue;
            }
            for member in store.group_members(group_id)? {
                match member.category() {
                    Some(FeatureCategory::Group) => pending.push(member.id),
                    Some(category) => {
                        if let LodResolution::Resolved {
                            lod: member_lod,
                            rows: member_rows,
                            ..
                        } = resolve_ladder(store, member.id, category, lod, form)?
                        {
                            best = Some(best.map_or(member_lod, |b| b.max(member_lod)));
                            rows.extend(member_rows);
                        }
                    }
                    None => debug!(member = member.id, class_id = member.class_id, "Unknown member class"),
                }
            }
        }

        Ok(match best {
            Some(lod) => LodResolution::Resolved {
                lod,
                rows,
                reversed_rings: false,
            },
            None => LodResolution::Unavailable,
        })
    }
}

impl GeometryReader for GroupReader {
    fn category(&self) -> FeatureCategory {
        FeatureCategory::Group
    }

    fn resolve_geometry_at_lod(
        &self,
        store: &dyn FeatureStore,
        feature: &FeatureRecord,
        lod: LodRequest,
        form: DisplayForm,
    ) -> Result<LodResolution> {
        let own = resolve_ladder(store, feature.id, FeatureCategory::Group, lod, form)?;
        if own != LodResolution::Unavailable || !self.merge_members || form.is_footprint_based() {
            return Ok(own);
        }
        self.resolve_members(store, feature, lod, form)
    }

    /// Rows of each member go through their own context first and are then
    /// merged, so surface ids and texture names never collide.
    fn assemble(
        &self,
        store: &dyn FeatureStore,
        resolution: &LodResolution,
        ctx: &mut ExportContext,
        options: &AssembleOptions,
    ) -> Result<AssembleReport> {
        let mut by_feature: BTreeMap<i64, Vec<GeometryRow>> = BTreeMap::new();
        for row in resolution.rows() {
            by_feature.entry(row.feature_id).or_default().push(row.clone());
        }
        if by_feature.len() <= 1 {
            return assemble_rows(store, resolution.rows(), ctx, options);
        }

        let mut report = AssembleReport::default();
        for (feature_id, rows) in by_feature {
            let mut member = ExportContext::new(format!("{}_{}", ctx.name(), feature_id), feature_id);
            let member_report = assemble_rows(store, &rows, &mut member, options)?;
            report.surfaces += member_report.surfaces;
            report.skipped += member_report.skipped;
            report.other_geometries.extend(member_report.other_geometries);
            ctx.merge(member);
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{GeometryPayload, SqliteStore};
    use crate::model::SurfaceType;

    fn feature(id: i64, class_id: i32) -> FeatureRecord {
        FeatureRecord {
            id,
            gmlid: format!("F{}", id),
            class_id,
            envelope: None,
            name: None,
            description: None,
        }
    }

    fn wall(id: i64, feature_id: i64, lod: u8) -> GeometryRow {
        GeometryRow {
            id,
            feature_id,
            root_id: id,
            lod,
            surface_type: SurfaceType::Wall,
            payload: GeometryPayload::polygon(vec![vec![
                [0.0, 0.0, 0.0],
                [1.0, 0.0, 0.0],
                [1.0, 0.0, 1.0],
                [0.0, 0.0, 1.0],
            ]]),
            implicit: None,
        }
    }

    fn store() -> SqliteStore {
        let store = SqliteStore::open_in_memory().unwrap();
        store.create_schema().unwrap();
        store.insert_feature(&feature(1, 23)).unwrap();
        store.insert_feature(&feature(2, 26)).unwrap();
        store.insert_feature(&feature(3, 21)).unwrap();
        store.insert_feature(&feature(4, 23)).unwrap();
        store.add_group_member(1, 2).unwrap();
        store.add_group_member(1, 4).unwrap();
        store.add_group_member(4, 3).unwrap();
        // cycle back to the outer group
        store.add_group_member(4, 1).unwrap();
        store.insert_geometry(&wall(20, 2, 2)).unwrap();
        store.insert_geometry(&wall(30, 3, 1)).unwrap();
        store
    }

    #[test]
    fn test_group_without_geometry_is_unavailable_unless_merging() {
        let store = store();
        let group = feature(1, 23);
        let plain = GroupReader::new(false)
            .resolve_geometry_at_lod(&store, &group, LodRequest::Lod(2), DisplayForm::Collada)
            .unwrap();
        assert_eq!(plain, LodResolution::Unavailable);

        let merged = GroupReader::new(true)
            .resolve_geometry_at_lod(&store, &group, LodRequest::Lod(2), DisplayForm::Collada)
            .unwrap();
        assert_eq!(merged.lod(), Some(2));
        assert_eq!(merged.rows().len(), 2);
    }

    #[test]
    fn test_merged_members_share_one_context() {
        let store = store();
        let reader = GroupReader::new(true);
        let resolution = reader
            .resolve_geometry_at_lod(&store, &feature(1, 23), LodRequest::Lod(2), DisplayForm::Collada)
            .unwrap();
        let mut ctx = ExportContext::new("G1", 1);
        let report = reader
            .assemble(&store, &resolution, &mut ctx, &AssembleOptions::default())
            .unwrap();
        assert_eq!(report.surfaces, 2);
        assert_eq!(ctx.surfaces().len(), 2);
        // identical walls dedup to one set of corners
        assert_eq!(ctx.vertices().len(), 4);
        assert_eq!(ctx.id_range(), Some((1, 3)));
    }
}
