// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! Work enumeration

use super::{TileKey, TilingPlan, WorkItem};
use crate::config::{SelectionConfig, TilingConfig};
use crate::coords::Projection;
use crate::db::{FeatureRecord, FeatureStore};
use crate::error::Result;
use crate::geometry::Envelope;
use crate::model::FeatureCategory;
use ahash::AHashSet;
use nalgebra::Point3;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};

/// Counters reported by [`WorkSplitter::run`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SplitStats {
    pub tiles: usize,
    pub features: usize,
    pub items: usize,
    pub groups_expanded: usize,
    pub cancelled: bool,
}

#[derive(Default)]
struct SplitState {
    emitted: AHashSet<i64>,
    visited_groups: AHashSet<i64>,
    stats: SplitStats,
}

/// Enumerates features by id list or by tile and emits one work item per
/// enabled display form
pub struct WorkSplitter<'a> {
    selection: &'a SelectionConfig,
    projection: &'a Projection,
    cancel: &'a AtomicBool,
}

impl<'a> WorkSplitter<'a> {
    pub fn new(
        selection: &'a SelectionConfig,
        projection: &'a Projection,
        cancel: &'a AtomicBool,
    ) -> Self {
        Self {
            selection,
            projection,
            cancel,
        }
    }

    fn class_ids(&self) -> Vec<i32> {
        self.selection
            .categories
            .iter()
            .flat_map(|category| category.class_ids().iter().copied())
            .collect()
    }

    /// Groups are only expanded when they can contribute members of another
    /// category.
    fn expands_groups(&self) -> bool {
        self.selection.categories.len() > 1 || !self.selection.gmlids.is_empty()
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }

    /// Spatial extent to tile: the configured bounding box, or the extent of
    /// all selected features for bounding-box exports without one.
    pub fn extent(
        &self,
        store: &dyn FeatureStore,
        tiling: &TilingConfig,
    ) -> Result<Option<Envelope>> {
        if let Some([min_x, min_y, max_x, max_y]) = tiling.bbox {
            return Ok(Some(Envelope::new(
                Point3::new(min_x, min_y, 0.0),
                Point3::new(max_x, max_y, 0.0),
            )));
        }
        if !self.selection.gmlids.is_empty() {
            return Ok(None);
        }
        store.extent(&self.class_ids())
    }

    /// Enumerate work into `sink` until done, cancelled, or `sink` returns
    /// `false`. Store errors abort the run.
    pub fn run(
        &self,
        store: &dyn FeatureStore,
        plan: &TilingPlan,
        sink: &mut dyn FnMut(WorkItem) -> bool,
    ) -> Result<SplitStats> {
        let mut state = SplitState::default();
        if self.selection.gmlids.is_empty() {
            self.run_tiles(store, plan, sink, &mut state)?;
        } else {
            self.run_ids(store, plan, sink, &mut state)?;
        }
        state.stats.cancelled = self.is_cancelled();
        info!(
            tiles = state.stats.tiles,
            features = state.stats.features,
            items = state.stats.items,
            cancelled = state.stats.cancelled,
            "Work splitting finished"
        );
        Ok(state.stats)
    }

    fn run_tiles(
        &self,
        store: &dyn FeatureStore,
        plan: &TilingPlan,
        sink: &mut dyn FnMut(WorkItem) -> bool,
        state: &mut SplitState,
    ) -> Result<()> {
        let class_ids = self.class_ids();
        for tile in plan.tiles() {
            if self.is_cancelled() {
                return Ok(());
            }
            let Some(bounds) = tile.bounds.as_ref().or(plan.extent.as_ref()) else {
                continue;
            };
            state.stats.tiles += 1;
            let candidates = store.features_in_envelope(bounds, &class_ids)?;
            debug!(tile = %tile.key, candidates = candidates.len(), "Scanning tile");

            for feature in candidates {
                if self.is_cancelled() {
                    return Ok(());
                }
                let place = |f: &FeatureRecord| {
                    tile.accepts_envelope(f.envelope.as_ref()).then_some(tile.key)
                };
                if !self.submit(store, feature, &place, sink, state)? {
                    return Ok(());
                }
            }
        }
        Ok(())
    }

    fn run_ids(
        &self,
        store: &dyn FeatureStore,
        plan: &TilingPlan,
        sink: &mut dyn FnMut(WorkItem) -> bool,
        state: &mut SplitState,
    ) -> Result<()> {
        state.stats.tiles = plan.len();
        for gmlid in &self.selection.gmlids {
            if self.is_cancelled() {
                return Ok(());
            }
            let Some(feature) = store.feature_by_gmlid(gmlid)? else {
                warn!(gmlid = %gmlid, "No feature with this id");
                continue;
            };
            let place = |f: &FeatureRecord| plan.tile_for(f.envelope.as_ref()).map(|tile| tile.key);
            if !self.submit(store, feature, &place, sink, state)? {
                return Ok(());
            }
        }
        Ok(())
    }

    /// Emit work for a feature and, for groups, its members. Returns `false`
    /// when enumeration has to stop.
    fn submit(
        &self,
        store: &dyn FeatureStore,
        root: FeatureRecord,
        place: &dyn Fn(&FeatureRecord) -> Option<TileKey>,
        sink: &mut dyn FnMut(WorkItem) -> bool,
        state: &mut SplitState,
    ) -> Result<bool> {
        let expand = self.expands_groups();
        let mut stack = vec![root];

        while let Some(feature) = stack.pop() {
            if self.is_cancelled() {
                return Ok(false);
            }
            let Some(category) = feature.category() else {
                debug!(
                    feature_id = feature.id,
                    class_id = feature.class_id,
                    "Unknown object class"
                );
                continue;
            };
            let Some(tile) = place(&feature) else {
                continue;
            };

            if category == FeatureCategory::Group
                && expand
                && state.visited_groups.insert(feature.id)
            {
                let mut members = store.group_members(feature.id)?;
                members.reverse();
                stack.extend(members);
                state.stats.groups_expanded += 1;
            }

            if !self.selection.categories.contains(&category) || !state.emitted.insert(feature.id) {
                continue;
            }
            state.stats.features += 1;

            let wgs84_envelope = match feature.envelope.as_ref() {
                Some(envelope) => match self.projection.project_envelope(envelope) {
                    Ok(projected) => Some(projected),
                    Err(err) => {
                        warn!(gmlid = %feature.gmlid, error = %err, "Envelope projection failed");
                        None
                    }
                },
                None => None,
            };

            for form in &self.selection.forms {
                let item = WorkItem {
                    feature: feature.clone(),
                    category,
                    form: *form,
                    lod: self.selection.lod,
                    tile,
                    wgs84_envelope,
                };
                if !sink(item) {
                    return Ok(false);
                }
                state.stats.items += 1;
            }
        }
        Ok(true)
    }
}
