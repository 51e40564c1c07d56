// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! Dispatch table from (category, display form) to a reader

use super::{DisplayForm, FeatureCategory, GeometryReader, GroupReader, ThematicReader};
use ahash::AHashMap;
use std::sync::Arc;

pub struct ReaderRegistry {
    readers: AHashMap<(FeatureCategory, DisplayForm), Arc<dyn GeometryReader>>,
}

impl ReaderRegistry {
    pub fn empty() -> Self {
        Self {
            readers: AHashMap::new(),
        }
    }

    /// A reader for every category and form.
    pub fn standard(merge_group_members: bool) -> Self {
        let mut registry = Self::empty();
        let forms = [
            DisplayForm::Footprint,
            DisplayForm::Extruded,
            DisplayForm::Geometry,
            DisplayForm::Collada,
        ];
        for category in FeatureCategory::ALL {
            let reader: Arc<dyn GeometryReader> = match category {
                FeatureCategory::Group => Arc::new(GroupReader::new(merge_group_members)),
                other => Arc::new(ThematicReader::new(other)),
            };
            for form in forms {
                registry.register(category, form, Arc::clone(&reader));
            }
        }
        registry
    }

    pub fn register(
        &mut self,
        category: FeatureCategory,
        form: DisplayForm,
        reader: Arc<dyn GeometryReader>,
    ) {
        self.readers.insert((category, form), reader);
    }

    pub fn get(&self, category: FeatureCategory, form: DisplayForm) -> Option<&Arc<dyn GeometryReader>> {
        self.readers.get(&(category, form))
    }

    pub fn len(&self) -> usize {
        self.readers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.readers.is_empty()
    }
}

impl Default for ReaderRegistry {
    fn default() -> Self {
        Self::standard(false)
    }
}
