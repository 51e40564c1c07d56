// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! Coordinate reference systems, vertical offsets and elevation lookup

mod crs;
mod elevation;
mod offset;

pub use crs::{CrsTransform, GeoReference, Projection, TransverseMercator, Wgs84};
pub use elevation::{split_batches, ElevationService, HttpElevationService, RateLimiter};
pub use offset::{bottom_zero, offset_attribute_name, CachedOffset, OffsetResolver, SERVICE_MODE_TAG};
