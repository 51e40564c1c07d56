// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Polyframe Inc.

//! Rectangle packing for texture atlases

use serde::{Deserialize, Serialize};

/// Packing strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PackingAlgorithm {
    /// Rows of images sorted by height
    #[default]
    Shelf,
    /// Free-rectangle list with best-area fit and guillotine splits
    Guillotine,
}

#[derive(Debug, Clone, Copy)]
pub struct PackerOptions {
    pub algorithm: PackingAlgorithm,
    pub power_of_two: bool,
    /// Maximum atlas edge length in pixels
    pub max_size: u32,
}

impl Default for PackerOptions {
    fn default() -> Self {
        Self {
            algorithm: PackingAlgorithm::Shelf,
            power_of_two: false,
            max_size: 2048,
        }
    }
}

/// Where one input rectangle ended up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Placement {
    pub atlas: usize,
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Default)]
pub struct PackResult {
    /// Atlas dimensions
    pub atlases: Vec<(u32, u32)>,
    /// One placement per input size, in input order
    pub placements: Vec<Placement>,
}

#[derive(Debug, Clone, Copy)]
struct Rect {
    x: u32,
    y: u32,
    width: u32,
    height: u32,
}

#[derive(Debug, Default)]
struct Shelf {
    y: u32,
    height: u32,
    cursor: u32,
}

#[derive(Debug)]
struct Page {
    used_width: u32,
    used_height: u32,
    shelves: Vec<Shelf>,
    free: Vec<Rect>,
}

impl Page {
    fn new(max_size: u32) -> Self {
        Self {
            used_width: 0,
            used_height: 0,
            shelves: Vec::new(),
            free: vec![Rect {
                x: 0,
                y: 0,
                width: max_size,
                height: max_size,
            }],
        }
    }

    fn grow(&mut self, x: u32, y: u32, width: u32, height: u32) {
        self.used_width = self.used_width.max(x + width);
        self.used_height = self.used_height.max(y + height);
    }

    fn place_shelf(&mut self, width: u32, height: u32, max_size: u32) -> Option<(u32, u32)> {
        for shelf in self.shelves.iter_mut() {
            if height <= shelf.height && shelf.cursor + width <= max_size {
                let x = shelf.cursor;
                shelf.cursor += width;
                return Some((x, shelf.y));
            }
        }
        let y = self.shelves.last().map(|s| s.y + s.height).unwrap_or(0);
        if y + height > max_size || width > max_size {
            return None;
        }
        self.shelves.push(Shelf {
            y,
            height,
            cursor: width,
        });
        Some((0, y))
    }

    fn place_guillotine(&mut self, width: u32, height: u32) -> Option<(u32, u32)> {
        let best = self
            .free
            .iter()
            .enumerate()
            .filter(|(_, r)| r.width >= width && r.height >= height)
            .min_by_key(|(_, r)| (r.width as u64 * r.height as u64, r.y, r.x))
            .map(|(i, _)| i)?;
        let rect = self.free.swap_remove(best);

        let right_w = rect.width - width;
        let below_h = rect.height - height;
        // Split along the shorter leftover axis.
        let (right, below) = if right_w < below_h {
            (
                Rect {
                    x: rect.x + width,
                    y: rect.y,
                    width: right_w,
                    height,
                },
                Rect {
                    x: rect.x,
                    y: rect.y + height,
                    width: rect.width,
                    height: below_h,
                },
            )
        } else {
            (
                Rect {
                    x: rect.x + width,
                    y: rect.y,
                    width: right_w,
                    height: rect.height,
                },
                Rect {
                    x: rect.x,
                    y: rect.y + height,
                    width,
                    height: below_h,
                },
            )
        };
        for r in [right, below] {
            if r.width > 0 && r.height > 0 {
                self.free.push(r);
            }
        }
        Some((rect.x, rect.y))
    }
}

fn round_size(value: u32, power_of_two: bool) -> u32 {
    let value = value.max(1);
    if power_of_two {
        value.next_power_of_two()
    } else {
        value
    }
}

/// Pack rectangles into as few atlases as needed.
///
/// Rectangles are placed tallest first. A rectangle larger than `max_size` on
/// either edge gets an atlas of its own.
pub fn pack(sizes: &[(u32, u32)], options: &PackerOptions) -> PackResult {
    let max_size = options.max_size.max(1);
    let mut order: Vec<usize> = (0..sizes.len()).collect();
    order.sort_by(|&a, &b| {
        let (wa, ha) = sizes[a];
        let (wb, hb) = sizes[b];
        hb.cmp(&ha).then(wb.cmp(&wa)).then(a.cmp(&b))
    });

    let mut pages: Vec<Page> = Vec::new();
    let mut placements: Vec<Option<Placement>> = vec![None; sizes.len()];

    for index in order {
        let (width, height) = sizes[index];
        let (width, height) = (width.max(1), height.max(1));

        if width > max_size || height > max_size {
            let mut page = Page::new(0);
            page.free.clear();
            page.grow(0, 0, width, height);
            pages.push(page);
            placements[index] = Some(Placement {
                atlas: pages.len() - 1,
                x: 0,
                y: 0,
                width,
                height,
            });
            continue;
        }

        let mut placed = None;
        for (page_index, page) in pages.iter_mut().enumerate() {
            if page.free.is_empty() && page.shelves.is_empty() && page.used_width > 0 {
                continue;
            }
            let spot = match options.algorithm {
                PackingAlgorithm::Shelf => page.place_shelf(width, height, max_size),
                PackingAlgorithm::Guillotine => page.place_guillotine(width, height),
            };
            if let Some((x, y)) = spot {
                page.grow(x, y, width, height);
                placed = Some((page_index, x, y));
                break;
            }
        }

        let (atlas, x, y) = match placed {
            Some(spot) => spot,
            None => {
                let mut page = Page::new(max_size);
                let spot = match options.algorithm {
                    PackingAlgorithm::Shelf => page.place_shelf(width, height, max_size),
                    PackingAlgorithm::Guillotine => page.place_guillotine(width, height),
                };
                let (x, y) = spot.unwrap_or((0, 0));
                page.grow(x, y, width, height);
                pages.push(page);
                (pages.len() - 1, x, y)
            }
        };
        placements[index] = Some(Placement {
            atlas,
            x,
            y,
            width,
            height,
        });
    }

    PackResult {
        atlases: pages
            .iter()
            .map(|p| {
                (
                    round_size(p.used_width, options.power_of_two),
                    round_size(p.used_height, options.power_of_two),
                )
            })
            .collect(),
        placements: placements.into_iter().flatten().collect(),
    }
}
