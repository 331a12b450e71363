//! Median-cut palette derivation.
//!
//! An alternative to the threshold analysis in `analyze`: instead of
//! keeping the most frequent sufficiently-distinct colors, recursively
//! split the occupied color space into boxes and take each box's weighted
//! centroid. Works on the 5-bit channels of the snapped colors, cutting the
//! widest channel at the weighted median, so heavily populated regions of
//! the gamut get more palette entries.

use log::debug;

use crate::frame::Frame;
use crate::oklab::{shrink, stretch};
use crate::palette::PaletteReducer;

/// One box of (snapped color, count) entries awaiting subdivision.
#[derive(Debug, Clone)]
struct ColorBox {
    /// 5-bit channel triples with their pixel counts.
    entries: Vec<([u32; 3], u32)>,
}

impl ColorBox {
    fn new(entries: Vec<([u32; 3], u32)>) -> Self {
        Self { entries }
    }

    fn total_weight(&self) -> u64 {
        self.entries.iter().map(|&(_, w)| u64::from(w)).sum()
    }

    /// Range (max - min) along each 5-bit channel.
    fn ranges(&self) -> [u32; 3] {
        let mut min = [31u32; 3];
        let mut max = [0u32; 3];
        for &(channels, _) in &self.entries {
            for axis in 0..3 {
                min[axis] = min[axis].min(channels[axis]);
                max[axis] = max[axis].max(channels[axis]);
            }
        }
        [max[0] - min[0], max[1] - min[1], max[2] - min[2]]
    }

    /// Split priority: heavier boxes with more channel variation split
    /// first.
    fn priority(&self) -> u64 {
        let widest = self.ranges().into_iter().max().unwrap_or(0);
        self.total_weight() * u64::from(widest)
    }

    /// Splits along the widest channel at the weighted median. Each side
    /// keeps at least one entry.
    fn split(mut self) -> (ColorBox, ColorBox) {
        let ranges = self.ranges();
        let axis = if ranges[0] >= ranges[1] && ranges[0] >= ranges[2] {
            0
        } else if ranges[1] >= ranges[2] {
            1
        } else {
            2
        };

        self.entries.sort_unstable_by_key(|&(channels, _)| channels[axis]);

        let half_weight = self.total_weight() / 2;
        let mut accumulated = 0u64;
        let mut split_idx = 1;
        for (i, &(_, w)) in self.entries.iter().enumerate() {
            accumulated += u64::from(w);
            if accumulated >= half_weight && i + 1 < self.entries.len() {
                split_idx = i + 1;
                break;
            }
        }
        let split_idx = split_idx.clamp(1, self.entries.len() - 1);

        let right = self.entries.split_off(split_idx);
        (ColorBox::new(self.entries), ColorBox::new(right))
    }

    /// Weighted mean of the 5-bit channels, stretched back to RGBA8888.
    fn centroid(&self) -> u32 {
        let mut sums = [0u64; 3];
        let mut weight = 0u64;
        for &(channels, w) in &self.entries {
            for axis in 0..3 {
                sums[axis] += u64::from(channels[axis]) * u64::from(w);
            }
            weight += u64::from(w);
        }
        if weight == 0 {
            return stretch(0);
        }
        let mean = |sum: u64| ((sum + weight / 2) / weight).min(31) as u16;
        stretch(mean(sums[0]) << 10 | mean(sums[1]) << 5 | mean(sums[2]))
    }
}

impl PaletteReducer {
    /// Derives a palette from `frame` by median cut instead of frequency
    /// thresholding, filling at most `limit` slots.
    ///
    /// Reserves slot 0 for transparency under the same condition as
    /// [`analyze`](Self::analyze). Prefer this over `analyze` for
    /// photographic content where popularity poorly predicts which colors
    /// matter; prefer `analyze` for art with meaningful flat colors.
    pub fn analyze_median_cut<F: Frame>(&mut self, frame: &F, limit: usize) {
        self.palette_array = [0; 256];
        self.palette_mapping.fill(0);

        let mut counts: std::collections::HashMap<u32, u32> = std::collections::HashMap::new();
        let mut has_transparent = 0usize;
        for y in 0..frame.height() {
            for x in 0..frame.width() {
                let mut color = frame.pixel(x, y);
                if color & 0x80 != 0 {
                    color |= (color >> 5 & 0x0707_0700) | 0xFF;
                    *counts.entry(color).or_insert(0) += 1;
                } else {
                    has_transparent = 1;
                }
            }
        }

        if counts.len() + has_transparent < 2 {
            debug!("median cut found {} distinct colors; using Haltonic fallback", counts.len());
            self.set_default_palette();
            return;
        }

        let limit = limit
            .min(256)
            .saturating_sub(has_transparent)
            .max(2 - has_transparent);
        let mut entries: Vec<([u32; 3], u32)> = counts
            .iter()
            .map(|(&color, &n)| ([color >> 27, color >> 19 & 31, color >> 11 & 31], n))
            .collect();
        // Deterministic box splitting regardless of hash order.
        entries.sort_unstable();

        let mut i = has_transparent;
        if entries.len() > limit {
            let mut boxes = Vec::with_capacity(limit);
            boxes.push(ColorBox::new(entries));
            while boxes.len() < limit {
                let best = boxes
                    .iter()
                    .enumerate()
                    .filter(|(_, b)| b.entries.len() >= 2)
                    .max_by_key(|(_, b)| b.priority())
                    .map(|(idx, _)| idx);
                let Some(idx) = best else {
                    break;
                };
                let (left, right) = boxes.swap_remove(idx).split();
                boxes.push(left);
                boxes.push(right);
            }
            debug!("median cut produced {} boxes for limit {limit}", boxes.len());
            for color_box in &boxes {
                let color = color_box.centroid();
                self.palette_array[i] = color;
                self.palette_mapping[shrink(color) as usize] = i as u8;
                i += 1;
            }
        } else {
            for &(channels, _) in &entries {
                let color = stretch((channels[0] << 10 | channels[1] << 5 | channels[2]) as u16);
                self.palette_array[i] = color;
                self.palette_mapping[shrink(color) as usize] = i as u8;
                i += 1;
            }
        }

        self.color_count = i;
        self.population_bias = (-1.375 / self.color_count as f64).exp();
        self.build_mapping();
        self.calculate_gamma();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::PixelFrame;

    fn quadrant_frame() -> PixelFrame {
        // Four 8x8 blocks of distinct hues, with slight per-pixel jitter so
        // each block holds several snapped colors.
        let mut frame = PixelFrame::new(16, 16).unwrap();
        for y in 0..16u32 {
            for x in 0..16u32 {
                let jitter = (x ^ y) & 7;
                let base: u32 = match (x < 8, y < 8) {
                    (true, true) => 0xC0202000,
                    (false, true) => 0x20C02000,
                    (true, false) => 0x2020C000,
                    (false, false) => 0xC0C02000,
                };
                frame.set_pixel(x, y, base | jitter << 27 | jitter << 19 | 0xFF);
            }
        }
        frame
    }

    #[test]
    fn splits_down_to_limit() {
        let mut reducer = PaletteReducer::new();
        let mut frame = quadrant_frame();
        // One transparent pixel reserves slot 0, so all four centroids land
        // in searchable slots.
        frame.set_pixel(0, 0, 0);
        reducer.analyze_median_cut(&frame, 5);
        assert_eq!(reducer.color_count(), 5);
        // Each quadrant hue should be represented by a nearby centroid.
        for &probe in &[0xC02020FFu32, 0x20C020FF, 0x2020C0FF, 0xC0C020FF] {
            let reduced = reducer.reduce_single(probe);
            let dr = (probe >> 24) as i32 - (reduced >> 24) as i32;
            let dg = (probe >> 16 & 0xFF) as i32 - (reduced >> 16 & 0xFF) as i32;
            let db = (probe >> 8 & 0xFF) as i32 - (reduced >> 8 & 0xFF) as i32;
            assert!(
                dr.abs() < 48 && dg.abs() < 48 && db.abs() < 48,
                "probe {probe:#010X} mapped to distant {reduced:#010X}"
            );
        }
    }

    #[test]
    fn adopts_all_when_below_limit() {
        let mut frame = PixelFrame::new(2, 1).unwrap();
        frame.set_pixel(0, 0, 0xFF0000FF);
        frame.set_pixel(1, 0, 0x0000FFFF);
        let mut reducer = PaletteReducer::new();
        reducer.analyze_median_cut(&frame, 16);
        assert_eq!(reducer.color_count(), 2);
    }

    #[test]
    fn reserves_transparent_slot() {
        let mut frame = quadrant_frame();
        frame.set_pixel(0, 0, 0);
        let mut reducer = PaletteReducer::new();
        reducer.analyze_median_cut(&frame, 4);
        assert_eq!(reducer.palette_array()[0], 0);
        assert_eq!(reducer.color_count(), 4);
    }
}
