//! The palette store: up to 256 RGBA colors, the RGB555 nearest-color
//! index over the whole 15-bit grid, and the two ways of deriving a
//! palette (verbatim adoption and frequency analysis).

use std::collections::HashMap;
use std::sync::LazyLock;

use log::debug;

use crate::error::ZenditherError;
use crate::frame::Frame;
use crate::haltonic::HALTONIC;
use crate::oklab::{difference, difference_rgb, oklab_to_rgb, shrink, OKLAB};

/// Per-channel error rows for the diffusion dithers. Allocated on first
/// use, grown (never shrunk) to the widest frame seen, reused after that.
#[derive(Debug, Clone, Default)]
pub(crate) struct ErrorRows {
    pub(crate) cur_red: Vec<i8>,
    pub(crate) next_red: Vec<i8>,
    pub(crate) cur_green: Vec<i8>,
    pub(crate) next_green: Vec<i8>,
    pub(crate) cur_blue: Vec<i8>,
    pub(crate) next_blue: Vec<i8>,
}

/// Nearest-color mapping for the built-in Haltonic palette, computed once
/// per process. Stands in for shipping the 32 KiB preload blob alongside
/// the palette constant.
static HALTONIC_MAPPING: LazyLock<Box<[u8; 0x8000]>> = LazyLock::new(|| {
    let mut reducer = PaletteReducer::blank();
    reducer.adopt(&HALTONIC, 256);
    reducer.palette_mapping
});

/// Reduces RGBA8888 colors to a palette of at most 256 entries.
///
/// A reducer owns the palette, the 32 768-byte nearest-color index keyed by
/// RGB555, a gamma-adjusted copy of the palette for the pattern dithers,
/// and the scratch rows the diffusion dithers accumulate error in. Build
/// one with [`exact`](Self::exact) (use a known palette) or
/// [`analyze`](Self::analyze) (derive a palette from the frames it will
/// reduce), then call the `reduce_*` methods on as many frames as needed.
///
/// One reducer is single-threaded state; parallel dithering wants one
/// (cheaply cloned) reducer per thread.
#[derive(Debug, Clone)]
pub struct PaletteReducer {
    pub(crate) palette_array: [u32; 256],
    pub(crate) gamma_array: [u32; 256],
    pub(crate) palette_mapping: Box<[u8; 0x8000]>,
    pub(crate) color_count: usize,
    pub(crate) dither_strength: f64,
    pub(crate) population_bias: f64,
    pub(crate) error_rows: Option<ErrorRows>,
}

impl Default for PaletteReducer {
    /// A reducer on the built-in Haltonic palette.
    fn default() -> Self {
        let mut reducer = Self::blank();
        reducer.set_default_palette();
        reducer
    }
}

impl PaletteReducer {
    /// Creates a reducer using the built-in Haltonic palette.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a reducer from a caller-supplied palette; see
    /// [`exact`](Self::exact).
    pub fn with_palette(rgba_palette: &[u32]) -> Self {
        let mut reducer = Self::blank();
        reducer.exact(rgba_palette);
        reducer
    }

    fn blank() -> Self {
        let mapping: Box<[u8; 0x8000]> = vec![0u8; 0x8000]
            .into_boxed_slice()
            .try_into()
            .unwrap_or_else(|_| unreachable!());
        Self {
            palette_array: [0; 256],
            gamma_array: [0; 256],
            palette_mapping: mapping,
            color_count: 0,
            dither_strength: 0.5,
            population_bias: 0.5,
            error_rows: None,
        }
    }

    /// Resets to the 256-color (including transparent) Haltonic palette.
    /// The nearest-color index for it is cached process-wide, so this is
    /// cheap after the first call.
    pub fn set_default_palette(&mut self) {
        self.palette_array = HALTONIC;
        self.palette_mapping.copy_from_slice(&**HALTONIC_MAPPING);
        self.color_count = 256;
        self.population_bias = (-1.375 / 256.0f64).exp();
        self.calculate_gamma();
    }

    /// Adopts `rgba_palette` verbatim, up to 256 entries.
    ///
    /// Entries with the alpha bit clear do not become usable colors but
    /// still occupy their slot. If the input has fewer than 2 entries this
    /// falls back to the Haltonic palette; there is nothing sensible to
    /// reduce against otherwise.
    pub fn exact(&mut self, rgba_palette: &[u32]) {
        self.exact_limited(rgba_palette, 256);
    }

    /// Like [`exact`](Self::exact), using at most `limit` entries from the
    /// input. A limit below 2 also falls back to the Haltonic palette.
    pub fn exact_limited(&mut self, rgba_palette: &[u32], limit: usize) {
        if rgba_palette.len() < 2 || limit < 2 {
            debug!(
                "palette input unusable ({} entries, limit {limit}); using Haltonic fallback",
                rgba_palette.len()
            );
            self.set_default_palette();
            return;
        }
        self.adopt(rgba_palette, limit);
    }

    fn adopt(&mut self, rgba_palette: &[u32], limit: usize) {
        self.palette_array = [0; 256];
        self.palette_mapping.fill(0);
        let plen = 256.min(limit).min(rgba_palette.len());
        self.color_count = plen;
        self.population_bias = (-1.375 / plen as f64).exp();
        for (i, &color) in rgba_palette[..plen].iter().enumerate() {
            if color & 0x80 != 0 {
                self.palette_array[i] = color;
                self.palette_mapping[shrink(color) as usize] = i as u8;
            }
        }
        self.build_mapping();
        self.calculate_gamma();
    }

    /// Restores a reducer from a palette and a previously saved
    /// [`palette_mapping`](Self::palette_mapping) dump, skipping the index
    /// construction entirely. The caller is responsible for supplying the
    /// mapping that belongs to this palette.
    pub fn exact_preloaded(
        &mut self,
        palette: &[u32],
        preload: &[u8],
    ) -> Result<(), ZenditherError> {
        if preload.len() != 0x8000 {
            return Err(ZenditherError::PreloadLength { len: preload.len() });
        }
        if palette.len() < 2 || palette.len() > 256 {
            return Err(ZenditherError::PaletteLength { len: palette.len() });
        }
        self.palette_array = [0; 256];
        self.palette_array[..palette.len()].copy_from_slice(palette);
        self.palette_mapping.copy_from_slice(preload);
        self.color_count = palette.len();
        self.population_bias = (-1.375 / palette.len() as f64).exp();
        self.calculate_gamma();
        Ok(())
    }

    /// Derives a palette from `frame` with the default perceptual threshold
    /// (150) and the full 256-color limit.
    pub fn analyze<F: Frame>(&mut self, frame: &F) {
        self.analyze_with(frame, 150, 256);
    }

    /// Derives a palette from `frame`.
    ///
    /// Counts every distinct opaque color (snapped onto the RGB555
    /// reconstruction grid), sorts by frequency, and — when there are more
    /// colors than fit — greedily keeps a color only if its perceptual
    /// distance to everything already kept is at least `threshold` (in
    /// [`difference`] units; good values run 100..1000). Shape preservation
    /// under dithering beats exact color reproduction, which is why the
    /// rejected colors' popularity is deliberately ignored.
    pub fn analyze_with<F: Frame>(&mut self, frame: &F, threshold: i32, limit: usize) {
        self.analyze_group(std::slice::from_ref(frame), threshold, limit);
    }

    /// Derives one shared palette from a group of frames, as
    /// [`analyze_with`](Self::analyze_with) does for one. This is the entry
    /// point animation encoders use: every frame is counted, one palette
    /// comes out.
    pub fn analyze_group<F: Frame>(&mut self, frames: &[F], threshold: i32, limit: usize) {
        self.palette_array = [0; 256];
        self.palette_mapping.fill(0);
        let limit = limit.clamp(1, 256);
        let threshold = f64::from(threshold >> 2);

        // Count snapped opaque colors across every frame. The sequence
        // number makes the frequency sort deterministic on ties.
        let mut counts: HashMap<u32, (u32, u32)> = HashMap::new();
        let mut seq = 0u32;
        let mut has_transparent = 0usize;
        for frame in frames {
            for y in 0..frame.height() {
                for x in 0..frame.width() {
                    let mut color = frame.pixel(x, y);
                    if color & 0x80 != 0 {
                        color |= (color >> 5 & 0x0707_0700) | 0xFF;
                        counts
                            .entry(color)
                            .and_modify(|e| e.0 += 1)
                            .or_insert_with(|| {
                                seq += 1;
                                (1, seq)
                            });
                    } else {
                        has_transparent = 1;
                    }
                }
            }
        }

        let mut entries: Vec<(u32, u32, u32)> =
            counts.into_iter().map(|(color, (n, s))| (color, n, s)).collect();
        entries.sort_unstable_by(|a, b| b.1.cmp(&a.1).then(a.2.cmp(&b.2)));
        let distinct = entries.len();

        if distinct + has_transparent < 2 {
            debug!("analysis found {distinct} distinct colors; using Haltonic fallback");
            self.set_default_palette();
            return;
        }

        if distinct + has_transparent <= limit {
            let mut i = has_transparent;
            for &(color, _, _) in &entries {
                self.palette_array[i] = color;
                self.palette_mapping[shrink(color) as usize] = i as u8;
                i += 1;
            }
            self.color_count = i;
        } else {
            let mut i = 1;
            let mut c = 0;
            'per_best: while i < limit && c < distinct {
                let color = entries[c].0;
                c += 1;
                for j in 1..i {
                    if difference(color, self.palette_array[j]) < threshold {
                        continue 'per_best;
                    }
                }
                self.palette_array[i] = color;
                self.palette_mapping[shrink(color) as usize] = i as u8;
                i += 1;
            }
            self.color_count = i;
        }
        self.population_bias = (-1.375 / self.color_count as f64).exp();
        debug!(
            "analysis kept {} of {distinct} distinct colors (transparent: {})",
            self.color_count - has_transparent,
            has_transparent != 0
        );

        self.build_mapping();
        self.calculate_gamma();
    }

    /// Fills every still-unassigned RGB555 key with the index of the
    /// nearest usable palette entry, ties to the lowest index. A reserved
    /// transparent slot 0 is never searched; the transparent shortcut in
    /// the dithers covers it. When slot 0 holds a real color it competes
    /// like any other entry.
    pub(crate) fn build_mapping(&mut self) {
        let start = usize::from(self.palette_array[0] == 0);
        for r in 0..32u32 {
            let rr = r << 3 | r >> 2;
            for g in 0..32u32 {
                let gg = g << 3 | g >> 2;
                for b in 0..32u32 {
                    let key = (r << 10 | g << 5 | b) as usize;
                    if self.palette_mapping[key] == 0 {
                        let bb = b << 3 | b >> 2;
                        let mut dist = f64::INFINITY;
                        for i in start..self.color_count {
                            let d = difference_rgb(self.palette_array[i], rr, gg, bb);
                            if d < dist {
                                dist = d;
                                self.palette_mapping[key] = i as u8;
                            }
                        }
                    }
                }
            }
        }
    }

    /// Sets the strength of the dither effect for subsequent `reduce_*`
    /// calls. Stored halved, so the default of 0.5 corresponds to an input
    /// of 1.0; negative inputs clamp to 0. Don't use 0 to disable dither —
    /// call [`reduce_solid`](Self::reduce_solid) instead.
    pub fn set_dither_strength(&mut self, strength: f32) {
        self.dither_strength = f64::from((0.5 * strength).max(0.0));
        self.calculate_gamma();
    }

    /// Recomputes the gamma-adjusted palette the pattern dithers account
    /// error against. `γ = 1.8 · (1 − ditherStrength)`, applied per channel
    /// in [0, 1]; alpha passes through.
    pub(crate) fn calculate_gamma(&mut self) {
        let gamma = 1.8 - self.dither_strength * 1.8;
        for i in 0..256 {
            let color = self.palette_array[i];
            let r = (f64::from(color >> 24) / 255.0).powf(gamma);
            let g = (f64::from(color >> 16 & 0xFF) / 255.0).powf(gamma);
            let b = (f64::from(color >> 8 & 0xFF) / 255.0).powf(gamma);
            let a = color & 0xFF;
            self.gamma_array[i] = ((r * 255.999) as u32) << 24
                | ((g * 255.999) as u32) << 16
                | ((b * 255.999) as u32) << 8
                | a;
        }
    }

    /// Finds the closest palette color to `color`, or 0 when `color` is
    /// less visible than half-transparent.
    pub fn reduce_single(&self, color: u32) -> u32 {
        if color & 0x80 == 0 {
            return 0;
        }
        self.palette_array[usize::from(self.palette_mapping[shrink(color) as usize])]
    }

    /// Index form of [`reduce_single`](Self::reduce_single): the byte index
    /// into [`palette_array`](Self::palette_array), 0 for transparent.
    pub fn reduce_index(&self, color: u32) -> u8 {
        if color & 0x80 == 0 {
            return 0;
        }
        self.palette_mapping[shrink(color) as usize]
    }

    /// Leans light palette entries toward warmer hues and dark ones toward
    /// cooler, purple-ish hues by nudging Oklab a/b with lightness. Edits
    /// the palette colors in place; the nearest-color index keeps using the
    /// original positions.
    pub fn hue_shift(&mut self) {
        for idx in 0..self.color_count {
            let color = self.palette_array[idx];
            let lab = OKLAB[shrink(color) as usize];
            let l = f64::from(lab.l);
            let a = f64::from(lab.a) + (l - 0.5) * 0.04;
            let b = f64::from(lab.b) + (l - 0.5) * 0.08;
            self.palette_array[idx] =
                oklab_to_rgb(l, a, b, f64::from(color >> 1 & 0x7F) / 127.0);
        }
    }

    /// The RGBA8888 palette. Slot 0 equal to 0 means the palette reserves a
    /// transparent entry; unused tail slots are 0.
    pub fn palette_array(&self) -> &[u32; 256] {
        &self.palette_array
    }

    /// The nearest-color index: one unsigned byte per RGB555 key. Persist
    /// this (with the palette) and hand both to
    /// [`exact_preloaded`](Self::exact_preloaded) to skip rebuilding.
    pub fn palette_mapping(&self) -> &[u8; 0x8000] {
        &self.palette_mapping
    }

    /// Number of used palette slots.
    pub fn color_count(&self) -> usize {
        self.color_count
    }

    /// `exp(−1.375 / colorCount)`: smaller palettes dither less.
    pub fn population_bias(&self) -> f64 {
        self.population_bias
    }

    /// The stored (already halved) dither strength.
    pub fn dither_strength(&self) -> f64 {
        self.dither_strength
    }

    /// Takes the diffusion error rows out of the reducer, grown to at least
    /// `line_len` and with the next-row halves zeroed. The caller stores
    /// them back when the frame is done so later frames reuse the
    /// allocation.
    pub(crate) fn take_diffusion_rows(&mut self, line_len: usize) -> ErrorRows {
        let mut rows = self.error_rows.take().unwrap_or_default();
        for row in [
            &mut rows.cur_red,
            &mut rows.cur_green,
            &mut rows.cur_blue,
            &mut rows.next_red,
            &mut rows.next_green,
            &mut rows.next_blue,
        ] {
            if row.len() < line_len {
                row.resize(line_len, 0);
            }
        }
        for row in [&mut rows.next_red, &mut rows.next_green, &mut rows.next_blue] {
            row[..line_len].fill(0);
        }
        rows
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::PixelFrame;

    #[test]
    fn default_is_haltonic() {
        let reducer = PaletteReducer::new();
        assert_eq!(reducer.palette_array()[..], HALTONIC[..]);
        assert_eq!(reducer.color_count(), 256);
        let expected = (-1.375f64 / 256.0).exp();
        assert!((reducer.population_bias() - expected).abs() < 1e-12);
    }

    #[test]
    fn short_palette_falls_back() {
        let mut reducer = PaletteReducer::blank();
        reducer.exact(&[0xFF0000FF]);
        assert_eq!(reducer.palette_array()[..], HALTONIC[..]);

        let mut reducer = PaletteReducer::blank();
        reducer.exact_limited(&[0xFF0000FF, 0x00FF00FF], 1);
        assert_eq!(reducer.palette_array()[..], HALTONIC[..]);
    }

    #[test]
    fn exact_sets_counts_and_bias() {
        let reducer = PaletteReducer::with_palette(&[0x000000FF, 0xFF0000FF, 0x00FF00FF]);
        assert_eq!(reducer.color_count(), 3);
        let expected = (-1.375f64 / 3.0).exp();
        assert!((reducer.population_bias() - expected).abs() < 1e-12);
        // Tail stays zeroed.
        assert!(reducer.palette_array()[3..].iter().all(|&c| c == 0));
    }

    #[test]
    fn exact_maps_own_keys_to_own_slots() {
        let palette = [0x000000FF, 0xFF0000FF, 0x00FF00FF, 0x0000FFFF];
        let reducer = PaletteReducer::with_palette(&palette);
        for (i, &color) in palette.iter().enumerate().skip(1) {
            assert_eq!(
                usize::from(reducer.palette_mapping()[shrink(color) as usize]),
                i
            );
        }
    }

    #[test]
    fn dither_strength_is_halved_and_clamped() {
        let mut reducer = PaletteReducer::new();
        reducer.set_dither_strength(1.0);
        assert_eq!(reducer.dither_strength(), 0.5);
        reducer.set_dither_strength(-3.0);
        assert_eq!(reducer.dither_strength(), 0.0);
    }

    #[test]
    fn gamma_tracks_dither_strength() {
        let mut reducer = PaletteReducer::with_palette(&[0x000000FF, 0x808080FF]);
        // ditherStrength 0.5 → γ = 0.9
        let expected = ((128.0f64 / 255.0).powf(0.9) * 255.999) as u32;
        assert_eq!(reducer.gamma_array[1] >> 24, expected);
        // Alpha passes through untouched.
        assert_eq!(reducer.gamma_array[1] & 0xFF, 0xFF);

        reducer.set_dither_strength(2.0); // stored 1.0 → γ = 0
        assert_eq!(reducer.gamma_array[1] >> 24, 255);
    }

    #[test]
    fn preload_length_checked() {
        let mut reducer = PaletteReducer::new();
        assert!(matches!(
            reducer.exact_preloaded(&[0x000000FF, 0xFFFFFFFF], &[0u8; 100]),
            Err(ZenditherError::PreloadLength { len: 100 })
        ));
        assert!(matches!(
            reducer.exact_preloaded(&[0x000000FF], &[0u8; 0x8000]),
            Err(ZenditherError::PaletteLength { len: 1 })
        ));
    }

    #[test]
    fn preload_roundtrip_restores_state() {
        let mut original = PaletteReducer::with_palette(&[
            0x000000FF, 0xFF0000FF, 0x00FF00FF, 0x0000FFFF, 0xFFFFFFFF,
        ]);
        original.set_dither_strength(1.0);

        let palette: Vec<u32> = original.palette_array()[..original.color_count()].to_vec();
        let mapping = original.palette_mapping().to_vec();

        let mut restored = PaletteReducer::new();
        restored.exact_preloaded(&palette, &mapping).unwrap();
        restored.set_dither_strength(1.0);

        assert_eq!(restored.color_count(), original.color_count());
        assert_eq!(restored.palette_array()[..], original.palette_array()[..]);
        assert_eq!(restored.palette_mapping()[..], original.palette_mapping()[..]);
        assert_eq!(restored.gamma_array[..], original.gamma_array[..]);
    }

    #[test]
    fn reduce_single_transparent_shortcut() {
        let reducer = PaletteReducer::with_palette(&[0x00000000, 0xFFFFFFFF]);
        assert_eq!(reducer.reduce_single(0x12345600), 0);
        assert_eq!(reducer.reduce_index(0x1234567F), 0);
        assert_eq!(reducer.reduce_single(0xF0F0F0FF), 0xFFFFFFFF);
    }

    #[test]
    fn analyze_adopts_exact_colors_when_few() {
        let mut frame = PixelFrame::new(2, 2).unwrap();
        // Colors already on the RGB555 reconstruction grid survive analyze
        // unchanged.
        frame.set_pixel(0, 0, 0xFF0000FF);
        frame.set_pixel(1, 0, 0x00FF00FF);
        frame.set_pixel(0, 1, 0xFF0000FF);
        frame.set_pixel(1, 1, 0xFF0000FF);

        let mut reducer = PaletteReducer::blank();
        reducer.analyze(&frame);
        assert_eq!(reducer.color_count(), 2);
        // Most frequent color gets the first slot; no transparent pixels,
        // so slot 0 is a real color.
        assert_eq!(reducer.palette_array()[0], 0xFF0000FF);
        assert_eq!(reducer.palette_array()[1], 0x00FF00FF);
    }

    #[test]
    fn analyze_reserves_slot_zero_for_transparency() {
        let mut frame = PixelFrame::new(2, 1).unwrap();
        frame.set_pixel(0, 0, 0xFF0000FF);
        frame.set_pixel(1, 0, 0x00000000);

        let mut reducer = PaletteReducer::blank();
        reducer.analyze(&frame);
        assert_eq!(reducer.color_count(), 2);
        assert_eq!(reducer.palette_array()[0], 0);
        assert_eq!(reducer.palette_array()[1], 0xFF0000FF);
    }

    #[test]
    fn analyze_group_shares_one_palette() {
        let mut a = PixelFrame::new(1, 1).unwrap();
        a.set_pixel(0, 0, 0xFF0000FF);
        let mut b = PixelFrame::new(1, 1).unwrap();
        b.set_pixel(0, 0, 0x0000FFFF);

        let mut reducer = PaletteReducer::blank();
        reducer.analyze_group(&[a, b], 150, 256);
        assert_eq!(reducer.color_count(), 2);
        let colors = &reducer.palette_array()[..2];
        assert!(colors.contains(&0xFF0000FF));
        assert!(colors.contains(&0x0000FFFF));
    }

    #[test]
    fn hue_shift_keeps_count_and_moves_colors() {
        let mut reducer = PaletteReducer::with_palette(&[0x000000FF, 0x2020E0FF, 0xE0E020FF]);
        let before = *reducer.palette_array();
        reducer.hue_shift();
        assert_eq!(reducer.color_count(), 3);
        assert_ne!(reducer.palette_array()[..3], before[..3]);
    }
}
