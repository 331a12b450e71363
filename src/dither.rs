//! The dither engine: nine ways of mapping a frame onto the palette.
//!
//! Every method shares one skeleton — walk pixels in raster order, write
//! RGBA 0 for sub-threshold-alpha pixels when the palette reserves a
//! transparent slot, otherwise perturb the target color somehow and look it
//! up in the nearest-color index. They differ in the perturbation and in
//! whether residual error carries forward to later pixels.
//!
//! The diffusion dithers (Floyd-Steinberg, Sierra Lite, Scatter) keep their
//! per-channel error rows as signed bytes and let the accumulated
//! floating-point sums wrap through the low byte on write-back; that
//! overflow is part of the contract, not an accident, and changing it to
//! saturation changes the output.

use crate::bluenoise::{RAW_BLUE_NOISE, TRI_BLUE_NOISE_MULTIPLIERS};
use crate::frame::{BlendScope, Frame};
use crate::oklab::{shrink, OKLAB};
use crate::palette::PaletteReducer;

/// Selects the dither a [`PaletteReducer::reduce_with`] call applies.
///
/// `Scatter` is the default and the fallback for anything unrecognized at
/// the edges of the system; it is the best general choice for animation
/// because its artifacts stay put between similar frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DitherAlgorithm {
    /// Nearest color only, no dithering.
    None,
    /// Jimenez gradient interleaved noise: ordered, smooth gradients.
    GradientNoise,
    /// Knoll-Roberts pattern dither: skewed needlepoint, slowest.
    Pattern,
    /// Per-pixel pseudo-random noise seeded by the colors seen so far.
    ChaoticNoise,
    /// Plain Floyd-Steinberg error diffusion.
    Diffusion,
    /// Ordered blue-noise dither, no error diffusion.
    BlueNoise,
    /// Floyd-Steinberg with blue-noise-modulated error magnitude.
    #[default]
    Scatter,
}

/// Bayer-like matrix from Joel Yliluoma's dithering article, 4x2.
const THRESHOLD_MATRIX_8: [usize; 8] = [
    0, 4, 2, 6, //
    3, 7, 1, 5,
];

/// Bayer-like matrix from Joel Yliluoma's dithering article, 4x4.
const THRESHOLD_MATRIX_16: [usize; 16] = [
    0, 12, 3, 15, //
    8, 4, 11, 7, //
    2, 14, 1, 13, //
    10, 6, 9, 5,
];

/// Best-known sorting network for 8 elements.
const SORT_NET_8: [(usize, usize); 19] = [
    (0, 1),
    (2, 3),
    (0, 2),
    (1, 3),
    (1, 2),
    (4, 5),
    (6, 7),
    (4, 6),
    (5, 7),
    (5, 6),
    (0, 4),
    (1, 5),
    (1, 4),
    (2, 6),
    (3, 7),
    (3, 6),
    (2, 4),
    (3, 5),
    (3, 4),
];

/// Best-known sorting network for 16 elements.
const SORT_NET_16: [(usize, usize); 60] = [
    (0, 1),
    (2, 3),
    (4, 5),
    (6, 7),
    (8, 9),
    (10, 11),
    (12, 13),
    (14, 15),
    (0, 2),
    (4, 6),
    (8, 10),
    (12, 14),
    (1, 3),
    (5, 7),
    (9, 11),
    (13, 15),
    (0, 4),
    (8, 12),
    (1, 5),
    (9, 13),
    (2, 6),
    (10, 14),
    (3, 7),
    (11, 15),
    (0, 8),
    (1, 9),
    (2, 10),
    (3, 11),
    (4, 12),
    (5, 13),
    (6, 14),
    (7, 15),
    (5, 10),
    (6, 9),
    (3, 12),
    (13, 14),
    (7, 11),
    (1, 2),
    (4, 8),
    (1, 4),
    (7, 13),
    (2, 8),
    (11, 14),
    (2, 4),
    (5, 6),
    (9, 10),
    (11, 13),
    (3, 8),
    (7, 12),
    (6, 8),
    (10, 12),
    (3, 5),
    (7, 9),
    (3, 4),
    (5, 6),
    (7, 8),
    (9, 10),
    (11, 12),
    (6, 7),
    (8, 9),
];

/// Orders colors by their Oklab lightness using a fixed network. The
/// networks are used verbatim: a generic sort would break ties differently
/// and change pattern-dither output pixel for pixel.
fn sort_by_lightness(colors: &mut [u32], network: &[(usize, usize)]) {
    let table = &**OKLAB;
    for &(a, b) in network {
        if table[shrink(colors[a]) as usize].l > table[shrink(colors[b]) as usize].l {
            colors.swap(a, b);
        }
    }
}

/// RGB555 key from already-clamped 8-bit channels.
#[inline]
fn rgb555_key(rr: i32, gg: i32, bb: i32) -> usize {
    ((rr << 7 & 0x7C00) | (gg << 2 & 0x3E0) | (bb >> 3)) as usize
}

/// Adds `err` to a signed error byte the way the diffusion dithers require:
/// sum in floating point, truncate toward zero, keep the low byte.
#[inline]
fn add_error(slot: &mut i8, err: f64) {
    *slot = (f64::from(*slot) + err) as i32 as i8;
}

/// Snaps a packed RGBA color onto the RGB555 reconstruction grid and forces
/// it opaque: clear alpha and the low 3 bits of each channel, then rebuild
/// the low bits from the top 5.
#[inline]
fn snap(color: u32) -> u32 {
    let masked = color & 0xF8F8_F880;
    masked | (masked >> 5 & 0x0707_0700) | 0xFF
}

impl PaletteReducer {
    /// Reduces `frame` in place with the default Scatter dither.
    pub fn reduce<F: Frame>(&mut self, frame: &mut F) {
        self.reduce_scatter(frame);
    }

    /// Reduces `frame` in place with the chosen algorithm.
    pub fn reduce_with<F: Frame>(&mut self, frame: &mut F, algorithm: DitherAlgorithm) {
        match algorithm {
            DitherAlgorithm::None => self.reduce_solid(frame),
            DitherAlgorithm::GradientNoise => self.reduce_jimenez(frame),
            DitherAlgorithm::Pattern => self.reduce_knoll_roberts(frame),
            DitherAlgorithm::ChaoticNoise => self.reduce_chaotic_noise(frame),
            DitherAlgorithm::Diffusion => self.reduce_floyd_steinberg(frame),
            DitherAlgorithm::BlueNoise => self.reduce_blue_noise(frame),
            DitherAlgorithm::Scatter => self.reduce_scatter(frame),
        }
    }

    /// Nearest color per pixel, no dithering. Produces solid blocks where
    /// the palette isn't exact instead of checkerboard patterns.
    pub fn reduce_solid<F: Frame>(&mut self, frame: &mut F) {
        let has_transparent = self.palette_array[0] == 0;
        let mut frame = BlendScope::new(frame);
        let (line_len, h) = (frame.width(), frame.height());
        for y in 0..h {
            for px in 0..line_len {
                let color = frame.pixel(px, y);
                if color & 0x80 == 0 && has_transparent {
                    frame.set_pixel(px, y, 0);
                } else {
                    let rr = (color >> 24) as i32;
                    let gg = (color >> 16 & 0xFF) as i32;
                    let bb = (color >> 8 & 0xFF) as i32;
                    let index = self.palette_mapping[rgb555_key(rr, gg, bb)];
                    frame.set_pixel(px, y, self.palette_array[usize::from(index)]);
                }
            }
        }
    }

    /// Sierra Lite error diffusion: the same structure as Floyd-Steinberg
    /// with a lighter kernel (right, down-left, down). Sometimes avoids
    /// artifacts Floyd-Steinberg produces, so it's a better worst case but
    /// usually not as good a best case.
    pub fn reduce_sierra_lite<F: Frame>(&mut self, frame: &mut F) {
        let has_transparent = self.palette_array[0] == 0;
        let line_len = frame.width() as usize;
        let h = frame.height();
        let mut rows = self.take_diffusion_rows(line_len);
        let mut frame = BlendScope::new(frame);

        let dither_strength = self.dither_strength * self.population_bias;
        let half_dither_strength = dither_strength * 0.5;

        for y in 0..h {
            let ny = y + 1;
            for i in 0..line_len {
                rows.cur_red[i] = rows.next_red[i];
                rows.cur_green[i] = rows.next_green[i];
                rows.cur_blue[i] = rows.next_blue[i];
                rows.next_red[i] = 0;
                rows.next_green[i] = 0;
                rows.next_blue[i] = 0;
            }
            for px in 0..line_len {
                let color = frame.pixel(px as u32, y);
                if color & 0x80 == 0 && has_transparent {
                    frame.set_pixel(px as u32, y, 0);
                } else {
                    let er = rows.cur_red[px];
                    let eg = rows.cur_green[px];
                    let eb = rows.cur_blue[px];
                    let color = snap(color);
                    let rr = ((color >> 24) as i32 + i32::from(er)).clamp(0, 0xFF);
                    let gg = ((color >> 16 & 0xFF) as i32 + i32::from(eg)).clamp(0, 0xFF);
                    let bb = ((color >> 8 & 0xFF) as i32 + i32::from(eb)).clamp(0, 0xFF);
                    let index = self.palette_mapping[rgb555_key(rr, gg, bb)];
                    let used = self.palette_array[usize::from(index)];
                    frame.set_pixel(px as u32, y, used);
                    let rdiff = f64::from((color >> 24) as i32 - (used >> 24) as i32);
                    let gdiff =
                        f64::from((color >> 16 & 0xFF) as i32 - (used >> 16 & 0xFF) as i32);
                    let bdiff = f64::from((color >> 8 & 0xFF) as i32 - (used >> 8 & 0xFF) as i32);
                    if px < line_len - 1 {
                        add_error(&mut rows.cur_red[px + 1], rdiff * dither_strength);
                        add_error(&mut rows.cur_green[px + 1], gdiff * dither_strength);
                        add_error(&mut rows.cur_blue[px + 1], bdiff * dither_strength);
                    }
                    if ny < h {
                        if px > 0 {
                            add_error(&mut rows.next_red[px - 1], rdiff * half_dither_strength);
                            add_error(&mut rows.next_green[px - 1], gdiff * half_dither_strength);
                            add_error(&mut rows.next_blue[px - 1], bdiff * half_dither_strength);
                        }
                        add_error(&mut rows.next_red[px], rdiff * half_dither_strength);
                        add_error(&mut rows.next_green[px], gdiff * half_dither_strength);
                        add_error(&mut rows.next_blue[px], bdiff * half_dither_strength);
                    }
                }
            }
        }
        drop(frame);
        self.error_rows = Some(rows);
    }

    /// Classic Floyd-Steinberg error diffusion with the 7/3/5/1 kernel,
    /// scaled by dither strength and population bias.
    pub fn reduce_floyd_steinberg<F: Frame>(&mut self, frame: &mut F) {
        let has_transparent = self.palette_array[0] == 0;
        let line_len = frame.width() as usize;
        let h = frame.height();
        let mut rows = self.take_diffusion_rows(line_len);
        let mut frame = BlendScope::new(frame);

        let w1 = (self.dither_strength * self.population_bias * 0.125) as f32;
        let w3 = w1 * 3.0;
        let w5 = w1 * 5.0;
        let w7 = w1 * 7.0;

        for y in 0..h {
            let ny = y + 1;
            for i in 0..line_len {
                rows.cur_red[i] = rows.next_red[i];
                rows.cur_green[i] = rows.next_green[i];
                rows.cur_blue[i] = rows.next_blue[i];
                rows.next_red[i] = 0;
                rows.next_green[i] = 0;
                rows.next_blue[i] = 0;
            }
            for px in 0..line_len {
                let color = frame.pixel(px as u32, y);
                if color & 0x80 == 0 && has_transparent {
                    frame.set_pixel(px as u32, y, 0);
                } else {
                    let er = rows.cur_red[px];
                    let eg = rows.cur_green[px];
                    let eb = rows.cur_blue[px];
                    let color = snap(color);
                    let rr = ((color >> 24) as i32 + i32::from(er)).clamp(0, 0xFF);
                    let gg = ((color >> 16 & 0xFF) as i32 + i32::from(eg)).clamp(0, 0xFF);
                    let bb = ((color >> 8 & 0xFF) as i32 + i32::from(eb)).clamp(0, 0xFF);
                    let index = self.palette_mapping[rgb555_key(rr, gg, bb)];
                    let used = self.palette_array[usize::from(index)];
                    frame.set_pixel(px as u32, y, used);
                    let rdiff = ((color >> 24) as i32 - (used >> 24) as i32) as f32;
                    let gdiff = ((color >> 16 & 0xFF) as i32 - (used >> 16 & 0xFF) as i32) as f32;
                    let bdiff = ((color >> 8 & 0xFF) as i32 - (used >> 8 & 0xFF) as i32) as f32;
                    if px < line_len - 1 {
                        add_error(&mut rows.cur_red[px + 1], f64::from(rdiff * w7));
                        add_error(&mut rows.cur_green[px + 1], f64::from(gdiff * w7));
                        add_error(&mut rows.cur_blue[px + 1], f64::from(bdiff * w7));
                    }
                    if ny < h {
                        if px > 0 {
                            add_error(&mut rows.next_red[px - 1], f64::from(rdiff * w3));
                            add_error(&mut rows.next_green[px - 1], f64::from(gdiff * w3));
                            add_error(&mut rows.next_blue[px - 1], f64::from(bdiff * w3));
                        }
                        if px < line_len - 1 {
                            add_error(&mut rows.next_red[px + 1], f64::from(rdiff * w1));
                            add_error(&mut rows.next_green[px + 1], f64::from(gdiff * w1));
                            add_error(&mut rows.next_blue[px + 1], f64::from(bdiff * w1));
                        }
                        add_error(&mut rows.next_red[px], f64::from(rdiff * w5));
                        add_error(&mut rows.next_green[px], f64::from(gdiff * w5));
                        add_error(&mut rows.next_blue[px], f64::from(bdiff * w5));
                    }
                }
            }
        }
        drop(frame);
        self.error_rows = Some(rows);
    }

    /// Floyd-Steinberg with the incoming error magnitude modulated by
    /// triangular blue noise. The modulation breaks up the regular worm
    /// artifacts of plain Floyd-Steinberg while keeping its
    /// shape-preserving diffusion.
    pub fn reduce_scatter<F: Frame>(&mut self, frame: &mut F) {
        let has_transparent = self.palette_array[0] == 0;
        let line_len = frame.width() as usize;
        let h = frame.height();
        let mut rows = self.take_diffusion_rows(line_len);
        let mut frame = BlendScope::new(frame);

        let w1 = (self.dither_strength * self.population_bias * 0.140625) as f32;
        let w3 = w1 * 3.0;
        let w5 = w1 * 5.0;
        let w7 = w1 * 7.0;

        for y in 0..h {
            let ny = y + 1;
            for i in 0..line_len {
                rows.cur_red[i] = rows.next_red[i];
                rows.cur_green[i] = rows.next_green[i];
                rows.cur_blue[i] = rows.next_blue[i];
                rows.next_red[i] = 0;
                rows.next_green[i] = 0;
                rows.next_blue[i] = 0;
            }
            for px in 0..line_len {
                let color = frame.pixel(px as u32, y);
                if color & 0x80 == 0 && has_transparent {
                    frame.set_pixel(px as u32, y, 0);
                } else {
                    let tbn =
                        TRI_BLUE_NOISE_MULTIPLIERS[(px & 63) | ((y as usize) << 6 & 0xFC0)];
                    let er = (f64::from(rows.cur_red[px]) * tbn) as i32 as i8;
                    let eg = (f64::from(rows.cur_green[px]) * tbn) as i32 as i8;
                    let eb = (f64::from(rows.cur_blue[px]) * tbn) as i32 as i8;
                    let color = snap(color);
                    let rr = ((color >> 24) as i32 + i32::from(er)).clamp(0, 0xFF);
                    let gg = ((color >> 16 & 0xFF) as i32 + i32::from(eg)).clamp(0, 0xFF);
                    let bb = ((color >> 8 & 0xFF) as i32 + i32::from(eb)).clamp(0, 0xFF);
                    let index = self.palette_mapping[rgb555_key(rr, gg, bb)];
                    let used = self.palette_array[usize::from(index)];
                    frame.set_pixel(px as u32, y, used);
                    let rdiff = ((color >> 24) as i32 - (used >> 24) as i32) as f32;
                    let gdiff = ((color >> 16 & 0xFF) as i32 - (used >> 16 & 0xFF) as i32) as f32;
                    let bdiff = ((color >> 8 & 0xFF) as i32 - (used >> 8 & 0xFF) as i32) as f32;
                    if px < line_len - 1 {
                        add_error(&mut rows.cur_red[px + 1], f64::from(rdiff * w7));
                        add_error(&mut rows.cur_green[px + 1], f64::from(gdiff * w7));
                        add_error(&mut rows.cur_blue[px + 1], f64::from(bdiff * w7));
                    }
                    if ny < h {
                        if px > 0 {
                            add_error(&mut rows.next_red[px - 1], f64::from(rdiff * w3));
                            add_error(&mut rows.next_green[px - 1], f64::from(gdiff * w3));
                            add_error(&mut rows.next_blue[px - 1], f64::from(bdiff * w3));
                        }
                        if px < line_len - 1 {
                            add_error(&mut rows.next_red[px + 1], f64::from(rdiff * w1));
                            add_error(&mut rows.next_green[px + 1], f64::from(gdiff * w1));
                            add_error(&mut rows.next_blue[px + 1], f64::from(bdiff * w1));
                        }
                        add_error(&mut rows.next_red[px], f64::from(rdiff * w5));
                        add_error(&mut rows.next_green[px], f64::from(gdiff * w5));
                        add_error(&mut rows.next_blue[px], f64::from(bdiff * w5));
                    }
                }
            }
        }
        drop(frame);
        self.error_rows = Some(rows);
    }

    /// Jimenez gradient interleaved noise: ordered, no error state. Each
    /// pixel gets a position-derived sinusoidal adjustment toward or away
    /// from its first-pass match, then a second lookup.
    pub fn reduce_jimenez<F: Frame>(&mut self, frame: &mut F) {
        let has_transparent = self.palette_array[0] == 0;
        let strength = (self.dither_strength * self.population_bias * 3.333) as f32;
        let mut frame = BlendScope::new(frame);
        let (line_len, h) = (frame.width(), frame.height());
        for y in 0..h {
            for px in 0..line_len {
                let color = frame.pixel(px, y);
                if color & 0x80 == 0 && has_transparent {
                    frame.set_pixel(px, y, 0);
                } else {
                    let color = snap(color);
                    let rr = (color >> 24) as i32;
                    let gg = (color >> 16 & 0xFF) as i32;
                    let bb = (color >> 8 & 0xFF) as i32;
                    let used =
                        self.palette_array[usize::from(self.palette_mapping[rgb555_key(rr, gg, bb)])];
                    let mut pos = px as f32 * 0.067_110_56 + y as f32 * 0.005_837_15;
                    pos -= pos as i32 as f32;
                    pos *= 52.982_918_9;
                    pos -= pos as i32 as f32;
                    let adj = (pos * 2.0 - 1.0).sin() * strength;
                    let rr = ((rr as f32 + adj * (rr - (used >> 24) as i32) as f32) as i32)
                        .clamp(0, 0xFF);
                    let gg = ((gg as f32 + adj * (gg - (used >> 16 & 0xFF) as i32) as f32) as i32)
                        .clamp(0, 0xFF);
                    let bb = ((bb as f32 + adj * (bb - (used >> 8 & 0xFF) as i32) as f32) as i32)
                        .clamp(0, 0xFF);
                    let index = self.palette_mapping[rgb555_key(rr, gg, bb)];
                    frame.set_pixel(px, y, self.palette_array[usize::from(index)]);
                }
            }
        }
    }

    /// Ordered blue-noise dither: the tiling texture plus a fine-grained
    /// checkerboard term decide how far each pixel moves toward or away
    /// from its first-pass match. No error carries between pixels.
    pub fn reduce_blue_noise<F: Frame>(&mut self, frame: &mut F) {
        let has_transparent = self.palette_array[0] == 0;
        let strength = (self.dither_strength * self.population_bias * 1.5) as f32;
        let mut frame = BlendScope::new(frame);
        let (line_len, h) = (frame.width(), frame.height());
        for y in 0..h {
            for px in 0..line_len {
                let color = frame.pixel(px, y);
                if color & 0x80 == 0 && has_transparent {
                    frame.set_pixel(px, y, 0);
                } else {
                    let color = snap(color);
                    let rr = (color >> 24) as i32;
                    let gg = (color >> 16 & 0xFF) as i32;
                    let bb = (color >> 8 & 0xFF) as i32;
                    let used =
                        self.palette_array[usize::from(self.palette_mapping[rgb555_key(rr, gg, bb)])];
                    let noise =
                        RAW_BLUE_NOISE[(px as usize & 63) | (y as usize & 63) << 6];
                    // 0.007843138 is 1/127.5; -0.0013427734375 is -0x1.6p-10.
                    let mut adj = (f32::from(noise) + 0.5) * 0.007_843_138;
                    let rough = RAW_BLUE_NOISE
                        [(px as usize * 19 & 63) | (y as usize * 23 & 63) << 6];
                    adj += (((px + y) & 1) as f32 - 0.5)
                        * (0.5 + f32::from(rough))
                        * -0.001_342_773_4;
                    adj *= strength;
                    let rr = ((rr as f32 + adj * (rr - (used >> 24) as i32) as f32) as i32)
                        .clamp(0, 0xFF);
                    let gg = ((gg as f32 + adj * (gg - (used >> 16 & 0xFF) as i32) as f32) as i32)
                        .clamp(0, 0xFF);
                    let bb = ((bb as f32 + adj * (bb - (used >> 8 & 0xFF) as i32) as f32) as i32)
                        .clamp(0, 0xFF);
                    let index = self.palette_mapping[rgb555_key(rr, gg, bb)];
                    frame.set_pixel(px, y, self.palette_array[usize::from(index)]);
                }
            }
        }
    }

    /// White-noise-flavored dither that folds every quantized color into a
    /// 64-bit accumulator, so the "randomness" is a function of the colors
    /// encountered so far. Less flat than blue noise; looks best with
    /// larger palettes.
    pub fn reduce_chaotic_noise<F: Frame>(&mut self, frame: &mut F) {
        let has_transparent = self.palette_array[0] == 0;
        let strength = self.dither_strength * self.population_bias * 1.5;
        let mut frame = BlendScope::new(frame);
        let (line_len, h) = (frame.width(), frame.height());
        let mut s: i64 = 0xC13F_A9A9_02A6_328F_u64 as i64;
        for y in 0..h {
            for px in 0..line_len {
                let color = frame.pixel(px, y);
                if color & 0x80 == 0 && has_transparent {
                    frame.set_pixel(px, y, 0);
                } else {
                    let color = snap(color);
                    let rr = (color >> 24) as i32;
                    let gg = (color >> 16 & 0xFF) as i32;
                    let bb = (color >> 8 & 0xFF) as i32;
                    let used =
                        self.palette_array[usize::from(self.palette_mapping[rgb555_key(rr, gg, bb)])];
                    let noise =
                        RAW_BLUE_NOISE[(px as usize & 63) | (y as usize & 63) << 6];
                    let mut adj = f64::from((f32::from(noise) + 0.5) * 0.007_843_138);
                    adj *= adj * adj;
                    // Three low-quality random values derived from the
                    // running state: two XLCG taps on the old state, then
                    // the LCG step itself. Their sum has a curved
                    // distribution centered near 0, and the checkerboard
                    // sign times a tiny fraction (0x1.8p-49) scales it into
                    // range.
                    let t1 = (s ^ 0x9E37_79B9_7F4A_7C15_u64 as i64)
                        .wrapping_mul(0xC6BC_2796_92B5_CC83_u64 as i64)
                        >> 15;
                    let t2 = (!s ^ 0xDB4F_0B91_75AE_2165_u64 as i64)
                        .wrapping_mul(0xD1B5_4A32_D192_ED03_u64 as i64)
                        >> 15;
                    s = (s ^ color as i32 as i64)
                        .wrapping_mul(0xD134_2543_DE82_EF95_u64 as i64)
                        .wrapping_add(0x91E1_0DA5_C79E_7B1D_u64 as i64);
                    let t3 = s >> 15;
                    adj += f64::from((((px + y) & 1) as f32) - 0.5)
                        * 2.664_535_259_100_375_7e-15
                        * strength
                        * t1.wrapping_add(t2).wrapping_add(t3) as f64;
                    let rr = ((f64::from(rr) + adj * f64::from(rr - (used >> 24) as i32)) as i32)
                        .clamp(0, 0xFF);
                    let gg = ((f64::from(gg) + adj * f64::from(gg - (used >> 16 & 0xFF) as i32))
                        as i32)
                        .clamp(0, 0xFF);
                    let bb = ((f64::from(bb) + adj * f64::from(bb - (used >> 8 & 0xFF) as i32))
                        as i32)
                        .clamp(0, 0xFF);
                    let index = self.palette_mapping[rgb555_key(rr, gg, bb)];
                    frame.set_pixel(px, y, self.palette_array[usize::from(index)]);
                }
            }
        }
    }

    /// Thomas Knoll's pattern dither with a 4x4 threshold matrix: for each
    /// pixel, 16 candidate colors are generated while accounting error
    /// against the gamma-adjusted palette, sorted by lightness with a fixed
    /// network, and the matrix picks which candidate wins. Produces a
    /// needlepoint grid at close zoom; strong for lightness gradients.
    pub fn reduce_knoll<F: Frame>(&mut self, frame: &mut F) {
        let has_transparent = self.palette_array[0] == 0;
        let error_mul = (self.dither_strength * self.population_bias) as f32;
        let mut candidates = [0u32; 16];
        let mut frame = BlendScope::new(frame);
        let (line_len, h) = (frame.width(), frame.height());
        for y in 0..h {
            for px in 0..line_len {
                let color = frame.pixel(px, y);
                if color & 0x80 == 0 && has_transparent {
                    frame.set_pixel(px, y, 0);
                } else {
                    let cr = (color >> 24) as i32;
                    let cg = (color >> 16 & 0xFF) as i32;
                    let cb = (color >> 8 & 0xFF) as i32;
                    let mut er = 0i32;
                    let mut eg = 0i32;
                    let mut eb = 0i32;
                    for slot in candidates.iter_mut() {
                        let rr = ((cr as f32 + er as f32 * error_mul) as i32).clamp(0, 255);
                        let gg = ((cg as f32 + eg as f32 * error_mul) as i32).clamp(0, 255);
                        let bb = ((cb as f32 + eb as f32 * error_mul) as i32).clamp(0, 255);
                        let used_index =
                            usize::from(self.palette_mapping[rgb555_key(rr, gg, bb)]);
                        *slot = self.palette_array[used_index];
                        let used = self.gamma_array[used_index];
                        er += cr - (used >> 24) as i32;
                        eg += cg - (used >> 16 & 0xFF) as i32;
                        eb += cb - (used >> 8 & 0xFF) as i32;
                    }
                    sort_by_lightness(&mut candidates, &SORT_NET_16);
                    let matrix_index = ((px & 3) | (y & 3) << 2) as usize;
                    frame.set_pixel(px, y, candidates[THRESHOLD_MATRIX_16[matrix_index]]);
                }
            }
        }
    }

    /// Knoll's pattern dither skewed by Martin Roberts' harmonious numbers:
    /// 8 candidates instead of 16, and the threshold-matrix index slides
    /// with position so the grid becomes a less-noticeable triangular
    /// lattice.
    pub fn reduce_knoll_roberts<F: Frame>(&mut self, frame: &mut F) {
        let has_transparent = self.palette_array[0] == 0;
        let error_mul = (self.dither_strength * self.population_bias * 0.6) as f32;
        let mut candidates = [0u32; 8];
        let mut frame = BlendScope::new(frame);
        let (line_len, h) = (frame.width(), frame.height());
        for y in 0..h {
            for px in 0..line_len {
                let color = frame.pixel(px, y);
                if color & 0x80 == 0 && has_transparent {
                    frame.set_pixel(px, y, 0);
                } else {
                    let cr = (color >> 24) as i32;
                    let cg = (color >> 16 & 0xFF) as i32;
                    let cb = (color >> 8 & 0xFF) as i32;
                    let mut er = 0i32;
                    let mut eg = 0i32;
                    let mut eb = 0i32;
                    for slot in candidates.iter_mut() {
                        let rr = ((cr as f32 + er as f32 * error_mul) as i32).clamp(0, 255);
                        let gg = ((cg as f32 + eg as f32 * error_mul) as i32).clamp(0, 255);
                        let bb = ((cb as f32 + eb as f32 * error_mul) as i32).clamp(0, 255);
                        let used_index =
                            usize::from(self.palette_mapping[rgb555_key(rr, gg, bb)]);
                        *slot = self.palette_array[used_index];
                        let used = self.gamma_array[used_index];
                        er += cr - (used >> 24) as i32;
                        eg += cg - (used >> 16 & 0xFF) as i32;
                        eb += cb - (used >> 8 & 0xFF) as i32;
                    }
                    sort_by_lightness(&mut candidates, &SORT_NET_8);
                    // 14.03902... is 0x1.C13FA9A902A6328Fp3 and 0.40450...
                    // is 0x1.9E3779B97F4A7C15p-2, the Roberts sequence
                    // constants.
                    let skew = (f64::from(px) * 14.039_021_329_973_542
                        + f64::from(y) * 0.404_508_497_187_473_7)
                        as i32
                        & 3;
                    let matrix_index = (skew as u32 ^ ((px & 3) | (y & 1) << 2)) as usize;
                    frame.set_pixel(px, y, candidates[THRESHOLD_MATRIX_8[matrix_index]]);
                }
            }
        }
    }
}
