#![forbid(unsafe_code)]

//! Palette reduction and dithering for indexed-color images.
//!
//! zendither turns true-color RGBA rasters into images whose every pixel is
//! one of at most 256 palette entries — the form GIF and PNG-8 encoders
//! consume. It covers the three hard parts of that job:
//!
//! - **Palette synthesis** in a perceptual color space: adopt a known
//!   palette verbatim ([`PaletteReducer::exact`]), derive one from the
//!   frames being encoded ([`PaletteReducer::analyze`], with a median-cut
//!   alternative), or restore a saved palette plus its precomputed lookup
//!   ([`PaletteReducer::exact_preloaded`]).
//! - **Nearest-color lookup** over the entire 15-bit RGB grid: a
//!   32 768-byte index answers "closest palette entry" for any color with
//!   one table read, using squared Oklab distance so "closest" means
//!   closest to the eye.
//! - **Dithering**: seven algorithms ([`DitherAlgorithm`]) from plain
//!   nearest-color through error diffusion and ordered blue noise to
//!   pattern dithers, all producing frames that contain only palette
//!   colors.
//!
//! One palette can serve a whole animation: analyze every frame once, then
//! reduce each frame with the same reducer.
//!
//! Byte-level file encoding is deliberately out of scope; pair this crate
//! with an encoder that accepts a palette and per-pixel indices.
//!
//! # Example
//!
//! ```
//! use zendither::{DitherAlgorithm, Frame, PaletteReducer, PixelFrame};
//!
//! // Two reds the target palette cannot represent exactly.
//! let mut frame = PixelFrame::from_rgba_bytes(2, 1, &[200, 40, 40, 255, 90, 20, 20, 255])?;
//!
//! let mut reducer = PaletteReducer::new(); // built-in 256-color palette
//! reducer.analyze(&frame); // or derive a palette from the frame itself
//! reducer.reduce_with(&mut frame, DitherAlgorithm::BlueNoise);
//!
//! let first = frame.pixel(0, 0);
//! assert!(reducer.palette_array().contains(&first));
//! # Ok::<(), zendither::ZenditherError>(())
//! ```

pub mod bluenoise;
pub mod dither;
pub mod error;
pub mod frame;
pub mod haltonic;
mod mediancut;
pub mod oklab;
pub mod palette;

pub use dither::DitherAlgorithm;
pub use error::ZenditherError;
pub use frame::{Blending, Frame, PixelFrame};
pub use haltonic::HALTONIC;
pub use palette::PaletteReducer;
