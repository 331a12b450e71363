use thiserror::Error;

#[derive(Debug, Error)]
pub enum ZenditherError {
    #[error("frame dimensions cannot be zero")]
    ZeroDimension,

    #[error("pixel buffer length {len} does not match dimensions {width}x{height}")]
    DimensionMismatch {
        len: usize,
        width: u32,
        height: u32,
    },

    #[error("preloaded palette mapping must be 32768 bytes, got {len}")]
    PreloadLength { len: usize },

    #[error("preloaded palette must have 2..=256 entries, got {len}")]
    PaletteLength { len: usize },
}
