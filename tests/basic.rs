use zendither::{Blending, DitherAlgorithm, Frame, PaletteReducer, PixelFrame, ZenditherError};

const ALGORITHMS: [DitherAlgorithm; 7] = [
    DitherAlgorithm::None,
    DitherAlgorithm::GradientNoise,
    DitherAlgorithm::Pattern,
    DitherAlgorithm::ChaoticNoise,
    DitherAlgorithm::Diffusion,
    DitherAlgorithm::BlueNoise,
    DitherAlgorithm::Scatter,
];

fn gradient_frame(width: u32, height: u32) -> PixelFrame {
    let mut frame = PixelFrame::new(width, height).unwrap();
    for y in 0..height {
        for x in 0..width {
            let r = (x * 255 / width.max(1)) as u32;
            let g = (y * 255 / height.max(1)) as u32;
            frame.set_pixel(x, y, r << 24 | g << 16 | 0x80 << 8 | 0xFF);
        }
    }
    frame
}

fn assert_quantized(frame: &PixelFrame, reducer: &PaletteReducer) {
    let palette = reducer.palette_array();
    for y in 0..frame.height() {
        for x in 0..frame.width() {
            let color = frame.pixel(x, y);
            assert!(
                color == 0 || palette[..reducer.color_count()].contains(&color),
                "pixel ({x}, {y}) = {color:#010X} is not a palette color"
            );
        }
    }
}

#[test]
fn smoke_every_algorithm_on_default_palette() {
    for algorithm in ALGORITHMS {
        let mut reducer = PaletteReducer::new();
        let mut frame = gradient_frame(32, 32);
        reducer.reduce_with(&mut frame, algorithm);
        assert_eq!(frame.width(), 32);
        assert_eq!(frame.height(), 32);
        assert_quantized(&frame, &reducer);
    }
}

#[test]
fn smoke_every_algorithm_on_analyzed_palette() {
    for algorithm in ALGORITHMS {
        let mut frame = gradient_frame(24, 24);
        let mut reducer = PaletteReducer::new();
        reducer.analyze(&frame);
        reducer.set_dither_strength(1.0);
        reducer.reduce_with(&mut frame, algorithm);
        assert_quantized(&frame, &reducer);
    }
}

#[test]
fn default_reduce_is_scatter() {
    let mut a = gradient_frame(16, 16);
    let mut b = a.clone();

    let mut reducer = PaletteReducer::with_palette(&[0x000000FF, 0x808080FF, 0xFFFFFFFF]);
    reducer.reduce(&mut a);

    let mut reducer = PaletteReducer::with_palette(&[0x000000FF, 0x808080FF, 0xFFFFFFFF]);
    reducer.reduce_with(&mut b, DitherAlgorithm::Scatter);

    for y in 0..16 {
        for x in 0..16 {
            assert_eq!(a.pixel(x, y), b.pixel(x, y), "mismatch at ({x}, {y})");
        }
    }
}

#[test]
fn zero_strength_diffusion_matches_solid() {
    let mut diffused = gradient_frame(20, 20);
    let mut solid = diffused.clone();

    let palette = [0x000000FF, 0x4080C0FF, 0xC08040FF, 0xFFFFFFFF];
    let mut reducer = PaletteReducer::with_palette(&palette);
    reducer.set_dither_strength(0.0);
    reducer.reduce_floyd_steinberg(&mut diffused);
    reducer.reduce_solid(&mut solid);

    for y in 0..20 {
        for x in 0..20 {
            assert_eq!(diffused.pixel(x, y), solid.pixel(x, y), "mismatch at ({x}, {y})");
        }
    }
}

#[test]
fn invalid_palette_input_falls_back_silently() {
    // Too short, and a too-small limit: both land on the Haltonic palette
    // without an error.
    let mut reducer = PaletteReducer::with_palette(&[0x123456FF]);
    assert_eq!(reducer.color_count(), 256);
    assert_eq!(reducer.palette_array()[0], 0);

    reducer.exact_limited(&[0xFF0000FF, 0x00FF00FF, 0x0000FFFF], 1);
    assert_eq!(reducer.color_count(), 256);

    // A frame still reduces fine afterwards.
    let mut frame = gradient_frame(8, 8);
    reducer.reduce(&mut frame);
    assert_quantized(&frame, &reducer);
}

#[test]
fn frame_construction_errors() {
    assert!(matches!(
        PixelFrame::new(0, 8),
        Err(ZenditherError::ZeroDimension)
    ));
    assert!(matches!(
        PixelFrame::from_rgba_bytes(3, 3, &[0u8; 4]),
        Err(ZenditherError::DimensionMismatch { .. })
    ));
}

#[test]
fn shared_palette_across_animation_frames() {
    // Derive one palette from all frames, then reduce each with it — the
    // animated-encoding workflow.
    let frames: Vec<PixelFrame> = (0..4)
        .map(|i| {
            let mut frame = PixelFrame::new(8, 8).unwrap();
            for y in 0..8 {
                for x in 0..8 {
                    let v = (x * 16 + y * 8 + i * 32) as u32 & 0xFF;
                    frame.set_pixel(x, y, v << 24 | v << 16 | v << 8 | 0xFF);
                }
            }
            frame
        })
        .collect();

    let mut reducer = PaletteReducer::new();
    reducer.analyze_group(&frames, 150, 16);
    assert!(reducer.color_count() <= 16);

    for mut frame in frames {
        reducer.reduce(&mut frame);
        assert_quantized(&frame, &reducer);
    }
}

#[test]
fn blending_mode_restored_by_every_algorithm() {
    for algorithm in ALGORITHMS {
        let mut reducer = PaletteReducer::new();
        let mut frame = gradient_frame(8, 8);
        frame.set_blending(Blending::SourceOver);
        reducer.reduce_with(&mut frame, algorithm);
        assert_eq!(
            frame.blending(),
            Blending::SourceOver,
            "{algorithm:?} did not restore the blending mode"
        );
    }
}

#[test]
fn median_cut_palette_reduces_frames() {
    let mut frame = gradient_frame(32, 32);
    let mut reducer = PaletteReducer::new();
    reducer.analyze_median_cut(&frame, 32);
    assert!(reducer.color_count() <= 32);
    assert!(reducer.color_count() >= 2);
    reducer.reduce_with(&mut frame, DitherAlgorithm::Diffusion);
    assert_quantized(&frame, &reducer);
}
