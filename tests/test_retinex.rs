// tests/test_retinex.rs -- Stage laws and temporal behaviour of the Retinex
// pipeline, exercised through the public modules.

use image::{GrayImage, Luma, Rgb, RgbImage};
use retinex_vision::core_modules::chroma::clean_chroma;
use retinex_vision::core_modules::color_space::{ColorSpace, from_luma_chroma, to_luma_chroma};
use retinex_vision::core_modules::detail::deband;
use retinex_vision::core_modules::exposure::scale_from_mean;
use retinex_vision::core_modules::highlight::compress_highlights;
use retinex_vision::core_modules::illumination::estimate_illumination;
use retinex_vision::core_modules::plane::Plane;
use retinex_vision::core_modules::reflectance::extract_reflectance;
use retinex_vision::{ExposureState, Frame, Preset, RetinexConfig, RetinexPipeline};

fn card() -> RgbImage {
    RgbImage::from_fn(40, 30, |x, y| Rgb([(x * 6) as u8, (y * 8) as u8, ((x + y) * 3) as u8]))
}

#[test]
fn split_merge_round_trip_in_both_spaces() {
    let frame = Frame::Color(card());
    for space in [ColorSpace::YCbCr, ColorSpace::Lab] {
        let Frame::Color(back) = from_luma_chroma(&to_luma_chroma(&frame, space)) else {
            panic!("colour frame came back gray");
        };
        let worst = back
            .as_raw()
            .iter()
            .zip(card().as_raw())
            .map(|(a, b)| a.abs_diff(*b))
            .max()
            .unwrap_or(0);
        assert!(worst <= 1, "{space:?}: worst channel error {worst}");
    }
}

#[test]
fn disabled_stages_are_exact_identities() {
    let split = to_luma_chroma(&Frame::Color(card()), ColorSpace::Lab);
    assert_eq!(compress_highlights(&split.luma, 0.0), split.luma);
    assert_eq!(deband(&split.luma, 0.0), split.luma);
    let chroma = split.chroma.unwrap();
    assert_eq!(clean_chroma(&chroma, 1), chroma);
}

#[test]
fn constant_gray_frame_collapses_to_the_documented_level() {
    let config = RetinexConfig::default();
    let luma = Plane::filled(64, 48, 100.0);
    let illumination = estimate_illumination(&luma, config.sigma);
    for &v in illumination.data() {
        assert!((v * 255.0 - 100.0).abs() < 0.05);
    }
    let reflectance = extract_reflectance(&luma, &illumination, &config.reflectance_params());
    let expected = (255.0f32 * (config.gain * 0.5 + config.offset / 255.0).clamp(0.0, 1.0)).round();
    assert!(reflectance.data().iter().all(|&v| v == expected));
}

#[test]
fn two_frame_exposure_is_a_blend_not_a_recomputation() {
    let (target, alpha) = (100.0, 0.9);
    let bright = Plane::filled(16, 16, 200.0);
    let dark = Plane::filled(16, 16, 50.0);
    let raw_bright = scale_from_mean(&bright, target, 0.1, 10.0);
    let raw_dark = scale_from_mean(&dark, target, 0.1, 10.0);

    let state = ExposureState::new().advance(raw_bright, alpha).advance(raw_dark, alpha);
    let expected = alpha * raw_bright + (1.0 - alpha) * raw_dark;
    assert!((state.scale() - expected).abs() < 1e-6);
    assert!((state.scale() - 0.65).abs() < 1e-6);
}

#[test]
fn pipeline_state_threads_across_frames() {
    let config = RetinexConfig {
        min_scale: 0.5,
        max_scale: 2.0,
        alpha: 0.9,
        ..RetinexConfig::default()
    };
    let pipeline = RetinexPipeline::new(config).unwrap();
    let first = Frame::Gray(GrayImage::from_fn(32, 32, |x, y| Luma([(x * 4 + y) as u8])));
    let second = Frame::Gray(GrayImage::from_fn(32, 32, |x, y| Luma([(y * 4 + x) as u8])));

    let a = pipeline.enhance(&first, ExposureState::new());
    let b = pipeline.enhance(&second, a.state);
    let expected = 0.9 * a.raw_scale + 0.1 * b.raw_scale;
    assert!((b.state.scale() - expected).abs() < 1e-5);
}

#[test]
fn debright_preset_never_brightens_exposure() {
    let config = Preset::Debright.config();
    let pipeline = RetinexPipeline::new(config.clone()).unwrap();
    let mut state = ExposureState::new();
    for level in [20u8, 200, 90, 5] {
        let frame = Frame::Gray(GrayImage::from_fn(24, 24, |x, _| Luma([level.saturating_add(x as u8)])));
        let out = pipeline.enhance(&frame, state);
        state = out.state;
        assert!(state.scale() <= 1.0 + 1e-6);
    }
}
