// benches/pipeline.rs -- Per-stage and full-frame benchmarks.
//
//   cargo bench
//
// All inputs are synthetic 640x360 scenes (gradient plus bright blocks), so the
// numbers are comparable across machines and runs.

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};

use image::{Rgb, RgbImage};
use retinex_vision::core_modules::convolution::{gaussian_blur, median_filter};
use retinex_vision::core_modules::equalize::Clahe;
use retinex_vision::core_modules::plane::Plane;
use retinex_vision::{ExposureState, Frame, Preset, RetinexPipeline};

const W: u32 = 640;
const H: u32 = 360;

// ============================================================
// Helpers
// ============================================================

fn make_scene(w: u32, h: u32) -> RgbImage {
    RgbImage::from_fn(w, h, |x, y| {
        let base = ((x * 160 / w) + (y * 60 / h)) as u8;
        let block = (x / 80 + y / 60) % 3 == 0;
        if block {
            Rgb([230, 220, 200])
        } else {
            Rgb([base, base / 2 + 20, 255 - base])
        }
    })
}

fn make_plane(w: u32, h: u32) -> Plane {
    let scene = make_scene(w, h);
    let data = scene.pixels().map(|p| p.0[0] as f32).collect();
    Plane::from_vec(w as usize, h as usize, data)
}

// ============================================================
// Per-stage benchmarks
// ============================================================

fn bench_blur(c: &mut Criterion) {
    let plane = make_plane(W, H);
    let mut group = c.benchmark_group("gaussian_blur");
    // Small sigmas convolve directly; illumination-sized ones take the box path.
    for sigma in [1.1f32, 6.0, 80.0, 140.0] {
        group.bench_with_input(BenchmarkId::from_parameter(sigma), &sigma, |b, &sigma| {
            b.iter(|| gaussian_blur(&plane, sigma))
        });
    }
    group.finish();
}

fn bench_median(c: &mut Criterion) {
    let plane = make_plane(W / 2, H / 2);
    let mut group = c.benchmark_group("median_filter");
    for k in [3usize, 5] {
        group.bench_with_input(BenchmarkId::from_parameter(k), &k, |b, &k| b.iter(|| median_filter(&plane, k)));
    }
    group.finish();
}

fn bench_clahe(c: &mut Criterion) {
    let frame = Frame::Color(make_scene(W, H));
    let clahe = Clahe::default();
    c.bench_function("clahe_640x360_t8", |b| b.iter(|| clahe.apply(&frame)));
}

// ============================================================
// Full frame
// ============================================================

fn bench_retinex(c: &mut Criterion) {
    let frame = Frame::Color(make_scene(W, H));
    let mut group = c.benchmark_group("retinex_frame");
    group.sample_size(20);
    for preset in Preset::ALL {
        let pipeline = match RetinexPipeline::new(preset.config()) {
            Ok(pipeline) => pipeline,
            Err(_) => continue,
        };
        group.bench_function(preset.name(), |b| {
            b.iter(|| pipeline.enhance(&frame, ExposureState::new()))
        });
    }
    group.finish();
}

criterion_group!(benches, bench_blur, bench_median, bench_clahe, bench_retinex);
criterion_main!(benches);
