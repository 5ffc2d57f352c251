// THEORY:
// The `convolution` module holds the spatial kernels every stage is built from:
// Gaussian smoothing (small and large), box filtering and the median filter.
//
// Key architectural principles:
// 1.  **Separability**: A 2D Gaussian is a row pass followed by a column pass,
//     O(2k) per pixel instead of O(k^2). The column pass is run as a row pass over
//     the transposed plane so both passes share one cache-friendly loop.
// 2.  **Two Regimes**: Debanding and sharpening use sigmas around 0.3..2, where an
//     exact sampled kernel is cheap. Illumination estimation uses sigmas of
//     60..150 pixels, where an exact kernel would be hundreds of taps wide. Above
//     `EXACT_GAUSSIAN_MAX_SIGMA` the blur switches to three successive box passes
//     whose widths are chosen so the combined variance matches the Gaussian.
//     Each box pass is a running sum, O(1) per pixel regardless of radius.
// 3.  **Edge Replication**: Out-of-bounds taps read the nearest edge sample, so a
//     flat plane stays exactly flat under every kernel here.
// 4.  **Row Parallelism**: Output rows are independent and are produced with rayon.

use crate::core_modules::plane::Plane;
use rayon::prelude::*;

/// Sigmas at or below this are treated as "no blur".
pub const IDENTITY_SIGMA: f32 = 1e-6;
/// Largest sigma blurred with an exact sampled kernel.
pub const EXACT_GAUSSIAN_MAX_SIGMA: f32 = 6.0;
/// Box passes used to approximate a large Gaussian.
const BOX_PASSES: usize = 3;

/// A normalized, sampled Gaussian kernel with radius `ceil(3 * sigma)`.
pub fn gaussian_kernel(sigma: f32) -> Vec<f32> {
    let radius = ((3.0 * sigma).ceil() as usize).max(1);
    let denom = 2.0 * sigma * sigma;
    let mut kernel: Vec<f32> = (0..=2 * radius)
        .map(|i| {
            let d = i as f32 - radius as f32;
            (-(d * d) / denom).exp()
        })
        .collect();
    let sum: f32 = kernel.iter().sum();
    for k in &mut kernel {
        *k /= sum;
    }
    kernel
}

/// Isotropic Gaussian blur. Identity for `sigma <= IDENTITY_SIGMA`.
pub fn gaussian_blur(plane: &Plane, sigma: f32) -> Plane {
    if !(sigma > IDENTITY_SIGMA) || plane.is_empty() {
        return plane.clone();
    }
    if sigma > EXACT_GAUSSIAN_MAX_SIGMA {
        return approximate_gaussian_blur(plane, sigma);
    }
    let kernel = gaussian_kernel(sigma);
    let rows = convolve_rows(plane, &kernel);
    convolve_rows(&rows.transposed(), &kernel).transposed()
}

/// Convolves each row with a centred, odd-length kernel.
pub fn convolve_rows(plane: &Plane, kernel: &[f32]) -> Plane {
    assert!(kernel.len() % 2 == 1, "kernel length must be odd (got {})", kernel.len());

    let width = plane.width();
    let height = plane.height();
    if width == 0 || height == 0 {
        return plane.clone();
    }
    let half = kernel.len() / 2;
    let last = width as isize - 1;
    let mut out = Plane::new(width, height);

    out.data_mut()
        .par_chunks_mut(width)
        .enumerate()
        .for_each(|(y, dst)| {
            let src = plane.row(y);
            for (x, slot) in dst.iter_mut().enumerate() {
                let mut acc = 0.0f32;
                if x >= half && x + half < width {
                    let window = &src[x - half..=x + half];
                    for (&v, &k) in window.iter().zip(kernel) {
                        acc += v * k;
                    }
                } else {
                    for (ki, &k) in kernel.iter().enumerate() {
                        let sx = (x as isize + ki as isize - half as isize).clamp(0, last);
                        acc += src[sx as usize] * k;
                    }
                }
                *slot = acc;
            }
        });
    out
}

/// Running-sum box filter over each row, window `2 * radius + 1`.
pub fn box_blur_rows(plane: &Plane, radius: usize) -> Plane {
    let width = plane.width();
    let height = plane.height();
    if radius == 0 || width == 0 || height == 0 {
        return plane.clone();
    }
    let window = (2 * radius + 1) as f64;
    let last = width - 1;
    let mut out = Plane::new(width, height);

    out.data_mut()
        .par_chunks_mut(width)
        .enumerate()
        .for_each(|(y, dst)| {
            let src = plane.row(y);
            let at = |i: isize| -> f64 { src[i.clamp(0, last as isize) as usize] as f64 };

            let mut acc: f64 = (-(radius as isize)..=radius as isize).map(at).sum();
            for (x, slot) in dst.iter_mut().enumerate() {
                *slot = (acc / window) as f32;
                let x = x as isize;
                acc += at(x + radius as isize + 1) - at(x - radius as isize);
            }
        });
    out
}

/// Two-dimensional box blur: a row pass then a column pass.
pub fn box_blur(plane: &Plane, radius: usize) -> Plane {
    let rows = box_blur_rows(plane, radius);
    box_blur_rows(&rows.transposed(), radius).transposed()
}

/// Radii of `passes` successive box filters whose combined variance best matches
/// a Gaussian of standard deviation `sigma`.
pub fn box_radii_for_gaussian(sigma: f32, passes: usize) -> Vec<usize> {
    let n = passes as f32;
    let ideal_width = (12.0 * sigma * sigma / n + 1.0).sqrt();
    let mut lower = ideal_width.floor() as i64;
    if lower % 2 == 0 {
        lower -= 1;
    }
    let lower = lower.max(1);
    let upper = lower + 2;
    let lower_f = lower as f32;
    let ideal_lower_count = (12.0 * sigma * sigma - n * lower_f * lower_f - 4.0 * n * lower_f - 3.0 * n)
        / (-4.0 * lower_f - 4.0);
    let lower_count = ideal_lower_count.round().max(0.0) as usize;

    (0..passes)
        .map(|i| {
            let width = if i < lower_count { lower } else { upper };
            ((width - 1) / 2) as usize
        })
        .collect()
}

fn approximate_gaussian_blur(plane: &Plane, sigma: f32) -> Plane {
    let radii = box_radii_for_gaussian(sigma, BOX_PASSES);
    let mut current = box_blur_rows(plane, radii[0]);
    for &radius in &radii[1..] {
        current = box_blur_rows(&current, radius);
    }
    let mut current = current.transposed();
    for &radius in &radii {
        current = box_blur_rows(&current, radius);
    }
    current.transposed()
}

/// Median filter with a square `kernel` x `kernel` window and replicated edges.
///
/// Panics if `kernel` is even.
pub fn median_filter(plane: &Plane, kernel: usize) -> Plane {
    assert!(kernel % 2 == 1, "median kernel must be odd (got {kernel})");
    let width = plane.width();
    let height = plane.height();
    if kernel <= 1 || width == 0 || height == 0 {
        return plane.clone();
    }
    let half = (kernel / 2) as isize;
    let (max_x, max_y) = (width as isize - 1, height as isize - 1);
    let mut out = Plane::new(width, height);

    out.data_mut()
        .par_chunks_mut(width)
        .enumerate()
        .for_each(|(y, dst)| {
            let mut window = Vec::with_capacity(kernel * kernel);
            for (x, slot) in dst.iter_mut().enumerate() {
                window.clear();
                for dy in -half..=half {
                    let sy = (y as isize + dy).clamp(0, max_y) as usize;
                    let row = plane.row(sy);
                    for dx in -half..=half {
                        let sx = (x as isize + dx).clamp(0, max_x) as usize;
                        window.push(row[sx]);
                    }
                }
                let mid = window.len() / 2;
                let (_, median, _) = window.select_nth_unstable_by(mid, f32::total_cmp);
                *slot = *median;
            }
        });
    out
}
