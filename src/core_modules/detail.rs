// THEORY:
// The `detail` module holds the two small-scale luminance stages that run after the
// exposure and highlight stages:
//
// - **Deband**: the log/percentile steps can leave visible steps between adjacent
//   8-bit levels on smooth gradients. A very light Gaussian (sigma 0.3..0.9)
//   dithers those steps away.
// - **Sharpen**: an unsharp mask that restores perceived detail lost to the blur
//   stages. A noise-floor threshold keeps it from amplifying compression artifacts:
//   only samples whose detail magnitude clears `threshold` are boosted.
//
// Deband runs first so sharpening does not reintroduce the banding it removed.

use crate::core_modules::convolution::{IDENTITY_SIGMA, gaussian_blur};
use crate::core_modules::plane::Plane;

/// Light blur against quantization banding. Identity for `sigma <= 1e-6`.
pub fn deband(luma: &Plane, sigma: f32) -> Plane {
    if !(sigma > IDENTITY_SIGMA) {
        return luma.clone();
    }
    gaussian_blur(luma, sigma).quantized()
}

/// Thresholded unsharp mask: `clip(L + amount * detail * [|detail| > threshold])`
/// where `detail = L - blur(L, radius)`.
pub fn sharpen(luma: &Plane, amount: f32, radius: f32, threshold: f32) -> Plane {
    if !(amount > 0.0) || !(radius > IDENTITY_SIGMA) {
        return luma.clone();
    }
    let blurred = gaussian_blur(luma, radius);
    luma.zip_map(&blurred, |l, b| {
        let detail = l - b;
        if detail.abs() > threshold {
            (l + amount * detail).clamp(0.0, 255.0)
        } else {
            l
        }
    })
    .quantized()
}
