// THEORY:
// Retinex treats an observed luminance as reflectance times illumination. The
// illumination is the slowly varying part (the lighting), so it is estimated by
// smoothing the luminance with a very wide Gaussian. Whatever survives a blur of
// 60..150 pixels is lighting; whatever the blur removes is surface detail.
//
// The estimate is returned normalized to [0, 1] and floored away from zero so the
// log in the reflectance stage is always defined.

use crate::core_modules::convolution::gaussian_blur;
use crate::core_modules::plane::Plane;

/// Smallest value a normalized luminance or illumination sample may take.
pub const LUMA_FLOOR: f32 = 1e-6;

/// Normalizes a 0..255 luminance plane to [LUMA_FLOOR, 1].
pub fn normalize_luma(luma: &Plane) -> Plane {
    luma.map(|v| (v / 255.0).clamp(LUMA_FLOOR, 1.0))
}

/// Estimates scene illumination from a 0..255 luminance plane.
///
/// The output is on the normalized [LUMA_FLOOR, 1] scale. A non-positive `sigma`
/// leaves the normalized luminance unblurred.
pub fn estimate_illumination(luma: &Plane, sigma: f32) -> Plane {
    let normalized = normalize_luma(luma);
    gaussian_blur(&normalized, sigma).map(|v| v.clamp(LUMA_FLOOR, 1.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flat_field_illumination_equals_the_input_level() {
        let luma = Plane::filled(48, 32, 153.0);
        let illumination = estimate_illumination(&luma, 80.0);
        for &v in illumination.data() {
            assert!((v - 153.0 / 255.0).abs() < 1e-4);
        }
    }

    #[test]
    fn black_input_is_floored() {
        let luma = Plane::filled(4, 4, 0.0);
        let illumination = estimate_illumination(&luma, 10.0);
        assert!(illumination.data().iter().all(|&v| v >= LUMA_FLOOR));
    }

    #[test]
    fn non_positive_sigma_returns_normalized_luma() {
        let luma = Plane::from_vec(2, 1, vec![0.0, 255.0]);
        let illumination = estimate_illumination(&luma, 0.0);
        assert_eq!(illumination.data(), &[LUMA_FLOOR, 1.0]);
    }

    #[test]
    fn illumination_removes_fine_texture() {
        let data = (0..64 * 64)
            .map(|i| if (i % 64 + i / 64) % 2 == 0 { 60.0 } else { 200.0 })
            .collect();
        let luma = Plane::from_vec(64, 64, data);
        let illumination = estimate_illumination(&luma, 20.0);
        let centre = illumination.get(32, 32) * 255.0;
        assert!((centre - 130.0).abs() < 5.0, "checkerboard centre {centre}");
    }
}
