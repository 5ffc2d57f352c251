// THEORY:
// Brightening a frame pushes its highlights toward the ceiling, where they clip and
// wash out. The highlight compressor rolls them off with a soft knee:
//
//     y = x / (x + strength * (1 - x) + eps)      on normalized [0, 1] intensity
//
// The curve is monotonic, maps 0 to 0, and bends values near 1.0 more than values
// near 0. Larger `strength` means a deeper roll-off. A strength of zero switches
// the stage off entirely and the input is returned untouched.

use crate::core_modules::plane::Plane;

/// Strengths at or below this disable the stage.
pub const DISABLED_STRENGTH: f32 = 1e-6;
const KNEE_EPSILON: f32 = 1e-6;

/// The soft-knee curve on one normalized sample.
#[inline]
pub fn knee(x: f32, strength: f32) -> f32 {
    let x = x.clamp(0.0, 1.0);
    (x / (x + strength * (1.0 - x) + KNEE_EPSILON)).clamp(0.0, 1.0)
}

/// Compresses highlights of a 0..255 luminance plane and re-quantizes.
pub fn compress_highlights(luma: &Plane, strength: f32) -> Plane {
    if !(strength > DISABLED_STRENGTH) {
        return luma.clone();
    }
    luma.map(|v| knee(v / 255.0, strength) * 255.0).quantized()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn every_level() -> Plane {
        Plane::from_vec(256, 1, (0..256).map(|v| v as f32).collect())
    }

    #[test]
    fn zero_strength_is_identity() {
        let luma = Plane::from_vec(3, 1, vec![0.0, 17.25, 255.0]);
        assert_eq!(compress_highlights(&luma, 0.0), luma);
    }

    #[test]
    fn curve_is_monotonic_and_bounded() {
        for strength in [0.0, 0.1, 0.6, 0.78, 1.0, 4.0] {
            let out = compress_highlights(&every_level(), strength);
            let data = out.data();
            for pair in data.windows(2) {
                assert!(pair[1] >= pair[0], "strength {strength}: {pair:?}");
            }
            assert!(data.iter().all(|&v| (0.0..=255.0).contains(&v)));
        }
    }

    #[test]
    fn endpoints_are_fixed() {
        let out = compress_highlights(&every_level(), 0.6);
        assert_eq!(out.get(0, 0), 0.0);
        assert_eq!(out.get(255, 0), 255.0);
    }

    #[test]
    fn knee_is_continuous_in_strength() {
        // Small strengths barely move the curve.
        let x = 0.5;
        assert!((knee(x, 1e-3) - 1.0).abs() < 0.01);
        assert!((knee(x, 1.0) - 0.5).abs() < 1e-3);
    }
}
