// THEORY:
// The reflectance extractor is the Retinex step proper. Dividing luminance by its
// illumination estimate (a subtraction in the log domain) leaves a map that is,
// ideally, independent of the lighting. That map has no natural range, so it is
// renormalized by percentile clipping: the `percentile_low` value maps to 0, the
// `percentile_high` value maps to 1, and everything outside is clipped. A gain and
// offset shape the result before it is re-quantized to 8-bit levels.
//
// Percentiles are taken over the current frame only. Because those bounds move from
// frame to frame, real footage can show mild flicker here; temporal stability is
// the job of the exposure controller that follows, not of this stage.
//
// Degenerate frames: when the two percentile values are closer than
// `COLLAPSED_RANGE`, the map carries no usable contrast (a flat field, or equal
// percentiles). Every sample is then normalized to the constant 0.5, so the output
// is the uniform level `round(255 * clamp(gain * 0.5 + offset / 255, 0, 1))`.

use crate::core_modules::illumination::{LUMA_FLOOR, normalize_luma};
use crate::core_modules::plane::{Plane, percentile_in_place};
use rayon::prelude::*;

/// Percentile spreads below this are treated as collapsed.
pub const COLLAPSED_RANGE: f32 = 1e-4;
/// Normalized value assigned to every sample of a collapsed map.
pub const COLLAPSED_LEVEL: f32 = 0.5;
const RANGE_EPSILON: f32 = 1e-6;

/// Shaping parameters for the reflectance stage.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReflectanceParams {
    /// Lower clip percentile, 0..=100.
    pub percentile_low: f32,
    /// Upper clip percentile, percentile_low..=100.
    pub percentile_high: f32,
    /// Multiplier applied after normalization.
    pub gain: f32,
    /// Offset on the 0..255 scale, added after the gain.
    pub offset: f32,
}

/// The log-domain reflectance map `log(L) - log(illumination)`.
///
/// `luma` is on the 0..255 scale; `illumination` on the normalized scale produced
/// by `estimate_illumination`.
pub fn log_reflectance(luma: &Plane, illumination: &Plane) -> Plane {
    normalize_luma(luma).zip_map(illumination, |l, i| l.ln() - i.max(LUMA_FLOOR).ln())
}

/// Extracts a contrast-normalized, 8-bit-quantized luminance from `luma` and its
/// illumination estimate.
pub fn extract_reflectance(luma: &Plane, illumination: &Plane, params: &ReflectanceParams) -> Plane {
    let reflectance = log_reflectance(luma, illumination);
    if reflectance.is_empty() {
        return reflectance;
    }

    let mut scratch = reflectance.data().to_vec();
    let low = percentile_in_place(&mut scratch, params.percentile_low);
    let high = percentile_in_place(&mut scratch, params.percentile_high);
    let range = high - low;
    let collapsed = !(range >= COLLAPSED_RANGE);
    let offset = params.offset / 255.0;
    let gain = params.gain;

    let mut out = reflectance;
    out.data_mut().par_iter_mut().for_each(|v| {
        let normalized = if collapsed {
            COLLAPSED_LEVEL
        } else {
            ((*v - low) / (range + RANGE_EPSILON)).clamp(0.0, 1.0)
        };
        let shaped = (gain * normalized + offset).clamp(0.0, 1.0);
        *v = (shaped * 255.0).round();
    });
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_modules::illumination::estimate_illumination;

    const PARAMS: ReflectanceParams = ReflectanceParams {
        percentile_low: 5.0,
        percentile_high: 95.0,
        gain: 1.08,
        offset: 0.0,
    };

    #[test]
    fn flat_field_collapses_to_the_documented_constant() {
        let luma = Plane::filled(40, 30, 90.0);
        let illumination = estimate_illumination(&luma, 80.0);
        let out = extract_reflectance(&luma, &illumination, &PARAMS);
        let expected = (255.0f32 * (1.08 * 0.5)).round();
        assert!(out.data().iter().all(|&v| v == expected), "expected {expected}");
    }

    #[test]
    fn equal_percentiles_collapse_as_well() {
        let data = (0..100).map(|i| i as f32 * 2.0 + 10.0).collect();
        let luma = Plane::from_vec(10, 10, data);
        let illumination = estimate_illumination(&luma, 3.0);
        let params = ReflectanceParams {
            percentile_low: 50.0,
            percentile_high: 50.0,
            gain: 1.0,
            offset: 25.5,
        };
        let out = extract_reflectance(&luma, &illumination, &params);
        assert!(out.data().iter().all(|&v| v == 153.0));
    }

    #[test]
    fn output_is_quantized_and_bounded() {
        let data = (0..32 * 32).map(|i| ((i * 37) % 251) as f32).collect();
        let luma = Plane::from_vec(32, 32, data);
        let illumination = estimate_illumination(&luma, 8.0);
        let out = extract_reflectance(&luma, &illumination, &PARAMS);
        for &v in out.data() {
            assert!((0.0..=255.0).contains(&v));
            assert_eq!(v, v.round());
        }
        assert!(out.data().contains(&0.0));
        assert!(out.data().contains(&255.0));
    }

    #[test]
    fn brighter_surface_maps_higher_under_shared_lighting() {
        let data = (0..16 * 16)
            .map(|i| if i % 16 < 8 { 40.0 } else { 160.0 })
            .collect();
        let luma = Plane::from_vec(16, 16, data);
        let illumination = estimate_illumination(&luma, 30.0);
        let out = extract_reflectance(&luma, &illumination, &PARAMS);
        assert!(out.get(12, 8) > out.get(3, 8));
    }
}
