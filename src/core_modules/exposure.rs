// THEORY:
// The exposure controller turns the brightness of a normalized luminance into a
// single gain. It is the only stage with memory: the raw gain of each frame is
// blended into an exponential moving average, and it is the smoothed gain that is
// applied. That average is what keeps exposure from pumping between frames.
//
// Key architectural principles:
// 1.  **Bounded Gain**: The raw gain is `target / mean`, clamped to
//     [min_scale, max_scale]. A near-black frame has no meaningful mean and gets
//     the neutral gain 1.0 (clamped like any other gain).
// 2.  **Explicit State**: The smoothed gain lives in an `ExposureState` value that
//     is passed into each frame and returned from it. There is no hidden field; a
//     caller can inspect, store, or replay the state frame by frame.
// 3.  **Strict Order**: `advance` depends on the previous state, so frames must be
//     fed in decode order. The state is `Copy`, which makes accidental sharing
//     between two runs impossible.
// 4.  **Range Preservation**: Each update is a convex blend of values already in
//     [min_scale, max_scale], so the smoothed gain never leaves that range.

use crate::core_modules::plane::Plane;

/// Means below this are treated as an all-black frame.
pub const MEAN_FLOOR: f32 = 1e-6;

/// Raw exposure gain for one frame: `clamp(target_mean / mean(luma), min, max)`.
/// A degenerate (near-black) frame gets the neutral gain 1.0, still clamped so
/// the result never leaves [min_scale, max_scale].
pub fn scale_from_mean(luma: &Plane, target_mean: f32, min_scale: f32, max_scale: f32) -> f32 {
    let mean = luma.mean();
    if !(mean >= MEAN_FLOOR) {
        return 1.0f32.clamp(min_scale, max_scale);
    }
    (target_mean / mean).clamp(min_scale, max_scale)
}

/// Multiplies every sample by `scale`, clips to 0..=255 and re-quantizes.
pub fn apply_scale(luma: &Plane, scale: f32) -> Plane {
    luma.map(|v| (v * scale).clamp(0.0, 255.0)).quantized()
}

/// The smoothed exposure gain carried from one frame to the next.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ExposureState {
    smoothed: Option<f32>,
}

impl ExposureState {
    /// A fresh state: the first `advance` adopts its sample unchanged.
    pub fn new() -> Self {
        Self::default()
    }

    /// The smoothed gain, or `None` before the first frame.
    pub fn smoothed(&self) -> Option<f32> {
        self.smoothed
    }

    /// The gain to apply: the smoothed value, or neutral before the first frame.
    pub fn scale(&self) -> f32 {
        self.smoothed.unwrap_or(1.0)
    }

    /// Folds one raw gain into the average: `alpha * previous + (1 - alpha) * raw`.
    #[must_use]
    pub fn advance(self, raw_scale: f32, alpha: f32) -> Self {
        let smoothed = match self.smoothed {
            None => raw_scale,
            Some(previous) => alpha * previous + (1.0 - alpha) * raw_scale,
        };
        Self {
            smoothed: Some(smoothed),
        }
    }
}
