// THEORY:
// The `pipeline` module is the top-level API of the Retinex enhancer. It turns one
// decoded frame plus the exposure state left by the previous frame into one
// enhanced frame plus the state for the next.
//
// Per frame, in this order:
//   (optional) denoise -> split luma/chroma -> illumination -> reflectance
//   -> raw exposure scale -> smooth with the previous state -> apply scale
//   -> highlight compression -> [ deband -> sharpen (luma) || chroma clean ]
//   -> merge.
//
// Key architectural principles:
// 1.  **One Piece of Memory**: The smoothed exposure scale is the only value that
//     crosses frames. It is never stored in the pipeline; it is passed in and
//     returned, so the pipeline itself is immutable and can be shared.
// 2.  **Validated Once**: `RetinexPipeline::new` refuses an invalid configuration.
//     After that no stage can fail; numerical degeneracy (black frames, flat
//     fields) has a defined fallback in each stage.
// 3.  **Split Parallelism**: The luminance chain and the chroma cleaner touch
//     disjoint planes and run side by side with `rayon::join`. Frames themselves
//     are never processed out of order.

use crate::config::{EnhanceConfig, FilterKind, RetinexConfig};
use crate::core_modules::chroma::clean_chroma;
use crate::core_modules::color_space::{LumaChroma, from_luma_chroma, to_luma_chroma};
use crate::core_modules::denoise::denoise_frame;
use crate::core_modules::detail::{deband, sharpen};
use crate::core_modules::equalize::Clahe;
use crate::core_modules::exposure::{apply_scale, scale_from_mean};
use crate::core_modules::filters::{FrameFilter, HistogramEqualizer};
use crate::core_modules::frame::Frame;
use crate::core_modules::highlight::compress_highlights;
use crate::core_modules::illumination::estimate_illumination;
use crate::core_modules::power_law::PowerLaw;
use crate::core_modules::reflectance::extract_reflectance;
use crate::error::ConfigError;
use tracing::debug;

// Re-export the state type; it is part of this module's public surface.
pub use crate::core_modules::exposure::ExposureState;

/// The result of enhancing one frame.
#[derive(Debug, Clone)]
pub struct RetinexOutput {
    pub frame: Frame,
    /// State to pass with the next frame.
    pub state: ExposureState,
    /// This frame's unsmoothed exposure scale.
    pub raw_scale: f32,
}

/// The Retinex "debright" enhancer.
#[derive(Debug, Clone)]
pub struct RetinexPipeline {
    config: RetinexConfig,
}

impl RetinexPipeline {
    pub fn new(config: RetinexConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &RetinexConfig {
        &self.config
    }

    pub fn enhance(&self, frame: &Frame, state: ExposureState) -> RetinexOutput {
        let cfg = &self.config;

        let denoised;
        let frame = if cfg.denoise {
            denoised = denoise_frame(frame, &cfg.denoise_params());
            &denoised
        } else {
            frame
        };

        // Stage 1: Separate brightness from colour.
        let LumaChroma { space, luma, chroma } = to_luma_chroma(frame, cfg.color_space);

        // Stage 2: Retinex reflectance.
        let illumination = estimate_illumination(&luma, cfg.sigma);
        let reflectance = extract_reflectance(&luma, &illumination, &cfg.reflectance_params());

        // Stage 3: Temporally smoothed exposure.
        let raw_scale = scale_from_mean(&reflectance, cfg.target_mean, cfg.min_scale, cfg.max_scale);
        let state = state.advance(raw_scale, cfg.alpha);
        let scale = state.scale();
        debug!(raw_scale, smoothed_scale = scale, "exposure");
        let exposed = apply_scale(&reflectance, scale);

        // Stage 4: Tone and detail.
        let toned = compress_highlights(&exposed, cfg.highlight_strength);
        let (luma, chroma) = rayon::join(
            || {
                let smooth = deband(&toned, cfg.deband_sigma);
                sharpen(&smooth, cfg.sharpen_amount, cfg.sharpen_radius, cfg.sharpen_threshold)
            },
            || chroma.map(|pair| clean_chroma(&pair, cfg.chroma_kernel)),
        );

        let frame = from_luma_chroma(&LumaChroma { space, luma, chroma });
        RetinexOutput {
            frame,
            state,
            raw_scale,
        }
    }
}

impl FrameFilter for RetinexPipeline {
    type State = ExposureState;

    fn name(&self) -> &'static str {
        "retinex"
    }

    fn process(&self, frame: &Frame, state: ExposureState) -> (Frame, ExposureState) {
        let out = self.enhance(frame, state);
        (out.frame, out.state)
    }
}

/// Any of the shipped filters, chosen at run time from an `EnhanceConfig`.
#[derive(Debug, Clone)]
pub enum EnhanceFilter {
    Equalize(HistogramEqualizer),
    Clahe(Clahe),
    PowerLaw(PowerLaw),
    Retinex(RetinexPipeline),
}

impl EnhanceFilter {
    pub fn from_config(config: &EnhanceConfig) -> Result<Self, ConfigError> {
        Ok(match config.filter {
            FilterKind::Equalize => EnhanceFilter::Equalize(HistogramEqualizer),
            FilterKind::Clahe => {
                config.clahe.validate()?;
                EnhanceFilter::Clahe(config.clahe)
            }
            FilterKind::PowerLaw => EnhanceFilter::PowerLaw(PowerLaw::new(config.power_law.gamma)?),
            FilterKind::Retinex => EnhanceFilter::Retinex(RetinexPipeline::new(config.retinex_config()?)?),
        })
    }
}

impl FrameFilter for EnhanceFilter {
    // Only the Retinex filter reads it; the others pass it through untouched.
    type State = ExposureState;

    fn name(&self) -> &'static str {
        match self {
            EnhanceFilter::Equalize(f) => f.name(),
            EnhanceFilter::Clahe(f) => f.name(),
            EnhanceFilter::PowerLaw(f) => f.name(),
            EnhanceFilter::Retinex(f) => f.name(),
        }
    }

    fn process(&self, frame: &Frame, state: ExposureState) -> (Frame, ExposureState) {
        match self {
            EnhanceFilter::Equalize(f) => (f.process(frame, ()).0, state),
            EnhanceFilter::Clahe(f) => (f.process(frame, ()).0, state),
            EnhanceFilter::PowerLaw(f) => (f.process(frame, ()).0, state),
            EnhanceFilter::Retinex(f) => f.process(frame, state),
        }
    }
}
