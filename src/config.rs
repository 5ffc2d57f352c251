// THEORY:
// Configuration is supplied wholesale when a run starts and never changes during
// it. There are two layers:
//
// 1.  `RetinexConfig`: one fully specified record of every Retinex tuning knob.
//     Every field has a stated default, and `validate` checks every range once so
//     the stages themselves never re-check their inputs.
// 2.  `EnhanceConfig`: the YAML file shape used by the binaries. It picks the
//     filter, starts the Retinex record from a named `Preset` and lets the file
//     override individual keys, and carries the CLAHE, power-law, output and
//     frame-policy settings.

use crate::core_modules::color_space::ColorSpace;
use crate::core_modules::denoise::NlMeansParams;
use crate::core_modules::equalize::Clahe;
use crate::core_modules::power_law::PowerLaw;
use crate::core_modules::reflectance::ReflectanceParams;
use crate::error::ConfigError;
use crate::runner::FramePolicy;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;

/// Every tuning parameter of the Retinex pipeline. Unknown keys are rejected so
/// a misspelled override fails loudly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetinexConfig {
    /// Illumination blur standard deviation, in pixels.
    pub sigma: f32,
    /// Multiplier applied to the normalized reflectance.
    pub gain: f32,
    /// Offset added to the normalized reflectance, on the 0..255 scale.
    pub offset: f32,
    /// Lower reflectance clip percentile.
    pub percentile_low: f32,
    /// Upper reflectance clip percentile.
    pub percentile_high: f32,
    /// Mean luminance (0..255) the exposure controller steers toward.
    pub target_mean: f32,
    pub min_scale: f32,
    pub max_scale: f32,
    /// Weight of the previous smoothed scale in the moving average.
    pub alpha: f32,
    /// Soft-knee highlight compression strength; 0 disables.
    pub highlight_strength: f32,
    /// Chroma median kernel; below 3 disables, even sizes round up.
    pub chroma_kernel: usize,
    /// Deband blur sigma; 0 disables.
    pub deband_sigma: f32,
    pub sharpen_amount: f32,
    pub sharpen_radius: f32,
    /// Detail magnitude (0..255) a sample must exceed to be sharpened.
    pub sharpen_threshold: f32,
    /// Non-local-means denoise before the colour split.
    pub denoise: bool,
    pub color_space: ColorSpace,
}

impl Default for RetinexConfig {
    fn default() -> Self {
        Self {
            sigma: 80.0,
            gain: 1.08,
            offset: 0.0,
            percentile_low: 5.0,
            percentile_high: 95.0,
            target_mean: 98.0,
            min_scale: 0.85,
            max_scale: 1.05,
            alpha: 0.92,
            highlight_strength: 0.60,
            chroma_kernel: 3,
            deband_sigma: 0.4,
            sharpen_amount: 0.55,
            sharpen_radius: 1.1,
            sharpen_threshold: 6.0,
            denoise: false,
            color_space: ColorSpace::Lab,
        }
    }
}

fn check(field: &'static str, value: f32, ok: bool, rule: &str) -> Result<(), ConfigError> {
    if !value.is_finite() {
        return Err(ConfigError::invalid(field, format!("must be finite, got {value}")));
    }
    if !ok {
        return Err(ConfigError::invalid(field, format!("{rule}, got {value}")));
    }
    Ok(())
}

impl RetinexConfig {
    /// Checks every parameter range. A configuration that passes is safe for
    /// every stage: no stage can produce NaN, Inf or an out-of-range sample.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check("sigma", self.sigma, self.sigma > 0.0, "must be > 0")?;
        check("gain", self.gain, self.gain >= 0.0, "must be >= 0")?;
        check("offset", self.offset, true, "")?;
        check(
            "percentile_low",
            self.percentile_low,
            (0.0..=100.0).contains(&self.percentile_low),
            "must be within 0..=100",
        )?;
        check(
            "percentile_high",
            self.percentile_high,
            (self.percentile_low..=100.0).contains(&self.percentile_high),
            "must be within percentile_low..=100",
        )?;
        check(
            "target_mean",
            self.target_mean,
            self.target_mean > 0.0 && self.target_mean <= 255.0,
            "must be within (0, 255]",
        )?;
        check("min_scale", self.min_scale, self.min_scale > 0.0, "must be > 0")?;
        check(
            "max_scale",
            self.max_scale,
            self.max_scale >= self.min_scale,
            "must be >= min_scale",
        )?;
        check("alpha", self.alpha, (0.0..=1.0).contains(&self.alpha), "must be within 0..=1")?;
        check(
            "highlight_strength",
            self.highlight_strength,
            self.highlight_strength >= 0.0,
            "must be >= 0",
        )?;
        check("deband_sigma", self.deband_sigma, self.deband_sigma >= 0.0, "must be >= 0")?;
        check("sharpen_amount", self.sharpen_amount, self.sharpen_amount >= 0.0, "must be >= 0")?;
        check("sharpen_radius", self.sharpen_radius, self.sharpen_radius > 0.0, "must be > 0")?;
        check(
            "sharpen_threshold",
            self.sharpen_threshold,
            self.sharpen_threshold >= 0.0,
            "must be >= 0",
        )?;
        Ok(())
    }

    pub fn reflectance_params(&self) -> ReflectanceParams {
        ReflectanceParams {
            percentile_low: self.percentile_low,
            percentile_high: self.percentile_high,
            gain: self.gain,
            offset: self.offset,
        }
    }

    pub fn denoise_params(&self) -> NlMeansParams {
        NlMeansParams::default()
    }
}

/// Named Retinex tunings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Preset {
    /// General-purpose low-light enhancement.
    #[default]
    Default,
    /// Conservative low-light tuning: gentler gain, wider illumination blur.
    Dark,
    /// Tames over-bright footage. The scale clamp tops out at 1.0, so exposure
    /// is only ever reduced.
    Debright,
}

impl Preset {
    pub const ALL: [Preset; 3] = [Preset::Default, Preset::Dark, Preset::Debright];

    pub fn name(self) -> &'static str {
        match self {
            Preset::Default => "default",
            Preset::Dark => "dark",
            Preset::Debright => "debright",
        }
    }

    pub fn config(self) -> RetinexConfig {
        match self {
            Preset::Default => RetinexConfig::default(),
            Preset::Dark => RetinexConfig {
                sigma: 120.0,
                gain: 1.02,
                percentile_low: 10.0,
                percentile_high: 90.0,
                target_mean: 92.0,
                min_scale: 0.90,
                max_scale: 1.02,
                alpha: 0.95,
                highlight_strength: 0.70,
                chroma_kernel: 3,
                deband_sigma: 0.7,
                sharpen_amount: 0.35,
                sharpen_radius: 1.3,
                sharpen_threshold: 10.0,
                ..RetinexConfig::default()
            },
            Preset::Debright => RetinexConfig {
                sigma: 140.0,
                gain: 1.015,
                percentile_low: 8.0,
                percentile_high: 86.0,
                target_mean: 60.0,
                min_scale: 0.82,
                max_scale: 1.00,
                alpha: 0.96,
                highlight_strength: 0.78,
                chroma_kernel: 3,
                deband_sigma: 0.8,
                sharpen_amount: 0.25,
                sharpen_radius: 1.2,
                sharpen_threshold: 12.0,
                ..RetinexConfig::default()
            },
        }
    }
}

impl fmt::Display for Preset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Preset {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.trim().to_ascii_lowercase();
        Preset::ALL
            .into_iter()
            .find(|p| p.name() == lowered || (lowered == "bright" && *p == Preset::Debright))
            .ok_or_else(|| ConfigError::UnknownPreset(s.to_string()))
    }
}

/// Which enhancement a run applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FilterKind {
    Equalize,
    Clahe,
    PowerLaw,
    #[default]
    Retinex,
}

impl FilterKind {
    pub fn name(self) -> &'static str {
        match self {
            FilterKind::Equalize => "equalize",
            FilterKind::Clahe => "clahe",
            FilterKind::PowerLaw => "power-law",
            FilterKind::Retinex => "retinex",
        }
    }
}

impl FromStr for FilterKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "equalize" | "histeq" => Ok(FilterKind::Equalize),
            "clahe" => Ok(FilterKind::Clahe),
            "power-law" | "gamma" => Ok(FilterKind::PowerLaw),
            "retinex" | "debright" => Ok(FilterKind::Retinex),
            other => Err(ConfigError::invalid(
                "filter",
                format!("unknown filter '{other}' (expected equalize, clahe, power-law or retinex)"),
            )),
        }
    }
}

/// Output encoding settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Fourcc or image format. `None` picks the container's usual codec.
    pub codec: Option<String>,
    /// Output frame rate. `None` or non-positive keeps the source rate.
    pub fps: Option<f64>,
}

/// The shape of an enhancement config file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnhanceConfig {
    pub filter: FilterKind,
    /// Base tuning for the Retinex filter.
    pub preset: Preset,
    /// Individual Retinex keys overriding the preset.
    pub retinex: serde_yaml::Mapping,
    pub clahe: Clahe,
    pub power_law: PowerLaw,
    pub output: OutputConfig,
    pub frame_policy: FramePolicy,
}

impl EnhanceConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: EnhanceConfig = serde_yaml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// The preset with this file's overrides applied, validated.
    pub fn retinex_config(&self) -> Result<RetinexConfig, ConfigError> {
        let base = self.preset.config();
        if self.retinex.is_empty() {
            return Ok(base);
        }
        let mut merged = match serde_yaml::to_value(&base) {
            Ok(serde_yaml::Value::Mapping(mapping)) => mapping,
            Ok(_) => serde_yaml::Mapping::new(),
            Err(e) => return Err(ConfigError::invalid("retinex", e.to_string())),
        };
        for (key, value) in &self.retinex {
            merged.insert(key.clone(), value.clone());
        }
        let config: RetinexConfig = serde_yaml::from_value(serde_yaml::Value::Mapping(merged))
            .map_err(|e| ConfigError::invalid("retinex", e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the settings the selected filter will use.
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self.filter {
            FilterKind::Equalize => Ok(()),
            FilterKind::Clahe => self.clahe.validate(),
            FilterKind::PowerLaw => self.power_law.validate(),
            FilterKind::Retinex => self.retinex_config().map(|_| ()),
        }
    }
}
