// Power-law (gamma) correction: `out = round(255 * (in / 255)^gamma)` on every
// channel through a 256-entry table. Gamma below 1 lifts shadows; above 1 darkens.

use crate::core_modules::frame::Frame;
use crate::core_modules::plane::to_byte;
use crate::error::ConfigError;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PowerLaw {
    pub gamma: f32,
}

impl Default for PowerLaw {
    fn default() -> Self {
        // A reasonable starting point for low-light footage.
        Self { gamma: 0.60 }
    }
}

impl PowerLaw {
    pub const GAMMA_RANGE: (f32, f32) = (0.1, 5.0);

    pub fn new(gamma: f32) -> Result<Self, ConfigError> {
        let power_law = Self { gamma };
        power_law.validate()?;
        Ok(power_law)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let (lo, hi) = Self::GAMMA_RANGE;
        if !(self.gamma.is_finite() && (lo..=hi).contains(&self.gamma)) {
            return Err(ConfigError::invalid(
                "power_law.gamma",
                format!("must be within {lo}..={hi}, got {}", self.gamma),
            ));
        }
        Ok(())
    }

    pub fn lut(&self) -> [u8; 256] {
        let mut lut = [0u8; 256];
        for (i, slot) in lut.iter_mut().enumerate() {
            *slot = to_byte(255.0 * (i as f32 / 255.0).powf(self.gamma));
        }
        lut
    }

    pub fn apply(&self, frame: &Frame) -> Frame {
        let lut = self.lut();
        match frame {
            Frame::Gray(gray) => {
                let mut out = gray.clone();
                out.iter_mut().for_each(|v| *v = lut[*v as usize]);
                Frame::Gray(out)
            }
            Frame::Color(rgb) => {
                let mut out = rgb.clone();
                out.iter_mut().for_each(|v| *v = lut[*v as usize]);
                Frame::Color(out)
            }
        }
    }
}
