// THEORY:
// The colour-space adapter is the bridge between a frame's native channel layout
// and the luminance/chrominance separation every enhancement works on. Luminance
// carries brightness and is what the filters reshape; the two chrominance channels
// carry colour and are only ever cleaned, never re-toned.
//
// Key architectural principles:
// 1.  **Analytic Inverse**: Both supported transforms have a closed-form inverse.
//     `from_luma_chroma(to_luma_chroma(frame))` reproduces the frame within the
//     rounding of the final 8-bit store.
// 2.  **No Intermediate Quantization**: The split produces `f32` planes. Nothing
//     is rounded to 8 bits until the merge writes the output frame, so chained
//     stages never compound quantization error on the chroma channels.
// 3.  **Two Lenses**:
//     - `Lab` (CIE L*a*b*, D65, 8-bit convention: L scaled to 0..255, a/b offset
//       by 128). Perceptually uniform; used by Retinex and CLAHE.
//     - `YCbCr` (BT.601 full range). Cheap and linear; used by histogram
//       equalization.
// 4.  **Luminance-Only Frames**: A gray frame is its own luminance. It splits into
//     a luma plane with no chroma pair and merges back into a gray frame.
//
// The sRGB decode uses a 256-entry `OnceLock` table, so the hot path of the
// forward Lab transform is a lookup, a matrix multiply and three cube roots.

use crate::core_modules::frame::Frame;
use crate::core_modules::plane::{Plane, to_byte};
use image::RgbImage;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

/// The luminance/chrominance decomposition used for a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ColorSpace {
    /// BT.601 full-range YCbCr. Chroma order: Cb, Cr.
    #[serde(rename = "ycbcr")]
    YCbCr,
    /// CIE L*a*b* under D65 in the 8-bit convention. Chroma order: a, b.
    #[default]
    #[serde(rename = "lab")]
    Lab,
}

/// The two chrominance planes of a colour frame.
#[derive(Debug, Clone, PartialEq)]
pub struct ChromaPair {
    pub first: Plane,
    pub second: Plane,
}

/// A frame split into one luminance plane and (for colour frames) two
/// chrominance planes.
#[derive(Debug, Clone, PartialEq)]
pub struct LumaChroma {
    pub space: ColorSpace,
    /// Luminance on the 0..255 scale.
    pub luma: Plane,
    /// `None` for luminance-only frames.
    pub chroma: Option<ChromaPair>,
}

const BT601_KR: f64 = 0.299;
const BT601_KB: f64 = 0.114;
const BT601_KG: f64 = 1.0 - BT601_KR - BT601_KB;
const CHROMA_OFFSET: f64 = 128.0;

// D65 reference white.
const WHITE_X: f64 = 0.950456;
const WHITE_Z: f64 = 1.088754;

const LAB_EPSILON: f64 = 0.008856;
const LAB_KAPPA: f64 = 903.3;
const LAB_SLOPE: f64 = 7.787;
const LAB_BIAS: f64 = 16.0 / 116.0;
const L_SCALE: f64 = 255.0 / 100.0;

const RGB_TO_XYZ: [[f64; 3]; 3] = [
    [0.412453, 0.357580, 0.180423],
    [0.212671, 0.715160, 0.072169],
    [0.019334, 0.119193, 0.950227],
];

const XYZ_TO_RGB: [[f64; 3]; 3] = [
    [3.240479, -1.537150, -0.498535],
    [-0.969256, 1.875991, 0.041556],
    [0.055648, -0.204043, 1.057311],
];

static SRGB_TO_LINEAR_LUT: OnceLock<[f64; 256]> = OnceLock::new();

fn srgb_to_linear(byte: u8) -> f64 {
    let table = SRGB_TO_LINEAR_LUT.get_or_init(|| {
        let mut table = [0.0f64; 256];
        for (i, slot) in table.iter_mut().enumerate() {
            let v = i as f64 / 255.0;
            *slot = if v <= 0.04045 {
                v / 12.92
            } else {
                ((v + 0.055) / 1.055).powf(2.4)
            };
        }
        table
    });
    table[byte as usize]
}

fn linear_to_srgb(v: f64) -> f64 {
    let v = v.clamp(0.0, 1.0);
    if v <= 0.0031308 {
        v * 12.92
    } else {
        1.055 * v.powf(1.0 / 2.4) - 0.055
    }
}

#[inline]
fn lab_f(t: f64) -> f64 {
    if t > LAB_EPSILON {
        t.cbrt()
    } else {
        LAB_SLOPE * t + LAB_BIAS
    }
}

#[inline]
fn lab_f_inverse(f: f64) -> f64 {
    let cube = f * f * f;
    if cube > LAB_EPSILON {
        cube
    } else {
        (f - LAB_BIAS) / LAB_SLOPE
    }
}

impl ColorSpace {
    /// Forward transform of one 8-bit RGB pixel into (luma, chroma1, chroma2).
    pub fn forward(self, rgb: [u8; 3]) -> [f32; 3] {
        match self {
            ColorSpace::YCbCr => {
                let (r, g, b) = (rgb[0] as f64, rgb[1] as f64, rgb[2] as f64);
                let y = BT601_KR * r + BT601_KG * g + BT601_KB * b;
                let cb = CHROMA_OFFSET + (b - y) / (2.0 * (1.0 - BT601_KB));
                let cr = CHROMA_OFFSET + (r - y) / (2.0 * (1.0 - BT601_KR));
                [y as f32, cb as f32, cr as f32]
            }
            ColorSpace::Lab => {
                let lin = [
                    srgb_to_linear(rgb[0]),
                    srgb_to_linear(rgb[1]),
                    srgb_to_linear(rgb[2]),
                ];
                let xyz = mat_mul(&RGB_TO_XYZ, lin);
                let (x, y, z) = (xyz[0] / WHITE_X, xyz[1], xyz[2] / WHITE_Z);
                let fy = lab_f(y);
                let l = if y > LAB_EPSILON {
                    116.0 * fy - 16.0
                } else {
                    LAB_KAPPA * y
                };
                let a = 500.0 * (lab_f(x) - fy);
                let b = 200.0 * (fy - lab_f(z));
                [
                    (l * L_SCALE) as f32,
                    (a + CHROMA_OFFSET) as f32,
                    (b + CHROMA_OFFSET) as f32,
                ]
            }
        }
    }

    /// Inverse transform back to 8-bit RGB. Out-of-gamut values are clamped.
    pub fn inverse(self, channels: [f32; 3]) -> [u8; 3] {
        match self {
            ColorSpace::YCbCr => {
                let y = channels[0] as f64;
                let cb = channels[1] as f64 - CHROMA_OFFSET;
                let cr = channels[2] as f64 - CHROMA_OFFSET;
                let r = y + 2.0 * (1.0 - BT601_KR) * cr;
                let b = y + 2.0 * (1.0 - BT601_KB) * cb;
                let g = (y - BT601_KR * r - BT601_KB * b) / BT601_KG;
                [to_byte(r as f32), to_byte(g as f32), to_byte(b as f32)]
            }
            ColorSpace::Lab => {
                let l = channels[0] as f64 / L_SCALE;
                let a = channels[1] as f64 - CHROMA_OFFSET;
                let b = channels[2] as f64 - CHROMA_OFFSET;
                let fy = (l + 16.0) / 116.0;
                let y = if l > LAB_KAPPA * LAB_EPSILON {
                    fy * fy * fy
                } else {
                    l / LAB_KAPPA
                };
                let x = lab_f_inverse(fy + a / 500.0) * WHITE_X;
                let z = lab_f_inverse(fy - b / 200.0) * WHITE_Z;
                let lin = mat_mul(&XYZ_TO_RGB, [x, y, z]);
                [
                    to_byte((linear_to_srgb(lin[0]) * 255.0) as f32),
                    to_byte((linear_to_srgb(lin[1]) * 255.0) as f32),
                    to_byte((linear_to_srgb(lin[2]) * 255.0) as f32),
                ]
            }
        }
    }
}

#[inline]
fn mat_mul(m: &[[f64; 3]; 3], v: [f64; 3]) -> [f64; 3] {
    [
        m[0][0] * v[0] + m[0][1] * v[1] + m[0][2] * v[2],
        m[1][0] * v[0] + m[1][1] * v[1] + m[1][2] * v[2],
        m[2][0] * v[0] + m[2][1] * v[1] + m[2][2] * v[2],
    ]
}

/// Splits a frame into luminance and chrominance planes.
pub fn to_luma_chroma(frame: &Frame, space: ColorSpace) -> LumaChroma {
    match frame {
        Frame::Gray(gray) => LumaChroma {
            space,
            luma: Plane::from_gray(gray),
            chroma: None,
        },
        Frame::Color(rgb) => split_rgb(rgb, space),
    }
}

fn split_rgb(rgb: &RgbImage, space: ColorSpace) -> LumaChroma {
    let (width, height) = (rgb.width() as usize, rgb.height() as usize);
    let converted: Vec<[f32; 3]> = rgb
        .as_raw()
        .par_chunks_exact(3)
        .map(|px| space.forward([px[0], px[1], px[2]]))
        .collect();

    let mut luma = Vec::with_capacity(converted.len());
    let mut first = Vec::with_capacity(converted.len());
    let mut second = Vec::with_capacity(converted.len());
    for [l, c1, c2] in converted {
        luma.push(l);
        first.push(c1);
        second.push(c2);
    }

    LumaChroma {
        space,
        luma: Plane::from_vec(width, height, luma),
        chroma: Some(ChromaPair {
            first: Plane::from_vec(width, height, first),
            second: Plane::from_vec(width, height, second),
        }),
    }
}

/// Recombines luminance and chrominance into a frame of the original layout.
pub fn from_luma_chroma(channels: &LumaChroma) -> Frame {
    let luma = &channels.luma;
    let Some(chroma) = &channels.chroma else {
        return Frame::Gray(luma.to_gray());
    };

    let space = channels.space;
    let raw: Vec<u8> = luma
        .data()
        .par_iter()
        .zip(chroma.first.data().par_iter())
        .zip(chroma.second.data().par_iter())
        .flat_map_iter(|((&l, &c1), &c2)| space.inverse([l, c1, c2]))
        .collect();

    let (width, height) = (luma.width() as u32, luma.height() as u32);
    // The buffer is built from three equally sized planes, so it always fits.
    Frame::Color(RgbImage::from_raw(width, height, raw).unwrap_or_else(|| RgbImage::new(width, height)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma, Rgb};

    fn test_card() -> RgbImage {
        RgbImage::from_fn(32, 24, |x, y| {
            Rgb([
                (x * 8) as u8,
                (y * 10 + x) as u8,
                (255 - x * 7 - y) as u8,
            ])
        })
    }

    fn max_channel_error(a: &RgbImage, b: &RgbImage) -> u8 {
        a.as_raw()
            .iter()
            .zip(b.as_raw())
            .map(|(&x, &y)| x.abs_diff(y))
            .max()
            .unwrap_or(0)
    }

    #[test]
    fn ycbcr_round_trip_is_exact() {
        let card = test_card();
        let split = to_luma_chroma(&Frame::Color(card.clone()), ColorSpace::YCbCr);
        match from_luma_chroma(&split) {
            Frame::Color(back) => assert_eq!(max_channel_error(&card, &back), 0),
            Frame::Gray(_) => panic!("colour frame came back gray"),
        }
    }

    #[test]
    fn lab_round_trip_within_rounding() {
        let card = test_card();
        let split = to_luma_chroma(&Frame::Color(card.clone()), ColorSpace::Lab);
        match from_luma_chroma(&split) {
            Frame::Color(back) => assert!(max_channel_error(&card, &back) <= 1),
            Frame::Gray(_) => panic!("colour frame came back gray"),
        }
    }

    #[test]
    fn lab_round_trip_covers_the_primaries() {
        for px in [
            [0, 0, 0],
            [255, 255, 255],
            [255, 0, 0],
            [0, 255, 0],
            [0, 0, 255],
            [3, 2, 1],
        ] {
            let back = ColorSpace::Lab.inverse(ColorSpace::Lab.forward(px));
            for c in 0..3 {
                assert!(back[c].abs_diff(px[c]) <= 1, "{px:?} -> {back:?}");
            }
        }
    }

    #[test]
    fn gray_frames_have_no_chroma() {
        let gray = GrayImage::from_pixel(5, 5, Luma([42]));
        let split = to_luma_chroma(&Frame::Gray(gray.clone()), ColorSpace::Lab);
        assert!(split.chroma.is_none());
        assert_eq!(from_luma_chroma(&split), Frame::Gray(gray));
    }

    #[test]
    fn neutral_gray_has_centred_chroma() {
        for space in [ColorSpace::YCbCr, ColorSpace::Lab] {
            let [_, c1, c2] = space.forward([128, 128, 128]);
            assert!((c1 - 128.0).abs() < 0.01, "{space:?} first chroma {c1}");
            assert!((c2 - 128.0).abs() < 0.01, "{space:?} second chroma {c2}");
        }
    }

    #[test]
    fn white_maps_to_full_scale_lightness() {
        let [l, _, _] = ColorSpace::Lab.forward([255, 255, 255]);
        assert!((l - 255.0).abs() < 0.05);
    }
}
