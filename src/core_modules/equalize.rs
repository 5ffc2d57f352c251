// THEORY:
// Two contrast filters built on the same primitive, a 256-entry lookup table
// derived from a cumulative histogram.
//
// 1. GLOBAL equalization: one histogram over the whole luminance, one table, one
//    remap. Colour frames are equalized on the YCbCr luma so hue is untouched.
//
// 2. CLAHE: the Lab L channel is cut into a grid of `tiles_x` x `tiles_y` tiles.
//    Each tile gets its own clipped histogram, so one large dark or bright area
//    cannot flatten the contrast of the rest of the frame. Clipping caps every bin
//    at `clip_limit * tile_pixels / 256` and spreads the excess over all bins,
//    which bounds how steep any tile's curve can get (and so how much noise it can
//    amplify). Each pixel blends the tables of its four nearest tile centres so
//    tile borders never show.
//
// When the frame does not divide evenly into the tile grid, the last row and
// column of tiles read mirrored samples past the edge, so every tile holds the
// same number of pixels.

use crate::core_modules::color_space::{ColorSpace, LumaChroma, from_luma_chroma, to_luma_chroma};
use crate::core_modules::frame::Frame;
use crate::core_modules::plane::{Plane, to_byte};
use crate::error::ConfigError;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

const BINS: usize = 256;

/// 256-bin histogram of a plane's rounded levels.
pub fn histogram(plane: &Plane) -> [u32; BINS] {
    let mut hist = [0u32; BINS];
    for &v in plane.data() {
        hist[to_byte(v) as usize] += 1;
    }
    hist
}

/// Equalization table: `round((cdf[i] - cdf_min) * 255 / (total - cdf_min))`.
/// A single-valued histogram yields the identity table.
pub fn equalization_lut(hist: &[u32; BINS], total: usize) -> [u8; BINS] {
    let mut lut = [0u8; BINS];
    let cdf_min = hist.iter().copied().find(|&c| c > 0).unwrap_or(0) as f64;
    let denom = total as f64 - cdf_min;
    if denom <= 0.0 {
        for (i, slot) in lut.iter_mut().enumerate() {
            *slot = i as u8;
        }
        return lut;
    }

    let mut cdf = 0u64;
    for (slot, &count) in lut.iter_mut().zip(hist) {
        cdf += count as u64;
        let value = (cdf as f64 - cdf_min) * 255.0 / denom;
        *slot = value.round().clamp(0.0, 255.0) as u8;
    }
    lut
}

/// Remaps each sample's rounded level through `lut`.
pub fn apply_lut(plane: &Plane, lut: &[u8; BINS]) -> Plane {
    plane.map(|v| lut[to_byte(v) as usize] as f32)
}

/// Global histogram equalization of one plane.
pub fn equalize_plane(plane: &Plane) -> Plane {
    let lut = equalization_lut(&histogram(plane), plane.len());
    apply_lut(plane, &lut)
}

/// Global histogram equalization of a frame: gray frames directly, colour frames
/// on their YCbCr luma with chroma carried through unchanged.
pub fn equalize_histogram(frame: &Frame) -> Frame {
    let split = to_luma_chroma(frame, ColorSpace::YCbCr);
    from_luma_chroma(&LumaChroma {
        luma: equalize_plane(&split.luma),
        ..split
    })
}

/// Contrast-limited adaptive histogram equalization parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Clahe {
    /// Contrast limit relative to a uniform histogram.
    pub clip_limit: f32,
    /// Tile columns.
    pub tiles_x: usize,
    /// Tile rows.
    pub tiles_y: usize,
}

impl Default for Clahe {
    fn default() -> Self {
        Self {
            clip_limit: 2.0,
            tiles_x: 8,
            tiles_y: 8,
        }
    }
}

impl Clahe {
    pub const CLIP_RANGE: (f32, f32) = (0.1, 20.0);
    pub const TILE_RANGE: (usize, usize) = (1, 64);

    pub fn validate(&self) -> Result<(), ConfigError> {
        let (lo, hi) = Self::CLIP_RANGE;
        if !(self.clip_limit.is_finite() && (lo..=hi).contains(&self.clip_limit)) {
            return Err(ConfigError::invalid(
                "clahe.clip_limit",
                format!("must be within {lo}..={hi}, got {}", self.clip_limit),
            ));
        }
        let (lo, hi) = Self::TILE_RANGE;
        for (field, tiles) in [("clahe.tiles_x", self.tiles_x), ("clahe.tiles_y", self.tiles_y)] {
            if !(lo..=hi).contains(&tiles) {
                return Err(ConfigError::invalid(field, format!("must be within {lo}..={hi}, got {tiles}")));
            }
        }
        Ok(())
    }

    /// Applies CLAHE to the Lab L channel of a frame (or to a gray frame directly).
    pub fn apply(&self, frame: &Frame) -> Frame {
        let split = to_luma_chroma(frame, ColorSpace::Lab);
        from_luma_chroma(&LumaChroma {
            luma: clahe_plane(&split.luma, self.clip_limit, self.tiles_x, self.tiles_y),
            ..split
        })
    }
}

/// Caps every bin at `limit` and spreads the clipped counts back over the bins.
fn clip_histogram(hist: &mut [u32; BINS], limit: u32) {
    let mut excess = 0u32;
    for bin in hist.iter_mut() {
        if *bin > limit {
            excess += *bin - limit;
            *bin = limit;
        }
    }

    let batch = excess / BINS as u32;
    let mut residual = excess as usize - batch as usize * BINS;
    for bin in hist.iter_mut() {
        *bin += batch;
    }
    if residual > 0 {
        let step = (BINS / residual).max(1);
        let mut i = 0;
        while i < BINS && residual > 0 {
            hist[i] += 1;
            i += step;
            residual -= 1;
        }
    }
}

/// Per-tile table: `round(cdf[i] * 255 / tile_pixels)`.
fn tile_lut(hist: &[u32; BINS], tile_pixels: usize) -> [u8; BINS] {
    let scale = (BINS - 1) as f32 / tile_pixels as f32;
    let mut lut = [0u8; BINS];
    let mut cdf = 0u32;
    for (slot, &count) in lut.iter_mut().zip(hist) {
        cdf += count;
        *slot = to_byte(cdf as f32 * scale);
    }
    lut
}

#[inline]
fn reflect_101(i: usize, len: usize) -> usize {
    if i < len || len == 1 {
        i.min(len - 1)
    } else {
        2 * (len - 1) - i
    }
}

/// CLAHE over a single 0..255 plane with a `tiles_x` x `tiles_y` grid.
pub fn clahe_plane(plane: &Plane, clip_limit: f32, tiles_x: usize, tiles_y: usize) -> Plane {
    let width = plane.width();
    let height = plane.height();
    if width == 0 || height == 0 {
        return plane.clone();
    }
    let tiles_x = tiles_x.clamp(1, width);
    let tiles_y = tiles_y.clamp(1, height);
    let tile_w = width.div_ceil(tiles_x);
    let tile_h = height.div_ceil(tiles_y);
    let tile_pixels = tile_w * tile_h;
    let limit = if clip_limit > 0.0 {
        ((clip_limit * tile_pixels as f32 / BINS as f32) as u32).max(1)
    } else {
        u32::MAX
    };

    let luts: Vec<[u8; BINS]> = (0..tiles_x * tiles_y)
        .into_par_iter()
        .map(|index| {
            let (tx, ty) = (index % tiles_x, index / tiles_x);
            let mut hist = [0u32; BINS];
            for y in ty * tile_h..(ty + 1) * tile_h {
                let row = plane.row(reflect_101(y, height));
                for x in tx * tile_w..(tx + 1) * tile_w {
                    hist[to_byte(row[reflect_101(x, width)]) as usize] += 1;
                }
            }
            clip_histogram(&mut hist, limit);
            tile_lut(&hist, tile_pixels)
        })
        .collect();

    let inv_tw = 1.0 / tile_w as f32;
    let inv_th = 1.0 / tile_h as f32;
    let mut out = Plane::new(width, height);
    out.data_mut()
        .par_chunks_mut(width)
        .enumerate()
        .for_each(|(y, dst)| {
            let tyf = y as f32 * inv_th - 0.5;
            let ty0 = tyf.floor() as isize;
            let ya = tyf - ty0 as f32;
            let ty1 = (ty0 + 1).min(tiles_y as isize - 1) as usize;
            let ty0 = ty0.max(0) as usize;
            let src = plane.row(y);

            for (x, slot) in dst.iter_mut().enumerate() {
                let txf = x as f32 * inv_tw - 0.5;
                let tx0 = txf.floor() as isize;
                let xa = txf - tx0 as f32;
                let tx1 = (tx0 + 1).min(tiles_x as isize - 1) as usize;
                let tx0 = tx0.max(0) as usize;

                let v = to_byte(src[x]) as usize;
                let at = |tx: usize, ty: usize| luts[ty * tiles_x + tx][v] as f32;
                let top = at(tx0, ty0) * (1.0 - xa) + at(tx1, ty0) * xa;
                let bottom = at(tx0, ty1) * (1.0 - xa) + at(tx1, ty1) * xa;
                *slot = to_byte(top * (1.0 - ya) + bottom * ya) as f32;
            }
        });
    out
}
