// THEORY:
// Optional global denoise, run on the whole frame before the Retinex split. Heavy
// sensor noise in dark footage would otherwise be lifted along with the shadows.
//
// The filter is non-local means: every output sample is a weighted average of the
// samples in a search window around it, weighted by how similar the small patch
// (template) around each candidate is to the patch around the target:
//
//     w(q) = exp(-d2(p, q) / h^2)      d2 = mean squared patch difference
//
// Patches that look alike contribute; edges and texture that differ do not. The
// frame is converted to Lab first so luminance and colour get separate strengths.
// The a and b planes are filtered as one two-channel image: their patch distances
// are averaged, so a colour edge in either plane protects both. Rows are
// independent and are filtered in parallel.

use crate::core_modules::color_space::{ChromaPair, ColorSpace, LumaChroma, from_luma_chroma, to_luma_chroma};
use crate::core_modules::frame::Frame;
use crate::core_modules::plane::Plane;
use rayon::prelude::*;

/// Non-local-means parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NlMeansParams {
    /// Filter strength on luminance.
    pub h: f32,
    /// Filter strength on the two chrominance planes.
    pub h_color: f32,
    /// Template half-size; 3 gives a 7x7 patch.
    pub template_radius: usize,
    /// Search half-size; 10 gives a 21x21 window.
    pub search_radius: usize,
}

impl Default for NlMeansParams {
    fn default() -> Self {
        Self {
            h: 3.0,
            h_color: 3.0,
            template_radius: 3,
            search_radius: 10,
        }
    }
}

impl NlMeansParams {
    /// Template side length in pixels.
    pub fn template_window(&self) -> usize {
        2 * self.template_radius + 1
    }

    /// Search window side length in pixels.
    pub fn search_window(&self) -> usize {
        2 * self.search_radius + 1
    }
}

/// Denoises one plane. Identity when `h <= 0`.
pub fn nl_means(plane: &Plane, h: f32, template_radius: usize, search_radius: usize) -> Plane {
    nl_means_joint(&[plane], h, template_radius, search_radius)
        .pop()
        .unwrap_or_else(|| plane.clone())
}

/// Denoises planes of equal size as one multi-channel image: the patch distance
/// is averaged over every plane, so all of them share the same weights. Identity
/// when `h <= 0`.
pub fn nl_means_joint(planes: &[&Plane], h: f32, template_radius: usize, search_radius: usize) -> Vec<Plane> {
    let Some(first) = planes.first() else {
        return Vec::new();
    };
    let width = first.width();
    let height = first.height();
    if !(h > 0.0) || width == 0 || height == 0 {
        return planes.iter().map(|&p| p.clone()).collect();
    }

    let (max_x, max_y) = (width as isize - 1, height as isize - 1);
    let index = |x: isize, y: isize| -> usize { y.clamp(0, max_y) as usize * width + x.clamp(0, max_x) as usize };
    let t = template_radius as isize;
    let s = search_radius as isize;
    let norm = ((2 * t + 1) * (2 * t + 1)) as f32 * planes.len() as f32;
    let inv_h2 = 1.0 / (h * h);
    let channels = planes.len();

    let mut interleaved = vec![0.0f32; width * height * channels];
    interleaved
        .par_chunks_mut(width * channels)
        .enumerate()
        .for_each(|(y, dst)| {
            let y = y as isize;
            let mut acc = vec![0.0f32; channels];
            for x in 0..width as isize {
                acc.iter_mut().for_each(|a| *a = 0.0);
                let mut weight_sum = 0.0f32;
                for qy in (y - s)..=(y + s) {
                    for qx in (x - s)..=(x + s) {
                        let mut d2 = 0.0f32;
                        for dy in -t..=t {
                            for dx in -t..=t {
                                let (p, q) = (index(x + dx, y + dy), index(qx + dx, qy + dy));
                                for plane in planes {
                                    let diff = plane.data()[p] - plane.data()[q];
                                    d2 += diff * diff;
                                }
                            }
                        }
                        let w = (-(d2 / norm) * inv_h2).exp();
                        weight_sum += w;
                        let q = index(qx, qy);
                        for (a, plane) in acc.iter_mut().zip(planes) {
                            *a += w * plane.data()[q];
                        }
                    }
                }
                // The centre patch always matches itself, so weight_sum >= 1.
                let base = x as usize * channels;
                for (c, a) in acc.iter().enumerate() {
                    dst[base + c] = a / weight_sum;
                }
            }
        });

    (0..channels)
        .map(|c| {
            let data = interleaved.iter().skip(c).step_by(channels).copied().collect();
            Plane::from_vec(width, height, data)
        })
        .collect()
}

/// Denoises a whole frame in Lab (colour) or directly (gray). Luminance is
/// filtered with `h`; the two chrominance planes are filtered together with
/// `h_color`.
pub fn denoise_frame(frame: &Frame, params: &NlMeansParams) -> Frame {
    let split = to_luma_chroma(frame, ColorSpace::Lab);
    let NlMeansParams {
        h,
        h_color,
        template_radius,
        search_radius,
    } = *params;

    let (luma, chroma) = rayon::join(
        || nl_means(&split.luma, h, template_radius, search_radius),
        || {
            split.chroma.as_ref().map(|pair| {
                let mut joint = nl_means_joint(&[&pair.first, &pair.second], h_color, template_radius, search_radius);
                let second = joint.pop().unwrap_or_else(|| pair.second.clone());
                let first = joint.pop().unwrap_or_else(|| pair.first.clone());
                ChromaPair { first, second }
            })
        },
    );

    from_luma_chroma(&LumaChroma {
        space: split.space,
        luma,
        chroma,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma, Rgb, RgbImage};

    #[test]
    fn flat_plane_is_a_fixed_point() {
        let flat = Plane::filled(12, 9, 77.0);
        let out = nl_means(&flat, 3.0, 1, 5);
        for &v in out.data() {
            assert!((v - 77.0).abs() < 1e-4);
        }
    }

    #[test]
    fn zero_strength_is_identity() {
        let plane = Plane::from_vec(2, 2, vec![1.0, 2.0, 3.0, 4.0]);
        assert_eq!(nl_means(&plane, 0.0, 1, 5), plane);
    }

    #[test]
    fn small_noise_is_reduced() {
        let data: Vec<f32> = (0..20 * 20).map(|i| 100.0 + if i % 3 == 0 { 2.0 } else { -1.0 }).collect();
        let noisy = Plane::from_vec(20, 20, data);
        let out = nl_means(&noisy, 3.0, 1, 5);
        let spread = |p: &Plane| {
            let (lo, hi) = p
                .data()
                .iter()
                .fold((f32::MAX, f32::MIN), |(lo, hi), &v| (lo.min(v), hi.max(v)));
            hi - lo
        };
        assert!(spread(&out) < spread(&noisy));
    }

    #[test]
    fn strong_edges_survive() {
        let data = (0..16 * 8).map(|i| if i % 16 < 8 { 20.0 } else { 220.0 }).collect();
        let edge = Plane::from_vec(16, 8, data);
        let out = nl_means(&edge, 3.0, 1, 5);
        assert!((out.get(2, 4) - 20.0).abs() < 1.0);
        assert!((out.get(13, 4) - 220.0).abs() < 1.0);
    }

    #[test]
    fn defaults_use_7x7_templates_and_21x21_search() {
        let params = NlMeansParams::default();
        assert_eq!((params.h, params.h_color), (3.0, 3.0));
        assert_eq!(params.template_window(), 7);
        assert_eq!(params.search_window(), 21);
    }

    #[test]
    fn joint_planes_share_weights() {
        // An edge only in `first` must also stop `second` from blurring across it.
        let edge: Vec<f32> = (0..16 * 6).map(|i| if i % 16 < 8 { 20.0 } else { 220.0 }).collect();
        let first = Plane::from_vec(16, 6, edge);
        let ramp: Vec<f32> = (0..16 * 6).map(|i| if i % 16 < 8 { 100.0 } else { 110.0 }).collect();
        let second = Plane::from_vec(16, 6, ramp);

        let joint = nl_means_joint(&[&first, &second], 3.0, 1, 5);
        assert_eq!(joint.len(), 2);
        assert!((joint[1].get(2, 3) - 100.0).abs() < 0.5);
        assert!((joint[1].get(13, 3) - 110.0).abs() < 0.5);

        let alone = nl_means(&second, 3.0, 1, 5);
        assert!((alone.get(7, 3) - 100.0).abs() > (joint[1].get(7, 3) - 100.0).abs());
    }

    #[test]
    fn frames_keep_their_layout() {
        let gray = Frame::Gray(GrayImage::from_pixel(6, 5, Luma([90])));
        assert_eq!(denoise_frame(&gray, &NlMeansParams::default()), gray);

        let colour = Frame::Color(RgbImage::from_pixel(6, 5, Rgb([120, 80, 40])));
        let out = denoise_frame(&colour, &NlMeansParams::default());
        assert!(out.is_color());
        assert_eq!(out.dimensions(), (6, 5));
    }
}
