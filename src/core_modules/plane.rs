// THEORY:
// The `Plane` is the working buffer of every numerical stage. It is a "dumb"
// single-channel grid of `f32` samples on the 0..255 intensity scale, stored
// row-major. Frames arrive and leave as 8-bit `image` buffers, but everything in
// between happens on planes so that a channel which is split off and merged back
// untouched never loses precision.
//
// Key architectural principles:
// 1.  **Full Precision by Default**: Samples are floats. Quantization to integer
//     intensity levels is an explicit call (`quantized`) made by the stages that
//     are defined to re-quantize, never a side effect of storage.
// 2.  **Whole-Plane Statistics**: `mean` and `percentile` summarize the full plane
//     for one frame. Nothing here remembers previous frames.
// 3.  **Data Container**: Like the frame types, a `Plane` does not know what it
//     holds (luminance, chrominance, a reflectance map). The stages give it meaning.

use image::GrayImage;

/// A single channel of `f32` samples, row-major, nominally on the 0..255 scale.
#[derive(Debug, Clone, PartialEq)]
pub struct Plane {
    width: usize,
    height: usize,
    data: Vec<f32>,
}

impl Plane {
    /// Creates a zero-filled plane.
    pub fn new(width: usize, height: usize) -> Self {
        Self::filled(width, height, 0.0)
    }

    /// Creates a plane where every sample holds `value`.
    pub fn filled(width: usize, height: usize, value: f32) -> Self {
        Self {
            width,
            height,
            data: vec![value; width * height],
        }
    }

    /// Wraps an existing row-major buffer.
    ///
    /// Panics if `data.len() != width * height`.
    pub fn from_vec(width: usize, height: usize, data: Vec<f32>) -> Self {
        assert_eq!(
            data.len(),
            width * height,
            "plane buffer holds {} samples, expected {}x{}",
            data.len(),
            width,
            height
        );
        Self { width, height, data }
    }

    pub fn from_gray(image: &GrayImage) -> Self {
        let (width, height) = image.dimensions();
        let data = image.as_raw().iter().map(|&v| v as f32).collect();
        Self::from_vec(width as usize, height as usize, data)
    }

    /// Rounds and clamps every sample into an 8-bit grayscale image.
    pub fn to_gray(&self) -> GrayImage {
        let raw = self.data.iter().map(|&v| to_byte(v)).collect();
        // Dimensions always match the buffer, so construction cannot fail.
        GrayImage::from_raw(self.width as u32, self.height as u32, raw)
            .unwrap_or_else(|| GrayImage::new(self.width as u32, self.height as u32))
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.width
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.height
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize) -> f32 {
        self.data[y * self.width + x]
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [f32] {
        &mut self.data
    }

    pub fn row(&self, y: usize) -> &[f32] {
        &self.data[y * self.width..(y + 1) * self.width]
    }

    /// Applies `f` to every sample, producing a new plane of the same size.
    pub fn map<F>(&self, f: F) -> Plane
    where
        F: Fn(f32) -> f32,
    {
        Plane {
            width: self.width,
            height: self.height,
            data: self.data.iter().map(|&v| f(v)).collect(),
        }
    }

    /// Combines two planes of identical size sample by sample.
    pub fn zip_map<F>(&self, other: &Plane, f: F) -> Plane
    where
        F: Fn(f32, f32) -> f32,
    {
        assert_eq!(
            (self.width, self.height),
            (other.width, other.height),
            "plane dimensions differ"
        );
        Plane {
            width: self.width,
            height: self.height,
            data: self
                .data
                .iter()
                .zip(other.data.iter())
                .map(|(&a, &b)| f(a, b))
                .collect(),
        }
    }

    /// Swaps rows and columns. Used to run a column pass as a row pass.
    pub fn transposed(&self) -> Plane {
        let mut out = Plane::new(self.height, self.width);
        for y in 0..self.height {
            let row = self.row(y);
            for (x, &v) in row.iter().enumerate() {
                out.data[x * self.height + y] = v;
            }
        }
        out
    }

    /// Rounds every sample to the nearest integer level in 0..=255.
    pub fn quantized(&self) -> Plane {
        self.map(|v| to_byte(v) as f32)
    }

    /// Arithmetic mean of all samples; 0.0 for an empty plane.
    pub fn mean(&self) -> f32 {
        if self.data.is_empty() {
            return 0.0;
        }
        let sum: f64 = self.data.iter().map(|&v| v as f64).sum();
        (sum / self.data.len() as f64) as f32
    }

    /// The `p`-th percentile (0..=100) with linear interpolation between the two
    /// nearest ranks. Returns 0.0 for an empty plane.
    pub fn percentile(&self, p: f32) -> f32 {
        if self.data.is_empty() {
            return 0.0;
        }
        let mut scratch = self.data.clone();
        percentile_in_place(&mut scratch, p)
    }
}

/// Rounds and clamps a 0..255-scale sample into a byte.
#[inline]
pub fn to_byte(value: f32) -> u8 {
    if value.is_nan() {
        return 0;
    }
    value.round().clamp(0.0, 255.0) as u8
}

/// Percentile of an unsorted slice. Reorders the slice.
pub(crate) fn percentile_in_place(values: &mut [f32], p: f32) -> f32 {
    let n = values.len();
    if n == 0 {
        return 0.0;
    }
    let rank = (p.clamp(0.0, 100.0) / 100.0) as f64 * (n - 1) as f64;
    let lower = rank.floor() as usize;
    let fraction = (rank - lower as f64) as f32;

    let (_, &mut low_value, upper_part) = values.select_nth_unstable_by(lower, f32::total_cmp);
    if fraction <= 0.0 || upper_part.is_empty() {
        return low_value;
    }
    let high_value = upper_part
        .iter()
        .copied()
        .min_by(f32::total_cmp)
        .unwrap_or(low_value);
    low_value + (high_value - low_value) * fraction
}
