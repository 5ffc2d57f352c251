// THEORY:
// A `Frame` is one decoded picture as it travels between the video collaborators
// and the filters. It is either luminance-only (a single 8-bit channel) or native
// colour (three 8-bit channels in RGB order). Anything else a decoder might hand
// over (alpha, 16-bit samples) is normalized into one of those two shapes at the
// boundary so no stage ever has to guess the layout.

use image::{DynamicImage, GrayImage, RgbImage};

/// A decoded video frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// A luminance-only frame.
    Gray(GrayImage),
    /// A colour frame, RGB channel order.
    Color(RgbImage),
}

impl Frame {
    /// Normalizes any decoded image into a `Frame`. Luma (with or without alpha)
    /// stays single-channel; everything else becomes 8-bit RGB.
    pub fn from_dynamic(image: DynamicImage) -> Self {
        match image {
            DynamicImage::ImageLuma8(gray) => Frame::Gray(gray),
            DynamicImage::ImageLumaA8(_)
            | DynamicImage::ImageLuma16(_)
            | DynamicImage::ImageLumaA16(_) => Frame::Gray(image.to_luma8()),
            DynamicImage::ImageRgb8(rgb) => Frame::Color(rgb),
            other => Frame::Color(other.to_rgb8()),
        }
    }

    pub fn into_dynamic(self) -> DynamicImage {
        match self {
            Frame::Gray(gray) => DynamicImage::ImageLuma8(gray),
            Frame::Color(rgb) => DynamicImage::ImageRgb8(rgb),
        }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        match self {
            Frame::Gray(gray) => gray.dimensions(),
            Frame::Color(rgb) => rgb.dimensions(),
        }
    }

    pub fn width(&self) -> u32 {
        self.dimensions().0
    }

    pub fn height(&self) -> u32 {
        self.dimensions().1
    }

    pub fn is_color(&self) -> bool {
        matches!(self, Frame::Color(_))
    }

    pub fn layout_name(&self) -> &'static str {
        if self.is_color() { "colour" } else { "gray" }
    }

    /// Converts to colour (gray replicated into RGB) or to luminance-only.
    pub fn with_layout(self, color: bool) -> Frame {
        match (self, color) {
            (Frame::Gray(gray), true) => Frame::Color(DynamicImage::ImageLuma8(gray).to_rgb8()),
            (Frame::Color(rgb), false) => Frame::Gray(DynamicImage::ImageRgb8(rgb).to_luma8()),
            (frame, _) => frame,
        }
    }

    /// Resizes to `width` x `height` with bilinear filtering.
    pub fn resized(&self, width: u32, height: u32) -> Frame {
        use image::imageops::{FilterType, resize};
        match self {
            Frame::Gray(gray) => Frame::Gray(resize(gray, width, height, FilterType::Triangle)),
            Frame::Color(rgb) => Frame::Color(resize(rgb, width, height, FilterType::Triangle)),
        }
    }

    /// Mean intensity over every channel of every pixel.
    pub fn mean_intensity(&self) -> f64 {
        let raw: &[u8] = match self {
            Frame::Gray(gray) => gray.as_raw(),
            Frame::Color(rgb) => rgb.as_raw(),
        };
        if raw.is_empty() {
            return 0.0;
        }
        raw.iter().map(|&v| v as f64).sum::<f64>() / raw.len() as f64
    }
}

impl From<RgbImage> for Frame {
    fn from(image: RgbImage) -> Self {
        Frame::Color(image)
    }
}

impl From<GrayImage> for Frame {
    fn from(image: GrayImage) -> Self {
        Frame::Gray(image)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Luma, Rgb, Rgba, RgbaImage};

    #[test]
    fn layout_conversion_keeps_geometry() {
        let gray = Frame::Gray(GrayImage::from_pixel(3, 2, Luma([90])));
        let Frame::Color(rgb) = gray.clone().with_layout(true) else {
            panic!("expected colour");
        };
        assert_eq!(rgb.dimensions(), (3, 2));
        assert!(rgb.pixels().all(|p| p.0 == [90, 90, 90]));
        assert_eq!(gray.clone().with_layout(false), gray);

        let colour = Frame::Color(RgbImage::from_pixel(3, 2, Rgb([50, 50, 50])));
        assert!(!colour.with_layout(false).is_color());
    }

    #[test]
    fn rgba_input_is_normalized_to_rgb() {
        let rgba = RgbaImage::from_pixel(4, 2, Rgba([10, 20, 30, 128]));
        let frame = Frame::from_dynamic(DynamicImage::ImageRgba8(rgba));
        match frame {
            Frame::Color(rgb) => {
                assert_eq!(rgb.dimensions(), (4, 2));
                assert_eq!(rgb.get_pixel(3, 1).0, [10, 20, 30]);
            }
            Frame::Gray(_) => panic!("expected a colour frame"),
        }
    }

    #[test]
    fn resize_changes_dimensions_only() {
        let frame = Frame::Gray(GrayImage::from_pixel(8, 8, image::Luma([77])));
        let resized = frame.resized(5, 3);
        assert_eq!(resized.dimensions(), (5, 3));
        assert!((resized.mean_intensity() - 77.0).abs() < 1.0);
    }
}
