use crate::detection::Detection;
use font8x8::{UnicodeFonts, BASIC_FONTS};
use image::{
    ColorType, DynamicImage, GenericImage, GenericImageView, ImageFormat, ImageReader, Rgba,
};
use imageproc::{drawing::draw_hollow_rect_mut, rect::Rect};
use std::io::Cursor;
use thiserror::Error;

const BOX_COLOR: Rgba<u8> = Rgba([255, 0, 0, 255]);
const STROKE_WIDTH: i64 = 3;
const LABEL_OFFSET: i64 = 10;
const GLYPH_SIZE: i64 = 8;

#[derive(Error, Debug)]
pub enum AnnotateError {
    #[error("Failed to decode image: {0}")]
    DecodeError(String),
    #[error("Detection {index} has a non-positive or non-finite box size")]
    InvalidGeometry { index: usize },
    #[error("Failed to encode image: {0}")]
    EncodeError(#[from] image::ImageError),
}

/// Outer corners of a detection box.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoxCorners {
    pub x0: f64,
    pub y0: f64,
    pub x1: f64,
    pub y1: f64,
}

impl BoxCorners {
    pub fn from_detection(detection: &Detection) -> Self {
        let half_width = detection.width / 2.0;
        let half_height = detection.height / 2.0;
        Self {
            x0: detection.center_x - half_width,
            y0: detection.center_y - half_height,
            x1: detection.center_x + half_width,
            y1: detection.center_y + half_height,
        }
    }

    /// Pixel rectangle covering both corners, inclusive. Float to int casts
    /// saturate, so every later step works on `i64` with clamped edges.
    fn to_pixel_rect(self) -> PixelRect {
        PixelRect {
            x0: self.x0.round() as i64,
            y0: self.y0.round() as i64,
            x1: self.x1.round() as i64,
            y1: self.y1.round() as i64,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PixelRect {
    x0: i64,
    y0: i64,
    x1: i64,
    y1: i64,
}

impl PixelRect {
    /// Pulls every edge to just outside the image. An edge past the margin
    /// has no stroke pixel inside the image, and neither does its clamped
    /// replacement, so the visible result is unchanged while line lengths
    /// stay bounded by the image size.
    fn clamp_to(self, width: u32, height: u32) -> Self {
        let margin = STROKE_WIDTH + 1;
        let clamp_x = |v: i64| v.clamp(-margin, width as i64 + margin);
        let clamp_y = |v: i64| v.clamp(-margin, height as i64 + margin);
        Self {
            x0: clamp_x(self.x0),
            y0: clamp_y(self.y0),
            x1: clamp_x(self.x1),
            y1: clamp_y(self.y1),
        }
    }
}

fn validate(detections: &[Detection]) -> Result<(), AnnotateError> {
    for (index, detection) in detections.iter().enumerate() {
        let valid = [
            detection.center_x,
            detection.center_y,
            detection.width,
            detection.height,
        ]
        .iter()
        .all(|v| v.is_finite())
            && detection.width > 0.0
            && detection.height > 0.0;
        if !valid {
            return Err(AnnotateError::InvalidGeometry { index });
        }
    }
    Ok(())
}

/// Decoded image kept in its source color type, so a pass with no
/// detections re-encodes the same pixels at the same bit depth.
pub struct AnnotatedImage {
    pub image: DynamicImage,
}

impl AnnotatedImage {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, AnnotateError> {
        let image = ImageReader::new(Cursor::new(bytes))
            .with_guessed_format()
            .map_err(|e| AnnotateError::DecodeError(e.to_string()))?
            .decode()
            .map_err(|e| AnnotateError::DecodeError(e.to_string()))?;
        Ok(Self { image })
    }

    pub fn to_png(&self) -> Result<Vec<u8>, AnnotateError> {
        let mut buf = Vec::new();
        self.image
            .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)?;
        Ok(buf)
    }

    pub fn annotate(&mut self, detections: &[Detection]) -> &mut Self {
        if detections.is_empty() {
            return self;
        }
        self.promote_grayscale();
        let (img_width, img_height) = self.image.dimensions();

        for detection in detections {
            let corners = BoxCorners::from_detection(detection).to_pixel_rect();
            let PixelRect { x0, y0, x1, y1 } = corners.clamp_to(img_width, img_height);

            for inset in 0..STROKE_WIDTH {
                let width = x1 - x0 + 1 - 2 * inset;
                let height = y1 - y0 + 1 - 2 * inset;
                if width <= 0 || height <= 0 {
                    break;
                }
                let rect = Rect::at((x0 + inset) as i32, (y0 + inset) as i32)
                    .of_size(width as u32, height as u32);
                draw_hollow_rect_mut(&mut self.image, rect, BOX_COLOR);
            }

            self.draw_label(
                &detection.label,
                corners.x0,
                corners.y0.saturating_sub(LABEL_OFFSET),
            );
        }
        self
    }

    /// Red cannot be drawn on a gray buffer; widen it to RGB at the same depth.
    fn promote_grayscale(&mut self) {
        let promoted = match self.image.color() {
            ColorType::L8 => DynamicImage::ImageRgb8(self.image.to_rgb8()),
            ColorType::La8 => DynamicImage::ImageRgba8(self.image.to_rgba8()),
            ColorType::L16 => DynamicImage::ImageRgb16(self.image.to_rgb16()),
            ColorType::La16 => DynamicImage::ImageRgba16(self.image.to_rgba16()),
            _ => return,
        };
        self.image = promoted;
    }

    fn draw_label(&mut self, text: &str, x: i64, y: i64) {
        let (img_width, img_height) = self.image.dimensions();
        let (img_width, img_height) = (img_width as i64, img_height as i64);
        if y >= img_height || y.saturating_add(GLYPH_SIZE) <= 0 {
            return;
        }

        for (position, ch) in text.chars().enumerate() {
            let origin_x = x.saturating_add((position as i64).saturating_mul(GLYPH_SIZE));
            if origin_x >= img_width {
                break;
            }
            if origin_x + GLYPH_SIZE <= 0 {
                continue;
            }
            let Some(glyph) = BASIC_FONTS.get(ch) else {
                continue;
            };
            for (row, bits) in glyph.iter().enumerate() {
                for col in 0..GLYPH_SIZE {
                    if (*bits >> col) & 1 == 0 {
                        continue;
                    }
                    let px = origin_x + col;
                    let py = y + row as i64;
                    if px >= 0 && py >= 0 && px < img_width && py < img_height {
                        self.image.put_pixel(px as u32, py as u32, BOX_COLOR);
                    }
                }
            }
        }
    }
}

/// Draws every detection's box and label onto the image and returns it
/// re-encoded as PNG. Later detections draw over earlier ones.
pub fn draw_boxes(
    image_bytes: &[u8],
    detections: &[Detection],
) -> Result<Vec<u8>, AnnotateError> {
    validate(detections)?;
    let mut image = AnnotatedImage::from_bytes(image_bytes)?;
    image.annotate(detections).to_png()
}
