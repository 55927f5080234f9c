//! Crop geometry: on-screen selection → natural-resolution pixel buffer.
//!
//! The user drags a rectangle over a *displayed* image that is usually
//! scaled down to fit the screen. Recognition accuracy depends on the pixel
//! density of the glyphs, so the crop is captured from the image's natural
//! pixels, never from what was on screen.
//!
//! ## Coordinate spaces
//!
//! ```text
//! displayed (CSS px or %)  ──scale──▶  natural (image px)  ──× ratio──▶  surface px
//! ```
//!
//! `scale_x = natural_width / displayed_width` (same for y). The output
//! surface is `floor(crop.w * scale_x * ratio) × floor(crop.h * scale_y * ratio)`
//! and the natural image is drawn onto it with its origin moved to
//! `(-crop.x * scale_x, -crop.y * scale_y)`, so only the crop region lands
//! inside the surface bounds.

use crate::pipeline::input::{Dimensions, ImageSource};
use crate::pipeline::encode::{encode_surface, EncodedImage};
use image::{imageops, DynamicImage, GenericImageView, RgbaImage};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// Smallest accepted crop side, in displayed pixels.
pub const MIN_DIMENSION: f64 = 20.0;

/// Default cap on the output surface area, in pixels.
pub const DEFAULT_MAX_SURFACE_PIXELS: u64 = 50_000_000;

/// Failures of the geometry engine.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GeometryError {
    /// The crop rectangle has zero (or negative, or non-finite) area.
    #[error("crop area {width}×{height} is empty")]
    DegenerateCrop { width: f64, height: f64 },

    /// The displayed image size cannot be used to compute scale factors.
    #[error("displayed image size {width}×{height} (pixel ratio {ratio}) is invalid")]
    InvalidDisplay { width: f64, height: f64, ratio: f64 },

    /// The crop is so small that the surface rounds down to zero pixels.
    #[error("crop area rounds down to an empty {width}×{height} px surface")]
    EmptySurface { width: u32, height: u32 },

    /// The surface would exceed the allocation cap.
    #[error("crop surface {width}×{height} px exceeds the {limit} pixel limit")]
    SurfaceTooLarge { width: u64, height: u64, limit: u64 },

    /// The surface could not be encoded.
    #[error("failed to encode crop: {0}")]
    Encode(String),
}

/// Units a [`CropRectangle`] is expressed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CropUnit {
    /// Percent (0–100) of the displayed width/height.
    #[default]
    Percent,
    /// Pixels of the displayed image.
    Pixels,
}

/// A rectangle in the coordinate space of the displayed image.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CropRectangle {
    pub unit: CropUnit,
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl CropRectangle {
    pub fn percent(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            unit: CropUnit::Percent,
            x,
            y,
            width,
            height,
        }
    }

    pub fn pixels(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            unit: CropUnit::Pixels,
            x,
            y,
            width,
            height,
        }
    }

    /// The same rectangle in displayed pixels.
    pub fn to_display_pixels(&self, display: &DisplayGeometry) -> CropRectangle {
        match self.unit {
            CropUnit::Pixels => *self,
            CropUnit::Percent => CropRectangle::pixels(
                self.x / 100.0 * display.width,
                self.y / 100.0 * display.height,
                self.width / 100.0 * display.width,
                self.height / 100.0 * display.height,
            ),
        }
    }

    /// Whether both sides are at least `min` displayed pixels.
    pub fn meets_minimum(&self, display: &DisplayGeometry, min: f64) -> bool {
        let px = self.to_display_pixels(display);
        px.width >= min && px.height >= min
    }

    fn is_degenerate(&self) -> bool {
        !(self.width.is_finite() && self.height.is_finite() && self.width > 0.0 && self.height > 0.0)
            || !(self.x.is_finite() && self.y.is_finite())
    }
}

/// How the image was laid out on screen when the crop was drawn.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DisplayGeometry {
    /// Displayed width in CSS/logical pixels.
    pub width: f64,
    /// Displayed height in CSS/logical pixels.
    pub height: f64,
    /// Device pixel density multiplier.
    pub device_pixel_ratio: f64,
}

impl DisplayGeometry {
    pub fn new(width: f64, height: f64) -> Self {
        Self {
            width,
            height,
            device_pixel_ratio: 1.0,
        }
    }

    /// The image shown at 1:1.
    pub fn natural(source: &ImageSource) -> Self {
        let Dimensions { width, height } = source.natural_dimensions();
        Self::new(width as f64, height as f64)
    }

    pub fn with_pixel_ratio(mut self, ratio: f64) -> Self {
        self.device_pixel_ratio = ratio;
        self
    }
}

/// Displayed-to-natural scale plus the device pixel ratio.
///
/// Always derived from an (image, display) pair, never stored on its own.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScaleFactors {
    pub x: f64,
    pub y: f64,
    pub pixel_ratio: f64,
}

impl ScaleFactors {
    pub fn new(natural: Dimensions, display: &DisplayGeometry) -> Result<Self, GeometryError> {
        let ok = |v: f64| v.is_finite() && v > 0.0;
        if !ok(display.width) || !ok(display.height) || !ok(display.device_pixel_ratio) {
            return Err(GeometryError::InvalidDisplay {
                width: display.width,
                height: display.height,
                ratio: display.device_pixel_ratio,
            });
        }
        Ok(Self {
            x: natural.width as f64 / display.width,
            y: natural.height as f64 / display.height,
            pixel_ratio: display.device_pixel_ratio,
        })
    }
}

/// Where a crop lands in natural-image space and how big its surface is.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PixelRegion {
    /// Crop origin in natural pixels.
    pub x: f64,
    pub y: f64,
    /// Output surface size in pixels.
    pub surface_width: u32,
    pub surface_height: u32,
    pub pixel_ratio: f64,
}

impl PixelRegion {
    /// Ratio 1 with an integral origin: the surface is an exact copy of
    /// natural pixels.
    pub fn is_pixel_aligned(&self) -> bool {
        self.pixel_ratio == 1.0 && self.x.fract() == 0.0 && self.y.fract() == 0.0
    }
}

/// Map a displayed crop rectangle to natural-image pixels.
pub fn pixel_region(
    crop: &CropRectangle,
    natural: Dimensions,
    display: &DisplayGeometry,
    max_surface_pixels: u64,
) -> Result<PixelRegion, GeometryError> {
    if crop.is_degenerate() {
        return Err(GeometryError::DegenerateCrop {
            width: crop.width,
            height: crop.height,
        });
    }
    let scale = ScaleFactors::new(natural, display)?;
    let crop = crop.to_display_pixels(display);

    let w = (crop.width * scale.x * scale.pixel_ratio).floor();
    let h = (crop.height * scale.y * scale.pixel_ratio).floor();
    if w * h > max_surface_pixels as f64 {
        return Err(GeometryError::SurfaceTooLarge {
            width: w as u64,
            height: h as u64,
            limit: max_surface_pixels,
        });
    }
    let (surface_width, surface_height) = (w as u32, h as u32);
    if surface_width == 0 || surface_height == 0 {
        return Err(GeometryError::EmptySurface {
            width: surface_width,
            height: surface_height,
        });
    }

    Ok(PixelRegion {
        x: crop.x * scale.x,
        y: crop.y * scale.y,
        surface_width,
        surface_height,
        pixel_ratio: scale.pixel_ratio,
    })
}

/// A standalone buffer holding only the cropped region at natural resolution.
///
/// Created once per confirmed crop and never modified. Cloning is cheap.
#[derive(Debug, Clone)]
pub struct RasterizedCrop {
    pixels: Arc<RgbaImage>,
    encoded: Arc<EncodedImage>,
    region: PixelRegion,
}

impl RasterizedCrop {
    pub fn pixels(&self) -> &RgbaImage {
        &self.pixels
    }

    /// The encoded form sent to recognition.
    pub fn encoded(&self) -> &Arc<EncodedImage> {
        &self.encoded
    }

    pub fn region(&self) -> &PixelRegion {
        &self.region
    }

    pub fn dimensions(&self) -> Dimensions {
        Dimensions {
            width: self.pixels.width(),
            height: self.pixels.height(),
        }
    }
}

/// Rasterise `crop` from `source` into a standalone, encoded buffer.
///
/// Fails with [`GeometryError`] for a zero-area rectangle, an unusable
/// display size, or a surface that is empty or over `max_surface_pixels`.
/// Minimum-size checks belong to the caller.
pub fn rasterize(
    source: &ImageSource,
    crop: &CropRectangle,
    display: &DisplayGeometry,
    max_surface_pixels: u64,
) -> Result<RasterizedCrop, GeometryError> {
    let region = pixel_region(crop, source.natural_dimensions(), display, max_surface_pixels)?;
    let surface = draw(source.pixels(), &region);
    let encoded = encode_surface(&surface, Some(source.format()))
        .map_err(|e| GeometryError::Encode(e.to_string()))?;

    debug!(
        "Rasterised crop at ({:.1}, {:.1}) → {}x{} px {}",
        region.x,
        region.y,
        region.surface_width,
        region.surface_height,
        encoded.mime_type()
    );

    Ok(RasterizedCrop {
        pixels: Arc::new(surface),
        encoded: Arc::new(encoded),
        region,
    })
}

/// Draw the natural image onto a transparent surface with its origin at
/// `(-region.x, -region.y)`, scaled by the pixel ratio.
///
/// Sampling is nearest-neighbour at pixel centres, so glyph edges are never
/// smoothed. Surface pixels outside the natural image stay transparent.
fn draw(image: &DynamicImage, region: &PixelRegion) -> RgbaImage {
    let mut surface = RgbaImage::new(region.surface_width, region.surface_height);
    let (nat_w, nat_h) = image.dimensions();

    // Natural-space window covered by the surface, clamped to the image.
    let span_w = region.surface_width as f64 / region.pixel_ratio;
    let span_h = region.surface_height as f64 / region.pixel_ratio;
    let x0 = region.x.floor().clamp(0.0, nat_w as f64) as u32;
    let y0 = region.y.floor().clamp(0.0, nat_h as f64) as u32;
    let x1 = (region.x + span_w).ceil().clamp(0.0, nat_w as f64) as u32;
    let y1 = (region.y + span_h).ceil().clamp(0.0, nat_h as f64) as u32;
    if x1 <= x0 || y1 <= y0 {
        return surface;
    }
    let window = image.crop_imm(x0, y0, x1 - x0, y1 - y0).to_rgba8();

    if region.is_pixel_aligned() {
        imageops::replace(
            &mut surface,
            &window,
            x0 as i64 - region.x as i64,
            y0 as i64 - region.y as i64,
        );
        return surface;
    }

    for (u, v, px) in surface.enumerate_pixels_mut() {
        let nx = region.x + (u as f64 + 0.5) / region.pixel_ratio;
        let ny = region.y + (v as f64 + 0.5) / region.pixel_ratio;
        if nx < x0 as f64 || ny < y0 as f64 || nx >= x1 as f64 || ny >= y1 as f64 {
            continue;
        }
        let (wx, wy) = (nx.floor() as u32 - x0, ny.floor() as u32 - y0);
        *px = *window.get_pixel(wx, wy);
    }
    surface
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, Rgba};

    /// Every pixel encodes its own coordinates, so placement is checkable.
    fn coordinate_image(w: u32, h: u32, format: ImageFormat) -> ImageSource {
        let mut img = RgbaImage::new(w, h);
        for (x, y, px) in img.enumerate_pixels_mut() {
            *px = Rgba([x as u8, y as u8, 0, 255]);
        }
        let enc = encode_surface(&img, Some(format)).unwrap();
        ImageSource::from_bytes(enc.bytes().to_vec(), "coords").unwrap()
    }

    const CAP: u64 = DEFAULT_MAX_SURFACE_PIXELS;

    #[test]
    fn full_crop_at_one_to_one_keeps_natural_size() {
        let src = coordinate_image(120, 80, ImageFormat::Png);
        let display = DisplayGeometry::natural(&src);
        let crop = CropRectangle::percent(0.0, 0.0, 100.0, 100.0);
        let out = rasterize(&src, &crop, &display, CAP).unwrap();
        assert_eq!(out.dimensions(), src.natural_dimensions());
        assert_eq!(out.pixels(), &src.pixels().to_rgba8());
    }

    #[test]
    fn downscaled_display_crops_at_natural_resolution() {
        // 200×100 image shown at 100×50: every displayed pixel covers 2×2.
        let src = coordinate_image(200, 100, ImageFormat::Png);
        let display = DisplayGeometry::new(100.0, 50.0);
        let crop = CropRectangle::pixels(10.0, 5.0, 30.0, 20.0);
        let out = rasterize(&src, &crop, &display, CAP).unwrap();

        assert_eq!(out.region().x, 20.0);
        assert_eq!(out.region().y, 10.0);
        assert_eq!((out.pixels().width(), out.pixels().height()), (60, 40));
        assert_eq!(out.pixels().get_pixel(0, 0), &Rgba([20, 10, 0, 255]));
        assert_eq!(out.pixels().get_pixel(59, 39), &Rgba([79, 49, 0, 255]));
    }

    #[test]
    fn pixel_ratio_multiplies_surface_without_blur() {
        let src = coordinate_image(40, 40, ImageFormat::Png);
        let display = DisplayGeometry::natural(&src).with_pixel_ratio(2.0);
        let crop = CropRectangle::pixels(4.0, 6.0, 10.0, 10.0);
        let out = rasterize(&src, &crop, &display, CAP).unwrap();

        assert_eq!((out.pixels().width(), out.pixels().height()), (20, 20));
        // Each natural pixel becomes an exact 2×2 block.
        for (sx, sy) in [(0, 0), (1, 0), (0, 1), (1, 1)] {
            assert_eq!(out.pixels().get_pixel(sx, sy), &Rgba([4, 6, 0, 255]));
        }
        assert_eq!(out.pixels().get_pixel(2, 0), &Rgba([5, 6, 0, 255]));
        assert_eq!(out.pixels().get_pixel(19, 19), &Rgba([13, 15, 0, 255]));
    }

    #[test]
    fn fractional_origin_uses_nearest_pixel() {
        let src = coordinate_image(50, 50, ImageFormat::Png);
        let display = DisplayGeometry::natural(&src);
        let crop = CropRectangle::pixels(2.25, 3.75, 5.0, 5.0);
        let out = rasterize(&src, &crop, &display, CAP).unwrap();
        // centre of surface pixel 0 is at natural (2.75, 4.25)
        assert_eq!(out.pixels().get_pixel(0, 0), &Rgba([2, 4, 0, 255]));
        assert_eq!(out.pixels().get_pixel(1, 0), &Rgba([3, 4, 0, 255]));
    }

    #[test]
    fn output_size_is_floored() {
        let natural = Dimensions {
            width: 1000,
            height: 750,
        };
        let display = DisplayGeometry::new(400.0, 300.0);
        let crop = CropRectangle::pixels(0.0, 0.0, 100.5, 50.2);
        let region = pixel_region(&crop, natural, &display, CAP).unwrap();
        // 100.5 × 2.5 = 251.25, 50.2 × 2.5 = 125.5
        assert_eq!(region.surface_width, 251);
        assert_eq!(region.surface_height, 125);
    }

    #[test]
    fn percent_crop_is_relative_to_displayed_size() {
        let display = DisplayGeometry::new(400.0, 300.0);
        let px = CropRectangle::percent(10.0, 20.0, 30.0, 20.0).to_display_pixels(&display);
        assert_eq!(px, CropRectangle::pixels(40.0, 60.0, 120.0, 60.0));
        assert!(CropRectangle::percent(0.0, 0.0, 30.0, 20.0).meets_minimum(&display, MIN_DIMENSION));
        assert!(!CropRectangle::percent(0.0, 0.0, 30.0, 5.0).meets_minimum(&display, MIN_DIMENSION));
    }

    #[test]
    fn zero_width_or_height_is_degenerate() {
        let src = coordinate_image(10, 10, ImageFormat::Png);
        let display = DisplayGeometry::natural(&src);
        for crop in [
            CropRectangle::pixels(1.0, 1.0, 0.0, 5.0),
            CropRectangle::pixels(1.0, 1.0, 5.0, 0.0),
            CropRectangle::percent(0.0, 0.0, 0.0, 0.0),
            CropRectangle::pixels(1.0, 1.0, f64::NAN, 5.0),
        ] {
            let err = rasterize(&src, &crop, &display, CAP).unwrap_err();
            assert!(matches!(err, GeometryError::DegenerateCrop { .. }), "{crop:?} → {err:?}");
        }
    }

    #[test]
    fn sub_pixel_crop_has_empty_surface() {
        let src = coordinate_image(10, 10, ImageFormat::Png);
        let display = DisplayGeometry::new(100.0, 100.0);
        // 5 displayed px × 0.1 scale = 0.5 natural px
        let err = rasterize(&src, &CropRectangle::pixels(0.0, 0.0, 5.0, 50.0), &display, CAP)
            .unwrap_err();
        assert!(matches!(err, GeometryError::EmptySurface { width: 0, .. }));
    }

    #[test]
    fn invalid_display_is_rejected() {
        let src = coordinate_image(10, 10, ImageFormat::Png);
        let display = DisplayGeometry::new(0.0, 10.0);
        let err = rasterize(&src, &CropRectangle::pixels(0.0, 0.0, 5.0, 5.0), &display, CAP)
            .unwrap_err();
        assert!(matches!(err, GeometryError::InvalidDisplay { .. }));
    }

    #[test]
    fn surface_cap_is_enforced() {
        let natural = Dimensions {
            width: 10_000,
            height: 10_000,
        };
        let display = DisplayGeometry::new(100.0, 100.0);
        let crop = CropRectangle::percent(0.0, 0.0, 100.0, 100.0);
        let err = pixel_region(&crop, natural, &display, 1_000_000).unwrap_err();
        assert!(matches!(err, GeometryError::SurfaceTooLarge { limit: 1_000_000, .. }));
    }

    #[test]
    fn crop_past_the_edge_is_transparent() {
        let src = coordinate_image(20, 20, ImageFormat::Png);
        let display = DisplayGeometry::natural(&src);
        let out = rasterize(&src, &CropRectangle::pixels(15.0, 15.0, 10.0, 10.0), &display, CAP)
            .unwrap();
        assert_eq!(out.pixels().get_pixel(4, 4), &Rgba([19, 19, 0, 255]));
        assert_eq!(out.pixels().get_pixel(5, 5), &Rgba([0, 0, 0, 0]));
    }

    #[test]
    fn aligned_and_sampled_paths_agree() {
        let src = coordinate_image(30, 30, ImageFormat::Png);
        let aligned = PixelRegion {
            x: 3.0,
            y: 7.0,
            surface_width: 12,
            surface_height: 9,
            pixel_ratio: 1.0,
        };
        let fast = draw(src.pixels(), &aligned);
        // A ratio infinitesimally off 1.0 forces the sampling loop.
        let sampled = draw(
            src.pixels(),
            &PixelRegion {
                pixel_ratio: 1.0 + 1e-12,
                ..aligned
            },
        );
        assert_eq!(fast, sampled);
    }

    #[test]
    fn source_format_is_preserved() {
        let src = coordinate_image(32, 32, ImageFormat::Jpeg);
        let display = DisplayGeometry::natural(&src);
        let out = rasterize(&src, &CropRectangle::pixels(0.0, 0.0, 16.0, 16.0), &display, CAP)
            .unwrap();
        assert_eq!(out.encoded().mime_type(), "image/jpeg");
    }
}
