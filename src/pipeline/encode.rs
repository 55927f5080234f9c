//! Image encoding: pixel surface → encoded bytes tagged with a MIME type.
//!
//! The rasterised crop is re-encoded in the *source* image's format so the
//! recognition service sees the same kind of file the user uploaded. Formats
//! we cannot write fall back to PNG, which is lossless: text crispness
//! matters far more than file size for recognition accuracy.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::ImageData;
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, ImageFormat, RgbaImage};
use std::io::Cursor;
use tracing::debug;

/// JPEG quality used when the source was a JPEG. High enough that glyph
/// edges survive a second compression pass.
const JPEG_QUALITY: u8 = 95;

/// An encoded image buffer plus the format it is encoded in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedImage {
    bytes: Vec<u8>,
    format: ImageFormat,
}

impl EncodedImage {
    pub fn new(bytes: Vec<u8>, format: ImageFormat) -> Self {
        Self { bytes, format }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn format(&self) -> ImageFormat {
        self.format
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// MIME type, e.g. `image/png`.
    pub fn mime_type(&self) -> &'static str {
        self.format.to_mime_type()
    }

    /// Preferred file extension without the dot, e.g. `png`.
    pub fn extension(&self) -> &'static str {
        self.format.extensions_str().first().copied().unwrap_or("bin")
    }

    /// `data:<mime>;base64,<payload>` form of the image.
    pub fn to_data_uri(&self) -> String {
        format!("data:{};base64,{}", self.mime_type(), STANDARD.encode(&self.bytes))
    }

    /// Wrap the image for a multimodal chat request.
    ///
    /// `detail: "high"` asks GPT-4-class models for the full tile budget; a
    /// price tag crop is small, and fine print is exactly what we need read.
    pub fn to_image_data(&self) -> ImageData {
        let b64 = STANDARD.encode(&self.bytes);
        debug!("Encoded crop → {} bytes base64 ({})", b64.len(), self.mime_type());
        ImageData::new(b64, self.mime_type()).with_detail("high")
    }
}

/// Whether we can write `format` without losing the source's encoding.
pub fn is_writable(format: ImageFormat) -> bool {
    matches!(format, ImageFormat::Png | ImageFormat::Jpeg | ImageFormat::Gif)
}

/// Encode a rasterised surface, preserving `preferred` when possible and
/// falling back to PNG otherwise.
pub fn encode_surface(
    surface: &RgbaImage,
    preferred: Option<ImageFormat>,
) -> Result<EncodedImage, image::ImageError> {
    let format = preferred.filter(|f| is_writable(*f)).unwrap_or(ImageFormat::Png);
    let mut buf = Vec::new();

    match format {
        ImageFormat::Jpeg => {
            // JPEG has no alpha channel.
            let rgb = DynamicImage::ImageRgba8(surface.clone()).to_rgb8();
            let encoder = JpegEncoder::new_with_quality(&mut buf, JPEG_QUALITY);
            rgb.write_with_encoder(encoder)?;
        }
        other => {
            surface.write_to(&mut Cursor::new(&mut buf), other)?;
        }
    }

    debug!(
        "Encoded {}x{} surface as {} ({} bytes)",
        surface.width(),
        surface.height(),
        format.to_mime_type(),
        buf.len()
    );
    Ok(EncodedImage::new(buf, format))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    fn red(w: u32, h: u32) -> RgbaImage {
        RgbaImage::from_pixel(w, h, Rgba([255, 0, 0, 255]))
    }

    #[test]
    fn png_is_preserved() {
        let enc = encode_surface(&red(10, 10), Some(ImageFormat::Png)).expect("encode");
        assert_eq!(enc.mime_type(), "image/png");
        assert_eq!(image::guess_format(enc.bytes()).unwrap(), ImageFormat::Png);
    }

    #[test]
    fn jpeg_is_preserved() {
        let enc = encode_surface(&red(16, 8), Some(ImageFormat::Jpeg)).expect("encode");
        assert_eq!(enc.mime_type(), "image/jpeg");
        let back = image::load_from_memory(enc.bytes()).unwrap();
        assert_eq!((back.width(), back.height()), (16, 8));
    }

    #[test]
    fn gif_is_preserved() {
        let enc = encode_surface(&red(4, 4), Some(ImageFormat::Gif)).expect("encode");
        assert_eq!(enc.mime_type(), "image/gif");
    }

    #[test]
    fn unknown_format_falls_back_to_png() {
        let enc = encode_surface(&red(4, 4), Some(ImageFormat::Tiff)).expect("encode");
        assert_eq!(enc.format(), ImageFormat::Png);
        let enc = encode_surface(&red(4, 4), None).expect("encode");
        assert_eq!(enc.format(), ImageFormat::Png);
    }

    #[test]
    fn png_round_trip_is_lossless() {
        let mut img = RgbaImage::new(3, 2);
        for (x, y, px) in img.enumerate_pixels_mut() {
            *px = Rgba([x as u8 * 40, y as u8 * 90, 7, 200]);
        }
        let enc = encode_surface(&img, Some(ImageFormat::Png)).unwrap();
        let back = image::load_from_memory(enc.bytes()).unwrap().to_rgba8();
        assert_eq!(back, img);
    }

    #[test]
    fn data_uri_and_image_data() {
        let enc = encode_surface(&red(2, 2), None).unwrap();
        assert!(enc.to_data_uri().starts_with("data:image/png;base64,"));
        let data = enc.to_image_data();
        assert_eq!(data.mime_type, "image/png");
        let decoded = STANDARD.decode(&data.data).expect("valid base64");
        assert_eq!(decoded, enc.bytes());
    }

    #[test]
    fn extension_matches_format() {
        let enc = EncodedImage::new(vec![1, 2, 3], ImageFormat::Jpeg);
        assert!(["jpg", "jpeg"].contains(&enc.extension()));
        assert_eq!(enc.len(), 3);
    }
}
