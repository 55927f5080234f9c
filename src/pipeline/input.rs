//! Input resolution: turn a user-supplied path, URL or byte buffer into an
//! [`ImageSource`].
//!
//! Decoding happens once, up front. The decoded pixels give us the image's
//! *natural* dimensions, which the crop geometry needs, and the original
//! encoded bytes are kept so previews and re-encoding can use the format the
//! user actually uploaded.

use crate::error::DecoderError;
use crate::pipeline::encode::EncodedImage;
use image::{DynamicImage, GenericImageView, ImageFormat};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

/// Width and height in whole pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

/// A user-selected raster image plus its natural (unscaled) dimensions.
///
/// Immutable once created. Cloning is cheap: pixels and bytes are shared.
#[derive(Debug, Clone)]
pub struct ImageSource {
    name: String,
    pixels: Arc<DynamicImage>,
    original: Arc<EncodedImage>,
}

impl ImageSource {
    /// Decode an in-memory image. The format is sniffed from the bytes, not
    /// taken from `name`.
    pub fn from_bytes(bytes: Vec<u8>, name: impl Into<String>) -> Result<Self, DecoderError> {
        let name = name.into();
        let format = image::guess_format(&bytes).map_err(|e| DecoderError::UnsupportedImage {
            name: name.clone(),
            detail: e.to_string(),
        })?;
        if !matches!(format, ImageFormat::Png | ImageFormat::Jpeg | ImageFormat::Gif) {
            return Err(DecoderError::UnsupportedImage {
                name,
                detail: format!("{} files are not accepted", format.to_mime_type()),
            });
        }

        let pixels = image::load_from_memory_with_format(&bytes, format).map_err(|e| {
            DecoderError::UnsupportedImage {
                name: name.clone(),
                detail: e.to_string(),
            }
        })?;
        let (width, height) = pixels.dimensions();
        if width == 0 || height == 0 {
            return Err(DecoderError::UnsupportedImage {
                name,
                detail: "image has no pixels".into(),
            });
        }
        debug!("Decoded '{}' → {}x{} {}", name, width, height, format.to_mime_type());

        Ok(Self {
            name,
            pixels: Arc::new(pixels),
            original: Arc::new(EncodedImage::new(bytes, format)),
        })
    }

    /// Wrap already-decoded pixels, encoding them as PNG for previews.
    pub fn from_pixels(pixels: DynamicImage, name: impl Into<String>) -> Result<Self, DecoderError> {
        let name = name.into();
        if pixels.width() == 0 || pixels.height() == 0 {
            return Err(DecoderError::UnsupportedImage {
                name,
                detail: "image has no pixels".into(),
            });
        }
        let rgba = pixels.to_rgba8();
        let original = crate::pipeline::encode::encode_surface(&rgba, Some(ImageFormat::Png))
            .map_err(|e| DecoderError::Internal(format!("Failed to encode '{name}': {e}")))?;
        Ok(Self {
            name,
            pixels: Arc::new(pixels),
            original: Arc::new(original),
        })
    }

    /// Display name (file name or URL).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The decoded pixels at natural resolution.
    pub fn pixels(&self) -> &DynamicImage {
        &self.pixels
    }

    /// The bytes as originally supplied.
    pub fn original(&self) -> &EncodedImage {
        &self.original
    }

    /// The source's encoding, used as the preferred output format.
    pub fn format(&self) -> ImageFormat {
        self.original.format()
    }

    pub fn natural_dimensions(&self) -> Dimensions {
        let (width, height) = self.pixels.dimensions();
        Dimensions { width, height }
    }
}

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Resolve a local path or HTTP(S) URL to a decoded [`ImageSource`].
///
/// Decoding is CPU-bound and runs on the blocking pool.
pub async fn resolve_image(input: &str, timeout_secs: u64) -> Result<ImageSource, DecoderError> {
    let bytes = if is_url(input) {
        download_url(input, timeout_secs).await?
    } else {
        read_local(input).await?
    };

    let name = display_name(input);
    tokio::task::spawn_blocking(move || ImageSource::from_bytes(bytes, name))
        .await
        .map_err(|e| DecoderError::Internal(format!("Image decode task panicked: {}", e)))?
}

async fn read_local(path_str: &str) -> Result<Vec<u8>, DecoderError> {
    let path = PathBuf::from(path_str);
    match tokio::fs::read(&path).await {
        Ok(bytes) => {
            debug!("Read local image: {} ({} bytes)", path.display(), bytes.len());
            Ok(bytes)
        }
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            Err(DecoderError::PermissionDenied { path })
        }
        Err(_) => Err(DecoderError::ImageNotFound { path }),
    }
}

/// Download a URL into memory.
async fn download_url(url: &str, timeout_secs: u64) -> Result<Vec<u8>, DecoderError> {
    info!("Downloading image from: {}", url);

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| DecoderError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    let to_error = |e: reqwest::Error| {
        if e.is_timeout() {
            DecoderError::DownloadTimeout {
                url: url.to_string(),
                secs: timeout_secs,
            }
        } else {
            DecoderError::DownloadFailed {
                url: url.to_string(),
                reason: e.to_string(),
            }
        }
    };

    let response = client.get(url).send().await.map_err(to_error)?;
    if !response.status().is_success() {
        return Err(DecoderError::DownloadFailed {
            url: url.to_string(),
            reason: format!("HTTP {}", response.status()),
        });
    }

    let bytes = response.bytes().await.map_err(to_error)?;
    info!("Downloaded {} bytes", bytes.len());
    Ok(bytes.to_vec())
}

/// Last path segment of a path or URL, for messages.
fn display_name(input: &str) -> String {
    if is_url(input) {
        if let Ok(parsed) = reqwest::Url::parse(input) {
            if let Some(last) = parsed.path_segments().and_then(|mut s| s.next_back()) {
                if !last.is_empty() {
                    return last.to_string();
                }
            }
        }
        return input.to_string();
    }
    PathBuf::from(input)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| input.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};
    use std::io::Write;

    fn png_bytes(w: u32, h: u32) -> Vec<u8> {
        let img = RgbaImage::from_pixel(w, h, Rgba([10, 20, 30, 255]));
        crate::pipeline::encode::encode_surface(&img, Some(ImageFormat::Png))
            .unwrap()
            .bytes()
            .to_vec()
    }

    #[test]
    fn test_is_url() {
        assert!(is_url("https://example.com/tag.jpg"));
        assert!(is_url("http://example.com/tag.jpg"));
        assert!(!is_url("/tmp/tag.jpg"));
        assert!(!is_url("tag.jpg"));
        assert!(!is_url(""));
    }

    #[test]
    fn from_bytes_reads_natural_dimensions() {
        let src = ImageSource::from_bytes(png_bytes(64, 48), "tag.png").unwrap();
        assert_eq!(
            src.natural_dimensions(),
            Dimensions {
                width: 64,
                height: 48
            }
        );
        assert_eq!(src.format(), ImageFormat::Png);
        assert_eq!(src.name(), "tag.png");
    }

    #[test]
    fn from_bytes_rejects_garbage() {
        let err = ImageSource::from_bytes(b"%PDF-1.7 not an image".to_vec(), "doc.pdf").unwrap_err();
        assert!(matches!(err, DecoderError::UnsupportedImage { .. }), "got {err:?}");
    }

    #[test]
    fn display_name_strips_directories() {
        assert_eq!(display_name("/tmp/shots/tag.jpg"), "tag.jpg");
        assert_eq!(display_name("https://example.com/a/b/tag.png"), "tag.png");
    }

    #[tokio::test]
    async fn resolve_local_file() {
        let mut tmp = tempfile::Builder::new().suffix(".png").tempfile().unwrap();
        tmp.write_all(&png_bytes(5, 7)).unwrap();
        let src = resolve_image(tmp.path().to_str().unwrap(), 5).await.unwrap();
        assert_eq!(src.natural_dimensions().height, 7);
    }

    #[tokio::test]
    async fn resolve_missing_file() {
        let err = resolve_image("/definitely/not/here.png", 5).await.unwrap_err();
        assert!(matches!(err, DecoderError::ImageNotFound { .. }));
    }
}
