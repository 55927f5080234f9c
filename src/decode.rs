//! One-shot entry points: image in, terminal state out.
//!
//! These run the same [`Controller`] the interactive [`crate::session`] uses,
//! but drive it inline: select, crop, confirm, process, then perform each
//! requested effect in turn until the run ends. There is no user to reset
//! mid-run, so no event loop is needed.

use crate::config::DecoderConfig;
use crate::controller::{Controller, Event};
use crate::error::DecoderError;
use crate::geometry::{CropRectangle, DisplayGeometry, RasterizedCrop};
use crate::pipeline::input::{resolve_image, ImageSource};
use crate::services::Services;
use crate::state::PipelineState;
use std::path::Path;
use tracing::{debug, info};

/// What to decode and where the price is.
#[derive(Debug, Clone)]
pub struct DecodeRequest {
    /// Local path or HTTP(S) URL.
    pub input: String,
    pub crop: CropRectangle,
    /// How the image was displayed when `crop` was drawn. `None` means 1:1.
    pub display: Option<DisplayGeometry>,
}

impl DecodeRequest {
    pub fn new(input: impl Into<String>, crop: CropRectangle) -> Self {
        Self {
            input: input.into(),
            crop,
            display: None,
        }
    }

    pub fn with_display(mut self, display: DisplayGeometry) -> Self {
        self.display = Some(display);
        self
    }
}

/// Decode the price in one image, using the services `config` describes.
///
/// # Errors
/// Returns `Err(DecoderError)` only when the run cannot start: the image is
/// missing or unreadable, no provider is configured, or the crop is refused.
/// A run that starts always ends in `Ok` with a terminal state, including
/// [`PipelineState::Error`].
pub async fn decode(
    request: DecodeRequest,
    config: &DecoderConfig,
) -> Result<PipelineState, DecoderError> {
    let services = Services::from_config(config)?;
    decode_with_services(request, config, services).await
}

/// [`decode`] with caller-supplied services.
pub async fn decode_with_services(
    request: DecodeRequest,
    config: &DecoderConfig,
    services: Services,
) -> Result<PipelineState, DecoderError> {
    info!("Decoding: {}", request.input);
    let source = resolve_image(&request.input, config.download_timeout_secs).await?;
    decode_source(source, request.crop, request.display, config, services).await
}

/// Decode an image that is already in memory.
pub async fn decode_source(
    source: ImageSource,
    crop: CropRectangle,
    display: Option<DisplayGeometry>,
    config: &DecoderConfig,
    services: Services,
) -> Result<PipelineState, DecoderError> {
    let display = display.unwrap_or_else(|| DisplayGeometry::natural(&source));
    let mut controller = Controller::new(config);

    controller.handle(Event::ImageSelected(source))?;
    controller.handle(Event::CropChanged(crop))?;
    controller.handle(Event::CropConfirmed(display))?;
    if controller.state().is_terminal() {
        // The crop could not be rasterised.
        return Ok(controller.into_state());
    }

    let mut effect = controller.handle(Event::ProcessRequested)?;
    while let Some(next) = effect {
        let event = services.execute(next).await;
        effect = controller.handle(event)?;
    }

    let state = controller.into_state();
    debug!("Decode finished: {}", state.kind());
    Ok(state)
}

/// Synchronous wrapper around [`decode`].
///
/// Creates a temporary tokio runtime internally.
pub fn decode_sync(
    request: DecodeRequest,
    config: &DecoderConfig,
) -> Result<PipelineState, DecoderError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| DecoderError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(decode(request, config))
}

/// Write the encoded crop to `path`.
///
/// Uses atomic write (temp file + rename) to prevent partial files.
pub async fn write_crop(crop: &RasterizedCrop, path: impl AsRef<Path>) -> Result<(), DecoderError> {
    let path = path.as_ref();
    let write_err = |e| DecoderError::OutputWriteFailed {
        path: path.to_path_buf(),
        source: e,
    };

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
        }
    }

    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp_path = path.with_extension(format!("{ext}.tmp"));
    tokio::fs::write(&tmp_path, crop.encoded().bytes())
        .await
        .map_err(write_err)?;
    tokio::fs::rename(&tmp_path, path).await.map_err(write_err)?;

    info!(
        "Wrote {} crop ({} bytes) to {}",
        crop.encoded().mime_type(),
        crop.encoded().len(),
        path.display()
    );
    Ok(())
}
