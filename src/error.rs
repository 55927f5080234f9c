//! Error types for the charleston-decoder library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`DecoderError`] is **fatal to the call**: the request cannot be acted on
//!   at all (image file missing, provider not configured, an event the
//!   controller cannot accept in its current state). Returned as
//!   `Err(DecoderError)`.
//!
//! * [`PipelineFailure`] is **terminal for the run**: a decode run started and
//!   then failed (crop could not be rasterised, recognition call failed, the
//!   mapped code is not a price). Stored inside
//!   [`crate::state::PipelineState::Error`] next to whatever artifacts were
//!   gathered before the failure, so the caller can still show them.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the charleston-decoder library.
///
/// Run-level failures use [`PipelineFailure`] and are stored in
/// [`crate::state::PipelineState::Error`] rather than propagated here.
#[derive(Debug, Error)]
pub enum DecoderError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("Image file not found: '{path}'\nCheck the path exists and is readable.")]
    ImageNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// HTTP URL was syntactically valid but download failed.
    #[error("Failed to download '{url}': {reason}\nCheck your internet connection.")]
    DownloadFailed { url: String, reason: String },

    /// Download exceeded the configured timeout.
    #[error("Download timed out after {secs}s for '{url}'\nIncrease --download-timeout.")]
    DownloadTimeout { url: String, secs: u64 },

    /// The bytes were read but are not a PNG, JPEG or GIF image we can decode.
    #[error("'{name}' is not a supported image: {detail}\nSupported formats: PNG, JPEG, GIF.")]
    UnsupportedImage { name: String, detail: String },

    // ── LLM errors ────────────────────────────────────────────────────────
    /// The configured provider is not initialised (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    // ── Controller errors ─────────────────────────────────────────────────
    /// The event is not accepted in the controller's current state.
    #[error("Cannot handle '{event}' while the pipeline is {state}")]
    InvalidTransition {
        state: &'static str,
        event: &'static str,
    },

    /// A crop was confirmed before any rectangle was drawn.
    #[error("No crop area has been selected yet")]
    NoCropSelected,

    /// The confirmed crop is below the minimum size on at least one axis.
    #[error("Crop area {width:.0}×{height:.0} px is too small (minimum {min:.0} px on each side)")]
    CropTooSmall { width: f64, height: f64, min: f64 },

    /// The session driving the controller has shut down.
    #[error("Decode session is closed")]
    SessionClosed,

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write an output file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Why a decode run ended in [`crate::state::PipelineState::Error`].
///
/// The `Display` text is the user-facing status message. Only
/// [`PipelineFailure::Unexpected`] carries an underlying message verbatim.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PipelineFailure {
    /// The confirmed crop could not be rasterised.
    #[error("The selected area could not be captured: {detail}. Please crop again.")]
    Geometry { detail: String },

    /// The recognition service failed (as opposed to returning no text).
    #[error("Text recognition is unavailable right now: {detail}")]
    RecognitionUnavailable { detail: String },

    /// The mapping service produced a code that is not a price.
    #[error("Generated code \"{code}\" could not be converted to a price.")]
    UndecodableCode { code: String },

    /// Any other failure of an external call.
    #[error("{}", unexpected_message(.message))]
    Unexpected { message: String },
}

fn unexpected_message(message: &str) -> &str {
    if message.trim().is_empty() {
        "An unknown error occurred during processing."
    } else {
        message
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn undecodable_code_mentions_code() {
        let e = PipelineFailure::UndecodableCode {
            code: "12a".into(),
        };
        assert_eq!(
            e.to_string(),
            "Generated code \"12a\" could not be converted to a price."
        );
    }

    #[test]
    fn unexpected_message_is_verbatim() {
        let e = PipelineFailure::Unexpected {
            message: "connection reset by peer".into(),
        };
        assert_eq!(e.to_string(), "connection reset by peer");
    }

    #[test]
    fn unexpected_without_message_gets_fallback() {
        let e = PipelineFailure::Unexpected {
            message: "  ".into(),
        };
        assert!(e.to_string().contains("unknown error"));
    }

    #[test]
    fn crop_too_small_display() {
        let e = DecoderError::CropTooSmall {
            width: 12.0,
            height: 40.0,
            min: 20.0,
        };
        let msg = e.to_string();
        assert!(msg.contains("12×40"), "got: {msg}");
        assert!(msg.contains("minimum 20"), "got: {msg}");
    }

    #[test]
    fn invalid_transition_display() {
        let e = DecoderError::InvalidTransition {
            state: "idle",
            event: "process requested",
        };
        assert_eq!(
            e.to_string(),
            "Cannot handle 'process requested' while the pipeline is idle"
        );
    }

    #[test]
    fn failure_serialises_with_kind_tag() {
        let e = PipelineFailure::RecognitionUnavailable {
            detail: "timeout".into(),
        };
        let json = serde_json::to_string(&e).unwrap();
        assert!(json.contains("\"kind\":\"recognition_unavailable\""), "got: {json}");
    }
}
