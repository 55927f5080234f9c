//! # charleston-decoder
//!
//! Read a Charleston-coded price off a photo of a price tag.
//!
//! Retailers sometimes hide their cost price in plain sight by spelling it
//! with the letters of a ten-letter key word. With the key CHARLESTON,
//! `C=1 H=2 A=3 R=4 L=5 E=6 S=7 T=8 O=9 N=0`, so a tag reading `CHAR` means
//! 12.34. This crate crops the tag out of a photo at full resolution, asks a
//! vision model to read it, maps the letters to digits and prices the result
//! with a 10 % markup.
//!
//! ## Pipeline Overview
//!
//! ```text
//! image
//!  │
//!  ├─ 1. Input      local file, URL or bytes → decoded ImageSource
//!  ├─ 2. Crop       displayed rectangle → natural-resolution RasterizedCrop
//!  ├─ 3. Recognize  vision LLM reads the crop
//!  ├─ 4. Map        letters → digit code (LLM or local cipher)
//!  └─ 5. Price      "1299" → 12.99, final 14.289
//! ```
//!
//! Every step is driven by one [`Controller`] state machine. Interactive
//! front ends run it inside a [`Session`]; scripts call [`decode`].
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use charleston_decoder::{decode, CropRectangle, DecodeRequest, DecoderConfig, PipelineState};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Provider auto-detected from OPENAI_API_KEY / ANTHROPIC_API_KEY / ...
//!     let config = DecoderConfig::default();
//!     let crop = CropRectangle::percent(35.0, 40.0, 30.0, 20.0);
//!     let state = decode(DecodeRequest::new("tag.jpg", crop), &config).await?;
//!     if let PipelineState::Results(r) = &state {
//!         println!("{:.2} → {:.2}", r.original_price(), r.final_price());
//!     } else {
//!         eprintln!("{}", state.status_message().unwrap_or_default());
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `charleston` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! charleston-decoder = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod controller;
pub mod decode;
pub mod error;
pub mod geometry;
pub mod pipeline;
pub mod preview;
pub mod price;
pub mod progress;
pub mod prompts;
pub mod services;
pub mod session;
pub mod state;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{DecoderConfig, DecoderConfigBuilder, MapperKind};
pub use controller::{Controller, Effect, Event, RunId};
pub use decode::{decode, decode_source, decode_sync, decode_with_services, write_crop, DecodeRequest};
pub use error::{DecoderError, PipelineFailure};
pub use geometry::{
    rasterize, CropRectangle, CropUnit, DisplayGeometry, GeometryError, RasterizedCrop,
    MIN_DIMENSION,
};
pub use pipeline::encode::EncodedImage;
pub use pipeline::input::{resolve_image, Dimensions, ImageSource};
pub use preview::{PreviewHandle, PreviewHost, PreviewId, TempDirPreviews};
pub use price::{decode_price, DecodedCode, PriceResult, MARKUP};
pub use progress::{NoopProgressCallback, PipelineProgressCallback, ProgressCallback};
pub use services::{
    CharlestonCipher, CodeMapper, LlmCodeMapper, MappingOutcome, ServiceError, Services,
    TextRecognizer, VisionRecognizer,
};
pub use session::{Session, SessionHandle};
pub use state::{
    Artifacts, DecodeResult, NoMappingReason, PipelineReport, PipelineState, Stage, StateKind,
};
