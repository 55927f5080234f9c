//! Pipeline state: one tagged union, per-variant required fields.
//!
//! Every artifact a variant carries is one the pipeline actually obtained on
//! the way to that variant. A [`DecodeResult`] cannot exist without a code,
//! and a price cannot exist without a [`DecodeResult`].

use crate::error::PipelineFailure;
use crate::geometry::{CropRectangle, RasterizedCrop};
use crate::pipeline::input::{Dimensions, ImageSource};
use crate::price::{DecodedCode, PriceResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Inner stage of a processing run. Ordered: a run only moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Recognizing,
    Mapping,
    Pricing,
}

impl Stage {
    /// Human-readable progress label.
    pub fn label(&self) -> &'static str {
        match self {
            Stage::Recognizing => "Extracting text from image...",
            Stage::Mapping => "Mapping letters to code...",
            Stage::Pricing => "Calculating price...",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Whatever a run had gathered at the point it stopped.
#[derive(Debug, Clone, Default)]
pub struct Artifacts {
    pub source: Option<ImageSource>,
    pub crop: Option<RasterizedCrop>,
    pub extracted_text: Option<String>,
    pub numerical_code: Option<String>,
}

/// A fully decoded run.
#[derive(Debug, Clone)]
pub struct DecodeResult {
    pub source: ImageSource,
    pub crop: RasterizedCrop,
    pub extracted_text: String,
    pub numerical_code: DecodedCode,
    pub price: PriceResult,
}

impl DecodeResult {
    pub fn original_price(&self) -> f64 {
        self.price.original_price
    }

    pub fn final_price(&self) -> f64 {
        self.price.final_price
    }
}

/// Why a run ended without a price but also without a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoMappingReason {
    /// Recognition returned no text, or only whitespace.
    NoTextExtracted,
    /// The mapping service declined the text.
    NotSuitable,
    /// The mapping service accepted the text but produced an empty code.
    EmptyCode,
}

impl NoMappingReason {
    pub fn message(&self) -> &'static str {
        match self {
            NoMappingReason::NoTextExtracted => {
                "No text could be extracted from the image, or extracted text was empty."
            }
            NoMappingReason::NotSuitable => "Text not suitable for Charleston mapping.",
            NoMappingReason::EmptyCode => "Extracted text was mapped to an empty code.",
        }
    }
}

/// The controller's state. Exactly one is active at a time.
#[derive(Debug, Clone, Default)]
pub enum PipelineState {
    #[default]
    Idle,
    /// An image is selected; the user is drawing the crop.
    Cropping {
        source: ImageSource,
        crop: Option<CropRectangle>,
    },
    /// The crop is rasterised and waiting for "process".
    ReadyToProcess {
        source: ImageSource,
        crop: RasterizedCrop,
    },
    /// A run is in flight.
    Processing { stage: Stage, artifacts: Artifacts },
    Results(DecodeResult),
    NoMappingPossible {
        reason: NoMappingReason,
        artifacts: Artifacts,
    },
    Error {
        failure: PipelineFailure,
        artifacts: Artifacts,
    },
}

/// Variant tag of [`PipelineState`], for logs and callbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateKind {
    Idle,
    Cropping,
    ReadyToProcess,
    Processing,
    Results,
    NoMappingPossible,
    Error,
}

impl StateKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StateKind::Idle => "idle",
            StateKind::Cropping => "cropping",
            StateKind::ReadyToProcess => "ready to process",
            StateKind::Processing => "processing",
            StateKind::Results => "showing results",
            StateKind::NoMappingPossible => "showing no-mapping result",
            StateKind::Error => "showing an error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StateKind::Results | StateKind::NoMappingPossible | StateKind::Error
        )
    }
}

impl fmt::Display for StateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl PipelineState {
    pub fn kind(&self) -> StateKind {
        match self {
            PipelineState::Idle => StateKind::Idle,
            PipelineState::Cropping { .. } => StateKind::Cropping,
            PipelineState::ReadyToProcess { .. } => StateKind::ReadyToProcess,
            PipelineState::Processing { .. } => StateKind::Processing,
            PipelineState::Results(_) => StateKind::Results,
            PipelineState::NoMappingPossible { .. } => StateKind::NoMappingPossible,
            PipelineState::Error { .. } => StateKind::Error,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.kind().is_terminal()
    }

    /// Status line for the user: the stage label while processing, the
    /// outcome message in terminal states, nothing otherwise.
    pub fn status_message(&self) -> Option<String> {
        match self {
            PipelineState::Processing { stage, .. } => Some(stage.label().to_string()),
            PipelineState::Results(_) => Some("Decoding successful!".to_string()),
            PipelineState::NoMappingPossible { reason, .. } => Some(reason.message().to_string()),
            PipelineState::Error { failure, .. } => Some(failure.to_string()),
            _ => None,
        }
    }

    /// Everything gathered so far, whatever the variant.
    pub fn artifacts(&self) -> Artifacts {
        match self {
            PipelineState::Idle => Artifacts::default(),
            PipelineState::Cropping { source, .. } => Artifacts {
                source: Some(source.clone()),
                ..Artifacts::default()
            },
            PipelineState::ReadyToProcess { source, crop } => Artifacts {
                source: Some(source.clone()),
                crop: Some(crop.clone()),
                ..Artifacts::default()
            },
            PipelineState::Processing { artifacts, .. }
            | PipelineState::NoMappingPossible { artifacts, .. }
            | PipelineState::Error { artifacts, .. } => artifacts.clone(),
            PipelineState::Results(r) => Artifacts {
                source: Some(r.source.clone()),
                crop: Some(r.crop.clone()),
                extracted_text: Some(r.extracted_text.clone()),
                numerical_code: Some(r.numerical_code.to_string()),
            },
        }
    }

    /// Serialisable snapshot for display or `--json` output.
    pub fn report(&self) -> PipelineReport {
        let artifacts = self.artifacts();
        let price = match self {
            PipelineState::Results(r) => Some(r.price),
            _ => None,
        };
        PipelineReport {
            status: self.kind(),
            message: self.status_message(),
            image: artifacts.source.as_ref().map(|s| s.name().to_string()),
            crop: artifacts.crop.as_ref().map(|c| CropReport {
                size: c.dimensions(),
                mime_type: c.encoded().mime_type().to_string(),
            }),
            extracted_text: artifacts.extracted_text,
            numerical_code: artifacts.numerical_code,
            original_price: price.map(|p| p.original_price),
            final_price: price.map(|p| p.final_price),
        }
    }
}

/// Flat, serialisable view of a [`PipelineState`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineReport {
    pub status: StateKind,
    pub message: Option<String>,
    pub image: Option<String>,
    pub crop: Option<CropReport>,
    pub extracted_text: Option<String>,
    pub numerical_code: Option<String>,
    pub original_price: Option<f64>,
    pub final_price: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CropReport {
    pub size: Dimensions,
    pub mime_type: String,
}
