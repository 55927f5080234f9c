//! The pipeline controller: a synchronous state machine.
//!
//! The controller never awaits anything. Each call to [`Controller::handle`]
//! takes one [`Event`], moves the [`PipelineState`] forward, and may return
//! one [`Effect`]: an external call the driver must perform and report back
//! as another event. This keeps every transition testable without a runtime
//! and leaves scheduling to [`crate::session`].
//!
//! ```text
//! Idle ──select──▶ Cropping ──confirm──▶ ReadyToProcess ──process──▶ Processing
//!  ▲                  │                                       │ recognize → map → price
//!  │                cancel                                    ▼
//!  └──────────────── reset ◀──── Results | NoMappingPossible | Error
//! ```
//!
//! ## Stale results
//!
//! Every effect carries the [`RunId`] of the run that issued it. A result
//! whose run is no longer active (the user reset, or started over) is
//! dropped on arrival and never touches the state.

use crate::config::DecoderConfig;
use crate::error::{DecoderError, PipelineFailure};
use crate::geometry::{rasterize, CropRectangle, DisplayGeometry};
use crate::pipeline::encode::EncodedImage;
use crate::pipeline::input::ImageSource;
use crate::preview::{PreviewHandle, PreviewHost};
use crate::price::{price_for, DecodedCode};
use crate::progress::{NoopProgressCallback, ProgressCallback};
use crate::services::{MappingOutcome, ServiceError};
use crate::state::{Artifacts, DecodeResult, NoMappingReason, PipelineState, Stage};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Identifies one processing run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RunId(u64);

impl RunId {
    pub fn new(n: u64) -> Self {
        Self(n)
    }

    pub fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "run #{}", self.0)
    }
}

/// Input to the controller: user actions and service results.
#[derive(Debug, Clone)]
pub enum Event {
    ImageSelected(ImageSource),
    /// The user moved or resized the crop rectangle.
    CropChanged(CropRectangle),
    /// The user accepted the current rectangle, drawn over an image shown
    /// with this geometry.
    CropConfirmed(DisplayGeometry),
    CropCancelled,
    ProcessRequested,
    RecognitionFinished {
        run: RunId,
        result: Result<Option<String>, ServiceError>,
    },
    MappingFinished {
        run: RunId,
        result: Result<MappingOutcome, ServiceError>,
    },
    ResetRequested,
}

impl Event {
    /// Short name for logs and rejection messages.
    pub fn name(&self) -> &'static str {
        match self {
            Event::ImageSelected(_) => "select image",
            Event::CropChanged(_) => "change crop",
            Event::CropConfirmed(_) => "confirm crop",
            Event::CropCancelled => "cancel crop",
            Event::ProcessRequested => "process",
            Event::RecognitionFinished { .. } => "recognition result",
            Event::MappingFinished { .. } => "mapping result",
            Event::ResetRequested => "reset",
        }
    }
}

/// An external call requested by the controller.
#[derive(Debug, Clone)]
pub enum Effect {
    /// Read the text in the rasterised crop.
    Recognize { run: RunId, image: Arc<EncodedImage> },
    /// Map non-empty recognised text to a digit code.
    Map { run: RunId, text: String },
}

impl Effect {
    pub fn run(&self) -> RunId {
        match self {
            Effect::Recognize { run, .. } | Effect::Map { run, .. } => *run,
        }
    }
}

/// Owns the [`PipelineState`] and every resource tied to it.
pub struct Controller {
    state: PipelineState,
    runs_started: u64,
    active_run: Option<RunId>,
    source_preview: Option<PreviewHandle>,
    crop_preview: Option<PreviewHandle>,
    previews: Option<Arc<dyn PreviewHost>>,
    progress: ProgressCallback,
    min_crop_dimension: f64,
    max_surface_pixels: u64,
}

impl Controller {
    pub fn new(config: &DecoderConfig) -> Self {
        Self {
            state: PipelineState::Idle,
            runs_started: 0,
            active_run: None,
            source_preview: None,
            crop_preview: None,
            previews: None,
            progress: config
                .progress_callback
                .clone()
                .unwrap_or_else(|| Arc::new(NoopProgressCallback)),
            min_crop_dimension: config.min_crop_dimension,
            max_surface_pixels: config.max_surface_pixels,
        }
    }

    /// Publish the source image and the crop through `host` while they are
    /// held.
    pub fn with_preview_host(mut self, host: Arc<dyn PreviewHost>) -> Self {
        self.previews = Some(host);
        self
    }

    pub fn state(&self) -> &PipelineState {
        &self.state
    }

    /// The run whose results are currently accepted.
    pub fn active_run(&self) -> Option<RunId> {
        self.active_run
    }

    /// Number of preview handles currently held.
    pub fn previews_held(&self) -> usize {
        self.source_preview.is_some() as usize + self.crop_preview.is_some() as usize
    }

    /// Release every resource and return the final state.
    pub fn into_state(mut self) -> PipelineState {
        self.release_previews();
        std::mem::take(&mut self.state)
    }

    /// Apply one event.
    ///
    /// `Err` means the event was refused and the state is unchanged. Run
    /// failures are not errors here: they move the state to
    /// [`PipelineState::Error`] and return `Ok`.
    pub fn handle(&mut self, event: Event) -> Result<Option<Effect>, DecoderError> {
        let name = event.name();
        let result = self.dispatch(event);
        if let Err(ref e) = result {
            debug!("Rejected '{}' in {}: {}", name, self.state.kind(), e);
            self.progress.on_event_rejected(name, &e.to_string());
        }
        result
    }

    fn dispatch(&mut self, event: Event) -> Result<Option<Effect>, DecoderError> {
        match event {
            Event::ImageSelected(source) => self.select_image(source),
            Event::CropChanged(crop) => self.change_crop(crop),
            Event::CropConfirmed(display) => self.confirm_crop(display),
            Event::CropCancelled => self.cancel_crop(),
            Event::ProcessRequested => self.start_run(),
            Event::RecognitionFinished { run, result } => self.recognition_finished(run, result),
            Event::MappingFinished { run, result } => self.mapping_finished(run, result),
            Event::ResetRequested => {
                self.reset();
                Ok(None)
            }
        }
    }

    // ── User events ───────────────────────────────────────────────────────

    fn select_image(&mut self, source: ImageSource) -> Result<Option<Effect>, DecoderError> {
        match self.state {
            PipelineState::Idle
            | PipelineState::Cropping { .. }
            | PipelineState::ReadyToProcess { .. } => {}
            _ => return Err(self.reject("select image")),
        }

        // Old previews go before the new one is created.
        self.release_previews();
        self.source_preview = self.acquire_preview(source.original());

        let dims = source.natural_dimensions();
        info!("Selected '{}' ({}x{})", source.name(), dims.width, dims.height);
        self.set_state(PipelineState::Cropping { source, crop: None });
        Ok(None)
    }

    fn change_crop(&mut self, rect: CropRectangle) -> Result<Option<Effect>, DecoderError> {
        if let PipelineState::Cropping { crop, .. } = &mut self.state {
            *crop = Some(rect);
            return Ok(None);
        }
        Err(self.reject("change crop"))
    }

    fn confirm_crop(&mut self, display: DisplayGeometry) -> Result<Option<Effect>, DecoderError> {
        let (source, crop) = match &self.state {
            PipelineState::Cropping { source, crop } => (source.clone(), *crop),
            _ => return Err(self.reject("confirm crop")),
        };
        let crop = crop.ok_or(DecoderError::NoCropSelected)?;

        if !crop.meets_minimum(&display, self.min_crop_dimension) {
            let px = crop.to_display_pixels(&display);
            return Err(DecoderError::CropTooSmall {
                width: px.width,
                height: px.height,
                min: self.min_crop_dimension,
            });
        }

        match rasterize(&source, &crop, &display, self.max_surface_pixels) {
            Ok(raster) => {
                self.crop_preview = None;
                self.crop_preview = self.acquire_preview(raster.encoded());
                self.set_state(PipelineState::ReadyToProcess {
                    source,
                    crop: raster,
                });
            }
            Err(e) => {
                warn!("Crop of '{}' could not be rasterised: {}", source.name(), e);
                self.set_state(PipelineState::Error {
                    failure: PipelineFailure::Geometry {
                        detail: e.to_string(),
                    },
                    artifacts: Artifacts {
                        source: Some(source),
                        ..Artifacts::default()
                    },
                });
            }
        }
        Ok(None)
    }

    fn cancel_crop(&mut self) -> Result<Option<Effect>, DecoderError> {
        if !matches!(self.state, PipelineState::Cropping { .. }) {
            return Err(self.reject("cancel crop"));
        }
        self.release_previews();
        self.set_state(PipelineState::Idle);
        Ok(None)
    }

    fn start_run(&mut self) -> Result<Option<Effect>, DecoderError> {
        let (source, crop) = match &self.state {
            PipelineState::ReadyToProcess { source, crop } => (source.clone(), crop.clone()),
            PipelineState::Cropping { .. } => return Err(DecoderError::NoCropSelected),
            _ => return Err(self.reject("process")),
        };

        self.runs_started += 1;
        let run = RunId(self.runs_started);
        self.active_run = Some(run);

        let image = Arc::clone(crop.encoded());
        let dims = crop.dimensions();
        info!(
            "{}: processing {}x{} crop of '{}'",
            run,
            dims.width,
            dims.height,
            source.name()
        );

        self.set_state(PipelineState::Processing {
            stage: Stage::Recognizing,
            artifacts: Artifacts {
                source: Some(source),
                crop: Some(crop),
                ..Artifacts::default()
            },
        });
        self.progress.on_stage(run, Stage::Recognizing);
        Ok(Some(Effect::Recognize { run, image }))
    }

    /// Return to `Idle` from anywhere. A no-op in `Idle`.
    fn reset(&mut self) {
        if matches!(self.state, PipelineState::Idle) {
            debug!("Reset while idle; nothing to do");
            return;
        }
        if let Some(run) = self.active_run.take() {
            info!("{}: abandoned by reset", run);
        }
        self.release_previews();
        self.set_state(PipelineState::Idle);
    }

    // ── Service results ───────────────────────────────────────────────────

    fn recognition_finished(
        &mut self,
        run: RunId,
        result: Result<Option<String>, ServiceError>,
    ) -> Result<Option<Effect>, DecoderError> {
        if !self.is_current(run, Stage::Recognizing) {
            self.discard(run);
            return Ok(None);
        }
        let mut artifacts = self.state.artifacts();

        // Blank text stops the run; anything else is kept and forwarded as read.
        let text = match result {
            Ok(text) => text.filter(|t| !t.trim().is_empty()),
            Err(e) => {
                warn!("{}: recognition failed: {}", run, e);
                self.finish(PipelineState::Error {
                    failure: PipelineFailure::RecognitionUnavailable {
                        detail: e.to_string(),
                    },
                    artifacts,
                });
                return Ok(None);
            }
        };

        let Some(text) = text else {
            self.finish(PipelineState::NoMappingPossible {
                reason: NoMappingReason::NoTextExtracted,
                artifacts,
            });
            return Ok(None);
        };

        debug!("{}: extracted {:?}", run, text);
        artifacts.extracted_text = Some(text.clone());
        self.set_state(PipelineState::Processing {
            stage: Stage::Mapping,
            artifacts,
        });
        self.progress.on_stage(run, Stage::Mapping);
        Ok(Some(Effect::Map { run, text }))
    }

    fn mapping_finished(
        &mut self,
        run: RunId,
        result: Result<MappingOutcome, ServiceError>,
    ) -> Result<Option<Effect>, DecoderError> {
        if !self.is_current(run, Stage::Mapping) {
            self.discard(run);
            return Ok(None);
        }
        let mut artifacts = self.state.artifacts();

        let outcome = match result {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!("{}: mapping failed: {}", run, e);
                self.finish(PipelineState::Error {
                    failure: PipelineFailure::Unexpected {
                        message: e.to_string(),
                    },
                    artifacts,
                });
                return Ok(None);
            }
        };

        let code = outcome.numerical_code;
        if !outcome.should_map {
            if !code.is_empty() {
                artifacts.numerical_code = Some(code);
            }
            self.finish(PipelineState::NoMappingPossible {
                reason: NoMappingReason::NotSuitable,
                artifacts,
            });
            return Ok(None);
        }
        if code.is_empty() {
            self.finish(PipelineState::NoMappingPossible {
                reason: NoMappingReason::EmptyCode,
                artifacts,
            });
            return Ok(None);
        }

        artifacts.numerical_code = Some(code.clone());
        self.set_state(PipelineState::Processing {
            stage: Stage::Pricing,
            artifacts: artifacts.clone(),
        });
        self.progress.on_stage(run, Stage::Pricing);

        let priced = DecodedCode::parse(&code).and_then(|c| price_for(&c).map(|p| (c, p)));
        let Some((numerical_code, price)) = priced else {
            warn!("{}: code {:?} is not a price", run, code);
            self.finish(PipelineState::Error {
                failure: PipelineFailure::UndecodableCode { code },
                artifacts,
            });
            return Ok(None);
        };

        match artifacts {
            Artifacts {
                source: Some(source),
                crop: Some(crop),
                extracted_text: Some(extracted_text),
                ..
            } => {
                info!(
                    "{}: code {} → {:.2} (with markup {:.2})",
                    run, numerical_code, price.original_price, price.final_price
                );
                self.finish(PipelineState::Results(DecodeResult {
                    source,
                    crop,
                    extracted_text,
                    numerical_code,
                    price,
                }));
            }
            artifacts => {
                self.finish(PipelineState::Error {
                    failure: PipelineFailure::Unexpected {
                        message: "The processed image was lost before pricing.".into(),
                    },
                    artifacts,
                });
            }
        }
        Ok(None)
    }

    // ── Helpers ───────────────────────────────────────────────────────────

    fn is_current(&self, run: RunId, stage: Stage) -> bool {
        self.active_run == Some(run)
            && matches!(&self.state, PipelineState::Processing { stage: s, .. } if *s == stage)
    }

    fn discard(&self, run: RunId) {
        debug!(
            "{}: discarding result (active: {:?}, state: {})",
            run,
            self.active_run.map(|r| r.get()),
            self.state.kind()
        );
        self.progress.on_stale_result(run);
    }

    /// Move to a terminal state and close the run.
    fn finish(&mut self, next: PipelineState) {
        if let Some(run) = self.active_run.take() {
            info!("{}: finished, {}", run, next.kind());
        }
        self.set_state(next);
    }

    fn set_state(&mut self, next: PipelineState) {
        let from = self.state.kind();
        let to = next.kind();
        self.state = next;
        if from != to {
            debug!("State: {} → {}", from, to);
            self.progress.on_transition(from, to);
        }
    }

    fn reject(&self, event: &'static str) -> DecoderError {
        DecoderError::InvalidTransition {
            state: self.state.kind().as_str(),
            event,
        }
    }

    fn acquire_preview(&self, image: &EncodedImage) -> Option<PreviewHandle> {
        let host = self.previews.as_ref()?;
        match PreviewHandle::acquire(host, image) {
            Ok(handle) => Some(handle),
            Err(e) => {
                warn!("Preview unavailable: {}", e);
                None
            }
        }
    }

    fn release_previews(&mut self) {
        self.crop_preview = None;
        self.source_preview = None;
    }
}

impl Default for Controller {
    fn default() -> Self {
        Self::new(&DecoderConfig::default())
    }
}

impl fmt::Debug for Controller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Controller")
            .field("state", &self.state.kind())
            .field("active_run", &self.active_run)
            .field("previews_held", &self.previews_held())
            .finish()
    }
}
