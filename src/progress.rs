//! Progress-callback trait for pipeline events.
//!
//! Inject an [`Arc<dyn PipelineProgressCallback>`] via
//! [`crate::config::DecoderConfigBuilder::progress_callback`] to observe the
//! controller as it moves between states and stages.
//!
//! The controller calls these synchronously from inside `handle`, so
//! implementations should return quickly. Forward to a channel or a progress
//! bar; do not block.
//!
//! # Example
//!
//! ```rust
//! use charleston_decoder::{DecoderConfig, PipelineProgressCallback, Stage, RunId};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct StageCounter {
//!     stages: AtomicUsize,
//! }
//!
//! impl PipelineProgressCallback for StageCounter {
//!     fn on_stage(&self, _run: RunId, stage: Stage) {
//!         self.stages.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("{}", stage.label());
//!     }
//! }
//!
//! let counter = Arc::new(StageCounter { stages: AtomicUsize::new(0) });
//!
//! let config = DecoderConfig::builder()
//!     .progress_callback(counter as Arc<dyn PipelineProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use crate::controller::RunId;
use crate::state::{Stage, StateKind};
use std::sync::Arc;

/// Called by the controller as the pipeline advances.
///
/// All methods have default no-op implementations so callers only override
/// what they care about.
pub trait PipelineProgressCallback: Send + Sync {
    /// The pipeline moved from one state variant to another.
    ///
    /// Not called for self-transitions such as a crop update while already
    /// `Cropping`.
    fn on_transition(&self, from: StateKind, to: StateKind) {
        let _ = (from, to);
    }

    /// A processing run entered a new stage.
    fn on_stage(&self, run: RunId, stage: Stage) {
        let _ = (run, stage);
    }

    /// A service result arrived for a run that is no longer active and was
    /// discarded.
    fn on_stale_result(&self, run: RunId) {
        let _ = run;
    }

    /// An event was refused in the current state.
    ///
    /// # Arguments
    /// * `event`: event name, e.g. `"process"`
    /// * `reason`: human-readable refusal message
    fn on_event_rejected(&self, event: &str, reason: &str) {
        let _ = (event, reason);
    }
}

/// A no-op implementation for callers that don't need progress events.
///
/// This is the default when no callback is configured.
pub struct NoopProgressCallback;

impl PipelineProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::DecoderConfig`].
pub type ProgressCallback = Arc<dyn PipelineProgressCallback>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct TrackingCallback {
        transitions: Mutex<Vec<(StateKind, StateKind)>>,
        stages: Mutex<Vec<Stage>>,
        stale: AtomicUsize,
        rejected: AtomicUsize,
    }

    impl PipelineProgressCallback for TrackingCallback {
        fn on_transition(&self, from: StateKind, to: StateKind) {
            self.transitions.lock().unwrap().push((from, to));
        }

        fn on_stage(&self, _run: RunId, stage: Stage) {
            self.stages.lock().unwrap().push(stage);
        }

        fn on_stale_result(&self, _run: RunId) {
            self.stale.fetch_add(1, Ordering::SeqCst);
        }

        fn on_event_rejected(&self, _event: &str, _reason: &str) {
            self.rejected.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn noop_callback_does_not_panic() {
        let cb = NoopProgressCallback;
        cb.on_transition(StateKind::Idle, StateKind::Cropping);
        cb.on_stage(RunId::new(1), Stage::Recognizing);
        cb.on_stale_result(RunId::new(1));
        cb.on_event_rejected("process", "no crop");
    }

    #[test]
    fn tracking_callback_receives_events() {
        let tracker = TrackingCallback::default();
        tracker.on_transition(StateKind::ReadyToProcess, StateKind::Processing);
        tracker.on_stage(RunId::new(3), Stage::Recognizing);
        tracker.on_stage(RunId::new(3), Stage::Mapping);
        tracker.on_stale_result(RunId::new(2));
        tracker.on_event_rejected("confirm crop", "too small");

        assert_eq!(
            *tracker.transitions.lock().unwrap(),
            vec![(StateKind::ReadyToProcess, StateKind::Processing)]
        );
        assert_eq!(
            *tracker.stages.lock().unwrap(),
            vec![Stage::Recognizing, Stage::Mapping]
        );
        assert_eq!(tracker.stale.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.rejected.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn arc_dyn_callback_works() {
        let cb: ProgressCallback = Arc::new(NoopProgressCallback);
        cb.on_stage(RunId::new(7), Stage::Pricing);
    }
}
