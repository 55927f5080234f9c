//! Async driver for a [`Controller`].
//!
//! One task owns the controller. It waits on two sources at once: commands
//! from [`SessionHandle`]s and the service calls currently in flight. Whichever
//! is ready first is fed to the controller as an event; any effect that comes
//! back is started and joins the in-flight set. State is only ever touched on
//! this task, so there is nothing to lock.
//!
//! ```text
//! SessionHandle ──cmd──▶ ┌─────────── Session::run ───────────┐
//!                        │ select! { commands, in_flight }     │
//!                        │   controller.handle(event)          │──▶ watch<PipelineState>
//!                        │   effect → services.execute(effect) │
//!                        └─────────────────────────────────────┘
//! ```
//!
//! Results of a run the user abandoned still arrive here; the controller
//! recognises their stale [`crate::controller::RunId`] and drops them.

use crate::controller::{Controller, Effect, Event};
use crate::error::DecoderError;
use crate::geometry::{CropRectangle, DisplayGeometry};
use crate::pipeline::input::ImageSource;
use crate::services::Services;
use crate::state::PipelineState;
use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::debug;

type Reply = oneshot::Sender<Result<(), DecoderError>>;

struct Command {
    event: Event,
    reply: Option<Reply>,
}

/// The event loop. Create with [`Session::new`], then `run` it on a task.
pub struct Session {
    controller: Controller,
    services: Services,
    commands: mpsc::UnboundedReceiver<Command>,
    state: watch::Sender<PipelineState>,
}

impl Session {
    pub fn new(controller: Controller, services: Services) -> (Session, SessionHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(controller.state().clone());
        let session = Session {
            controller,
            services,
            commands: rx,
            state: state_tx,
        };
        let handle = SessionHandle {
            commands: tx,
            state: state_rx,
        };
        (session, handle)
    }

    /// Start the loop on the current runtime.
    pub fn spawn(
        controller: Controller,
        services: Services,
    ) -> (JoinHandle<PipelineState>, SessionHandle) {
        let (session, handle) = Self::new(controller, services);
        (tokio::spawn(session.run()), handle)
    }

    /// Process commands and service results until every handle is dropped.
    ///
    /// Calls still in flight at that point are dropped (cancelling them),
    /// previews are released, and the final state is returned.
    pub async fn run(mut self) -> PipelineState {
        let mut in_flight: FuturesUnordered<BoxFuture<'static, Event>> = FuturesUnordered::new();

        loop {
            tokio::select! {
                cmd = self.commands.recv() => match cmd {
                    Some(Command { event, reply }) => {
                        let result = self.apply(event, &mut in_flight);
                        if let Some(reply) = reply {
                            let _ = reply.send(result);
                        }
                    }
                    None => break,
                },
                Some(event) = in_flight.next(), if !in_flight.is_empty() => {
                    // Service results are never refused; a stale one is a no-op.
                    let _ = self.apply(event, &mut in_flight);
                }
            }
        }

        if !in_flight.is_empty() {
            debug!("Session closing with {} call(s) in flight", in_flight.len());
        }
        drop(in_flight);
        self.controller.into_state()
    }

    fn apply(
        &mut self,
        event: Event,
        in_flight: &mut FuturesUnordered<BoxFuture<'static, Event>>,
    ) -> Result<(), DecoderError> {
        let effect = self.controller.handle(event)?;
        if let Some(effect) = effect {
            in_flight.push(self.start(effect));
        }
        self.state.send_replace(self.controller.state().clone());
        Ok(())
    }

    fn start(&self, effect: Effect) -> BoxFuture<'static, Event> {
        debug!("{}: starting {}", effect.run(), effect_name(&effect));
        let services = self.services.clone();
        Box::pin(async move { services.execute(effect).await })
    }
}

fn effect_name(effect: &Effect) -> &'static str {
    match effect {
        Effect::Recognize { .. } => "recognition",
        Effect::Map { .. } => "mapping",
    }
}

/// Cloneable front end to a running [`Session`].
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<PipelineState>,
}

impl SessionHandle {
    /// Submit an event and wait for the controller to accept or refuse it.
    ///
    /// Returns once the event is applied, not once any call it starts has
    /// finished. Use [`SessionHandle::settled`] for that.
    pub async fn send(&self, event: Event) -> Result<(), DecoderError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(Command {
                event,
                reply: Some(tx),
            })
            .map_err(|_| DecoderError::SessionClosed)?;
        rx.await.map_err(|_| DecoderError::SessionClosed)?
    }

    /// Submit an event without waiting. Refusals are only logged.
    pub fn post(&self, event: Event) -> Result<(), DecoderError> {
        self.commands
            .send(Command { event, reply: None })
            .map_err(|_| DecoderError::SessionClosed)
    }

    pub async fn select_image(&self, source: ImageSource) -> Result<(), DecoderError> {
        self.send(Event::ImageSelected(source)).await
    }

    pub async fn change_crop(&self, crop: CropRectangle) -> Result<(), DecoderError> {
        self.send(Event::CropChanged(crop)).await
    }

    pub async fn confirm_crop(&self, display: DisplayGeometry) -> Result<(), DecoderError> {
        self.send(Event::CropConfirmed(display)).await
    }

    pub async fn cancel_crop(&self) -> Result<(), DecoderError> {
        self.send(Event::CropCancelled).await
    }

    pub async fn process(&self) -> Result<(), DecoderError> {
        self.send(Event::ProcessRequested).await
    }

    pub async fn reset(&self) -> Result<(), DecoderError> {
        self.send(Event::ResetRequested).await
    }

    /// Snapshot of the current state.
    pub fn state(&self) -> PipelineState {
        self.state.borrow().clone()
    }

    /// A receiver that is notified after every applied event.
    pub fn subscribe(&self) -> watch::Receiver<PipelineState> {
        self.state.clone()
    }

    /// Wait until the state satisfies `condition` (checked immediately too).
    pub async fn wait_until<F>(&self, condition: F) -> Result<PipelineState, DecoderError>
    where
        F: FnMut(&PipelineState) -> bool,
    {
        let mut rx = self.state.clone();
        let state = rx
            .wait_for(condition)
            .await
            .map_err(|_| DecoderError::SessionClosed)?;
        Ok(state.clone())
    }

    /// Wait until no run is in flight.
    pub async fn settled(&self) -> Result<PipelineState, DecoderError> {
        self.wait_until(|s| !matches!(s, PipelineState::Processing { .. }))
            .await
    }
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("state", &self.state.borrow().kind())
            .field("closed", &self.commands.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::encode::EncodedImage;
    use crate::services::{CharlestonCipher, ServiceError, TextRecognizer};
    use crate::state::StateKind;
    use async_trait::async_trait;
    use image::{DynamicImage, Rgba, RgbaImage};
    use std::sync::Arc;

    struct FixedText(&'static str);

    #[async_trait]
    impl TextRecognizer for FixedText {
        async fn recognize(&self, _image: &EncodedImage) -> Result<Option<String>, ServiceError> {
            Ok(Some(self.0.to_string()))
        }
    }

    fn services(text: &'static str) -> Services {
        Services::new(Arc::new(FixedText(text)), Arc::new(CharlestonCipher))
    }

    fn source() -> ImageSource {
        let img = RgbaImage::from_pixel(200, 100, Rgba([0, 0, 0, 255]));
        ImageSource::from_pixels(DynamicImage::ImageRgba8(img), "tag.png").unwrap()
    }

    async fn crop(handle: &SessionHandle) {
        handle.select_image(source()).await.unwrap();
        handle
            .change_crop(CropRectangle::percent(0.0, 0.0, 50.0, 50.0))
            .await
            .unwrap();
        handle
            .confirm_crop(DisplayGeometry::new(200.0, 100.0))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn session_runs_to_results() {
        let (task, handle) = Session::spawn(Controller::default(), services("CHAR"));
        crop(&handle).await;
        handle.process().await.unwrap();
        let state = handle.settled().await.unwrap();
        match state {
            PipelineState::Results(r) => {
                assert_eq!(r.numerical_code.as_str(), "1234");
                assert!((r.original_price() - 12.34).abs() < 1e-9);
            }
            other => panic!("expected Results, got {other:?}"),
        }
        drop(handle);
        assert_eq!(task.await.unwrap().kind(), StateKind::Results);
    }

    #[tokio::test]
    async fn refused_event_is_reported_to_sender() {
        let (_task, handle) = Session::spawn(Controller::default(), services("CHAR"));
        let err = handle.process().await.unwrap_err();
        assert!(matches!(err, DecoderError::InvalidTransition { .. }));
        assert_eq!(handle.state().kind(), StateKind::Idle);
    }

    #[tokio::test]
    async fn subscribers_see_updates() {
        let (_task, handle) = Session::spawn(Controller::default(), services("HELLO"));
        let mut rx = handle.subscribe();
        handle.select_image(source()).await.unwrap();
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().kind(), StateKind::Cropping);

        handle.reset().await.unwrap();
        let state = handle
            .wait_until(|s| matches!(s, PipelineState::Idle))
            .await
            .unwrap();
        assert_eq!(state.kind(), StateKind::Idle);
    }

    #[tokio::test]
    async fn unsuitable_text_stops_at_no_mapping() {
        let (_task, handle) = Session::spawn(Controller::default(), services("PRICE"));
        crop(&handle).await;
        handle.process().await.unwrap();
        let state = handle.settled().await.unwrap();
        assert_eq!(state.kind(), StateKind::NoMappingPossible);
        assert_eq!(state.report().extracted_text.as_deref(), Some("PRICE"));
    }

    #[tokio::test]
    async fn closed_session_refuses_events() {
        let (session, handle) = Session::new(Controller::default(), services("CHAR"));
        drop(session);
        let err = handle.reset().await.unwrap_err();
        assert!(matches!(err, DecoderError::SessionClosed));
        assert!(handle.post(Event::ResetRequested).is_err());
    }
}
