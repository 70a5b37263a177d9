use crate::traits::GenerationClient;
use serde::{Deserialize, Serialize};
use sonoportrait_core::error::{ApiError, ErrorKind};
use sonoportrait_core::generation::{GenerationRequest, GenerationResult};
use sonoportrait_core::params::{ParamError, StageParams};
use sonoportrait_core::types::{ApiKey, GenerationStage, ImageBytes};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    #[default]
    Idle,
    Stage1InFlight,
    Stage1Complete,
    Stage2InFlight,
    Stage2Complete,
    Failed,
}

impl PipelineState {
    pub fn is_in_flight(self) -> bool {
        matches!(
            self,
            PipelineState::Stage1InFlight | PipelineState::Stage2InFlight
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, PipelineState::Stage2Complete | PipelineState::Failed)
    }
}

pub fn state_label(state: PipelineState) -> &'static str {
    match state {
        PipelineState::Idle => "idle",
        PipelineState::Stage1InFlight => "stage1_in_flight",
        PipelineState::Stage1Complete => "stage1_complete",
        PipelineState::Stage2InFlight => "stage2_in_flight",
        PipelineState::Stage2Complete => "stage2_complete",
        PipelineState::Failed => "failed",
    }
}

/// Why the pipeline ended up in `Failed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageFailure {
    pub stage: GenerationStage,
    pub kind: ErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum PipelineError {
    #[error("a generation is already in progress")]
    PipelineBusy,

    #[error("pipeline is {actual:?}, expected {expected:?}")]
    Precondition {
        expected: PipelineState,
        actual: PipelineState,
    },

    #[error("invalid parameters: {0}")]
    InvalidParameters(#[from] ParamError),

    #[error(transparent)]
    Api(#[from] ApiError),
}

/// Point-in-time copy of everything the pipeline holds.
#[derive(Debug, Clone, Default)]
pub struct PipelineSnapshot {
    pub state: PipelineState,
    pub stage1_request: Option<Arc<GenerationRequest>>,
    pub stage1_result: Option<Arc<GenerationResult>>,
    pub stage2_request: Option<Arc<GenerationRequest>>,
    pub stage2_result: Option<Arc<GenerationResult>>,
    pub failure: Option<StageFailure>,
}

#[derive(Default)]
struct Inner {
    state: PipelineState,
    stage1_request: Option<Arc<GenerationRequest>>,
    stage1_result: Option<Arc<GenerationResult>>,
    stage2_request: Option<Arc<GenerationRequest>>,
    stage2_result: Option<Arc<GenerationResult>>,
    failure: Option<StageFailure>,
}

/// Two-stage generation state machine.
///
/// Only one stage may be in flight. The lock is taken to check-and-transition, released for
/// the remote call, and taken again to record the outcome. States only move forward; a new
/// attempt needs a new pipeline.
pub struct GenerationPipeline {
    client: Arc<dyn GenerationClient>,
    inner: Mutex<Inner>,
}

impl GenerationPipeline {
    pub fn new(client: Arc<dyn GenerationClient>) -> Self {
        Self {
            client,
            inner: Mutex::new(Inner::default()),
        }
    }

    pub fn state(&self) -> PipelineState {
        self.lock().state
    }

    pub fn snapshot(&self) -> PipelineSnapshot {
        let inner = self.lock();
        PipelineSnapshot {
            state: inner.state,
            stage1_request: inner.stage1_request.clone(),
            stage1_result: inner.stage1_result.clone(),
            stage2_request: inner.stage2_request.clone(),
            stage2_result: inner.stage2_result.clone(),
            failure: inner.failure.clone(),
        }
    }

    /// Runs the outline stage on `image`. Only valid from `Idle`.
    pub async fn submit_stage1(
        &self,
        api_key: &ApiKey,
        image: ImageBytes,
        params: StageParams,
    ) -> Result<Arc<GenerationResult>, PipelineError> {
        let request = {
            let mut inner = self.lock();
            Self::check_can_submit(inner.state, PipelineState::Idle)?;
            params.validate()?;

            let request = Arc::new(GenerationRequest::outline(image, params));
            inner.stage1_request = Some(request.clone());
            Self::transition(&mut inner, PipelineState::Stage1InFlight);
            request
        };

        let guard = InFlightGuard::new(&self.inner, GenerationStage::Outline);
        let t0 = Instant::now();
        let outcome = self
            .client
            .generate_outline(api_key, request.source_image(), request.params())
            .await;

        guard.disarm();
        self.finish(GenerationStage::Outline, outcome, t0)
    }

    /// Runs the structure stage, using the stage 1 output as the control image.
    /// Only valid from `Stage1Complete`.
    pub async fn submit_stage2(
        &self,
        api_key: &ApiKey,
        params: StageParams,
    ) -> Result<Arc<GenerationResult>, PipelineError> {
        let request = {
            let mut inner = self.lock();
            Self::check_can_submit(inner.state, PipelineState::Stage1Complete)?;
            params.validate()?;

            let Some(stage1) = inner.stage1_result.clone() else {
                // Stage1Complete always carries a result; treat a gap as not ready.
                return Err(PipelineError::Precondition {
                    expected: PipelineState::Stage1Complete,
                    actual: inner.state,
                });
            };

            let control = stage1.output_image.clone();
            let request = Arc::new(GenerationRequest::structure_controlled(
                control.clone(),
                control,
                params,
            ));
            inner.stage2_request = Some(request.clone());
            Self::transition(&mut inner, PipelineState::Stage2InFlight);
            request
        };

        let guard = InFlightGuard::new(&self.inner, GenerationStage::StructureControl);
        let t0 = Instant::now();
        let outcome = match request.control_image() {
            Some(control) => {
                self.client
                    .generate_structure_controlled(
                        api_key,
                        request.source_image(),
                        control,
                        request.params(),
                    )
                    .await
            }
            None => Err(ApiError::ValidationError("missing control image".into())),
        };

        guard.disarm();
        self.finish(GenerationStage::StructureControl, outcome, t0)
    }

    fn finish(
        &self,
        stage: GenerationStage,
        outcome: Result<GenerationResult, ApiError>,
        started: Instant,
    ) -> Result<Arc<GenerationResult>, PipelineError> {
        let elapsed_ms = started.elapsed().as_millis();
        let mut inner = self.lock();
        match outcome {
            Ok(result) => {
                let result = Arc::new(result);
                let next = match stage {
                    GenerationStage::Outline => {
                        inner.stage1_result = Some(result.clone());
                        PipelineState::Stage1Complete
                    }
                    GenerationStage::StructureControl => {
                        inner.stage2_result = Some(result.clone());
                        PipelineState::Stage2Complete
                    }
                };
                log::info!(
                    "stage {} ({}) produced {} bytes in {}ms",
                    stage.number(),
                    stage.label(),
                    result.output_image.len(),
                    elapsed_ms
                );
                Self::transition(&mut inner, next);
                Ok(result)
            }
            Err(e) => {
                log::error!(
                    "stage {} ({}) failed after {}ms: {}",
                    stage.number(),
                    stage.label(),
                    elapsed_ms,
                    e
                );
                inner.failure = Some(StageFailure {
                    stage,
                    kind: e.kind(),
                    message: e.to_string(),
                });
                Self::transition(&mut inner, PipelineState::Failed);
                Err(PipelineError::Api(e))
            }
        }
    }

    fn check_can_submit(
        actual: PipelineState,
        expected: PipelineState,
    ) -> Result<(), PipelineError> {
        if actual.is_in_flight() {
            return Err(PipelineError::PipelineBusy);
        }
        if actual != expected {
            return Err(PipelineError::Precondition { expected, actual });
        }
        Ok(())
    }

    fn transition(inner: &mut Inner, next: PipelineState) {
        log::info!(
            "pipeline: {} -> {}",
            state_label(inner.state),
            state_label(next)
        );
        inner.state = next;
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        lock_inner(&self.inner)
    }
}

// Every critical section leaves `Inner` consistent, so a poisoned lock is still usable.
fn lock_inner(inner: &Mutex<Inner>) -> MutexGuard<'_, Inner> {
    inner.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Held across the remote call. If the submit future is dropped before the call returns,
/// the stage is marked `Failed` so the pipeline never stays in flight.
struct InFlightGuard<'a> {
    inner: &'a Mutex<Inner>,
    stage: GenerationStage,
    armed: bool,
}

impl<'a> InFlightGuard<'a> {
    fn new(inner: &'a Mutex<Inner>, stage: GenerationStage) -> Self {
        Self {
            inner,
            stage,
            armed: true,
        }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut inner = lock_inner(self.inner);
        if !inner.state.is_in_flight() {
            return;
        }
        log::warn!(
            "stage {} ({}) cancelled before it finished",
            self.stage.number(),
            self.stage.label()
        );
        inner.failure = Some(StageFailure {
            stage: self.stage,
            kind: ErrorKind::Cancelled,
            message: "cancelled before the image service answered".into(),
        });
        GenerationPipeline::transition(&mut inner, PipelineState::Failed);
    }
}
