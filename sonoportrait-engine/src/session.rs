use crate::pipeline::{
    GenerationPipeline, PipelineError, PipelineSnapshot, PipelineState, StageFailure,
};
use crate::traits::GenerationClient;
use serde::{Deserialize, Serialize};
use sonoportrait_core::generation::{GenerationRequest, GenerationResult};
use sonoportrait_core::params::StageParams;
use sonoportrait_core::types::{ApiKey, ImageBytes, SessionId};
use std::sync::Arc;

/// What the UI should show. Derived from the pipeline state plus whether an image was uploaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UiPhase {
    AwaitingUpload,
    Stage1Running,
    Stage1Done,
    Stage2Running,
    Complete,
    Failed,
}

pub fn ui_phase(state: PipelineState) -> UiPhase {
    match state {
        PipelineState::Idle => UiPhase::AwaitingUpload,
        PipelineState::Stage1InFlight => UiPhase::Stage1Running,
        PipelineState::Stage1Complete => UiPhase::Stage1Done,
        PipelineState::Stage2InFlight => UiPhase::Stage2Running,
        PipelineState::Stage2Complete => UiPhase::Complete,
        PipelineState::Failed => UiPhase::Failed,
    }
}

/// Snapshot of one session for display.
#[derive(Debug, Clone)]
pub struct SessionState {
    pub session_id: SessionId,
    pub api_key: ApiKey,
    pub uploaded_image: Option<ImageBytes>,
    pub pipeline_state: PipelineState,
    pub stage1_request: Option<Arc<GenerationRequest>>,
    pub stage1_result: Option<Arc<GenerationResult>>,
    pub stage2_request: Option<Arc<GenerationRequest>>,
    pub stage2_result: Option<Arc<GenerationResult>>,
    pub ui_phase: UiPhase,
    pub failure: Option<StageFailure>,
}

impl SessionState {
    fn from_parts(session_id: SessionId, api_key: ApiKey, snap: PipelineSnapshot) -> Self {
        // The upload is whatever the accepted stage 1 request carries.
        let uploaded_image = snap
            .stage1_request
            .as_ref()
            .map(|r| r.source_image().clone());
        Self {
            session_id,
            api_key,
            uploaded_image,
            pipeline_state: snap.state,
            stage1_request: snap.stage1_request,
            stage1_result: snap.stage1_result,
            stage2_request: snap.stage2_request,
            stage2_result: snap.stage2_result,
            ui_phase: ui_phase(snap.state),
            failure: snap.failure,
        }
    }
}

/// One user's run from upload to final image. Nothing here outlives the value.
pub struct GenerationSession {
    id: SessionId,
    api_key: ApiKey,
    client: Arc<dyn GenerationClient>,
    pipeline: GenerationPipeline,
}

impl GenerationSession {
    pub fn new(client: Arc<dyn GenerationClient>, api_key: ApiKey) -> Self {
        let id = SessionId::new();
        log::info!("session {} started", id.short());
        Self {
            id,
            api_key,
            pipeline: GenerationPipeline::new(client.clone()),
            client,
        }
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn api_key(&self) -> &ApiKey {
        &self.api_key
    }

    pub fn pipeline_state(&self) -> PipelineState {
        self.pipeline.state()
    }

    /// Records `image` as the upload and runs stage 1 on it.
    pub async fn submit_stage1(
        &self,
        image: ImageBytes,
        params: StageParams,
    ) -> Result<Arc<GenerationResult>, PipelineError> {
        self.pipeline
            .submit_stage1(&self.api_key, image, params)
            .await
    }

    pub async fn submit_stage2(
        &self,
        params: StageParams,
    ) -> Result<Arc<GenerationResult>, PipelineError> {
        self.pipeline.submit_stage2(&self.api_key, params).await
    }

    pub fn get_state(&self) -> SessionState {
        SessionState::from_parts(
            self.id.clone(),
            self.api_key.clone(),
            self.pipeline.snapshot(),
        )
    }

    /// Drops everything and starts over from `Idle` with the same key.
    pub fn restart(self) -> Self {
        log::info!(
            "session {} restarted from {:?}",
            self.id.short(),
            self.pipeline.state()
        );
        Self::new(self.client, self.api_key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ui_phase_follows_pipeline_state() {
        assert_eq!(ui_phase(PipelineState::Idle), UiPhase::AwaitingUpload);
        assert_eq!(ui_phase(PipelineState::Stage1Complete), UiPhase::Stage1Done);
        assert_eq!(ui_phase(PipelineState::Stage2Complete), UiPhase::Complete);
        assert_eq!(ui_phase(PipelineState::Failed), UiPhase::Failed);
    }

    struct YieldingClient;

    #[async_trait::async_trait]
    impl GenerationClient for YieldingClient {
        async fn generate_outline(
            &self,
            _api_key: &ApiKey,
            image: &ImageBytes,
            _params: &StageParams,
        ) -> Result<GenerationResult, sonoportrait_core::error::ApiError> {
            tokio::task::yield_now().await;
            Ok(GenerationResult {
                stage: sonoportrait_core::types::GenerationStage::Outline,
                output_image: image.clone(),
                raw_response: Default::default(),
            })
        }

        async fn generate_structure_controlled(
            &self,
            _api_key: &ApiKey,
            image: &ImageBytes,
            _control_image: &ImageBytes,
            _params: &StageParams,
        ) -> Result<GenerationResult, sonoportrait_core::error::ApiError> {
            Ok(GenerationResult {
                stage: sonoportrait_core::types::GenerationStage::StructureControl,
                output_image: image.clone(),
                raw_response: Default::default(),
            })
        }
    }

    fn session() -> GenerationSession {
        GenerationSession::new(
            Arc::new(YieldingClient),
            ApiKey::new("sk-test-0123456789abcdef"),
        )
    }

    #[tokio::test]
    async fn rejected_concurrent_upload_is_not_recorded() {
        let session = session();
        let (first, second) = tokio::join!(
            session.submit_stage1(ImageBytes::new(b"FIRST".to_vec()), StageParams::outline_defaults()),
            session.submit_stage1(ImageBytes::new(b"SECOND".to_vec()), StageParams::outline_defaults()),
        );
        assert!(first.is_ok());
        assert_eq!(second.unwrap_err(), PipelineError::PipelineBusy);

        let state = session.get_state();
        assert_eq!(
            state.uploaded_image.as_ref().map(|i| i.as_slice()),
            Some(&b"FIRST"[..])
        );
        assert_eq!(
            state.stage1_request.unwrap().source_image().as_slice(),
            b"FIRST"
        );
    }

    #[tokio::test]
    async fn invalid_params_record_no_upload() {
        let session = session();
        let err = session
            .submit_stage1(
                ImageBytes::new(b"SCAN".to_vec()),
                StageParams::outline_defaults().with_strength(2.0),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::InvalidParameters(_)));
        assert!(session.get_state().uploaded_image.is_none());
    }
}
