use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use thiserror::Error;

use sonoportrait_core::config::{AppConfig, EnhancementVariant};
use sonoportrait_core::error::ApiError;
use sonoportrait_core::generation::GenerationResult;
use sonoportrait_core::params::StageParams;
use sonoportrait_core::types::{ApiKey, GenerationStage, ImageBytes, OutputFormat, SessionId};
use sonoportrait_engine::pipeline::PipelineError;
use sonoportrait_engine::session::{GenerationSession, SessionState};
use sonoportrait_engine::traits::GenerationClient;
use sonoportrait_imaging::{PreprocessError, PreprocessedImage, preprocess, preprocess_all_variants};
use sonoportrait_runtime::config_store::ConfigStore;
use sonoportrait_runtime::file_manager::FileManager;
use sonoportrait_runtime::stability::StabilityClient;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("no active session")]
    NoSession,

    #[error("no final image yet")]
    NoResult,

    #[error(transparent)]
    Preprocess(#[from] PreprocessError),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("storage error: {0:#}")]
    Storage(#[from] anyhow::Error),
}

/// Entry point for front ends: config, one generation session, and saved files.
#[derive(Clone)]
pub struct AppService {
    config_store: ConfigStore,

    // When unset, each session gets a `StabilityClient` built from the config at start.
    client: Option<Arc<dyn GenerationClient>>,

    session: Arc<Mutex<Option<Arc<GenerationSession>>>>,
}

impl AppService {
    pub fn new(config_path: PathBuf) -> Self {
        Self {
            config_store: ConfigStore::at_path(config_path),
            client: None,
            session: Arc::new(Mutex::new(None)),
        }
    }

    /// Uses `client` for every session instead of the Stability API.
    pub fn with_client(config_path: PathBuf, client: Arc<dyn GenerationClient>) -> Self {
        Self {
            client: Some(client),
            ..Self::new(config_path)
        }
    }

    pub fn load_config(&self) -> anyhow::Result<AppConfig> {
        self.config_store.load()
    }

    pub fn save_config(&self, cfg: &AppConfig) -> anyhow::Result<()> {
        self.config_store.save(cfg)
    }

    pub async fn validate_api_key(&self, api_key: &ApiKey) -> Result<(), ServiceError> {
        let cfg = self.load_config()?;
        StabilityClient::from_config(&cfg)
            .validate_api_key(api_key)
            .await?;
        Ok(())
    }

    /// Replaces any current session with a fresh one holding `api_key`.
    pub fn start_session(&self, api_key: ApiKey) -> Result<SessionId, ServiceError> {
        if api_key.is_blank() {
            return Err(ApiError::AuthError("missing API key".into()).into());
        }
        let cfg = self.load_config()?;

        let files = FileManager::from_settings(&cfg.storage);
        if let Err(e) = files.cleanup_temp(Duration::from_secs(cfg.storage.temp_max_age_secs)) {
            log::warn!("temp cleanup failed: {e:#}");
        }

        let client = self.client_for(&cfg);
        let session = Arc::new(GenerationSession::new(client, api_key));
        let id = session.id().clone();
        *self.slot() = Some(session);
        Ok(id)
    }

    pub fn end_session(&self) {
        if let Some(s) = self.slot().take() {
            log::info!("session {} ended", s.id().short());
        }
    }

    /// Every enhancement variant of `upload`, for a preview picker.
    pub fn preprocess_variants(&self, upload: &[u8]) -> Result<Vec<PreprocessedImage>, ServiceError> {
        let cfg = self.load_config()?;
        Ok(preprocess_all_variants(upload, &cfg.enhancement)?)
    }

    /// Preprocesses `upload` and runs stage 1 on it. `variant` overrides the configured one.
    ///
    /// Preprocessing errors return before any network call.
    pub async fn submit_stage1(
        &self,
        upload: &[u8],
        variant: Option<EnhancementVariant>,
        params: StageParams,
    ) -> Result<Arc<GenerationResult>, ServiceError> {
        let session = self.current()?;
        let cfg = self.load_config()?;

        let mut enhancement = cfg.enhancement.clone();
        if let Some(v) = variant {
            enhancement.variant = v;
        }
        let prepared = preprocess(upload, &enhancement)?;
        log::info!(
            "preprocessed upload as {} ({}x{})",
            prepared.variant.label(),
            prepared.width,
            prepared.height
        );

        let result = session.submit_stage1(prepared.bytes, params).await?;

        let files = FileManager::from_settings(&cfg.storage);
        if let Err(e) = files.save_intermediate(
            session.id(),
            GenerationStage::Outline,
            result_format(&session, GenerationStage::Outline),
            &result.output_image,
        ) {
            log::warn!("could not write intermediate image: {e:#}");
        }
        Ok(result)
    }

    pub async fn submit_stage2(
        &self,
        params: StageParams,
    ) -> Result<Arc<GenerationResult>, ServiceError> {
        let session = self.current()?;
        Ok(session.submit_stage2(params).await?)
    }

    pub fn get_state(&self) -> Result<SessionState, ServiceError> {
        Ok(self.current()?.get_state())
    }

    /// Back to `Idle` with the same key. Refused while a stage is in flight.
    pub fn restart(&self) -> Result<SessionId, ServiceError> {
        let mut slot = self.slot();
        let session = slot.take().ok_or(ServiceError::NoSession)?;

        if session.pipeline_state().is_in_flight() {
            *slot = Some(session);
            return Err(PipelineError::PipelineBusy.into());
        }

        let fresh = match Arc::try_unwrap(session) {
            Ok(owned) => owned.restart(),
            Err(shared) => {
                // Someone still holds the old session (e.g. a state snapshot in progress).
                let cfg = self.load_config()?;
                GenerationSession::new(self.client_for(&cfg), shared.api_key().clone())
            }
        };
        let id = fresh.id().clone();
        *slot = Some(Arc::new(fresh));
        Ok(id)
    }

    /// Writes the final image to the output directory.
    pub fn save_result(&self) -> Result<PathBuf, ServiceError> {
        let session = self.current()?;
        let state = session.get_state();
        let result = state.stage2_result.ok_or(ServiceError::NoResult)?;

        let cfg = self.load_config()?;
        let files = FileManager::from_settings(&cfg.storage);
        let path = files.save_output(
            session.id(),
            GenerationStage::StructureControl,
            result_format(&session, GenerationStage::StructureControl),
            &result.output_image,
        )?;
        Ok(path)
    }

    pub fn list_outputs(&self) -> Result<Vec<PathBuf>, ServiceError> {
        let cfg = self.load_config()?;
        Ok(FileManager::from_settings(&cfg.storage).list_outputs()?)
    }

    pub fn read_output(&self, path: &Path) -> Result<ImageBytes, ServiceError> {
        let cfg = self.load_config()?;
        Ok(FileManager::from_settings(&cfg.storage).read(path)?)
    }

    fn client_for(&self, cfg: &AppConfig) -> Arc<dyn GenerationClient> {
        match &self.client {
            Some(c) => c.clone(),
            None => Arc::new(StabilityClient::from_config(cfg)),
        }
    }

    fn current(&self) -> Result<Arc<GenerationSession>, ServiceError> {
        self.slot().clone().ok_or(ServiceError::NoSession)
    }

    fn slot(&self) -> MutexGuard<'_, Option<Arc<GenerationSession>>> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// The format requested for `stage`, so the file extension matches the bytes.
fn result_format(session: &GenerationSession, stage: GenerationStage) -> OutputFormat {
    let state = session.get_state();
    let request = match stage {
        GenerationStage::Outline => state.stage1_request,
        GenerationStage::StructureControl => state.stage2_request,
    };
    request
        .map(|r| r.params().advanced.output_format)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use sonoportrait_core::error::ErrorKind;
    use sonoportrait_core::generation::RawResponse;
    use sonoportrait_engine::session::UiPhase;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[derive(Default)]
    struct CountingClient {
        calls: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl GenerationClient for CountingClient {
        async fn generate_outline(
            &self,
            _api_key: &ApiKey,
            _image: &ImageBytes,
            _params: &StageParams,
        ) -> Result<GenerationResult, ApiError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(GenerationResult {
                stage: GenerationStage::Outline,
                output_image: ImageBytes::new(b"O1".to_vec()),
                raw_response: RawResponse::default(),
            })
        }

        async fn generate_structure_controlled(
            &self,
            _api_key: &ApiKey,
            _image: &ImageBytes,
            _control_image: &ImageBytes,
            _params: &StageParams,
        ) -> Result<GenerationResult, ApiError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(GenerationResult {
                stage: GenerationStage::StructureControl,
                output_image: ImageBytes::new(b"O2".to_vec()),
                raw_response: RawResponse::default(),
            })
        }
    }

    struct StalledClient;

    #[async_trait::async_trait]
    impl GenerationClient for StalledClient {
        async fn generate_outline(
            &self,
            _api_key: &ApiKey,
            _image: &ImageBytes,
            _params: &StageParams,
        ) -> Result<GenerationResult, ApiError> {
            std::future::pending().await
        }

        async fn generate_structure_controlled(
            &self,
            _api_key: &ApiKey,
            _image: &ImageBytes,
            _control_image: &ImageBytes,
            _params: &StageParams,
        ) -> Result<GenerationResult, ApiError> {
            std::future::pending().await
        }
    }

    fn png(width: u32, height: u32) -> Vec<u8> {
        let img = image::GrayImage::from_fn(width, height, |x, y| {
            image::Luma([((x * 7 + y * 3) % 256) as u8])
        });
        let mut out = std::io::Cursor::new(Vec::new());
        img.write_to(&mut out, image::ImageFormat::Png).unwrap();
        out.into_inner()
    }

    fn service(dir: &Path, client: Arc<CountingClient>) -> AppService {
        let svc = AppService::with_client(dir.join("config.json"), client);
        let mut cfg = AppConfig::default();
        cfg.storage.temp_dir = dir.join("temp");
        cfg.storage.output_dir = dir.join("outputs");
        svc.save_config(&cfg).unwrap();
        svc
    }

    fn key() -> ApiKey {
        ApiKey::new("sk-test-0123456789abcdef")
    }

    #[tokio::test]
    async fn full_flow_saves_intermediate_and_final() {
        let dir = tempfile::tempdir().unwrap();
        let client = Arc::new(CountingClient::default());
        let svc = service(dir.path(), client.clone());

        svc.start_session(key()).unwrap();
        svc.submit_stage1(&png(200, 150), None, StageParams::outline_defaults())
            .await
            .unwrap();
        assert_eq!(svc.get_state().unwrap().ui_phase, UiPhase::Stage1Done);
        let temp_files: Vec<_> = std::fs::read_dir(dir.path().join("temp"))
            .unwrap()
            .collect();
        assert_eq!(temp_files.len(), 1);

        assert!(matches!(svc.save_result(), Err(ServiceError::NoResult)));

        svc.submit_stage2(StageParams::structure_defaults())
            .await
            .unwrap();
        let saved = svc.save_result().unwrap();
        assert!(saved.to_str().unwrap().ends_with("_final.png"));
        assert_eq!(svc.read_output(&saved).unwrap().as_slice(), b"O2");
        assert_eq!(svc.list_outputs().unwrap(), vec![saved]);
        assert_eq!(client.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn tiny_upload_is_rejected_before_any_call() {
        let dir = tempfile::tempdir().unwrap();
        let client = Arc::new(CountingClient::default());
        let svc = service(dir.path(), client.clone());
        svc.start_session(key()).unwrap();

        let err = svc
            .submit_stage1(&png(32, 32), None, StageParams::outline_defaults())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ServiceError::Preprocess(PreprocessError::ImageTooSmall { .. })
        ));
        assert_eq!(client.calls.load(Ordering::SeqCst), 0);
        assert_eq!(svc.get_state().unwrap().ui_phase, UiPhase::AwaitingUpload);
    }

    #[tokio::test]
    async fn operations_need_a_session() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(dir.path(), Arc::new(CountingClient::default()));

        assert!(matches!(svc.get_state(), Err(ServiceError::NoSession)));
        assert!(matches!(
            svc.submit_stage2(StageParams::structure_defaults()).await,
            Err(ServiceError::NoSession)
        ));
        assert!(matches!(
            svc.start_session(ApiKey::new(" ")),
            Err(ServiceError::Api(ApiError::AuthError(_)))
        ));
    }

    #[tokio::test]
    async fn restart_clears_results_and_keeps_key() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(dir.path(), Arc::new(CountingClient::default()));
        let first = svc.start_session(key()).unwrap();
        svc.submit_stage1(
            &png(100, 100),
            Some(EnhancementVariant::Original),
            StageParams::outline_defaults(),
        )
            .await
            .unwrap();

        let second = svc.restart().unwrap();
        assert_ne!(first, second);
        let state = svc.get_state().unwrap();
        assert_eq!(state.ui_phase, UiPhase::AwaitingUpload);
        assert_eq!(state.api_key, key());

        svc.end_session();
        assert!(matches!(svc.restart(), Err(ServiceError::NoSession)));
    }

    #[tokio::test]
    async fn abandoned_stage1_can_still_restart() {
        let dir = tempfile::tempdir().unwrap();
        let svc = AppService::with_client(dir.path().join("config.json"), Arc::new(StalledClient));
        let mut cfg = AppConfig::default();
        cfg.storage.temp_dir = dir.path().join("temp");
        cfg.storage.output_dir = dir.path().join("outputs");
        svc.save_config(&cfg).unwrap();

        let first = svc.start_session(key()).unwrap();
        let timed_out = tokio::time::timeout(
            std::time::Duration::from_millis(100),
            svc.submit_stage1(
                &png(100, 100),
                Some(EnhancementVariant::Original),
                StageParams::outline_defaults(),
            ),
        )
        .await;
        assert!(timed_out.is_err());

        let state = svc.get_state().unwrap();
        assert_eq!(state.ui_phase, UiPhase::Failed);
        assert_eq!(state.failure.unwrap().kind, ErrorKind::Cancelled);

        let second = svc.restart().unwrap();
        assert_ne!(first, second);
        assert_eq!(svc.get_state().unwrap().ui_phase, UiPhase::AwaitingUpload);
    }

    #[test]
    fn variants_come_back_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(dir.path(), Arc::new(CountingClient::default()));
        let variants = svc.preprocess_variants(&png(120, 90)).unwrap();
        let labels: Vec<_> = variants.iter().map(|v| v.variant.label()).collect();
        assert_eq!(labels, ["original", "face_roi", "normalized", "sd_optimized"]);
    }

    #[tokio::test]
    async fn validates_key_against_configured_base_url() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/engines/list"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let svc = AppService::new(dir.path().join("config.json"));
        let mut cfg = AppConfig::default();
        cfg.api.base_url = server.uri();
        svc.save_config(&cfg).unwrap();

        let err = svc.validate_api_key(&key()).await.unwrap_err();
        assert!(matches!(err, ServiceError::Api(ApiError::AuthError(_))));
    }
}
