use async_trait::async_trait;
use sonoportrait_core::error::ApiError;
use sonoportrait_core::generation::GenerationResult;
use sonoportrait_core::params::StageParams;
use sonoportrait_core::types::{ApiKey, ImageBytes};

/// Remote image generation. One call, one result or error; implementations do not retry.
#[async_trait]
pub trait GenerationClient: Send + Sync {
    /// Stage 1: image-to-image from the (preprocessed) ultrasound.
    async fn generate_outline(
        &self,
        api_key: &ApiKey,
        image: &ImageBytes,
        params: &StageParams,
    ) -> Result<GenerationResult, ApiError>;

    /// Stage 2: generation constrained by `control_image`.
    async fn generate_structure_controlled(
        &self,
        api_key: &ApiKey,
        image: &ImageBytes,
        control_image: &ImageBytes,
        params: &StageParams,
    ) -> Result<GenerationResult, ApiError>;
}
