use crate::params::StageParams;
use crate::types::{GenerationStage, ImageBytes};
use serde::{Deserialize, Serialize};

/// One submitted stage. Fields are private so a request cannot change after submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    stage: GenerationStage,
    source_image: ImageBytes,
    control_image: Option<ImageBytes>,
    params: StageParams,
}

impl GenerationRequest {
    pub fn outline(source_image: ImageBytes, params: StageParams) -> Self {
        Self {
            stage: GenerationStage::Outline,
            source_image,
            control_image: None,
            params,
        }
    }

    pub fn structure_controlled(
        source_image: ImageBytes,
        control_image: ImageBytes,
        params: StageParams,
    ) -> Self {
        Self {
            stage: GenerationStage::StructureControl,
            source_image,
            control_image: Some(control_image),
            params,
        }
    }

    pub fn stage(&self) -> GenerationStage {
        self.stage
    }

    pub fn source_image(&self) -> &ImageBytes {
        &self.source_image
    }

    pub fn control_image(&self) -> Option<&ImageBytes> {
        self.control_image.as_ref()
    }

    pub fn params(&self) -> &StageParams {
        &self.params
    }
}

/// Response metadata kept alongside the decoded image.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RawResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub seed: Option<String>,
    pub finish_reason: Option<String>,
    pub body_len: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationResult {
    pub stage: GenerationStage,
    pub output_image: ImageBytes,
    pub raw_response: RawResponse,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn structure_request_carries_control_image() {
        let req = GenerationRequest::structure_controlled(
            ImageBytes::new(vec![1]),
            ImageBytes::new(vec![2]),
            StageParams::structure_defaults(),
        );
        assert_eq!(req.stage(), GenerationStage::StructureControl);
        assert_eq!(req.control_image(), Some(&ImageBytes::new(vec![2])));

        let req = GenerationRequest::outline(
            ImageBytes::new(vec![1]),
            StageParams::outline_defaults(),
        );
        assert!(req.control_image().is_none());
    }
}
