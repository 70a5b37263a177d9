use crate::types::{Ethnicity, OutputFormat};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_GUIDANCE_SCALE: f32 = 8.5;
pub const DEFAULT_STRENGTH: f32 = 0.65;
pub const DEFAULT_CONTROL_STRENGTH: f32 = 0.85;
pub const DEFAULT_MODEL: &str = "sd3.5-large";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParamError {
    #[error("strength must be within [0, 1], got {0}")]
    StrengthOutOfRange(String),

    #[error("guidance scale must be positive, got {0}")]
    GuidanceScale(String),

    #[error("model name is empty")]
    EmptyModel,
}

/// Settings the UI tucks behind an "advanced" toggle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdvancedSettings {
    pub guidance_scale: f32,

    // `None` lets the service pick; the chosen seed comes back in the response.
    pub seed: Option<u32>,

    // Overrides for the templated prompts.
    pub positive_prompt: Option<String>,
    pub negative_prompt: Option<String>,

    pub model: String,
    pub output_format: OutputFormat,
}

impl Default for AdvancedSettings {
    fn default() -> Self {
        Self {
            guidance_scale: DEFAULT_GUIDANCE_SCALE,
            seed: None,
            positive_prompt: None,
            negative_prompt: None,
            model: DEFAULT_MODEL.into(),
            output_format: OutputFormat::Png,
        }
    }
}

/// User-facing parameters for one stage.
///
/// For the outline stage `strength` is the image-to-image strength (lower keeps more of the
/// ultrasound). For the structure stage it is the control strength.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageParams {
    pub ethnicity: Ethnicity,
    pub strength: f32,
    #[serde(default)]
    pub advanced: AdvancedSettings,
}

impl StageParams {
    pub fn outline_defaults() -> Self {
        Self {
            ethnicity: Ethnicity::default(),
            strength: DEFAULT_STRENGTH,
            advanced: AdvancedSettings::default(),
        }
    }

    pub fn structure_defaults() -> Self {
        Self {
            ethnicity: Ethnicity::default(),
            strength: DEFAULT_CONTROL_STRENGTH,
            advanced: AdvancedSettings::default(),
        }
    }

    pub fn with_ethnicity(mut self, ethnicity: Ethnicity) -> Self {
        self.ethnicity = ethnicity;
        self
    }

    pub fn with_strength(mut self, strength: f32) -> Self {
        self.strength = strength;
        self
    }

    pub fn validate(&self) -> Result<(), ParamError> {
        if !(0.0..=1.0).contains(&self.strength) {
            // NaN also lands here.
            return Err(ParamError::StrengthOutOfRange(self.strength.to_string()));
        }
        if !(self.advanced.guidance_scale > 0.0) {
            return Err(ParamError::GuidanceScale(
                self.advanced.guidance_scale.to_string(),
            ));
        }
        if self.advanced.model.trim().is_empty() {
            return Err(ParamError::EmptyModel);
        }
        Ok(())
    }
}
