use crate::params::{
    AdvancedSettings, DEFAULT_CONTROL_STRENGTH, DEFAULT_STRENGTH, StageParams,
};
use crate::prompts::PromptTemplates;
use crate::types::Ethnicity;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "https://api.stability.ai";

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub api: ApiSettings,
    pub generation: GenerationDefaults,
    pub enhancement: EnhancementConfig,
    pub prompts: PromptTemplates,
    pub storage: StorageSettings,
    // Secrets are never stored in this struct; the key lives in the session.
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiSettings {
    pub base_url: String,
    pub connect_timeout_secs: u64,
    pub outline_timeout_secs: u64,
    pub structure_timeout_secs: u64,
    pub key_check_timeout_secs: u64,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.into(),
            connect_timeout_secs: 10,
            outline_timeout_secs: 60,
            // Structure control is slower on the service side.
            structure_timeout_secs: 90,
            key_check_timeout_secs: 10,
        }
    }
}

impl ApiSettings {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn outline_timeout(&self) -> Duration {
        Duration::from_secs(self.outline_timeout_secs)
    }

    pub fn structure_timeout(&self) -> Duration {
        Duration::from_secs(self.structure_timeout_secs)
    }

    pub fn key_check_timeout(&self) -> Duration {
        Duration::from_secs(self.key_check_timeout_secs)
    }
}

/// Form defaults the UI pre-fills.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationDefaults {
    pub ethnicity: Ethnicity,
    pub strength: f32,
    pub control_strength: f32,
    pub advanced: AdvancedSettings,
}

impl Default for GenerationDefaults {
    fn default() -> Self {
        Self {
            ethnicity: Ethnicity::default(),
            strength: DEFAULT_STRENGTH,
            control_strength: DEFAULT_CONTROL_STRENGTH,
            advanced: AdvancedSettings::default(),
        }
    }
}

impl GenerationDefaults {
    pub fn outline_params(&self) -> StageParams {
        StageParams {
            ethnicity: self.ethnicity,
            strength: self.strength,
            advanced: self.advanced.clone(),
        }
    }

    pub fn structure_params(&self) -> StageParams {
        StageParams {
            ethnicity: self.ethnicity,
            strength: self.control_strength,
            advanced: self.advanced.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnhancementVariant {
    Original,
    FaceRoi,
    Normalized,
    #[default]
    SdOptimized,
}

impl EnhancementVariant {
    pub const ALL: [EnhancementVariant; 4] = [
        EnhancementVariant::Original,
        EnhancementVariant::FaceRoi,
        EnhancementVariant::Normalized,
        EnhancementVariant::SdOptimized,
    ];

    pub fn label(self) -> &'static str {
        match self {
            EnhancementVariant::Original => "original",
            EnhancementVariant::FaceRoi => "face_roi",
            EnhancementVariant::Normalized => "normalized",
            EnhancementVariant::SdOptimized => "sd_optimized",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            EnhancementVariant::Original => "Original Image",
            EnhancementVariant::FaceRoi => "Face ROI",
            EnhancementVariant::Normalized => "Normalized",
            EnhancementVariant::SdOptimized => "SD Optimized",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        let v = value.trim().to_ascii_lowercase().replace(['-', ' '], "_");
        Self::ALL.into_iter().find(|x| x.label() == v)
    }
}

/// Ultrasound preprocessing options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnhancementConfig {
    pub denoise: bool,
    pub contrast_boost: f32,
    pub brightness: f32,
    pub normalize: bool,
    pub resize_target: Option<(u32, u32)>,
    pub variant: EnhancementVariant,
}

impl Default for EnhancementConfig {
    fn default() -> Self {
        Self {
            denoise: true,
            contrast_boost: 1.5,
            brightness: 1.2,
            normalize: true,
            resize_target: Some((1024, 1024)),
            variant: EnhancementVariant::SdOptimized,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    pub temp_dir: PathBuf,
    pub output_dir: PathBuf,
    pub temp_max_age_secs: u64,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            temp_dir: PathBuf::from("data").join("temp"),
            output_dir: PathBuf::from("data").join("outputs"),
            temp_max_age_secs: 60 * 60,
        }
    }
}
