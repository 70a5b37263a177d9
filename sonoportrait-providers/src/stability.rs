use crate::multipart::{FilePart, MultipartForm};
use crate::request::{Body, HttpRequest};

pub const OUTLINE_PATH: &str = "/v2beta/stable-image/generate/sd3";
pub const STRUCTURE_PATH: &str = "/v2beta/stable-image/control/structure";
pub const LIST_ENGINES_PATH: &str = "/v1/engines/list";

#[derive(Clone, PartialEq, Eq)]
pub struct StabilityConfig {
    pub base_url: String,
    pub api_key: String,
}

impl std::fmt::Debug for StabilityConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StabilityConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &"[REDACTED]")
            .finish()
    }
}

/// Form fields for the SD3 image-to-image endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct OutlineForm {
    pub prompt: String,
    pub negative_prompt: String,
    pub model: String,
    pub strength: f32,
    pub cfg_scale: f32,
    pub seed: Option<u32>,
    pub output_format: String,
}

/// Form fields for the structure-control endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct StructureForm {
    pub prompt: String,
    pub negative_prompt: Option<String>,
    pub control_strength: f32,
    pub seed: Option<u32>,
    pub output_format: String,
}

pub fn build_outline_request(
    cfg: &StabilityConfig,
    image: &FilePart,
    form: &OutlineForm,
) -> HttpRequest {
    let seed = form.seed.map(|s| s.to_string());
    let (content_type, body) = MultipartForm::new()
        .file("image", image)
        .field("prompt", &form.prompt)
        .field("negative_prompt", &form.negative_prompt)
        .field("mode", "image-to-image")
        .field("model", &form.model)
        .field("strength", &form.strength.to_string())
        .field("cfg_scale", &form.cfg_scale.to_string())
        .optional_field("seed", seed.as_deref())
        .field("output_format", &form.output_format)
        .finish();

    image_post(cfg, OUTLINE_PATH, content_type, body)
}

/// The structure endpoint conditions on whatever is sent as `image`, so the control image goes
/// there.
pub fn build_structure_request(
    cfg: &StabilityConfig,
    control_image: &FilePart,
    form: &StructureForm,
) -> HttpRequest {
    let seed = form.seed.map(|s| s.to_string());
    let (content_type, body) = MultipartForm::new()
        .file("image", control_image)
        .field("prompt", &form.prompt)
        .optional_field("negative_prompt", form.negative_prompt.as_deref())
        .field("control_strength", &form.control_strength.to_string())
        .optional_field("seed", seed.as_deref())
        .field("output_format", &form.output_format)
        .finish();

    image_post(cfg, STRUCTURE_PATH, content_type, body)
}

pub fn build_list_engines_request(cfg: &StabilityConfig) -> HttpRequest {
    HttpRequest::get(join_url(&cfg.base_url, LIST_ENGINES_PATH)).with_bearer(&cfg.api_key)
}

fn image_post(cfg: &StabilityConfig, path: &str, content_type: String, body: Body) -> HttpRequest {
    HttpRequest::post(join_url(&cfg.base_url, path), body)
        .with_header("Content-Type", content_type)
        // Raw image bytes rather than base64 JSON.
        .with_header("Accept", "image/*")
        .with_bearer(&cfg.api_key)
}

fn join_url(base: &str, path: &str) -> String {
    let base = base.trim_end_matches('/');
    let path = path.trim_start_matches('/');
    format!("{}/{}", base, path)
}
