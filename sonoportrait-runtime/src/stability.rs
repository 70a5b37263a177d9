use sonoportrait_core::config::{ApiSettings, AppConfig};
use sonoportrait_core::error::ApiError;
use sonoportrait_core::generation::GenerationResult;
use sonoportrait_core::params::StageParams;
use sonoportrait_core::prompts::{PromptTemplates, build_stage_prompts};
use sonoportrait_core::types::{ApiKey, GenerationStage, ImageBytes};
use sonoportrait_engine::traits::GenerationClient;
use sonoportrait_providers::multipart::FilePart;
use sonoportrait_providers::parse::{parse_image_response, parse_key_check};
use sonoportrait_providers::runtime::{HttpOptions, execute};
use sonoportrait_providers::stability::{
    OutlineForm, StabilityConfig, StructureForm, build_list_engines_request,
    build_outline_request, build_structure_request,
};

/// Keys shorter than this are rejected without a network round trip.
pub const MIN_API_KEY_LEN: usize = 20;

/// `GenerationClient` backed by the Stability AI REST API.
#[derive(Debug, Clone)]
pub struct StabilityClient {
    api: ApiSettings,
    prompts: PromptTemplates,
}

impl StabilityClient {
    pub fn new(api: ApiSettings, prompts: PromptTemplates) -> Self {
        Self { api, prompts }
    }

    pub fn from_config(cfg: &AppConfig) -> Self {
        Self::new(cfg.api.clone(), cfg.prompts.clone())
    }

    /// Cheap format check, then an authenticated engine listing.
    pub async fn validate_api_key(&self, api_key: &ApiKey) -> Result<(), ApiError> {
        let key = api_key.expose().trim();
        if key.len() < MIN_API_KEY_LEN {
            return Err(ApiError::AuthError(format!(
                "API key is too short (expected at least {MIN_API_KEY_LEN} characters)"
            )));
        }

        let req = build_list_engines_request(&self.stability_config(api_key)?);
        let resp = execute(&req, &self.options(self.api.key_check_timeout())).await?;
        parse_key_check(&resp)?;
        log::info!("API key accepted");
        Ok(())
    }

    fn stability_config(&self, api_key: &ApiKey) -> Result<StabilityConfig, ApiError> {
        if api_key.is_blank() {
            return Err(ApiError::AuthError("missing API key".into()));
        }
        Ok(StabilityConfig {
            base_url: self.api.base_url.clone(),
            api_key: api_key.expose().trim().to_string(),
        })
    }

    fn options(&self, timeout: std::time::Duration) -> HttpOptions {
        HttpOptions {
            connect_timeout: self.api.connect_timeout(),
            timeout,
        }
    }
}

/// Labels `bytes` with the format they actually are. Unrecognized data goes out as PNG.
fn image_part(stem: &str, bytes: &ImageBytes) -> FilePart {
    match image::guess_format(bytes.as_slice()) {
        Ok(format) => {
            let ext = format.extensions_str().first().copied().unwrap_or("bin");
            FilePart {
                filename: format!("{stem}.{ext}"),
                mime_type: format.to_mime_type().to_string(),
                bytes: bytes.as_slice().to_vec(),
            }
        }
        Err(_) => FilePart::png(format!("{stem}.png"), bytes.as_slice().to_vec()),
    }
}

#[async_trait::async_trait]
impl GenerationClient for StabilityClient {
    async fn generate_outline(
        &self,
        api_key: &ApiKey,
        image: &ImageBytes,
        params: &StageParams,
    ) -> Result<GenerationResult, ApiError> {
        let cfg = self.stability_config(api_key)?;
        let prompts = build_stage_prompts(GenerationStage::Outline, params, &self.prompts);
        let form = OutlineForm {
            prompt: prompts.positive,
            negative_prompt: prompts.negative,
            model: params.advanced.model.clone(),
            strength: params.strength,
            cfg_scale: params.advanced.guidance_scale,
            seed: params.advanced.seed,
            output_format: params.advanced.output_format.as_str().into(),
        };

        let req = build_outline_request(
            &cfg,
            &image_part("image", image),
            &form,
        );
        log::debug!("outline request: {req:?}");
        let resp = execute(&req, &self.options(self.api.outline_timeout())).await?;
        parse_image_response(GenerationStage::Outline, &resp)
    }

    async fn generate_structure_controlled(
        &self,
        api_key: &ApiKey,
        _image: &ImageBytes,
        control_image: &ImageBytes,
        params: &StageParams,
    ) -> Result<GenerationResult, ApiError> {
        // The endpoint takes a single image and derives structure from it; the pipeline
        // guarantees `image` and `control_image` are the same stage 1 output.
        let cfg = self.stability_config(api_key)?;
        let prompts =
            build_stage_prompts(GenerationStage::StructureControl, params, &self.prompts);
        let form = StructureForm {
            prompt: prompts.positive,
            negative_prompt: Some(prompts.negative),
            control_strength: params.strength,
            seed: params.advanced.seed,
            output_format: params.advanced.output_format.as_str().into(),
        };

        let req = build_structure_request(
            &cfg,
            &image_part("control", control_image),
            &form,
        );
        log::debug!("structure request: {req:?}");
        let resp = execute(&req, &self.options(self.api.structure_timeout())).await?;
        parse_image_response(GenerationStage::StructureControl, &resp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sonoportrait_core::types::Ethnicity;
    use sonoportrait_providers::stability::{LIST_ENGINES_PATH, OUTLINE_PATH, STRUCTURE_PATH};
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const KEY: &str = "sk-test-0123456789abcdef";

    fn client(base_url: &str) -> StabilityClient {
        let mut cfg = AppConfig::default();
        cfg.api.base_url = base_url.to_string();
        StabilityClient::from_config(&cfg)
    }

    fn body_text(req: &wiremock::Request) -> String {
        String::from_utf8_lossy(&req.body).into_owned()
    }

    #[tokio::test]
    async fn outline_sends_templated_prompt_and_params() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(OUTLINE_PATH))
            .and(header("authorization", format!("Bearer {KEY}").as_str()))
            .and(header("accept", "image/*"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("seed", "99")
                    .set_body_raw(&b"O1"[..], "image/png"),
            )
            .expect(1)
            .mount(&server)
            .await;

        let params = StageParams::outline_defaults().with_ethnicity(Ethnicity::Caucasian);
        let out = client(&server.uri())
            .generate_outline(&ApiKey::new(KEY), &ImageBytes::new(b"US".to_vec()), &params)
            .await
            .unwrap();
        assert_eq!(out.output_image.as_slice(), b"O1");
        assert_eq!(out.raw_response.seed.as_deref(), Some("99"));

        let received = server.received_requests().await.unwrap();
        let body = body_text(&received[0]);
        assert!(body.contains("Caucasian baby features"));
        assert!(!body.contains("{ethnicity_prompt}"));
        assert!(body.contains("name=\"strength\"\r\n\r\n0.65"));
        assert!(body.contains("name=\"cfg_scale\"\r\n\r\n8.5"));
        assert!(body.contains("name=\"model\"\r\n\r\nsd3.5-large"));
    }

    #[tokio::test]
    async fn structure_sends_control_image_and_strength() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(STRUCTURE_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_raw(&b"O2"[..], "image/png"))
            .mount(&server)
            .await;

        let out = client(&server.uri())
            .generate_structure_controlled(
                &ApiKey::new(KEY),
                &ImageBytes::new(b"O1-bytes".to_vec()),
                &ImageBytes::new(b"O1-bytes".to_vec()),
                &StageParams::structure_defaults(),
            )
            .await
            .unwrap();
        assert_eq!(out.stage, GenerationStage::StructureControl);

        let received = server.received_requests().await.unwrap();
        let body = body_text(&received[0]);
        assert!(body.contains("filename=\"control.png\""));
        assert!(body.contains("O1-bytes"));
        assert!(body.contains("name=\"control_strength\"\r\n\r\n0.85"));
    }

    #[tokio::test]
    async fn jpeg_control_image_is_labelled_as_jpeg() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(STRUCTURE_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_raw(&b"O2"[..], "image/jpeg"))
            .mount(&server)
            .await;

        let jpeg = ImageBytes::new(vec![0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, b'J', b'F', b'I', b'F']);
        client(&server.uri())
            .generate_structure_controlled(
                &ApiKey::new(KEY),
                &jpeg,
                &jpeg,
                &StageParams::structure_defaults(),
            )
            .await
            .unwrap();

        let received = server.received_requests().await.unwrap();
        let body = &received[0].body;
        let text = String::from_utf8_lossy(body);
        assert!(text.contains("filename=\"control.jpg\"\r\nContent-Type: image/jpeg\r\n"));
        assert!(!text.contains("image/png"));
        assert!(body.windows(jpeg.len()).any(|w| w == jpeg.as_slice()));
    }

    #[test]
    fn image_part_sniffs_format() {
        let png = image_part("image", &ImageBytes::new(b"\x89PNG\r\n\x1a\n....".to_vec()));
        assert_eq!(png.filename, "image.png");
        assert_eq!(png.mime_type, "image/png");

        let webp = image_part("control", &ImageBytes::new(b"RIFF\x10\x00\x00\x00WEBPVP8 ".to_vec()));
        assert_eq!(webp.filename, "control.webp");
        assert_eq!(webp.mime_type, "image/webp");

        let unknown = image_part("control", &ImageBytes::new(b"O1-bytes".to_vec()));
        assert_eq!(unknown.filename, "control.png");
        assert_eq!(unknown.bytes, b"O1-bytes");
    }

    #[tokio::test]
    async fn maps_error_statuses() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(OUTLINE_PATH))
            .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "30"))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path(STRUCTURE_PATH))
            .respond_with(ResponseTemplate::new(400).set_body_raw(
                r#"{"id":"x","name":"bad_request","errors":["control_strength: too high"]}"#,
                "application/json",
            ))
            .mount(&server)
            .await;

        let c = client(&server.uri());
        let key = ApiKey::new(KEY);
        let img = ImageBytes::new(vec![1]);

        let err = c
            .generate_outline(&key, &img, &StageParams::outline_defaults())
            .await
            .unwrap_err();
        assert_eq!(
            err,
            ApiError::RateLimited {
                retry_after: Some(30)
            }
        );

        let err = c
            .generate_structure_controlled(&key, &img, &img, &StageParams::structure_defaults())
            .await
            .unwrap_err();
        assert_eq!(
            err,
            ApiError::ValidationError("control_strength: too high".into())
        );
    }

    #[tokio::test]
    async fn server_error_is_remote_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
            .mount(&server)
            .await;

        let err = client(&server.uri())
            .generate_outline(
                &ApiKey::new(KEY),
                &ImageBytes::new(vec![1]),
                &StageParams::outline_defaults(),
            )
            .await
            .unwrap_err();
        assert_eq!(
            err,
            ApiError::RemoteError {
                status: 503,
                message: "overloaded".into()
            }
        );
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn blank_key_fails_before_any_request() {
        let server = MockServer::start().await;
        let err = client(&server.uri())
            .generate_outline(
                &ApiKey::new("   "),
                &ImageBytes::new(vec![1]),
                &StageParams::outline_defaults(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::AuthError(_)));
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn validates_key_against_engine_listing() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(LIST_ENGINES_PATH))
            .and(header("authorization", format!("Bearer {KEY}").as_str()))
            .respond_with(ResponseTemplate::new(200).set_body_raw("[]", "application/json"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(LIST_ENGINES_PATH))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let c = client(&server.uri());
        c.validate_api_key(&ApiKey::new(KEY)).await.unwrap();

        let err = c
            .validate_api_key(&ApiKey::new("sk-wrong-000000000000000"))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::AuthError(_)));

        let requests_before = server.received_requests().await.unwrap().len();
        let err = c.validate_api_key(&ApiKey::new("short")).await.unwrap_err();
        assert!(matches!(err, ApiError::AuthError(m) if m.contains("too short")));
        assert_eq!(
            server.received_requests().await.unwrap().len(),
            requests_before
        );
    }
}
