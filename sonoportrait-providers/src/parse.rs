use crate::runtime::HttpResponse;
use serde::Deserialize;
use sonoportrait_core::error::ApiError;
use sonoportrait_core::generation::{GenerationResult, RawResponse};
use sonoportrait_core::types::{GenerationStage, ImageBytes};

// Stability error bodies look like {"id": "...", "name": "bad_request", "errors": ["..."]}.
#[derive(Debug, Default, Deserialize)]
struct StabilityErrorBody {
    #[serde(default)]
    errors: Vec<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    name: Option<String>,
}

const MAX_RAW_MESSAGE: usize = 300;

/// Turns an endpoint A/B response into a result, or the matching `ApiError`.
pub fn parse_image_response(
    stage: GenerationStage,
    resp: &HttpResponse,
) -> Result<GenerationResult, ApiError> {
    if !(200..=299).contains(&resp.status) {
        return Err(classify_error(resp));
    }

    let content_type = resp.header("content-type").map(str::to_string);
    let is_image = content_type
        .as_deref()
        .is_some_and(|ct| ct.trim().to_ascii_lowercase().starts_with("image/"));
    if !is_image {
        return Err(ApiError::RemoteError {
            status: resp.status,
            message: format!(
                "expected an image but got {}",
                content_type.as_deref().unwrap_or("no content type")
            ),
        });
    }
    if resp.body.is_empty() {
        return Err(ApiError::RemoteError {
            status: resp.status,
            message: "empty image body".into(),
        });
    }

    let raw_response = RawResponse {
        status: resp.status,
        content_type,
        seed: resp.header("seed").map(str::to_string),
        finish_reason: resp.header("finish-reason").map(str::to_string),
        body_len: resp.body.len(),
    };
    match raw_response.finish_reason.as_deref() {
        Some("SUCCESS") | None => {}
        Some(reason) => log::warn!("{} finished with reason {}", stage.label(), reason),
    }

    Ok(GenerationResult {
        stage,
        output_image: ImageBytes::new(resp.body.clone()),
        raw_response,
    })
}

/// Maps a non-2xx response to an `ApiError`.
pub fn classify_error(resp: &HttpResponse) -> ApiError {
    match resp.status {
        401 | 403 => ApiError::AuthError(error_message(&resp.body)),
        429 => ApiError::RateLimited {
            retry_after: resp
                .header("retry-after")
                .and_then(|v| v.trim().parse::<u64>().ok()),
        },
        400 => ApiError::ValidationError(error_message(&resp.body)),
        status => ApiError::RemoteError {
            status,
            message: error_message(&resp.body),
        },
    }
}

/// Key check: the engine listing returns 200 for a usable key.
pub fn parse_key_check(resp: &HttpResponse) -> Result<(), ApiError> {
    if resp.status == 200 {
        Ok(())
    } else {
        Err(classify_error(resp))
    }
}

/// Best human-readable message from an error body; falls back to (truncated) raw text.
pub fn error_message(body: &[u8]) -> String {
    if let Ok(parsed) = serde_json::from_slice::<StabilityErrorBody>(body) {
        if !parsed.errors.is_empty() {
            return parsed.errors.join("; ");
        }
        if let Some(m) = parsed.message.filter(|m| !m.trim().is_empty()) {
            return m;
        }
        if let Some(n) = parsed.name.filter(|n| !n.trim().is_empty()) {
            return n;
        }
    }

    let text = String::from_utf8_lossy(body);
    let text = text.trim();
    if text.is_empty() {
        return "no error details".into();
    }
    text.chars().take(MAX_RAW_MESSAGE).collect()
}
