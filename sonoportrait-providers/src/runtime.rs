use crate::request::{Body, HttpRequest, Method};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use sonoportrait_core::error::ApiError;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HttpOptions {
    pub connect_timeout: Duration,
    pub timeout: Duration,
}

impl Default for HttpOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    // Names are lowercased.
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Sends `req` once. There is no retry here; the timeout is the only cancellation.
pub async fn execute(req: &HttpRequest, opts: &HttpOptions) -> Result<HttpResponse, ApiError> {
    let client = reqwest::Client::builder()
        .connect_timeout(opts.connect_timeout)
        .timeout(opts.timeout)
        .build()
        .map_err(|e| ApiError::Transport(format!("build http client: {e}")))?;

    let mut headers = HeaderMap::new();
    for (k, v) in &req.headers {
        let name = HeaderName::from_bytes(k.as_bytes())
            .map_err(|_| ApiError::Transport(format!("invalid header name: {k}")))?;
        // Do not echo the value; it may be the API key.
        let value = HeaderValue::from_str(v)
            .map_err(|_| ApiError::Transport(format!("invalid header value for {k}")))?;
        headers.insert(name, value);
    }

    let builder = match req.method {
        Method::Get => client.get(&req.url),
        Method::Post => client.post(&req.url),
    }
    .headers(headers);

    let builder = match &req.body {
        Body::Empty => builder,
        Body::MultipartFormData { bytes, .. } => builder.body(bytes.clone()),
    };

    log::debug!("sending {} {}", req.method.as_str(), req.url);
    let resp = builder.send().await.map_err(|e| map_send_error(e, opts))?;

    let status = resp.status().as_u16();
    let headers = resp
        .headers()
        .iter()
        .filter_map(|(k, v)| {
            v.to_str()
                .ok()
                .map(|v| (k.as_str().to_ascii_lowercase(), v.to_string()))
        })
        .collect();
    let body = resp
        .bytes()
        .await
        .map_err(|e| map_send_error(e, opts))?
        .to_vec();

    log::debug!(
        "{} {} -> {} ({} bytes)",
        req.method.as_str(),
        req.url,
        status,
        body.len()
    );
    Ok(HttpResponse {
        status,
        headers,
        body,
    })
}

fn map_send_error(e: reqwest::Error, opts: &HttpOptions) -> ApiError {
    if e.is_timeout() {
        ApiError::Timeout(opts.timeout)
    } else {
        ApiError::Transport(e.without_url().to_string())
    }
}
