use std::env;
use std::sync::Arc;
use std::time::Duration;

use mediaforge_contracts::request::ApiKey;
use reqwest::blocking::{Client as HttpClient, Response as HttpResponse};
use reqwest::header::CONTENT_TYPE;
use serde_json::Value;
use url::Url;

use crate::error::JobError;

const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Server-reported failure attached to a finished operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationError {
    pub code: Option<i64>,
    pub message: String,
}

/// Latest known state of a long-running video job. Each successful status
/// query replaces the whole handle.
#[derive(Debug, Clone, PartialEq)]
pub struct OperationHandle {
    pub name: String,
    pub done: bool,
    pub video_uri: Option<String>,
    pub error: Option<OperationError>,
    /// Safety filter explanations returned instead of a video.
    pub filtered_reasons: Vec<String>,
}

impl OperationHandle {
    pub fn pending(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            done: false,
            video_uri: None,
            error: None,
            filtered_reasons: Vec::new(),
        }
    }

    pub fn from_payload(payload: &Value) -> Result<Self, JobError> {
        let name = payload
            .get("name")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .ok_or_else(|| {
                JobError::Generation("Video operation response is missing a name.".to_string())
            })?
            .to_string();
        let done = payload.get("done").and_then(Value::as_bool).unwrap_or(false);
        let error = payload
            .get("error")
            .and_then(Value::as_object)
            .map(|error| OperationError {
                code: error.get("code").and_then(Value::as_i64),
                message: error
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown error")
                    .to_string(),
            });

        let response = payload.get("response");
        let video_response = response.and_then(|value| value.get("generateVideoResponse"));
        let samples = video_response
            .and_then(|value| value.get("generatedSamples"))
            .or_else(|| response.and_then(|value| value.get("generatedVideos")))
            .and_then(Value::as_array);
        let video_uri = samples
            .and_then(|rows| rows.first())
            .and_then(|row| row.get("video"))
            .and_then(|video| video.get("uri"))
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string);
        let filtered_reasons = video_response
            .and_then(|value| value.get("raiMediaFilteredReasons"))
            .and_then(Value::as_array)
            .map(|rows| {
                rows.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            name,
            done,
            video_uri,
            error,
            filtered_reasons,
        })
    }
}

/// Raw result of an artifact fetch. Status checking is left to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Download {
    pub status: u16,
    pub status_text: String,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

impl Download {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Seam between the job client and the wire.
pub trait GenerativeApi: Send + Sync {
    /// Single request/response generation (text-to-image, image edit).
    fn generate_content(&self, key: &ApiKey, model: &str, payload: &Value)
        -> Result<Value, JobError>;

    /// Submits a video job and returns its first handle.
    fn start_video(
        &self,
        key: &ApiKey,
        model: &str,
        payload: &Value,
    ) -> Result<OperationHandle, JobError>;

    /// Refreshes a video job by operation name.
    fn get_operation(&self, key: &ApiKey, name: &str) -> Result<OperationHandle, JobError>;

    fn download(&self, url: &Url) -> Result<Download, JobError>;
}

impl<T: GenerativeApi + ?Sized> GenerativeApi for Arc<T> {
    fn generate_content(
        &self,
        key: &ApiKey,
        model: &str,
        payload: &Value,
    ) -> Result<Value, JobError> {
        (**self).generate_content(key, model, payload)
    }

    fn start_video(
        &self,
        key: &ApiKey,
        model: &str,
        payload: &Value,
    ) -> Result<OperationHandle, JobError> {
        (**self).start_video(key, model, payload)
    }

    fn get_operation(&self, key: &ApiKey, name: &str) -> Result<OperationHandle, JobError> {
        (**self).get_operation(key, name)
    }

    fn download(&self, url: &Url) -> Result<Download, JobError> {
        (**self).download(url)
    }
}

/// Google Generative Language REST transport.
pub struct GeminiApi {
    api_base: String,
    http: HttpClient,
    request_timeout: Duration,
    download_timeout: Duration,
}

impl Default for GeminiApi {
    fn default() -> Self {
        Self::new()
    }
}

impl GeminiApi {
    pub fn new() -> Self {
        let api_base = env::var("GEMINI_API_BASE")
            .ok()
            .map(|value| value.trim().trim_end_matches('/').to_string())
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| DEFAULT_API_BASE.to_string());
        Self::with_base(api_base)
    }

    pub fn with_base(api_base: impl Into<String>) -> Self {
        Self {
            api_base: api_base.into().trim_end_matches('/').to_string(),
            http: HttpClient::new(),
            request_timeout: Duration::from_secs(120),
            download_timeout: Duration::from_secs(600),
        }
    }

    pub fn model_endpoint(&self, model: &str, method: &str) -> String {
        let trimmed = model.trim();
        let model_path = if trimmed.starts_with("models/") {
            trimmed.to_string()
        } else {
            format!("models/{trimmed}")
        };
        format!("{}/{}:{}", self.api_base, model_path, method)
    }

    pub fn operation_endpoint(&self, name: &str) -> String {
        format!("{}/{}", self.api_base, name.trim().trim_start_matches('/'))
    }

    fn post_json(&self, endpoint: &str, key: &ApiKey, payload: &Value) -> Result<Value, JobError> {
        let response = self
            .http
            .post(endpoint)
            .query(&[("key", key.expose())])
            .timeout(self.request_timeout)
            .json(payload)
            .send()
            .map_err(transport_error)?;
        response_json_or_error(response)
    }
}

impl GenerativeApi for GeminiApi {
    fn generate_content(
        &self,
        key: &ApiKey,
        model: &str,
        payload: &Value,
    ) -> Result<Value, JobError> {
        let endpoint = self.model_endpoint(model, "generateContent");
        log::debug!("POST {endpoint}");
        self.post_json(&endpoint, key, payload)
    }

    fn start_video(
        &self,
        key: &ApiKey,
        model: &str,
        payload: &Value,
    ) -> Result<OperationHandle, JobError> {
        let endpoint = self.model_endpoint(model, "predictLongRunning");
        log::debug!("POST {endpoint}");
        let response = self.post_json(&endpoint, key, payload)?;
        OperationHandle::from_payload(&response)
    }

    fn get_operation(&self, key: &ApiKey, name: &str) -> Result<OperationHandle, JobError> {
        let endpoint = self.operation_endpoint(name);
        let response = self
            .http
            .get(&endpoint)
            .query(&[("key", key.expose())])
            .timeout(self.request_timeout)
            .send()
            .map_err(transport_error)?;
        OperationHandle::from_payload(&response_json_or_error(response)?)
    }

    fn download(&self, url: &Url) -> Result<Download, JobError> {
        let response = self
            .http
            .get(url.clone())
            .timeout(self.download_timeout)
            .send()
            .map_err(transport_error)?;
        let status = response.status();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let bytes = if status.is_success() {
            response.bytes().map_err(transport_error)?.to_vec()
        } else {
            Vec::new()
        };
        Ok(Download {
            status: status.as_u16(),
            status_text: status.canonical_reason().unwrap_or("").to_string(),
            content_type,
            bytes,
        })
    }
}

fn transport_error(err: reqwest::Error) -> JobError {
    // drop the URL, it carries the key as a query parameter
    JobError::Transport(err.without_url().to_string())
}

fn response_json_or_error(response: HttpResponse) -> Result<Value, JobError> {
    let status = response.status();
    let body = response.text().map_err(transport_error)?;
    if !status.is_success() {
        let detail = serde_json::from_str::<Value>(&body)
            .ok()
            .and_then(|payload| {
                payload
                    .pointer("/error/message")
                    .and_then(Value::as_str)
                    .map(str::to_string)
            })
            .unwrap_or_else(|| truncate_text(&body, 512));
        return Err(JobError::Generation(format!(
            "Request failed ({}): {}",
            status.as_u16(),
            detail
        )));
    }
    serde_json::from_str(&body)
        .map_err(|err| JobError::Generation(format!("Server returned invalid JSON: {err}")))
}

fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}
