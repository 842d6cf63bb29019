//! Scripted stand-in for the remote API used across engine tests.

use std::collections::VecDeque;
use std::sync::Mutex;

use mediaforge_contracts::request::ApiKey;
use serde_json::{json, Value};
use url::Url;

use crate::api::{Download, GenerativeApi, OperationHandle};
use crate::error::JobError;
use crate::progress::ProgressSink;

#[derive(Default)]
pub struct ScriptedApi {
    calls: Mutex<Vec<String>>,
    payloads: Mutex<Vec<Value>>,
    download_urls: Mutex<Vec<String>>,
    content: Mutex<VecDeque<Result<Value, JobError>>>,
    starts: Mutex<VecDeque<Result<OperationHandle, JobError>>>,
    polls: Mutex<VecDeque<Result<OperationHandle, JobError>>>,
    downloads: Mutex<VecDeque<Result<Download, JobError>>>,
}

impl ScriptedApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_content(&self, result: Result<Value, JobError>) {
        self.content.lock().unwrap().push_back(result);
    }

    pub fn push_start(&self, result: Result<OperationHandle, JobError>) {
        self.starts.lock().unwrap().push_back(result);
    }

    pub fn push_poll(&self, result: Result<OperationHandle, JobError>) {
        self.polls.lock().unwrap().push_back(result);
    }

    pub fn push_download(&self, result: Result<Download, JobError>) {
        self.downloads.lock().unwrap().push_back(result);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn payloads(&self) -> Vec<Value> {
        self.payloads.lock().unwrap().clone()
    }

    pub fn download_urls(&self) -> Vec<String> {
        self.download_urls.lock().unwrap().clone()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

fn exhausted(what: &str) -> JobError {
    JobError::Transport(format!("no scripted {what} left"))
}

impl GenerativeApi for ScriptedApi {
    fn generate_content(
        &self,
        _key: &ApiKey,
        model: &str,
        payload: &Value,
    ) -> Result<Value, JobError> {
        self.record(format!("generate_content:{model}"));
        self.payloads.lock().unwrap().push(payload.clone());
        self.content
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(exhausted("content response")))
    }

    fn start_video(
        &self,
        _key: &ApiKey,
        model: &str,
        payload: &Value,
    ) -> Result<OperationHandle, JobError> {
        self.record(format!("start_video:{model}"));
        self.payloads.lock().unwrap().push(payload.clone());
        self.starts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(exhausted("video submission")))
    }

    fn get_operation(&self, _key: &ApiKey, name: &str) -> Result<OperationHandle, JobError> {
        self.record(format!("get_operation:{name}"));
        self.polls
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(exhausted("status")))
    }

    fn download(&self, url: &Url) -> Result<Download, JobError> {
        self.record("download".to_string());
        self.download_urls.lock().unwrap().push(url.to_string());
        self.downloads
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(exhausted("download")))
    }
}

/// Keeps every message in order.
#[derive(Debug, Default)]
pub struct RecordingProgress {
    messages: Mutex<Vec<String>>,
    poll_failures: Mutex<Vec<u32>>,
    submitted: Mutex<Vec<String>>,
}

impl RecordingProgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<String> {
        self.messages
            .lock()
            .map(|rows| rows.clone())
            .unwrap_or_default()
    }

    pub fn submitted(&self) -> Vec<String> {
        self.submitted
            .lock()
            .map(|rows| rows.clone())
            .unwrap_or_default()
    }

    pub fn poll_failures(&self) -> Vec<u32> {
        self.poll_failures
            .lock()
            .map(|rows| rows.clone())
            .unwrap_or_default()
    }
}

impl ProgressSink for RecordingProgress {
    fn report(&self, message: &str) {
        if let Ok(mut rows) = self.messages.lock() {
            rows.push(message.to_string());
        }
    }

    fn video_submitted(&self, operation: &str) {
        if let Ok(mut rows) = self.submitted.lock() {
            rows.push(operation.to_string());
        }
    }

    fn poll_failed(&self, attempt: u32, _error: &JobError) {
        if let Ok(mut rows) = self.poll_failures.lock() {
            rows.push(attempt);
        }
    }
}

pub fn image_response(data: &str, mime_type: &str) -> Value {
    json!({
        "candidates": [{
            "content": {
                "parts": [
                    { "text": "Here you go." },
                    { "inlineData": { "mimeType": mime_type, "data": data } }
                ]
            }
        }]
    })
}

pub fn text_response(text: &str) -> Value {
    json!({
        "candidates": [{ "content": { "parts": [{ "text": text }] } }]
    })
}

pub fn pending_operation(name: &str) -> OperationHandle {
    OperationHandle::pending(name)
}

pub fn done_operation(name: &str, uri: &str) -> OperationHandle {
    OperationHandle {
        done: true,
        video_uri: Some(uri.to_string()),
        ..OperationHandle::pending(name)
    }
}

pub fn failed_operation(name: &str, code: i64, message: &str) -> OperationHandle {
    OperationHandle {
        done: true,
        error: Some(crate::api::OperationError {
            code: Some(code),
            message: message.to_string(),
        }),
        ..OperationHandle::pending(name)
    }
}

pub fn ok_download(bytes: &[u8], content_type: &str) -> Download {
    Download {
        status: 200,
        status_text: "OK".to_string(),
        content_type: Some(content_type.to_string()),
        bytes: bytes.to_vec(),
    }
}
