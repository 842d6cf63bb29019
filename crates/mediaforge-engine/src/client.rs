use std::thread;
use std::time::Duration;

use mediaforge_contracts::models::{Capability, ModelSelector, ModelSpec};
use mediaforge_contracts::request::{ApiKey, AspectRatio, GenerationOptions, Resolution};
use serde_json::{json, Map, Value};

use crate::api::{GenerativeApi, OperationHandle};
use crate::encoder::{encode, EncodedImage, SourceFile};
use crate::error::JobError;
use crate::progress::ProgressSink;

/// Flavor text shown while a video job is polled, one per iteration.
pub const VIDEO_PROGRESS_MESSAGES: [&str; 5] = [
    "Warming up the pixels...",
    "Composing your masterpiece...",
    "Rendering the final frames...",
    "This can take a few minutes...",
    "Almost there, adding the finishing touches...",
];

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Fixed-interval retry policy for the video status loop.
///
/// `max_polls` is `None` unless the caller opts in: the remote job is polled
/// until it reports `done`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_polls: Option<u32>,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            max_polls: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlineArtifact {
    pub data_base64: String,
    pub mime_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteArtifact {
    pub uri: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct JobOutput<T> {
    pub artifact: T,
    pub model: String,
    /// Prompt text exactly as sent to the remote call.
    pub prompt_sent: String,
    pub warnings: Vec<String>,
}

/// Wraps the three remote request kinds.
pub struct JobClient<A> {
    api: A,
    selector: ModelSelector,
    poll: PollPolicy,
}

impl<A: GenerativeApi> JobClient<A> {
    pub fn new(api: A) -> Self {
        Self {
            api,
            selector: ModelSelector::default(),
            poll: PollPolicy::default(),
        }
    }

    pub fn with_poll_policy(mut self, poll: PollPolicy) -> Self {
        self.poll = poll;
        self
    }

    pub fn with_selector(mut self, selector: ModelSelector) -> Self {
        self.selector = selector;
        self
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    pub fn text_to_image(
        &self,
        key: Option<&ApiKey>,
        prompt: &str,
        options: &GenerationOptions,
        progress: &dyn ProgressSink,
    ) -> Result<JobOutput<InlineArtifact>, JobError> {
        let key = require_key(key)?;
        self.run_image(key, Capability::Image, prompt, None, options, progress)
    }

    pub fn edit_image(
        &self,
        key: Option<&ApiKey>,
        prompt: &str,
        input: Option<&SourceFile>,
        options: &GenerationOptions,
        progress: &dyn ProgressSink,
    ) -> Result<JobOutput<InlineArtifact>, JobError> {
        let key = require_key(key)?;
        let input = input.ok_or_else(|| {
            JobError::Validation("An input image is required for image editing.".to_string())
        })?;
        progress.report("Preparing assets...");
        let encoded = encode(input);
        self.run_image(key, Capability::Edit, prompt, Some(&encoded), options, progress)
    }

    /// Rejects video options no submission could satisfy, without any remote
    /// call. Returns the aspect ratio the video will be rendered at.
    pub fn check_video_options(
        &self,
        options: &GenerationOptions,
    ) -> Result<AspectRatio, JobError> {
        let aspect_ratio = options.aspect_ratio.unwrap_or(AspectRatio::Landscape16x9);
        if !aspect_ratio.supports_video() {
            return Err(JobError::Validation(format!(
                "Aspect ratio {aspect_ratio} is not available for video; use 16:9 or 9:16."
            )));
        }
        self.selector
            .select(options.video_model.as_deref(), Capability::Video)
            .map_err(JobError::Validation)?;
        Ok(aspect_ratio)
    }

    pub fn generate_video(
        &self,
        key: Option<&ApiKey>,
        prompt: &str,
        input: Option<&SourceFile>,
        options: &GenerationOptions,
        progress: &dyn ProgressSink,
    ) -> Result<JobOutput<RemoteArtifact>, JobError> {
        let key = require_key(key)?;
        let aspect_ratio = self.check_video_options(options)?;
        let mut warnings = Vec::new();
        let model = self.select(options.video_model.as_deref(), Capability::Video, &mut warnings)?;

        let generate_audio = if options.generate_audio && !model.supports(Capability::VideoAudio) {
            warnings.push(format!("{} does not render audio; flag ignored.", model.name));
            false
        } else {
            options.generate_audio
        };
        let resolution = match options.resolution {
            Some(Resolution::FullHd) if !model.supports(Capability::Video1080p) => {
                warnings.push(format!("{} renders at most 720p; using 720p.", model.name));
                Some(Resolution::Hd)
            }
            other => other,
        };

        let encoded = input.map(|file| {
            progress.report("Preparing assets...");
            encode(file)
        });

        progress.report("Sending request to VEO model...");
        let prompt_sent = compose_video_prompt(prompt, options.negative_prompt());
        let payload = video_payload(
            &prompt_sent,
            encoded.as_ref(),
            aspect_ratio,
            resolution,
            model.supports(Capability::VideoAudio).then_some(generate_audio),
        );
        let handle = self.api.start_video(key, &model.name, &payload)?;
        progress.video_submitted(&handle.name);
        let handle = self.poll_until_done(key, handle, progress, &mut warnings)?;

        progress.report("Finalizing video...");
        let uri = video_uri_from(handle)?;
        Ok(JobOutput {
            artifact: RemoteArtifact { uri },
            model: model.name,
            prompt_sent,
            warnings,
        })
    }

    fn run_image(
        &self,
        key: &ApiKey,
        capability: Capability,
        prompt: &str,
        input: Option<&EncodedImage>,
        options: &GenerationOptions,
        progress: &dyn ProgressSink,
    ) -> Result<JobOutput<InlineArtifact>, JobError> {
        let mut warnings = Vec::new();
        let model = self.select(options.image_model.as_deref(), capability, &mut warnings)?;

        progress.report("Sending request to image model...");
        let payload = image_payload(prompt, input, options.aspect_ratio);
        let response = self.api.generate_content(key, &model.name, &payload)?;

        progress.report("Processing generated image...");
        let artifact = extract_inline_image(&response)?;
        Ok(JobOutput {
            artifact,
            model: model.name,
            prompt_sent: prompt.to_string(),
            warnings,
        })
    }

    /// Polls while `done` is false. A failed status query keeps the previous
    /// handle and is retried on the next tick.
    fn poll_until_done(
        &self,
        key: &ApiKey,
        mut handle: OperationHandle,
        progress: &dyn ProgressSink,
        warnings: &mut Vec<String>,
    ) -> Result<OperationHandle, JobError> {
        let mut message_index = 0usize;
        let mut polls = 0u32;
        while !handle.done {
            if let Some(max_polls) = self.poll.max_polls {
                if polls >= max_polls {
                    return Err(JobError::Generation(format!(
                        "Video generation did not finish; polling gave up after {max_polls} status checks."
                    )));
                }
            }
            progress.report(VIDEO_PROGRESS_MESSAGES[message_index % VIDEO_PROGRESS_MESSAGES.len()]);
            message_index += 1;
            if !self.poll.interval.is_zero() {
                thread::sleep(self.poll.interval);
            }
            polls += 1;
            match self.api.get_operation(key, &handle.name) {
                Ok(next) => handle = next,
                Err(err) => {
                    log::warn!("status check {polls} for {} failed, retrying: {err}", handle.name);
                    warnings.push(format!("Status check {polls} failed: {err}"));
                    progress.poll_failed(polls, &err);
                }
            }
        }
        Ok(handle)
    }

    fn select(
        &self,
        requested: Option<&str>,
        capability: Capability,
        warnings: &mut Vec<String>,
    ) -> Result<ModelSpec, JobError> {
        let selection = self
            .selector
            .select(requested, capability)
            .map_err(JobError::Validation)?;
        if let Some(reason) = selection.fallback_reason {
            log::info!("{reason}");
            warnings.push(reason);
        }
        Ok(selection.model)
    }
}

/// `"<prompt>, negative prompt: <negative>"` when a negative prompt is given.
pub fn compose_video_prompt(prompt: &str, negative_prompt: Option<&str>) -> String {
    match negative_prompt {
        Some(negative) => format!("{prompt}, negative prompt: {negative}"),
        None => prompt.to_string(),
    }
}

fn require_key(key: Option<&ApiKey>) -> Result<&ApiKey, JobError> {
    key.ok_or(JobError::MissingApiKey)
}

fn image_payload(
    prompt: &str,
    input: Option<&EncodedImage>,
    aspect_ratio: Option<AspectRatio>,
) -> Value {
    let mut parts = Vec::new();
    if let Some(image) = input {
        parts.push(json!({
            "inlineData": {
                "mimeType": image.mime_type,
                "data": image.data,
            }
        }));
    }
    parts.push(json!({ "text": prompt }));

    let mut generation_config = Map::new();
    generation_config.insert(
        "responseModalities".to_string(),
        json!(["TEXT", "IMAGE"]),
    );
    if let Some(aspect_ratio) = aspect_ratio {
        generation_config.insert(
            "imageConfig".to_string(),
            json!({ "aspectRatio": aspect_ratio.as_str() }),
        );
    }
    json!({
        "contents": [{ "role": "user", "parts": parts }],
        "generationConfig": generation_config,
    })
}

fn video_payload(
    prompt: &str,
    input: Option<&EncodedImage>,
    aspect_ratio: AspectRatio,
    resolution: Option<Resolution>,
    generate_audio: Option<bool>,
) -> Value {
    let mut instance = Map::new();
    instance.insert("prompt".to_string(), Value::String(prompt.to_string()));
    if let Some(image) = input {
        instance.insert(
            "image".to_string(),
            json!({
                "bytesBase64Encoded": image.data,
                "mimeType": image.mime_type,
            }),
        );
    }

    let mut parameters = Map::new();
    parameters.insert("sampleCount".to_string(), json!(1));
    parameters.insert("aspectRatio".to_string(), json!(aspect_ratio.as_str()));
    if let Some(resolution) = resolution {
        parameters.insert("resolution".to_string(), json!(resolution.as_str()));
    }
    if let Some(generate_audio) = generate_audio {
        parameters.insert("generateAudio".to_string(), json!(generate_audio));
    }
    json!({
        "instances": [Value::Object(instance)],
        "parameters": parameters,
    })
}

/// First inline binary part wins. With no binary part, any returned text
/// becomes the error message.
fn extract_inline_image(response: &Value) -> Result<InlineArtifact, JobError> {
    let candidates = response
        .get("candidates")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    let mut texts = Vec::new();

    for candidate in &candidates {
        let parts = candidate
            .pointer("/content/parts")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        for part in parts {
            let inline = part.get("inlineData").or_else(|| part.get("inline_data"));
            if let Some(inline) = inline {
                let data = inline
                    .get("data")
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                if !data.is_empty() {
                    let mime_type = inline
                        .get("mimeType")
                        .or_else(|| inline.get("mime_type"))
                        .and_then(Value::as_str)
                        .unwrap_or("image/png");
                    return Ok(InlineArtifact {
                        data_base64: data.to_string(),
                        mime_type: mime_type.to_string(),
                    });
                }
            }
            if let Some(text) = part.get("text").and_then(Value::as_str) {
                let trimmed = text.trim();
                if !trimmed.is_empty() {
                    texts.push(trimmed.to_string());
                }
            }
        }
    }

    if !texts.is_empty() {
        return Err(JobError::Generation(texts.join("\n")));
    }
    if let Some(reason) = response
        .pointer("/promptFeedback/blockReason")
        .and_then(Value::as_str)
    {
        return Err(JobError::Generation(format!(
            "The request was blocked ({reason}); no image data was returned."
        )));
    }
    Err(JobError::Generation(
        "The model returned no image data.".to_string(),
    ))
}

fn video_uri_from(handle: OperationHandle) -> Result<String, JobError> {
    if let Some(error) = handle.error {
        let code = error
            .code
            .map(|code| format!(" (code {code})"))
            .unwrap_or_default();
        return Err(JobError::Generation(format!(
            "Video generation failed{code}: {}",
            error.message
        )));
    }
    if let Some(uri) = handle.video_uri {
        return Ok(uri);
    }
    if !handle.filtered_reasons.is_empty() {
        return Err(JobError::Generation(format!(
            "Video generation failed or returned no URI: {}",
            handle.filtered_reasons.join("; ")
        )));
    }
    Err(JobError::Generation(
        "Video generation failed or returned no URI.".to_string(),
    ))
}
