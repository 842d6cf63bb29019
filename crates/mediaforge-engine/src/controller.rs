use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Instant;

use chrono::{SecondsFormat, Utc};
use mediaforge_contracts::events::{EventLog, JobEvent};
use mediaforge_contracts::request::{ApiKey, GenerationOptions, Modality};

use crate::api::GenerativeApi;
use crate::artifact::{ArtifactResolver, ResolvedArtifact};
use crate::client::JobClient;
use crate::encoder::{decode, SourceFile};
use crate::error::JobError;
use crate::progress::{NullProgress, ProgressSink};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    pub prompt: String,
    pub input_image: Option<SourceFile>,
    pub modality: Modality,
    pub options: GenerationOptions,
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>, modality: Modality) -> Self {
        Self {
            prompt: prompt.into(),
            input_image: None,
            modality,
            options: GenerationOptions::default(),
        }
    }

    pub fn with_input_image(mut self, input: SourceFile) -> Self {
        self.input_image = Some(input);
        self
    }

    pub fn with_options(mut self, options: GenerationOptions) -> Self {
        self.options = options;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobPhase {
    Idle,
    Validating,
    Submitting,
    Polling,
    Success,
    Failure,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LoadingState {
    pub is_loading: bool,
    pub message: String,
}

/// What the output area shows; always exactly one of these.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputPane {
    Empty,
    Loading(String),
    Error(String),
    Result(ResolvedArtifact),
}

/// A finished job as returned to the caller.
#[derive(Debug, Clone, PartialEq)]
pub struct Submission {
    pub job_id: String,
    pub modality: Modality,
    pub artifact: ResolvedArtifact,
    pub prompt_sent: String,
    /// Remote models called, in order.
    pub models: Vec<String>,
    pub warnings: Vec<String>,
    pub started_at: String,
    pub finished_at: String,
    pub latency_s: f64,
}

#[derive(Debug)]
struct StudioState {
    api_key: Option<ApiKey>,
    phase: JobPhase,
    loading: LoadingState,
    error: Option<String>,
    result: Option<ResolvedArtifact>,
}

/// Outcome of the remote part of a job, before bookkeeping.
struct Completed {
    artifact: ResolvedArtifact,
    prompt_sent: String,
    models: Vec<String>,
    warnings: Vec<String>,
}

/// Session controller: owns the credential, sequences remote calls and keeps
/// the loading / error / result state the front end renders.
///
/// Only one submission runs at a time; a second `submit` while one is in
/// flight gets [`JobError::Busy`].
pub struct Studio<A> {
    client: JobClient<A>,
    resolver: ArtifactResolver,
    events: Option<EventLog>,
    observer: Box<dyn ProgressSink + Send + Sync>,
    state: Mutex<StudioState>,
    in_flight: AtomicBool,
}

impl<A: GenerativeApi> Studio<A> {
    pub fn new(client: JobClient<A>, resolver: ArtifactResolver) -> Self {
        Self {
            client,
            resolver,
            events: None,
            observer: Box::new(NullProgress),
            state: Mutex::new(StudioState {
                api_key: None,
                phase: JobPhase::Idle,
                loading: LoadingState::default(),
                error: None,
                result: None,
            }),
            in_flight: AtomicBool::new(false),
        }
    }

    pub fn with_event_log(mut self, events: EventLog) -> Self {
        self.events = Some(events);
        self
    }

    /// Every progress message is also forwarded to `observer`.
    pub fn with_observer(mut self, observer: impl ProgressSink + Send + Sync + 'static) -> Self {
        self.observer = Box::new(observer);
        self
    }

    pub fn with_api_key(self, key: Option<ApiKey>) -> Self {
        self.set_api_key(key);
        self
    }

    pub fn client(&self) -> &JobClient<A> {
        &self.client
    }

    pub fn resolver(&self) -> &ArtifactResolver {
        &self.resolver
    }

    pub fn set_api_key(&self, key: Option<ApiKey>) {
        self.state().api_key = key;
    }

    pub fn api_key(&self) -> Option<ApiKey> {
        self.state().api_key.clone()
    }

    pub fn phase(&self) -> JobPhase {
        self.state().phase
    }

    pub fn loading(&self) -> LoadingState {
        self.state().loading.clone()
    }

    pub fn error(&self) -> Option<String> {
        self.state().error.clone()
    }

    pub fn result(&self) -> Option<ResolvedArtifact> {
        self.state().result.clone()
    }

    pub fn output(&self) -> OutputPane {
        let state = self.state();
        if state.loading.is_loading {
            return OutputPane::Loading(state.loading.message.clone());
        }
        if let Some(error) = &state.error {
            return OutputPane::Error(error.clone());
        }
        match &state.result {
            Some(artifact) => OutputPane::Result(artifact.clone()),
            None => OutputPane::Empty,
        }
    }

    pub fn submit(&self, request: &GenerationRequest) -> Result<Submission, JobError> {
        let Some(_slot) = JobSlot::acquire(&self.in_flight) else {
            return Err(JobError::Busy);
        };

        self.state().phase = JobPhase::Validating;
        let key = match (self.api_key(), request.prompt.trim().is_empty()) {
            (None, _) => return Err(self.reject(validation("Please enter your Gemini API key."))),
            (Some(_), true) => return Err(self.reject(validation("Please enter a prompt."))),
            (Some(key), false) => key,
        };
        if request.modality == Modality::Video {
            self.client
                .check_video_options(&request.options)
                .map_err(|err| self.reject(err))?;
        }

        let previous = {
            let mut state = self.state();
            state.error = None;
            state.phase = JobPhase::Submitting;
            state.loading = LoadingState {
                is_loading: true,
                message: "Starting generation...".to_string(),
            };
            state.result.take()
        };
        if let Some(previous) = previous {
            self.resolver.release(&previous);
        }

        let job_id = uuid::Uuid::new_v4().to_string();
        let started_at = now_utc_iso();
        let started = Instant::now();
        self.emit(JobEvent::JobSubmitted {
            job_id: job_id.clone(),
            modality: request.modality,
            prompt: request.prompt.clone(),
            has_input_image: request.input_image.is_some(),
        });
        log::info!("job {job_id}: {} generation submitted", request.modality);

        let progress = StudioProgress {
            studio: self,
            job_id: &job_id,
        };
        let outcome = self.run(&key, request, &progress);
        let latency_s = started.elapsed().as_secs_f64();

        let mut state = self.state();
        state.loading = LoadingState::default();
        match outcome {
            Ok(completed) => {
                state.phase = JobPhase::Success;
                state.result = Some(completed.artifact.clone());
                drop(state);
                self.emit(JobEvent::JobSucceeded {
                    job_id: job_id.clone(),
                    artifact_url: completed.artifact.url().chars().take(128).collect(),
                    mime_type: completed.artifact.mime_type().to_string(),
                    latency_s,
                });
                log::info!("job {job_id}: finished in {latency_s:.1}s");
                Ok(Submission {
                    job_id,
                    modality: request.modality,
                    artifact: completed.artifact,
                    prompt_sent: completed.prompt_sent,
                    models: completed.models,
                    warnings: completed.warnings,
                    started_at,
                    finished_at: now_utc_iso(),
                    latency_s,
                })
            }
            Err(err) => {
                state.phase = JobPhase::Failure;
                state.error = Some(err.to_string());
                drop(state);
                self.emit(JobEvent::JobFailed {
                    job_id: job_id.clone(),
                    error: err.to_string(),
                });
                log::info!("job {job_id}: failed ({}): {err}", err.kind());
                Err(err)
            }
        }
    }

    /// Releases the held artifact. The studio stays usable.
    pub fn teardown(&self) {
        let previous = self.state().result.take();
        if let Some(previous) = previous {
            self.resolver.release(&previous);
        }
    }

    fn run(
        &self,
        key: &ApiKey,
        request: &GenerationRequest,
        progress: &StudioProgress<'_, A>,
    ) -> Result<Completed, JobError> {
        let options = &request.options;
        match request.modality {
            Modality::Image => {
                let output = match &request.input_image {
                    Some(input) => self.client.edit_image(
                        Some(key),
                        &request.prompt,
                        Some(input),
                        options,
                        progress,
                    )?,
                    None => {
                        self.client
                            .text_to_image(Some(key), &request.prompt, options, progress)?
                    }
                };
                Ok(Completed {
                    artifact: self.resolver.resolve_inline(&output.artifact),
                    prompt_sent: output.prompt_sent,
                    models: vec![output.model],
                    warnings: output.warnings,
                })
            }
            Modality::Video => {
                let mut models = Vec::new();
                let mut warnings = Vec::new();
                let derived_input = if options.generate_image_first {
                    progress.report("Generating source image...");
                    let image = match &request.input_image {
                        Some(input) => self.client.edit_image(
                            Some(key),
                            &request.prompt,
                            Some(input),
                            options,
                            progress,
                        )?,
                        None => self.client.text_to_image(
                            Some(key),
                            &request.prompt,
                            options,
                            progress,
                        )?,
                    };
                    models.push(image.model);
                    warnings.extend(image.warnings);
                    progress.report("Preparing generated image for video...");
                    Some(decode(
                        &image.artifact.data_base64,
                        &image.artifact.mime_type,
                        "generated-source-image",
                    )?)
                } else {
                    None
                };
                let input = derived_input.as_ref().or(request.input_image.as_ref());

                let video =
                    self.client
                        .generate_video(Some(key), &request.prompt, input, options, progress)?;
                models.push(video.model);
                warnings.extend(video.warnings);

                let artifact =
                    self.resolver
                        .resolve_remote(self.client.api(), key, &video.artifact, progress)?;
                Ok(Completed {
                    artifact,
                    prompt_sent: video.prompt_sent,
                    models,
                    warnings,
                })
            }
        }
    }

    /// Fails validation without touching the network or the held result.
    fn reject(&self, err: JobError) -> JobError {
        let mut state = self.state();
        state.error = Some(err.to_string());
        state.phase = JobPhase::Failure;
        err
    }

    fn state(&self) -> MutexGuard<'_, StudioState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn emit(&self, event: JobEvent) {
        if let Some(events) = &self.events {
            if let Err(err) = events.emit(&event) {
                log::warn!("failed writing event to {}: {err:#}", events.path().display());
            }
        }
    }
}

impl<A> Drop for Studio<A> {
    fn drop(&mut self) {
        let held = self
            .state
            .get_mut()
            .map(|state| state.result.take())
            .unwrap_or(None);
        if let Some(artifact) = held {
            self.resolver.release(&artifact);
        }
    }
}

/// Clears the in-flight flag when dropped.
struct JobSlot<'a> {
    flag: &'a AtomicBool,
}

impl<'a> JobSlot<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { flag })
    }
}

impl Drop for JobSlot<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// Progress sink handed to the job client for one submission.
struct StudioProgress<'a, A> {
    studio: &'a Studio<A>,
    job_id: &'a str,
}

impl<A: GenerativeApi> ProgressSink for StudioProgress<'_, A> {
    fn report(&self, message: &str) {
        {
            let mut state = self.studio.state();
            state.loading = LoadingState {
                is_loading: true,
                message: message.to_string(),
            };
        }
        self.studio.observer.report(message);
        self.studio.emit(JobEvent::Progress {
            job_id: self.job_id.to_string(),
            message: message.to_string(),
        });
    }

    fn video_submitted(&self, operation: &str) {
        self.studio.state().phase = JobPhase::Polling;
        log::debug!("job {}: polling {operation}", self.job_id);
        self.studio.observer.video_submitted(operation);
    }

    fn poll_failed(&self, attempt: u32, error: &JobError) {
        self.studio.observer.poll_failed(attempt, error);
        self.studio.emit(JobEvent::PollRetry {
            job_id: self.job_id.to_string(),
            attempt,
            error: error.to_string(),
        });
    }
}

fn validation(message: &str) -> JobError {
    JobError::Validation(message.to_string())
}

fn now_utc_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)
}
