pub mod api;
pub mod artifact;
pub mod client;
pub mod controller;
pub mod encoder;
pub mod error;
pub mod progress;

#[cfg(test)]
mod testing;

pub use api::{Download, GeminiApi, GenerativeApi, OperationError, OperationHandle};
pub use artifact::{ArtifactResolver, BlobStore, ResolvedArtifact};
pub use client::{
    compose_video_prompt, InlineArtifact, JobClient, JobOutput, PollPolicy, RemoteArtifact,
    VIDEO_PROGRESS_MESSAGES,
};
pub use controller::{
    GenerationRequest, JobPhase, LoadingState, OutputPane, Studio, Submission,
};
pub use encoder::{decode, encode, EncodedImage, SourceFile};
pub use error::JobError;
pub use progress::{NullProgress, ProgressEvent, ProgressSink};
