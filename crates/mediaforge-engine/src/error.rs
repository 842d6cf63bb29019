/// Everything that can end a submission. None of these are fatal to the
/// process; the caller may retry immediately.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    /// Rejected before any remote call.
    #[error("{0}")]
    Validation(String),

    #[error("API key is missing. Please provide a valid Google AI API key.")]
    MissingApiKey,

    /// Network failure talking to the remote API.
    #[error("Network request failed: {0}")]
    Transport(String),

    /// The call went through but produced no usable artifact.
    #[error("{0}")]
    Generation(String),

    /// Artifact URI fetch answered with a non-success status.
    #[error("{0}")]
    Download(String),

    /// Encoded payload could not be turned back into bytes.
    #[error("Could not decode file data: {0}")]
    Decode(String),

    #[error("A generation is already in progress.")]
    Busy,

    #[error("File system error: {0}")]
    Io(#[from] std::io::Error),
}

impl JobError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) | Self::MissingApiKey => "validation",
            Self::Transport(_) => "transport",
            Self::Generation(_) => "generation",
            Self::Download(_) => "download",
            Self::Decode(_) => "decode",
            Self::Busy => "busy",
            Self::Io(_) => "io",
        }
    }
}
