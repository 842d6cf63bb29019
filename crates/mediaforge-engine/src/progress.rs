use std::sync::mpsc::Sender;
use std::sync::Arc;

use crate::error::JobError;

/// Receives human-readable status text while a job runs.
///
/// Calls are fire-and-forget: implementations must not block and must not
/// fail. Reporting never affects control flow.
pub trait ProgressSink {
    fn report(&self, message: &str);

    /// The video job was accepted remotely and polling is about to start.
    fn video_submitted(&self, _operation: &str) {}

    /// A status query inside the video poll loop failed and will be retried.
    fn poll_failed(&self, _attempt: u32, _error: &JobError) {}
}

impl<T: ProgressSink + ?Sized> ProgressSink for Arc<T> {
    fn report(&self, message: &str) {
        (**self).report(message);
    }

    fn video_submitted(&self, operation: &str) {
        (**self).video_submitted(operation);
    }

    fn poll_failed(&self, attempt: u32, error: &JobError) {
        (**self).poll_failed(attempt, error);
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NullProgress;

impl ProgressSink for NullProgress {
    fn report(&self, _message: &str) {}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    Message(String),
    PollRetry { attempt: u32, error: String },
}

impl ProgressSink for Sender<ProgressEvent> {
    fn report(&self, message: &str) {
        // receiver gone means nobody is watching
        let _ = self.send(ProgressEvent::Message(message.to_string()));
    }

    fn poll_failed(&self, attempt: u32, error: &JobError) {
        let _ = self.send(ProgressEvent::PollRetry {
            attempt,
            error: error.to_string(),
        });
    }
}
