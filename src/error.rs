//! Error types for the streaming handoff.
//!
//! A failure from either side is recorded once on the channel (first error
//! wins) and observed by the other side's next blocking call. Nothing is
//! retried here; retry policy belongs to the external collaborator.

use std::io;
use std::sync::Arc;

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StreamError>;

/// Errors surfaced by the streaming handoff.
///
/// `Producer` and `Consumer` carry the opaque error of whichever side gave
/// up; the `Arc` lets the recorded failure be handed to both sides
/// repeatedly.
#[derive(Debug, Clone, Error)]
pub enum StreamError {
    /// Operation attempted after the stream was closed.
    #[error("stream is closed")]
    Closed,

    /// Invalid configuration value.
    #[error("invalid config: {0}")]
    Config(String),

    /// The producer failed or disconnected before closing the stream.
    /// Surfaced to the consumer's next read so it can abort instead of hang.
    #[error("producer failed: {0}")]
    Producer(Arc<anyhow::Error>),

    /// The consumer failed or disconnected before draining the stream.
    /// Surfaced to the producer's next write so it fails fast instead of
    /// writing into a dead sink.
    #[error("consumer failed: {0}")]
    Consumer(Arc<anyhow::Error>),

    /// The coordinator's deadline expired while waiting for the external
    /// routine.
    #[error("transfer stalled past the configured deadline")]
    Stalled,
}

impl StreamError {
    /// Wrap a producer-side failure.
    pub fn producer(err: impl Into<anyhow::Error>) -> Self {
        StreamError::Producer(Arc::new(err.into()))
    }

    /// Wrap a consumer-side failure.
    pub fn consumer(err: impl Into<anyhow::Error>) -> Self {
        StreamError::Consumer(Arc::new(err.into()))
    }
}

impl From<StreamError> for io::Error {
    fn from(err: StreamError) -> Self {
        let kind = match &err {
            StreamError::Closed | StreamError::Config(_) => io::ErrorKind::InvalidInput,
            StreamError::Producer(_) | StreamError::Consumer(_) => io::ErrorKind::BrokenPipe,
            StreamError::Stalled => io::ErrorKind::TimedOut,
        };
        io::Error::new(kind, err)
    }
}
