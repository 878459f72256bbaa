//! The synchronized byte buffer at the heart of a transfer.
//!
//! One producer and one consumer rendezvous over a window of pending bytes:
//!
//! ```text
//! producer thread                      consumer thread
//! ───────────────                      ───────────────
//! append(fragment) ──► [ pending bytes ] ──► take(max)
//!        │                   │                  │
//!        └── blocks while    │                  └── blocks while pending
//!        pending ≥ cap       │                  is empty and not closed
//!                            │
//!              close() / fail(err) wake both sides
//! ```
//!
//! All shared mutable state lives behind one lock; the facades
//! ([`StreamWriter`](crate::StreamWriter), [`StreamReader`](crate::StreamReader))
//! and the coordinator go exclusively through the four operations below.
//! Bytes hand over in append order and each byte is handed out exactly once.

use std::sync::{Arc, Condvar, Mutex};

use bytes::{Bytes, BytesMut};
use tracing::{debug, warn};

use crate::error::{Result, StreamError};
use crate::reader::StreamReader;
use crate::writer::StreamWriter;

/// Mutable state guarded by the channel lock.
struct ChannelState {
    /// Buffered-but-unread bytes, in append order.
    pending: BytesMut,
    /// Cumulative bytes accepted from the producer.
    total_written: u64,
    /// Cumulative bytes handed to the consumer.
    total_read: u64,
    /// Producer signalled end-of-input.
    closed: bool,
    /// First unrecoverable failure from either side.
    error: Option<StreamError>,
}

/// Thread-safe rendezvous buffer between one producer and one consumer.
///
/// The outstanding cap is a soft bound: a blocked `append` waits until the
/// window drops below the cap, then accepts its whole fragment, so the
/// window can overshoot by at most one fragment. That keeps fragments
/// intact without splitting them across wakeups.
pub struct ByteChannel {
    state: Mutex<ChannelState>,
    /// Signalled when bytes arrive, the stream closes, or it fails.
    readable: Condvar,
    /// Signalled when window space frees up or the stream fails.
    writable: Condvar,
    /// Declared payload size. Informational only; actual bytes may differ.
    total_expected: u64,
    /// Backpressure bound on the pending window.
    outstanding_cap: Option<usize>,
}

/// Create a connected writer/reader pair over a fresh channel.
///
/// `total_expected` is the declared payload size (a size estimate for the
/// consumer; it is not enforced). `outstanding_cap` bounds how far the
/// producer may run ahead of the consumer, in bytes.
pub fn byte_channel(
    total_expected: u64,
    outstanding_cap: Option<usize>,
) -> (StreamWriter, StreamReader) {
    let channel = ByteChannel::new(total_expected, outstanding_cap);
    (
        StreamWriter::new(Arc::clone(&channel)),
        StreamReader::new(channel),
    )
}

impl ByteChannel {
    pub fn new(total_expected: u64, outstanding_cap: Option<usize>) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(ChannelState {
                pending: BytesMut::new(),
                total_written: 0,
                total_read: 0,
                closed: false,
                error: None,
            }),
            readable: Condvar::new(),
            writable: Condvar::new(),
            total_expected,
            outstanding_cap,
        })
    }

    /// Append one fragment to the pending window.
    ///
    /// Blocks while the window is at or above the outstanding cap. Fails
    /// with [`StreamError::Closed`] after [`close`](Self::close), and with
    /// the recorded error once the channel has failed. Returns the fragment
    /// length on success; fragments are never partially accepted.
    pub fn append(&self, data: &[u8]) -> Result<usize> {
        let mut state = self.state.lock().unwrap();
        loop {
            if let Some(err) = &state.error {
                return Err(err.clone());
            }
            if state.closed {
                return Err(StreamError::Closed);
            }
            match self.outstanding_cap {
                Some(cap) if state.pending.len() >= cap => {
                    state = self.writable.wait(state).unwrap();
                }
                _ => break,
            }
        }
        state.pending.extend_from_slice(data);
        state.total_written += data.len() as u64;
        self.readable.notify_one();
        Ok(data.len())
    }

    /// Remove and return up to `max` bytes from the front of the window.
    ///
    /// Blocks while the window is empty and the stream is still open. An
    /// empty result means end-of-stream and every later call repeats it.
    /// A recorded error is returned even while data is still pending; an
    /// aborted transfer has no use for the remainder.
    ///
    /// `max == 0` returns an empty chunk immediately without consulting
    /// stream state, mirroring zero-length reads on files.
    pub fn take(&self, max: usize) -> Result<Bytes> {
        if max == 0 {
            return Ok(Bytes::new());
        }
        let mut state = self.state.lock().unwrap();
        loop {
            if let Some(err) = &state.error {
                return Err(err.clone());
            }
            if !state.pending.is_empty() {
                break;
            }
            if state.closed {
                return Ok(Bytes::new());
            }
            state = self.readable.wait(state).unwrap();
        }
        let n = max.min(state.pending.len());
        let chunk = state.pending.split_to(n).freeze();
        state.total_read += n as u64;
        self.writable.notify_one();
        Ok(chunk)
    }

    /// Mark end-of-input. Idempotent; pending bytes stay readable.
    pub fn close(&self) {
        let mut state = self.state.lock().unwrap();
        if state.closed {
            return;
        }
        state.closed = true;
        debug!(total_written = state.total_written, "stream closed");
        self.readable.notify_all();
    }

    /// Record a failure and wake both sides. The first recorded error wins;
    /// later calls are ignored.
    pub fn fail(&self, err: StreamError) {
        let mut state = self.state.lock().unwrap();
        if state.error.is_some() {
            return;
        }
        warn!(error = %err, "stream failed");
        state.error = Some(err);
        self.readable.notify_all();
        self.writable.notify_all();
    }

    /// Record a producer disconnect unless the stream was closed first.
    ///
    /// Called when the write side is dropped. A producer that vanishes
    /// without closing would otherwise leave the consumer blocked forever.
    pub(crate) fn fail_disconnected_producer(&self) {
        let mut state = self.state.lock().unwrap();
        if state.closed || state.error.is_some() {
            return;
        }
        state.error = Some(StreamError::producer(anyhow::anyhow!(
            "producer dropped before closing the stream"
        )));
        self.readable.notify_all();
        self.writable.notify_all();
    }

    /// Record a consumer disconnect unless the stream already finished
    /// cleanly (closed and fully drained).
    ///
    /// Called when the read side is dropped, including during a panic
    /// unwind in the external routine.
    pub(crate) fn fail_disconnected_consumer(&self) {
        let mut state = self.state.lock().unwrap();
        if state.error.is_some() {
            return;
        }
        if state.closed && state.pending.is_empty() {
            return;
        }
        state.error = Some(StreamError::consumer(anyhow::anyhow!(
            "consumer dropped before end of stream"
        )));
        self.readable.notify_all();
        self.writable.notify_all();
    }

    /// Declared payload size given at construction.
    pub fn total_expected(&self) -> u64 {
        self.total_expected
    }

    /// Cumulative bytes accepted from the producer.
    pub fn total_written(&self) -> u64 {
        self.state.lock().unwrap().total_written
    }

    /// Cumulative bytes handed to the consumer.
    pub fn total_read(&self) -> u64 {
        self.state.lock().unwrap().total_read
    }

    /// Bytes currently buffered but unread.
    pub fn outstanding(&self) -> usize {
        self.state.lock().unwrap().pending.len()
    }

    /// Whether end-of-input has been signalled.
    pub fn is_closed(&self) -> bool {
        self.state.lock().unwrap().closed
    }

    /// Whether the stream closed and every accepted byte was handed out.
    pub fn is_finished(&self) -> bool {
        let state = self.state.lock().unwrap();
        state.closed && state.pending.is_empty()
    }

    /// The recorded failure, if any.
    pub fn error(&self) -> Option<StreamError> {
        self.state.lock().unwrap().error.clone()
    }
}
