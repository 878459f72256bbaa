//! Adaptive write coalescing in front of the channel.
//!
//! Tiny fragments are accumulated and forwarded in growing batches. The
//! flush threshold starts at one base unit and rises by one unit per
//! threshold-met flush until it hits the ceiling, so a transfer that begins
//! with low-latency handoffs ends with a fraction of the per-byte
//! synchronization.

use std::io::{self, Write};

use bytes::BytesMut;
use tracing::trace;

use crate::config::TransferConfig;
use crate::error::{Result, StreamError};
use crate::writer::StreamWriter;

/// Batching producer facade.
///
/// `push` reports the bytes *forwarded* by that call (zero while the batch
/// is still filling), so callers can tell "buffered" from "sent". The
/// [`Write`] impl reports accepted bytes instead, per the io contract.
///
/// [`finish`](BatchWriter::finish) consumes the writer, flushes the
/// remainder and closes the stream; pushing after that is unrepresentable.
/// Dropping without `finish` discards any accumulated fragment and records
/// a producer failure through the inner writer.
pub struct BatchWriter {
    inner: StreamWriter,
    buf: BytesMut,
    min_flush: usize,
    base_unit: usize,
    max_flush: usize,
}

impl BatchWriter {
    pub fn new(writer: StreamWriter, config: &TransferConfig) -> Self {
        Self {
            inner: writer,
            buf: BytesMut::new(),
            min_flush: config.base_unit,
            base_unit: config.base_unit,
            max_flush: config.max_flush(),
        }
    }

    /// Accumulate one fragment, forwarding the whole batch once it reaches
    /// the current threshold. Returns the number of bytes forwarded by this
    /// call. Each threshold-met flush raises the threshold by one base
    /// unit, up to the ceiling.
    pub fn push(&mut self, fragment: &[u8]) -> Result<usize> {
        self.buf.extend_from_slice(fragment);
        if self.buf.len() < self.min_flush {
            return Ok(0);
        }
        let flushed = self.flush_buf()?;
        if self.min_flush < self.max_flush {
            self.min_flush = (self.min_flush + self.base_unit).min(self.max_flush);
            trace!(min_flush = self.min_flush, "flush threshold raised");
        }
        Ok(flushed)
    }

    /// Flush any remainder and close the stream. Returns the remainder
    /// size, which is zero when the final fragment landed exactly on a
    /// threshold.
    pub fn finish(mut self) -> Result<u64> {
        let remainder = self.flush_buf()?;
        self.inner.close();
        Ok(remainder as u64)
    }

    /// Current flush threshold. Non-decreasing over the writer's lifetime.
    pub fn flush_threshold(&self) -> usize {
        self.min_flush
    }

    /// Bytes accumulated but not yet forwarded.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Bytes forwarded into the channel so far.
    pub fn bytes_written(&self) -> u64 {
        self.inner.bytes_written()
    }

    /// Record a producer-side failure on the underlying channel.
    pub(crate) fn fail(&self, err: StreamError) {
        self.inner.fail(err);
    }

    // Forwards the accumulated batch without touching the threshold.
    fn flush_buf(&mut self) -> Result<usize> {
        if self.buf.is_empty() {
            return Ok(0);
        }
        let batch = self.buf.split();
        self.inner.push(&batch)?;
        Ok(batch.len())
    }
}

impl Write for BatchWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.push(buf).map_err(io::Error::from)?;
        Ok(buf.len())
    }

    /// Force the accumulated batch out. Unlike a threshold-met flush this
    /// does not raise the threshold.
    fn flush(&mut self) -> io::Result<()> {
        self.flush_buf().map_err(io::Error::from)?;
        Ok(())
    }
}
