//! Producer-facing facade over [`ByteChannel`].

use std::io::{self, Write};
use std::sync::Arc;

use crate::channel::ByteChannel;
use crate::error::{Result, StreamError};

/// Push side of a transfer.
///
/// Fragments go in whole: `push` blocks while the outstanding window is
/// full and then accepts the entire fragment, so flow control never shows
/// up as a short write. Dropping the writer without
/// [`close`](StreamWriter::close) records a producer failure on the channel
/// so the consumer does not block forever on a vanished producer.
pub struct StreamWriter {
    channel: Arc<ByteChannel>,
    closed: bool,
}

impl StreamWriter {
    pub fn new(channel: Arc<ByteChannel>) -> Self {
        Self {
            channel,
            closed: false,
        }
    }

    /// Forward one fragment. Blocks while the outstanding window is full;
    /// returns the fragment length once accepted.
    pub fn push(&mut self, data: &[u8]) -> Result<usize> {
        self.channel.append(data)
    }

    /// Signal end-of-input. Consumes the writer, so a closed writer cannot
    /// be written to again; bytes already accepted remain readable.
    pub fn close(mut self) {
        self.closed = true;
        self.channel.close();
    }

    /// Bytes accepted so far.
    pub fn bytes_written(&self) -> u64 {
        self.channel.total_written()
    }

    /// Record a producer-side failure on the channel.
    pub(crate) fn fail(&self, err: StreamError) {
        self.channel.fail(err);
    }
}

impl Write for StreamWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.push(buf).map_err(io::Error::from)
    }

    /// Nothing is buffered at this layer; batching lives in
    /// [`BatchWriter`](crate::BatchWriter).
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for StreamWriter {
    fn drop(&mut self) {
        if !self.closed {
            self.channel.fail_disconnected_producer();
        }
    }
}
