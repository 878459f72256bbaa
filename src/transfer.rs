//! Transfer coordination.
//!
//! A transfer pairs the caller with an external blocking routine (an upload
//! call that pulls windows, or a download call that pushes fragments). The
//! coordinator spawns the routine on its own thread, hands the caller the
//! matching facade, and reconciles both outcomes at join time:
//!
//! ```text
//! push (upload)                       pull (download)
//! ─────────────                       ───────────────
//! caller ──► BatchWriter ─┐           spawned ──► BatchWriter ─┐
//!                         ├─ channel                           ├─ channel
//! spawned ◄─ StreamReader ┘           caller ◄── StreamReader ─┘
//! ```
//!
//! The routine's return value travels back over a one-slot channel so the
//! coordinator can wait with a deadline; the thread itself is reaped after
//! the result arrives.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError};
use tracing::debug;

use crate::batch::BatchWriter;
use crate::channel::ByteChannel;
use crate::config::TransferConfig;
use crate::error::{Result, StreamError};
use crate::reader::StreamReader;
use crate::writer::StreamWriter;

/// Which side the spawned routine plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    /// Caller produces, spawned routine consumes.
    Push,
    /// Spawned routine produces, caller consumes.
    Pull,
}

/// Final byte accounting for a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferStats {
    /// Declared size given at spawn time.
    pub bytes_expected: u64,
    /// Bytes the producer actually delivered. Authoritative when the
    /// declared size was wrong.
    pub bytes_written: u64,
    /// Bytes the consumer actually took.
    pub bytes_read: u64,
}

/// Value and accounting returned by a successful transfer.
#[derive(Debug)]
pub struct TransferOutcome<T> {
    /// Whatever the external routine returned.
    pub value: T,
    pub stats: TransferStats,
}

/// Coordinator for streaming handoffs.
///
/// One `Transfer` is a reusable recipe (config only); each
/// [`push`](Transfer::push) or [`pull`](Transfer::pull) call sets up an
/// independent channel, facade pair and routine thread.
pub struct Transfer {
    config: TransferConfig,
}

impl Transfer {
    pub fn new(config: TransferConfig) -> Self {
        Self { config }
    }

    /// Upload direction: spawn `consume` against the read side and hand the
    /// caller the batching write side.
    ///
    /// The routine must drain the stream to end-of-stream and return; the
    /// caller pushes fragments and then calls [`BatchWriter::finish`]
    /// followed by [`TransferHandle::join`]. A routine that returns before
    /// the stream has closed and drained is reported as a consumer failure.
    pub fn push<F, T>(&self, expected: u64, consume: F) -> Result<(BatchWriter, TransferHandle<T>)>
    where
        F: FnOnce(StreamReader) -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        self.config.validate()?;
        let channel = ByteChannel::new(expected, self.config.outstanding_cap);
        let reader = StreamReader::new(Arc::clone(&channel));

        let handle = spawn_routine(
            Arc::clone(&channel),
            Direction::Push,
            "syphon-consumer",
            move || consume(reader).map_err(StreamError::consumer),
        )?;

        let writer = BatchWriter::new(StreamWriter::new(channel), &self.config);
        Ok((writer, handle))
    }

    /// Download direction: spawn `produce` against the batching write side
    /// and hand the caller the read side.
    ///
    /// The routine must call [`BatchWriter::finish`] once its input is
    /// exhausted; returning without finishing is reported as a producer
    /// failure. The caller drains the reader and then joins the handle.
    pub fn pull<F, T>(&self, expected: u64, produce: F) -> Result<(StreamReader, TransferHandle<T>)>
    where
        F: FnOnce(BatchWriter) -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        self.config.validate()?;
        let channel = ByteChannel::new(expected, self.config.outstanding_cap);
        let writer = BatchWriter::new(StreamWriter::new(Arc::clone(&channel)), &self.config);

        let handle = spawn_routine(
            Arc::clone(&channel),
            Direction::Pull,
            "syphon-producer",
            move || produce(writer).map_err(StreamError::producer),
        )?;

        Ok((StreamReader::new(channel), handle))
    }
}

fn spawn_routine<T, F>(
    channel: Arc<ByteChannel>,
    direction: Direction,
    name: &str,
    routine: F,
) -> Result<TransferHandle<T>>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    let (result_tx, result_rx) = bounded(1);
    let thread = thread::Builder::new()
        .name(name.to_string())
        .spawn(move || {
            // Errors also reach the channel through facade drops inside the
            // routine; send may fail only if the handle was abandoned.
            let _ = result_tx.send(routine());
        })
        .map_err(|err| match direction {
            Direction::Push => {
                StreamError::consumer(anyhow::anyhow!("failed to spawn {name} thread: {err}"))
            }
            Direction::Pull => {
                StreamError::producer(anyhow::anyhow!("failed to spawn {name} thread: {err}"))
            }
        })?;
    debug!(?direction, thread = name, "transfer routine spawned");

    Ok(TransferHandle {
        channel,
        direction,
        result: result_rx,
        thread: Some(thread),
    })
}

/// Handle to the spawned routine.
///
/// Joining returns the routine's value only if the stream also finished
/// cleanly; a failure recorded on the channel outranks a successful-looking
/// routine (a consumer that bailed early, for instance).
pub struct TransferHandle<T> {
    channel: Arc<ByteChannel>,
    direction: Direction,
    result: Receiver<Result<T>>,
    thread: Option<thread::JoinHandle<()>>,
}

impl<T> TransferHandle<T> {
    /// Wait for the routine to finish and reconcile both sides' outcomes.
    pub fn join(mut self) -> Result<TransferOutcome<T>> {
        let result = match self.result.recv() {
            Ok(result) => result,
            Err(_) => Err(self.panic_error()),
        };
        self.reconcile(result)
    }

    /// Like [`join`](Self::join), but give up after `timeout`.
    ///
    /// On expiry the channel is failed with [`StreamError::Stalled`] and
    /// the routine thread is left to observe that failure on its next
    /// blocking call; it exits on its own.
    pub fn join_timeout(mut self, timeout: Duration) -> Result<TransferOutcome<T>> {
        let result = match self.result.recv_timeout(timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => {
                self.channel.fail(StreamError::Stalled);
                self.thread.take();
                return Err(StreamError::Stalled);
            }
            Err(RecvTimeoutError::Disconnected) => Err(self.panic_error()),
        };
        self.reconcile(result)
    }

    /// Snapshot of the byte counters.
    pub fn stats(&self) -> TransferStats {
        TransferStats {
            bytes_expected: self.channel.total_expected(),
            bytes_written: self.channel.total_written(),
            bytes_read: self.channel.total_read(),
        }
    }

    fn reconcile(mut self, result: Result<T>) -> Result<TransferOutcome<T>> {
        self.reap();
        match result {
            Err(err) => {
                // The routine's own error is authoritative; make sure it is
                // also recorded so a still-active peer unblocks.
                self.channel.fail(err.clone());
                Err(err)
            }
            Ok(value) => match self.channel.error() {
                Some(err) => Err(err),
                None => {
                    let stats = self.stats();
                    debug!(
                        direction = ?self.direction,
                        bytes_written = stats.bytes_written,
                        bytes_read = stats.bytes_read,
                        "transfer complete"
                    );
                    Ok(TransferOutcome { value, stats })
                }
            },
        }
    }

    // The routine exited without reporting, i.e. it panicked. Facade drops
    // during the unwind normally record the failure; fall back to a generic
    // error for the rare panic after a clean finish.
    fn panic_error(&self) -> StreamError {
        if let Some(err) = self.channel.error() {
            return err;
        }
        match self.direction {
            Direction::Push => StreamError::consumer(anyhow::anyhow!("consumer routine panicked")),
            Direction::Pull => StreamError::producer(anyhow::anyhow!("producer routine panicked")),
        }
    }

    fn reap(&mut self) {
        if let Some(thread) = self.thread.take() {
            // Result already delivered (or the sender is gone), so this join
            // is bounded. A panic payload was already mapped to an error.
            let _ = thread.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    fn small_config() -> TransferConfig {
        TransferConfig {
            base_unit: 8,
            max_multiplier: 4,
            outstanding_cap: Some(64),
        }
    }

    // ========================================================================
    // Push direction
    // ========================================================================

    #[test]
    fn test_push_round_trip() {
        let transfer = Transfer::new(small_config());
        let (mut writer, handle) = transfer
            .push(20, |mut reader| {
                let mut sink = Vec::new();
                reader.read_to_end(&mut sink)?;
                Ok(sink)
            })
            .unwrap();

        writer.push(b"five!").unwrap();
        writer.push(b"five!").unwrap();
        writer.push(b"five!").unwrap();
        writer.push(b"five!").unwrap();
        writer.finish().unwrap();

        let outcome = handle.join().unwrap();
        assert_eq!(outcome.value.len(), 20);
        assert_eq!(outcome.stats.bytes_expected, 20);
        assert_eq!(outcome.stats.bytes_written, 20);
        assert_eq!(outcome.stats.bytes_read, 20);
    }

    #[test]
    fn test_push_consumer_error() {
        let transfer = Transfer::new(small_config());
        let (mut writer, handle) = transfer
            .push(1000, |mut reader| -> anyhow::Result<()> {
                let mut window = [0u8; 16];
                reader.read(&mut window)?;
                anyhow::bail!("part upload rejected")
            })
            .unwrap();

        // The writer eventually observes the failure too.
        let mut writer_err = None;
        for _ in 0..1000 {
            match writer.push(&[0u8; 16]) {
                Ok(_) => continue,
                Err(err) => {
                    writer_err = Some(err);
                    break;
                }
            }
        }
        assert!(matches!(writer_err, Some(StreamError::Consumer(_))));

        drop(writer);
        let err = handle.join().unwrap_err();
        assert_eq!(err.to_string(), "consumer failed: part upload rejected");
    }

    #[test]
    fn test_consumer_early_return() {
        let transfer = Transfer::new(small_config());
        let (mut writer, handle) = transfer
            .push(1000, |mut reader| {
                let mut window = [0u8; 8];
                reader.read(&mut window)?;
                // Returns while the stream is still open.
                Ok(())
            })
            .unwrap();

        let _ = writer.push(&[1u8; 8]);
        let err = handle.join().unwrap_err();
        assert!(matches!(err, StreamError::Consumer(_)));
        drop(writer);
    }

    #[test]
    fn test_consumer_panic() {
        let transfer = Transfer::new(small_config());
        let (mut writer, handle) = transfer
            .push(1000, |_reader| -> anyhow::Result<()> {
                panic!("boom");
            })
            .unwrap();

        let _ = writer.push(&[1u8; 8]);
        // Join while the writer is still alive, so the only failure the
        // channel can carry is the consumer-side one.
        assert!(matches!(handle.join(), Err(StreamError::Consumer(_))));
        drop(writer);
    }

    // ========================================================================
    // Pull direction
    // ========================================================================

    #[test]
    fn test_pull_round_trip() {
        let transfer = Transfer::new(small_config());
        let (mut reader, handle) = transfer
            .pull(12, |mut writer| {
                writer.push(b"abcd")?;
                writer.push(b"efgh")?;
                writer.push(b"ijkl")?;
                let remainder = writer.finish()?;
                Ok(remainder)
            })
            .unwrap();

        let mut sink = Vec::new();
        reader.read_to_end(&mut sink).unwrap();
        assert_eq!(sink, b"abcdefghijkl");

        let outcome = handle.join().unwrap();
        assert_eq!(outcome.stats.bytes_read, 12);
        drop(reader);
    }

    #[test]
    fn test_pull_producer_error() {
        let transfer = Transfer::new(small_config());
        let (mut reader, handle) = transfer
            .pull(64, |mut writer| -> anyhow::Result<()> {
                writer.push(b"partial")?;
                anyhow::bail!("source connection lost")
            })
            .unwrap();

        let mut sink = Vec::new();
        assert!(reader.read_to_end(&mut sink).is_err());
        drop(reader);

        let err = handle.join().unwrap_err();
        assert_eq!(err.to_string(), "producer failed: source connection lost");
    }

    #[test]
    fn test_producer_missing_finish() {
        let transfer = Transfer::new(small_config());
        let (reader, handle) = transfer
            .pull(4, |mut writer| {
                writer.push(b"oops")?;
                Ok(())
            })
            .unwrap();

        // Join before touching the reader, so the failure on the channel is
        // the producer disconnect and not a consumer one.
        assert!(matches!(handle.join(), Err(StreamError::Producer(_))));
        drop(reader);
    }

    // ========================================================================
    // Join semantics
    // ========================================================================

    #[test]
    fn test_join_timeout_stalled() {
        let transfer = Transfer::new(small_config());
        // Consumer blocks forever waiting for data the caller never sends.
        let (mut writer, handle) = transfer
            .push(100, |mut reader| {
                let mut sink = Vec::new();
                reader.read_to_end(&mut sink)?;
                Ok(())
            })
            .unwrap();

        let err = handle.join_timeout(Duration::from_millis(50)).unwrap_err();
        assert!(matches!(err, StreamError::Stalled));

        // The routine observes the stall on its next read and exits; a
        // threshold-sized push sees the same failure instead of blocking.
        assert!(matches!(writer.push(&[0u8; 8]), Err(StreamError::Stalled)));
        drop(writer);
    }

    #[test]
    fn test_stats_snapshot() {
        let transfer = Transfer::new(small_config());
        let (mut writer, handle) = transfer
            .push(16, |mut reader| {
                let mut sink = Vec::new();
                reader.read_to_end(&mut sink)?;
                Ok(())
            })
            .unwrap();

        assert_eq!(handle.stats().bytes_expected, 16);
        writer.push(&[0u8; 16]).unwrap();
        writer.finish().unwrap();
        let outcome = handle.join().unwrap();
        assert_eq!(outcome.stats.bytes_written, 16);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let transfer = Transfer::new(TransferConfig {
            base_unit: 0,
            ..Default::default()
        });
        let result = transfer.push(0, |_reader| Ok(()));
        assert!(matches!(result, Err(StreamError::Config(_))));
    }
}
