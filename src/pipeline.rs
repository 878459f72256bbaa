//! Async producer bridge.
//!
//! The handoff core is deliberately blocking, which keeps the external
//! routine's thread simple but would stall an async worker. These helpers
//! keep the blocking edges off the runtime: the routine already runs on its
//! own thread, and every writer operation that may wait on backpressure is
//! shipped through [`tokio::task::spawn_blocking`], moving the writer into
//! the closure and back out with the result.

use bytes::Bytes;
use futures::{Stream, StreamExt};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::task;

use crate::batch::BatchWriter;
use crate::error::{Result, StreamError};
use crate::reader::StreamReader;
use crate::transfer::{Transfer, TransferHandle, TransferOutcome};

/// Window size for draining an [`AsyncRead`] source.
const READ_CHUNK_SIZE: usize = 64 * 1024;

impl Transfer {
    /// Upload, feeding the stream from an async source of fragments.
    ///
    /// Fragments are pushed in order; the source ending cleanly finishes
    /// the writer and joins the routine. A source error fails the channel
    /// as a producer failure, waits out the routine, and is returned in
    /// preference to whatever the routine reported.
    pub async fn push_stream<S, E, F, T>(
        &self,
        expected: u64,
        mut source: S,
        consume: F,
    ) -> Result<TransferOutcome<T>>
    where
        S: Stream<Item = std::result::Result<Bytes, E>> + Unpin,
        E: Into<anyhow::Error>,
        F: FnOnce(StreamReader) -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let (mut writer, handle) = self.push(expected, consume)?;
        let feed = async {
            while let Some(item) = source.next().await {
                let fragment = match item {
                    Ok(fragment) => fragment,
                    Err(err) => {
                        let err = StreamError::producer(err);
                        writer.fail(err.clone());
                        return Err(err);
                    }
                };
                writer = push_fragment(writer, fragment).await?;
            }
            finish(writer).await
        }
        .await;
        join_after_feed(handle, feed).await
    }

    /// Upload, feeding the stream from an async byte reader.
    ///
    /// The reader is drained in windows of up to 64 KiB; otherwise this
    /// behaves like [`push_stream`](Transfer::push_stream).
    pub async fn push_reader<R, F, T>(
        &self,
        expected: u64,
        mut source: R,
        consume: F,
    ) -> Result<TransferOutcome<T>>
    where
        R: AsyncRead + Unpin,
        F: FnOnce(StreamReader) -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let (mut writer, handle) = self.push(expected, consume)?;
        let feed = async {
            let mut buf = vec![0u8; READ_CHUNK_SIZE];
            loop {
                let n = match source.read(&mut buf).await {
                    Ok(0) => break,
                    Ok(n) => n,
                    Err(err) => {
                        let err = StreamError::producer(err);
                        writer.fail(err.clone());
                        return Err(err);
                    }
                };
                let fragment = Bytes::copy_from_slice(&buf[..n]);
                writer = push_fragment(writer, fragment).await?;
            }
            finish(writer).await
        }
        .await;
        join_after_feed(handle, feed).await
    }
}

// Pushing can block on backpressure, so it runs off the async worker. The
// writer travels into the closure and back with the result.
async fn push_fragment(writer: BatchWriter, fragment: Bytes) -> Result<BatchWriter> {
    match task::spawn_blocking(move || {
        let mut writer = writer;
        writer.push(&fragment)?;
        Ok::<_, StreamError>(writer)
    })
    .await
    {
        Ok(result) => result,
        Err(err) => Err(StreamError::producer(anyhow::anyhow!(
            "feed task failed: {err}"
        ))),
    }
}

async fn finish(writer: BatchWriter) -> Result<u64> {
    match task::spawn_blocking(move || writer.finish()).await {
        Ok(result) => result,
        Err(err) => Err(StreamError::producer(anyhow::anyhow!(
            "finish task failed: {err}"
        ))),
    }
}

// Joining blocks until the routine reports, so it runs off the async worker
// too. After a feed failure the routine has already been woken by the
// recorded error; its own result is drained and the feed error wins.
async fn join_after_feed<T: Send + 'static>(
    handle: TransferHandle<T>,
    feed: Result<u64>,
) -> Result<TransferOutcome<T>> {
    match feed {
        Ok(_) => match task::spawn_blocking(move || handle.join()).await {
            Ok(outcome) => outcome,
            Err(err) => Err(StreamError::consumer(anyhow::anyhow!(
                "join task failed: {err}"
            ))),
        },
        Err(err) => {
            let _ = task::spawn_blocking(move || handle.join()).await;
            Err(err)
        }
    }
}
