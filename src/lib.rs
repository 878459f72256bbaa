//! syphon - synchronized streaming handoff between a push-style producer
//! and a pull-style consumer.
//!
//! Bulk-transfer clients (multipart uploaders, archive writers) want a
//! file-like source they can read in large windows; data often arrives
//! instead as a stream of small fragments. syphon bridges the two without
//! landing the payload on disk or in one giant allocation:
//!
//! ```text
//! fragments ──► BatchWriter ──► ByteChannel ──► StreamReader ──► windows
//!               (adaptive        (bounded,        (file-like
//!                batching)        blocking)        reads)
//! ```
//!
//! [`Transfer`] wires the pieces together: it spawns the external blocking
//! routine on its own thread, hands the caller the opposite facade, and
//! reconciles both outcomes when the routine is joined. Memory stays
//! bounded by the outstanding cap plus one fragment, and a failure on
//! either side reaches the other within one blocking call.
//!
//! # Example
//!
//! ```
//! use std::io::Read;
//! use syphon::{Transfer, TransferConfig};
//!
//! # fn main() -> syphon::Result<()> {
//! let transfer = Transfer::new(TransferConfig::default());
//!
//! // The "upload": a blocking routine that drains the stream in windows.
//! let (mut writer, handle) = transfer.push(11, |mut reader| {
//!     let mut sink = Vec::new();
//!     reader.read_to_end(&mut sink)?;
//!     Ok(sink)
//! })?;
//!
//! // Fragments arrive on the caller's side.
//! writer.push(b"hello ")?;
//! writer.push(b"world")?;
//! writer.finish()?;
//!
//! let outcome = handle.join()?;
//! assert_eq!(outcome.value, b"hello world".to_vec());
//! assert_eq!(outcome.stats.bytes_written, 11);
//! # Ok(())
//! # }
//! ```
//!
//! With the `async` feature (on by default), [`Transfer::push_stream`] and
//! [`Transfer::push_reader`] feed the same machinery from async sources
//! without blocking the runtime.

pub mod batch;
pub mod channel;
pub mod config;
pub mod error;
#[cfg(feature = "async")]
mod pipeline;
pub mod reader;
pub mod transfer;
pub mod writer;

pub use batch::BatchWriter;
pub use channel::{byte_channel, ByteChannel};
pub use config::{
    TransferConfig, DEFAULT_BASE_UNIT, DEFAULT_MAX_MULTIPLIER, DEFAULT_OUTSTANDING_CAP,
};
pub use error::{Result, StreamError};
pub use reader::{Chunks, StreamReader};
pub use transfer::{Transfer, TransferHandle, TransferOutcome, TransferStats};
pub use writer::StreamWriter;
