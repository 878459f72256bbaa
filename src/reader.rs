//! Consumer-facing facade over [`ByteChannel`].

use std::io::{self, Read};
use std::sync::Arc;

use bytes::Bytes;

use crate::channel::ByteChannel;
use crate::error::Result;

/// Pull side of a transfer: sequential, file-like reads over the channel.
///
/// Two read shapes are offered. [`next_chunk`](StreamReader::next_chunk)
/// hands back whatever is pending, up to a limit, without copying. The
/// [`Read`] impl instead fills the caller's buffer completely, blocking for
/// more data as needed, and comes up short only at end-of-stream; windowed
/// bulk consumers rely on full windows until the final one.
///
/// Dropping the reader before the stream has closed and drained records a
/// consumer failure, so a producer mid-write fails fast instead of filling
/// a window nobody will empty. Panics in consumer code unwind through this
/// drop and are reported the same way.
pub struct StreamReader {
    channel: Arc<ByteChannel>,
}

impl StreamReader {
    pub fn new(channel: Arc<ByteChannel>) -> Self {
        Self { channel }
    }

    /// Next window of at most `max` bytes. Blocks while the stream is open
    /// and empty; an empty result means end-of-stream, and every later call
    /// repeats it.
    pub fn next_chunk(&mut self, max: usize) -> Result<Bytes> {
        self.channel.take(max)
    }

    /// Declared payload size, as given when the transfer was set up. The
    /// size estimate a windowed consumer plans its windows around; the
    /// stream itself may carry more or fewer bytes.
    pub fn size(&self) -> u64 {
        self.channel.total_expected()
    }

    /// Bytes handed out so far. Suitable for per-read progress callbacks.
    pub fn bytes_read(&self) -> u64 {
        self.channel.total_read()
    }

    /// Iterate windows of at most `max` bytes until end-of-stream.
    ///
    /// The iterator ends after the end-of-stream read, or after yielding
    /// one error.
    pub fn chunks(self, max: usize) -> Chunks {
        Chunks {
            reader: self,
            max,
            done: false,
        }
    }
}

impl Read for StreamReader {
    /// Fill `buf`, blocking for more data as needed. Returns fewer bytes
    /// than requested only at end-of-stream.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            let chunk = match self.channel.take(buf.len() - filled) {
                Ok(chunk) => chunk,
                // Bytes already copied out stay delivered; the error
                // resurfaces on the next call.
                Err(_) if filled > 0 => break,
                Err(err) => return Err(err.into()),
            };
            if chunk.is_empty() {
                break;
            }
            buf[filled..filled + chunk.len()].copy_from_slice(&chunk);
            filled += chunk.len();
        }
        Ok(filled)
    }
}

impl Drop for StreamReader {
    fn drop(&mut self) {
        self.channel.fail_disconnected_consumer();
    }
}

/// Iterator over [`StreamReader`] windows.
pub struct Chunks {
    reader: StreamReader,
    max: usize,
    done: bool,
}

impl Iterator for Chunks {
    type Item = Result<Bytes>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.reader.next_chunk(self.max) {
            Ok(chunk) if chunk.is_empty() => {
                self.done = true;
                None
            }
            Ok(chunk) => Some(Ok(chunk)),
            Err(err) => {
                self.done = true;
                Some(Err(err))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::byte_channel;
    use crate::error::StreamError;
    use std::thread;

    #[test]
    fn test_next_chunk_partial_window() {
        let (mut writer, mut reader) = byte_channel(3, None);
        writer.push(b"abc").unwrap();
        // Pending is shorter than the limit; the partial window comes back.
        assert_eq!(reader.next_chunk(100).unwrap().as_ref(), b"abc");
        writer.close();
        assert!(reader.next_chunk(100).unwrap().is_empty());
    }

    #[test]
    fn test_read_fills_buffer() {
        let (mut writer, mut reader) = byte_channel(8, None);
        let feeder = thread::spawn(move || {
            writer.push(b"ab").unwrap();
            writer.push(b"cd").unwrap();
            writer.push(b"efgh").unwrap();
            writer.close();
        });

        let mut buf = [0u8; 8];
        assert_eq!(reader.read(&mut buf).unwrap(), 8);
        assert_eq!(&buf, b"abcdefgh");
        assert_eq!(reader.read(&mut buf).unwrap(), 0);
        feeder.join().unwrap();
    }

    #[test]
    fn test_read_short_only_at_eos() {
        let (mut writer, mut reader) = byte_channel(5, None);
        writer.push(b"tail!").unwrap();
        writer.close();

        let mut buf = [0u8; 16];
        assert_eq!(reader.read(&mut buf).unwrap(), 5);
        assert_eq!(&buf[..5], b"tail!");
    }

    #[test]
    fn test_size_and_bytes_read() {
        let (mut writer, mut reader) = byte_channel(1000, None);
        writer.push(&[7u8; 64]).unwrap();
        assert_eq!(reader.size(), 1000);
        assert_eq!(reader.bytes_read(), 0);
        reader.next_chunk(48).unwrap();
        assert_eq!(reader.bytes_read(), 48);
        writer.close();
    }

    #[test]
    fn test_chunks_to_eos() {
        let (mut writer, reader) = byte_channel(6, None);
        writer.push(b"aabbcc").unwrap();
        writer.close();

        let windows: Vec<Bytes> = reader.chunks(2).map(|c| c.unwrap()).collect();
        assert_eq!(windows.len(), 3);
        assert_eq!(windows[0].as_ref(), b"aa");
        assert_eq!(windows[2].as_ref(), b"cc");
    }

    #[test]
    fn test_chunks_error_then_stop() {
        let (writer, reader) = byte_channel(4, None);
        drop(writer);

        let mut iter = reader.chunks(4);
        assert!(matches!(iter.next(), Some(Err(StreamError::Producer(_)))));
        assert!(iter.next().is_none());
    }

    #[test]
    fn test_drop_unfinished_fails_writer() {
        let (mut writer, reader) = byte_channel(16, None);
        writer.push(b"undrained").unwrap();
        drop(reader);
        assert!(matches!(writer.push(b"more"), Err(StreamError::Consumer(_))));
    }
}
