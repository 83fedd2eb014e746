use std::borrow::Cow;
use std::fmt;
use std::io::{self, Read};

const FETCH_CHUNK: usize = 4096;

/// Bytes backing a bitstream.
///
/// Either a fully materialized buffer (owned or borrowed), or a streaming
/// source that yields bytes in order and may block. Streamed bytes are
/// retained so the cursor can seek backwards to deferred function bodies.
pub enum ByteSource<'a> {
    Buffer(Cow<'a, [u8]>),
    Stream(StreamingBytes),
}

pub struct StreamingBytes {
    reader: Box<dyn Read>,
    bytes: Vec<u8>,
    eof: bool,
}

impl<'a> ByteSource<'a> {
    #[must_use]
    pub fn from_slice(data: &'a [u8]) -> Self {
        Self::Buffer(Cow::Borrowed(data))
    }

    #[must_use]
    pub fn from_vec(data: Vec<u8>) -> Self {
        Self::Buffer(Cow::Owned(data))
    }

    pub fn from_reader(reader: impl Read + 'static) -> Self {
        Self::Stream(StreamingBytes {
            reader: Box::new(reader),
            bytes: Vec::new(),
            eof: false,
        })
    }

    /// Whether this source streams, i.e. whether a module parse should
    /// suspend before the first function body.
    #[must_use]
    pub fn is_streaming(&self) -> bool {
        matches!(self, Self::Stream(_))
    }

    /// Make bytes `..end` available. Returns `false` if the source ends
    /// before `end`.
    pub fn ensure(&mut self, end: usize) -> io::Result<bool> {
        match self {
            Self::Buffer(data) => Ok(end <= data.len()),
            Self::Stream(stream) => {
                while stream.bytes.len() < end && !stream.eof {
                    let mut chunk = [0u8; FETCH_CHUNK];
                    let n = stream.reader.read(&mut chunk)?;
                    if n == 0 {
                        stream.eof = true;
                    } else {
                        stream.bytes.extend_from_slice(&chunk[..n]);
                    }
                }
                Ok(stream.bytes.len() >= end)
            }
        }
    }

    /// Byte at `index`. The index must have been covered by a prior
    /// successful `ensure` call.
    #[inline]
    #[must_use]
    pub fn byte(&self, index: usize) -> u8 {
        match self {
            Self::Buffer(data) => data[index],
            Self::Stream(stream) => stream.bytes[index],
        }
    }

    /// Bytes currently available without touching the reader.
    #[must_use]
    pub fn available(&self) -> usize {
        match self {
            Self::Buffer(data) => data.len(),
            Self::Stream(stream) => stream.bytes.len(),
        }
    }

    /// Copy of a byte range, which must already be ensured.
    #[must_use]
    pub fn copy_range(&self, start: usize, end: usize) -> Vec<u8> {
        match self {
            Self::Buffer(data) => data[start..end].to_vec(),
            Self::Stream(stream) => stream.bytes[start..end].to_vec(),
        }
    }
}

impl fmt::Debug for ByteSource<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Buffer(data) => f.debug_struct("Buffer").field("len", &data.len()).finish(),
            Self::Stream(stream) => f
                .debug_struct("Stream")
                .field("fetched", &stream.bytes.len())
                .field("eof", &stream.eof)
                .finish(),
        }
    }
}
