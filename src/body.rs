//! Response body transport.
//!
//! Bodies are copied from a buffered source straight into the caller's sink
//! through one bounded scratch buffer, never collected in memory.

use std::io::{self, BufRead, Write};

use crate::chunk::parse_chunk_size;
use crate::error::HostCopyError;
use crate::sink::sink_error;

pub const COPY_BUFFER_SIZE: usize = 4096;

const CLOSE_DELIMITED_TARGET: u64 = u64::MAX / 2;

/// How the end of a response body is found on the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BodyLength {
    /// `Content-Length: n`.
    Fixed(u64),
    /// `Transfer-Encoding: chunked`.
    Chunked,
    /// Neither header present: the body runs until the server closes.
    CloseDelimited,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum EndOfStream {
    EndsBody,
    Unexpected,
}

pub struct BodyCopier {
    scratch: Box<[u8; COPY_BUFFER_SIZE]>,
    copied: u64,
}

impl Default for BodyCopier {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for BodyCopier {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("BodyCopier")
            .field("copied", &self.copied)
            .finish()
    }
}

impl BodyCopier {
    pub fn new() -> Self {
        Self {
            scratch: Box::new([0_u8; COPY_BUFFER_SIZE]),
            copied: 0,
        }
    }

    /// Payload bytes handed to the sink by the last [`BodyCopier::copy`],
    /// including a transfer that failed part way.
    pub fn copied(&self) -> u64 {
        self.copied
    }

    /// Copies one body from `source` into `sink` and returns the payload byte
    /// count. Chunk-size lines and chunk CRLFs are not counted.
    pub fn copy<R, W>(
        &mut self,
        source: &mut R,
        length: BodyLength,
        sink: &mut W,
    ) -> Result<u64, HostCopyError>
    where
        R: BufRead + ?Sized,
        W: Write + ?Sized,
    {
        self.copied = 0;
        match length {
            BodyLength::Fixed(expected) => {
                self.copy_sized(source, sink, expected, EndOfStream::Unexpected)?
            }
            BodyLength::CloseDelimited => self.copy_sized(
                source,
                sink,
                CLOSE_DELIMITED_TARGET,
                EndOfStream::EndsBody,
            )?,
            BodyLength::Chunked => self.copy_chunked(source, sink)?,
        }
        Ok(self.copied)
    }

    fn copy_sized<R, W>(
        &mut self,
        source: &mut R,
        sink: &mut W,
        expected: u64,
        end_of_stream: EndOfStream,
    ) -> Result<(), HostCopyError>
    where
        R: BufRead + ?Sized,
        W: Write + ?Sized,
    {
        let mut remaining = expected;
        while remaining > 0 {
            let window = remaining.min(COPY_BUFFER_SIZE as u64) as usize;
            let read = match source.read(&mut self.scratch[..window]) {
                Ok(0) => {
                    return match end_of_stream {
                        EndOfStream::EndsBody => Ok(()),
                        EndOfStream::Unexpected => Err(HostCopyError::UnexpectedEof {
                            expected_bytes: expected,
                            copied_bytes: expected - remaining,
                        }),
                    };
                }
                Ok(read) => read,
                Err(error) if error.kind() == io::ErrorKind::Interrupted => continue,
                Err(source) => return Err(HostCopyError::ReadBody { source }),
            };
            sink.write_all(&self.scratch[..read]).map_err(sink_error)?;
            self.copied += read as u64;
            remaining -= read as u64;
        }
        Ok(())
    }

    fn copy_chunked<R, W>(&mut self, source: &mut R, sink: &mut W) -> Result<(), HostCopyError>
    where
        R: BufRead + ?Sized,
        W: Write + ?Sized,
    {
        let mut crlf = [0_u8; 2];
        loop {
            let chunk_size = parse_chunk_size(source)?;
            self.copy_sized(source, sink, chunk_size, EndOfStream::Unexpected)?;
            source
                .read_exact(&mut crlf)
                .map_err(|source| HostCopyError::ReadBody { source })?;
            if crlf != *b"\r\n" {
                return Err(HostCopyError::ChunkTerminator);
            }
            if chunk_size == 0 {
                return Ok(());
            }
        }
    }
}

/// One-shot form of [`BodyCopier::copy`].
pub fn copy_body<R, W>(source: &mut R, length: BodyLength, sink: &mut W) -> Result<u64, HostCopyError>
where
    R: BufRead + ?Sized,
    W: Write + ?Sized,
{
    BodyCopier::new().copy(source, length, sink)
}
