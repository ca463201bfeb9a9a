use std::io::{self, Write};

use crate::error::HostCopyError;

/// Marker carried inside an [`io::Error`] when a [`LimitedWriter`] refuses
/// bytes past its limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BodyTooLarge {
    pub limit_bytes: u64,
}

impl std::fmt::Display for BodyTooLarge {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            formatter,
            "body exceeds maximum size of {} bytes",
            self.limit_bytes
        )
    }
}

impl std::error::Error for BodyTooLarge {}

impl BodyTooLarge {
    pub fn into_io_error(self) -> io::Error {
        io::Error::other(self)
    }
}

pub(crate) fn wrapped_body_too_large(io_error: &io::Error) -> Option<BodyTooLarge> {
    io_error
        .get_ref()
        .and_then(|source| source.downcast_ref::<BodyTooLarge>())
        .copied()
}

/// Maps a sink failure onto the crate error, keeping the size-limit signal
/// distinguishable from ordinary I/O.
pub(crate) fn sink_error(io_error: io::Error) -> HostCopyError {
    match wrapped_body_too_large(&io_error) {
        Some(BodyTooLarge { limit_bytes }) => HostCopyError::BodyTooLarge { limit_bytes },
        None => HostCopyError::WriteBody { source: io_error },
    }
}

/// A sink that accepts at most `max_bytes` and then rejects every write with
/// a [`BodyTooLarge`] error.
///
/// Bytes accepted before the limit was hit stay written.
#[derive(Debug)]
pub struct LimitedWriter<W> {
    inner: W,
    max_bytes: u64,
    written: u64,
}

impl<W: Write> LimitedWriter<W> {
    pub fn new(inner: W, max_bytes: u64) -> Self {
        Self {
            inner,
            max_bytes,
            written: 0,
        }
    }

    pub fn written(&self) -> u64 {
        self.written
    }

    pub fn max_bytes(&self) -> u64 {
        self.max_bytes
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> Write for LimitedWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let incoming = buf.len() as u64;
        if self.written.saturating_add(incoming) > self.max_bytes {
            return Err(BodyTooLarge {
                limit_bytes: self.max_bytes,
            }
            .into_io_error());
        }
        let written = self.inner.write(buf)?;
        self.written += written as u64;
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}
