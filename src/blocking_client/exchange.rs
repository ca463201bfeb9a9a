use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::sync::atomic::Ordering;

use http::{StatusCode, Uri};
use tracing::debug;

use crate::body::{BodyCopier, BodyLength, COPY_BUFFER_SIZE};
use crate::error::{HostCopyError, IoPhase};
use crate::pool::{ConnectionPool, PooledConnection, Transport};
use crate::request::{ForcedClose, Request, WriteOptions};
use crate::response::Response;
use crate::sink::LimitedWriter;

use super::HostClient;

/// Outcome of one failed exchange: the error, and whether another attempt on
/// a fresh connection could succeed.
#[derive(Debug)]
pub(crate) struct AttemptFailure {
    pub(crate) retryable: bool,
    pub(crate) error: HostCopyError,
}

impl AttemptFailure {
    fn retryable(error: HostCopyError) -> Self {
        Self {
            retryable: true,
            error,
        }
    }

    fn terminal(error: HostCopyError) -> Self {
        Self {
            retryable: false,
            error,
        }
    }
}

impl<P: ConnectionPool> HostClient<P> {
    /// Runs one request/response round trip on one pooled connection.
    ///
    /// The connection is back in the pool or closed by the time this returns.
    pub(crate) fn exchange<W: Write + ?Sized>(
        &self,
        request: &mut Request,
        response: &mut Response,
        sink: &mut W,
    ) -> Result<(), AttemptFailure> {
        self.check_scheme(request.uri())
            .map_err(AttemptFailure::terminal)?;

        self.touch_last_use();

        response.reset();
        let caller_skip_body = response.skip_body();

        let mut connection = self
            .pool
            .acquire(request.request_timeout())
            .map_err(|source| AttemptFailure::retryable(HostCopyError::Acquire { source }))?;

        if let Some(write_timeout) = self.write_timeout
            && let Err(source) = connection
                .transport_mut()
                .set_write_timeout(Some(write_timeout))
        {
            self.close_connection(connection);
            return Err(AttemptFailure::retryable(HostCopyError::Deadline {
                phase: IoPhase::Write,
                source,
            }));
        }

        let expired = self
            .max_conn_duration
            .is_some_and(|max_conn_duration| connection.age() > max_conn_duration);
        let forced_close = {
            let mut request = ForcedClose::new(request, expired);
            let written = self.write_request(&mut request, connection.transport_mut());
            let forced = request.forced();
            drop(request);
            if let Err(source) = written {
                self.close_connection(connection);
                return Err(AttemptFailure::retryable(HostCopyError::WriteRequest {
                    source,
                }));
            }
            forced
        };

        if let Some(read_timeout) = self.read_timeout
            && let Err(source) = connection
                .transport_mut()
                .set_read_timeout(Some(read_timeout))
        {
            self.close_connection(connection);
            return Err(AttemptFailure::retryable(HostCopyError::Deadline {
                phase: IoPhase::Read,
                source,
            }));
        }

        let head_request = request.is_head();
        let skip_body = caller_skip_body || head_request;

        let mut reader = BufReader::with_capacity(COPY_BUFFER_SIZE, connection.transport_mut());
        let received = self.read_response(&mut reader, response, sink, skip_body, head_request);
        drop(reader);
        if let Err(error) = received {
            self.close_connection(connection);
            // The same body would blow the same limit again.
            let retryable = !matches!(error, HostCopyError::BodyTooLarge { .. });
            return Err(AttemptFailure { retryable, error });
        }

        if forced_close || request.connection_close() || response.connection_close() {
            debug!(
                forced = forced_close,
                status = response.status().as_u16(),
                "closing connection after exchange"
            );
            self.close_connection(connection);
        } else {
            self.release_connection(connection);
        }
        Ok(())
    }

    fn check_scheme(&self, uri: &Uri) -> Result<(), HostCopyError> {
        let scheme = uri.scheme_str().unwrap_or_default();
        let is_https = scheme.eq_ignore_ascii_case("https");
        if is_https == self.tls {
            return Ok(());
        }
        Err(HostCopyError::SchemeMismatch {
            scheme: scheme.to_owned(),
            expected: if self.tls { "https" } else { "http" },
        })
    }

    fn touch_last_use(&self) {
        let elapsed_ms = self.started_at.elapsed().as_millis().min(u64::MAX as u128) as u64;
        self.last_use_ms.store(elapsed_ms, Ordering::Relaxed);
    }

    fn write_request(
        &self,
        request: &mut Request,
        transport: &mut P::Transport,
    ) -> io::Result<()> {
        let options = WriteOptions {
            user_agent: &self.client_name,
            normalize_header_names: self.normalize_header_names,
            normalize_path: self.normalize_path,
        };
        let mut writer = BufWriter::with_capacity(COPY_BUFFER_SIZE, transport);
        request.write_to(&mut writer, &options)?;
        writer.flush()
    }

    fn read_response<R, W>(
        &self,
        reader: &mut R,
        response: &mut Response,
        sink: &mut W,
        skip_body: bool,
        head_request: bool,
    ) -> Result<(), HostCopyError>
    where
        R: BufRead + ?Sized,
        W: Write + ?Sized,
    {
        response.read_head(reader)?;
        if response.status() == StatusCode::CONTINUE {
            response.read_head(reader)?;
        }

        // The HEAD skip lives only in `skip_body`; the caller's flag on
        // `response` is left as they set it.
        if skip_body || response.status_forbids_body() {
            // A skipped body that is really on the wire would poison the next
            // exchange on this connection.
            if !head_request
                && !response.status_forbids_body()
                && !matches!(response.body_framing(), Ok(BodyLength::Fixed(0)))
            {
                response.force_connection_close();
            }
            return Ok(());
        }

        let framing = response.body_framing()?;
        if framing == BodyLength::CloseDelimited {
            response.force_connection_close();
        }

        let mut copier = BodyCopier::new();
        let copied = match self.max_response_body_bytes {
            Some(max_bytes) => copier.copy(
                reader,
                framing,
                &mut LimitedWriter::new(&mut *sink, max_bytes),
            ),
            None => copier.copy(reader, framing, sink),
        };
        response.set_body_length(copier.copied());
        copied.map(|_| ())
    }

    fn release_connection(&self, connection: PooledConnection<P::Transport>) {
        self.metrics.record_connection_released();
        self.pool.release(connection);
    }

    fn close_connection(&self, connection: PooledConnection<P::Transport>) {
        self.metrics.record_connection_closed();
        self.pool.close(connection);
    }
}
