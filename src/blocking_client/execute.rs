use std::io::Write;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use tracing::{debug, info_span, warn};

use crate::HostCopyResult;
use crate::error::HostCopyError;
use crate::metrics::HostClientMetricsSnapshot;
use crate::pool::ConnectionPool;
use crate::request::Request;
use crate::response::Response;
use crate::util::redact_uri_for_logs;

use super::{HostClient, HostClientBuilder};

impl<P: ConnectionPool> HostClient<P> {
    pub fn builder(pool: P) -> HostClientBuilder<P> {
        HostClientBuilder::new(pool)
    }

    pub fn pool(&self) -> &P {
        &self.pool
    }

    pub fn is_tls(&self) -> bool {
        self.tls
    }

    pub fn client_name(&self) -> &str {
        &self.client_name
    }

    pub fn max_attempts(&self) -> usize {
        self.max_attempts
    }

    /// Calls currently inside [`HostClient::do_copy`], across all threads.
    pub fn pending_requests(&self) -> u64 {
        self.metrics.pending()
    }

    pub fn metrics_snapshot(&self) -> HostClientMetricsSnapshot {
        self.metrics.snapshot()
    }

    /// When the last exchange started, or when the client was built if it
    /// has not been used yet.
    pub fn last_use_time(&self) -> Instant {
        let elapsed_ms = self.last_use_ms.load(Ordering::Relaxed);
        self.started_at + Duration::from_millis(elapsed_ms)
    }

    /// Sends `request` and streams the response body into `sink`, retrying on
    /// fresh connections while it is safe to do so.
    ///
    /// When `response` is `None` the status and headers are discarded. Bytes
    /// written to `sink` by a failed attempt are not rolled back.
    pub fn do_copy<W: Write + ?Sized>(
        &self,
        request: &mut Request,
        response: Option<&mut Response>,
        sink: &mut W,
    ) -> HostCopyResult<()> {
        let mut scratch = Response::new();
        let response = response.unwrap_or(&mut scratch);

        let retry_supported = self.retry_eligibility.supports_retry(request);
        let has_body_stream = request.is_body_stream();
        let redacted_uri_text = redact_uri_for_logs(&request.uri().to_string());

        let _pending = self.metrics.enter_pending();
        let mut attempts = 0_usize;
        let result = loop {
            let span = info_span!(
                "hostcopy.request",
                client = %self.client_name,
                method = %request.method(),
                uri = %redacted_uri_text,
                attempt = attempts + 1,
                max_attempts = self.max_attempts
            );
            let _entered = span.enter();
            debug!("sending request");

            let failure = match self.exchange(request, response, sink) {
                Ok(()) => break Ok(()),
                Err(failure) => failure,
            };
            if !failure.retryable || has_body_stream {
                break Err(failure.error);
            }
            // Servers drop idle keep-alive connections whenever they like;
            // that race is safe to retry even when the method is not.
            if !retry_supported && !failure.error.is_peer_closed() {
                break Err(failure.error);
            }
            attempts += 1;
            if attempts >= self.max_attempts {
                break Err(failure.error);
            }
            warn!(error = %failure.error, "retrying request after failed attempt");
            self.metrics.record_retry();
        };

        let result = result.map_err(|error| {
            if error.is_peer_closed() {
                HostCopyError::ConnectionClosed
            } else {
                error
            }
        });
        self.metrics.record_request_completed(&result);
        result
    }

    /// Owned-request form of [`HostClient::do_copy`] that hands back the
    /// response metadata.
    pub fn copy<W: Write + ?Sized>(
        &self,
        mut request: Request,
        sink: &mut W,
    ) -> HostCopyResult<Response> {
        let mut response = Response::new();
        self.do_copy(&mut request, Some(&mut response), sink)?;
        Ok(response)
    }
}
