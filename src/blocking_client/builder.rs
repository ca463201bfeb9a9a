use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::time::{Duration, Instant};

use crate::metrics::HostClientMetrics;
use crate::pool::ConnectionPool;
use crate::request::Request;
use crate::retry::{RetryEligibility, StrictRetryEligibility};

use super::{DEFAULT_CLIENT_NAME, DEFAULT_MAX_ATTEMPTS, HostClient};

pub struct HostClientBuilder<P> {
    pool: P,
    tls: bool,
    max_attempts: usize,
    retry_eligibility: Arc<dyn RetryEligibility>,
    read_timeout: Option<Duration>,
    write_timeout: Option<Duration>,
    max_conn_duration: Option<Duration>,
    max_response_body_bytes: Option<u64>,
    client_name: String,
    normalize_header_names: bool,
    normalize_path: bool,
}

impl<P: ConnectionPool> HostClientBuilder<P> {
    pub(crate) fn new(pool: P) -> Self {
        Self {
            pool,
            tls: false,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_eligibility: Arc::new(StrictRetryEligibility),
            read_timeout: None,
            write_timeout: None,
            max_conn_duration: None,
            max_response_body_bytes: None,
            client_name: DEFAULT_CLIENT_NAME.to_owned(),
            normalize_header_names: true,
            normalize_path: true,
        }
    }

    /// Whether the pool speaks TLS. Requests must use `https` exactly when
    /// this is set.
    pub fn tls(mut self, tls: bool) -> Self {
        self.tls = tls;
        self
    }

    /// Total attempts per call, first one included. Zero restores the default.
    pub fn max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = if max_attempts == 0 {
            DEFAULT_MAX_ATTEMPTS
        } else {
            max_attempts
        };
        self
    }

    pub fn retry_eligibility(mut self, retry_eligibility: Arc<dyn RetryEligibility>) -> Self {
        self.retry_eligibility = retry_eligibility;
        self
    }

    pub fn retry_if<F>(self, predicate: F) -> Self
    where
        F: Fn(&Request) -> bool + Send + Sync + 'static,
    {
        self.retry_eligibility(Arc::new(predicate))
    }

    pub fn read_timeout(mut self, read_timeout: Duration) -> Self {
        self.read_timeout = Some(read_timeout.max(Duration::from_millis(1)));
        self
    }

    pub fn write_timeout(mut self, write_timeout: Duration) -> Self {
        self.write_timeout = Some(write_timeout.max(Duration::from_millis(1)));
        self
    }

    /// Connections older than this are closed after their next exchange.
    pub fn max_conn_duration(mut self, max_conn_duration: Duration) -> Self {
        self.max_conn_duration = Some(max_conn_duration);
        self
    }

    pub fn max_response_body_bytes(mut self, max_response_body_bytes: u64) -> Self {
        self.max_response_body_bytes = Some(max_response_body_bytes);
        self
    }

    /// Sent as `User-Agent` when a request does not carry one.
    pub fn client_name(mut self, client_name: impl Into<String>) -> Self {
        self.client_name = client_name.into();
        self
    }

    pub fn normalize_header_names(mut self, normalize_header_names: bool) -> Self {
        self.normalize_header_names = normalize_header_names;
        self
    }

    pub fn normalize_path(mut self, normalize_path: bool) -> Self {
        self.normalize_path = normalize_path;
        self
    }

    pub fn build(self) -> HostClient<P> {
        HostClient {
            pool: self.pool,
            tls: self.tls,
            max_attempts: self.max_attempts,
            retry_eligibility: self.retry_eligibility,
            read_timeout: self.read_timeout,
            write_timeout: self.write_timeout,
            max_conn_duration: self.max_conn_duration,
            max_response_body_bytes: self.max_response_body_bytes,
            client_name: self.client_name,
            normalize_header_names: self.normalize_header_names,
            normalize_path: self.normalize_path,
            metrics: HostClientMetrics::default(),
            started_at: Instant::now(),
            last_use_ms: AtomicU64::new(0),
        }
    }
}
