use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::time::{Duration, Instant};

use crate::metrics::HostClientMetrics;
use crate::pool::{ConnectionPool, TcpPool};
use crate::retry::RetryEligibility;

mod builder;
mod exchange;
mod execute;

pub use builder::HostClientBuilder;

const DEFAULT_MAX_ATTEMPTS: usize = 5;
const DEFAULT_CLIENT_NAME: &str = "hostcopy";

/// A blocking HTTP/1.1 client for one host.
///
/// Response bodies are streamed straight into a caller-supplied sink. Failed
/// attempts are retried on a fresh connection when doing so cannot duplicate
/// a side effect. The client is `Sync` and meant to be shared between threads.
pub struct HostClient<P: ConnectionPool = TcpPool> {
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
    metrics: HostClientMetrics,
    started_at: Instant,
    last_use_ms: AtomicU64,
}

impl<P: ConnectionPool> std::fmt::Debug for HostClient<P> {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("HostClient")
            .field("tls", &self.tls)
            .field("max_attempts", &self.max_attempts)
            .field("read_timeout", &self.read_timeout)
            .field("write_timeout", &self.write_timeout)
            .field("max_conn_duration", &self.max_conn_duration)
            .field("max_response_body_bytes", &self.max_response_body_bytes)
            .field("client_name", &self.client_name)
            .field("normalize_header_names", &self.normalize_header_names)
            .field("normalize_path", &self.normalize_path)
            .finish_non_exhaustive()
    }
}
