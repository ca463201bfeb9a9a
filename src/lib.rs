//! `hostcopy` is a blocking HTTP/1.1 host client that streams response bodies
//! straight into caller-supplied sinks.
//!
//! Bodies are decoded (fixed-length, chunked or close-delimited) through a
//! single bounded buffer, and failed attempts are retried on fresh pooled
//! connections only when resending cannot duplicate a side effect.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::time::Duration;
//! use hostcopy::prelude::{HostClient, Request, Response, TcpPool};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let pool = TcpPool::builder("example.com:80")
//!         .dial_timeout(Duration::from_secs(3))
//!         .build();
//!     let client = HostClient::builder(pool)
//!         .client_name("my-tool")
//!         .read_timeout(Duration::from_secs(10))
//!         .max_response_body_bytes(16 * 1024 * 1024)
//!         .build();
//!
//!     let mut request = Request::get("http://example.com/archive.tar".parse()?);
//!     let mut response = Response::new();
//!     let mut file = std::fs::File::create("archive.tar")?;
//!     client.do_copy(&mut request, Some(&mut response), &mut file)?;
//!
//!     println!("status={} bytes={}", response.status(), response.body_length());
//!     Ok(())
//! }
//! ```
//!
//! # Retries
//!
//! - Idempotent methods (or requests with an `idempotency-key` header) are
//!   retried up to `max_attempts` on transport failures.
//! - Other requests are retried only when the server closed a pooled
//!   connection before answering.
//! - Requests with a streamed body and responses over the size limit are
//!   never retried.

pub(crate) const IDEMPOTENCY_KEY_HEADER: &str = "idempotency-key";

mod blocking_client;
mod body;
mod chunk;
mod error;
mod metrics;
mod pool;
mod request;
mod response;
mod retry;
mod sink;
mod util;

pub use crate::blocking_client::{HostClient, HostClientBuilder};
pub use crate::body::{BodyCopier, BodyLength, COPY_BUFFER_SIZE, copy_body};
pub use crate::chunk::parse_chunk_size;
pub use crate::error::{HostCopyError, HostCopyErrorCode, IoPhase};
pub use crate::metrics::HostClientMetricsSnapshot;
pub use crate::pool::{ConnectionPool, PooledConnection, TcpPool, TcpPoolBuilder, Transport};
pub use crate::request::{Request, RequestBody};
pub use crate::response::Response;
pub use crate::retry::{PermissiveRetryEligibility, RetryEligibility, StrictRetryEligibility};
pub use crate::sink::{BodyTooLarge, LimitedWriter};

pub type HostCopyResult<T> = std::result::Result<T, HostCopyError>;

pub mod prelude {
    pub use crate::{
        BodyLength, ConnectionPool, HostClient, HostClientMetricsSnapshot, HostCopyError,
        HostCopyErrorCode, HostCopyResult, LimitedWriter, PermissiveRetryEligibility,
        PooledConnection, Request, Response, RetryEligibility, StrictRetryEligibility, TcpPool,
        Transport,
    };
}

#[cfg(test)]
mod tests;
