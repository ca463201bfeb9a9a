use http::Method;

use crate::IDEMPOTENCY_KEY_HEADER;
use crate::request::Request;

/// Decides whether a request may be sent again after a failed attempt.
///
/// Any `Fn(&Request) -> bool` closure works as an eligibility policy.
pub trait RetryEligibility: Send + Sync {
    fn supports_retry(&self, request: &Request) -> bool;
}

impl<F> RetryEligibility for F
where
    F: Fn(&Request) -> bool + Send + Sync,
{
    fn supports_retry(&self, request: &Request) -> bool {
        self(request)
    }
}

/// Retries only idempotent methods, or requests carrying an idempotency key.
#[derive(Debug, Default)]
pub struct StrictRetryEligibility;

impl RetryEligibility for StrictRetryEligibility {
    fn supports_retry(&self, request: &Request) -> bool {
        request_supports_retry(request)
    }
}

#[derive(Debug, Default)]
pub struct PermissiveRetryEligibility;

impl RetryEligibility for PermissiveRetryEligibility {
    fn supports_retry(&self, _request: &Request) -> bool {
        true
    }
}

pub(crate) fn request_supports_retry(request: &Request) -> bool {
    is_method_idempotent(request.method())
        || request.headers().get(IDEMPOTENCY_KEY_HEADER).is_some()
}

fn is_method_idempotent(method: &Method) -> bool {
    matches!(
        *method,
        Method::GET | Method::HEAD | Method::PUT | Method::DELETE | Method::OPTIONS | Method::TRACE
    )
}
