//! Admission control: a bounded number of in-flight requests plus a
//! request rate limit.

use bulkload_types::ExecutorConfig;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use std::num::NonZeroU32;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::debug;

/// Gate that every request passes before it is sent.
///
/// [`acquire`](Self::acquire) first waits for an in-flight permit, then for
/// a rate-limiter token. The permit is held until the returned
/// [`AdmissionPermit`] is dropped; tokens are consumed and never returned.
pub struct AdmissionGate {
    max_in_flight: Option<usize>,
    permits: Option<Arc<Semaphore>>,
    rate_limiter: Option<DefaultDirectRateLimiter>,
}

/// Proof of admission. Dropping it releases the in-flight permit.
#[derive(Debug)]
#[must_use]
pub struct AdmissionPermit {
    _permit: Option<OwnedSemaphorePermit>,
}

impl AdmissionPermit {
    /// Releases the permit. Equivalent to dropping it.
    pub fn release(self) {}
}

impl AdmissionGate {
    /// Creates a gate. `None` disables the corresponding limit.
    pub fn new(
        max_in_flight_requests: Option<usize>,
        max_requests_per_second: Option<NonZeroU32>,
    ) -> Self {
        let max_in_flight = max_in_flight_requests.map(|max| max.min(Semaphore::MAX_PERMITS));
        let permits = max_in_flight.map(|max| Arc::new(Semaphore::new(max)));
        let rate_limiter =
            max_requests_per_second.map(|rate| RateLimiter::direct(Quota::per_second(rate)));
        debug!(
            ?max_in_flight_requests,
            ?max_requests_per_second,
            "creating admission gate"
        );
        Self {
            max_in_flight,
            permits,
            rate_limiter,
        }
    }

    /// A gate that admits every request immediately.
    pub fn unbounded() -> Self {
        Self::new(None, None)
    }

    pub fn from_config(config: &ExecutorConfig) -> Self {
        let max_in_flight = config
            .max_in_flight_requests
            .map(|max| usize::try_from(max).unwrap_or(usize::MAX));
        let rate = config
            .max_requests_per_second
            .and_then(|rate| NonZeroU32::new(u32::try_from(rate).unwrap_or(u32::MAX)));
        Self::new(max_in_flight, rate)
    }

    /// Waits until a request may be sent.
    pub async fn acquire(&self) -> AdmissionPermit {
        let permit = match &self.permits {
            // The semaphore is never closed, so acquisition cannot fail.
            Some(permits) => permits.clone().acquire_owned().await.ok(),
            None => None,
        };
        if let Some(rate_limiter) = &self.rate_limiter {
            rate_limiter.until_ready().await;
        }
        AdmissionPermit { _permit: permit }
    }

    /// Number of free in-flight permits, or `None` if concurrency is not
    /// limited.
    pub fn available_permits(&self) -> Option<usize> {
        self.permits.as_ref().map(|p| p.available_permits())
    }

    /// Upper bound on the number of concurrent requests, if any.
    pub fn max_in_flight_requests(&self) -> Option<usize> {
        self.max_in_flight
    }
}
