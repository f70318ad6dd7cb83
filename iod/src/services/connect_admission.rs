//! Bounded pending-connect limiter used exclusively by `TCP_CONNECT` tasks.
//!
//! A semaphore with capacity [`IoDaemonConfig::admission_capacity`]. `acquire` blocks the
//! caller cooperatively (not the underlying thread) and never the session's inbound read
//! loop, which only ever decides whether to spawn a connect task at all (see the
//! fast-fail check in [`crate::services::tcp_stream::handle_connect`]).

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::metrics::{
    METRICS_ID_ADMISSION_COMPLETED, METRICS_ID_ADMISSION_PENDING, METRICS_ID_ADMISSION_WAITING,
};

/// Why an admission attempt did not yield a permit.
#[derive(Debug, Clone, Copy, thiserror::Error)]
pub enum AdmissionError {
    /// The wait timeout elapsed before a permit became available.
    #[error("admission wait timeout")]
    Timeout,
    /// The admission was cancelled (session ended, or the pending connect was closed).
    #[error("admission cancelled")]
    Cancelled,
}

/// Per-session bounded admission for outbound TCP connects.
pub struct ConnectAdmission {
    semaphore: Arc<Semaphore>,
    waiting: AtomicUsize,
    completed: AtomicUsize,
}

impl ConnectAdmission {
    /// Creates a new admission pool with the given capacity.
    pub fn new(capacity: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            waiting: AtomicUsize::new(0),
            completed: AtomicUsize::new(0),
        }
    }

    /// Acquires a permit, waiting cooperatively up to `timeout`.
    ///
    /// Cancellation-safe: the caller is expected to race this future against a
    /// `CancellationToken` with `tokio::select!`; if this future is dropped before
    /// resolving, no permit is held and no counters are left incremented.
    pub async fn acquire(
        &self,
        timeout: Duration,
    ) -> Result<OwnedSemaphorePermit, AdmissionError> {
        self.waiting.fetch_add(1, Ordering::Relaxed);
        metrics::gauge!(METRICS_ID_ADMISSION_WAITING).increment(1.0);
        let result = tokio::time::timeout(timeout, self.semaphore.clone().acquire_owned()).await;
        self.waiting.fetch_sub(1, Ordering::Relaxed);
        metrics::gauge!(METRICS_ID_ADMISSION_WAITING).decrement(1.0);
        match result {
            Ok(Ok(permit)) => {
                self.completed.fetch_add(1, Ordering::Relaxed);
                metrics::gauge!(METRICS_ID_ADMISSION_COMPLETED).increment(1.0);
                Ok(permit)
            }
            Ok(Err(_closed)) => Err(AdmissionError::Cancelled),
            Err(_elapsed) => Err(AdmissionError::Timeout),
        }
    }

    /// Number of tasks currently waiting for a permit.
    pub fn waiting(&self) -> usize {
        self.waiting.load(Ordering::Relaxed)
    }

    /// Total number of permits ever granted by this instance.
    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::Relaxed)
    }
}

/// Records the current count of in-flight (waiting or connecting) `TCP_CONNECT` tasks.
pub fn record_pending(count: usize) {
    metrics::gauge!(METRICS_ID_ADMISSION_PENDING).set(count as f64);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn grants_up_to_capacity() {
        let admission = ConnectAdmission::new(2);
        let p1 = admission.acquire(Duration::from_millis(50)).await.unwrap();
        let p2 = admission.acquire(Duration::from_millis(50)).await.unwrap();
        assert_eq!(admission.completed(), 2);
        drop(p1);
        drop(p2);
    }

    #[tokio::test]
    async fn times_out_when_exhausted() {
        let admission = ConnectAdmission::new(1);
        let _permit = admission.acquire(Duration::from_millis(50)).await.unwrap();
        let err = admission.acquire(Duration::from_millis(20)).await.unwrap_err();
        assert!(matches!(err, AdmissionError::Timeout));
    }
}
