use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{AcquireError, OwnedSemaphorePermit, Semaphore};

/// Bounds the number of batches in flight.
///
/// A permit is held for the whole life of a send, retries and backoff
/// included, so retry amplification never raises the load above
/// `concurrency`.
#[derive(Clone)]
pub struct AdmissionController {
    semaphore: Arc<Semaphore>,
    gauge: Arc<InFlightGauge>,
}

#[derive(Default)]
struct InFlightGauge {
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl AdmissionController {
    pub fn new(concurrency: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(concurrency.max(1))),
            gauge: Arc::new(InFlightGauge::default()),
        }
    }

    /// Wait for a free slot. The slot is returned when the permit is dropped.
    pub async fn acquire(&self) -> Result<AdmissionPermit, AcquireError> {
        let permit = self.semaphore.clone().acquire_owned().await?;
        let now = self.gauge.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.gauge.peak.fetch_max(now, Ordering::SeqCst);
        Ok(AdmissionPermit {
            _permit: permit,
            gauge: Arc::clone(&self.gauge),
        })
    }

    pub fn in_flight(&self) -> usize {
        self.gauge.current.load(Ordering::SeqCst)
    }

    /// Highest number of permits held at the same time so far.
    pub fn peak_in_flight(&self) -> usize {
        self.gauge.peak.load(Ordering::SeqCst)
    }
}

/// A held admission slot.
pub struct AdmissionPermit {
    _permit: OwnedSemaphorePermit,
    gauge: Arc<InFlightGauge>,
}

impl Drop for AdmissionPermit {
    fn drop(&mut self) {
        // gauge first so `in_flight` never lags behind the semaphore
        self.gauge.current.fetch_sub(1, Ordering::SeqCst);
    }
}
