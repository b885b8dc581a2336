//! Inference admission gate.
//!
//! A counting semaphore of `limit` slots around the VAD call. Decode and the
//! signal metrics run outside it; only the detector region is bounded.
//! Waiting suspends the task, never the worker thread.
//!
//! Release is tied to [`GatePermit`]'s drop, so a slot is returned exactly
//! once on every exit path, including cancellation of the awaiting future.

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info};

use crate::error::{AqcError, Result};

#[derive(Debug, Clone)]
pub struct AdmissionGate {
    semaphore: Arc<Semaphore>,
    limit: usize,
}

/// One occupied slot. Dropping it frees the slot.
#[derive(Debug)]
pub struct GatePermit {
    _permit: OwnedSemaphorePermit,
}

impl AdmissionGate {
    /// `limit` is clamped to at least one slot.
    pub fn new(limit: usize) -> Self {
        let limit = limit.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(limit)),
            limit,
        }
    }

    /// Wait for a free slot.
    ///
    /// # Errors
    /// `AqcError::GateClosed` once [`close`](Self::close) has been called,
    /// including for tasks that were already waiting.
    pub async fn acquire(&self) -> Result<GatePermit> {
        let permit = Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .map_err(|_| AqcError::GateClosed)?;
        debug!(available = self.semaphore.available_permits(), "gate slot acquired");
        Ok(GatePermit { _permit: permit })
    }

    /// Stop admitting. Holders keep their slots until they drop them.
    pub fn close(&self) {
        if !self.semaphore.is_closed() {
            info!(limit = self.limit, "closing inference admission gate");
            self.semaphore.close();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.semaphore.is_closed()
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Currently free slots.
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn permit_drop_returns_slot() {
        let gate = AdmissionGate::new(2);
        let a = gate.acquire().await.expect("first");
        let b = gate.acquire().await.expect("second");
        assert_eq!(gate.available(), 0);
        drop(a);
        assert_eq!(gate.available(), 1);
        drop(b);
        assert_eq!(gate.available(), 2);
    }

    #[tokio::test]
    async fn zero_limit_is_clamped() {
        let gate = AdmissionGate::new(0);
        assert_eq!(gate.limit(), 1);
        let _p = gate.acquire().await.expect("one slot");
    }

    #[tokio::test]
    async fn close_fails_waiters_but_not_holders() {
        let gate = AdmissionGate::new(1);
        let held = gate.acquire().await.expect("held");

        let waiter = {
            let gate = gate.clone();
            tokio::spawn(async move { gate.acquire().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        gate.close();

        let result = waiter.await.expect("join");
        assert!(matches!(result, Err(AqcError::GateClosed)));
        assert!(gate.is_closed());
        drop(held);
        assert!(matches!(gate.acquire().await, Err(AqcError::GateClosed)));
    }

    #[tokio::test]
    async fn cancelled_waiter_does_not_leak_a_slot() {
        let gate = AdmissionGate::new(1);
        let held = gate.acquire().await.expect("held");

        let timed_out = tokio::time::timeout(Duration::from_millis(20), gate.acquire()).await;
        assert!(timed_out.is_err());

        drop(held);
        assert_eq!(gate.available(), 1);
    }

    #[tokio::test]
    async fn panicking_holder_releases_slot() {
        let gate = AdmissionGate::new(1);
        let task = {
            let gate = gate.clone();
            tokio::spawn(async move {
                let _permit = gate.acquire().await.expect("acquire");
                panic!("detector blew up");
            })
        };
        assert!(task.await.is_err());
        assert_eq!(gate.available(), 1);
    }
}
