//! Common test utilities

#![allow(dead_code)]

use recovery_engine::{RecoveryError, Result, RetryPolicy};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Retry policy with millisecond delays
pub fn fast_retry(max_retries: u32) -> RetryPolicy {
    RetryPolicy::new(max_retries)
        .with_base_delay(Duration::from_millis(1))
        .with_max_delay(Duration::from_millis(5))
}

/// Shared invocation counter
#[derive(Clone, Default)]
pub struct CallCounter(Arc<AtomicU32>);

impl CallCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one call, returning its 1-based number
    pub fn hit(&self) -> u32 {
        self.0.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn count(&self) -> u32 {
        self.0.load(Ordering::SeqCst)
    }
}

/// Operation failing `failures` times before returning `value`
pub fn flaky<T: Clone>(
    counter: CallCounter,
    failures: u32,
    value: T,
) -> impl Fn() -> std::future::Ready<Result<T>> {
    move || {
        let call = counter.hit();
        std::future::ready(if call <= failures {
            Err(RecoveryError::http(503, "Service Unavailable"))
        } else {
            Ok(value.clone())
        })
    }
}

/// Operation that always fails with a network error
pub fn always_failing<T>(counter: CallCounter) -> impl Fn() -> std::future::Ready<Result<T>> {
    move || {
        counter.hit();
        std::future::ready(Err(RecoveryError::network("connection refused")))
    }
}
