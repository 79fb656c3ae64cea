//! # Operation Context
//!
//! Every coordinator call carries an [`OpContext`]: which write path is
//! calling, and when the call must be finished by.
//!
//! ## Deadlines and Cancellation
//! ```text
//! caller ──► OpContext { source: Supplier, deadline: now + 5s }
//!                 │
//!                 ▼
//!        timeout_at(deadline, operation)
//!                 │
//!     ┌───────────┴───────────┐
//!     ▼                       ▼
//!  finished               expired / dropped
//!  Ok(value)              Err(DeadlineExceeded), future dropped
//!                         at its last await point
//! ```
//!
//! A multi-step operation cut short this way (unit inserted, stock not yet
//! reconciled) leaves drift the auditor reports as `StockDrift` or
//! `MissingBarcode` and repairs on the next pass.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;

use keystock_core::Source;

use crate::error::{CoordError, CoordResult};

/// Caller identity and deadline for one coordinator call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpContext {
    pub source: Source,
    pub deadline: Instant,
}

impl OpContext {
    /// Context expiring `timeout` from now.
    pub fn new(source: Source, timeout: Duration) -> Self {
        OpContext {
            source,
            deadline: Instant::now() + timeout,
        }
    }

    pub fn with_deadline(source: Source, deadline: Instant) -> Self {
        OpContext { source, deadline }
    }

    /// Same deadline, different source. Used when the auditor acts on
    /// behalf of a scheduled scan.
    pub fn as_source(self, source: Source) -> Self {
        OpContext { source, ..self }
    }

    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.deadline
    }

    /// Runs `operation` until it completes or the deadline passes.
    pub async fn run<T, F>(&self, operation: F) -> CoordResult<T>
    where
        F: Future<Output = CoordResult<T>>,
    {
        let started = Instant::now();
        match tokio::time::timeout_at(self.deadline, operation).await {
            Ok(result) => result,
            Err(_) => Err(CoordError::DeadlineExceeded(started.elapsed())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_run_within_deadline() {
        let ctx = OpContext::new(Source::Supplier, Duration::from_secs(1));
        let value = ctx.run(async { Ok::<_, CoordError>(7) }).await.unwrap();
        assert_eq!(value, 7);
        assert!(!ctx.is_expired());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_past_deadline() {
        let ctx = OpContext::new(Source::Inventory, Duration::from_millis(50));
        let result = ctx
            .run(async {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok::<_, CoordError>(())
            })
            .await;

        assert!(matches!(result, Err(CoordError::DeadlineExceeded(_))));
        assert!(ctx.is_expired());
        assert_eq!(ctx.remaining(), Duration::ZERO);
    }

    #[test]
    fn test_as_source_keeps_deadline() {
        let ctx = OpContext::new(Source::Admin, Duration::from_secs(3));
        let audit = ctx.as_source(Source::Auditor);
        assert_eq!(audit.deadline, ctx.deadline);
        assert_eq!(audit.source, Source::Auditor);
    }
}
