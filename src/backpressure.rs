//! In-flight limits for a multiplexed channel.
//!
//! Two budgets gate every request before it is registered:
//! - **slots**: number of requests awaiting a response (default 2000)
//! - **bytes**: sum of request sizes awaiting a response (default 200 MiB)
//!
//! Both are tokio semaphores. A request holds one slot and `size` byte
//! permits for its whole life; the [`InflightPermit`] returns them on drop,
//! so every completion path (response, timeout, send failure, disconnect)
//! releases exactly what was taken.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;

use crate::error::{BackpressureKind, MuxError, Result};

/// Default maximum requests awaiting a response per channel.
pub const DEFAULT_MAX_PENDING_REQUESTS: usize = 2000;

/// Default maximum request bytes awaiting a response per channel (200 MiB).
pub const DEFAULT_MAX_PENDING_BYTES: usize = 200 * 1024 * 1024;

/// Largest byte budget the limiter can represent.
pub const MAX_PENDING_BYTES_LIMIT: usize = u32::MAX as usize;

/// Dual-semaphore admission control.
#[derive(Debug, Clone)]
pub struct InflightLimiter {
    slots: Arc<Semaphore>,
    bytes: Arc<Semaphore>,
    max_slots: usize,
    max_bytes: usize,
}

/// Permits held by one pending request. Released on drop.
#[derive(Debug)]
pub struct InflightPermit {
    _slot: OwnedSemaphorePermit,
    _bytes: OwnedSemaphorePermit,
    size: usize,
}

impl InflightPermit {
    /// Number of byte permits held.
    pub fn size(&self) -> usize {
        self.size
    }
}

impl InflightLimiter {
    /// Create a limiter. `max_bytes` is clamped to [`MAX_PENDING_BYTES_LIMIT`].
    pub fn new(max_slots: usize, max_bytes: usize) -> Self {
        let max_bytes = max_bytes.min(MAX_PENDING_BYTES_LIMIT);
        Self {
            slots: Arc::new(Semaphore::new(max_slots)),
            bytes: Arc::new(Semaphore::new(max_bytes)),
            max_slots,
            max_bytes,
        }
    }

    /// Acquire one slot and `size` bytes within `budget`.
    ///
    /// The slot wait gets half the budget; the byte wait gets half of what
    /// is left after it. Returns the permit together with the unspent
    /// budget. On failure nothing stays acquired.
    pub async fn acquire(&self, size: usize, budget: Duration) -> Result<(InflightPermit, Duration)> {
        let deadline = crate::timer::deadline_after(budget);

        if size > self.max_bytes {
            return Err(self.exhausted(BackpressureKind::Bytes));
        }

        let slot = match tokio::time::timeout(budget / 2, self.slots.clone().acquire_owned()).await {
            Ok(Ok(permit)) => permit,
            _ => return Err(self.exhausted(BackpressureKind::Slots)),
        };

        let remaining = deadline.saturating_duration_since(Instant::now());
        // `size <= max_bytes <= u32::MAX`, checked above.
        let wanted = size as u32;
        let bytes = match tokio::time::timeout(
            remaining / 2,
            self.bytes.clone().acquire_many_owned(wanted),
        )
        .await
        {
            Ok(Ok(permit)) => permit,
            _ => {
                drop(slot);
                return Err(self.exhausted(BackpressureKind::Bytes));
            }
        };

        let available = self.bytes.available_permits();
        if available < self.max_bytes / 5 {
            tracing::warn!(
                "Pending byte budget above 80%: {} of {} bytes available",
                available,
                self.max_bytes
            );
        }

        let permit = InflightPermit {
            _slot: slot,
            _bytes: bytes,
            size,
        };
        Ok((permit, deadline.saturating_duration_since(Instant::now())))
    }

    fn exhausted(&self, kind: BackpressureKind) -> MuxError {
        MuxError::Backpressure {
            kind,
            pending: self.pending_count(),
        }
    }

    /// Slots currently free.
    #[inline]
    pub fn available_slots(&self) -> usize {
        self.slots.available_permits()
    }

    /// Bytes currently free.
    #[inline]
    pub fn available_bytes(&self) -> usize {
        self.bytes.available_permits()
    }

    /// Requests currently holding a slot.
    #[inline]
    pub fn pending_count(&self) -> usize {
        self.max_slots.saturating_sub(self.available_slots())
    }

    #[inline]
    pub fn max_slots(&self) -> usize {
        self.max_slots
    }

    #[inline]
    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }
}

impl Default for InflightLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_PENDING_REQUESTS, DEFAULT_MAX_PENDING_BYTES)
    }
}
