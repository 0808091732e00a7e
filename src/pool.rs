//! Per-endpoint pools of multiplexed channels.
//!
//! Each endpoint keeps up to `channel_count` channels and hands them out
//! round-robin. Channels are dialed lazily on first use of their slot. A
//! slot whose channel has died is redialed by the first caller to notice;
//! concurrent callers wait on the endpoint lock and then reuse the fresh
//! channel instead of dialing again. Waiting for the lock and dialing both
//! come out of the caller's connect budget.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::RwLock;
use tokio::time::Instant;

use crate::channel::MultiplexedChannel;
use crate::endpoint::Endpoint;
use crate::error::{MuxError, Result};
use crate::transport::Dialer;

/// Default number of channels per endpoint.
pub const DEFAULT_CHANNELS_PER_ENDPOINT: usize = 1;

/// Shared pool of channels keyed by endpoint. Cheap to clone.
#[derive(Clone)]
pub struct ConnectionPool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    dialer: Dialer,
    endpoints: DashMap<Endpoint, Arc<EndpointPool>>,
    default_channel_count: usize,
    closed: AtomicBool,
}

struct EndpointPool {
    /// One entry per channel, `None` until that slot is first dialed.
    slots: RwLock<Vec<Option<MultiplexedChannel>>>,
    cursor: AtomicUsize,
    /// Serializes dialing for this endpoint.
    dial_lock: tokio::sync::Mutex<()>,
}

impl EndpointPool {
    fn new(channel_count: usize) -> Self {
        Self {
            slots: RwLock::new((0..channel_count).map(|_| None).collect()),
            cursor: AtomicUsize::new(0),
            dial_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// `None` if the pool shrank below `index`.
    fn slot(&self, index: usize) -> Option<Option<MultiplexedChannel>> {
        self.slots.read().get(index).cloned()
    }
}

impl Drop for PoolInner {
    fn drop(&mut self) {
        for entry in self.endpoints.iter() {
            for channel in entry.value().slots.read().iter().flatten() {
                channel.close();
            }
        }
    }
}

impl ConnectionPool {
    pub fn new(dialer: Dialer, default_channel_count: usize) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                dialer,
                endpoints: DashMap::new(),
                default_channel_count,
                closed: AtomicBool::new(false),
            }),
        }
    }

    pub fn dialer(&self) -> &Dialer {
        &self.inner.dialer
    }

    /// Return a live channel to `endpoint`, dialing or redialing as needed.
    ///
    /// Round-robins over the endpoint's slots. Fails with `ConnectTimeout`
    /// once `connect_timeout` is spent (waiting for another caller's dial
    /// counts), and with `PoolExhausted` if the pool is closed or the
    /// endpoint is configured with zero channels.
    pub async fn acquire_channel(
        &self,
        endpoint: &Endpoint,
        connect_timeout: Duration,
    ) -> Result<MultiplexedChannel> {
        let deadline = crate::timer::deadline_after(connect_timeout);
        let pool = self.endpoint_pool(endpoint)?;

        loop {
            let (index, current) = {
                let slots = pool.slots.read();
                if slots.is_empty() {
                    return Err(MuxError::PoolExhausted(format!(
                        "no channels configured for {}",
                        endpoint
                    )));
                }
                let index = pool.cursor.fetch_add(1, Ordering::Relaxed) % slots.len();
                (index, slots[index].clone())
            };

            // Fast path: live channel in the slot
            if let Some(channel) = current {
                if channel.is_open() {
                    return Ok(channel);
                }
            }

            let _guard = tokio::time::timeout_at(deadline, pool.dial_lock.lock())
                .await
                .map_err(|_| self.connect_timeout(endpoint, connect_timeout))?;

            self.ensure_open()?;

            // Someone else may have repaired the slot, or shrunk the pool,
            // while we waited.
            let Some(current) = pool.slot(index) else {
                continue;
            };
            if let Some(channel) = current {
                if channel.is_open() {
                    return Ok(channel);
                }
            }

            let left = deadline.saturating_duration_since(Instant::now());
            if left.is_zero() {
                return Err(self.connect_timeout(endpoint, connect_timeout));
            }
            let fresh = self.inner.dialer.connect(endpoint, left).await?;

            let stale = match pool.slots.write().get_mut(index) {
                Some(slot) => slot.replace(fresh.clone()),
                None => {
                    fresh.close();
                    continue;
                }
            };
            match stale {
                Some(stale) => {
                    tracing::info!(
                        "Replaced dead channel {} to {} with channel {}",
                        stale.id(),
                        endpoint,
                        fresh.id()
                    );
                    stale.close();
                }
                None => tracing::debug!("Opened channel {} to {} in slot {}", fresh.id(), endpoint, index),
            }

            // close() may have raced with the dial.
            if self.inner.closed.load(Ordering::Acquire) {
                fresh.close();
                return Err(self.exhausted());
            }
            return Ok(fresh);
        }
    }

    /// Change how many channels `endpoint` spreads requests over.
    ///
    /// Growing takes effect lazily; shrinking closes the surplus channels.
    pub fn set_channel_count(&self, endpoint: &Endpoint, count: usize) {
        let Ok(pool) = self.endpoint_pool(endpoint) else {
            return;
        };

        let surplus = {
            let mut slots = pool.slots.write();
            let surplus = if slots.len() > count {
                slots.split_off(count)
            } else {
                Vec::new()
            };
            slots.resize_with(count, || None);
            surplus
        };
        for channel in surplus.into_iter().flatten() {
            channel.close();
        }
    }

    /// Number of channels `endpoint` is configured to use.
    pub fn channel_count(&self, endpoint: &Endpoint) -> usize {
        self.inner
            .endpoints
            .get(endpoint)
            .map(|pool| pool.slots.read().len())
            .unwrap_or(self.inner.default_channel_count)
    }

    /// Number of channels currently held for `endpoint`, open or not.
    pub fn current_channel_count(&self, endpoint: &Endpoint) -> usize {
        self.inner
            .endpoints
            .get(endpoint)
            .map(|pool| pool.slots.read().iter().flatten().count())
            .unwrap_or(0)
    }

    /// Snapshot of the channels held for `endpoint`.
    pub fn channels(&self, endpoint: &Endpoint) -> Vec<MultiplexedChannel> {
        self.inner
            .endpoints
            .get(endpoint)
            .map(|pool| pool.slots.read().iter().flatten().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of endpoints this pool has seen.
    pub fn endpoint_count(&self) -> usize {
        self.inner.endpoints.len()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Close every channel and refuse further acquisitions.
    pub fn close(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let pools: Vec<Arc<EndpointPool>> = self
            .inner
            .endpoints
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        self.inner.endpoints.clear();

        let mut closed = 0;
        for pool in pools {
            for channel in pool.slots.write().drain(..).flatten() {
                channel.close();
                closed += 1;
            }
        }
        tracing::info!("Connection pool closed, {} channels shut down", closed);
    }

    fn endpoint_pool(&self, endpoint: &Endpoint) -> Result<Arc<EndpointPool>> {
        self.ensure_open()?;
        Ok(self
            .inner
            .endpoints
            .entry(endpoint.clone())
            .or_insert_with(|| Arc::new(EndpointPool::new(self.inner.default_channel_count)))
            .clone())
    }

    fn ensure_open(&self) -> Result<()> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(self.exhausted());
        }
        Ok(())
    }

    fn exhausted(&self) -> MuxError {
        MuxError::PoolExhausted("connection pool is closed".to_string())
    }

    fn connect_timeout(&self, endpoint: &Endpoint, timeout: Duration) -> MuxError {
        MuxError::ConnectTimeout {
            endpoint: endpoint.to_string(),
            timeout,
        }
    }
}
