//! Cancellable one-shot timers.
//!
//! A timer is a tokio task sleeping until its deadline. Expiry callbacks
//! should only post a message somewhere (the channel posts to its driver
//! mailbox); they never touch channel state directly.

use std::time::Duration;

use tokio::task::AbortHandle;
use tokio::time::Instant;

/// Stand-in deadline for timeouts too large to add to the clock.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// Handle to a scheduled timer. Dropping it cancels the timer.
#[derive(Debug)]
pub(crate) struct TimerHandle(AbortHandle);

impl TimerHandle {
    pub(crate) fn cancel(self) {
        drop(self);
    }
}

impl Drop for TimerHandle {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// `timeout` from now, saturating instead of overflowing.
pub(crate) fn deadline_after(timeout: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(timeout).unwrap_or(now + FAR_FUTURE)
}

/// Run `on_expire` once `deadline` is reached unless cancelled first.
pub(crate) fn schedule_at<F>(deadline: Instant, on_expire: F) -> TimerHandle
where
    F: FnOnce() + Send + 'static,
{
    let task = tokio::spawn(async move {
        tokio::time::sleep_until(deadline).await;
        on_expire();
    });
    TimerHandle(task.abort_handle())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_timer_fires() {
        let fired = Arc::new(AtomicBool::new(false));
        let flag = fired.clone();
        let _timer = schedule_at(Instant::now() + Duration::from_millis(50), move || {
            flag.store(true, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(fired.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_prevents_fire() {
        let fired = Arc::new(AtomicBool::new(false));
        let flag = fired.clone();
        let timer = schedule_at(Instant::now() + Duration::from_millis(50), move || {
            flag.store(true, Ordering::SeqCst);
        });

        timer.cancel();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!fired.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_deadline_after_saturates() {
        let deadline = deadline_after(Duration::MAX);
        assert!(deadline > Instant::now() + Duration::from_secs(86_400 * 365));
        assert!(deadline_after(Duration::from_millis(10)) <= Instant::now() + Duration::from_millis(10));
    }
}
