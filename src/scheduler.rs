//! Delayed and periodic background tasks.
//!
//! Every fixed wait in the station (settle window, reboot window, alert pacing,
//! announce cool-down, watchdog period, alert polling) goes through `tokio::time`,
//! so tests can run the whole timeline with a paused clock
//! (`#[tokio::test(start_paused = true)]`) instead of sleeping for real.
//!
//! The helpers here return a [`TaskHandle`] so owners can cancel a periodic job
//! (the watchdog and alert poller are cancelled on shutdown). Dropping a handle
//! does not cancel the task.

use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

/// Cancellation handle for a spawned background task.
#[derive(Debug)]
pub struct TaskHandle {
    name: &'static str,
    join: JoinHandle<()>,
}

impl TaskHandle {
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Stop the task at its next suspension point.
    pub fn cancel(&self) {
        log::debug!("cancelling background task '{}'", self.name);
        self.join.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Wait for the task to end (either finished or cancelled).
    pub async fn join(self) {
        let _ = self.join.await;
    }
}

/// Run `fut` once after `delay`.
pub fn spawn_delayed<F>(name: &'static str, delay: Duration, fut: F) -> TaskHandle
where
    F: Future<Output = ()> + Send + 'static,
{
    let join = tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        fut.await;
    });
    TaskHandle { name, join }
}

/// Run `job` every `period`, first after `initial_delay`.
///
/// Ticks never overlap: a slow job delays the next tick instead of running twice.
pub fn spawn_periodic<F, Fut>(
    name: &'static str,
    initial_delay: Duration,
    period: Duration,
    mut job: F,
) -> TaskHandle
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let join = tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + initial_delay, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            job().await;
        }
    });
    TaskHandle { name, join }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn delayed_task_waits_for_its_delay() {
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        let handle = spawn_delayed("once", Duration::from_secs(5), async move {
            h.fetch_add(1, Ordering::SeqCst);
        });
        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        handle.join().await;
    }

    #[tokio::test(start_paused = true)]
    async fn periodic_task_ticks_until_cancelled() {
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        let handle = spawn_periodic(
            "tick",
            Duration::from_secs(10),
            Duration::from_secs(30),
            move || {
                let h = h.clone();
                async move {
                    h.fetch_add(1, Ordering::SeqCst);
                }
            },
        );
        // ticks at t=10, 40, 70
        tokio::time::sleep(Duration::from_secs(75)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 3);
        handle.cancel();
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 3);
        assert_eq!(handle.name(), "tick");
    }
}
