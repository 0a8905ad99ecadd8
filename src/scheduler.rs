//! Drives recomputation: a periodic tick for the countdown and notifications when
//! stored data changes underneath a session.
//!
//! The ordering logic stays pure; this layer only decides *when* it gets called.

use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::{CanteenError, Result};

pub type TickCallback = Box<dyn FnMut() + Send + 'static>;
pub type ChangeCallback = Box<dyn FnMut(&str) + Send + 'static>;

pub trait Scheduler {
    /// Call `callback` now and then once per tick until the subscription ends.
    fn on_tick(&self, callback: TickCallback) -> Subscription;

    /// Call `callback` whenever the stored value under `key` is rewritten.
    fn on_external_change(&self, key: &str, callback: ChangeCallback) -> Subscription;
}

/// A running callback. Dropping it stops the callback.
#[must_use = "dropping a Subscription cancels it"]
pub struct Subscription {
    task: JoinHandle<()>,
}

impl Subscription {
    pub fn cancel(self) {
        // Drop does the work
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.task.abort();
    }
}

pub struct TokioScheduler {
    handle: Handle,
    period: Duration,
    changes: broadcast::Sender<String>,
}

impl TokioScheduler {
    /// Must be called from inside a Tokio runtime.
    pub fn new(period: Duration, changes: broadcast::Sender<String>) -> Result<Self> {
        let handle = Handle::try_current().map_err(|_| CanteenError::NoRuntime)?;
        if period.is_zero() {
            return Err(CanteenError::InvalidInput("tick period must be positive".into()));
        }
        Ok(Self {
            handle,
            period,
            changes,
        })
    }
}

impl Scheduler for TokioScheduler {
    fn on_tick(&self, mut callback: TickCallback) -> Subscription {
        let period = self.period;
        let task = self.handle.spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                callback();
            }
        });
        Subscription { task }
    }

    fn on_external_change(&self, key: &str, mut callback: ChangeCallback) -> Subscription {
        let key = key.to_string();
        let mut receiver = self.changes.subscribe();
        let task = self.handle.spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(changed) if changed == key => callback(&changed),
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(key = %key, skipped, "Change feed lagged");
                    }
                    Err(RecvError::Closed) => {
                        debug!(key = %key, "Change feed closed");
                        break;
                    }
                }
            }
        });
        Subscription { task }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    fn counter() -> (Arc<AtomicUsize>, TickCallback) {
        let count = Arc::new(AtomicUsize::new(0));
        let inner = count.clone();
        (count, Box::new(move || {
            inner.fetch_add(1, Ordering::SeqCst);
        }))
    }

    #[tokio::test(start_paused = true)]
    async fn test_tick_fires_immediately_then_every_period() {
        let (tx, _) = broadcast::channel(8);
        let scheduler = TokioScheduler::new(Duration::from_secs(1), tx).unwrap();
        let (count, callback) = counter();

        let _sub = scheduler.on_tick(callback);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(count.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_ticks() {
        let (tx, _) = broadcast::channel(8);
        let scheduler = TokioScheduler::new(Duration::from_secs(1), tx).unwrap();
        let (count, callback) = counter();

        let sub = scheduler.on_tick(callback);
        tokio::time::sleep(Duration::from_millis(1500)).await;
        sub.cancel();
        let seen = count.load(Ordering::SeqCst);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(count.load(Ordering::SeqCst), seen);
    }

    #[tokio::test]
    async fn test_external_change_filters_by_key() {
        let (tx, _) = broadcast::channel(8);
        let scheduler = TokioScheduler::new(Duration::from_secs(1), tx.clone()).unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();

        let _sub = scheduler.on_external_change(
            "weeklyMenu",
            Box::new(move |key: &str| sink.lock().unwrap().push(key.to_string())),
        );
        // Let the task start listening
        tokio::task::yield_now().await;

        tx.send("employeeOrders:EMP001".to_string()).unwrap();
        tx.send("weeklyMenu".to_string()).unwrap();
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }

        assert_eq!(*seen.lock().unwrap(), vec!["weeklyMenu".to_string()]);
    }

    #[test]
    fn test_requires_runtime() {
        let (tx, _) = broadcast::channel(8);
        let err = TokioScheduler::new(Duration::from_secs(1), tx).err().unwrap();
        assert!(matches!(err, CanteenError::NoRuntime));
    }
}
