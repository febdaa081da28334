//! Cancellable background tasks owned by a session.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Set of spawned tasks sharing one cancellation token.
///
/// Keyed tasks replace any earlier task under the same key. Once
/// [`TimerSet::cancel_all`] ran, nothing new is spawned.
#[derive(Debug, Default)]
pub struct TimerSet {
    token: CancellationToken,
    cancelled: AtomicBool,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    keyed: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl TimerSet {
    pub fn new() -> Self {
        Self::default()
    }

    fn wrap<F>(&self, fut: F) -> JoinHandle<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let token = self.token.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = fut => {}
            }
        })
    }

    /// Spawn a task. Returns `false` after teardown.
    pub fn spawn<F>(&self, fut: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.is_cancelled() {
            return false;
        }
        let handle = self.wrap(fut);
        let mut tasks = self.tasks.lock();
        tasks.retain(|h| !h.is_finished());
        tasks.push(handle);
        true
    }

    /// Spawn a task under `key`, aborting the task previously stored there.
    pub fn spawn_keyed<F>(&self, key: impl Into<String>, fut: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.is_cancelled() {
            return false;
        }
        let handle = self.wrap(fut);
        if let Some(previous) = self.keyed.lock().insert(key.into(), handle) {
            previous.abort();
        }
        true
    }

    /// Abort the task under `key`. Returns `true` if one was still running.
    pub fn cancel(&self, key: &str) -> bool {
        match self.keyed.lock().remove(key) {
            Some(handle) => {
                let running = !handle.is_finished();
                handle.abort();
                running
            }
            None => false,
        }
    }

    /// Cancel and abort everything. Only the first call does any work.
    pub fn cancel_all(&self) -> bool {
        if self.cancelled.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.token.cancel();
        for handle in self.tasks.lock().drain(..) {
            handle.abort();
        }
        for (_, handle) in self.keyed.lock().drain() {
            handle.abort();
        }
        true
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn is_active(&self, key: &str) -> bool {
        self.keyed
            .lock()
            .get(key)
            .is_some_and(|h| !h.is_finished())
    }

    /// Number of tasks still running.
    pub fn active(&self) -> usize {
        let unkeyed = self.tasks.lock().iter().filter(|h| !h.is_finished()).count();
        let keyed = self.keyed.lock().values().filter(|h| !h.is_finished()).count();
        unkeyed + keyed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_keyed_task_is_replaced() {
        let timers = TimerSet::new();
        let fired = Arc::new(AtomicU32::new(0));

        let counter = fired.clone();
        timers.spawn_keyed("alarm_motion", async move {
            tokio::time::sleep(Duration::from_secs(10)).await;
            counter.fetch_add(1, Ordering::SeqCst);
        });
        tokio::time::sleep(Duration::from_secs(5)).await;
        let counter = fired.clone();
        timers.spawn_keyed("alarm_motion", async move {
            tokio::time::sleep(Duration::from_secs(10)).await;
            counter.fetch_add(10, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_all_once() {
        let timers = TimerSet::new();
        let fired = Arc::new(AtomicU32::new(0));
        let counter = fired.clone();
        assert!(timers.spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(timers.active(), 1);

        assert!(timers.cancel_all());
        assert!(!timers.cancel_all());
        assert!(!timers.spawn(async {}));
        assert!(!timers.spawn_keyed("late", async {}));

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_by_key() {
        let timers = TimerSet::new();
        timers.spawn_keyed("poll", std::future::pending::<()>());
        tokio::task::yield_now().await;
        assert!(timers.is_active("poll"));
        assert!(timers.cancel("poll"));
        assert!(!timers.cancel("poll"));
        assert!(!timers.is_active("poll"));
    }
}
