//! Per-thread mutual exclusion with delayed release.
//!
//! A thread id maps to `true` while a cycle for that thread is running and for a
//! cooldown after it ends; released entries are removed. Acquire is a single
//! critical section over the map and never awaits, so two tasks interleaved on
//! the same runtime cannot both observe the thread as free.
//!
//! Release is scheduled as a spawned task. The returned [`ReleaseHandle`] can be
//! awaited or cancelled; under a paused tokio clock the cooldown elapses
//! deterministically.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;

type LockMap = Arc<Mutex<HashMap<String, bool>>>;

fn lock_map(map: &LockMap) -> MutexGuard<'_, HashMap<String, bool>> {
    // A panic while holding the guard cannot leave the map half-updated.
    map.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn unlock(map: &LockMap, thread_id: &str) {
    lock_map(map).remove(thread_id);
}

/// Registry of in-progress conversation threads.
#[derive(Clone)]
pub struct ThreadLock {
    inner: LockMap,
    cooldown: Duration,
}

impl ThreadLock {
    /// `cooldown` is the delay used when a [`ThreadGuard`] is dropped without an explicit release.
    pub fn new(cooldown: Duration) -> Self {
        Self {
            inner: Arc::new(Mutex::new(HashMap::new())),
            cooldown,
        }
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    /// Mark the thread in progress. Returns false, without touching the entry, when it already is.
    pub fn acquire(&self, thread_id: &str) -> bool {
        let mut g = lock_map(&self.inner);
        if g.get(thread_id).copied().unwrap_or(false) {
            return false;
        }
        g.insert(thread_id.to_string(), true);
        true
    }

    /// Schedule the thread to become free after `delay`.
    pub fn release(&self, thread_id: &str, delay: Duration) -> ReleaseHandle {
        schedule_release(self.inner.clone(), thread_id.to_string(), delay)
    }

    /// Acquire and wrap the lock in a guard that always schedules its release.
    pub fn try_acquire(&self, thread_id: &str) -> Option<ThreadGuard> {
        if !self.acquire(thread_id) {
            return None;
        }
        Some(ThreadGuard {
            inner: self.inner.clone(),
            thread_id: Some(thread_id.to_string()),
            cooldown: self.cooldown,
        })
    }

    pub fn is_locked(&self, thread_id: &str) -> bool {
        lock_map(&self.inner).get(thread_id).copied().unwrap_or(false)
    }

    /// Number of threads currently locked (running or cooling down).
    pub fn len(&self) -> usize {
        lock_map(&self.inner).values().filter(|v| **v).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn schedule_release(inner: LockMap, thread_id: String, delay: Duration) -> ReleaseHandle {
    let map = inner.clone();
    let key = thread_id.clone();
    let task = match tokio::runtime::Handle::try_current() {
        Ok(rt) => Some(rt.spawn(async move {
            tokio::time::sleep(delay).await;
            unlock(&map, &key);
            log::debug!("thread lock released: {}", key);
        })),
        Err(_) => {
            log::warn!("thread lock: no runtime to schedule release, unlocking {} now", key);
            unlock(&map, &key);
            None
        }
    };
    ReleaseHandle {
        inner,
        thread_id,
        task,
    }
}

/// Pending delayed release of one thread.
///
/// Dropping the handle leaves the release scheduled.
pub struct ReleaseHandle {
    inner: LockMap,
    thread_id: String,
    task: Option<JoinHandle<()>>,
}

impl ReleaseHandle {
    /// Wait until the thread has been released.
    pub async fn wait(mut self) {
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                log::warn!("thread lock: release task for {} failed: {}", self.thread_id, e);
                unlock(&self.inner, &self.thread_id);
            }
        }
    }

    /// Skip the remaining cooldown: stop the timer and free the thread now.
    pub fn cancel(mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        unlock(&self.inner, &self.thread_id);
    }

    pub fn is_finished(&self) -> bool {
        self.task.as_ref().map(|t| t.is_finished()).unwrap_or(true)
    }
}

/// Held for the duration of one cycle. Release is scheduled exactly once:
/// explicitly via [`ThreadGuard::release`], or with the lock's cooldown on drop.
pub struct ThreadGuard {
    inner: LockMap,
    thread_id: Option<String>,
    cooldown: Duration,
}

impl ThreadGuard {
    pub fn thread_id(&self) -> &str {
        self.thread_id.as_deref().unwrap_or_default()
    }

    pub fn release(mut self, delay: Duration) -> ReleaseHandle {
        let thread_id = self.thread_id.take().unwrap_or_default();
        schedule_release(self.inner.clone(), thread_id, delay)
    }
}

impl Drop for ThreadGuard {
    fn drop(&mut self) {
        if let Some(thread_id) = self.thread_id.take() {
            drop(schedule_release(self.inner.clone(), thread_id, self.cooldown));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const COOLDOWN: Duration = Duration::from_millis(1000);

    #[tokio::test]
    async fn second_acquire_is_denied_until_release() {
        let lock = ThreadLock::new(COOLDOWN);
        assert!(lock.acquire("1742291226.513489"));
        assert!(!lock.acquire("1742291226.513489"));
        assert!(lock.acquire("1742291300.000001"));
        lock.release("1742291226.513489", Duration::ZERO).wait().await;
        assert!(lock.acquire("1742291226.513489"));
    }

    #[tokio::test(start_paused = true)]
    async fn release_waits_for_the_full_delay() {
        let lock = ThreadLock::new(COOLDOWN);
        assert!(lock.acquire("t1"));
        let _handle = lock.release("t1", COOLDOWN);

        tokio::time::sleep(Duration::from_millis(999)).await;
        assert!(lock.is_locked("t1"));
        assert!(!lock.acquire("t1"));

        tokio::time::sleep(Duration::from_millis(2)).await;
        assert!(!lock.is_locked("t1"));
        assert!(lock.acquire("t1"));
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_frees_the_thread_immediately() {
        let lock = ThreadLock::new(COOLDOWN);
        assert!(lock.acquire("t1"));
        let handle = lock.release("t1", COOLDOWN);
        assert!(lock.is_locked("t1"));
        handle.cancel();
        assert!(lock.acquire("t1"));
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_guard_releases_after_cooldown() {
        let lock = ThreadLock::new(COOLDOWN);
        {
            let guard = lock.try_acquire("t1").expect("first acquire");
            assert_eq!(guard.thread_id(), "t1");
            assert!(lock.try_acquire("t1").is_none());
        }
        assert!(lock.is_locked("t1"));
        tokio::time::sleep(COOLDOWN + Duration::from_millis(1)).await;
        assert!(lock.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn explicit_guard_release_is_not_repeated_on_drop() {
        let lock = ThreadLock::new(COOLDOWN);
        let guard = lock.try_acquire("t1").expect("acquire");
        let handle = guard.release(Duration::from_millis(10));
        handle.wait().await;
        assert!(lock.acquire("t1"));
        // A second, drop-scheduled release would free the new holder early.
        tokio::time::sleep(COOLDOWN * 2).await;
        assert!(lock.is_locked("t1"));
    }

    #[test]
    fn release_without_runtime_unlocks_now() {
        let lock = ThreadLock::new(COOLDOWN);
        assert!(lock.acquire("t1"));
        let handle = lock.release("t1", COOLDOWN);
        assert!(handle.is_finished());
        assert!(!lock.is_locked("t1"));
    }
}
