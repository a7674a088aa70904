//! Per-key reclaimable exclusive locks with named conditions.
//!
//! The registry maps a key to a [`SharedLock`] created on first use. Every
//! [`Monitor`] counts as one reference on its entry; when the last monitor is
//! released and nothing else (a live [`Condition`], say) still points at the
//! lock, the entry is removed on the spot. Entries that went idle while such
//! external handles were alive are swept by a background reclaimer owned by
//! the registry instance.
//!
//! Locks are not reentrant: acquiring a key twice on one thread deadlocks.
//!
//! # Examples
//!
//! ```
//! use resource_runtime::core::LockRegistry;
//!
//! let locks: LockRegistry<&'static str> = LockRegistry::new();
//! {
//!     let monitor = locks.acquire("account-7");
//!     assert!(locks.try_acquire("account-7").is_none());
//!     monitor.release();
//! }
//! assert!(locks.is_empty());
//! ```

use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use parking_lot::{Condvar, Mutex};
use tracing::{debug, info, trace};

use crate::core::{RtResult, RuntimeError};

/// Anything usable as a lock key.
pub trait LockKey: Eq + Hash + Clone + Debug + Send + Sync + 'static {}

impl<T> LockKey for T where T: Eq + Hash + Clone + Debug + Send + Sync + 'static {}

#[derive(Debug)]
struct LockState {
    held: bool,
}

/// One exclusive lock plus its named conditions.
///
/// All conditions wait against the same state mutex as the exclusive lock,
/// which is what lets [`Condition::wait`] give up and retake the lock
/// atomically.
#[derive(Debug)]
pub struct SharedLock {
    generation: u64,
    state: Mutex<LockState>,
    released: Condvar,
    conditions: Mutex<HashMap<String, Arc<Condvar>>>,
    forgotten: AtomicBool,
}

impl SharedLock {
    fn new(generation: u64) -> Self {
        Self {
            generation,
            state: Mutex::new(LockState { held: false }),
            released: Condvar::new(),
            conditions: Mutex::new(HashMap::new()),
            forgotten: AtomicBool::new(false),
        }
    }

    fn lock_exclusive(&self) {
        let mut state = self.state.lock();
        while state.held {
            self.released.wait(&mut state);
        }
        state.held = true;
    }

    fn try_lock_exclusive(&self) -> bool {
        let mut state = self.state.lock();
        if state.held {
            return false;
        }
        state.held = true;
        true
    }

    fn unlock_exclusive(&self) {
        {
            let mut state = self.state.lock();
            state.held = false;
        }
        self.released.notify_one();
    }

    fn is_held(&self) -> bool {
        self.state.lock().held
    }
}

#[derive(Debug)]
struct Entry {
    lock: Arc<SharedLock>,
    monitors: usize,
}

struct Reclaimer {
    stop_tx: Sender<()>,
    handle: JoinHandle<()>,
}

/// Registry of per-key exclusive locks.
pub struct LockRegistry<K: LockKey> {
    entries: Mutex<HashMap<K, Entry>>,
    next_generation: AtomicU64,
    reclaimed: AtomicU64,
    reclaimer: Mutex<Option<Reclaimer>>,
}

impl<K: LockKey> Default for LockRegistry<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: LockKey> Debug for LockRegistry<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockRegistry")
            .field("entries", &self.len())
            .field("reclaimed", &self.reclaimed_count())
            .finish()
    }
}

impl<K: LockKey> LockRegistry<K> {
    /// An empty registry with no reclaimer running.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            next_generation: AtomicU64::new(1),
            reclaimed: AtomicU64::new(0),
            reclaimer: Mutex::new(None),
        }
    }

    /// Block until the lock for `key` is held.
    ///
    /// If the lock found was forgotten while this caller waited on it, the
    /// lookup is retried against the registry's current entry.
    pub fn acquire(&self, key: K) -> Monitor<'_, K> {
        loop {
            let lock = {
                let mut entries = self.entries.lock();
                let entry = entries
                    .entry(key.clone())
                    .or_insert_with(|| self.fresh_entry());
                entry.monitors += 1;
                Arc::clone(&entry.lock)
            };

            lock.lock_exclusive();
            if lock.forgotten.load(Ordering::Acquire) {
                // The entry we counted against is gone; nothing to decrement.
                lock.unlock_exclusive();
                trace!(key = ?key, "Lock forgotten while waiting, retrying");
                continue;
            }

            return Monitor {
                registry: self,
                key,
                lock,
                released: false,
            };
        }
    }

    /// Take the lock for `key` only if nobody holds it.
    pub fn try_acquire(&self, key: K) -> Option<Monitor<'_, K>> {
        let mut entries = self.entries.lock();
        let entry = entries
            .entry(key.clone())
            .or_insert_with(|| self.fresh_entry());
        if !entry.lock.try_lock_exclusive() {
            return None;
        }
        entry.monitors += 1;
        let lock = Arc::clone(&entry.lock);
        drop(entries);

        Some(Monitor {
            registry: self,
            key,
            lock,
            released: false,
        })
    }

    /// Drop the entry for `key` outright.
    ///
    /// Callers should hold the key's monitor: waiters queued on the dropped
    /// lock then move to a fresh one once it is released.
    pub fn forget(&self, key: &K) {
        let removed = {
            let mut entries = self.entries.lock();
            entries.remove(key).map(|entry| {
                entry.lock.forgotten.store(true, Ordering::Release);
                entry.lock.generation
            })
        };
        match removed {
            Some(generation) => debug!(key = ?key, generation, "Forgot lock"),
            None => debug!(key = ?key, "No lock to forget"),
        }
    }

    /// Number of live entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether the registry holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Total entries removed because they went idle.
    #[must_use]
    pub fn reclaimed_count(&self) -> u64 {
        self.reclaimed.load(Ordering::Relaxed)
    }

    /// Remove every entry that has no monitors and no outside references.
    /// Returns how many were removed.
    pub fn sweep(&self) -> usize {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, entry| entry.monitors > 0 || Arc::strong_count(&entry.lock) > 1);
        let swept = before - entries.len();
        drop(entries);

        if swept > 0 {
            self.reclaimed.fetch_add(swept as u64, Ordering::Relaxed);
            debug!(swept, "Reclaimed idle locks");
        }
        swept
    }

    /// Dump every entry at debug level.
    pub fn log_status(&self) {
        let entries = self.entries.lock();
        debug!(entries = entries.len(), "Lock registry status");
        for (key, entry) in entries.iter() {
            debug!(
                key = ?key,
                generation = entry.lock.generation,
                monitors = entry.monitors,
                held = entry.lock.is_held(),
                references = Arc::strong_count(&entry.lock),
                "Lock entry"
            );
        }
    }

    fn fresh_entry(&self) -> Entry {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        Entry {
            lock: Arc::new(SharedLock::new(generation)),
            monitors: 0,
        }
    }

    fn release_monitor(&self, key: &K, lock: &Arc<SharedLock>) {
        lock.unlock_exclusive();

        let mut entries = self.entries.lock();
        let Some(entry) = entries.get_mut(key) else {
            return;
        };
        if !Arc::ptr_eq(&entry.lock, lock) {
            return;
        }
        entry.monitors = entry.monitors.saturating_sub(1);
        // Two references: the map's and the releasing monitor's.
        if entry.monitors == 0 && Arc::strong_count(&entry.lock) == 2 {
            entries.remove(key);
            self.reclaimed.fetch_add(1, Ordering::Relaxed);
        }
    }
}

impl<K: LockKey> LockRegistry<K> {
    /// Start the background sweep on its own thread.
    ///
    /// The thread only holds a weak reference, so it never keeps the
    /// registry alive.
    ///
    /// # Errors
    ///
    /// [`RuntimeError::AlreadyRunning`] if a reclaimer is already running,
    /// [`RuntimeError::Operation`] if the thread cannot be spawned.
    pub fn start_reclaimer(self: &Arc<Self>, interval: Duration) -> RtResult<()> {
        let mut slot = self.reclaimer.lock();
        if slot.is_some() {
            return Err(RuntimeError::AlreadyRunning);
        }

        let (stop_tx, stop_rx) = bounded::<()>(1);
        let registry: Weak<Self> = Arc::downgrade(self);
        let handle = thread::Builder::new()
            .name("rt-lock-reclaimer".into())
            .spawn(move || loop {
                match stop_rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => match registry.upgrade() {
                        Some(registry) => {
                            registry.sweep();
                        }
                        None => break,
                    },
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            })
            .map_err(|e| RuntimeError::operation(format!("failed to spawn reclaimer: {e}")))?;

        *slot = Some(Reclaimer { stop_tx, handle });
        info!(interval_ms = interval.as_millis() as u64, "Lock reclaimer started");
        Ok(())
    }

    /// Stop the background sweep and wait for its thread. Returns `false` if
    /// none was running.
    pub fn stop_reclaimer(&self) -> bool {
        let Some(reclaimer) = self.reclaimer.lock().take() else {
            return false;
        };
        let _ = reclaimer.stop_tx.send(());
        if reclaimer.handle.thread().id() != thread::current().id() {
            let _ = reclaimer.handle.join();
        }
        info!("Lock reclaimer stopped");
        true
    }

    /// Whether the background sweep is running.
    #[must_use]
    pub fn is_reclaiming(&self) -> bool {
        self.reclaimer.lock().is_some()
    }
}

impl<K: LockKey> Drop for LockRegistry<K> {
    fn drop(&mut self) {
        if let Some(reclaimer) = self.reclaimer.get_mut().take() {
            drop(reclaimer.stop_tx);
            // The reclaimer may hold the last upgrade; never join ourselves.
            if reclaimer.handle.thread().id() != thread::current().id() {
                let _ = reclaimer.handle.join();
            }
        }
    }
}

/// Proof that the caller holds the lock for one key.
///
/// Released exactly once: by [`Monitor::release`] or on drop, including
/// during unwinding.
#[must_use = "the lock is released as soon as the monitor is dropped"]
pub struct Monitor<'a, K: LockKey> {
    registry: &'a LockRegistry<K>,
    key: K,
    lock: Arc<SharedLock>,
    released: bool,
}

impl<K: LockKey> Debug for Monitor<'_, K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Monitor")
            .field("key", &self.key)
            .field("generation", &self.lock.generation)
            .finish()
    }
}

impl<K: LockKey> Monitor<'_, K> {
    /// The key this monitor guards.
    #[must_use]
    pub const fn key(&self) -> &K {
        &self.key
    }

    /// Identity of the underlying lock. A key gets a new generation whenever
    /// its entry is recreated after being forgotten or reclaimed.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.lock.generation
    }

    /// The condition named `name` on this lock, created if absent.
    pub fn condition(&self, name: &str) -> Condition {
        let cond = {
            let mut conditions = self.lock.conditions.lock();
            Arc::clone(
                conditions
                    .entry(name.to_owned())
                    .or_insert_with(|| Arc::new(Condvar::new())),
            )
        };
        Condition {
            name: name.to_owned(),
            lock: Arc::clone(&self.lock),
            cond,
        }
    }

    /// Release the lock now.
    pub fn release(mut self) {
        self.release_once();
    }

    fn release_once(&mut self) {
        if !self.released {
            self.released = true;
            self.registry.release_monitor(&self.key, &self.lock);
        }
    }
}

impl<K: LockKey> Drop for Monitor<'_, K> {
    fn drop(&mut self) {
        self.release_once();
    }
}

/// A named condition variable bound to one [`SharedLock`].
///
/// Holding a condition keeps its lock's entry from being removed on release;
/// the background reclaimer collects it once the condition is dropped.
pub struct Condition {
    name: String,
    lock: Arc<SharedLock>,
    cond: Arc<Condvar>,
}

impl Debug for Condition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Condition")
            .field("name", &self.name)
            .field("generation", &self.lock.generation)
            .finish()
    }
}

impl Condition {
    /// The condition's name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Give up the monitor's lock, wait for a notification, and take the
    /// lock back before returning. Spurious wakeups are possible; re-check
    /// the awaited state in a loop.
    ///
    /// # Errors
    ///
    /// [`RuntimeError::Operation`] if `monitor` guards a different lock.
    pub fn wait<K: LockKey>(&self, monitor: &Monitor<'_, K>) -> RtResult<()> {
        self.check_monitor(monitor)?;
        let mut state = self.lock.state.lock();
        state.held = false;
        self.lock.released.notify_one();
        self.cond.wait(&mut state);
        while state.held {
            self.lock.released.wait(&mut state);
        }
        state.held = true;
        Ok(())
    }

    /// As [`Condition::wait`], giving up after `timeout`. Returns `true` if
    /// woken by a notification rather than the timeout. The lock is held
    /// again on return either way.
    ///
    /// # Errors
    ///
    /// [`RuntimeError::Operation`] if `monitor` guards a different lock.
    pub fn wait_for<K: LockKey>(
        &self,
        monitor: &Monitor<'_, K>,
        timeout: Duration,
    ) -> RtResult<bool> {
        self.check_monitor(monitor)?;
        let mut state = self.lock.state.lock();
        state.held = false;
        self.lock.released.notify_one();
        let notified = !self.cond.wait_for(&mut state, timeout).timed_out();
        while state.held {
            self.lock.released.wait(&mut state);
        }
        state.held = true;
        Ok(notified)
    }

    /// Wake one waiter.
    pub fn notify_one(&self) -> bool {
        self.cond.notify_one()
    }

    /// Wake every waiter. Returns how many were woken.
    pub fn notify_all(&self) -> usize {
        self.cond.notify_all()
    }

    fn check_monitor<K: LockKey>(&self, monitor: &Monitor<'_, K>) -> RtResult<()> {
        if Arc::ptr_eq(&self.lock, &monitor.lock) {
            Ok(())
        } else {
            Err(RuntimeError::operation(format!(
                "condition {} waited on with a monitor for {:?}",
                self.name, monitor.key
            )))
        }
    }
}
