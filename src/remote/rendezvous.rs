//! Single-slot wait/notify primitive.
//!
//! A [`Rendezvous`] keeps a registry of suspended waiters. [`Rendezvous::notify`]
//! wakes the most recently registered one, [`Rendezvous::notify_all`] wakes all
//! of them. Signals are never remembered: notifying an empty registry is a
//! no-op, so a waiter that must not miss a signal registers itself with
//! [`Rendezvous::register`] *before* it checks the condition it waits for.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender};
use std::sync::Mutex;
use std::time::Duration;

/// Why a waiter returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wake {
    Signalled,
    TimedOut,
}

#[derive(Debug, Default)]
pub struct Rendezvous {
    waiters: Mutex<Vec<(u64, SyncSender<()>)>>,
    next_id: AtomicU64,
}

impl Rendezvous {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a waiter without suspending yet.
    pub fn register(&self) -> Waiter<'_> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::sync_channel(1);
        self.lock().push((id, tx));
        Waiter {
            owner: self,
            id,
            rx,
        }
    }

    /// Suspend the caller until a signal arrives or `timeout` elapses.
    pub fn wait(&self, timeout: Duration) -> Wake {
        self.register().wait(timeout)
    }

    /// Wake the most recently registered waiter, if any.
    pub fn notify(&self) {
        let waiter = self.lock().pop();
        if let Some((_, tx)) = waiter {
            let _ = tx.try_send(());
        }
    }

    /// Wake every current waiter.
    pub fn notify_all(&self) {
        let waiters = std::mem::take(&mut *self.lock());
        for (_, tx) in waiters.into_iter().rev() {
            let _ = tx.try_send(());
        }
    }

    /// Number of registered waiters.
    pub fn waiters(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<(u64, SyncSender<()>)>> {
        // waiter list stays consistent even if a holder panicked
        self.waiters.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Remove waiter from registry, return false if a notifier already took it.
    fn unregister(&self, id: u64) -> bool {
        let mut waiters = self.lock();
        let before = waiters.len();
        waiters.retain(|(waiter_id, _)| *waiter_id != id);
        waiters.len() != before
    }
}

/// A registered, not yet woken waiter. Dropping it unregisters it.
#[must_use]
pub struct Waiter<'a> {
    owner: &'a Rendezvous,
    id: u64,
    rx: Receiver<()>,
}

impl Waiter<'_> {
    pub fn wait(self, timeout: Duration) -> Wake {
        match self.rx.recv_timeout(timeout) {
            Ok(()) => Wake::Signalled,
            Err(RecvTimeoutError::Timeout) => {
                if self.owner.unregister(self.id) {
                    Wake::TimedOut
                } else {
                    // a notifier popped us between the timeout and the removal
                    match self.rx.try_recv() {
                        Ok(()) => Wake::Signalled,
                        Err(_) => Wake::TimedOut,
                    }
                }
            }
            Err(RecvTimeoutError::Disconnected) => Wake::TimedOut,
        }
    }
}

impl Drop for Waiter<'_> {
    fn drop(&mut self) {
        self.owner.unregister(self.id);
    }
}
