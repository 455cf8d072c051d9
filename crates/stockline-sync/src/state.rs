//! Sync state publication.
//!
//! The UI needs a cheap, always-current snapshot of what the engine is doing.
//! `StatePublisher` holds the canonical `SyncState` and pushes every change to
//! registered listeners synchronously, in the caller's task, so a listener
//! sees each state the moment it is produced. Listener invocation order is
//! unspecified.
//!
//! Subscriptions are guard objects: dropping (or explicitly cancelling) a
//! `Subscription` detaches its listener, so a forgotten handle cannot leak
//! callbacks into a dead UI.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use stockline_core::SyncState;
use tracing::trace;

type Listener = Arc<dyn Fn(&SyncState) + Send + Sync>;

pub struct StatePublisher {
    state: Mutex<SyncState>,
    listeners: Mutex<HashMap<u64, Listener>>,
    next_id: AtomicU64,
}

impl StatePublisher {
    pub fn new(initial: SyncState) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(initial),
            listeners: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        })
    }

    /// Current state, by value.
    pub fn snapshot(&self) -> SyncState {
        self.state.lock().unwrap().clone()
    }

    /// Mutate the state in place and notify listeners with the result.
    /// Fields the closure does not touch keep their values, so callers
    /// update only what changed.
    pub fn update(&self, apply: impl FnOnce(&mut SyncState)) {
        let updated = {
            let mut state = self.state.lock().unwrap();
            apply(&mut state);
            state.clone()
        };
        trace!(status = ?updated.status, pending = updated.pending_operations, "state updated");

        // Both locks are released before listeners run; a listener may read
        // back through snapshot(), subscribe, or drop another Subscription
        // without deadlocking.
        let listeners: Vec<Listener> = self.listeners.lock().unwrap().values().cloned().collect();
        for listener in listeners {
            listener(&updated);
        }
    }

    pub fn subscribe(
        self: &Arc<Self>,
        listener: impl Fn(&SyncState) + Send + Sync + 'static,
    ) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.listeners
            .lock()
            .unwrap()
            .insert(id, Arc::new(listener));
        Subscription {
            id,
            publisher: Arc::downgrade(self),
        }
    }

    fn unsubscribe(&self, id: u64) {
        self.listeners.lock().unwrap().remove(&id);
    }

    #[cfg(test)]
    fn listener_count(&self) -> usize {
        self.listeners.lock().unwrap().len()
    }
}

/// Detaches its listener when dropped.
pub struct Subscription {
    id: u64,
    publisher: Weak<StatePublisher>,
}

impl Subscription {
    /// Explicit form of `drop`, for call sites where that reads better.
    pub fn cancel(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(publisher) = self.publisher.upgrade() {
            publisher.unsubscribe(self.id);
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use stockline_core::SyncStatus;

    #[test]
    fn update_preserves_untouched_fields() {
        let publisher = StatePublisher::new(SyncState::default());
        publisher.update(|s| s.pending_operations = 7);
        publisher.update(|s| s.status = SyncStatus::Syncing);

        let state = publisher.snapshot();
        assert_eq!(state.pending_operations, 7);
        assert_eq!(state.status, SyncStatus::Syncing);
    }

    #[test]
    fn listeners_fire_synchronously_with_each_change() {
        let publisher = StatePublisher::new(SyncState::default());
        let seen = Arc::new(Mutex::new(Vec::new()));

        let seen_clone = Arc::clone(&seen);
        let _sub = publisher.subscribe(move |state| {
            seen_clone.lock().unwrap().push(state.status);
        });

        publisher.update(|s| s.status = SyncStatus::Syncing);
        publisher.update(|s| s.status = SyncStatus::Success);

        assert_eq!(
            *seen.lock().unwrap(),
            vec![SyncStatus::Syncing, SyncStatus::Success]
        );
    }

    #[test]
    fn multiple_listeners_all_notified() {
        let publisher = StatePublisher::new(SyncState::default());
        let count = Arc::new(AtomicUsize::new(0));

        let c1 = Arc::clone(&count);
        let _a = publisher.subscribe(move |_| {
            c1.fetch_add(1, Ordering::SeqCst);
        });
        let c2 = Arc::clone(&count);
        let _b = publisher.subscribe(move |_| {
            c2.fetch_add(1, Ordering::SeqCst);
        });

        publisher.update(|s| s.is_online = true);
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn dropping_subscription_detaches_listener() {
        let publisher = StatePublisher::new(SyncState::default());
        let count = Arc::new(AtomicUsize::new(0));

        let c = Arc::clone(&count);
        let sub = publisher.subscribe(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(publisher.listener_count(), 1);

        publisher.update(|s| s.is_online = true);
        drop(sub);
        assert_eq!(publisher.listener_count(), 0);

        publisher.update(|s| s.is_online = false);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn listener_may_drop_another_subscription_mid_notification() {
        let publisher = StatePublisher::new(SyncState::default());
        let count = Arc::new(AtomicUsize::new(0));

        let c = Arc::clone(&count);
        let victim = publisher.subscribe(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        // Cancelling a subscription re-enters the listener map from inside a
        // notification; this must not deadlock.
        let slot = Arc::new(Mutex::new(Some(victim)));
        let slot_clone = Arc::clone(&slot);
        let _killer = publisher.subscribe(move |_| {
            slot_clone.lock().unwrap().take();
        });

        publisher.update(|s| s.is_online = true);
        assert_eq!(publisher.listener_count(), 1);

        // The victim is detached for subsequent updates; whether it saw the
        // first one depends on iteration order, so only later counts matter.
        let seen = count.load(Ordering::SeqCst);
        publisher.update(|s| s.is_online = false);
        assert_eq!(count.load(Ordering::SeqCst), seen);
    }

    #[test]
    fn cancel_consumes_the_subscription() {
        let publisher = StatePublisher::new(SyncState::default());
        let sub = publisher.subscribe(|_| {});
        sub.cancel();
        assert_eq!(publisher.listener_count(), 0);
    }
}
