//! Online/offline tracking with debounced transitions.
//!
//! Raw signals (from a [`Probe`] or any other source) go through
//! [`ConnectionMonitor::signal`]; a transition is published to subscribers
//! only after the status has held for the debounce interval.

pub mod debounce;
pub mod probe;

use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use tokio::sync::mpsc;

use crate::domain::{now_ms, ConnectivityState, ConnectivityStatus, Transition};

pub use debounce::{Debouncer, PendingToken, SignalEffect};
pub use probe::{HttpProbe, Probe};

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(500);

type Handler = Arc<dyn Fn(&Transition) + Send + Sync>;

struct Inner {
    debouncer: Debouncer,
    subscribers: BTreeMap<u64, Handler>,
    next_subscriber: u64,
}

/// Cloneable handle; clones share state and subscribers.
#[derive(Clone)]
pub struct ConnectionMonitor {
    inner: Arc<Mutex<Inner>>,
    debounce: Duration,
}

/// Returned by [`ConnectionMonitor::subscribe`].
pub struct Subscription {
    id: u64,
    inner: Weak<Mutex<Inner>>,
}

impl Subscription {
    pub fn unsubscribe(self) {
        if let Some(inner) = self.inner.upgrade() {
            lock(&inner).subscribers.remove(&self.id);
        }
    }
}

impl ConnectionMonitor {
    pub fn new(initial: ConnectivityStatus, debounce: Duration) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                debouncer: Debouncer::new(initial, now_ms()),
                subscribers: BTreeMap::new(),
                next_subscriber: 0,
            })),
            debounce,
        }
    }

    pub fn state(&self) -> ConnectivityState {
        lock(&self.inner).debouncer.state()
    }

    pub fn status(&self) -> ConnectivityStatus {
        self.state().status
    }

    pub fn is_online(&self) -> bool {
        self.status() == ConnectivityStatus::Online
    }

    pub fn subscribe<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&Transition) + Send + Sync + 'static,
    {
        let mut inner = lock(&self.inner);
        let id = inner.next_subscriber;
        inner.next_subscriber += 1;
        inner.subscribers.insert(id, Arc::new(handler));

        Subscription {
            id,
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Subscribe through a channel, for consumers living in an async loop.
    pub fn transitions(&self) -> (Subscription, mpsc::UnboundedReceiver<Transition>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let subscription = self.subscribe(move |transition| {
            let _ = tx.send(*transition);
        });
        (subscription, rx)
    }

    /// Feed a raw connectivity observation. Must be called within a tokio
    /// runtime; the debounce timer runs as a spawned task.
    pub fn signal(&self, status: ConnectivityStatus) {
        let effect = lock(&self.inner).debouncer.signal(status);

        match effect {
            SignalEffect::Scheduled(token) => {
                tracing::debug!("Connectivity {} pending", status);
                let monitor = self.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(monitor.debounce).await;
                    monitor.fire(token);
                });
            }
            SignalEffect::Cancelled => {
                tracing::debug!("Connectivity flap suppressed, staying {}", status);
            }
            SignalEffect::Ignored => {}
        }
    }

    /// Assert a status immediately, skipping the debounce.
    pub fn force(&self, status: ConnectivityStatus) {
        let transition = lock(&self.inner).debouncer.force(status, now_ms());
        if let Some(transition) = transition {
            self.notify(&transition);
        }
    }

    fn fire(&self, token: PendingToken) {
        let transition = lock(&self.inner).debouncer.fire(token, now_ms());
        if let Some(transition) = transition {
            self.notify(&transition);
        }
    }

    fn notify(&self, transition: &Transition) {
        tracing::info!("Connectivity changed: {} -> {}", transition.from, transition.to);

        // Handlers run outside the lock so they may call back into the monitor.
        let handlers: Vec<(u64, Handler)> = lock(&self.inner)
            .subscribers
            .iter()
            .map(|(id, handler)| (*id, handler.clone()))
            .collect();

        for (id, handler) in handlers {
            if catch_unwind(AssertUnwindSafe(|| handler(transition))).is_err() {
                tracing::warn!("Connectivity subscriber {} panicked", id);
            }
        }
    }
}

fn lock(inner: &Mutex<Inner>) -> MutexGuard<'_, Inner> {
    inner.lock().unwrap_or_else(PoisonError::into_inner)
}
