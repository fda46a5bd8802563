//! Keyed, lossy, in-process pub/sub.
//!
//! Each key holds a set of bounded channels. `publish` never blocks: a full
//! subscriber buffer drops that event for that subscriber only and bumps the
//! hub's drop counter. Registries sit behind a `RwLock`, read-locked while
//! publishing and write-locked for registration changes.

use std::collections::HashMap;
use std::hash::Hash;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, Weak};
use std::task::{Context, Poll};

use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_stream::Stream;
use tracing::debug;

/// Default per-subscriber buffer.
pub const DEFAULT_BUFFER: usize = 64;

/// Identifies one registered channel within a hub.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

/// Outcome of one `publish` call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishReport {
    pub delivered: usize,
    /// Subscribers whose buffer was full.
    pub dropped: usize,
    /// Subscribers whose receiver is already gone.
    pub closed: usize,
}

struct Registered<E> {
    id: SubscriptionId,
    tx: mpsc::Sender<E>,
}

struct HubInner<K, E> {
    name: &'static str,
    buffer: usize,
    subscribers: RwLock<HashMap<K, Vec<Registered<E>>>>,
    next_id: AtomicU64,
    dropped: AtomicU64,
}

pub struct Hub<K, E> {
    inner: Arc<HubInner<K, E>>,
}

impl<K, E> Clone for Hub<K, E> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<K, E> core::fmt::Debug for Hub<K, E> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Hub")
            .field("name", &self.inner.name)
            .field("buffer", &self.inner.buffer)
            .field("dropped", &self.inner.dropped.load(Ordering::Relaxed))
            .finish()
    }
}

impl<K, E> Hub<K, E>
where
    K: Eq + Hash + Clone + core::fmt::Display,
    E: Clone,
{
    pub fn new(name: &'static str, buffer: usize) -> Self {
        Self {
            inner: Arc::new(HubInner {
                name,
                buffer: buffer.max(1),
                subscribers: RwLock::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                dropped: AtomicU64::new(0),
            }),
        }
    }

    pub fn buffer(&self) -> usize {
        self.inner.buffer
    }

    pub fn next_subscription_id(&self) -> SubscriptionId {
        SubscriptionId(self.inner.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Register a fresh bounded channel under `key`.
    pub fn subscribe(&self, key: K) -> Subscription<K, E> {
        let (tx, rx) = mpsc::channel(self.inner.buffer);
        let id = self.next_subscription_id();
        self.subscribe_with(key.clone(), id, tx);

        Subscription {
            key,
            id,
            rx,
            hub: Arc::downgrade(&self.inner),
        }
    }

    /// Register an existing sender. Returns `false` if `id` is already
    /// registered under `key`, leaving the registry unchanged.
    pub fn subscribe_with(&self, key: K, id: SubscriptionId, tx: mpsc::Sender<E>) -> bool {
        let mut subs = self
            .inner
            .subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let entry = subs.entry(key).or_default();
        if entry.iter().any(|r| r.id == id) {
            return false;
        }
        entry.push(Registered { id, tx });
        true
    }

    /// Remove one channel. Removing the last channel removes the key.
    /// Returns `false` if nothing was registered.
    pub fn unsubscribe(&self, key: &K, id: SubscriptionId) -> bool {
        remove(&self.inner, key, id)
    }

    /// Best-effort delivery to every channel currently registered under `key`.
    /// Channels whose receiver is gone are pruned afterwards.
    pub fn publish(&self, key: &K, event: E) -> PublishReport {
        let mut report = PublishReport::default();
        {
            let subs = self
                .inner
                .subscribers
                .read()
                .unwrap_or_else(PoisonError::into_inner);

            let Some(channels) = subs.get(key) else {
                return report;
            };

            for registered in channels {
                match registered.tx.try_send(event.clone()) {
                    Ok(()) => report.delivered += 1,
                    Err(TrySendError::Full(_)) => report.dropped += 1,
                    Err(TrySendError::Closed(_)) => report.closed += 1,
                }
            }
        }

        if report.dropped > 0 {
            self.inner
                .dropped
                .fetch_add(report.dropped as u64, Ordering::Relaxed);
            debug!(
                hub = self.inner.name,
                key = %key,
                dropped = report.dropped,
                "subscriber buffer full; event dropped"
            );
        }
        if report.closed > 0 {
            prune_closed(&self.inner, key);
        }

        report
    }

    pub fn subscriber_count(&self, key: &K) -> usize {
        self.inner
            .subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .map_or(0, Vec::len)
    }

    pub fn key_count(&self) -> usize {
        self.inner
            .subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Events dropped on full buffers since the hub was created.
    pub fn dropped_total(&self) -> u64 {
        self.inner.dropped.load(Ordering::Relaxed)
    }
}

fn remove<K: Eq + Hash, E>(inner: &HubInner<K, E>, key: &K, id: SubscriptionId) -> bool {
    let mut subs = inner
        .subscribers
        .write()
        .unwrap_or_else(PoisonError::into_inner);

    let Some(channels) = subs.get_mut(key) else {
        return false;
    };
    let before = channels.len();
    channels.retain(|r| r.id != id);
    let removed = channels.len() != before;
    if channels.is_empty() {
        subs.remove(key);
    }
    removed
}

fn prune_closed<K: Eq + Hash, E>(inner: &HubInner<K, E>, key: &K) {
    let mut subs = inner
        .subscribers
        .write()
        .unwrap_or_else(PoisonError::into_inner);

    if let Some(channels) = subs.get_mut(key) {
        channels.retain(|r| !r.tx.is_closed());
        if channels.is_empty() {
            subs.remove(key);
        }
    }
}

/// Receiving half of a hub registration. Unsubscribes itself on drop.
pub struct Subscription<K: Eq + Hash, E> {
    key: K,
    id: SubscriptionId,
    rx: mpsc::Receiver<E>,
    hub: Weak<HubInner<K, E>>,
}

impl<K: Eq + Hash, E> Subscription<K, E> {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn key(&self) -> &K {
        &self.key
    }

    /// Wait for the next event; `None` once the hub is gone.
    pub async fn recv(&mut self) -> Option<E> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<E> {
        self.rx.try_recv().ok()
    }
}

impl<K: Eq + Hash, E> Drop for Subscription<K, E> {
    fn drop(&mut self) {
        if let Some(inner) = self.hub.upgrade() {
            remove(&inner, &self.key, self.id);
        }
    }
}

impl<K: Eq + Hash + Unpin, E> Stream for Subscription<K, E> {
    type Item = E;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<E>> {
        self.get_mut().rx.poll_recv(cx)
    }
}
