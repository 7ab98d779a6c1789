//! Publish/subscribe channel
//!
//! One-way notifications keyed by path. Listeners run synchronously on the
//! dispatch path, in subscription order, so notifications are seen in the
//! order they arrived.

use crate::bridge::Bridge;
use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::{error, warn};
use unibridge_core::{Envelope, Result};

type Listener = Arc<dyn Fn(&str) + Send + Sync>;

#[derive(Clone)]
struct Entry {
    id: u64,
    active: Arc<AtomicBool>,
    on_next: Listener,
}

pub(crate) struct SubscriberTable {
    paths: Mutex<HashMap<String, Vec<Entry>>>,
    next_id: AtomicU64,
}

impl SubscriberTable {
    pub(crate) fn new() -> Self {
        Self {
            paths: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    fn add(&self, path: &str, on_next: Listener) -> (u64, Arc<AtomicBool>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let active = Arc::new(AtomicBool::new(true));
        self.paths
            .lock()
            .entry(path.to_string())
            .or_default()
            .push(Entry {
                id,
                active: active.clone(),
                on_next,
            });
        (id, active)
    }

    fn remove(&self, path: &str, id: u64) {
        let mut paths = self.paths.lock();
        if let Some(entries) = paths.get_mut(path) {
            entries.retain(|entry| entry.id != id);
            if entries.is_empty() {
                paths.remove(path);
            }
        }
    }

    /// Invoke every active listener on `path`. Returns how many ran.
    pub(crate) fn deliver(&self, path: &str, content: &str) -> usize {
        // Snapshot so listeners may subscribe or dispose without deadlocking
        let entries = match self.paths.lock().get(path) {
            Some(entries) => entries.clone(),
            None => return 0,
        };

        let mut delivered = 0;
        for entry in entries {
            // Disposed after the snapshot was taken
            if !entry.active.load(Ordering::Acquire) {
                continue;
            }
            let on_next = &entry.on_next;
            if catch_unwind(AssertUnwindSafe(|| on_next(content))).is_err() {
                error!("Subscriber {} on {} panicked", entry.id, path);
            }
            delivered += 1;
        }
        delivered
    }

    pub(crate) fn count(&self, path: &str) -> usize {
        self.paths.lock().get(path).map_or(0, Vec::len)
    }
}

/// Handle for one subscription.
///
/// Delivery stops on [`Subscription::dispose`] or when the handle is dropped.
#[must_use = "dropping a Subscription disposes it"]
pub struct Subscription {
    path: String,
    id: u64,
    active: Arc<AtomicBool>,
    table: Weak<SubscriberTable>,
}

impl Subscription {
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Stop future deliveries. Idempotent.
    pub fn dispose(&self) {
        if !self.active.swap(false, Ordering::AcqRel) {
            return;
        }
        if let Some(table) = self.table.upgrade() {
            table.remove(&self.path, self.id);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("path", &self.path)
            .field("id", &self.id)
            .field("active", &self.is_active())
            .finish()
    }
}

impl Bridge {
    /// Send a one-way notification. No acknowledgement is expected.
    pub async fn publish(&self, path: &str, content: impl Into<String>) -> Result<()> {
        self.router
            .send_envelope(
                path,
                &Envelope::Publish {
                    payload: content.into(),
                },
            )
            .await
    }

    /// Publish a codec-encoded value
    pub async fn publish_value<T: Serialize + ?Sized>(&self, path: &str, value: &T) -> Result<()> {
        let content = self.router.codec.encode(value)?;
        self.publish(path, content).await
    }

    /// Listen for notifications on `path`.
    ///
    /// `on_next` runs on the dispatch path and should not block.
    pub fn subscribe<F>(&self, path: &str, on_next: F) -> Subscription
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        let (id, active) = self.router.subscribers.add(path, Arc::new(on_next));
        Subscription {
            path: path.to_string(),
            id,
            active,
            table: Arc::downgrade(&self.router.subscribers),
        }
    }

    /// Listen for codec-encoded values on `path`. Undecodable notifications
    /// are logged and skipped.
    pub fn subscribe_value<T, F>(&self, path: &str, on_next: F) -> Subscription
    where
        T: DeserializeOwned,
        F: Fn(T) + Send + Sync + 'static,
    {
        let codec = self.router.codec;
        let topic = path.to_string();
        self.subscribe(path, move |content| match codec.decode::<T>(content) {
            Ok(value) => on_next(value),
            Err(e) => warn!("Skipping undecodable notification on {}: {}", topic, e),
        })
    }

    /// Number of live subscriptions on `path`
    pub fn subscriber_count(&self, path: &str) -> usize {
        self.router.subscribers.count(path)
    }
}
