//! In-process realtime store.
//!
//! Keeps the whole document tree in memory and fans every change out to the
//! subscriptions whose path overlaps the write. Used by tests and the demo,
//! and as a local stand-in when no database is configured.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;

use super::path::{validate_key, StorePath};
use super::push_id::PushIdGenerator;
use super::{tree, MultiPathUpdate, RealtimeStore, Snapshot};
use crate::error::Result;
use crate::subscription::{Subscription, SubscriptionSink};
use crate::time::{Clock, SystemClock};

struct Listener {
    sink: SubscriptionSink,
    last: Option<Value>,
}

#[derive(Default)]
struct MemoryInner {
    root: Value,
    listeners: Vec<Listener>,
    writes: u64,
}

/// Realtime store held entirely in process memory.
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<RwLock<MemoryInner>>,
    keys: Arc<PushIdGenerator>,
    clock: Arc<dyn Clock>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Create an empty store using the system clock for push ids.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Create an empty store with a custom clock.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(MemoryInner::default())),
            keys: Arc::new(PushIdGenerator::new()),
            clock,
        }
    }

    /// Number of write operations applied so far (set, remove, update).
    pub fn write_count(&self) -> u64 {
        self.inner.read().writes
    }

    /// Number of subscriptions still attached.
    pub fn listener_count(&self) -> usize {
        let mut inner = self.inner.write();
        inner.listeners.retain(|l| !l.sink.is_closed());
        inner.listeners.len()
    }

    /// Copy of the whole tree.
    pub fn dump(&self) -> Value {
        self.inner.read().root.clone()
    }

    fn apply(&self, writes: Vec<(StorePath, Value)>) {
        let mut inner = self.inner.write();
        for (path, value) in writes {
            tracing::debug!(path = %path, delete = value.is_null(), "Memory store write");
            tree::set(&mut inner.root, path.segments(), value);
        }
        inner.writes += 1;

        let MemoryInner {
            root, listeners, ..
        } = &mut *inner;
        listeners.retain_mut(|listener| {
            if listener.sink.is_closed() {
                return false;
            }
            let current = tree::get(root, listener.sink.path().segments()).cloned();
            if current == listener.last {
                return true;
            }
            listener.last = current.clone();
            listener
                .sink
                .send(Ok(Snapshot::new(listener.sink.path().clone(), current)))
        });
    }
}

#[async_trait]
impl RealtimeStore for MemoryStore {
    async fn get(&self, path: &StorePath) -> Result<Snapshot> {
        let inner = self.inner.read();
        let value = tree::get(&inner.root, path.segments()).cloned();
        Ok(Snapshot::new(path.clone(), value))
    }

    async fn set(&self, path: &StorePath, value: Value) -> Result<()> {
        self.apply(vec![(path.clone(), value)]);
        Ok(())
    }

    async fn update(&self, update: MultiPathUpdate) -> Result<()> {
        update.validate()?;
        if update.is_empty() {
            return Ok(());
        }
        self.apply(update.entries().to_vec());
        Ok(())
    }

    async fn query_equal(&self, path: &StorePath, child: &str, value: &str) -> Result<Snapshot> {
        validate_key(child)?;
        let inner = self.inner.read();
        let matches: serde_json::Map<String, Value> = tree::get(&inner.root, path.segments())
            .and_then(Value::as_object)
            .map(|children| {
                children
                    .iter()
                    .filter(|(_, v)| v.get(child).and_then(Value::as_str) == Some(value))
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect()
            })
            .unwrap_or_default();

        let value = if matches.is_empty() {
            None
        } else {
            Some(Value::Object(matches))
        };
        Ok(Snapshot::new(path.clone(), value))
    }

    async fn subscribe(&self, path: &StorePath) -> Result<Subscription> {
        let (subscription, sink) = Subscription::channel(path.clone());

        let mut inner = self.inner.write();
        let current = tree::get(&inner.root, path.segments()).cloned();
        sink.send(Ok(Snapshot::new(path.clone(), current.clone())));
        inner.listeners.push(Listener {
            sink,
            last: current,
        });

        tracing::debug!(path = %path, subscription = %subscription.id(), "Memory store subscription opened");
        Ok(subscription)
    }

    fn generate_key(&self) -> String {
        self.keys.next_id(self.clock.now_millis())
    }
}
