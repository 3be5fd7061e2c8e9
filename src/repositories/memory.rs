//! In-process realtime store with access policy and subscribe accounting.
//!
//! Mirrors the behaviour of the Redis source: a subscriber receives the
//! current value immediately, then one snapshot per change. Used by tests
//! and by embedders that feed presence from their own transport.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap, HashSet};
use tokio::sync::mpsc;
use tracing::debug;

use super::source::{Family, RemoteStateSource, Snapshot, StatePath, Subscription};
use crate::error::{AppError, AppResult};

#[derive(Default)]
struct Inner {
    records: HashMap<Family, BTreeMap<String, Value>>,
    subscribers: Vec<(StatePath, mpsc::UnboundedSender<Snapshot>)>,
    denied: HashSet<StatePath>,
    stalled: HashSet<StatePath>,
    subscribe_calls: HashMap<StatePath, usize>,
}

impl Inner {
    fn snapshot(&self, path: &StatePath) -> Snapshot {
        let records = self.records.get(&path.family());
        match path {
            StatePath::Root(_) => {
                let map: Map<String, Value> = records
                    .map(|r| r.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
                    .unwrap_or_default();
                Some(Value::Object(map))
            }
            StatePath::User(_, uid) => records.and_then(|r| r.get(uid).cloned()),
        }
    }

    /// Push to every subscriber of the family root and of the given uids.
    fn notify(&mut self, family: Family, uids: &[String]) {
        for (path, tx) in &self.subscribers {
            let relevant = match path {
                StatePath::Root(f) => *f == family,
                StatePath::User(f, uid) => *f == family && uids.contains(uid),
            };
            if relevant && !self.stalled.contains(path) {
                let _ = tx.send(self.snapshot(path));
            }
        }
        self.subscribers.retain(|(_, tx)| !tx.is_closed());
    }
}

/// In-memory [`RemoteStateSource`].
#[derive(Default)]
pub struct MemorySource {
    inner: Mutex<Inner>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Write (or clear, with `None`) one user's record and notify watchers.
    pub fn set(&self, family: Family, uid: &str, value: Option<Value>) {
        let mut inner = self.inner.lock();
        let records = inner.records.entry(family).or_default();
        match value {
            Some(v) => {
                records.insert(uid.to_string(), v);
            }
            None => {
                records.remove(uid);
            }
        }
        inner.notify(family, &[uid.to_string()]);
    }

    /// Replace a whole family root with `{uid: record}` and notify watchers.
    pub fn set_root(&self, family: Family, value: Value) {
        let mut inner = self.inner.lock();
        let next: BTreeMap<String, Value> = match value {
            Value::Object(map) => map.into_iter().collect(),
            _ => BTreeMap::new(),
        };
        let previous = inner.records.insert(family, next.clone()).unwrap_or_default();
        let touched: Vec<String> = previous
            .keys()
            .chain(next.keys())
            .cloned()
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        inner.notify(family, &touched);
    }

    /// Refuse future subscriptions to `path`, as an access policy would.
    pub fn deny(&self, path: StatePath) {
        self.inner.lock().denied.insert(path);
    }

    /// Accept subscriptions to `path` but never deliver anything on them.
    pub fn stall(&self, path: StatePath) {
        self.inner.lock().stalled.insert(path);
    }

    /// End every open subscription to `path`, as a dropped server stream would.
    /// Later subscriptions to it are still accepted.
    pub fn close(&self, path: &StatePath) {
        self.inner.lock().subscribers.retain(|(p, _)| p != path);
    }

    /// How many times `subscribe` was called for `path`, denied calls included.
    pub fn subscribe_calls(&self, path: &StatePath) -> usize {
        self.inner
            .lock()
            .subscribe_calls
            .get(path)
            .copied()
            .unwrap_or(0)
    }

    /// Subscriptions to `path` whose receiving side is still alive.
    pub fn live_subscribers(&self, path: &StatePath) -> usize {
        self.inner
            .lock()
            .subscribers
            .iter()
            .filter(|(p, tx)| p == path && !tx.is_closed())
            .count()
    }
}

#[async_trait]
impl RemoteStateSource for MemorySource {
    async fn subscribe(&self, path: &StatePath) -> AppResult<Subscription> {
        let mut inner = self.inner.lock();
        *inner.subscribe_calls.entry(path.clone()).or_default() += 1;
        if inner.denied.contains(path) {
            debug!(path = %path, "memory source denied subscription");
            return Err(AppError::SubscriptionDenied(path.to_string()));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        if !inner.stalled.contains(path) {
            let _ = tx.send(inner.snapshot(path));
        }
        inner.subscribers.push((path.clone(), tx));
        Ok(Subscription::new(rx))
    }
}
