//! Per-user fallback subscriptions for uids the root maps do not cover.
//!
//! Aggregate roots may be denied by access policy while single-record reads
//! are allowed. Any uid ever queried gets one dedicated watch on
//! `presence/{uid}` and `typing/{uid}`, kept for the rest of the session
//! unless observer-based release is enabled.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::pending;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::repositories::{Family, RemoteStateSource, Snapshot, StatePath, Subscription};
use crate::services::presence::PresenceAggregator;
use crate::services::typing::TypingAggregator;

struct WatchEntry {
    task: JoinHandle<()>,
    observers: usize,
}

enum Pumped {
    Presence(Option<Snapshot>),
    Typing(Option<Snapshot>),
}

/// Lazily opened per-uid watches, at most one per uid.
pub struct FallbackWatcher {
    source: Arc<dyn RemoteStateSource>,
    presence: Arc<PresenceAggregator>,
    typing: Arc<TypingAggregator>,
    runtime: Handle,
    release_unobserved: bool,
    closed: AtomicBool,
    watches: Mutex<HashMap<String, WatchEntry>>,
}

impl FallbackWatcher {
    pub fn new(
        source: Arc<dyn RemoteStateSource>,
        presence: Arc<PresenceAggregator>,
        typing: Arc<TypingAggregator>,
        runtime: Handle,
        release_unobserved: bool,
    ) -> Self {
        Self {
            source,
            presence,
            typing,
            runtime,
            release_unobserved,
            closed: AtomicBool::new(false),
            watches: Mutex::new(HashMap::new()),
        }
    }

    /// Open a watch for `uid` unless one exists. Never blocks: the
    /// subscription resolves in the background. Returns true if a new watch
    /// was opened.
    pub fn ensure_watched(&self, uid: &str) -> bool {
        let mut watches = self.watches.lock();
        self.ensure_locked(&mut watches, uid)
    }

    /// Register an observer of `uid`, opening its watch if needed. With
    /// release enabled the watch closes once every guard is dropped.
    pub fn retain(self: &Arc<Self>, uid: &str) -> WatchGuard {
        let mut watches = self.watches.lock();
        self.ensure_locked(&mut watches, uid);
        if let Some(entry) = watches.get_mut(uid) {
            entry.observers += 1;
        }
        drop(watches);
        WatchGuard {
            watcher: Arc::downgrade(self),
            uid: uid.to_string(),
        }
    }

    /// Open the watch while the caller holds the map lock, so a concurrent
    /// release cannot slip in between creation and observer accounting.
    /// Refuses once the watcher is shut down.
    fn ensure_locked(&self, watches: &mut HashMap<String, WatchEntry>, uid: &str) -> bool {
        if self.closed.load(Ordering::SeqCst) || watches.contains_key(uid) {
            return false;
        }
        let task = self.runtime.spawn(Self::pump(
            self.source.clone(),
            self.presence.clone(),
            self.typing.clone(),
            uid.to_string(),
        ));
        watches.insert(uid.to_string(), WatchEntry { task, observers: 0 });
        debug!(uid = %uid, watches = watches.len(), "fallback watch opened");
        true
    }

    fn release(&self, uid: &str) {
        let mut watches = self.watches.lock();
        let Some(entry) = watches.get_mut(uid) else {
            return;
        };
        entry.observers = entry.observers.saturating_sub(1);
        if entry.observers == 0 && self.release_unobserved {
            if let Some(entry) = watches.remove(uid) {
                entry.task.abort();
                debug!(uid = %uid, "fallback watch released");
            }
        }
    }

    pub fn is_watched(&self, uid: &str) -> bool {
        self.watches.lock().contains_key(uid)
    }

    pub fn watched_count(&self) -> usize {
        self.watches.lock().len()
    }

    /// Close every watch and refuse new ones. Called at session teardown.
    pub fn shutdown_all(&self) {
        let drained: Vec<(String, WatchEntry)> = {
            let mut watches = self.watches.lock();
            self.closed.store(true, Ordering::SeqCst);
            watches.drain().collect()
        };
        for (_, entry) in &drained {
            entry.task.abort();
        }
        if !drained.is_empty() {
            debug!(count = drained.len(), "fallback watches closed");
        }
    }

    async fn open(source: &dyn RemoteStateSource, path: StatePath) -> Option<Subscription> {
        match source.subscribe(&path).await {
            Ok(sub) => Some(sub),
            Err(e) => {
                debug!(path = %path, error = %e, "fallback subscription unavailable");
                None
            }
        }
    }

    async fn next_from(sub: &mut Option<Subscription>) -> Option<Snapshot> {
        match sub {
            Some(sub) => sub.next().await,
            None => pending().await,
        }
    }

    async fn pump(
        source: Arc<dyn RemoteStateSource>,
        presence: Arc<PresenceAggregator>,
        typing: Arc<TypingAggregator>,
        uid: String,
    ) {
        let (mut presence_sub, mut typing_sub) = tokio::join!(
            Self::open(source.as_ref(), StatePath::user(Family::Presence, uid.as_str())),
            Self::open(source.as_ref(), StatePath::user(Family::Typing, uid.as_str())),
        );
        if presence_sub.is_none() && typing_sub.is_none() {
            warn!(uid = %uid, "no readable path for uid, it stays offline");
            return;
        }

        while presence_sub.is_some() || typing_sub.is_some() {
            let pumped = tokio::select! {
                snapshot = Self::next_from(&mut presence_sub) => Pumped::Presence(snapshot),
                snapshot = Self::next_from(&mut typing_sub) => Pumped::Typing(snapshot),
            };
            match pumped {
                Pumped::Presence(Some(snapshot)) => {
                    presence.apply_user(&uid, snapshot.as_ref());
                }
                Pumped::Typing(Some(snapshot)) => {
                    typing.apply_user(&uid, snapshot.as_ref());
                }
                Pumped::Presence(None) => presence_sub = None,
                Pumped::Typing(None) => typing_sub = None,
            }
        }
        debug!(uid = %uid, "fallback watch ended");
    }
}

/// Observer registration returned by [`FallbackWatcher::retain`].
pub struct WatchGuard {
    watcher: Weak<FallbackWatcher>,
    uid: String,
}

impl WatchGuard {
    pub fn uid(&self) -> &str {
        &self.uid
    }
}

impl Drop for WatchGuard {
    fn drop(&mut self) {
        if let Some(watcher) = self.watcher.upgrade() {
            watcher.release(&self.uid);
        }
    }
}
