//! Typing aggregation: one root subscription to `typing`, set of typing uids.

use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::models::typing::{is_typing, TypingEntry};
use crate::repositories::{Family, RemoteStateSource, StatePath};
use crate::services::state::{SharedState, TypingSet};

/// Owns the `typing` root subscription and every write to the typing set.
///
/// Flags are never expired here; a stuck `true` stays until the writer
/// clears it or a newer root snapshot drops it.
pub struct TypingAggregator {
    state: Arc<SharedState>,
    started: AtomicBool,
    root_live: AtomicBool,
    user_fed: Mutex<HashSet<String>>,
}

impl TypingAggregator {
    pub fn new(state: Arc<SharedState>) -> Self {
        Self {
            state,
            started: AtomicBool::new(false),
            root_live: AtomicBool::new(false),
            user_fed: Mutex::new(HashSet::new()),
        }
    }

    /// Open the root subscription once; see [`PresenceAggregator::start`](crate::services::PresenceAggregator::start).
    pub async fn start(self: &Arc<Self>, source: Arc<dyn RemoteStateSource>) -> Option<JoinHandle<()>> {
        if self.started.swap(true, Ordering::SeqCst) {
            return None;
        }
        let path = StatePath::root(Family::Typing);
        let mut sub = match source.subscribe(&path).await {
            Ok(sub) => sub,
            Err(e) => {
                warn!(path = %path, error = %e, "typing root unavailable, using per-user watches");
                return None;
            }
        };
        info!(path = %path, "typing root subscribed");

        let this = Arc::clone(self);
        Some(tokio::spawn(async move {
            while let Some(snapshot) = sub.next().await {
                this.apply_root(snapshot.as_ref());
            }
            this.root_live.store(false, Ordering::SeqCst);
            let dropped = this.drop_root_only();
            info!(dropped, "typing root subscription closed, using per-user watches");
        }))
    }

    /// Replace the typing set with exactly the uids whose record says `typing: true`.
    pub fn apply_root(&self, snapshot: Option<&Value>) -> usize {
        let next: TypingSet = match snapshot {
            Some(Value::Object(entries)) => entries
                .iter()
                .filter(|(_, record)| is_typing(record))
                .map(|(uid, _)| uid.clone())
                .collect(),
            _ => TypingSet::new(),
        };
        let count = next.len();
        self.state
            .update_typing(|current| (*current != next).then_some(next));
        self.root_live.store(true, Ordering::SeqCst);
        count
    }

    /// Merge one user's flag from a per-user subscription.
    pub fn apply_user(&self, uid: &str, snapshot: Option<&Value>) -> bool {
        self.user_fed.lock().insert(uid.to_string());
        let typing = snapshot.map(is_typing).unwrap_or(false);
        self.state.update_typing(|current| {
            if current.contains(uid) == typing {
                return None;
            }
            let mut next = current.clone();
            if typing {
                next.insert(uid.to_string());
            } else {
                next.remove(uid);
            }
            Some(next)
        })
    }

    /// Forget flags that only the root reported. Once the root is gone nothing
    /// would ever clear them; uids with their own watch keep their flag.
    pub fn drop_root_only(&self) -> usize {
        let user_fed = self.user_fed.lock().clone();
        let mut dropped = 0;
        self.state.update_typing(|current| {
            let next: TypingSet = current
                .iter()
                .filter(|uid| user_fed.contains(*uid))
                .cloned()
                .collect();
            dropped = current.len() - next.len();
            (dropped > 0).then_some(next)
        });
        dropped
    }

    pub fn is_typing(&self, uid: &str) -> bool {
        self.state.typing().contains(uid)
    }

    /// Whether the root subscription has delivered and is still open.
    pub fn is_root_live(&self) -> bool {
        self.root_live.load(Ordering::SeqCst)
    }

    /// Typing uids other than `self_uid`, most recently seen first.
    pub fn all_typing(&self, self_uid: Option<&str>) -> Vec<TypingEntry> {
        let typing = self.state.typing();
        let presence = self.state.presence();
        let mut entries: Vec<TypingEntry> = typing
            .iter()
            .filter(|uid| Some(uid.as_str()) != self_uid)
            .map(|uid| TypingEntry {
                uid: uid.clone(),
                last_seen: presence.get(uid).map(|r| r.last_seen).unwrap_or(0),
            })
            .collect();
        entries.sort_by(|a, b| b.last_seen.cmp(&a.last_seen).then_with(|| a.uid.cmp(&b.uid)));
        entries
    }
}
