//! Presence aggregation: one root subscription to `presence`, tri-state derivation.

use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::models::presence::{PresenceRecord, RawPresence};
use crate::repositories::{Family, RemoteStateSource, StatePath};
use crate::services::clock::Clock;
use crate::services::state::{PresenceMap, SharedState};

/// Owns the `presence` root subscription and every write to the presence map.
pub struct PresenceAggregator {
    state: Arc<SharedState>,
    clock: Arc<dyn Clock>,
    away_after_seconds: u64,
    started: AtomicBool,
    root_live: AtomicBool,
}

impl PresenceAggregator {
    pub fn new(state: Arc<SharedState>, clock: Arc<dyn Clock>, away_after_seconds: u64) -> Self {
        Self {
            state,
            clock,
            away_after_seconds,
            started: AtomicBool::new(false),
            root_live: AtomicBool::new(false),
        }
    }

    pub fn away_after_seconds(&self) -> u64 {
        self.away_after_seconds
    }

    /// Open the root subscription. Only the first call subscribes; later calls
    /// return `None`. A denied or failed root is logged and left to the
    /// per-user fallback.
    #[instrument(skip_all)]
    pub async fn start(self: &Arc<Self>, source: Arc<dyn RemoteStateSource>) -> Option<JoinHandle<()>> {
        if self.started.swap(true, Ordering::SeqCst) {
            return None;
        }
        let path = StatePath::root(Family::Presence);
        let mut sub = match source.subscribe(&path).await {
            Ok(sub) => sub,
            Err(e) => {
                warn!(path = %path, error = %e, "presence root unavailable, using per-user watches");
                return None;
            }
        };
        info!(path = %path, "presence root subscribed");

        let this = Arc::clone(self);
        Some(tokio::spawn(async move {
            while let Some(snapshot) = sub.next().await {
                this.apply_root(snapshot.as_ref());
                this.root_live.store(true, Ordering::SeqCst);
            }
            this.root_live.store(false, Ordering::SeqCst);
            info!("presence root subscription closed, using per-user watches");
        }))
    }

    /// Apply a root push `{uid: {online, lastSeen}}`. Every record is derived
    /// afresh; uids known before but missing from the push are kept and
    /// re-derived, never dropped.
    pub fn apply_root(&self, snapshot: Option<&Value>) -> usize {
        let now = self.clock.now_ms();
        let away = self.away_after_seconds;
        let mut count = 0;
        self.state.update_presence(|current| {
            let mut next = PresenceMap::with_capacity(current.len());
            if let Some(Value::Object(entries)) = snapshot {
                for (uid, raw) in entries {
                    let raw = RawPresence::from_value(raw);
                    next.insert(uid.clone(), PresenceRecord::derive(uid.clone(), raw, now, away));
                }
            }
            count = next.len();
            for (uid, record) in current.iter() {
                if !next.contains_key(uid) {
                    next.insert(uid.clone(), record.rederive(now, away));
                }
            }
            Some(next)
        });
        debug!(records = count, "presence root applied");
        count
    }

    /// Merge one user's record from a per-user subscription. `None` keeps
    /// whatever is already known for the uid.
    pub fn apply_user(&self, uid: &str, snapshot: Option<&Value>) -> bool {
        let Some(value) = snapshot else {
            return false;
        };
        let record = PresenceRecord::derive(
            uid,
            RawPresence::from_value(value),
            self.clock.now_ms(),
            self.away_after_seconds,
        );
        self.state.update_presence(|current| {
            if current.get(uid) == Some(&record) {
                return None;
            }
            let mut next = current.clone();
            next.insert(uid.to_string(), record);
            Some(next)
        })
    }

    /// Re-classify every known uid at the current time. The map is swapped
    /// only if some state actually changed; returns how many did.
    pub fn rederive(&self) -> usize {
        let now = self.clock.now_ms();
        let away = self.away_after_seconds;
        let mut changed = 0;
        self.state.update_presence(|current| {
            let next: PresenceMap = current
                .iter()
                .map(|(uid, record)| (uid.clone(), record.rederive(now, away)))
                .collect();
            changed = next
                .iter()
                .filter(|(uid, record)| current.get(*uid).map(|r| r.state) != Some(record.state))
                .count();
            (changed > 0).then_some(next)
        });
        changed
    }

    pub fn get(&self, uid: &str) -> Option<PresenceRecord> {
        self.state.presence().get(uid).cloned()
    }

    /// Whether the root subscription has delivered and is still open. Records
    /// fed only by a closed root go stale, so callers must watch them directly.
    pub fn is_root_live(&self) -> bool {
        self.root_live.load(Ordering::SeqCst)
    }

    pub fn contains(&self, uid: &str) -> bool {
        self.state.presence().contains_key(uid)
    }

    pub fn now_ms(&self) -> i64 {
        self.clock.now_ms()
    }
}
