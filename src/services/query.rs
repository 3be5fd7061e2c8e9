//! Consumer-facing presence reads.

use std::sync::Arc;

use crate::models::presence::{derive_presence, Presence};
use crate::models::typing::TypingEntry;
use crate::services::fallback::{FallbackWatcher, WatchGuard};
use crate::services::presence::PresenceAggregator;
use crate::services::typing::TypingAggregator;

/// Synchronous, non-blocking view over the aggregated maps.
///
/// A miss never waits: it returns the best known value and seeds a fallback
/// watch so a later call (after the next update) sees real data.
pub struct PresenceQuery {
    presence: Arc<PresenceAggregator>,
    typing: Arc<TypingAggregator>,
    fallback: Arc<FallbackWatcher>,
    self_uid: Option<String>,
}

impl PresenceQuery {
    pub fn new(
        presence: Arc<PresenceAggregator>,
        typing: Arc<TypingAggregator>,
        fallback: Arc<FallbackWatcher>,
        self_uid: Option<String>,
    ) -> Self {
        Self {
            presence,
            typing,
            fallback,
            self_uid,
        }
    }

    pub fn self_uid(&self) -> Option<&str> {
        self.self_uid.as_deref()
    }

    /// Presence for `uid`. A blank uid yields the offline zero value with no
    /// side effects. Unless both roots are live, the uid also gets its own watch.
    pub fn get_presence(&self, uid: &str) -> Presence {
        if uid.trim().is_empty() {
            return Presence::offline();
        }

        let record = self.presence.get(uid);
        let covered = self.presence.is_root_live() && self.typing.is_root_live();
        if record.is_none() || !covered {
            self.fallback.ensure_watched(uid);
        }

        let base = match record {
            Some(record) => Presence::from(&record),
            None if self.self_uid() == Some(uid) => Presence::online_at(self.presence.now_ms()),
            None => Presence::offline(),
        };
        derive_presence(base, self.typing.is_typing(uid))
    }

    /// Everyone typing except the session's own user, most recently seen first.
    pub fn get_all_typing(&self) -> Vec<TypingEntry> {
        self.typing.all_typing(self.self_uid())
    }

    /// Threshold shown in copy such as "away after 5 minutes".
    pub fn away_after_seconds(&self) -> u64 {
        self.presence.away_after_seconds()
    }

    /// Keep a fallback watch on `uid` for as long as the guard lives.
    pub fn observe(&self, uid: &str) -> WatchGuard {
        self.fallback.retain(uid)
    }
}
