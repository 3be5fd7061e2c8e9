//! Shared presence and typing maps for one session.
//!
//! Maps are copy-on-write: writers build a new map and swap the `Arc`, so a
//! reader holding an older `Arc` keeps a consistent snapshot. Every swap bumps
//! a revision published on a watch channel; observers re-query on change.

use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::watch;

use crate::models::presence::PresenceRecord;

pub type PresenceMap = HashMap<String, PresenceRecord>;
pub type TypingSet = HashSet<String>;

#[derive(Default)]
struct Maps {
    presence: Arc<PresenceMap>,
    typing: Arc<TypingSet>,
}

pub struct SharedState {
    maps: RwLock<Maps>,
    revision: watch::Sender<u64>,
}

impl Default for SharedState {
    fn default() -> Self {
        let (revision, _rx) = watch::channel(0);
        Self {
            maps: RwLock::new(Maps::default()),
            revision,
        }
    }
}

impl SharedState {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn presence(&self) -> Arc<PresenceMap> {
        self.maps.read().presence.clone()
    }

    pub fn typing(&self) -> Arc<TypingSet> {
        self.maps.read().typing.clone()
    }

    /// Compute a replacement presence map from the current one under the
    /// write lock. Returning `None` leaves the map and revision untouched.
    pub fn update_presence<F>(&self, f: F) -> bool
    where
        F: FnOnce(&PresenceMap) -> Option<PresenceMap>,
    {
        let mut maps = self.maps.write();
        let next = f(maps.presence.as_ref());
        match next {
            Some(next) => {
                maps.presence = Arc::new(next);
                drop(maps);
                self.bump();
                true
            }
            None => false,
        }
    }

    /// Same as [`update_presence`](Self::update_presence) for the typing set.
    pub fn update_typing<F>(&self, f: F) -> bool
    where
        F: FnOnce(&TypingSet) -> Option<TypingSet>,
    {
        let mut maps = self.maps.write();
        let next = f(maps.typing.as_ref());
        match next {
            Some(next) => {
                maps.typing = Arc::new(next);
                drop(maps);
                self.bump();
                true
            }
            None => false,
        }
    }

    pub fn revision(&self) -> u64 {
        *self.revision.borrow()
    }

    /// Receiver that changes whenever either map is replaced.
    pub fn updates(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    fn bump(&self) {
        self.revision.send_modify(|rev| *rev += 1);
    }
}
