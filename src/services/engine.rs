//! Session-scoped presence engine: wires the aggregators, fallback watches,
//! decay timer and query view, and owns their background tasks.

use parking_lot::Mutex;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;
use uuid::Uuid;

use crate::config::Config;
use crate::models::presence::Presence;
use crate::models::typing::TypingEntry;
use crate::repositories::RemoteStateSource;
use crate::services::clock::Clock;
use crate::services::decay::DecayTimer;
use crate::services::fallback::{FallbackWatcher, WatchGuard};
use crate::services::presence::PresenceAggregator;
use crate::services::query::PresenceQuery;
use crate::services::state::SharedState;
use crate::services::typing::TypingAggregator;

/// One engine per authenticated session. Create with [`start`](Self::start),
/// end with [`shutdown`](Self::shutdown) (also run on drop).
pub struct PresenceEngine {
    session_id: Uuid,
    state: Arc<SharedState>,
    fallback: Arc<FallbackWatcher>,
    decay: Arc<DecayTimer>,
    query: PresenceQuery,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl PresenceEngine {
    /// Subscribe both roots and start the decay timer. Never fails: a denied
    /// root only means uids are served by fallback watches.
    pub async fn start(
        source: Arc<dyn RemoteStateSource>,
        clock: Arc<dyn Clock>,
        config: &Config,
    ) -> Self {
        let session_id = Uuid::new_v4();
        let state = SharedState::new();
        let presence = Arc::new(PresenceAggregator::new(
            state.clone(),
            clock,
            config.away_after_seconds,
        ));
        let typing = Arc::new(TypingAggregator::new(state.clone()));
        let fallback = Arc::new(FallbackWatcher::new(
            source.clone(),
            presence.clone(),
            typing.clone(),
            Handle::current(),
            config.release_unobserved_fallbacks,
        ));
        let decay = Arc::new(DecayTimer::new(presence.clone(), config.decay_interval()));

        let (presence_root, typing_root) = tokio::join!(
            presence.start(source.clone()),
            typing.start(source.clone()),
        );
        let mut tasks: Vec<JoinHandle<()>> = [presence_root, typing_root].into_iter().flatten().collect();
        tasks.push(decay.clone().spawn());

        info!(
            session_id = %session_id,
            self_uid = config.self_uid.as_deref().unwrap_or("-"),
            roots = tasks.len() - 1,
            away_after_seconds = config.away_after_seconds,
            "presence engine started"
        );

        let query = PresenceQuery::new(presence, typing, fallback.clone(), config.self_uid.clone());
        Self {
            session_id,
            state,
            fallback,
            decay,
            query,
            tasks: Mutex::new(tasks),
        }
    }

    pub fn get_presence(&self, uid: &str) -> Presence {
        self.query.get_presence(uid)
    }

    pub fn get_all_typing(&self) -> Vec<TypingEntry> {
        self.query.get_all_typing()
    }

    pub fn away_after_seconds(&self) -> u64 {
        self.query.away_after_seconds()
    }

    pub fn observe(&self, uid: &str) -> WatchGuard {
        self.query.observe(uid)
    }

    /// Receiver that changes whenever presence or typing data changes.
    pub fn updates(&self) -> watch::Receiver<u64> {
        self.state.updates()
    }

    pub fn revision(&self) -> u64 {
        self.state.revision()
    }

    /// Run one decay pass now instead of waiting for the timer.
    pub fn decay_tick(&self) -> usize {
        self.decay.tick()
    }

    pub fn fallback_watch_count(&self) -> usize {
        self.fallback.watched_count()
    }

    /// Tear down root subscriptions, the decay timer and every fallback watch.
    /// Idempotent; queries after shutdown open no new watches.
    pub fn shutdown(&self) {
        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().drain(..).collect();
        for task in &tasks {
            task.abort();
        }
        self.fallback.shutdown_all();
        if !tasks.is_empty() {
            info!(session_id = %self.session_id, "presence engine stopped");
        }
    }
}

impl Drop for PresenceEngine {
    fn drop(&mut self) {
        self.shutdown();
    }
}
